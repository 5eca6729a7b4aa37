mod editor;
mod newsletter;
mod page;
mod post;
mod subscriber;
mod subscriber_email;
// allow external `use` statements to skip `subscriber` etc
pub use editor::CallerId;
pub use editor::Editor;
pub use newsletter::Newsletter;
pub use page::Page;
pub use post::Post;
pub use subscriber::Subscriber;
pub use subscriber::SubscriberStatus;
pub use subscriber_email::SubscriberEmail;
