use validator::ValidateEmail;

/// A syntactically valid, normalised (trimmed, lower-cased) email address.
/// Used for both senders and recipients.
///
/// Must be instantiated with `SubscriberEmail::parse`; the field is left
/// private so that an unparsed string can never pass for an email.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberEmail(String);

impl SubscriberEmail {
    pub fn parse(email: String) -> Result<Self, String> {
        // normalise first, so that " Foo@Bar.com" and "foo@bar.com" end up as the same row
        let normalised = email.trim().to_lowercase();
        ValidateEmail::validate_email(&normalised)
            .then_some(Self(normalised))
            .ok_or(format!("Invalid email: {email:?}"))
    }
}

impl AsRef<str> for SubscriberEmail {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for SubscriberEmail {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
