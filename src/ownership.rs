use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Context;
use uuid::Uuid;

use crate::domain::CallerId;
use crate::domain::Editor;
use crate::domain::Newsletter;
use crate::domain::Post;
use crate::store::EditorStore;
use crate::store::NewsletterStore;
use crate::store::PostStore;
use crate::utils::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum OwnershipError {
    #[error("Not found")]
    NotFound,
    #[error("Forbidden")]
    Forbidden,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl Debug for OwnershipError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Answers "may this caller act on this newsletter (or post)?".
///
/// An unknown caller gets `Forbidden` before anything is looked up, so a
/// client cannot tell "no such editor" apart from "not your newsletter", nor
/// probe which newsletters exist.
pub struct OwnershipGuard {
    editors: Arc<dyn EditorStore>,
    newsletters: Arc<dyn NewsletterStore>,
    posts: Arc<dyn PostStore>,
}

impl OwnershipGuard {
    pub fn new(
        editors: Arc<dyn EditorStore>,
        newsletters: Arc<dyn NewsletterStore>,
        posts: Arc<dyn PostStore>,
    ) -> Self {
        Self {
            editors,
            newsletters,
            posts,
        }
    }

    #[tracing::instrument(name = "Verifying newsletter ownership", skip(self))]
    pub async fn verify_newsletter_ownership(
        &self,
        caller: &CallerId,
        newsletter_id: Uuid,
    ) -> Result<(Editor, Newsletter), OwnershipError> {
        let editor = self
            .editors
            .find_editor_by_auth_id(caller.as_ref())
            .await
            .context("Failed to resolve caller")?
            .ok_or(OwnershipError::Forbidden)?;

        let newsletter = self
            .newsletters
            .get_newsletter(newsletter_id)
            .await
            .context("Failed to fetch newsletter")?
            .ok_or(OwnershipError::NotFound)?;

        if newsletter.editor_id != editor.id {
            tracing::warn!(editor_id = %editor.id, "Caller does not own newsletter");
            return Err(OwnershipError::Forbidden);
        }
        Ok((editor, newsletter))
    }

    /// The returned post belongs to a newsletter owned by the returned editor.
    #[tracing::instrument(name = "Verifying post ownership", skip(self))]
    pub async fn verify_post_ownership(
        &self,
        caller: &CallerId,
        post_id: Uuid,
    ) -> Result<(Editor, Post), OwnershipError> {
        let post = self
            .posts
            .get_post(post_id)
            .await
            .context("Failed to fetch post")?
            .ok_or(OwnershipError::NotFound)?;
        let (editor, _) = self
            .verify_newsletter_ownership(caller, post.newsletter_id)
            .await?;
        Ok((editor, post))
    }
}
