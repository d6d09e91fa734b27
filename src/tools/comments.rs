//! Comment moderation dispatched over a closed action set.
//!
//! Every action runs under the `comment_moderation` breaker with the channel's credential.
//! Pinning has no public upstream endpoint and fails with [`Error::Unsupported`] before any
//! layer is touched.

// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, TokenSecret},
	catalog::Operation,
	error::AuthError,
	guard::{CallDescriptor, CallGuard, GuardResult},
};

/// Boxed future returned by [`CommentApi`] methods.
pub type CommentFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Moderation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CommentAction {
	/// Top-level comment on a video.
	Post {
		/// Target video.
		video_id: String,
		/// Comment body.
		text: String,
	},
	/// Reply to an existing comment.
	Reply {
		/// Parent comment.
		parent_id: String,
		/// Reply body.
		text: String,
	},
	/// Deletes a comment.
	Delete {
		/// Target comment.
		comment_id: String,
	},
	/// Holds a comment for review.
	Hide {
		/// Target comment.
		comment_id: String,
	},
	/// Pins a comment to the top of the thread.
	Pin {
		/// Target comment.
		comment_id: String,
	},
}
impl CommentAction {
	/// Stable label.
	pub const fn as_str(&self) -> &'static str {
		match self {
			CommentAction::Post { .. } => "post",
			CommentAction::Reply { .. } => "reply",
			CommentAction::Delete { .. } => "delete",
			CommentAction::Hide { .. } => "hide",
			CommentAction::Pin { .. } => "pin",
		}
	}
}

/// Completed moderation action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommentOutcome {
	/// Comment affected or created.
	pub comment_id: String,
	/// Past-tense action label (`posted`, `replied`, `deleted`, `hidden`).
	pub action: &'static str,
}

/// Upstream comment endpoints.
pub trait CommentApi
where
	Self: Send + Sync,
{
	/// Creates a top-level comment thread, returning its id.
	fn insert_thread<'a>(
		&'a self,
		token: &'a TokenSecret,
		video_id: &'a str,
		text: &'a str,
	) -> CommentFuture<'a, String>;

	/// Creates a reply, returning its id.
	fn insert_reply<'a>(
		&'a self,
		token: &'a TokenSecret,
		parent_id: &'a str,
		text: &'a str,
	) -> CommentFuture<'a, String>;

	/// Deletes a comment.
	fn delete<'a>(&'a self, token: &'a TokenSecret, comment_id: &'a str) -> CommentFuture<'a, ()>;

	/// Moves a comment to `heldForReview`.
	fn hold_for_review<'a>(
		&'a self,
		token: &'a TokenSecret,
		comment_id: &'a str,
	) -> CommentFuture<'a, ()>;
}

/// Runs `action` for the channel behind `credential`.
pub async fn manage_comments(
	guard: &CallGuard,
	api: &dyn CommentApi,
	credential: CredentialKey,
	action: CommentAction,
) -> GuardResult<CommentOutcome> {
	if let CommentAction::Pin { comment_id } = &action {
		tracing::warn!(%comment_id, "Pinning comments is not available through the public API.");

		return GuardResult::from_error(Error::Unsupported { operation: "pin_comment" });
	}

	let call = CallDescriptor::new(Operation::CommentModeration).with_credential(credential.clone());

	guard
		.execute(call, move |record| async move {
			let token = record.map(|record| record.access_token).ok_or_else(|| {
				Error::from(AuthError::AuthorizationRequired { key: credential.to_string() })
			})?;

			dispatch(api, &token, action).await
		})
		.await
}

async fn dispatch(
	api: &dyn CommentApi,
	token: &TokenSecret,
	action: CommentAction,
) -> Result<CommentOutcome> {
	let outcome = match action {
		CommentAction::Post { video_id, text } => CommentOutcome {
			comment_id: api.insert_thread(token, &video_id, &text).await?,
			action: "posted",
		},
		CommentAction::Reply { parent_id, text } => CommentOutcome {
			comment_id: api.insert_reply(token, &parent_id, &text).await?,
			action: "replied",
		},
		CommentAction::Delete { comment_id } => {
			api.delete(token, &comment_id).await?;

			CommentOutcome { comment_id, action: "deleted" }
		},
		CommentAction::Hide { comment_id } => {
			api.hold_for_review(token, &comment_id).await?;

			CommentOutcome { comment_id, action: "hidden" }
		},
		CommentAction::Pin { .. } => return Err(Error::Unsupported { operation: "pin_comment" }),
	};

	Ok(outcome)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn actions_deserialize_from_tagged_json() {
		let action: CommentAction =
			serde_json::from_str(r#"{"action":"reply","parent_id":"c1","text":"thanks"}"#)
				.expect("Reply action should deserialize.");

		assert_eq!(action, CommentAction::Reply { parent_id: "c1".into(), text: "thanks".into() });
		assert_eq!(action.as_str(), "reply");
		assert!(
			serde_json::from_str::<CommentAction>(r#"{"action":"feature","comment_id":"c1"}"#)
				.is_err()
		);
	}
}
