//! Authorization handshake seams used when no stored credential exists.

// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialRecord, ScopeSet},
	error::{AuthError, ConfigError},
	http::TokenHttpClient,
	oauth::{AuthorizationSession, OAuthApp, OAuthClient},
};

/// Boxed future returned by [`Authorizer::authorize`].
pub type AuthorizeFuture<'a> =
	Pin<Box<dyn Future<Output = Result<CredentialRecord>> + 'a + Send>>;
/// Boxed future returned by [`AuthorizationPrompt::prompt`].
pub type PromptFuture<'a> =
	Pin<Box<dyn Future<Output = Result<AuthorizationCallback>> + 'a + Send>>;

/// Mints the first credential for a key.
pub trait Authorizer
where
	Self: Send + Sync,
{
	/// Runs the handshake for `key` and returns the new record (not yet persisted).
	fn authorize<'a>(&'a self, key: &'a CredentialKey) -> AuthorizeFuture<'a>;
}

/// Query parameters delivered to the redirect URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationCallback {
	/// Authorization code.
	pub code: String,
	/// Returned `state` value.
	pub state: String,
}

/// Browser/redirect collaborator: shows the authorize URL and waits for the callback.
pub trait AuthorizationPrompt
where
	Self: Send + Sync,
{
	/// Presents `session.authorize_url` and resolves once the redirect arrives.
	fn prompt<'a>(&'a self, session: &'a AuthorizationSession) -> PromptFuture<'a>;
}

/// Authorizer that drives an authorization-code + PKCE handshake through a prompt.
pub struct InteractiveAuthorizer<C>
where
	C: ?Sized + TokenHttpClient,
{
	client: Arc<OAuthClient<C>>,
	app: OAuthApp,
	prompt: Arc<dyn AuthorizationPrompt>,
}
impl<C> InteractiveAuthorizer<C>
where
	C: ?Sized + TokenHttpClient,
{
	/// Creates an authorizer for `app`.
	pub fn new(
		client: Arc<OAuthClient<C>>,
		app: OAuthApp,
		prompt: Arc<dyn AuthorizationPrompt>,
	) -> Self {
		Self { client, app, prompt }
	}
}
impl<C> Authorizer for InteractiveAuthorizer<C>
where
	C: ?Sized + TokenHttpClient,
{
	fn authorize<'a>(&'a self, key: &'a CredentialKey) -> AuthorizeFuture<'a> {
		Box::pin(async move {
			let scopes = key.service.default_scopes();

			if scopes.is_empty() {
				return Err(ConfigError::NoScopes { service: key.service.as_str() }.into());
			}

			let scope = ScopeSet::new(scopes.iter().copied()).map_err(ConfigError::from)?;
			let session = self.app.start_authorization(key.clone(), scope);

			tracing::info!(
				credential = %key,
				authorize_url = %session.authorize_url,
				"Waiting for interactive authorization."
			);

			let callback = self.prompt.prompt(&session).await?;

			self.client.exchange_code(&self.app, session, &callback.state, &callback.code).await
		})
	}
}

/// Authorizer for unattended processes: never opens a browser.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeadlessAuthorizer;
impl Authorizer for HeadlessAuthorizer {
	fn authorize<'a>(&'a self, key: &'a CredentialKey) -> AuthorizeFuture<'a> {
		Box::pin(async move {
			Err(Error::from(AuthError::AuthorizationRequired { key: key.to_string() }))
		})
	}
}
