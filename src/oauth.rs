//! OAuth 2.0 token endpoint client: refresh-token renewal plus the authorization-code + PKCE
//! handshake used to mint a credential the first time.

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use oauth2::{
	AuthType, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError,
	TokenResponse, TokenUrl,
	basic::{
		BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicRequestTokenError,
		BasicTokenResponse,
	},
};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialRecord, ScopeSet, TokenSecret},
	clock::Clock,
	credentials::{RefreshFuture, TokenRefresher},
	error::{AuthError, ConfigError, TransientError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, StatusClass, TokenHttpClient},
};

type TokenClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;
const GOOGLE_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// How the client authenticates itself at the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	/// HTTP Basic authentication with the client secret.
	ClientSecretBasic,
	/// Client identifier and secret in the form body.
	#[default]
	ClientSecretPost,
	/// Public client; PKCE only, the secret is never sent.
	NoneWithPkce,
}

#[derive(Clone, Copy, Debug)]
enum Grant {
	Refresh,
	AuthorizationCode,
}

/// Registered OAuth application used for the interactive handshake.
#[derive(Clone)]
pub struct OAuthApp {
	/// Client identifier issued by the provider.
	pub client_id: String,
	/// Client secret for confidential (installed-app) clients.
	pub client_secret: Option<TokenSecret>,
	/// User-facing authorization endpoint.
	pub authorization_endpoint: Url,
	/// Token endpoint persisted into every credential minted by this app.
	pub token_endpoint: Url,
	/// Redirect URI the browser returns to.
	pub redirect_uri: Url,
	/// Extra query parameters appended to the authorize URL.
	pub authorize_params: Vec<(String, String)>,
}
impl OAuthApp {
	/// Creates an app without a client secret or extra parameters.
	pub fn new(
		client_id: impl Into<String>,
		authorization_endpoint: Url,
		token_endpoint: Url,
		redirect_uri: Url,
	) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: None,
			authorization_endpoint,
			token_endpoint,
			redirect_uri,
			authorize_params: Vec::new(),
		}
	}

	/// Google installed-app registration requesting offline access, so the handshake always
	/// yields a refresh token.
	pub fn google(
		client_id: impl Into<String>,
		client_secret: Option<String>,
		redirect_uri: Url,
	) -> Result<Self> {
		let authorization_endpoint = Url::parse(GOOGLE_AUTHORIZATION_ENDPOINT)
			.map_err(|source| ConfigError::InvalidEndpoint { source })?;
		let token_endpoint = Url::parse(GOOGLE_TOKEN_ENDPOINT)
			.map_err(|source| ConfigError::InvalidEndpoint { source })?;
		let mut app = Self::new(client_id, authorization_endpoint, token_endpoint, redirect_uri)
			.with_authorize_param("access_type", "offline")
			.with_authorize_param("prompt", "consent");

		if let Some(secret) = client_secret {
			app = app.with_client_secret(secret);
		}

		Ok(app)
	}

	/// Sets the client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(TokenSecret::new(secret));

		self
	}

	/// Appends an extra authorize-URL query parameter.
	pub fn with_authorize_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.authorize_params.push((name.into(), value.into()));

		self
	}

	/// Starts an authorization-code + PKCE (S256) session for `key`.
	pub fn start_authorization(&self, key: CredentialKey, scope: ScopeSet) -> AuthorizationSession {
		let state = random_string(STATE_LEN);
		let pkce = PkcePair::generate();
		let authorize_url = self.authorize_url(&scope, &state, &pkce);

		AuthorizationSession {
			key,
			scope,
			state,
			redirect_uri: self.redirect_uri.clone(),
			authorize_url,
			pkce,
		}
	}

	fn authorize_url(&self, scope: &ScopeSet, state: &str, pkce: &PkcePair) -> Url {
		let mut url = self.authorization_endpoint.clone();
		let mut pairs = url.query_pairs_mut();

		pairs.append_pair("response_type", "code");
		pairs.append_pair("client_id", &self.client_id);
		pairs.append_pair("redirect_uri", self.redirect_uri.as_str());

		if !scope.is_empty() {
			pairs.append_pair("scope", &scope.normalized());
		}

		pairs.append_pair("state", state);
		pairs.append_pair("code_challenge", &pkce.challenge);
		pairs.append_pair("code_challenge_method", "S256");

		for (name, value) in &self.authorize_params {
			pairs.append_pair(name, value);
		}

		drop(pairs);

		url
	}
}
impl Debug for OAuthApp {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthApp")
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
			.field("authorization_endpoint", &self.authorization_endpoint.as_str())
			.field("token_endpoint", &self.token_endpoint.as_str())
			.field("redirect_uri", &self.redirect_uri.as_str())
			.finish()
	}
}

/// Pending authorization handshake returned by [`OAuthApp::start_authorization`].
#[derive(Clone)]
pub struct AuthorizationSession {
	/// Credential the handshake will mint.
	pub key: CredentialKey,
	/// Requested scope set.
	pub scope: ScopeSet,
	/// Opaque state value that must round-trip via the redirect handler.
	pub state: String,
	/// Redirect URI supplied when constructing the authorize URL.
	pub redirect_uri: Url,
	/// Authorize URL the user must open.
	pub authorize_url: Url,
	pkce: PkcePair,
}
impl AuthorizationSession {
	/// PKCE challenge derived from the secret verifier.
	pub fn code_challenge(&self) -> &str {
		&self.pkce.challenge
	}

	/// Validates the returned `state` parameter after the redirect.
	pub fn validate_state(&self, returned_state: &str) -> Result<(), AuthError> {
		if returned_state == self.state { Ok(()) } else { Err(AuthError::StateMismatch) }
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("key", &self.key)
			.field("scope", &self.scope)
			.field("state", &self.state)
			.field("authorize_url", &self.authorize_url.as_str())
			.field("code_challenge", &self.pkce.challenge)
			.finish()
	}
}

#[derive(Clone)]
struct PkcePair {
	verifier: String,
	challenge: String,
}
impl PkcePair {
	fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = pkce_challenge(&verifier);

		Self { verifier, challenge }
	}
}

/// Token endpoint client generic over the HTTP transport.
pub struct OAuthClient<C>
where
	C: ?Sized + TokenHttpClient,
{
	http_client: Arc<C>,
	clock: Arc<dyn Clock>,
	auth_method: ClientAuthMethod,
}
impl<C> OAuthClient<C>
where
	C: ?Sized + TokenHttpClient,
{
	/// Creates a client using `clock` to stamp issued-at instants.
	pub fn new(http_client: impl Into<Arc<C>>, clock: Arc<dyn Clock>) -> Self {
		Self { http_client: http_client.into(), clock, auth_method: ClientAuthMethod::default() }
	}

	/// Overrides the client authentication method.
	pub fn with_auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.auth_method = method;

		self
	}

	/// Exchanges the authorization `code` returned to the redirect URI for a new record.
	pub async fn exchange_code(
		&self,
		app: &OAuthApp,
		session: AuthorizationSession,
		returned_state: &str,
		code: &str,
	) -> Result<CredentialRecord> {
		session.validate_state(returned_state)?;

		let client =
			self.token_client(&app.token_endpoint, &app.client_id, app.client_secret.as_ref())?;
		let redirect = RedirectUrl::new(session.redirect_uri.to_string())
			.map_err(|source| ConfigError::InvalidEndpoint { source })?;
		let meta = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(meta.clone());
		let response = client
			.exchange_code(AuthorizationCode::new(code.to_owned()))
			.set_pkce_verifier(PkceCodeVerifier::new(session.pkce.verifier.clone()))
			.set_redirect_uri(Cow::Owned(redirect))
			.request_async(&handle)
			.await
			.map_err(|err| map_request_error(Grant::AuthorizationCode, meta.take(), err))?;
		let lifetime = token_lifetime(&response)?;
		let scope = match response.scopes() {
			Some(scopes) => ScopeSet::new(scopes.iter().map(|scope| scope.as_str()))
				.map_err(ConfigError::from)?,
			None => session.scope.clone(),
		};
		let mut builder = CredentialRecord::builder(session.key.clone(), scope)
			.access_token(response.access_token().secret().to_owned())
			.token_endpoint(app.token_endpoint.clone())
			.client_id(app.client_id.clone())
			.issued_at(self.clock.now())
			.expires_in(lifetime);

		if let Some(refresh) = response.refresh_token() {
			builder = builder.refresh_token(refresh.secret().to_owned());
		}
		if let Some(secret) = &app.client_secret {
			builder = builder.client_secret(secret.expose());
		}

		builder.build().map_err(|e| ConfigError::from(e).into())
	}

	fn token_client(
		&self,
		endpoint: &Url,
		client_id: &str,
		client_secret: Option<&TokenSecret>,
	) -> Result<TokenClient> {
		let token_url = TokenUrl::new(endpoint.to_string())
			.map_err(|source| ConfigError::InvalidEndpoint { source })?;
		let mut client =
			BasicClient::new(ClientId::new(client_id.to_owned())).set_token_uri(token_url);

		if let (Some(secret), false) =
			(client_secret, matches!(self.auth_method, ClientAuthMethod::NoneWithPkce))
		{
			client = client.set_client_secret(ClientSecret::new(secret.expose().to_owned()));
		}
		if matches!(self.auth_method, ClientAuthMethod::ClientSecretPost) {
			client = client.set_auth_type(AuthType::RequestBody);
		}

		Ok(client)
	}
}
impl<C> TokenRefresher for OAuthClient<C>
where
	C: ?Sized + TokenHttpClient,
{
	fn refresh<'a>(&'a self, record: &'a CredentialRecord) -> RefreshFuture<'a> {
		Box::pin(async move {
			let refresh_token = record
				.refresh_token
				.as_ref()
				.ok_or_else(|| AuthError::MissingRefreshToken { key: record.key.to_string() })?;
			let client = self.token_client(
				&record.token_endpoint,
				&record.client_id,
				record.client_secret.as_ref(),
			)?;
			let meta = ResponseMetadataSlot::default();
			let handle = self.http_client.with_metadata(meta.clone());
			let secret = RefreshToken::new(refresh_token.expose().to_owned());
			let response = client
				.exchange_refresh_token(&secret)
				.request_async(&handle)
				.await
				.map_err(|err| map_request_error(Grant::Refresh, meta.take(), err))?;

			refreshed_record(record, &response, self.clock.now())
		})
	}
}

/// Applies a refresh response to the previous record.
///
/// The previous refresh token is kept when the provider does not rotate it, and a returned
/// scope list replaces the granted scopes.
fn refreshed_record(
	previous: &CredentialRecord,
	response: &BasicTokenResponse,
	now: OffsetDateTime,
) -> Result<CredentialRecord> {
	let lifetime = token_lifetime(response)?;
	let mut record = previous.clone();

	record.access_token = TokenSecret::new(response.access_token().secret().to_owned());

	if let Some(rotated) = response.refresh_token() {
		record.refresh_token = Some(TokenSecret::new(rotated.secret().to_owned()));
	}
	if let Some(scopes) = response.scopes() {
		record.scope =
			ScopeSet::new(scopes.iter().map(|scope| scope.as_str())).map_err(ConfigError::from)?;
	}

	record.issued_at = now;
	record.expires_at = now + lifetime;

	Ok(record)
}

fn token_lifetime(response: &BasicTokenResponse) -> Result<Duration> {
	let secs = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
	let secs = i64::try_from(secs).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if secs <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	Ok(Duration::seconds(secs))
}

fn map_request_error<E>(
	grant: Grant,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
) -> Error
where
	E: 'static + Send + Sync + StdError,
{
	let status = meta.as_ref().and_then(|value| value.status);
	let retry_after = meta.as_ref().and_then(|value| value.retry_after);

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response(grant, &response, status, retry_after),
		RequestTokenError::Request(error) => map_transport_error(error, status, retry_after),
		RequestTokenError::Parse(source, _body) =>
			TransientError::TokenResponseParse { source, status }.into(),
		RequestTokenError::Other(message) =>
			TransientError::TokenEndpoint { message, status, retry_after }.into(),
	}
}

fn map_server_response(
	grant: Grant,
	response: &BasicErrorResponse,
	status: Option<u16>,
	retry_after: Option<Duration>,
) -> Error {
	let reason = match response.error_description() {
		Some(description) => description.clone(),
		None => response.error().as_ref().to_owned(),
	};

	if status.is_some_and(|code| StatusClass::of(code) == StatusClass::Retryable) {
		return TransientError::TokenEndpoint { message: reason, status, retry_after }.into();
	}

	match (response.error(), grant) {
		(BasicErrorResponseType::InvalidClient | BasicErrorResponseType::UnauthorizedClient, _) =>
			AuthError::InvalidClient { reason }.into(),
		(_, Grant::Refresh) => AuthError::RefreshRejected { reason }.into(),
		(_, Grant::AuthorizationCode) => AuthError::AuthorizationFailed { reason }.into(),
	}
}

fn map_transport_error<E>(
	err: HttpClientError<E>,
	status: Option<u16>,
	retry_after: Option<Duration>,
) -> Error
where
	E: 'static + Send + Sync + StdError,
{
	match err {
		HttpClientError::Reqwest(inner) => TransportError::network(*inner).into(),
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) =>
			TransientError::TokenEndpoint { message, status, retry_after }.into(),
		_ => TransientError::TokenEndpoint {
			message: "HTTP client failed while calling the token endpoint".into(),
			status,
			retry_after,
		}
		.into(),
	}
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn pkce_challenge(verifier: &str) -> String {
	let digest = Sha256::digest(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{_preludet::*, catalog::Service};

	fn app() -> OAuthApp {
		OAuthApp::google(
			"client-123",
			Some("shh".into()),
			Url::parse("http://127.0.0.1:8080/callback").expect("Redirect fixture should parse."),
		)
		.expect("Google endpoints should parse.")
	}

	#[test]
	fn pkce_challenge_matches_reference_vector() {
		assert_eq!(
			pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
			"E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
		);
	}

	#[test]
	fn authorize_url_carries_pkce_state_and_offline_access() {
		let app = app();
		let key = fixture_key(Service::Youtube, Some("UC9"));
		let scope = ScopeSet::new(Service::Youtube.default_scopes().iter().copied())
			.expect("Default scopes should be valid.");
		let session = app.start_authorization(key, scope);
		let query: HashMap<_, _> = session.authorize_url.query_pairs().into_owned().collect();

		assert_eq!(query.get("client_id").map(String::as_str), Some("client-123"));
		assert_eq!(query.get("state"), Some(&session.state));
		assert_eq!(query.get("code_challenge").map(String::as_str), Some(session.code_challenge()));
		assert_eq!(query.get("code_challenge_method").map(String::as_str), Some("S256"));
		assert_eq!(query.get("access_type").map(String::as_str), Some("offline"));
		assert!(query.get("scope").is_some_and(|scope| scope.contains("youtube.upload")));
		assert_eq!(session.state.len(), STATE_LEN);
		assert!(!format!("{app:?}").contains("shh"));
	}

	#[test]
	fn state_validation_rejects_mismatch() {
		let session = app().start_authorization(
			fixture_key(Service::Search, None),
			ScopeSet::new(["customsearch"]).expect("Scope fixture should be valid."),
		);
		let returned = session.state.clone();

		assert!(session.validate_state(&returned).is_ok());
		assert!(matches!(session.validate_state("forged"), Err(AuthError::StateMismatch)));
	}

	#[test]
	fn refresh_keeps_unrotated_token_and_adopts_returned_scopes() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);
		let now = macros::datetime!(2025-01-01 00:55 UTC);
		let previous =
			fixture_record(fixture_key(Service::Youtube, None), issued, Duration::hours(1), "old");
		let response: BasicTokenResponse = serde_json::from_str(
			r#"{"access_token":"new","token_type":"bearer","expires_in":3599,"scope":"a b"}"#,
		)
		.expect("Token response fixture should deserialize.");
		let record = refreshed_record(&previous, &response, now).expect("Refresh should apply.");

		assert_eq!(record.access_token.expose(), "new");
		assert_eq!(record.refresh_token.as_ref().map(TokenSecret::expose), Some("refresh-old"));
		assert_eq!(record.scope.normalized(), "a b");
		assert_eq!(record.issued_at, now);
		assert_eq!(record.expires_at, now + Duration::seconds(3599));
	}

	#[test]
	fn refresh_requires_positive_lifetime() {
		let previous = fixture_record(
			fixture_key(Service::Youtube, None),
			macros::datetime!(2025-01-01 00:00 UTC),
			Duration::hours(1),
			"old",
		);
		let response: BasicTokenResponse =
			serde_json::from_str(r#"{"access_token":"new","token_type":"bearer"}"#)
				.expect("Token response fixture should deserialize.");
		let err = refreshed_record(&previous, &response, OffsetDateTime::UNIX_EPOCH)
			.expect_err("Missing expires_in must be rejected.");

		assert!(matches!(err, Error::Config(ConfigError::MissingExpiresIn)));
	}
}
