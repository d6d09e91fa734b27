//! Gateway-level error taxonomy shared by the credential, quota, circuit, and transfer layers.

// self
use crate::{_prelude::*, catalog::Api, circuit::Rejection};

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Credential is invalid or cannot be renewed; the caller must re-authorize.
	#[error(transparent)]
	Auth(#[from] AuthError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Daily quota is exhausted for the API.
	#[error("Daily quota for `{api}` is exhausted; retry in {retry_after}.")]
	QuotaExceeded {
		/// Quota bucket that rejected the admission.
		api: Api,
		/// Time left until the daily window rolls over.
		retry_after: Duration,
	},
	/// Circuit breaker rejected the call without executing it.
	#[error("{0}")]
	CircuitOpen(#[from] Rejection),
	/// Upstream rejected the request with a non-retryable status.
	#[error("Upstream rejected the request: {message}.")]
	PermanentUpstream {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Upstream- or gateway-supplied description.
		message: String,
	},
	/// Resumable transfer gave up after exhausting its retry budget or hitting a fatal error.
	#[error("Upload failed after {attempts} attempt(s) with {bytes_acknowledged} byte(s) acknowledged.")]
	UploadFailed {
		/// Bytes confirmed by the server before the transfer stopped.
		bytes_acknowledged: u64,
		/// Attempts made for the chunk that failed.
		attempts: u32,
		/// Failure observed on the final attempt.
		#[source]
		source: Box<Error>,
	},
	/// Local upload source could not be read.
	#[error("Upload source could not be read.")]
	Source(#[source] std::io::Error),
	/// Operation is not available through the public upstream API.
	#[error("Operation `{operation}` is not supported.")]
	Unsupported {
		/// Operation label.
		operation: &'static str,
	},
}
impl Error {
	/// Returns `true` for the transient-network class that callers may retry with backoff.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Transport(_))
	}

	/// Returns `true` when the failure says something about upstream health and must be
	/// recorded against the protecting circuit breaker.
	pub fn trips_circuit(&self) -> bool {
		matches!(
			self,
			Self::Transient(_)
				| Self::Transport(_)
				| Self::PermanentUpstream { .. }
				| Self::UploadFailed { .. }
		)
	}

	/// Returns the retry hint carried by the error, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::QuotaExceeded { retry_after, .. } => Some(*retry_after),
			Self::CircuitOpen(rejection) => rejection.retry_after,
			Self::Transient(TransientError::TokenEndpoint { retry_after, .. })
			| Self::Transient(TransientError::Upstream { retry_after, .. }) => *retry_after,
			Self::UploadFailed { source, .. } => source.retry_after(),
			_ => None,
		}
	}

	/// Stable label for the error class, used in degraded responses and metrics.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Storage(_) => "storage",
			Self::Config(_) => "config",
			Self::Auth(_) => "auth",
			Self::Transient(_) | Self::Transport(_) => "transient_network",
			Self::QuotaExceeded { .. } => "quota_exceeded",
			Self::CircuitOpen(_) => "circuit_open",
			Self::PermanentUpstream { .. } => "permanent_upstream",
			Self::UploadFailed { .. } => "upload_failed",
			Self::Source(_) => "source",
			Self::Unsupported { .. } => "unsupported",
		}
	}
}

/// Credential failures that require a new authorization handshake.
#[derive(Debug, ThisError)]
pub enum AuthError {
	/// Stored record has no refresh token and its access token no longer satisfies the caller.
	#[error("Credential `{key}` cannot be renewed because it has no refresh token.")]
	MissingRefreshToken {
		/// Cache key of the credential.
		key: String,
	},
	/// Token endpoint rejected the refresh token (revoked or expired).
	#[error("Token endpoint rejected the refresh token: {reason}.")]
	RefreshRejected {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
	/// Client authentication failed at the token endpoint.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
	/// Credential was revoked manually and must not be reused.
	#[error("Credential `{key}` has been revoked.")]
	Revoked {
		/// Cache key of the credential.
		key: String,
	},
	/// No credential exists and this process cannot run an interactive handshake.
	#[error("Credential `{key}` requires interactive authorization.")]
	AuthorizationRequired {
		/// Cache key of the credential.
		key: String,
	},
	/// Interactive authorization did not complete.
	#[error("Authorization failed: {reason}.")]
	AuthorizationFailed {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
	/// Returned `state` parameter does not match the pending session.
	#[error("Authorization state mismatch.")]
	StateMismatch,
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Endpoint URL cannot be parsed.
	#[error("Endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Configuration document failed to parse.
	#[error("Configuration is invalid at `{path}`: {message}.")]
	Parse {
		/// Field path reported by the deserializer.
		path: String,
		/// Deserializer message.
		message: String,
	},
	/// Configuration file could not be read.
	#[error("Configuration file could not be read.")]
	Io(#[from] std::io::Error),
	/// A configured value is out of range.
	#[error("Configuration value `{field}` is invalid: {reason}.")]
	InvalidValue {
		/// Field label.
		field: String,
		/// Validation failure.
		reason: &'static str,
	},
	/// Interactive authorization was requested for a service without OAuth scopes.
	#[error("Service `{service}` has no OAuth scopes to authorize.")]
	NoScopes {
		/// Service label.
		service: &'static str,
	},
	/// Request scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Credential record builder validation failed.
	#[error("Unable to build credential record.")]
	RecordBuild(#[from] crate::auth::CredentialRecordBuilderError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Token endpoint returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or gateway-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Upstream API answered with a retryable status class (429 or 5xx).
	#[error("Upstream returned a retryable response: {message}.")]
	Upstream {
		/// Upstream- or gateway-supplied message.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the upstream API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the upstream API.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
