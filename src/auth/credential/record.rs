//! Persisted OAuth credential records, lifecycle helpers, and builders.

// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, ScopeSet, TokenSecret},
};

/// Current lifecycle status for a credential record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
	/// Record is not yet valid because the issued-at instant is in the future.
	Pending,
	/// Access token is currently valid.
	Active,
	/// Access token exceeded its expiry instant.
	Expired,
	/// Record has been revoked manually.
	Revoked,
}

/// Errors produced by [`CredentialRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CredentialRecordBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Issued when no token endpoint was configured.
	#[error("Token endpoint is required.")]
	MissingTokenEndpoint,
	/// Issued when no client identifier was configured.
	#[error("Client identifier is required.")]
	MissingClientId,
}

/// Durable record describing one OAuth credential.
///
/// One record exists per [`CredentialKey`]. The record is created by the first authorization
/// handshake, replaced in place on every refresh, persisted after every mutation, and only
/// revoked manually.
#[derive(Serialize, Deserialize, Clone)]
pub struct CredentialRecord {
	/// Service + account the credential belongs to.
	pub key: CredentialKey,
	/// Scopes granted to this credential.
	pub scope: ScopeSet,
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, required for renewal once the access token expires.
	pub refresh_token: Option<TokenSecret>,
	/// Token endpoint used for refreshes.
	pub token_endpoint: Url,
	/// OAuth client identifier the credential was issued to.
	pub client_id: String,
	/// OAuth client secret, for confidential clients.
	pub client_secret: Option<TokenSecret>,
	/// Issued-at instant recorded from the provider response.
	#[serde(with = "time::serde::rfc3339")]
	pub issued_at: OffsetDateTime,
	/// Expiry instant; the access token is never valid at or past this instant.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
	/// Revocation instant if the record has been revoked.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub revoked_at: Option<OffsetDateTime>,
}
impl CredentialRecord {
	/// Returns a builder for constructing records.
	pub fn builder(key: CredentialKey, scope: ScopeSet) -> CredentialRecordBuilder {
		CredentialRecordBuilder::new(key, scope)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> CredentialStatus {
		if self.revoked_at.is_some() {
			return CredentialStatus::Revoked;
		}
		if instant < self.issued_at {
			return CredentialStatus::Pending;
		}
		if instant >= self.expires_at {
			return CredentialStatus::Expired;
		}

		CredentialStatus::Active
	}

	/// Remaining lifetime of the access token at `instant` (negative once expired).
	pub fn time_to_expiry(&self, instant: OffsetDateTime) -> Duration {
		self.expires_at - instant
	}

	/// Returns `true` if the record is usable at `instant` for at least `min_validity`.
	pub fn is_valid_for(&self, instant: OffsetDateTime, min_validity: Duration) -> bool {
		matches!(self.status_at(instant), CredentialStatus::Active)
			&& self.time_to_expiry(instant) >= min_validity
	}

	/// Returns `true` if the record has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), CredentialStatus::Expired)
	}

	/// Returns `true` if the record has been revoked.
	pub fn is_revoked(&self) -> bool {
		self.revoked_at.is_some()
	}

	/// Returns `true` if the record carries a refresh token.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.is_some()
	}

	/// Marks the record as revoked.
	pub fn revoke(&mut self, instant: OffsetDateTime) {
		self.revoked_at = Some(instant);
	}
}
impl Debug for CredentialRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialRecord")
			.field("key", &self.key)
			.field("scope", &self.scope)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("token_endpoint", &self.token_endpoint.as_str())
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("revoked_at", &self.revoked_at)
			.finish()
	}
}

/// Builder for [`CredentialRecord`].
#[derive(Clone, Debug)]
pub struct CredentialRecordBuilder {
	key: CredentialKey,
	scope: ScopeSet,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	token_endpoint: Option<Url>,
	client_id: Option<String>,
	client_secret: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl CredentialRecordBuilder {
	fn new(key: CredentialKey, scope: ScopeSet) -> Self {
		Self {
			key,
			scope,
			access_token: None,
			refresh_token: None,
			token_endpoint: None,
			client_id: None,
			client_secret: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the token endpoint used for refreshes.
	pub fn token_endpoint(mut self, endpoint: Url) -> Self {
		self.token_endpoint = Some(endpoint);

		self
	}

	/// Sets the OAuth client identifier.
	pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());

		self
	}

	/// Sets the OAuth client secret.
	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(TokenSecret::new(secret));

		self
	}

	/// Consumes the builder and produces a [`CredentialRecord`].
	pub fn build(self) -> Result<CredentialRecord, CredentialRecordBuilderError> {
		let access_token =
			self.access_token.ok_or(CredentialRecordBuilderError::MissingAccessToken)?;
		let token_endpoint =
			self.token_endpoint.ok_or(CredentialRecordBuilderError::MissingTokenEndpoint)?;
		let client_id = self.client_id.ok_or(CredentialRecordBuilderError::MissingClientId)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(CredentialRecordBuilderError::MissingExpiry),
		};

		Ok(CredentialRecord {
			key: self.key,
			scope: self.scope,
			access_token,
			refresh_token: self.refresh_token,
			token_endpoint,
			client_id,
			client_secret: self.client_secret,
			issued_at,
			expires_at,
			revoked_at: None,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::catalog::Service;

	fn builder() -> CredentialRecordBuilder {
		let scope = ScopeSet::new(["youtube.upload"]).expect("Scope fixture should be valid.");

		CredentialRecord::builder(CredentialKey::default_for(Service::Youtube), scope)
			.token_endpoint(
				Url::parse("https://oauth2.example.com/token").expect("Endpoint should parse."),
			)
			.client_id("client")
	}

	#[test]
	fn status_transitions_cover_all_states() {
		let mut record = builder()
			.access_token("access")
			.refresh_token("refresh")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_at(macros::datetime!(2025-01-01 01:00 UTC))
			.build()
			.expect("Record builder should succeed for status transitions.");

		assert_eq!(
			record.status_at(macros::datetime!(2024-12-31 23:59 UTC)),
			CredentialStatus::Pending
		);
		assert_eq!(
			record.status_at(macros::datetime!(2025-01-01 00:30 UTC)),
			CredentialStatus::Active
		);
		assert_eq!(
			record.status_at(macros::datetime!(2025-01-01 01:00 UTC)),
			CredentialStatus::Expired
		);

		record.revoke(macros::datetime!(2025-01-01 00:10 UTC));

		assert_eq!(
			record.status_at(macros::datetime!(2025-01-01 00:30 UTC)),
			CredentialStatus::Revoked
		);
	}

	#[test]
	fn validity_window_accounts_for_minimum() {
		let record = builder()
			.access_token("access")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::minutes(30))
			.build()
			.expect("Record builder should support relative expiry.");
		let now = macros::datetime!(2025-01-01 00:15 UTC);

		assert_eq!(record.expires_at, macros::datetime!(2025-01-01 00:30 UTC));
		assert_eq!(record.time_to_expiry(now), Duration::minutes(15));
		assert!(record.is_valid_for(now, Duration::minutes(15)));
		assert!(!record.is_valid_for(now, Duration::minutes(16)));
		assert!(!record.can_refresh());
	}

	#[test]
	fn builder_requires_endpoint_and_client() {
		let scope = ScopeSet::default();
		let err = CredentialRecord::builder(CredentialKey::default_for(Service::Search), scope)
			.access_token("a")
			.expires_in(Duration::hours(1))
			.build()
			.expect_err("Missing token endpoint must be rejected.");

		assert_eq!(err, CredentialRecordBuilderError::MissingTokenEndpoint);
	}

	#[test]
	fn debug_redacts_secrets_and_json_keeps_them() {
		let record = builder()
			.access_token("access-secret")
			.refresh_token("refresh-secret")
			.client_secret("client-secret")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::hours(1))
			.build()
			.expect("Record builder should succeed.");
		let debug = format!("{record:?}");

		assert!(!debug.contains("access-secret"));
		assert!(!debug.contains("refresh-secret"));
		assert!(!debug.contains("client-secret"));

		let json = serde_json::to_string(&record).expect("Record should serialize.");

		assert!(json.contains("\"expires_at\":\"2025-01-01T01:00:00Z\""));

		let parsed: CredentialRecord =
			serde_json::from_str(&json).expect("Record should deserialize.");

		assert_eq!(parsed.refresh_token.as_ref().map(TokenSecret::expose), Some("refresh-secret"));
		assert_eq!(parsed.expires_at, record.expires_at);
	}
}
