//! Resilience and credential-lifecycle layer that every outbound call to a quota-limited
//! upstream API passes through: per-operation circuit breakers, dual-window (daily +
//! per-minute) rate limits, multi-account OAuth 2.0 credentials with preemptive refresh, and a
//! resumable chunked-upload coordinator, composed by the [`guard::CallGuard`] facade.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod catalog;
pub mod circuit;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod guard;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod quota;
pub mod store;
pub mod tools;
pub mod transfer;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and fixtures for tests; enabled via `cfg(test)` or the `test`
	//! crate feature.

	// std
	use std::{
		path::PathBuf,
		sync::atomic::{AtomicUsize, Ordering},
	};

	pub use crate::_prelude::*;

	// crates.io
	use time::macros;
	// self
	use crate::{
		auth::{AccountId, CredentialKey, CredentialRecord, ScopeSet, TokenSecret},
		catalog::Service,
		clock::{Clock, ManualClock},
		credentials::{
			CredentialManager, CredentialPolicy, HeadlessAuthorizer, RefreshFuture, TokenRefresher,
		},
		error::AuthError,
		store::CredentialStore,
	};

	/// Token endpoint used by record fixtures.
	pub const FIXTURE_TOKEN_ENDPOINT: &str = "https://oauth2.example.com/token";
	/// Instant every fixture clock starts at.
	pub const FIXTURE_START: OffsetDateTime = macros::datetime!(2025-07-01 08:00 UTC);

	/// Manual clock parked at [`FIXTURE_START`].
	pub fn fixture_clock() -> Arc<ManualClock> {
		Arc::new(ManualClock::new(FIXTURE_START))
	}

	/// Builds a credential key, panicking on invalid fixture input.
	pub fn fixture_key(service: Service, account: Option<&str>) -> CredentialKey {
		let account = account
			.map(|value| AccountId::new(value).expect("Account fixture should be valid."));

		CredentialKey::new(service, account)
	}

	/// Builds a refreshable record issued at `issued_at` that lives for `ttl`.
	pub fn fixture_record(
		key: CredentialKey,
		issued_at: OffsetDateTime,
		ttl: Duration,
		access: &str,
	) -> CredentialRecord {
		fixture_record_at(key, FIXTURE_TOKEN_ENDPOINT, issued_at, ttl, access)
	}

	/// Same as [`fixture_record`] but refreshing against `token_endpoint`.
	pub fn fixture_record_at(
		key: CredentialKey,
		token_endpoint: &str,
		issued_at: OffsetDateTime,
		ttl: Duration,
		access: &str,
	) -> CredentialRecord {
		let scope = ScopeSet::new(key.service.default_scopes().iter().copied())
			.expect("Default scopes should be valid.");

		CredentialRecord::builder(key, scope)
			.access_token(access)
			.refresh_token(format!("refresh-{access}"))
			.token_endpoint(Url::parse(token_endpoint).expect("Token endpoint fixture should parse."))
			.client_id("fixture-client")
			.client_secret("fixture-secret")
			.issued_at(issued_at)
			.expires_in(ttl)
			.build()
			.expect("Credential record fixture should build.")
	}

	/// Manager wired with the headless authorizer and the default policy.
	pub fn fixture_manager(
		store: Arc<dyn CredentialStore>,
		refresher: Arc<dyn TokenRefresher>,
		clock: Arc<dyn Clock>,
	) -> Arc<CredentialManager> {
		Arc::new(CredentialManager::new(
			store,
			refresher,
			Arc::new(HeadlessAuthorizer),
			clock,
			CredentialPolicy::default(),
		))
	}

	/// Unique scratch path under the system temp directory.
	pub fn fixture_temp_path(label: &str) -> PathBuf {
		std::env::temp_dir().join(format!(
			"upstream_guard_{label}_{}_{}",
			std::process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		))
	}

	enum IssueTime {
		Fixed(OffsetDateTime),
		Clock(Arc<dyn Clock>),
	}

	/// Refresher double that counts calls and issues records valid for a fixed lifetime.
	pub struct CountingRefresher {
		calls: AtomicUsize,
		lifetime: Duration,
		delay: std::time::Duration,
		reject: bool,
		issued_at: IssueTime,
		granted: Option<ScopeSet>,
	}
	impl CountingRefresher {
		/// Refresher whose records live for `lifetime` from `issued_at`.
		pub fn new(issued_at: OffsetDateTime, lifetime: Duration) -> Self {
			Self {
				calls: AtomicUsize::new(0),
				lifetime,
				delay: std::time::Duration::ZERO,
				reject: false,
				issued_at: IssueTime::Fixed(issued_at),
				granted: None,
			}
		}

		/// Refresher stamping each record with `clock` at the moment of refresh.
		pub fn stamped_by(clock: Arc<dyn Clock>, lifetime: Duration) -> Self {
			Self { issued_at: IssueTime::Clock(clock), ..Self::new(FIXTURE_START, lifetime) }
		}

		/// Refresher that rejects every refresh token.
		pub fn rejecting(issued_at: OffsetDateTime) -> Self {
			Self { reject: true, ..Self::new(issued_at, Duration::hours(1)) }
		}

		/// Holds every refresh open for `delay` of wall-clock time.
		pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
			self.delay = delay;

			self
		}

		/// Replaces the scopes of every refreshed record with `scope`.
		pub fn granting(mut self, scope: ScopeSet) -> Self {
			self.granted = Some(scope);

			self
		}

		/// Number of refresh I/O calls observed so far.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl Debug for CountingRefresher {
		fn fmt(&self, f: &mut Formatter) -> FmtResult {
			f.debug_struct("CountingRefresher")
				.field("calls", &self.calls())
				.field("lifetime", &self.lifetime)
				.field("reject", &self.reject)
				.finish_non_exhaustive()
		}
	}
	impl TokenRefresher for CountingRefresher {
		fn refresh<'a>(&'a self, record: &'a CredentialRecord) -> RefreshFuture<'a> {
			Box::pin(async move {
				let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

				if !self.delay.is_zero() {
					tokio::time::sleep(self.delay).await;
				}
				if self.reject {
					return Err(AuthError::RefreshRejected {
						reason: "Refresh token has been revoked upstream.".into(),
					}
					.into());
				}

				let issued_at = match &self.issued_at {
					IssueTime::Fixed(at) => *at,
					IssueTime::Clock(clock) => clock.now(),
				};
				let mut refreshed = record.clone();

				refreshed.access_token = TokenSecret::new(format!("access-{call}"));
				refreshed.issued_at = issued_at;
				refreshed.expires_at = issued_at + self.lifetime;

				if let Some(scope) = &self.granted {
					refreshed.scope = scope.clone();
				}

				Ok(refreshed)
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _, upstream_guard as _};
