//! Credential manager: in-memory cache over a durable store with preemptive, single-flight
//! refresh.
//!
//! Each [`CredentialKey`] owns one async slot. Every `acquire` for a key runs under that slot's
//! lock, so concurrent callers that arrive while a refresh is in flight wait for it and then
//! read the refreshed record instead of issuing a second refresh. Unrelated keys never contend.

pub mod authorize;

pub use authorize::*;

// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialRecord},
	clock::Clock,
	error::AuthError,
	obs::{self, CallSpan, Component, Outcome},
	store::CredentialStore,
};

/// Boxed future returned by [`TokenRefresher::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<CredentialRecord>> + 'a + Send>>;

type Slot = Arc<AsyncMutex<Option<CredentialRecord>>>;

const EXPIRING_SOON: Duration = Duration::minutes(30);
const MONITOR_WINDOW: Duration = Duration::minutes(60);

/// Performs the refresh-token exchange for a record.
pub trait TokenRefresher
where
	Self: Send + Sync,
{
	/// Exchanges `record`'s refresh token, returning the renewed record.
	fn refresh<'a>(&'a self, record: &'a CredentialRecord) -> RefreshFuture<'a>;
}

/// Tunables for [`CredentialManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CredentialPolicy {
	/// Margin added on top of an operation's estimated duration.
	pub preemptive_threshold: Duration,
}
impl CredentialPolicy {
	/// Default preemptive-refresh margin.
	pub const DEFAULT_PREEMPTIVE_THRESHOLD: Duration = Duration::minutes(10);
}
impl Default for CredentialPolicy {
	fn default() -> Self {
		Self { preemptive_threshold: Self::DEFAULT_PREEMPTIVE_THRESHOLD }
	}
}

/// Cache health of one credential key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialHealth {
	/// Cached and not yet expired.
	Valid,
	/// Cached but past its expiry.
	Expired,
	/// Never acquired by this process.
	NotLoaded,
	/// Revoked manually.
	Revoked,
}

/// Per-key credential snapshot for the status endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CredentialSnapshot {
	/// Credential key (`service:account`).
	pub key: CredentialKey,
	/// Cache health.
	pub status: CredentialHealth,
	/// Expiry instant of the cached access token.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub expires_at: Option<OffsetDateTime>,
	/// Whole minutes until expiry (negative once expired).
	pub minutes_remaining: Option<i64>,
	/// Whether the next default-margin acquire would refresh.
	pub needs_refresh: bool,
	/// Operator-facing hint.
	pub recommendation: &'static str,
}

#[derive(Clone, Copy, Debug)]
struct CachedExpiry {
	expires_at: OffsetDateTime,
	revoked: bool,
}

/// Multi-account credential cache with preemptive refresh.
pub struct CredentialManager {
	store: Arc<dyn CredentialStore>,
	refresher: Arc<dyn TokenRefresher>,
	authorizer: Arc<dyn Authorizer>,
	clock: Arc<dyn Clock>,
	policy: CredentialPolicy,
	slots: Mutex<HashMap<CredentialKey, Slot>>,
	expiry_index: RwLock<HashMap<CredentialKey, CachedExpiry>>,
}
impl CredentialManager {
	/// Creates a manager with an empty cache.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		refresher: Arc<dyn TokenRefresher>,
		authorizer: Arc<dyn Authorizer>,
		clock: Arc<dyn Clock>,
		policy: CredentialPolicy,
	) -> Self {
		Self {
			store,
			refresher,
			authorizer,
			clock,
			policy,
			slots: Mutex::new(HashMap::new()),
			expiry_index: RwLock::new(HashMap::new()),
		}
	}

	/// Active policy.
	pub fn policy(&self) -> CredentialPolicy {
		self.policy
	}

	/// Returns a record whose access token stays valid for at least `min_validity`.
	///
	/// Resolution order: cache, durable store, interactive authorization. A record that falls
	/// short of `min_validity` is refreshed and persisted before it is returned.
	pub async fn acquire(
		&self,
		key: &CredentialKey,
		min_validity: Duration,
	) -> Result<CredentialRecord> {
		let span = CallSpan::new(Component::Credentials, "acquire");

		span.instrument(self.acquire_inner(key, min_validity)).await
	}

	/// Acquires a record sized for an operation expected to run for `estimated_duration`.
	pub async fn ensure_valid_for_operation(
		&self,
		key: &CredentialKey,
		estimated_duration: Duration,
	) -> Result<CredentialRecord> {
		self.acquire(key, estimated_duration + self.policy.preemptive_threshold).await
	}

	/// Persists and caches an externally obtained record, replacing any previous one.
	pub async fn install(&self, record: CredentialRecord) -> Result<()> {
		let slot = self.slot(&record.key);
		let mut cached = slot.lock().await;

		self.store.save(record.clone()).await?;
		self.remember(&mut cached, record);

		Ok(())
	}

	/// Revokes the stored record for `key`; later acquires fail with [`AuthError::Revoked`].
	///
	/// Returns `false` when no record existed.
	pub async fn revoke(&self, key: &CredentialKey) -> Result<bool> {
		let slot = self.slot(key);
		let mut cached = slot.lock().await;
		let Some(revoked) = self.store.revoke(key, self.clock.now()).await? else {
			return Ok(false);
		};

		tracing::warn!(credential = %key, "Credential revoked.");
		self.remember(&mut cached, revoked);

		Ok(true)
	}

	/// Snapshot for one key, read without touching the per-key slot.
	pub fn status(&self, key: &CredentialKey) -> CredentialSnapshot {
		let now = self.clock.now();
		let Some(entry) = self.expiry_index.read().get(key).copied() else {
			return CredentialSnapshot {
				key: key.clone(),
				status: CredentialHealth::NotLoaded,
				expires_at: None,
				minutes_remaining: None,
				needs_refresh: false,
				recommendation: "Credential not loaded; it will be loaded on first use.",
			};
		};
		let remaining = entry.expires_at - now;
		let status = if entry.revoked {
			CredentialHealth::Revoked
		} else if remaining.is_positive() {
			CredentialHealth::Valid
		} else {
			CredentialHealth::Expired
		};
		let recommendation = match status {
			CredentialHealth::Revoked => "Credential revoked; re-authorize the account.",
			_ if remaining < EXPIRING_SOON => "Token expiring soon; it will be refreshed on next use.",
			_ if remaining < MONITOR_WINDOW => "Token valid; monitor expiry.",
			_ => "Token healthy.",
		};

		CredentialSnapshot {
			key: key.clone(),
			status,
			expires_at: Some(entry.expires_at),
			minutes_remaining: Some(remaining.whole_minutes()),
			needs_refresh: !entry.revoked && remaining < self.policy.preemptive_threshold,
			recommendation,
		}
	}

	/// Snapshots for every cached key plus the `tracked` keys, sorted by key.
	pub fn statuses<'a>(
		&self,
		tracked: impl IntoIterator<Item = &'a CredentialKey>,
	) -> Vec<CredentialSnapshot> {
		let mut keys = self.expiry_index.read().keys().cloned().collect::<Vec<_>>();

		keys.extend(tracked.into_iter().cloned());
		keys.sort();
		keys.dedup();

		keys.iter().map(|key| self.status(key)).collect()
	}

	async fn acquire_inner(
		&self,
		key: &CredentialKey,
		min_validity: Duration,
	) -> Result<CredentialRecord> {
		let slot = self.slot(key);
		let mut cached = slot.lock().await;
		let record = match cached.as_ref() {
			Some(record) => record.clone(),
			None => {
				let loaded = self.load_or_authorize(key).await?;

				self.remember(&mut cached, loaded.clone());

				loaded
			},
		};

		if record.is_revoked() {
			return Err(AuthError::Revoked { key: key.to_string() }.into());
		}

		let now = self.clock.now();

		if record.is_valid_for(now, min_validity) {
			return Ok(record);
		}
		if !record.can_refresh() {
			return Err(AuthError::MissingRefreshToken { key: key.to_string() }.into());
		}

		tracing::info!(
			credential = %key,
			remaining_secs = record.time_to_expiry(now).whole_seconds(),
			required_secs = min_validity.whole_seconds(),
			"Refreshing credential."
		);
		obs::record_outcome(Component::Credentials, Outcome::Attempt);

		let refreshed = match self.refresher.refresh(&record).await {
			Ok(refreshed) => refreshed,
			Err(e) => {
				tracing::error!(credential = %key, error = %e, "Credential refresh failed.");
				obs::record_outcome(Component::Credentials, Outcome::Failure);

				return Err(e);
			},
		};

		self.store.save(refreshed.clone()).await?;
		self.remember(&mut cached, refreshed.clone());
		obs::record_outcome(Component::Credentials, Outcome::Success);

		if !refreshed.scope.covers(&record.scope) {
			tracing::warn!(
				credential = %key,
				stored = %record.scope,
				granted = %refreshed.scope,
				"Refresh granted fewer scopes than the stored credential held."
			);
		}
		if !refreshed.is_valid_for(self.clock.now(), min_validity) {
			tracing::warn!(
				credential = %key,
				lifetime_secs = refreshed.time_to_expiry(self.clock.now()).whole_seconds(),
				required_secs = min_validity.whole_seconds(),
				"Refreshed credential is shorter-lived than requested."
			);
		} else {
			tracing::info!(credential = %key, expires_at = %refreshed.expires_at, "Credential refreshed.");
		}

		Ok(refreshed)
	}

	async fn load_or_authorize(&self, key: &CredentialKey) -> Result<CredentialRecord> {
		if let Some(record) = self.store.fetch(key).await? {
			tracing::debug!(credential = %key, "Loaded credential from store.");

			return Ok(record);
		}

		tracing::info!(credential = %key, "No stored credential; starting authorization.");

		let record = self.authorizer.authorize(key).await?;

		self.store.save(record.clone()).await?;
		tracing::info!(credential = %key, "Authorization completed.");

		Ok(record)
	}

	fn remember(&self, cached: &mut Option<CredentialRecord>, record: CredentialRecord) {
		self.expiry_index.write().insert(
			record.key.clone(),
			CachedExpiry { expires_at: record.expires_at, revoked: record.is_revoked() },
		);

		*cached = Some(record);
	}

	fn slot(&self, key: &CredentialKey) -> Slot {
		let mut slots = self.slots.lock();

		slots.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(None))).clone()
	}
}
impl Debug for CredentialManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialManager")
			.field("policy", &self.policy)
			.field("cached", &self.expiry_index.read().len())
			.finish()
	}
}
