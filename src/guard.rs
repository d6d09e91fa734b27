//! Call-guard facade composing the circuit, quota, and credential layers around one outbound
//! call.
//!
//! Order per call: breaker admission, quota admission, credential acquisition, the call
//! itself, then outcome reporting. A breaker rejection never runs the call and never counts as
//! a failure. Only failures that say something about upstream health
//! ([`Error::trips_circuit`]) are recorded against the breaker.

// crates.io
use serde::Serializer;
// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialRecord},
	catalog::{Api, Operation},
	circuit::{CircuitRegistry, CircuitState, CircuitStatus},
	clock::Clock,
	config::GatewayConfig,
	credentials::{Authorizer, CredentialManager, CredentialSnapshot, TokenRefresher},
	error::ConfigError,
	obs::{self, CallSpan, Component, Outcome},
	quota::{QuotaStatus, RateLimiter},
	store::CredentialStore,
	transfer::{TransferCoordinator, TransferReport, UploadRequest},
};

/// What a guarded call needs from the resilience layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallDescriptor {
	/// Protecting breaker.
	pub operation: Operation,
	/// Quota bucket; `None` for unmetered calls.
	pub api: Option<Api>,
	/// Credential handed to the call.
	pub credential: Option<CredentialKey>,
	/// Validity the credential must keep; defaults to the preemptive-refresh margin.
	pub min_validity: Option<Duration>,
}
impl CallDescriptor {
	/// Unmetered, credential-less call protected by `operation`'s breaker.
	pub fn new(operation: Operation) -> Self {
		Self { operation, api: None, credential: None, min_validity: None }
	}

	/// Meters the call against `api`.
	pub fn with_quota(mut self, api: Api) -> Self {
		self.api = Some(api);

		self
	}

	/// Acquires `key` before the call.
	pub fn with_credential(mut self, key: CredentialKey) -> Self {
		self.credential = Some(key);

		self
	}

	/// Requires the credential to stay valid for `min_validity`.
	pub fn with_min_validity(mut self, min_validity: Duration) -> Self {
		self.min_validity = Some(min_validity);

		self
	}
}

/// Outcome class of a guarded call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardStatus {
	/// Call ran and succeeded.
	Ok,
	/// Layer answered without completing the call; retry later or skip.
	Downgraded,
	/// Call failed.
	Error,
}

/// Structured result handed back to tool handlers; never an exception.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GuardResult<T> {
	/// Whether the call completed.
	pub ok: bool,
	/// Call output on success.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub value: Option<T>,
	/// Outcome class.
	pub status: GuardStatus,
	/// Earliest useful retry, when known.
	#[serde(
		rename = "retry_after_secs",
		serialize_with = "serialize_secs",
		skip_serializing_if = "Option::is_none"
	)]
	pub retry_after: Option<Duration>,
	/// Caller-facing description of a degraded or failed call.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	/// Stable error class ([`Error::kind`]).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_kind: Option<&'static str>,
}
impl<T> GuardResult<T> {
	/// Successful call.
	pub fn ok(value: T) -> Self {
		Self {
			ok: true,
			value: Some(value),
			status: GuardStatus::Ok,
			retry_after: None,
			message: None,
			error_kind: None,
		}
	}

	/// Failed call; quota and breaker refusals downgrade instead of erroring.
	pub fn from_error(error: Error) -> Self {
		let status = match error {
			Error::QuotaExceeded { .. } | Error::CircuitOpen(_) => GuardStatus::Downgraded,
			_ => GuardStatus::Error,
		};

		Self {
			ok: false,
			value: None,
			status,
			retry_after: error.retry_after(),
			message: Some(error.to_string()),
			error_kind: Some(error.kind()),
		}
	}

	/// Call output, discarding the degradation details.
	pub fn into_value(self) -> Option<T> {
		self.value
	}
}

/// Overall gateway health.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
	/// Nothing open or exhausted.
	Healthy,
	/// At least one circuit is open or one daily quota is exhausted.
	Degraded,
}

/// Snapshot returned by the status endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SystemStatus {
	/// Snapshot instant.
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	/// Summary health.
	pub overall_health: OverallHealth,
	/// Every breaker.
	pub circuits: Vec<CircuitStatus>,
	/// Cached and tracked credentials.
	pub credentials: Vec<CredentialSnapshot>,
	/// Every metered API.
	pub quotas: Vec<QuotaStatus>,
	/// Human-readable degradation causes.
	pub issues: Vec<String>,
}

/// Facade every outbound call goes through.
pub struct CallGuard {
	circuits: Arc<CircuitRegistry>,
	limiter: Arc<RateLimiter>,
	credentials: Arc<CredentialManager>,
	clock: Arc<dyn Clock>,
	tracked: Vec<CredentialKey>,
}
impl CallGuard {
	/// Composes existing registries.
	pub fn new(
		circuits: Arc<CircuitRegistry>,
		limiter: Arc<RateLimiter>,
		credentials: Arc<CredentialManager>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self { circuits, limiter, credentials, clock, tracked: Vec::new() }
	}

	/// Builds isolated registries from `config`.
	pub fn from_config(
		config: &GatewayConfig,
		store: Arc<dyn CredentialStore>,
		refresher: Arc<dyn TokenRefresher>,
		authorizer: Arc<dyn Authorizer>,
		clock: Arc<dyn Clock>,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		let circuits = config.build_circuits(clock.clone())?;
		let limiter = config.build_rate_limiter(clock.clone())?;
		let credentials = CredentialManager::new(
			store,
			refresher,
			authorizer,
			clock.clone(),
			config.credential_policy(),
		);

		Ok(Self::new(Arc::new(circuits), Arc::new(limiter), Arc::new(credentials), clock)
			.with_tracked_credentials(config.tracked_credentials.iter().cloned()))
	}

	/// Credentials always listed by [`CallGuard::system_status`].
	pub fn with_tracked_credentials(mut self, keys: impl IntoIterator<Item = CredentialKey>) -> Self {
		self.tracked.extend(keys);

		self
	}

	/// Breaker registry.
	pub fn circuits(&self) -> &Arc<CircuitRegistry> {
		&self.circuits
	}

	/// Rate limiter.
	pub fn limiter(&self) -> &Arc<RateLimiter> {
		&self.limiter
	}

	/// Credential manager.
	pub fn credentials(&self) -> &Arc<CredentialManager> {
		&self.credentials
	}

	/// Runs `f` under the layers named by `call`.
	///
	/// `f` receives the acquired credential, when `call` names one.
	pub async fn execute<F, Fut, T>(&self, call: CallDescriptor, f: F) -> GuardResult<T>
	where
		F: FnOnce(Option<CredentialRecord>) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let span = CallSpan::new(Component::Guard, call.operation.as_str());

		span.instrument(self.execute_inner(call, f)).await
	}

	/// Uploads through `transfers` under the upload breaker and quota.
	///
	/// The coordinator retries transient chunk failures itself; the breaker only sees the
	/// transfer's final outcome.
	pub async fn upload(
		&self,
		transfers: &TransferCoordinator,
		request: UploadRequest,
	) -> GuardResult<TransferReport> {
		let call = CallDescriptor::new(Operation::YoutubeUpload).with_quota(Api::YoutubeUpload);

		self.execute(call, |_| transfers.upload(request)).await
	}

	/// Circuits, credentials, and quotas in one snapshot.
	pub fn system_status(&self) -> SystemStatus {
		let circuits = self.circuits.statuses();
		let credentials = self.credentials.statuses(&self.tracked);
		let quotas = self.limiter.statuses();
		let mut issues = Vec::new();

		for circuit in circuits.iter().filter(|c| c.state == CircuitState::Open) {
			issues.push(format!(
				"Circuit `{}` is open; recovery in {}s.",
				circuit.name, circuit.cooldown_seconds
			));
		}
		for quota in quotas.iter().filter(|q| q.remaining == 0) {
			issues.push(format!("Daily quota for `{}` is exhausted.", quota.api));
		}

		let overall_health =
			if issues.is_empty() { OverallHealth::Healthy } else { OverallHealth::Degraded };

		SystemStatus {
			timestamp: self.clock.now(),
			overall_health,
			circuits,
			credentials,
			quotas,
			issues,
		}
	}

	async fn execute_inner<F, Fut, T>(&self, call: CallDescriptor, f: F) -> GuardResult<T>
	where
		F: FnOnce(Option<CredentialRecord>) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let permit = match self.circuits.get(call.operation).try_acquire() {
			Ok(permit) => permit,
			Err(rejection) => {
				tracing::info!(operation = call.operation.as_str(), %rejection, "Call downgraded.");

				return GuardResult::from_error(rejection.into());
			},
		};

		let admitted = match call.api {
			Some(api) => self.limiter.admit(api).await.map(|_| ()),
			None => Ok(()),
		};

		if let Err(e) = admitted {
			return GuardResult::from_error(e);
		}

		let credential = match &call.credential {
			Some(key) => {
				let min_validity =
					call.min_validity.unwrap_or(self.credentials.policy().preemptive_threshold);

				match self.credentials.acquire(key, min_validity).await {
					Ok(record) => Some(record),
					Err(e) => return GuardResult::from_error(e),
				}
			},
			None => None,
		};

		obs::record_outcome(Component::Guard, Outcome::Attempt);

		match f(credential).await {
			Ok(value) => {
				permit.record_success();
				obs::record_outcome(Component::Guard, Outcome::Success);

				GuardResult::ok(value)
			},
			Err(e) => {
				if e.trips_circuit() {
					permit.record_failure();
				}

				tracing::warn!(operation = call.operation.as_str(), error = %e, "Guarded call failed.");
				obs::record_outcome(Component::Guard, Outcome::Failure);

				GuardResult::from_error(e)
			},
		}
	}
}

impl Debug for CallGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CallGuard")
			.field("circuits", &self.circuits)
			.field("limiter", &self.limiter)
			.field("credentials", &self.credentials)
			.field("tracked", &self.tracked)
			.finish()
	}
}

fn serialize_secs<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	match value {
		Some(duration) => serializer.serialize_some(&duration.whole_seconds()),
		None => serializer.serialize_none(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		catalog::Service,
		circuit::Rejection,
		credentials::HeadlessAuthorizer,
		error::TransientError,
		store::MemoryStore,
	};

	#[test]
	fn quota_errors_downgrade_and_serialize_retry_hint() {
		let result = GuardResult::<()>::from_error(Error::QuotaExceeded {
			api: Api::Trends,
			retry_after: Duration::minutes(90),
		});
		let json = serde_json::to_value(&result).expect("Guard result should serialize.");

		assert_eq!(result.status, GuardStatus::Downgraded);
		assert_eq!(json["status"], "downgraded");
		assert_eq!(json["retry_after_secs"], 5_400);
		assert_eq!(json["error_kind"], "quota_exceeded");
		assert!(json.get("value").is_none());
	}

	#[test]
	fn upstream_failures_are_errors() {
		let result = GuardResult::<u8>::from_error(
			TransientError::Upstream { message: "502".into(), status: Some(502), retry_after: None }
				.into(),
		);

		assert!(!result.ok);
		assert_eq!(result.status, GuardStatus::Error);
		assert_eq!(result.error_kind, Some("transient_network"));
		assert_eq!(GuardResult::ok(3_u8).into_value(), Some(3));
	}

	#[test]
	fn breaker_rejections_downgrade_through_the_error_path() {
		let rejection = Rejection {
			operation: Operation::GoogleSearch,
			state: CircuitState::Open,
			retry_after: Some(Duration::seconds(45)),
		};
		let result = GuardResult::<()>::from_error(rejection.clone().into());

		assert_eq!(result.status, GuardStatus::Downgraded);
		assert_eq!(result.error_kind, Some("circuit_open"));
		assert_eq!(result.retry_after, Some(Duration::seconds(45)));
		assert_eq!(result.message, Some(rejection.to_string()));
	}

	#[test]
	fn debug_output_names_the_layers_without_the_clock() {
		let clock = fixture_clock();
		let guard = CallGuard::from_config(
			&GatewayConfig::default(),
			Arc::new(MemoryStore::default()),
			Arc::new(CountingRefresher::new(FIXTURE_START, Duration::hours(1))),
			Arc::new(HeadlessAuthorizer),
			clock,
		)
		.expect("Default config should build a guard.")
		.with_tracked_credentials([fixture_key(Service::Search, None)]);
		let rendered = format!("{guard:?}");

		assert!(rendered.starts_with("CallGuard"));
		assert!(rendered.contains("tracked"));
		assert!(!rendered.contains("clock"));
	}
}
