//! Gateway configuration document and the composition helpers that build isolated
//! registries from it.
//!
//! Every field has a default, so an empty JSON object (`{}`) is a valid configuration.

// std
use std::path::{Path, PathBuf};
// self
use crate::{
	_prelude::*,
	auth::CredentialKey,
	catalog::{Api, Operation},
	circuit::{CircuitConfig, CircuitRegistry},
	clock::Clock,
	credentials::CredentialPolicy,
	error::ConfigError,
	quota::{JitterBounds, QuotaLimit, RateLimiter},
	store::FileStore,
	transfer::TransferConfig,
};

/// Serde adapter storing a [`Duration`] as whole seconds.
pub(crate) mod secs {
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};
	use time::Duration;

	pub(crate) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_seconds())
	}

	pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::seconds)
	}
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub(crate) mod millis {
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};
	use time::Duration;

	pub(crate) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_milliseconds() as i64)
	}

	pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::milliseconds)
	}
}

/// Thresholds consumed by the tool handlers' clustering and competitor-avoidance rules.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicsConfig {
	/// Minimum similarity for two entities to share a cluster.
	pub entity_similarity_threshold: f64,
	/// Competitor mentions that mark a topic as crowded.
	pub competitor_count_threshold: u32,
}
impl Default for HeuristicsConfig {
	fn default() -> Self {
		Self { entity_similarity_threshold: 0.6, competitor_count_threshold: 3 }
	}
}

/// Top-level gateway configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
	/// Directory holding one JSON document per credential.
	pub credentials_dir: PathBuf,
	/// Margin added on top of an operation's estimated duration before refreshing.
	#[serde(rename = "preemptive_refresh_secs", with = "secs")]
	pub preemptive_refresh: Duration,
	/// Quota overrides; APIs left out keep their published defaults.
	pub quotas: BTreeMap<Api, QuotaLimit>,
	/// Breaker overrides; operations left out keep their default tuning.
	pub circuits: BTreeMap<Operation, CircuitConfig>,
	/// Jitter added to minute-window waits.
	pub jitter: JitterBounds,
	/// Resumable transfer tuning.
	pub transfer: TransferConfig,
	/// Credentials always listed in the status snapshot, loaded or not.
	pub tracked_credentials: Vec<CredentialKey>,
	/// Tool-handler heuristics.
	pub heuristics: HeuristicsConfig,
}
impl GatewayConfig {
	/// Parses and validates a JSON document.
	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		let deserializer = &mut serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(deserializer).map_err(|e| {
			ConfigError::Parse { path: e.path().to_string(), message: e.inner().to_string() }
		})?;

		config.validate()?;

		Ok(config)
	}

	/// Reads, parses, and validates the JSON document at `path`.
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let raw = std::fs::read_to_string(path)?;

		Self::from_json_str(&raw)
	}

	/// Checks every section, reporting the first invalid field.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.preemptive_refresh.is_negative() {
			return Err(ConfigError::InvalidValue {
				field: "preemptive_refresh_secs".into(),
				reason: "must not be negative",
			});
		}

		for (api, limit) in &self.quotas {
			limit.validate(*api)?;
		}
		for (operation, circuit) in &self.circuits {
			circuit.validate(*operation)?;
		}

		self.jitter.validate()?;
		self.transfer.validate()?;

		let similarity = self.heuristics.entity_similarity_threshold;

		if !(0.0..=1.0).contains(&similarity) {
			return Err(ConfigError::InvalidValue {
				field: "heuristics.entity_similarity_threshold".into(),
				reason: "must be within 0.0..=1.0",
			});
		}
		if self.heuristics.competitor_count_threshold == 0 {
			return Err(ConfigError::InvalidValue {
				field: "heuristics.competitor_count_threshold".into(),
				reason: "must be at least 1",
			});
		}

		Ok(())
	}

	/// Quota for `api`, falling back to its published default.
	pub fn quota_for(&self, api: Api) -> QuotaLimit {
		self.quotas.get(&api).copied().unwrap_or_else(|| api.default_quota())
	}

	/// Builds a limiter metering every known API.
	pub fn build_rate_limiter(&self, clock: Arc<dyn Clock>) -> Result<RateLimiter, ConfigError> {
		RateLimiter::new(Api::ALL.map(|api| (api, self.quota_for(api))), self.jitter, clock)
	}

	/// Builds one breaker per known operation.
	pub fn build_circuits(&self, clock: Arc<dyn Clock>) -> Result<CircuitRegistry, ConfigError> {
		CircuitRegistry::new(self.circuits.iter().map(|(op, config)| (*op, *config)), clock)
	}

	/// Credential refresh policy.
	pub fn credential_policy(&self) -> CredentialPolicy {
		CredentialPolicy { preemptive_threshold: self.preemptive_refresh }
	}

	/// Transfer tuning.
	pub fn transfer_config(&self) -> TransferConfig {
		self.transfer
	}

	/// Opens the directory-backed credential store.
	pub fn open_file_store(&self) -> Result<FileStore> {
		Ok(FileStore::open(&self.credentials_dir)?)
	}
}
impl Default for GatewayConfig {
	fn default() -> Self {
		Self {
			credentials_dir: PathBuf::from("./credentials"),
			preemptive_refresh: CredentialPolicy::DEFAULT_PREEMPTIVE_THRESHOLD,
			quotas: Api::ALL.into_iter().map(|api| (api, api.default_quota())).collect(),
			circuits: Operation::ALL.into_iter().map(|op| (op, op.default_circuit())).collect(),
			jitter: JitterBounds::default(),
			transfer: TransferConfig::default(),
			tracked_credentials: Vec::new(),
			heuristics: HeuristicsConfig::default(),
		}
	}
}
