//! Per-operation circuit breakers.
//!
//! A breaker starts `closed`, opens after `failure_threshold` consecutive failures, moves to
//! `half_open` on the first call after `recovery_timeout` has elapsed since the last failure,
//! and closes again after `success_threshold` probe successes. Any probe failure reopens it.
//!
//! Admission hands out a [`CircuitPermit`]; the permit records the outcome and, for half-open
//! probes, releases its probe slot even when the caller drops it without reporting.

// self
use crate::{
	_prelude::*,
	catalog::Operation,
	clock::Clock,
	config::secs,
	error::ConfigError,
	obs::{self, Component, Outcome},
};

/// Breaker tuning for one operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
	/// Consecutive failures that open the breaker.
	pub failure_threshold: u32,
	/// Cooldown measured from the last failure before a probe is allowed.
	#[serde(rename = "recovery_timeout_secs", with = "secs")]
	pub recovery_timeout: Duration,
	/// Concurrent probes admitted while half-open.
	pub half_open_max_requests: u32,
	/// Probe successes that close the breaker.
	pub success_threshold: u32,
}
impl CircuitConfig {
	/// Creates a config.
	pub const fn new(
		failure_threshold: u32,
		recovery_timeout: Duration,
		half_open_max_requests: u32,
		success_threshold: u32,
	) -> Self {
		Self { failure_threshold, recovery_timeout, half_open_max_requests, success_threshold }
	}

	/// Longest accepted cooldown.
	pub const MAX_RECOVERY_TIMEOUT: Duration = Duration::weeks(1);

	/// Rejects zero thresholds and cooldowns outside `(0, MAX_RECOVERY_TIMEOUT]`.
	pub fn validate(&self, operation: Operation) -> Result<(), ConfigError> {
		if self.recovery_timeout > Self::MAX_RECOVERY_TIMEOUT {
			return Err(ConfigError::InvalidValue {
				field: format!("circuits.{operation}.recovery_timeout_secs"),
				reason: "must not exceed one week",
			});
		}


		let checks = [
			("failure_threshold", self.failure_threshold > 0),
			("half_open_max_requests", self.half_open_max_requests > 0),
			("success_threshold", self.success_threshold > 0),
			("recovery_timeout_secs", self.recovery_timeout.is_positive()),
		];

		match checks.into_iter().find(|(_, ok)| !ok) {
			Some((field, _)) => Err(ConfigError::InvalidValue {
				field: format!("circuits.{operation}.{field}"),
				reason: "must be positive",
			}),
			None => Ok(()),
		}
	}
}

/// Breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
	/// Calls flow normally.
	Closed,
	/// Calls are rejected until the cooldown elapses.
	Open,
	/// A limited number of probes test recovery.
	HalfOpen,
}
impl CircuitState {
	/// Stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			CircuitState::Closed => "closed",
			CircuitState::Open => "open",
			CircuitState::HalfOpen => "half_open",
		}
	}
}
impl Display for CircuitState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Reason a call was downgraded without running.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
	/// Protected operation.
	pub operation: Operation,
	/// State at rejection time (`open`, or `half_open` with every probe slot taken).
	pub state: CircuitState,
	/// Time until the breaker admits a probe, when known.
	pub retry_after: Option<Duration>,
}
impl Display for Rejection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match (self.state, self.retry_after) {
			(CircuitState::HalfOpen, _) => write!(
				f,
				"Circuit `{}` is probing recovery and every probe slot is taken.",
				self.operation
			),
			(_, Some(retry_after)) => write!(
				f,
				"Circuit `{}` is open; retry in {}s.",
				self.operation,
				retry_after.whole_seconds()
			),
			(_, None) => write!(f, "Circuit `{}` is open.", self.operation),
		}
	}
}
impl std::error::Error for Rejection {}

/// Result of [`CircuitBreaker::guard`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Guarded<T> {
	/// The guarded function ran and succeeded.
	Executed(T),
	/// The breaker rejected the call; the function was not invoked.
	Downgraded(Rejection),
}

/// Breaker snapshot for the status endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStatus {
	/// Protected operation.
	pub name: Operation,
	/// Current state.
	pub state: CircuitState,
	/// Consecutive failures recorded.
	pub failure_count: u32,
	/// Seconds left before an open breaker admits a probe; zero otherwise.
	pub cooldown_seconds: i64,
	/// When an open breaker will admit its next probe.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub estimated_recovery_time: Option<OffsetDateTime>,
	/// Instant of the most recent failure.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub last_failure_at: Option<OffsetDateTime>,
	/// Whether the next call would be admitted.
	pub is_available: bool,
	/// Operator-facing hint.
	pub recommendation: String,
}

#[derive(Debug)]
struct BreakerState {
	state: CircuitState,
	failure_count: u32,
	success_count: u32,
	last_failure_at: Option<OffsetDateTime>,
	probes_in_flight: u32,
	generation: u64,
}
impl BreakerState {
	fn transition(&mut self, operation: Operation, to: CircuitState) {
		tracing::info!(
			operation = operation.as_str(),
			from = self.state.as_str(),
			to = to.as_str(),
			failure_count = self.failure_count,
			"Circuit state changed."
		);

		self.state = to;
		self.success_count = 0;
		self.probes_in_flight = 0;
		self.generation += 1;

		if to == CircuitState::Closed {
			self.failure_count = 0;
		}
	}

	fn cooldown_left(&self, config: &CircuitConfig, now: OffsetDateTime) -> Duration {
		match self.last_failure_at {
			Some(at) => config.recovery_timeout - (now - at),
			None => Duration::ZERO,
		}
	}
}

/// Circuit breaker protecting one operation.
pub struct CircuitBreaker {
	operation: Operation,
	config: CircuitConfig,
	clock: Arc<dyn Clock>,
	state: Mutex<BreakerState>,
}
impl CircuitBreaker {
	/// Creates a closed breaker.
	pub fn new(operation: Operation, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
		Self {
			operation,
			config,
			clock,
			state: Mutex::new(BreakerState {
				state: CircuitState::Closed,
				failure_count: 0,
				success_count: 0,
				last_failure_at: None,
				probes_in_flight: 0,
				generation: 0,
			}),
		}
	}

	/// Protected operation.
	pub fn operation(&self) -> Operation {
		self.operation
	}

	/// Active tuning.
	pub fn config(&self) -> CircuitConfig {
		self.config
	}

	/// Current state, without applying a pending open -> half-open transition.
	pub fn state(&self) -> CircuitState {
		self.state.lock().state
	}

	/// Asks to run one call.
	///
	/// The first call after the cooldown moves an open breaker to half-open and is admitted as
	/// its first probe.
	pub fn try_acquire(self: &Arc<Self>) -> Result<CircuitPermit, Rejection> {
		let now = self.clock.now();
		let mut state = self.state.lock();

		if state.state == CircuitState::Open {
			let left = state.cooldown_left(&self.config, now);

			if left.is_positive() {
				obs::record_outcome(Component::Circuit, Outcome::Downgraded);

				return Err(self.rejection(CircuitState::Open, Some(left)));
			}

			state.transition(self.operation, CircuitState::HalfOpen);
		}

		let probe = state.state == CircuitState::HalfOpen;

		if probe {
			if state.probes_in_flight >= self.config.half_open_max_requests {
				obs::record_outcome(Component::Circuit, Outcome::Downgraded);

				return Err(self.rejection(CircuitState::HalfOpen, None));
			}

			state.probes_in_flight += 1;
		}

		Ok(CircuitPermit {
			breaker: Arc::clone(self),
			generation: state.generation,
			probe,
			settled: false,
		})
	}

	/// Runs `f` when the breaker admits the call, recording its outcome.
	///
	/// Rejections return [`Guarded::Downgraded`] without invoking `f`; errors from `f` are
	/// recorded as failures and propagated.
	pub async fn guard<F, Fut, T, E>(self: &Arc<Self>, f: F) -> Result<Guarded<T>, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		let permit = match self.try_acquire() {
			Ok(permit) => permit,
			Err(rejection) => return Ok(Guarded::Downgraded(rejection)),
		};

		match f().await {
			Ok(value) => {
				permit.record_success();

				Ok(Guarded::Executed(value))
			},
			Err(e) => {
				permit.record_failure();

				Err(e)
			},
		}
	}

	/// Snapshot for the status endpoint.
	pub fn status(&self) -> CircuitStatus {
		let now = self.clock.now();
		let state = self.state.lock();
		let (is_available, cooldown_left, recommendation) = match state.state {
			CircuitState::Closed => (true, Duration::ZERO, "Service available.".to_owned()),
			CircuitState::HalfOpen => (
				state.probes_in_flight < self.config.half_open_max_requests,
				Duration::ZERO,
				"Testing recovery; limited requests allowed.".to_owned(),
			),
			CircuitState::Open => {
				let left = state.cooldown_left(&self.config, now).max(Duration::ZERO);

				(
					left.is_zero(),
					left,
					format!("Wait {} minutes before retry.", left.whole_minutes()),
				)
			},
		};

		CircuitStatus {
			name: self.operation,
			state: state.state,
			failure_count: state.failure_count,
			cooldown_seconds: cooldown_left.whole_seconds(),
			estimated_recovery_time: match state.state {
				CircuitState::Open => now.checked_add(cooldown_left),
				_ => None,
			},
			last_failure_at: state.last_failure_at,
			is_available,
			recommendation,
		}
	}

	fn rejection(&self, state: CircuitState, retry_after: Option<Duration>) -> Rejection {
		Rejection { operation: self.operation, state, retry_after }
	}

	fn settle(&self, generation: u64, probe: bool, success: Option<bool>) {
		let mut state = self.state.lock();
		let current = state.generation == generation;

		if probe && current {
			state.probes_in_flight = state.probes_in_flight.saturating_sub(1);
		}

		match success {
			Some(true) if current => match state.state {
				CircuitState::Closed => state.failure_count = 0,
				CircuitState::HalfOpen => {
					state.success_count += 1;

					if state.success_count >= self.config.success_threshold {
						state.transition(self.operation, CircuitState::Closed);
					}
				},
				CircuitState::Open => {},
			},
			Some(false) => {
				state.failure_count += 1;
				state.last_failure_at = Some(self.clock.now());

				match state.state {
					CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
						tracing::warn!(
							operation = self.operation.as_str(),
							failure_count = state.failure_count,
							"Failure threshold reached; opening circuit."
						);
						state.transition(self.operation, CircuitState::Open);
					},
					CircuitState::HalfOpen => {
						tracing::warn!(
							operation = self.operation.as_str(),
							"Probe failed; reopening circuit."
						);
						state.transition(self.operation, CircuitState::Open);
					},
					_ => {},
				}
			},
			_ => {},
		}
	}
}
impl Debug for CircuitBreaker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CircuitBreaker")
			.field("operation", &self.operation)
			.field("config", &self.config)
			.field("state", &*self.state.lock())
			.finish()
	}
}

/// Admission token for one call; report the outcome exactly once.
#[derive(Debug)]
pub struct CircuitPermit {
	breaker: Arc<CircuitBreaker>,
	generation: u64,
	probe: bool,
	settled: bool,
}
impl CircuitPermit {
	/// Whether this call is a half-open probe.
	pub fn is_probe(&self) -> bool {
		self.probe
	}

	/// Records a successful call.
	pub fn record_success(mut self) {
		self.settled = true;
		self.breaker.settle(self.generation, self.probe, Some(true));
	}

	/// Records a failed call.
	pub fn record_failure(mut self) {
		self.settled = true;
		self.breaker.settle(self.generation, self.probe, Some(false));
	}
}
impl Drop for CircuitPermit {
	fn drop(&mut self) {
		if !self.settled {
			self.breaker.settle(self.generation, self.probe, None);
		}
	}
}

/// Registry holding one breaker per [`Operation`].
#[derive(Debug)]
pub struct CircuitRegistry {
	breakers: [Arc<CircuitBreaker>; Operation::ALL.len()],
}
impl CircuitRegistry {
	/// Builds breakers for every operation, using `overrides` where given and the operation's
	/// default tuning otherwise.
	pub fn new(
		overrides: impl IntoIterator<Item = (Operation, CircuitConfig)>,
		clock: Arc<dyn Clock>,
	) -> Result<Self, ConfigError> {
		let overrides = overrides.into_iter().collect::<HashMap<_, _>>();

		for (operation, config) in &overrides {
			config.validate(*operation)?;
		}

		let breakers = Operation::ALL.map(|operation| {
			let config =
				overrides.get(&operation).copied().unwrap_or_else(|| operation.default_circuit());

			Arc::new(CircuitBreaker::new(operation, config, clock.clone()))
		});

		Ok(Self { breakers })
	}

	/// Registry with every operation's default tuning.
	pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
		let breakers = Operation::ALL.map(|operation| {
			Arc::new(CircuitBreaker::new(operation, operation.default_circuit(), clock.clone()))
		});

		Self { breakers }
	}

	/// Breaker for `operation`.
	pub fn get(&self, operation: Operation) -> &Arc<CircuitBreaker> {
		&self.breakers[operation as usize]
	}

	/// Runs `f` under the breaker for `operation`.
	pub async fn guard<F, Fut, T, E>(&self, operation: Operation, f: F) -> Result<Guarded<T>, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		self.get(operation).guard(f).await
	}

	/// Snapshots for every breaker, in operation order.
	pub fn statuses(&self) -> Vec<CircuitStatus> {
		self.breakers.iter().map(|breaker| breaker.status()).collect()
	}
}
