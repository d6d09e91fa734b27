//! Dual-window (daily + per-minute) rate limiter with jittered waits.
//!
//! Minute-window saturation is waited out cooperatively; daily exhaustion is reported to the
//! caller as [`Error::QuotaExceeded`] and never waited out. Windows roll over lazily on the
//! next admission attempt, so each elapsed boundary resets its counter exactly once.

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	catalog::Api,
	clock::Clock,
	config::millis,
	error::ConfigError,
	obs::{self, Component, Outcome},
};

const DAY: Duration = Duration::hours(24);
const MINUTE: Duration = Duration::minutes(1);
const RUNNING_LOW: u32 = 10;

/// Daily + per-minute request ceilings for one API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimit {
	/// Admissions allowed per rolling day window.
	pub requests_per_day: u32,
	/// Admissions allowed per rolling minute window.
	pub requests_per_minute: u32,
}
impl QuotaLimit {
	/// Creates a limit.
	pub const fn new(requests_per_day: u32, requests_per_minute: u32) -> Self {
		Self { requests_per_day, requests_per_minute }
	}

	/// Rejects zero ceilings.
	pub fn validate(&self, api: Api) -> Result<(), ConfigError> {
		if self.requests_per_day == 0 {
			return Err(ConfigError::InvalidValue {
				field: format!("quotas.{api}.requests_per_day"),
				reason: "must be at least 1",
			});
		}
		if self.requests_per_minute == 0 {
			return Err(ConfigError::InvalidValue {
				field: format!("quotas.{api}.requests_per_minute"),
				reason: "must be at least 1",
			});
		}

		Ok(())
	}
}

/// Random delay added on top of every minute-window wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterBounds {
	/// Lower bound (inclusive).
	#[serde(rename = "min_ms", with = "millis")]
	pub min: Duration,
	/// Upper bound (inclusive).
	#[serde(rename = "max_ms", with = "millis")]
	pub max: Duration,
}
impl JitterBounds {
	/// No jitter.
	pub const NONE: Self = Self::new(Duration::ZERO, Duration::ZERO);

	/// Creates bounds.
	pub const fn new(min: Duration, max: Duration) -> Self {
		Self { min, max }
	}

	/// Rejects negative or inverted bounds.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.min.is_negative() || self.min > self.max {
			return Err(ConfigError::InvalidValue {
				field: "jitter".into(),
				reason: "bounds must satisfy 0 <= min <= max",
			});
		}

		Ok(())
	}

	fn sample(&self) -> Duration {
		let min = self.min.whole_milliseconds().max(0) as i64;
		let max = (self.max.whole_milliseconds() as i64).max(min);

		if min == max {
			return Duration::milliseconds(min);
		}

		Duration::milliseconds(rand::rng().random_range(min..=max))
	}
}
impl Default for JitterBounds {
	fn default() -> Self {
		Self::new(Duration::milliseconds(50), Duration::milliseconds(250))
	}
}

/// Successful admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
	/// Total time spent waiting for the minute window.
	pub waited: Duration,
	/// Daily budget left after this admission; `None` for unmetered APIs.
	pub remaining_today: Option<u32>,
}

/// Quota snapshot for the status endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
	/// API bucket.
	pub api: Api,
	/// Daily admissions left.
	pub remaining: u32,
	/// Daily ceiling.
	pub limit_per_day: u32,
	/// Minute ceiling.
	pub limit_per_minute: u32,
	/// Instant the daily window rolls over.
	#[serde(with = "time::serde::rfc3339")]
	pub resets_at: OffsetDateTime,
	/// Operator-facing hint.
	pub recommendation: &'static str,
}

#[derive(Debug)]
enum Decision {
	Admitted { remaining_today: u32 },
	Wait(Duration),
	Exhausted { retry_after: Duration },
}

#[derive(Debug)]
struct QuotaState {
	limit: QuotaLimit,
	day_count: u32,
	minute_count: u32,
	day_reset_at: OffsetDateTime,
	minute_reset_at: OffsetDateTime,
}
impl QuotaState {
	fn new(limit: QuotaLimit, now: OffsetDateTime) -> Self {
		Self { limit, day_count: 0, minute_count: 0, day_reset_at: now, minute_reset_at: now }
	}

	fn roll_over(&mut self, now: OffsetDateTime) {
		if now - self.day_reset_at >= DAY {
			self.day_count = 0;
			self.day_reset_at = now;
		}
		if now - self.minute_reset_at >= MINUTE {
			self.minute_count = 0;
			self.minute_reset_at = now;
		}
	}

	fn try_admit(&mut self, now: OffsetDateTime) -> Decision {
		self.roll_over(now);

		if self.day_count >= self.limit.requests_per_day {
			return Decision::Exhausted { retry_after: self.day_reset_at + DAY - now };
		}
		if self.minute_count >= self.limit.requests_per_minute {
			return Decision::Wait(self.minute_reset_at + MINUTE - now);
		}

		self.day_count += 1;
		self.minute_count += 1;

		Decision::Admitted { remaining_today: self.limit.requests_per_day - self.day_count }
	}

	fn remaining(&self, now: OffsetDateTime) -> u32 {
		if now - self.day_reset_at >= DAY {
			self.limit.requests_per_day
		} else {
			self.limit.requests_per_day.saturating_sub(self.day_count)
		}
	}

	fn resets_at(&self, now: OffsetDateTime) -> OffsetDateTime {
		if now - self.day_reset_at >= DAY { now } else { self.day_reset_at + DAY }
	}
}

/// Per-API dual-window limiter.
///
/// Every configured API owns its own lock, so admissions for unrelated APIs never serialize.
/// The lock is only held while counters are read and written, never across a wait.
pub struct RateLimiter {
	states: BTreeMap<Api, Mutex<QuotaState>>,
	jitter: JitterBounds,
	clock: Arc<dyn Clock>,
}
impl RateLimiter {
	/// Builds a limiter for the given limits; APIs without a limit are unmetered.
	pub fn new(
		limits: impl IntoIterator<Item = (Api, QuotaLimit)>,
		jitter: JitterBounds,
		clock: Arc<dyn Clock>,
	) -> Result<Self, ConfigError> {
		jitter.validate()?;

		let now = clock.now();
		let mut states = BTreeMap::new();

		for (api, limit) in limits {
			limit.validate(api)?;
			states.insert(api, Mutex::new(QuotaState::new(limit, now)));
		}

		Ok(Self { states, jitter, clock })
	}

	/// Limiter using every API's published default quota.
	pub fn with_defaults(clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
		Self::new(
			Api::ALL.into_iter().map(|api| (api, api.default_quota())),
			JitterBounds::default(),
			clock,
		)
	}

	/// Waits for a minute-window slot and consumes one admission from both windows.
	pub async fn admit(&self, api: Api) -> Result<Admission> {
		let Some(state) = self.states.get(&api) else {
			return Ok(Admission { waited: Duration::ZERO, remaining_today: None });
		};
		let mut waited = Duration::ZERO;

		loop {
			let decision = state.lock().try_admit(self.clock.now());

			match decision {
				Decision::Admitted { remaining_today } =>
					return Ok(Admission { waited, remaining_today: Some(remaining_today) }),
				Decision::Exhausted { retry_after } => {
					tracing::warn!(
						api = api.as_str(),
						retry_after_secs = retry_after.whole_seconds(),
						"Daily quota exhausted."
					);
					obs::record_outcome(Component::Quota, Outcome::Downgraded);

					return Err(Error::QuotaExceeded { api, retry_after });
				},
				Decision::Wait(window) => {
					let delay = window + self.jitter.sample();

					tracing::debug!(
						api = api.as_str(),
						delay_ms = delay.whole_milliseconds() as i64,
						"Minute quota saturated; waiting for the window to roll over."
					);
					self.clock.sleep(delay).await;

					waited += delay;
				},
			}
		}
	}

	/// Daily admissions left without mutating state; `None` for unmetered APIs.
	pub fn remaining(&self, api: Api) -> Option<u32> {
		let state = self.states.get(&api)?;

		Some(state.lock().remaining(self.clock.now()))
	}

	/// Snapshot for one API.
	pub fn status(&self, api: Api) -> Option<QuotaStatus> {
		let now = self.clock.now();
		let state = self.states.get(&api)?.lock();
		let remaining = state.remaining(now);
		let recommendation = match remaining {
			0 => "Daily quota exhausted; wait for reset.",
			r if r < RUNNING_LOW => "Running low on quota.",
			_ => "Quota healthy.",
		};

		Some(QuotaStatus {
			api,
			remaining,
			limit_per_day: state.limit.requests_per_day,
			limit_per_minute: state.limit.requests_per_minute,
			resets_at: state.resets_at(now),
			recommendation,
		})
	}

	/// Snapshots for every metered API, ordered by API.
	pub fn statuses(&self) -> Vec<QuotaStatus> {
		self.states.keys().filter_map(|api| self.status(*api)).collect()
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter")
			.field("apis", &self.states.keys().collect::<Vec<_>>())
			.field("jitter", &self.jitter)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::clock::ManualClock;

	const START: OffsetDateTime = macros::datetime!(2025-02-10 10:00 UTC);

	fn limiter(limit: QuotaLimit, jitter: JitterBounds) -> (Arc<ManualClock>, RateLimiter) {
		let clock = Arc::new(ManualClock::new(START));
		let limiter = RateLimiter::new([(Api::Search, limit)], jitter, clock.clone())
			.expect("Limiter fixture should be valid.");

		(clock, limiter)
	}

	#[tokio::test]
	async fn minute_saturation_waits_for_rollover_plus_jitter() {
		let jitter = JitterBounds::new(Duration::milliseconds(10), Duration::milliseconds(90));
		let (clock, limiter) = limiter(QuotaLimit::new(100, 5), jitter);

		for _ in 0..5 {
			let admission = limiter.admit(Api::Search).await.expect("Admission should succeed.");

			assert_eq!(admission.waited, Duration::ZERO);
		}

		clock.advance(Duration::seconds(20));

		let sixth = limiter.admit(Api::Search).await.expect("Sixth admission should wait, not fail.");

		assert!(sixth.waited >= Duration::seconds(40));
		assert!(sixth.waited <= Duration::seconds(40) + Duration::milliseconds(90));
		assert_eq!(clock.sleeps().len(), 1);
		assert_eq!(sixth.remaining_today, Some(94));
	}

	#[tokio::test]
	async fn daily_exhaustion_fails_fast_with_exact_retry_after() {
		let (clock, limiter) = limiter(QuotaLimit::new(3, 60), JitterBounds::NONE);

		for _ in 0..3 {
			limiter.admit(Api::Search).await.expect("Admission within budget should succeed.");
			clock.advance(Duration::minutes(7));
		}

		let err = limiter.admit(Api::Search).await.expect_err("Fourth admission must fail.");
		let Error::QuotaExceeded { api, retry_after } = err else {
			panic!("Daily exhaustion should surface as QuotaExceeded.");
		};

		assert_eq!(api, Api::Search);
		assert_eq!(clock.now() + retry_after, START + DAY);
		assert!(clock.sleeps().is_empty());
		assert_eq!(limiter.remaining(Api::Search), Some(0));
	}

	#[tokio::test]
	async fn day_window_rolls_over_once() {
		let (clock, limiter) = limiter(QuotaLimit::new(2, 60), JitterBounds::NONE);

		limiter.admit(Api::Search).await.expect("Admission should succeed.");
		limiter.admit(Api::Search).await.expect("Admission should succeed.");
		clock.advance(DAY);

		assert_eq!(limiter.remaining(Api::Search), Some(2), "Remaining accounts for rollover.");

		let admission = limiter.admit(Api::Search).await.expect("New day should admit.");
		let status = limiter.status(Api::Search).expect("Search is metered.");

		assert_eq!(admission.remaining_today, Some(1));
		assert_eq!(status.resets_at, START + DAY + DAY);
		assert_eq!(status.recommendation, "Running low on quota.");
	}

	#[tokio::test]
	async fn unmetered_apis_are_admitted_immediately() {
		let (_, limiter) = limiter(QuotaLimit::new(1, 1), JitterBounds::NONE);
		let admission = limiter.admit(Api::Trends).await.expect("Unmetered APIs always admit.");

		assert_eq!(admission.remaining_today, None);
		assert_eq!(limiter.remaining(Api::Trends), None);
		assert_eq!(limiter.statuses().len(), 1);
	}

	#[test]
	fn invalid_limits_and_jitter_are_rejected() {
		let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(START));

		assert!(
			RateLimiter::new([(Api::Search, QuotaLimit::new(0, 1))], JitterBounds::NONE, clock.clone())
				.is_err()
		);

		let inverted = JitterBounds::new(Duration::milliseconds(5), Duration::milliseconds(1));

		assert!(RateLimiter::new([], inverted, clock).is_err());
	}

	#[test]
	fn jitter_samples_stay_in_bounds() {
		let jitter = JitterBounds::default();

		for _ in 0..100 {
			let sample = jitter.sample();

			assert!(sample >= jitter.min && sample <= jitter.max);
		}
	}
}
