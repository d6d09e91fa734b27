//! Injectable time source used by every window, cooldown, and backoff calculation.

// self
use crate::_prelude::*;

/// Boxed future returned by [`Clock::sleep`].
pub type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Time source plus cooperative sleep.
///
/// Components never read the system clock directly so tests and simulations can drive
/// windows and cooldowns deterministically through [`ManualClock`].
pub trait Clock
where
	Self: Send + Sync,
{
	/// Current UTC instant.
	fn now(&self) -> OffsetDateTime;

	/// Suspends the calling task for `duration` without blocking unrelated tasks.
	fn sleep(&self, duration: Duration) -> SleepFuture;
}

/// Wall clock backed by the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}

	fn sleep(&self, duration: Duration) -> SleepFuture {
		let duration = to_std(duration);

		Box::pin(tokio::time::sleep(duration))
	}
}

/// Deterministic clock whose `sleep` advances time instantly.
///
/// Every requested sleep is recorded so tests can assert on the exact delays a component
/// chose.
#[derive(Debug)]
pub struct ManualClock {
	now: Mutex<OffsetDateTime>,
	sleeps: Mutex<Vec<Duration>>,
}
impl ManualClock {
	/// Creates a clock frozen at `start`.
	pub fn new(start: OffsetDateTime) -> Self {
		Self { now: Mutex::new(start), sleeps: Mutex::new(Vec::new()) }
	}

	/// Moves the clock forward by `delta`.
	pub fn advance(&self, delta: Duration) {
		*self.now.lock() += delta;
	}

	/// Jumps the clock to `instant`.
	pub fn set(&self, instant: OffsetDateTime) {
		*self.now.lock() = instant;
	}

	/// Delays requested through [`Clock::sleep`], in call order.
	pub fn sleeps(&self) -> Vec<Duration> {
		self.sleeps.lock().clone()
	}

	/// Sum of every requested delay.
	pub fn total_slept(&self) -> Duration {
		self.sleeps.lock().iter().fold(Duration::ZERO, |acc, d| acc + *d)
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.now.lock()
	}

	fn sleep(&self, duration: Duration) -> SleepFuture {
		let duration = if duration.is_negative() { Duration::ZERO } else { duration };

		self.sleeps.lock().push(duration);
		self.advance(duration);

		Box::pin(async {})
	}
}

/// Converts a signed [`Duration`] into a std duration, clamping negatives to zero.
pub(crate) fn to_std(duration: Duration) -> std::time::Duration {
	if duration.is_negative() { std::time::Duration::ZERO } else { duration.unsigned_abs() }
}
