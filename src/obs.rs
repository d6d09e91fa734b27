//! Observability helpers shared by every layer.
//!
//! Spans are named `upstream_guard.call` and carry `component` + `stage` fields. With the
//! `metrics` feature enabled, [`record_outcome`] increments the `upstream_guard_events_total`
//! counter labelled by `component` + `outcome`.

mod metrics;
mod span;

pub use metrics::*;
pub use span::*;

// self
use crate::_prelude::*;

/// Layer emitting the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
	/// Credential manager.
	Credentials,
	/// Rate limiter.
	Quota,
	/// Circuit breaker.
	Circuit,
	/// Resumable transfer coordinator.
	Transfer,
	/// Call-guard facade.
	Guard,
}
impl Component {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Component::Credentials => "credentials",
			Component::Quota => "quota",
			Component::Circuit => "circuit",
			Component::Transfer => "transfer",
			Component::Guard => "guard",
		}
	}
}
impl Display for Component {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded per event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Work started.
	Attempt,
	/// Work completed.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// Call answered with a degraded result without reaching the upstream.
	Downgraded,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Failure => "failure",
			Outcome::Downgraded => "downgraded",
		}
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
