// self
use crate::obs::{Component, Outcome};

/// Records an outcome via the global metrics recorder (when enabled).
pub fn record_outcome(component: Component, outcome: Outcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"upstream_guard_events_total",
			"component" => component.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (component, outcome);
	}
}
