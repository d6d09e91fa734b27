// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// self
use upstream_guard::{
	_preludet::*,
	catalog::Operation,
	circuit::{CircuitBreaker, CircuitConfig, CircuitState, Guarded},
	error::{Error, TransientError},
};

fn failing() -> Result<(), Error> {
	Err(TransientError::Upstream { message: "503".into(), status: Some(503), retry_after: None }
		.into())
}

#[tokio::test]
async fn three_failures_open_and_the_probe_waits_out_the_cooldown() {
	let clock = fixture_clock();
	let breaker = Arc::new(CircuitBreaker::new(
		Operation::GoogleTrends,
		CircuitConfig::new(3, Duration::seconds(300), 1, 2),
		clock.clone(),
	));
	let invoked = Arc::new(AtomicUsize::new(0));

	for _ in 0..3 {
		let counter = invoked.clone();
		let result = breaker
			.guard(|| async move {
				counter.fetch_add(1, Ordering::SeqCst);

				failing()
			})
			.await;

		assert!(result.is_err());
	}

	assert_eq!(breaker.state(), CircuitState::Open);

	clock.advance(Duration::seconds(299));

	let counter = invoked.clone();
	let early = breaker
		.guard(|| async move {
			counter.fetch_add(1, Ordering::SeqCst);

			Ok::<_, Error>(())
		})
		.await
		.expect("Rejections are reported as downgraded, not errors.");

	assert!(matches!(early, Guarded::Downgraded(_)));
	assert_eq!(invoked.load(Ordering::SeqCst), 3);

	clock.advance(Duration::seconds(2));

	let permit = breaker.try_acquire().expect("The call after the cooldown runs as a probe.");

	assert!(permit.is_probe());
	assert_eq!(breaker.state(), CircuitState::HalfOpen);

	permit.record_success();

	assert_eq!(breaker.state(), CircuitState::HalfOpen);

	breaker.try_acquire().expect("Second probe is admitted.").record_success();

	assert_eq!(breaker.state(), CircuitState::Closed);
	assert_eq!(breaker.status().failure_count, 0);
}

#[tokio::test]
async fn any_half_open_failure_reopens_regardless_of_successes() {
	let clock = fixture_clock();
	let breaker = Arc::new(CircuitBreaker::new(
		Operation::GoogleSearch,
		CircuitConfig::new(1, Duration::seconds(60), 5, 5),
		clock.clone(),
	));

	breaker.try_acquire().expect("Closed breaker admits.").record_failure();
	clock.advance(Duration::seconds(60));

	for _ in 0..4 {
		breaker.try_acquire().expect("Half-open breaker admits probes.").record_success();
	}

	assert_eq!(breaker.state(), CircuitState::HalfOpen);

	breaker.try_acquire().expect("Half-open breaker admits probes.").record_failure();

	let status = breaker.status();

	assert_eq!(status.state, CircuitState::Open);
	assert_eq!(status.last_failure_at, Some(FIXTURE_START + Duration::seconds(60)));
	assert_eq!(status.cooldown_seconds, 60);

	let rejection = breaker.try_acquire().expect_err("Reopened breaker rejects.");

	assert_eq!(rejection.retry_after, Some(Duration::seconds(60)));
}

#[tokio::test]
async fn any_threshold_opens_after_exactly_that_many_failures() {
	for threshold in [1_u32, 2, 5, 10] {
		let clock = fixture_clock();
		let breaker = Arc::new(CircuitBreaker::new(
			Operation::KnowledgeGraph,
			CircuitConfig::new(threshold, Duration::seconds(30), 1, 1),
			clock,
		));

		for _ in 1..threshold {
			let _ = breaker.guard(|| async { failing() }).await;
		}

		assert_eq!(breaker.state(), CircuitState::Closed, "threshold {threshold}");

		let _ = breaker.guard(|| async { failing() }).await;

		assert_eq!(breaker.state(), CircuitState::Open, "threshold {threshold}");

		let mut ran = false;
		let next = breaker
			.guard(|| {
				ran = true;

				async { Ok::<_, Error>(()) }
			})
			.await
			.expect("Rejections are not errors.");

		assert!(matches!(next, Guarded::Downgraded(_)));
		assert!(!ran);
	}
}
