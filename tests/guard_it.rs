// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// self
use upstream_guard::{
	_preludet::*,
	auth::{CredentialKey, TokenSecret},
	catalog::{Api, Operation, Service},
	circuit::{CircuitConfig, CircuitState},
	clock::ManualClock,
	config::GatewayConfig,
	credentials::HeadlessAuthorizer,
	error::{Error, TransientError},
	guard::{CallDescriptor, CallGuard, GuardStatus, OverallHealth},
	quota::QuotaLimit,
	store::MemoryStore,
	transfer::{
		ChunkAck, ChunkRequest, ChunkTransport, MemorySource, TransferCoordinator, TransferFuture,
		UploadRequest,
	},
};

fn guard(clock: Arc<ManualClock>, config: &GatewayConfig) -> CallGuard {
	let refresher = Arc::new(CountingRefresher::stamped_by(clock.clone(), Duration::hours(1)));

	CallGuard::from_config(
		config,
		Arc::new(MemoryStore::default()),
		refresher,
		Arc::new(HeadlessAuthorizer),
		clock,
	)
	.expect("Guard config fixture should be valid.")
}

fn upstream_503() -> Error {
	TransientError::Upstream { message: "backend unavailable".into(), status: Some(503), retry_after: None }
		.into()
}

#[tokio::test]
async fn open_circuit_downgrades_without_running_the_call() {
	let clock = fixture_clock();
	let mut config = GatewayConfig::default();

	config
		.circuits
		.insert(Operation::GoogleSearch, CircuitConfig::new(2, Duration::seconds(60), 1, 1));

	let guard = guard(clock.clone(), &config);
	let call = CallDescriptor::new(Operation::GoogleSearch).with_quota(Api::Search);

	for _ in 0..2 {
		let result = guard.execute(call.clone(), |_| async { Err::<(), _>(upstream_503()) }).await;

		assert_eq!(result.status, GuardStatus::Error);
		assert_eq!(result.error_kind, Some("transient_network"));
	}

	let invoked = AtomicUsize::new(0);
	let result = guard
		.execute(call, |_| async {
			invoked.fetch_add(1, Ordering::SeqCst);

			Ok(())
		})
		.await;

	assert_eq!(invoked.load(Ordering::SeqCst), 0);
	assert_eq!(result.status, GuardStatus::Downgraded);
	assert_eq!(result.error_kind, Some("circuit_open"));
	assert_eq!(result.retry_after, Some(Duration::seconds(60)));
	assert_eq!(result.message.as_deref(), Some("Circuit `google_search` is open; retry in 60s."));
	assert_eq!(guard.limiter().remaining(Api::Search), Some(10_000 - 2));
}

#[tokio::test]
async fn exhausted_quota_downgrades_with_reset_hint() {
	let clock = fixture_clock();
	let mut config = GatewayConfig::default();

	config.quotas.insert(Api::Trends, QuotaLimit::new(2, 10));

	let guard = guard(clock.clone(), &config);
	let call = CallDescriptor::new(Operation::GoogleTrends).with_quota(Api::Trends);

	for expected in 1..=2 {
		let result = guard.execute(call.clone(), |_| async move { Ok(expected) }).await;

		assert_eq!(result.into_value(), Some(expected));
	}

	let result = guard.execute(call, |_| async { Ok(3) }).await;

	assert!(!result.ok);
	assert_eq!(result.status, GuardStatus::Downgraded);
	assert_eq!(result.error_kind, Some("quota_exceeded"));
	assert_eq!(result.retry_after, Some(Duration::hours(24)));

	let breaker = guard.circuits().get(Operation::GoogleTrends);

	assert_eq!(breaker.state(), CircuitState::Closed);
	assert_eq!(breaker.status().failure_count, 0);
}

#[tokio::test]
async fn credential_failures_do_not_trip_the_circuit() {
	let clock = fixture_clock();
	let mut config = GatewayConfig::default();

	config
		.circuits
		.insert(Operation::YoutubeAnalytics, CircuitConfig::new(1, Duration::seconds(300), 1, 1));

	let guard = guard(clock, &config);
	let call = CallDescriptor::new(Operation::YoutubeAnalytics)
		.with_quota(Api::YoutubeAnalytics)
		.with_credential(fixture_key(Service::YoutubeAnalytics, Some("UCnever")));

	for _ in 0..3 {
		let result = guard.execute(call.clone(), |_| async { Ok(()) }).await;

		assert_eq!(result.status, GuardStatus::Error);
		assert_eq!(result.error_kind, Some("auth"));
	}

	assert_eq!(guard.circuits().get(Operation::YoutubeAnalytics).state(), CircuitState::Closed);
}

#[tokio::test]
async fn acquired_credential_is_handed_to_the_call() -> color_eyre::Result<()> {
	let clock = fixture_clock();
	let guard = guard(clock, &GatewayConfig::default());
	let key = fixture_key(Service::YoutubeAnalytics, Some("UCstats"));

	guard
		.credentials()
		.install(fixture_record(key.clone(), FIXTURE_START, Duration::hours(1), "stats-token"))
		.await?;

	let call = CallDescriptor::new(Operation::YoutubeAnalytics)
		.with_quota(Api::YoutubeAnalytics)
		.with_credential(key);
	let result = guard
		.execute(call, |record| async move {
			Ok(record.map(|record| record.access_token.expose().to_owned()))
		})
		.await;

	assert_eq!(result.status, GuardStatus::Ok);
	assert_eq!(result.into_value().flatten().as_deref(), Some("stats-token"));

	Ok(())
}

#[tokio::test]
async fn system_status_lists_every_degradation() {
	let clock = fixture_clock();
	let tracked = fixture_key(Service::Search, None);
	let mut config = GatewayConfig::default();

	config.quotas.insert(Api::KnowledgeGraph, QuotaLimit::new(1, 1));
	config
		.circuits
		.insert(Operation::GoogleSearch, CircuitConfig::new(1, Duration::seconds(180), 1, 1));
	config.tracked_credentials.push(tracked.clone());

	let guard = guard(clock.clone(), &config);
	let healthy = guard.system_status();

	assert_eq!(healthy.overall_health, OverallHealth::Healthy);
	assert!(healthy.issues.is_empty());
	assert_eq!(healthy.circuits.len(), Operation::ALL.len());
	assert_eq!(healthy.quotas.len(), Api::ALL.len());
	assert_eq!(healthy.credentials.len(), 1);
	assert_eq!(healthy.credentials[0].key, tracked);

	let _ = guard
		.execute(CallDescriptor::new(Operation::GoogleSearch), |_| async { Err::<(), _>(upstream_503()) })
		.await;
	let _ = guard
		.execute(
			CallDescriptor::new(Operation::KnowledgeGraph).with_quota(Api::KnowledgeGraph),
			|_| async { Ok(()) },
		)
		.await;

	clock.advance(Duration::seconds(60));

	let degraded = guard.system_status();

	assert_eq!(degraded.overall_health, OverallHealth::Degraded);
	assert_eq!(degraded.timestamp, FIXTURE_START + Duration::seconds(60));
	assert_eq!(degraded.issues, vec![
		"Circuit `google_search` is open; recovery in 120s.".to_owned(),
		"Daily quota for `knowledge_graph` is exhausted.".to_owned(),
	]);

	let json = serde_json::to_value(&degraded).expect("System status should serialize.");

	assert_eq!(json["overall_health"], "degraded");
}

struct FixedTransport {
	fail: bool,
	opened: AtomicUsize,
}
impl ChunkTransport for FixedTransport {
	fn open<'a>(&'a self, _: u64, _: &'a TokenSecret) -> TransferFuture<'a, String> {
		self.opened.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			if self.fail {
				return Err(Error::PermanentUpstream {
					status: Some(400),
					message: "invalid metadata".into(),
				});
			}

			Ok("session".to_owned())
		})
	}

	fn send_chunk<'a>(&'a self, _: &'a str, _: ChunkRequest<'a>) -> TransferFuture<'a, ChunkAck> {
		Box::pin(async { Ok(ChunkAck::Complete { id: "vid-1".into() }) })
	}
}

async fn uploader(
	guard: &CallGuard,
	clock: Arc<ManualClock>,
	fail: bool,
) -> (CredentialKey, Arc<FixedTransport>, TransferCoordinator) {
	let key = fixture_key(Service::Youtube, Some("UCuploads"));

	guard
		.credentials()
		.install(fixture_record(key.clone(), FIXTURE_START, Duration::hours(4), "upload-token"))
		.await
		.expect("Installing the upload credential should succeed.");

	let transport = Arc::new(FixedTransport { fail, opened: AtomicUsize::new(0) });
	let coordinator = TransferCoordinator::new(
		guard.credentials().clone(),
		transport.clone(),
		clock,
		Default::default(),
	)
	.expect("Default transfer config should be valid.");

	(key, transport, coordinator)
}

#[tokio::test]
async fn uploads_consume_quota_and_report_to_the_upload_circuit() {
	let clock = fixture_clock();
	let guard = guard(clock.clone(), &GatewayConfig::default());
	let (key, _, coordinator) = uploader(&guard, clock, false).await;
	let source = Arc::new(MemorySource::new("clip.mp4", vec![7_u8; 32]));
	let result = guard.upload(&coordinator, UploadRequest::new(key, source)).await;

	assert_eq!(result.status, GuardStatus::Ok);
	assert_eq!(result.into_value().map(|report| report.id).as_deref(), Some("vid-1"));
	assert_eq!(guard.limiter().remaining(Api::YoutubeUpload), Some(49));
}

#[tokio::test]
async fn failed_uploads_open_the_upload_circuit() {
	let clock = fixture_clock();
	let mut config = GatewayConfig::default();

	config
		.circuits
		.insert(Operation::YoutubeUpload, CircuitConfig::new(1, Duration::seconds(600), 1, 1));

	let guard = guard(clock.clone(), &config);
	let (key, transport, coordinator) = uploader(&guard, clock, true).await;
	let source = Arc::new(MemorySource::new("clip.mp4", vec![7_u8; 32]));
	let failed = guard.upload(&coordinator, UploadRequest::new(key.clone(), source.clone())).await;

	assert_eq!(failed.status, GuardStatus::Error);
	assert_eq!(failed.error_kind, Some("upload_failed"));
	assert_eq!(guard.circuits().get(Operation::YoutubeUpload).state(), CircuitState::Open);

	let rejected = guard.upload(&coordinator, UploadRequest::new(key, source)).await;

	assert_eq!(rejected.status, GuardStatus::Downgraded);
	assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
}
