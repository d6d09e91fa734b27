// self
use upstream_guard::{
	_preludet::*,
	catalog::{Api, Operation, Service},
	circuit::CircuitState,
	config::GatewayConfig,
	credentials::HeadlessAuthorizer,
	error::ConfigError,
	guard::CallGuard,
	store::CredentialStore,
};

#[test]
fn config_file_overrides_merge_with_defaults() -> color_eyre::Result<()> {
	let dir = fixture_temp_path("config");

	std::fs::create_dir_all(&dir)?;

	let path = dir.join("gateway.json");

	std::fs::write(
		&path,
		r#"{
			"credentials_dir": "/var/lib/gateway/credentials",
			"preemptive_refresh_secs": 900,
			"quotas": { "youtube_upload": { "requests_per_day": 20, "requests_per_minute": 2 } },
			"circuits": {
				"google_search": {
					"failure_threshold": 4,
					"recovery_timeout_secs": 45,
					"half_open_max_requests": 1,
					"success_threshold": 1
				}
			},
			"transfer": { "chunk_size_bytes": 262144, "max_retries": 4 },
			"tracked_credentials": [{ "service": "youtube", "account": "UCmain" }]
		}"#,
	)?;

	let config = GatewayConfig::from_path(&path)?;

	assert_eq!(config.preemptive_refresh, Duration::minutes(15));
	assert_eq!(config.quota_for(Api::YoutubeUpload).requests_per_day, 20);
	assert_eq!(config.quota_for(Api::Search), Api::Search.default_quota());
	assert_eq!(config.transfer.chunk_size, 262_144);
	assert_eq!(config.transfer.max_retries, 4);
	assert_eq!(config.transfer.base_delay, Duration::seconds(1));
	assert_eq!(config.tracked_credentials, vec![fixture_key(Service::Youtube, Some("UCmain"))]);

	let breakers = config.build_circuits(fixture_clock())?;

	assert_eq!(breakers.get(Operation::GoogleSearch).config().failure_threshold, 4);
	assert_eq!(
		breakers.get(Operation::YoutubeUpload).config(),
		Operation::YoutubeUpload.default_circuit()
	);

	std::fs::remove_dir_all(&dir)?;

	Ok(())
}

#[test]
fn invalid_documents_report_the_offending_field() {
	let err = GatewayConfig::from_json_str(r#"{ "quotas": { "trends": { "requests_per_day": "lots" } } }"#)
		.expect_err("A string quota must be rejected.");

	assert!(matches!(&err, ConfigError::Parse { path, .. } if path.starts_with("quotas.trends")));

	let err = GatewayConfig::from_json_str(
		r#"{ "circuits": { "knowledge_graph": { "failure_threshold": 0, "recovery_timeout_secs": 10, "half_open_max_requests": 1, "success_threshold": 1 } } }"#,
	)
	.expect_err("A zero failure threshold must be rejected.");

	assert!(matches!(
		&err,
		ConfigError::InvalidValue { field, .. } if field == "circuits.knowledge_graph.failure_threshold"
	));
	assert!(matches!(
		GatewayConfig::from_path(fixture_temp_path("missing").join("gateway.json")),
		Err(ConfigError::Io(_))
	));
}

#[tokio::test]
async fn file_store_and_guard_build_from_one_document() -> color_eyre::Result<()> {
	let dir = fixture_temp_path("store");
	let config = GatewayConfig { credentials_dir: dir.join("nested"), ..GatewayConfig::default() };
	let store = Arc::new(config.open_file_store()?);

	assert!(dir.join("nested").is_dir());

	let clock = fixture_clock();
	let key = fixture_key(Service::YoutubeAnalytics, Some("UCfile"));

	store
		.save(fixture_record(key.clone(), FIXTURE_START, Duration::hours(2), "from-disk"))
		.await?;

	let refresher = Arc::new(CountingRefresher::stamped_by(clock.clone(), Duration::hours(1)));
	let guard =
		CallGuard::from_config(&config, store, refresher.clone(), Arc::new(HeadlessAuthorizer), clock)?;
	let record = guard.credentials().acquire(&key, Duration::minutes(10)).await?;

	assert_eq!(record.access_token.expose(), "from-disk");
	assert_eq!(refresher.calls(), 0);
	assert_eq!(guard.circuits().get(Operation::YoutubeAnalytics).state(), CircuitState::Closed);
	assert_eq!(guard.limiter().remaining(Api::YoutubeAnalytics), Some(10_000));

	std::fs::remove_dir_all(&dir)?;

	Ok(())
}
