//! Resumable chunked-upload coordinator.
//!
//! The coordinator sizes the credential for the whole transfer before the first byte moves,
//! then sends the source as sequential chunks. Progress only advances on a server
//! acknowledgment; a transient failure retries the same unacknowledged chunk with doubling
//! backoff, and anything else aborts the transfer.

pub mod source;
#[cfg(feature = "reqwest")] pub mod resumable;

#[cfg(feature = "reqwest")] pub use resumable::*;
pub use source::*;

// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, TokenSecret},
	clock::Clock,
	config::{millis, secs},
	credentials::CredentialManager,
	error::{ConfigError, TransientError},
	obs::{self, CallSpan, Component, Outcome},
};

/// Boxed future returned by [`ChunkTransport`] methods.
pub type TransferFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

const MIB: u64 = 1024 * 1024;
// Estimates are capped at one week.
const MAX_ESTIMATE_SECS: u64 = 7 * 24 * 60 * 60;

/// Chunking, retry, and duration-estimate tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
	/// Bytes per chunk.
	#[serde(rename = "chunk_size_bytes")]
	pub chunk_size: u64,
	/// Retries allowed for one chunk before the transfer fails.
	pub max_retries: u32,
	/// Delay before the first retry; doubles per consecutive failure.
	#[serde(rename = "base_delay_ms", with = "millis")]
	pub base_delay: Duration,
	/// Backoff ceiling; a longer upstream `Retry-After` aborts the transfer.
	#[serde(rename = "max_delay_ms", with = "millis")]
	pub max_delay: Duration,
	/// Throughput assumed when estimating the transfer duration.
	#[serde(rename = "assumed_throughput_bytes_per_sec")]
	pub assumed_throughput: u64,
	/// Floor for the duration estimate.
	#[serde(rename = "minimum_estimate_secs", with = "secs")]
	pub minimum_estimate: Duration,
}
impl TransferConfig {
	/// Rejects zero or inverted values.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let invalid = |field: &str, reason| {
			Err(ConfigError::InvalidValue { field: format!("transfer.{field}"), reason })
		};

		if self.chunk_size == 0 {
			return invalid("chunk_size_bytes", "must be at least 1");
		}
		if self.assumed_throughput == 0 {
			return invalid("assumed_throughput_bytes_per_sec", "must be at least 1");
		}
		if self.base_delay.is_negative() || self.base_delay > self.max_delay {
			return invalid("base_delay_ms", "must satisfy 0 <= base_delay <= max_delay");
		}
		if self.minimum_estimate.is_negative() {
			return invalid("minimum_estimate_secs", "must not be negative");
		}

		Ok(())
	}

	/// Expected wall time for `total` bytes at the assumed throughput.
	pub fn estimate_duration(&self, total: u64) -> Duration {
		let secs = total.div_ceil(self.assumed_throughput.max(1)).min(MAX_ESTIMATE_SECS);

		Duration::seconds(secs as i64).max(self.minimum_estimate)
	}

	/// Delay before retry number `failures` (1-based), never shorter than `hint`.
	///
	/// Returns `None` when `hint` exceeds `max_delay`; the transfer is not held open that long.
	pub fn backoff(&self, failures: u32, hint: Option<Duration>) -> Option<Duration> {
		let exponent = failures.saturating_sub(1).min(30);
		let delay = self.base_delay.saturating_mul(1_i32 << exponent).min(self.max_delay);

		match hint {
			Some(hint) if hint > self.max_delay => None,
			Some(hint) => Some(delay.max(hint)),
			None => Some(delay),
		}
	}
}
impl Default for TransferConfig {
	fn default() -> Self {
		Self {
			chunk_size: 10 * MIB,
			max_retries: 10,
			base_delay: Duration::seconds(1),
			max_delay: Duration::seconds(64),
			assumed_throughput: MIB,
			minimum_estimate: Duration::minutes(30),
		}
	}
}

/// One chunk handed to the transport.
#[derive(Debug)]
pub struct ChunkRequest<'a> {
	/// Offset of the first byte.
	pub offset: u64,
	/// Total transfer size.
	pub total: u64,
	/// Chunk payload.
	pub bytes: &'a [u8],
	/// Bearer token sized for the whole transfer.
	pub access_token: &'a TokenSecret,
}
impl ChunkRequest<'_> {
	/// Offset one past the last byte of the chunk.
	pub fn end(&self) -> u64 {
		self.offset + self.bytes.len() as u64
	}

	/// `Content-Range` value (`bytes a-b/total`, or `bytes */total` for a status query).
	pub fn content_range(&self) -> String {
		if self.bytes.is_empty() {
			format!("bytes */{}", self.total)
		} else {
			format!("bytes {}-{}/{}", self.offset, self.end() - 1, self.total)
		}
	}
}

/// Server response to a chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkAck {
	/// Server holds the first `acknowledged` bytes.
	Partial {
		/// Bytes confirmed so far.
		acknowledged: u64,
	},
	/// Transfer finished and produced an artifact.
	Complete {
		/// Artifact identifier reported by the server.
		id: String,
	},
}

/// Upload protocol seam.
pub trait ChunkTransport
where
	Self: Send + Sync,
{
	/// Opens an upload session for `total` bytes, returning its locator.
	fn open<'a>(&'a self, total: u64, access_token: &'a TokenSecret) -> TransferFuture<'a, String>;

	/// Sends one chunk to the session at `session`.
	fn send_chunk<'a>(
		&'a self,
		session: &'a str,
		request: ChunkRequest<'a>,
	) -> TransferFuture<'a, ChunkAck>;
}

/// Upload to perform.
#[derive(Clone)]
pub struct UploadRequest {
	/// Credential authorizing the upload.
	pub credential: CredentialKey,
	/// Artifact to send.
	pub source: Arc<dyn TransferSource>,
	/// Chunk size override.
	pub chunk_size: Option<u64>,
}
impl UploadRequest {
	/// Creates a request using the configured chunk size.
	pub fn new(credential: CredentialKey, source: Arc<dyn TransferSource>) -> Self {
		Self { credential, source, chunk_size: None }
	}

	/// Overrides the chunk size.
	pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
		self.chunk_size = Some(chunk_size);

		self
	}
}
impl Debug for UploadRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("UploadRequest")
			.field("credential", &self.credential)
			.field("source", &self.source.describe())
			.field("chunk_size", &self.chunk_size)
			.finish()
	}
}

/// Progress of one transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSession {
	/// Source reference.
	pub source: String,
	/// Total bytes to send.
	pub total_size: u64,
	/// Bytes confirmed by the server.
	pub bytes_acknowledged: u64,
	/// Bytes per chunk.
	pub chunk_size: u64,
	/// Retries performed across the transfer.
	pub retry_count: u32,
	/// Artifact identifier once complete.
	pub result_id: Option<String>,
}
impl TransferSession {
	/// Returns `true` once the server reported an artifact.
	pub fn is_complete(&self) -> bool {
		self.result_id.is_some()
	}
}

/// Successful transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
	/// Artifact identifier.
	pub id: String,
	/// Final session state.
	pub session: TransferSession,
	/// Chunk requests issued, retries included.
	pub chunks_sent: u32,
	/// Wall time measured by the injected clock.
	pub elapsed: Duration,
}

enum Step {
	Opened(String),
	Acked { ack: ChunkAck, sent_end: u64 },
}

/// Drives uploads through a [`ChunkTransport`].
pub struct TransferCoordinator {
	credentials: Arc<CredentialManager>,
	transport: Arc<dyn ChunkTransport>,
	clock: Arc<dyn Clock>,
	config: TransferConfig,
}
impl TransferCoordinator {
	/// Creates a coordinator after validating `config`.
	pub fn new(
		credentials: Arc<CredentialManager>,
		transport: Arc<dyn ChunkTransport>,
		clock: Arc<dyn Clock>,
		config: TransferConfig,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		Ok(Self { credentials, transport, clock, config })
	}

	/// Active tuning.
	pub fn config(&self) -> TransferConfig {
		self.config
	}

	/// Uploads `request.source`, returning the server's artifact identifier.
	///
	/// Credential errors surface as-is before any byte is sent. Chunk failures surface as
	/// [`Error::UploadFailed`] carrying the final cause.
	pub async fn upload(&self, request: UploadRequest) -> Result<TransferReport> {
		let span = CallSpan::new(Component::Transfer, "upload");

		span.instrument(self.upload_inner(request)).await
	}

	async fn upload_inner(&self, request: UploadRequest) -> Result<TransferReport> {
		let started = self.clock.now();
		let total = request.source.size();
		let chunk_size = request.chunk_size.unwrap_or(self.config.chunk_size);

		if chunk_size == 0 {
			return Err(ConfigError::InvalidValue {
				field: "chunk_size".into(),
				reason: "must be at least 1",
			}
			.into());
		}

		let estimate = self.config.estimate_duration(total);
		let record =
			self.credentials.ensure_valid_for_operation(&request.credential, estimate).await?;
		let mut session = TransferSession {
			source: request.source.describe(),
			total_size: total,
			bytes_acknowledged: 0,
			chunk_size,
			retry_count: 0,
			result_id: None,
		};
		let mut locator = None::<String>;
		let mut failures = 0_u32;
		let mut chunks_sent = 0_u32;

		tracing::info!(
			source = %session.source,
			total_bytes = total,
			chunk_size,
			estimate_secs = estimate.whole_seconds(),
			"Starting resumable upload."
		);
		obs::record_outcome(Component::Transfer, Outcome::Attempt);

		loop {
			let step = match locator.as_deref() {
				None => self.transport.open(total, &record.access_token).await.map(Step::Opened),
				Some(uri) => {
					let offset = session.bytes_acknowledged;
					let len = chunk_size.min(total - offset);
					let bytes = request.source.read_chunk(offset, len).await.map_err(Error::Source)?;

					chunks_sent += 1;

					self.transport
						.send_chunk(uri, ChunkRequest {
							offset,
							total,
							bytes: &bytes,
							access_token: &record.access_token,
						})
						.await
						.map(|ack| Step::Acked { ack, sent_end: offset + len })
				},
			};
			let failure = match step {
				Ok(Step::Opened(uri)) => {
					tracing::debug!(source = %session.source, "Upload session opened.");

					locator = Some(uri);
					failures = 0;

					continue;
				},
				Ok(Step::Acked { ack: ChunkAck::Complete { id }, .. }) => {
					session.bytes_acknowledged = total;
					session.result_id = Some(id.clone());

					tracing::info!(
						source = %session.source,
						id = %id,
						retries = session.retry_count,
						"Upload complete."
					);
					obs::record_outcome(Component::Transfer, Outcome::Success);

					return Ok(TransferReport {
						id,
						session,
						chunks_sent,
						elapsed: self.clock.now() - started,
					});
				},
				Ok(Step::Acked { ack: ChunkAck::Partial { acknowledged }, sent_end }) => {
					if acknowledged > sent_end {
						let cause = Error::PermanentUpstream {
							status: None,
							message: format!(
								"server acknowledged {acknowledged} bytes but only {sent_end} were sent"
							),
						};

						return Err(self.abort(&session, failures + 1, cause));
					}
					if acknowledged > session.bytes_acknowledged {
						tracing::debug!(
							source = %session.source,
							acknowledged,
							total,
							"Chunk acknowledged."
						);

						session.bytes_acknowledged = acknowledged;
						failures = 0;

						continue;
					}

					Error::from(TransientError::Upstream {
						message: format!("chunk at offset {} made no progress", session.bytes_acknowledged),
						status: None,
						retry_after: None,
					})
				},
				Err(e) if e.is_retryable() => e,
				Err(e) => return Err(self.abort(&session, failures + 1, e)),
			};

			failures += 1;

			if failures > self.config.max_retries {
				return Err(self.abort(&session, failures, failure));
			}

			let Some(delay) = self.config.backoff(failures, failure.retry_after()) else {
				tracing::warn!(
					source = %session.source,
					retry_after_secs = failure.retry_after().map(|hint| hint.whole_seconds()),
					max_delay_secs = self.config.max_delay.whole_seconds(),
					"Upstream asked for a longer pause than the backoff ceiling; aborting."
				);

				return Err(self.abort(&session, failures, failure));
			};

			session.retry_count += 1;

			tracing::warn!(
				source = %session.source,
				offset = session.bytes_acknowledged,
				attempt = failures,
				delay_ms = delay.whole_milliseconds() as i64,
				error = %failure,
				"Chunk failed; retrying."
			);
			self.clock.sleep(delay).await;
		}
	}

	fn abort(&self, session: &TransferSession, attempts: u32, cause: Error) -> Error {
		tracing::error!(
			source = %session.source,
			bytes_acknowledged = session.bytes_acknowledged,
			attempts,
			error = %cause,
			"Upload failed."
		);
		obs::record_outcome(Component::Transfer, Outcome::Failure);

		Error::UploadFailed {
			bytes_acknowledged: session.bytes_acknowledged,
			attempts,
			source: Box::new(cause),
		}
	}
}
impl Debug for TransferCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TransferCoordinator").field("config", &self.config).finish()
	}
}
