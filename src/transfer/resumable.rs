//! Resumable-upload HTTP protocol over reqwest.
//!
//! `open` POSTs the artifact metadata and reads the session URI from `Location`. Each chunk
//! is a `PUT` with `Content-Range`; `308` plus `Range: bytes=0-n` acknowledges `n + 1` bytes
//! and `200`/`201` completes with the artifact `id`.

// crates.io
use reqwest::{
	Response, StatusCode,
	header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE},
	redirect::Policy,
};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	clock::Clock,
	error::{ConfigError, TransientError, TransportError},
	http::{self, StatusClass},
	transfer::{ChunkAck, ChunkRequest, ChunkTransport, TransferFuture},
};

const UPLOAD_CONTENT_LENGTH: &str = "x-upload-content-length";
const UPLOAD_CONTENT_TYPE: &str = "x-upload-content-type";

#[derive(Deserialize)]
struct CompletedUpload {
	id: String,
}

/// Resumable-upload client for one artifact.
#[derive(Clone)]
pub struct ResumableUploadClient {
	http: ReqwestClient,
	initiate_url: Url,
	metadata: serde_json::Value,
	content_type: String,
	clock: Arc<dyn Clock>,
}
impl ResumableUploadClient {
	/// Creates a client posting `metadata` to `initiate_url` (which carries any
	/// `uploadType=resumable` style query parameters).
	///
	/// Redirects are disabled so `308` chunk acknowledgments reach the caller.
	pub fn new(
		initiate_url: Url,
		metadata: serde_json::Value,
		content_type: impl Into<String>,
		clock: Arc<dyn Clock>,
	) -> Result<Self, ConfigError> {
		let http = ReqwestClient::builder().redirect(Policy::none()).build()?;

		Ok(Self::with_client(http, initiate_url, metadata, content_type, clock))
	}

	/// Uses a caller-supplied client; it must not follow redirects.
	pub fn with_client(
		http: ReqwestClient,
		initiate_url: Url,
		metadata: serde_json::Value,
		content_type: impl Into<String>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self { http, initiate_url, metadata, content_type: content_type.into(), clock }
	}

	async fn open_session(&self, total: u64, access_token: &TokenSecret) -> Result<String> {
		let response = self
			.http
			.post(self.initiate_url.clone())
			.header(AUTHORIZATION, format!("Bearer {}", access_token.expose()))
			.header(CONTENT_TYPE, "application/json; charset=UTF-8")
			.header(UPLOAD_CONTENT_LENGTH, total)
			.header(UPLOAD_CONTENT_TYPE, &self.content_type)
			.body(self.metadata.to_string())
			.send()
			.await
			.map_err(TransportError::from)?;
		let status = response.status();

		if StatusClass::of(status.as_u16()) != StatusClass::Success {
			return Err(self.failure(response).await);
		}

		response
			.headers()
			.get(LOCATION)
			.and_then(|value| value.to_str().ok())
			.map(str::to_owned)
			.ok_or_else(|| Error::PermanentUpstream {
				status: Some(status.as_u16()),
				message: "session initiation response is missing Location".into(),
			})
	}

	async fn put_chunk(&self, session: &str, request: ChunkRequest<'_>) -> Result<ChunkAck> {
		let response = self
			.http
			.put(session)
			.header(AUTHORIZATION, format!("Bearer {}", request.access_token.expose()))
			.header(CONTENT_RANGE, request.content_range())
			.body(request.bytes.to_vec())
			.send()
			.await
			.map_err(TransportError::from)?;
		let status = response.status();

		if status == StatusCode::PERMANENT_REDIRECT {
			let acknowledged = response
				.headers()
				.get(RANGE)
				.and_then(|value| value.to_str().ok())
				.and_then(parse_range_end)
				.map_or(0, |last| last + 1);

			return Ok(ChunkAck::Partial { acknowledged });
		}
		if StatusClass::of(status.as_u16()) != StatusClass::Success {
			return Err(self.failure(response).await);
		}

		let body = response.bytes().await.map_err(TransportError::from)?;
		let completed =
			serde_json::from_slice::<CompletedUpload>(&body).map_err(|e| Error::PermanentUpstream {
				status: Some(status.as_u16()),
				message: format!("completed upload response has no id: {e}"),
			})?;

		Ok(ChunkAck::Complete { id: completed.id })
	}

	async fn failure(&self, response: Response) -> Error {
		let status = response.status().as_u16();
		let retry_after = http::parse_retry_after(response.headers(), self.clock.now());
		let body = response.text().await.unwrap_or_default();
		let message = if body.is_empty() { format!("status {status}") } else { body };

		match StatusClass::of(status) {
			StatusClass::Retryable =>
				TransientError::Upstream { message, status: Some(status), retry_after }.into(),
			_ => Error::PermanentUpstream { status: Some(status), message },
		}
	}
}
impl Debug for ResumableUploadClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResumableUploadClient")
			.field("initiate_url", &self.initiate_url.as_str())
			.field("content_type", &self.content_type)
			.finish()
	}
}
impl ChunkTransport for ResumableUploadClient {
	fn open<'a>(&'a self, total: u64, access_token: &'a TokenSecret) -> TransferFuture<'a, String> {
		Box::pin(self.open_session(total, access_token))
	}

	fn send_chunk<'a>(
		&'a self,
		session: &'a str,
		request: ChunkRequest<'a>,
	) -> TransferFuture<'a, ChunkAck> {
		Box::pin(self.put_chunk(session, request))
	}
}

// `bytes=0-n` -> `n`.
fn parse_range_end(raw: &str) -> Option<u64> {
	let (_, last) = raw.trim().strip_prefix("bytes=")?.split_once('-')?;

	last.trim().parse().ok()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn range_header_reports_last_byte() {
		assert_eq!(parse_range_end("bytes=0-524287"), Some(524_287));
		assert_eq!(parse_range_end(" bytes=0-0 "), Some(0));
		assert_eq!(parse_range_end("0-10"), None);
		assert_eq!(parse_range_end("bytes=0-"), None);
	}
}
