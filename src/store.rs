//! Storage contracts and built-in store implementations for credential records.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialRecord},
};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable storage contract for per-(service, account) credential records.
///
/// Records are replaced on every mutation and never deleted; revocation only stamps the
/// record.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the record stored under `record.key`.
	fn save(&self, record: CredentialRecord) -> StoreFuture<'_, ()>;

	/// Fetches the record associated with the key, if present.
	fn fetch<'a>(&'a self, key: &'a CredentialKey) -> StoreFuture<'a, Option<CredentialRecord>>;

	/// Marks a record as revoked at the provided instant and returns the updated record.
	fn revoke<'a>(
		&'a self,
		key: &'a CredentialKey,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<CredentialRecord>>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
