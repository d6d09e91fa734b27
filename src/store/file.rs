//! Directory-backed [`CredentialStore`] writing one JSON document per credential.

// std
use std::{
	fs::{self, File},
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialRecord},
	store::{CredentialStore, StoreError, StoreFuture},
};

/// Persists each record to `<dir>/token_<service>[_<account>].json` after every mutation.
///
/// Writes go through a temporary file that is synced and renamed over the target, so a crash
/// never leaves a truncated credential behind.
#[derive(Clone, Debug)]
pub struct FileStore {
	dir: PathBuf,
	write_lock: Arc<Mutex<()>>,
}
impl FileStore {
	/// Opens (or creates) a store rooted at `dir`.
	pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let dir = dir.into();

		fs::create_dir_all(&dir).map_err(|e| StoreError::Backend {
			message: format!("Failed to create store directory {}: {e}", dir.display()),
		})?;

		Ok(Self { dir, write_lock: Arc::new(Mutex::new(())) })
	}

	/// Directory holding the credential documents.
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Path of the document backing `key`.
	pub fn path_for(&self, key: &CredentialKey) -> PathBuf {
		self.dir.join(format!("{}.json", key.file_stem()))
	}

	fn load(path: &Path) -> Result<Option<CredentialRecord>, StoreError> {
		let bytes = match fs::read(path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) =>
				return Err(StoreError::Backend {
					message: format!("Failed to read {}: {e}", path.display()),
				}),
		};

		if bytes.is_empty() {
			return Ok(None);
		}

		let mut de = serde_json::Deserializer::from_slice(&bytes);
		let record = serde_path_to_error::deserialize(&mut de).map_err(|e| {
			StoreError::Serialization {
				message: format!("Failed to parse {} at `{}`: {}", path.display(), e.path(), e.inner()),
			}
		})?;

		Ok(Some(record))
	}

	fn persist(&self, record: &CredentialRecord) -> Result<(), StoreError> {
		let path = self.path_for(&record.key);
		let serialized =
			serde_json::to_vec_pretty(record).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize credential {}: {e}", record.key),
			})?;
		let mut tmp_path = path.clone();

		tmp_path.set_extension("json.tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", path.display()),
		})
	}
}
impl CredentialStore for FileStore {
	fn save(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let _guard = self.write_lock.lock();

			self.persist(&record)
		})
	}

	fn fetch<'a>(&'a self, key: &'a CredentialKey) -> StoreFuture<'a, Option<CredentialRecord>> {
		Box::pin(async move { Self::load(&self.path_for(key)) })
	}

	fn revoke<'a>(
		&'a self,
		key: &'a CredentialKey,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<CredentialRecord>> {
		Box::pin(async move {
			let _guard = self.write_lock.lock();
			let Some(mut record) = Self::load(&self.path_for(key))? else {
				return Ok(None);
			};

			record.revoke(instant);
			self.persist(&record)?;

			Ok(Some(record))
		})
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{_preludet::*, catalog::Service};

	fn temp_dir(label: &str) -> PathBuf {
		let unique = format!(
			"upstream_guard_file_store_{label}_{}_{}",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[tokio::test]
	async fn save_and_reopen_round_trip() {
		let dir = temp_dir("reopen");
		let store = FileStore::open(&dir).expect("Failed to open file store directory.");
		let key = fixture_key(Service::Youtube, Some("UC7"));
		let record =
			fixture_record(key.clone(), macros::datetime!(2025-01-01 00:00 UTC), Duration::hours(1), "a");

		store.save(record.clone()).await.expect("Failed to save fixture record.");

		assert!(store.path_for(&key).ends_with("token_youtube_UC7.json"));
		assert!(!dir.join("token_youtube_UC7.json.tmp").exists());
		drop(store);

		let reopened = FileStore::open(&dir).expect("Failed to reopen file store directory.");
		let fetched = reopened
			.fetch(&key)
			.await
			.expect("Failed to fetch fixture record.")
			.expect("File store lost record after reopen.");

		assert_eq!(fetched.access_token.expose(), record.access_token.expose());
		assert_eq!(fetched.expires_at, record.expires_at);
		assert!(
			reopened
				.fetch(&fixture_key(Service::Search, None))
				.await
				.expect("Fetching an absent key should succeed.")
				.is_none()
		);

		fs::remove_dir_all(&dir).unwrap_or_else(|e| {
			panic!("Failed to remove temporary store directory {}: {e}", dir.display())
		});
	}

	#[tokio::test]
	async fn revoke_persists_stamp_and_corrupt_files_surface_errors() {
		let dir = temp_dir("revoke");
		let store = FileStore::open(&dir).expect("Failed to open file store directory.");
		let key = fixture_key(Service::YoutubeAnalytics, None);
		let issued = macros::datetime!(2025-01-01 00:00 UTC);

		store
			.save(fixture_record(key.clone(), issued, Duration::hours(1), "a"))
			.await
			.expect("Failed to save fixture record.");
		store.revoke(&key, issued).await.expect("Revoke should succeed.");

		let fetched = store
			.fetch(&key)
			.await
			.expect("Fetch should succeed.")
			.expect("Revoked records are kept.");

		assert!(fetched.is_revoked());

		fs::write(store.path_for(&key), b"{\"key\":42}").expect("Corrupt fixture should write.");

		let err = store.fetch(&key).await.expect_err("Corrupt documents must be rejected.");

		assert!(matches!(err, StoreError::Serialization { .. }));

		fs::remove_dir_all(&dir).unwrap_or_else(|e| {
			panic!("Failed to remove temporary store directory {}: {e}", dir.display())
		});
	}
}
