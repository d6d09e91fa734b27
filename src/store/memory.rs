//! Thread-safe in-memory [`CredentialStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, CredentialRecord},
	store::{CredentialStore, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<CredentialKey, CredentialRecord>>>;

/// Storage backend that keeps records in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of stored records.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no record has been stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn revoke_now(
		map: &StoreMap,
		key: &CredentialKey,
		instant: OffsetDateTime,
	) -> Option<CredentialRecord> {
		let mut guard = map.write();
		let record = guard.get_mut(key)?;

		record.revoke(instant);

		Some(record.clone())
	}
}
impl CredentialStore for MemoryStore {
	fn save(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().insert(record.key.clone(), record);

			Ok(())
		})
	}

	fn fetch<'a>(&'a self, key: &'a CredentialKey) -> StoreFuture<'a, Option<CredentialRecord>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().get(key).cloned()) })
	}

	fn revoke<'a>(
		&'a self,
		key: &'a CredentialKey,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<CredentialRecord>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::revoke_now(&map, key, instant)) })
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{_preludet::*, catalog::Service};

	#[tokio::test]
	async fn save_replaces_record_for_same_key() {
		let store = MemoryStore::default();
		let key = fixture_key(Service::Youtube, Some("UC1"));
		let issued = macros::datetime!(2025-01-01 00:00 UTC);

		store
			.save(fixture_record(key.clone(), issued, Duration::hours(1), "first"))
			.await
			.expect("First save should succeed.");
		store
			.save(fixture_record(key.clone(), issued, Duration::hours(1), "second"))
			.await
			.expect("Second save should succeed.");

		let fetched = store
			.fetch(&key)
			.await
			.expect("Fetch should succeed.")
			.expect("Record should be present.");

		assert_eq!(store.len(), 1);
		assert_eq!(fetched.access_token.expose(), "second");
	}

	#[tokio::test]
	async fn revoke_stamps_existing_record_only() {
		let store = MemoryStore::default();
		let key = fixture_key(Service::Search, None);
		let missing = fixture_key(Service::Search, Some("other"));
		let issued = macros::datetime!(2025-01-01 00:00 UTC);

		store
			.save(fixture_record(key.clone(), issued, Duration::hours(1), "a"))
			.await
			.expect("Save should succeed.");

		let revoked = store
			.revoke(&key, issued + Duration::minutes(5))
			.await
			.expect("Revoke should succeed.")
			.expect("Existing record should be revoked.");

		assert!(revoked.is_revoked());
		assert!(store.revoke(&missing, issued).await.expect("Revoke should succeed.").is_none());
	}
}
