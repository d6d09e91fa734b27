//! Credential record model: cache keys, persisted records, and redacted secrets.

pub mod key;
pub mod record;
pub mod secret;
