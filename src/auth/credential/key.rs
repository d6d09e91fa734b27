//! Cache and storage key for a (service, account) credential.

// self
use crate::{_prelude::*, auth::AccountId, catalog::Service};

const DEFAULT_ACCOUNT: &str = "default";

/// Identifies one credential: a service plus an optional account.
///
/// Callers that do not name an account share the `default` credential for the service.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CredentialKey {
	/// Service that issued the credential.
	pub service: Service,
	/// Account (channel) the credential acts for.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub account: Option<AccountId>,
}
impl CredentialKey {
	/// Creates a key for the given service and optional account.
	pub fn new(service: Service, account: Option<AccountId>) -> Self {
		Self { service, account }
	}

	/// Key for the service's default account.
	pub fn default_for(service: Service) -> Self {
		Self::new(service, None)
	}

	/// Account label, falling back to `default`.
	pub fn account_label(&self) -> &str {
		self.account.as_deref().unwrap_or(DEFAULT_ACCOUNT)
	}

	/// File stem used by durable stores (`token_<service>` or `token_<service>_<account>`).
	pub fn file_stem(&self) -> String {
		match &self.account {
			Some(account) => format!("token_{}_{account}", self.service),
			None => format!("token_{}", self.service),
		}
	}
}
impl Display for CredentialKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}:{}", self.service, self.account_label())
	}
}
