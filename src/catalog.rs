//! Closed sets of credential services, quota buckets, and protected operations.
//!
//! Every registry is keyed by these enums instead of free-form strings, so a misspelled API
//! or operation name is a compile error rather than a silently unlimited bucket.
//!
//! The enums deserialize through [`FromStr`], so a map keyed by them keeps its key labels in
//! deserializer error paths.

// self
use crate::{_prelude::*, circuit::CircuitConfig, quota::QuotaLimit};

/// OAuth-protected upstream service a credential belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Service {
	/// Video platform data + upload API.
	Youtube,
	/// Video platform analytics API.
	YoutubeAnalytics,
	/// Custom search API.
	Search,
	/// Knowledge graph lookup API (API-key only, no OAuth scopes).
	KnowledgeGraph,
}
impl Service {
	/// Every known service, in declaration order.
	pub const ALL: [Service; 4] =
		[Service::Youtube, Service::YoutubeAnalytics, Service::Search, Service::KnowledgeGraph];

	/// Stable label used in cache keys, file names, and status snapshots.
	pub const fn as_str(self) -> &'static str {
		match self {
			Service::Youtube => "youtube",
			Service::YoutubeAnalytics => "youtube_analytics",
			Service::Search => "search",
			Service::KnowledgeGraph => "knowledge_graph",
		}
	}

	/// OAuth scopes requested during the interactive authorization handshake.
	pub const fn default_scopes(self) -> &'static [&'static str] {
		match self {
			Service::Youtube => &[
				"https://www.googleapis.com/auth/youtube.upload",
				"https://www.googleapis.com/auth/youtube.force-ssl",
				"https://www.googleapis.com/auth/youtubepartner",
			],
			Service::YoutubeAnalytics => &["https://www.googleapis.com/auth/yt-analytics.readonly"],
			Service::Search => &["https://www.googleapis.com/auth/customsearch"],
			Service::KnowledgeGraph => &[],
		}
	}
}
impl Display for Service {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl TryFrom<String> for Service {
	type Error = UnknownName;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}
impl FromStr for Service {
	type Err = UnknownName;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|service| service.as_str() == s)
			.ok_or_else(|| UnknownName { kind: "service", name: s.to_owned() })
	}
}

/// Quota bucket enforced by the rate limiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Api {
	/// Trend discovery lookups.
	Trends,
	/// Fact search lookups.
	Search,
	/// Video uploads.
	YoutubeUpload,
	/// Channel analytics reads.
	YoutubeAnalytics,
	/// Knowledge graph entity lookups.
	KnowledgeGraph,
}
impl Api {
	/// Every known quota bucket, in declaration order.
	pub const ALL: [Api; 5] =
		[Api::Trends, Api::Search, Api::YoutubeUpload, Api::YoutubeAnalytics, Api::KnowledgeGraph];

	/// Stable label used in status snapshots and log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Api::Trends => "trends",
			Api::Search => "search",
			Api::YoutubeUpload => "youtube_upload",
			Api::YoutubeAnalytics => "youtube_analytics",
			Api::KnowledgeGraph => "knowledge_graph",
		}
	}

	/// Default daily + per-minute ceilings published by the upstream.
	pub const fn default_quota(self) -> QuotaLimit {
		match self {
			Api::Trends => QuotaLimit::new(1_000, 60),
			Api::Search => QuotaLimit::new(10_000, 100),
			Api::YoutubeUpload => QuotaLimit::new(50, 5),
			Api::YoutubeAnalytics => QuotaLimit::new(10_000, 100),
			Api::KnowledgeGraph => QuotaLimit::new(10_000, 100),
		}
	}
}
impl Display for Api {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl TryFrom<String> for Api {
	type Error = UnknownName;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}
impl FromStr for Api {
	type Err = UnknownName;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|api| api.as_str() == s)
			.ok_or_else(|| UnknownName { kind: "api", name: s.to_owned() })
	}
}

/// Outbound operation protected by its own circuit breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Operation {
	/// Resumable video upload.
	YoutubeUpload,
	/// Analytics report fetch.
	YoutubeAnalytics,
	/// Trend discovery fetch.
	GoogleTrends,
	/// Fact search fetch.
	GoogleSearch,
	/// Knowledge graph entity lookup.
	KnowledgeGraph,
	/// Comment post/reply/moderation calls.
	CommentModeration,
}
impl Operation {
	/// Every known operation, in declaration order.
	pub const ALL: [Operation; 6] = [
		Operation::YoutubeUpload,
		Operation::YoutubeAnalytics,
		Operation::GoogleTrends,
		Operation::GoogleSearch,
		Operation::KnowledgeGraph,
		Operation::CommentModeration,
	];

	/// Stable label used in status snapshots and log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Operation::YoutubeUpload => "youtube_upload",
			Operation::YoutubeAnalytics => "youtube_analytics",
			Operation::GoogleTrends => "google_trends",
			Operation::GoogleSearch => "google_search",
			Operation::KnowledgeGraph => "knowledge_graph",
			Operation::CommentModeration => "comment_moderation",
		}
	}

	/// Default breaker tuning.
	///
	/// Uploads trip faster and cool down longer than read-heavy lookups, since a false
	/// negative there costs a full transfer.
	pub const fn default_circuit(self) -> CircuitConfig {
		match self {
			Operation::YoutubeUpload => CircuitConfig::new(3, Duration::seconds(600), 1, 2),
			Operation::YoutubeAnalytics
			| Operation::GoogleTrends
			| Operation::KnowledgeGraph
			| Operation::CommentModeration => CircuitConfig::new(5, Duration::seconds(300), 3, 2),
			Operation::GoogleSearch => CircuitConfig::new(10, Duration::seconds(180), 3, 2),
		}
	}
}
impl Display for Operation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl TryFrom<String> for Operation {
	type Error = UnknownName;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}
impl FromStr for Operation {
	type Err = UnknownName;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|operation| operation.as_str() == s)
			.ok_or_else(|| UnknownName { kind: "operation", name: s.to_owned() })
	}
}

/// Error returned when parsing a label that is not part of the closed set.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Unknown {kind} `{name}`.")]
pub struct UnknownName {
	/// Set being parsed (service, api, operation).
	pub kind: &'static str,
	/// Rejected label.
	pub name: String,
}
