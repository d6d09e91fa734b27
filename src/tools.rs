//! Tool-handler plumbing that needs the resilience layer directly.

pub mod comments;

pub use comments::*;
