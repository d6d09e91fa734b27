//! Credential identifiers, scope sets, and OAuth credential records.

pub mod credential;
pub mod id;
pub mod scope;

pub use credential::{key::*, record::*, secret::*};
pub use id::*;
pub use scope::*;
