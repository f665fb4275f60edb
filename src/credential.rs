//! Credential records, identifiers, secrets, and the resolution pipeline.

pub mod id;
pub mod record;
pub mod resolve;
pub mod secret;

pub use id::*;
pub use record::*;
pub use resolve::*;
pub use secret::*;
