//! Shared types for the IAP auth workspace
//!
//! Holds the pieces every crate needs and none of them owns: the redacting
//! `Secret` wrapper, per-user config directory resolution, and the config/IO
//! error type used by the binary's config loader.

mod error;
pub mod paths;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
