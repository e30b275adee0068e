//! Common utilities and types shared across the secenv crates.
//!
//! This module provides the error taxonomy used by every layer of the
//! encryption engine and a few small identifier and buffer types.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{KeyId, SensitiveBytes};
