//! Format-preserving encryption of `.env` documents.
//!
//! This module provides:
//! - A tokenizer keeping the raw text of every comment, blank line and entry
//! - The envelope codec embedding a value's ciphertext chunks in the document
//! - The engine converting `.env` text to `.sec` text and back, skipping
//!   values whose fingerprint is unchanged since the previous encryption
//! - Engine configuration and provider selection
//!
//! # Architecture
//! The engine only sees text. Reading and writing files is left to the
//! caller, which must discard the output of a failed call.

pub mod config;
pub mod document;
pub mod engine;
pub mod envelope;
pub mod tokenizer;

pub use config::{RetrySettings, SecenvConfig, CONFIG_FILENAME};
pub use document::{Block, Document, Entry, Quote};
pub use engine::{EngineOptions, SecretFileEngine, DEFAULT_CONCURRENCY};
pub use envelope::Envelope;
pub use tokenizer::tokenize;
