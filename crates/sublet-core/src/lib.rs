//! Core domain + application logic for the sublet listing aggregator.
//!
//! This crate knows nothing about Telegram or OpenAI. The chat history and the
//! extraction service live behind ports ([`collector::ChatSource`],
//! [`extraction::ExtractionClient`]) implemented in adapter crates.

pub mod collector;
pub mod config;
pub mod dates;
pub mod domain;
pub mod enrich;
pub mod errors;
pub mod extraction;
pub mod lifecycle;
pub mod logging;
pub mod query;
pub mod recency;
pub mod store;
pub mod verification;

pub use errors::{Error, Result};
