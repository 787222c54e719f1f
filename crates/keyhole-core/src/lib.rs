//! Core types and traits for the Keyhole URL shortener.
//!
//! This crate defines the record model, the error taxonomy, and the
//! storage contract shared by every backend implementation.

pub mod error;
pub mod record;
pub mod repository;

pub use error::{Result, StorageError};
pub use record::{BatchRequest, BatchResponse, ResolvedUrl, ServiceStats, UrlRecord, UserUrl};
pub use repository::{Repository, SoftDelete};
