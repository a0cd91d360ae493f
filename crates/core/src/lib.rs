//! Core domain types and shared logic for the Hodie quota service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Client identifiers and the client identity record
//! - Subscription tiers and AI backend selection
//! - Counter kinds, calendar-aligned period windows and quota decisions
//! - Content hashing for upload deduplication
//! - Upload categories and record lifecycle
//! - Application configuration

pub mod client;
pub mod config;
pub mod error;
pub mod hash;
pub mod period;
pub mod tier;
pub mod upload;
pub mod usage;

pub use client::{Client, ClientId, VerifiedIdentity};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use period::{PeriodKind, PeriodWindow};
pub use tier::{AiBackend, Tier};
pub use upload::{UploadCategory, UploadDecision, UploadRecord, UploadStatus};
pub use usage::{CounterKind, DenyReason, QuotaDecision, UsageCounter, UsageSummary};

/// Default prefix for sequentially allocated client IDs.
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "HDL";

/// Minimum number of digits in the numeric part of a client ID.
pub const CLIENT_ID_DIGITS: usize = 5;
