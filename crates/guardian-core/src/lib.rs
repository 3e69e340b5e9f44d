//! Shared domain types, error handling, and filesystem plumbing for the
//! Guardian egress control plane.
//!
//! This crate has no async runtime dependency of its own and no network
//! code — it is the vocabulary every other `guardian-*` crate shares:
//! the allow/deny data model, the on-disk layout, atomic file I/O, and
//! the error type used throughout.

pub mod config;
pub mod decisions;
pub mod domain;
pub mod error;
pub mod fsutil;
pub mod paths;
pub mod scope;
pub mod token;

pub use domain::{normalize_host, AllowEntry, Allowlist, Denylist};
pub use error::{GuardianError, GuardianResult};
pub use paths::GuardianPaths;
pub use scope::ApprovalScope;
pub use token::{generate_token, TokenInfo};
