//! Client for a data-provenance record service.
//!
//! [`sync::Synchronizer`] keeps a local copy of the backend's records and of
//! the selected record's audit history, refetching after every mutation.
//! [`normalizer`] turns the backend's mixed timestamp encodings into display
//! strings.

pub mod client;
pub mod config;
pub mod dialog;
pub mod error;
pub mod normalizer;
pub mod output;
pub mod record;
pub mod sync;

pub use client::{HttpApi, ProvenanceApi};
pub use config::ClientConfig;
pub use error::{ClientError, ConfigError, SyncError};
pub use normalizer::{normalize, TimestampStyle, TimestampValue, UNKNOWN_TIMESTAMP};
pub use record::{HistoryEntry, Operation, Record, RecordId, Verification};
pub use sync::{ActionOutcome, HistoryOutcome, Notice, Synchronizer};
