//! # ishield-exemption
//!
//! Turns the stream of IntegrityShield denials into per-constraint exemption
//! records.
//!
//! The admission handler appends every deny as one JSON [`AdmissionResult`]
//! line to an event log. A [`FileTail`] follows that log and feeds lines to
//! the [`Aggregator`], which merges them into an [`ExemptionRecord`] per
//! constraint and, on every tick, prunes entries whose resource no longer
//! exists.
//!
//! ## Key invariants
//!
//! - **One entry per resource**: records are merged by resource identity, so
//!   replaying the same lines changes nothing but the timestamp.
//! - **Pruning only shrinks**: a prune pass never adds entries; records that
//!   become empty are deleted.
//! - **Failures are local**: a store or lookup error skips one record and the
//!   loop keeps running.
//!
//! [`AdmissionResult`]: ishield_policy::AdmissionResult

pub mod aggregator;
pub mod error;
pub mod lookup;
pub mod record;
pub mod store;
pub mod tail;

pub use aggregator::{parse_interval, Aggregator, ReconcileReport, DEFAULT_INTERVAL_SECONDS};
pub use error::ExemptionError;
pub use lookup::{DirectoryResourceLookup, MemoryResourceLookup, ResourceLookup};
pub use record::{ExemptionRecord, ExemptionSpec};
pub use store::{ExemptionStore, JsonDirExemptionStore, MemoryExemptionStore};
pub use tail::{FileTail, StartAt};
