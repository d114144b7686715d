//! # ishield-mapnode
//!
//! Typed document trees and the structural diff engine behind IntegrityShield's
//! mutation check.
//!
//! A resource body is parsed into a [`Node`] tree, high-churn subtrees are
//! removed with [`Node::mask`], the two versions are compared with
//! [`Node::diff`], and the resulting [`DiffResult`] is split against
//! ignore-field patterns with [`DiffResult::filter`]. Every stage is pure and
//! can be tested on its own.
//!
//! ## Quick Example
//!
//! ```rust
//! use ishield_mapnode::Node;
//!
//! let old = Node::from_bytes(br#"{"metadata":{"uid":"a"},"data":{"k":"v1"}}"#).unwrap();
//! let new = Node::from_bytes(br#"{"metadata":{"uid":"b"},"data":{"k":"v2"}}"#).unwrap();
//!
//! let mask = ["metadata.uid"];
//! let dr = old.mask(&mask).diff(&new.mask(&mask));
//! assert_eq!(dr.keys(), vec!["data.k".to_string()]);
//! ```
//!
//! ## Key invariants
//!
//! - **Reflexive**: `diff(d, d)` is always empty.
//! - **Idempotent mask**: `mask(mask(d, m), m) == mask(d, m)`.
//! - **Exhaustive filter**: every difference lands in exactly one of the
//!   filtered/unfiltered partitions.

pub mod diff;
pub mod error;
pub mod mask;
pub mod node;
pub mod pattern;

pub use diff::{DiffResult, Difference, FilteredDiff};
pub use error::MapNodeError;
pub use mask::MaskPath;
pub use node::{Node, NodeMap};
pub use pattern::{is_listed, Pattern};
