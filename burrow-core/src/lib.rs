//! Burrow Core - Foundation types for namespace brokering
//!
//! This crate provides the namespace vocabulary shared by all Burrow crates:
//! the eight kernel namespace types, sets of them, owned namespace handles,
//! and the common error type.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handle;
pub mod types;

pub use error::{Error, Result};
pub use handle::NamespaceHandle;
pub use types::{NamespaceSet, NamespaceType};
