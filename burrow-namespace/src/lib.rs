//! Namespace machinery for brokering
//!
//! This crate provides the kernel-facing primitives of Burrow:
//! - Disposable workers - kernel threads that are thrown away after one use
//! - Thread-pinned execution - run logic attached to a set of namespaces
//! - Transient namespaces - create flat namespaces without entering them
//! - Hierarchical spawn - start a broker child in new user/PID namespaces
//! - Mount helpers - private root propagation and fresh procfs

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod execute;
pub mod mount;
pub mod spawn;
pub mod transient;
pub mod worker;

pub use execute::execute;
pub use spawn::{BrokerChild, SpawnConfig, spawn_broker};
pub use transient::{Rooms, TransientGuard, enter_transient, new_rooms, new_transient};
pub use worker::DisposableWorker;
