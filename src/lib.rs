//! Dynamic pod network attachments.
//!
//! Keeps the interfaces attached to a running pod in line with the
//! `k8s.v1.cni.cncf.io/networks` annotation: annotation changes are diffed
//! into add/remove requests, the multus server plugs or unplugs each
//! interface, and `k8s.v1.cni.cncf.io/network-status` is rewritten to match.

pub mod annotations;
pub mod config;
pub mod controller;
pub mod delegate;
pub mod error;
pub mod events;
pub mod queue;
pub mod runtime;
pub mod store;
pub mod types;

pub use controller::{Controller, Direction, ReconcileRequest, RequestRef, MAX_RETRIES};
pub use error::{Error, Result};
