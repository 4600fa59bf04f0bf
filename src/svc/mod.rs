//! # Services module
//!
//! This module provides the services the operator is built from: backend
//! adapters, the resource domain model and its reconciler, the resource
//! store, the watcher control loop, and the surrounding ambient stack
//! (configuration, kubernetes helpers, the http façade).

pub mod backend;
pub mod cfg;
pub mod configbundle;
pub mod crc;
pub mod http;
pub mod k8s;
pub mod resource;
pub mod store;
pub mod watcher;
