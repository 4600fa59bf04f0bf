//! # Kubernetes module
//!
//! This module provides the kubernetes helpers the cluster-native resource
//! store is built from: client bootstrap, finalizer manipulation, and
//! generic patch/diff helpers over [`kube::Resource`]s.

pub mod client;
pub mod finalizer;
pub mod resource;
