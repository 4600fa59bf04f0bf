//! # Resource store module
//!
//! This module provides the `ResourceStore` capability contract the Watcher
//! drives every tick: list the records currently known, classify them
//! against what was known last tick, and persist status updates. Two
//! backings exist: [`k8s::ClusterStore`] for the cluster-native
//! `ProvisioningRequest` CRD and [`json::JsonStore`] for the sidecar-file
//! backing used outside a cluster.

use async_trait::async_trait;

use crate::svc::resource::{ManagedResource, ProvisioningRequest, ProvisioningRequestSpec};

pub mod json;
pub mod k8s;

/// classification of a record observed on a given tick, relative to what the
/// store already tracks.
#[derive(Debug)]
pub enum Classified<R> {
    /// seen for the first time; `set_init_fields` has not run yet.
    New(R),
    /// already tracked and not marked for deletion.
    Current(R),
    /// marked for deletion (finalizer still present).
    Deleting(R),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("failed to list records, {0}")]
    List(String),
    #[error("failed to persist status for '{0}', {1}")]
    UpdateStatus(String, String),
    #[error("failed to evict record '{0}', {1}")]
    Evict(String, String),
}

/// the capability contract the Watcher drives every tick. generic over
/// [`ManagedResource`] so a future resource kind only needs a new
/// implementation of both traits, not a new watcher.
#[async_trait]
pub trait ResourceStore<R>: Send + Sync
where
    R: ManagedResource + 'static,
{
    /// lists every record currently known to the backing, classified
    /// relative to the store's internal bookkeeping of what it has already
    /// seen.
    async fn reconcile_list(&self) -> Result<Vec<Classified<R>>, StoreError>;

    /// persists the derived [`ProvisioningStatus`] (and any ledger fields the
    /// reconciler mutated) for the given record.
    async fn update_status(&self, record: &R) -> Result<(), StoreError>;

    /// removes a record whose reconciliation reached a terminal deleted
    /// state, including clearing its finalizer.
    async fn evict(&self, record: &R) -> Result<(), StoreError>;
}

// -----------------------------------------------------------------------------
// FacadeStore trait
//
// the narrow, `ProvisioningRequest`-specific CRUD surface the HTTP façade
// is built on. kept separate from [`ResourceStore`], which stays
// generic over any future [`ManagedResource`] kind and has no notion of
// "create from a freshly user-submitted spec".

#[async_trait]
pub trait FacadeStore: Send + Sync {
    async fn create(&self, id: &str, spec: ProvisioningRequestSpec) -> Result<ProvisioningRequest, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<ProvisioningRequest>, StoreError>;

    async fn list_all(&self) -> Result<Vec<ProvisioningRequest>, StoreError>;

    /// requests deletion of the named record; returns `false` if it was not
    /// found. does not itself evict the record — that only happens once
    /// the watcher has driven it through `Removing` to `Deleted`.
    async fn request_deletion(&self, id: &str) -> Result<bool, StoreError>;
}
