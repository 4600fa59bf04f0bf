//! # Cluster-native resource store
//!
//! Backs [`ResourceStore`] with the `ProvisioningRequest` custom resource
//! directly, using `kube::Api` and the finalizer helpers already used by the
//! kubernetes-native parts of this operator.

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api, ResourceExt,
};
use tracing::{debug, warn};

use crate::svc::{
    k8s::{finalizer, resource},
    resource::{ManagedResource, ProvisioningRequest, ProvisioningRequestSpec},
    store::{Classified, FacadeStore, ResourceStore, StoreError},
};

pub const FINALIZER: &str = "provisioning.o2ims.io/finalizer";

#[derive(Clone)]
pub struct ClusterStore {
    client: kube::Client,
    api: Api<ProvisioningRequest>,
}

impl ClusterStore {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client.clone(), namespace),
            client,
        }
    }
}

#[async_trait]
impl ResourceStore<ProvisioningRequest> for ClusterStore {
    async fn reconcile_list(&self) -> Result<Vec<Classified<ProvisioningRequest>>, StoreError> {
        let list = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(|err| StoreError::List(err.to_string()))?;

        let mut out = Vec::with_capacity(list.items.len());

        for mut record in list.items {
            let already_tracked = finalizer::contains(&record, FINALIZER);
            let deleting = resource::deleted(&record);

            if deleting {
                if !record.delete_flag() {
                    record.set_delete_flag();
                }
                out.push(Classified::Deleting(record));
            } else if already_tracked {
                out.push(Classified::Current(record));
            } else {
                let name = record.name_any();
                let before = record.clone();
                record = finalizer::add(record, FINALIZER);

                // diffed/patched before `set_init_fields` runs: status is a
                // subresource, so a combined spec+status patch through the
                // main endpoint would have the status half silently dropped
                // by the API server, discarding the freshly initialized
                // ledger on the object this call returns.
                let patch = resource::diff(&before, &record)
                    .map_err(|err| StoreError::List(err.to_string()))?;
                record = resource::patch(self.client.clone(), &record, patch)
                    .await
                    .map_err(|err| StoreError::List(err.to_string()))?;

                let spec = record.spec.clone();
                record
                    .set_init_fields(&name, spec)
                    .map_err(|err| StoreError::List(format!("failed to init record '{name}', {err}")))?;

                debug!(name = %name, "tracking new provisioning request");
                out.push(Classified::New(record));
            }
        }

        Ok(out)
    }

    async fn update_status(&self, record: &ProvisioningRequest) -> Result<(), StoreError> {
        let name = record.name_any();

        let current = self
            .api
            .get(&name)
            .await
            .map_err(|err| StoreError::UpdateStatus(name.clone(), err.to_string()))?;

        // no equality short-circuit here: `ProvisioningRequestStatus`'s
        // derived `PartialEq` is lossy (it ignores `apiRetryCount`,
        // `apiFailure` and every other ledger field besides the few
        // `ReconciliationInfo::eq` compares), so two ledgers that differ only
        // in retry bookkeeping would compare equal and the patch would be
        // skipped. `resource::diff`/`patch_status` already no-op on an empty
        // json-patch, so letting them decide is both correct and free when
        // nothing actually changed.
        let patch = resource::diff(&current, record)
            .map_err(|err| StoreError::UpdateStatus(name.clone(), err.to_string()))?;

        resource::patch_status(self.client.clone(), current, patch)
            .await
            .map_err(|err| StoreError::UpdateStatus(name, err.to_string()))?;

        Ok(())
    }

    async fn evict(&self, record: &ProvisioningRequest) -> Result<(), StoreError> {
        let name = record.name_any();

        let current = self
            .api
            .get(&name)
            .await
            .map_err(|err| StoreError::Evict(name.clone(), err.to_string()))?;

        let without_finalizer = finalizer::remove(current, FINALIZER);

        let patch = resource::diff(record, &without_finalizer)
            .map_err(|err| StoreError::Evict(name.clone(), err.to_string()))?;

        if let Err(err) = resource::patch(self.client.clone(), record, patch).await {
            warn!(name = %name, error = %err, "failed to remove finalizer during eviction");
            return Err(StoreError::Evict(name, err.to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl FacadeStore for ClusterStore {
    async fn create(&self, id: &str, spec: ProvisioningRequestSpec) -> Result<ProvisioningRequest, StoreError> {
        let record = ProvisioningRequest::new(id, spec);

        self.api
            .create(&PostParams::default(), &record)
            .await
            .map_err(|err| StoreError::List(format!("failed to create '{id}', {err}")))
    }

    async fn get(&self, id: &str) -> Result<Option<ProvisioningRequest>, StoreError> {
        match self.api.get(id).await {
            Ok(record) => Ok(Some(record)),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(err) => Err(StoreError::List(format!("failed to get '{id}', {err}"))),
        }
    }

    async fn list_all(&self) -> Result<Vec<ProvisioningRequest>, StoreError> {
        let list = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(|err| StoreError::List(err.to_string()))?;

        Ok(list.items)
    }

    async fn request_deletion(&self, id: &str) -> Result<bool, StoreError> {
        match self.api.delete(id, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(false),
            Err(err) => Err(StoreError::List(format!("failed to delete '{id}', {err}"))),
        }
    }
}
