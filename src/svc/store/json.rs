//! # File-based resource store
//!
//! Sidecar-file backing for [`ResourceStore`], used when the operator runs
//! outside a cluster (`data_store = json`, see [`Configuration`]). Each
//! tracked request is represented by up to four files under a single
//! directory, `<id>_info.json` (the desired spec), `<id>_status.json` (the
//! last written status, including the `reconciliationInfo` ledger), `<id>_finalizer`
//! (an empty marker, mirroring the cluster finalizer), and `<id>_delete`
//! (presence means deletion was requested).
//!
//! [`Configuration`]: crate::svc::cfg::Configuration

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::svc::resource::provisioning_request::ProvisioningRequestStatus;
use crate::svc::resource::{ManagedResource, ProvisioningRequest, ProvisioningRequestSpec};
use crate::svc::store::{Classified, FacadeStore, ResourceStore, StoreError};

use async_trait::async_trait;

const INFO_SUFFIX: &str = "_info.json";
const STATUS_SUFFIX: &str = "_status.json";
const FINALIZER_SUFFIX: &str = "_finalizer";
const DELETE_SUFFIX: &str = "_delete";

pub struct JsonStore {
    directory: PathBuf,
}

impl JsonStore {
    pub async fn new(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();

        fs::create_dir_all(&directory)
            .await
            .map_err(|err| StoreError::List(format!("failed to create store directory, {err}")))?;

        Ok(Self { directory })
    }

    fn path(&self, id: &str, suffix: &str) -> PathBuf {
        self.directory.join(format!("{id}{suffix}"))
    }

    async fn exists(path: &Path) -> bool {
        fs::metadata(path).await.is_ok()
    }

    /// reads `<id>_status.json`, returning the full persisted status
    /// (including the `reconciliationInfo` ledger) or `None` if nothing has
    /// been written yet.
    async fn load_status(&self, id: &str) -> Result<Option<ProvisioningRequestStatus>, StoreError> {
        let status_path = self.path(id, STATUS_SUFFIX);
        if !Self::exists(&status_path).await {
            return Ok(None);
        }

        let raw = fs::read_to_string(&status_path)
            .await
            .map_err(|err| StoreError::List(format!("failed to read status for '{id}', {err}")))?;

        match serde_json::from_str(&raw) {
            Ok(status) => Ok(Some(status)),
            Err(err) => {
                debug!(id, error = %err, "skipping malformed status file");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ResourceStore<ProvisioningRequest> for JsonStore {
    async fn reconcile_list(&self) -> Result<Vec<Classified<ProvisioningRequest>>, StoreError> {
        let mut entries = fs::read_dir(&self.directory)
            .await
            .map_err(|err| StoreError::List(err.to_string()))?;
        let mut out = Vec::new();

        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|err| StoreError::List(err.to_string()))?;
            let Some(entry) = entry else { break };

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            let Some(id) = file_name.strip_suffix(INFO_SUFFIX) else { continue };

            let raw = match fs::read_to_string(entry.path()).await {
                Ok(raw) => raw,
                Err(err) => {
                    debug!(id, error = %err, "skipping unreadable resource info file");
                    continue;
                }
            };
            let spec: ProvisioningRequestSpec = match serde_json::from_str(&raw) {
                Ok(spec) => spec,
                Err(err) => {
                    debug!(id, error = %err, "skipping malformed resource info file");
                    continue;
                }
            };

            let deleting = Self::exists(&self.path(id, DELETE_SUFFIX)).await;
            // the finalizer marker, not an in-memory set, is what makes "new
            // vs current" survive a process restart: it is the same
            // on-disk signal the cluster store reads via `finalizer::contains`.
            let already_tracked = Self::exists(&self.path(id, FINALIZER_SUFFIX)).await;

            let mut record = ProvisioningRequest::new(id, spec.clone());
            record
                .set_init_fields(id, spec)
                .map_err(|err| StoreError::List(format!("failed to init record '{id}', {err}")))?;

            if already_tracked {
                if let Some(status) = self.load_status(id).await? {
                    record.status = Some(status);
                }
            }

            if deleting {
                record.set_delete_flag();
                out.push(Classified::Deleting(record));
            } else if already_tracked {
                out.push(Classified::Current(record));
            } else {
                let finalizer_path = self.path(id, FINALIZER_SUFFIX);
                if let Err(err) = fs::write(&finalizer_path, []).await {
                    debug!(id, error = %err, "failed to write finalizer marker");
                    continue;
                }

                debug!(id, "tracking new provisioning request");
                out.push(Classified::New(record));
            }
        }

        Ok(out)
    }

    async fn update_status(&self, record: &ProvisioningRequest) -> Result<(), StoreError> {
        let id = record.id();
        // the full status, including `extensions.reconciliationInfo`, not
        // just the three-field user-visible `provisioningStatus`: the
        // ledger is what lets the next tick (or a fresh process) resume
        // from where this one left off.
        let status = record.status.clone().unwrap_or_default();

        let rendered = serde_json::to_vec_pretty(&status)
            .map_err(|err| StoreError::UpdateStatus(id.to_string(), err.to_string()))?;

        let final_path = self.path(id, STATUS_SUFFIX);
        let tmp_path = self.directory.join(format!(".{id}.status.tmp"));

        fs::write(&tmp_path, rendered)
            .await
            .map_err(|err| StoreError::UpdateStatus(id.to_string(), err.to_string()))?;
        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|err| StoreError::UpdateStatus(id.to_string(), err.to_string()))?;

        Ok(())
    }

    async fn evict(&self, record: &ProvisioningRequest) -> Result<(), StoreError> {
        let id = record.id();

        for suffix in [INFO_SUFFIX, STATUS_SUFFIX, FINALIZER_SUFFIX, DELETE_SUFFIX] {
            let path = self.path(id, suffix);
            if Self::exists(&path).await {
                fs::remove_file(&path)
                    .await
                    .map_err(|err| StoreError::Evict(id.to_string(), err.to_string()))?;
            }
        }

        Ok(())
    }
}

impl JsonStore {
    /// reads `<id>_info.json` and, if present, `<id>_status.json`, folding
    /// them into a [`ProvisioningRequest`]. returns `None` if the info file
    /// is absent, the same way a cluster `get` returns `None` on a 404.
    async fn load(&self, id: &str) -> Result<Option<ProvisioningRequest>, StoreError> {
        let info_path = self.path(id, INFO_SUFFIX);
        if !Self::exists(&info_path).await {
            return Ok(None);
        }

        let raw = fs::read_to_string(&info_path)
            .await
            .map_err(|err| StoreError::List(format!("failed to read '{id}', {err}")))?;
        let spec: ProvisioningRequestSpec = serde_json::from_str(&raw)
            .map_err(|err| StoreError::List(format!("failed to parse '{id}', {err}")))?;

        let mut record = ProvisioningRequest::new(id, spec.clone());
        record
            .set_init_fields(id, spec)
            .map_err(|err| StoreError::List(format!("failed to init record '{id}', {err}")))?;

        if let Some(status) = self.load_status(id).await? {
            record.status = Some(status);
        }

        if Self::exists(&self.path(id, DELETE_SUFFIX)).await {
            record.set_delete_flag();
        }

        Ok(Some(record))
    }
}

#[async_trait]
impl FacadeStore for JsonStore {
    async fn create(&self, id: &str, spec: ProvisioningRequestSpec) -> Result<ProvisioningRequest, StoreError> {
        let rendered = serde_json::to_vec_pretty(&spec)
            .map_err(|err| StoreError::List(format!("failed to encode '{id}', {err}")))?;

        fs::write(self.path(id, INFO_SUFFIX), rendered)
            .await
            .map_err(|err| StoreError::List(format!("failed to create '{id}', {err}")))?;

        let mut record = ProvisioningRequest::new(id, spec.clone());
        record
            .set_init_fields(id, spec)
            .map_err(|err| StoreError::List(format!("failed to init record '{id}', {err}")))?;

        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<ProvisioningRequest>, StoreError> {
        self.load(id).await
    }

    async fn list_all(&self) -> Result<Vec<ProvisioningRequest>, StoreError> {
        let mut entries = fs::read_dir(&self.directory)
            .await
            .map_err(|err| StoreError::List(err.to_string()))?;
        let mut out = Vec::new();

        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|err| StoreError::List(err.to_string()))?;
            let Some(entry) = entry else { break };

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            let Some(id) = file_name.strip_suffix(INFO_SUFFIX) else { continue };

            if let Some(record) = self.load(id).await? {
                out.push(record);
            }
        }

        Ok(out)
    }

    async fn request_deletion(&self, id: &str) -> Result<bool, StoreError> {
        if !Self::exists(&self.path(id, INFO_SUFFIX)).await {
            return Ok(false);
        }

        fs::write(self.path(id, DELETE_SUFFIX), [])
            .await
            .map_err(|err| StoreError::List(format!("failed to request deletion of '{id}', {err}")))?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> ProvisioningRequestSpec {
        ProvisioningRequestSpec {
            template_name: "single-node-lpg2".to_string(),
            template_version: "v1".to_string(),
            template_parameters: json!({"node_count": 3}),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn new_record_is_classified_new_then_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        fs::write(
            dir.path().join(format!("req-1{INFO_SUFFIX}")),
            serde_json::to_vec(&spec()).unwrap(),
        )
        .await
        .unwrap();

        let first = store.reconcile_list().await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(matches!(first[0], Classified::New(_)));

        let second = store.reconcile_list().await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(matches!(second[0], Classified::Current(_)));
    }

    #[tokio::test]
    async fn delete_marker_is_classified_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        fs::write(
            dir.path().join(format!("req-2{INFO_SUFFIX}")),
            serde_json::to_vec(&spec()).unwrap(),
        )
        .await
        .unwrap();
        fs::write(dir.path().join(format!("req-2{DELETE_SUFFIX}")), []).await.unwrap();

        let records = store.reconcile_list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], Classified::Deleting(_)));
    }

    #[tokio::test]
    async fn update_status_persists_reconciliation_ledger_across_ticks() {
        use crate::svc::resource::{ReconciliationState, SubState};

        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        fs::write(
            dir.path().join(format!("req-9{INFO_SUFFIX}")),
            serde_json::to_vec(&spec()).unwrap(),
        )
        .await
        .unwrap();

        let Classified::New(mut record) = store.reconcile_list().await.unwrap().into_iter().next().unwrap() else {
            panic!("expected a New record on the first tick");
        };

        let info = &mut record.status.as_mut().unwrap().extensions.as_mut().unwrap().reconciliation_info;
        info.transition_to(ReconciliationState::Provisioning, Some(SubState::OperationStart));
        store.update_status(&record).await.unwrap();

        let Classified::Current(record) = store.reconcile_list().await.unwrap().into_iter().next().unwrap() else {
            panic!("expected a Current record once the ledger has advanced past Init");
        };
        let info = &record.status.as_ref().unwrap().extensions.as_ref().unwrap().reconciliation_info;
        assert_eq!(info.reconciliation_state, ReconciliationState::Provisioning);
        assert_eq!(info.sub_state, Some(SubState::OperationStart));
    }

    #[tokio::test]
    async fn evict_removes_all_sidecar_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        let mut record = ProvisioningRequest::new("req-3", spec());
        record.set_init_fields("req-3", spec()).unwrap();

        for suffix in [INFO_SUFFIX, STATUS_SUFFIX, FINALIZER_SUFFIX, DELETE_SUFFIX] {
            fs::write(dir.path().join(format!("req-3{suffix}")), []).await.unwrap();
        }

        store.evict(&record).await.unwrap();

        for suffix in [INFO_SUFFIX, STATUS_SUFFIX, FINALIZER_SUFFIX, DELETE_SUFFIX] {
            assert!(!dir.path().join(format!("req-3{suffix}")).exists());
        }
    }

    #[tokio::test]
    async fn facade_create_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        let created = store.create("req-4", spec()).await.unwrap();
        assert_eq!(created.id(), "req-4");

        let fetched = store.get("req-4").await.unwrap().unwrap();
        assert_eq!(fetched.id(), "req-4");
        assert_eq!(fetched.spec, created.spec);
    }

    #[tokio::test]
    async fn facade_get_missing_record_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        assert!(store.get("does-not-exist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn facade_list_all_returns_every_created_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        store.create("req-5", spec()).await.unwrap();
        store.create("req-6", spec()).await.unwrap();

        let mut ids: Vec<String> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.id().to_string())
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["req-5".to_string(), "req-6".to_string()]);
    }

    #[tokio::test]
    async fn facade_request_deletion_writes_marker_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        store.create("req-7", spec()).await.unwrap();

        assert!(store.request_deletion("req-7").await.unwrap());
        assert!(dir.path().join(format!("req-7{DELETE_SUFFIX}")).exists());

        assert!(!store.request_deletion("req-8").await.unwrap());
    }
}
