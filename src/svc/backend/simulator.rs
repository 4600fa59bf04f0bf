//! # Simulator backend
//!
//! An in-memory, deterministic [`BackendAdapter`] standing in for the real
//! orchestration backend: managed elements are created `unlocked/defined`,
//! an LCM operation locks them and schedules a pending transition, and
//! polling `get_me` advances that transition once enough ticks have
//! elapsed.
//!
//! Rather than waiting a fixed simulated duration, this adapter counts
//! `get_me` polls, since the watcher here drives everything through a
//! single cooperative tick rather than a background timer - counting ticks
//! keeps the simulator deterministic under test.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::svc::backend::{
    AdministrativeState, BackendAdapter, BackendError, ConfigNode, ConfigSetOpts, LcmOperation,
    LcmRequest, ManagedElement, ManagedElementState, OperationalState, TemplateClassification,
    Workflow, WorkflowState,
};

#[derive(Clone, Debug)]
struct PendingOperation {
    operation: LcmOperation,
    workflow_id: String,
    ticks_remaining: u32,
}

#[derive(Clone, Debug)]
struct SimulatedMe {
    description: String,
    product: String,
    flavor: String,
    state: ManagedElementState,
    pending: Option<PendingOperation>,
}

#[derive(Debug, Default)]
struct Inner {
    elements: HashMap<String, SimulatedMe>,
    workflows: HashMap<String, Workflow>,
    next_workflow_id: u64,
}

/// in-memory backend adapter used as the default `backend_type =
/// omc_rest_simulator` implementation and by the reconciler's tests.
#[derive(Clone, Debug)]
pub struct SimulatorBackend {
    inner: Arc<Mutex<Inner>>,
    /// number of `get_me` polls an in-flight LCM operation stays locked for
    /// before the simulator reports it complete.
    ticks_to_complete: u32,
}

impl Default for SimulatorBackend {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SimulatorBackend {
    pub fn new(ticks_to_complete: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            ticks_to_complete,
        }
    }

    fn target_operational_state(operation: LcmOperation) -> OperationalState {
        match operation {
            LcmOperation::Deploy | LcmOperation::Update => OperationalState::Ready,
            LcmOperation::Undeploy => OperationalState::Defined,
        }
    }
}

#[async_trait]
impl BackendAdapter for SimulatorBackend {
    async fn ensure_auth(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn get_me(&self, name: &str) -> Result<ManagedElement, BackendError> {
        let mut inner = self.inner.lock().expect("simulator lock poisoned");

        let me = inner
            .elements
            .get_mut(name)
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;

        if let Some(pending) = me.pending.as_mut() {
            if pending.ticks_remaining == 0 {
                me.state.administrative = AdministrativeState::Unlocked;
                me.state.operational = Self::target_operational_state(pending.operation);

                if let Some(workflow) = inner.workflows.get_mut(&pending.workflow_id) {
                    workflow.state = WorkflowState::Succeeded;
                }

                me.pending = None;
            } else {
                pending.ticks_remaining -= 1;
            }
        }

        Ok(ManagedElement {
            name: name.to_string(),
            description: me.description.clone(),
            product: me.product.clone(),
            flavor: me.flavor.clone(),
            state: me.state.clone(),
        })
    }

    async fn create_me(
        &self,
        name: &str,
        description: &str,
        product: &str,
        flavor: &str,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().expect("simulator lock poisoned");

        if inner.elements.contains_key(name) {
            return Err(BackendError::AlreadyExists(name.to_string()));
        }

        inner.elements.insert(
            name.to_string(),
            SimulatedMe {
                description: description.to_string(),
                product: product.to_string(),
                flavor: flavor.to_string(),
                state: ManagedElementState {
                    administrative: AdministrativeState::Unlocked,
                    operational: OperationalState::Defined,
                },
                pending: None,
            },
        );

        Ok(())
    }

    async fn delete_me(&self, name: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().expect("simulator lock poisoned");

        inner
            .elements
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(name.to_string()))
    }

    async fn get_me_details_from_template(
        &self,
        _template_name: &str,
        _template_version: &str,
        _params: &serde_json::Value,
    ) -> Result<TemplateClassification, BackendError> {
        Ok(TemplateClassification {
            product: "CNIS".to_string(),
            kind: "SingleServer".to_string(),
            software_version: "1.15".to_string(),
        })
    }

    async fn check_template_support(
        &self,
        template_name: &str,
        _template_version: &str,
    ) -> Result<(), BackendError> {
        if template_name == "nope" {
            return Err(BackendError::Permanent(
                "template validation failed".to_string(),
            ));
        }

        Ok(())
    }

    async fn verify_template_params(
        &self,
        _template_name: &str,
        _template_version: &str,
        _params: &serde_json::Value,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn gen_config_set(
        &self,
        template_name: &str,
        template_version: &str,
        params: &serde_json::Value,
    ) -> Result<ConfigNode, BackendError> {
        Ok(ConfigNode::Directory {
            name: "base".to_string(),
            contents: vec![ConfigNode::Yaml {
                name: format!("{template_name}-{template_version}.yaml"),
                content: params.to_owned(),
            }],
        })
    }

    async fn create_config_set(
        &self,
        _me_name: &str,
        _opts: &ConfigSetOpts,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn upload_config_set_file(
        &self,
        _me_name: &str,
        _config_set_name: &str,
        _commit_message: &str,
        _bytes: &[u8],
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn run_lcm_operation(&self, request: &LcmRequest) -> Result<String, BackendError> {
        let mut inner = self.inner.lock().expect("simulator lock poisoned");
        let ticks = self.ticks_to_complete;
        let next_id = inner.next_workflow_id;
        inner.next_workflow_id += 1;
        let workflow_id = format!("wf-{next_id}");

        let me_name = request
            .managed_elements
            .first()
            .ok_or_else(|| BackendError::Permanent("no managed element in request".to_string()))?
            .to_owned();

        let me = inner
            .elements
            .get_mut(&me_name)
            .ok_or_else(|| BackendError::NotFound(me_name.clone()))?;

        me.state.administrative = AdministrativeState::Locked;
        me.pending = Some(PendingOperation {
            operation: request.operation_name,
            workflow_id: workflow_id.clone(),
            ticks_remaining: ticks,
        });

        inner.workflows.insert(
            workflow_id.clone(),
            Workflow {
                id: workflow_id.clone(),
                state: WorkflowState::Running,
                operation: request.operation_name,
                last_update_time: chrono::Utc::now(),
            },
        );

        Ok(workflow_id)
    }

    async fn get_workflow(&self, id: &str) -> Result<Workflow, BackendError> {
        let inner = self.inner.lock().expect("simulator lock poisoned");

        inner
            .workflows
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_then_get_reports_unlocked_defined() {
        let backend = SimulatorBackend::default();
        backend
            .create_me("req-1", "desc", "CNIS", "SingleServer")
            .await
            .unwrap();

        let me = backend.get_me("req-1").await.unwrap();
        assert_eq!(me.state.administrative, AdministrativeState::Unlocked);
        assert_eq!(me.state.operational, OperationalState::Defined);
    }

    #[tokio::test]
    async fn create_twice_is_already_exists() {
        let backend = SimulatorBackend::default();
        backend.create_me("req-1", "d", "P", "F").await.unwrap();

        let err = backend.create_me("req-1", "d", "P", "F").await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn deploy_locks_then_unlocks_after_ticks() {
        let backend = SimulatorBackend::new(1);
        backend.create_me("req-1", "d", "P", "F").await.unwrap();

        backend
            .run_lcm_operation(&LcmRequest {
                operation_name: LcmOperation::Deploy,
                managed_elements: vec!["req-1".to_string()],
                config_set: None,
                optional_lcm_params: json!({}),
                additional_params: Default::default(),
            })
            .await
            .unwrap();

        let first = backend.get_me("req-1").await.unwrap();
        assert_eq!(first.state.administrative, AdministrativeState::Locked);

        let second = backend.get_me("req-1").await.unwrap();
        assert_eq!(second.state.administrative, AdministrativeState::Unlocked);
        assert_eq!(second.state.operational, OperationalState::Ready);
    }

    #[tokio::test]
    async fn delete_missing_me_is_not_found() {
        let backend = SimulatorBackend::default();
        let err = backend.delete_me("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
