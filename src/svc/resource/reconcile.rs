//! # Reconciliation state machine
//!
//! One pass over a [`ProvisioningRequest`] advances the ledger by at most one
//! user-visible transition, except for two substate pairs
//! (CreateMe→WaitingOnMe, CreateConfig→PushConfig) that deliberately fall
//! through in the same tick, so a freshly created request does not waste a
//! whole tick waiting on work that is already known to be done.

use crate::svc::{
    backend::{
        AdministrativeState, BackendAdapter, ConfigSetOpts, LcmAdditionalParams, LcmOperation,
        LcmRequest, OperationalState,
    },
    configbundle,
    crc,
    resource::{OmcOperation, ProvisioningRequest, ProvisioningState, ReconciliationState, SubState},
};

fn rfc1123(input: &str) -> String {
    let mut out: String = input
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();

    out.truncate(63);

    while out.ends_with(['-', '.']) {
        out.pop();
    }

    if out.is_empty() {
        out.push_str("unnamed");
    }

    out
}

fn spec_changed(req: &ProvisioningRequest) -> bool {
    let info = &req
        .status
        .as_ref()
        .and_then(|status| status.extensions.as_ref())
        .expect("reconcile called before set_init_fields")
        .reconciliation_info;

    let params_crc = crc::fingerprint(&req.spec.template_parameters);

    req.spec.template_name != info.template_name
        || req.spec.template_version != info.template_version
        || params_crc != info.template_params_crc
}

/// runs one reconciliation pass, mutating `req.status` in place.
pub async fn reconcile(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    if let Err(err) = backend.ensure_auth().await {
        let info = &mut req
            .status
            .as_mut()
            .expect("reconcile called before set_init_fields")
            .extensions
            .as_mut()
            .expect("reconcile called before set_init_fields")
            .reconciliation_info;
        info.record_transient_failure(format!("failed to authenticate, {err}"));
        sync_provisioning_status(req);
        return;
    }

    let state = {
        let info = &req
            .status
            .as_ref()
            .expect("reconcile called before set_init_fields")
            .extensions
            .as_ref()
            .expect("reconcile called before set_init_fields")
            .reconciliation_info;
        info.reconciliation_state
    };

    match state {
        ReconciliationState::Init => reconcile_init(req, backend).await,
        ReconciliationState::Provisioning => reconcile_provisioning(req, backend).await,
        ReconciliationState::PendingForPrevious => reconcile_pending_for_previous(req, backend).await,
        ReconciliationState::Completed | ReconciliationState::Error => {
            reconcile_stable(req, backend).await
        }
        ReconciliationState::Removing => reconcile_removing(req, backend).await,
        ReconciliationState::Deleted => {}
    }

    sync_provisioning_status(req);
}

/// recomputes the user-visible `provisioningStatus` from the internal ledger
/// after every tick, keeping `provisioningState` a pure function of
/// `reconciliationState`. `provisioningMessage` surfaces the last backend
/// failure when one is recorded, otherwise a short human-readable summary of
/// the current phase.
fn sync_provisioning_status(req: &mut ProvisioningRequest) {
    let (reconciliation_state, api_failure) = {
        let info = &req
            .status
            .as_ref()
            .expect("reconcile called before set_init_fields")
            .extensions
            .as_ref()
            .expect("reconcile called before set_init_fields")
            .reconciliation_info;
        (info.reconciliation_state, info.api_failure.clone())
    };

    let message = if !api_failure.is_empty() {
        api_failure
    } else {
        match reconciliation_state {
            ReconciliationState::Init => "provisioning the managed element".to_string(),
            ReconciliationState::Provisioning => "applying configuration and running the lifecycle operation".to_string(),
            ReconciliationState::PendingForPrevious => "waiting for the in-flight workflow to finish".to_string(),
            ReconciliationState::Completed => "managed element is provisioned and ready".to_string(),
            ReconciliationState::Removing => "tearing down the managed element".to_string(),
            ReconciliationState::Deleted => "managed element removed".to_string(),
            ReconciliationState::Error => "template validation failed".to_string(),
        }
    };

    let status = req
        .status
        .as_mut()
        .expect("reconcile called before set_init_fields");
    status.provisioning_status.provisioning_state = ProvisioningState::from(reconciliation_state);
    status.provisioning_status.provisioning_message = message;
    status.provisioning_status.provisioning_update_time = chrono::Utc::now();
}

fn info_mut(req: &mut ProvisioningRequest) -> &mut crate::svc::resource::ReconciliationInfo {
    &mut req
        .status
        .as_mut()
        .expect("reconcile called before set_init_fields")
        .extensions
        .as_mut()
        .expect("reconcile called before set_init_fields")
        .reconciliation_info
}

// -----------------------------------------------------------------------------
// Init

async fn reconcile_init(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    if info_mut(req).marked_for_deletion {
        info_mut(req).transition_to(ReconciliationState::Removing, Some(SubState::Undeploying));
        return;
    }

    match info_mut(req).sub_state {
        Some(SubState::WaitingOnMe) => reconcile_waiting_on_me(req, backend).await,
        _ => reconcile_create_me(req, backend).await,
    }
}

async fn reconcile_create_me(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    let spec = req.spec.clone();
    let me_name = req.id().to_string();

    if let Err(err) = backend.check_template_support(&spec.template_name, &spec.template_version).await {
        if err.is_transient() {
            info_mut(req).record_transient_failure(err.to_string());
        } else {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
        }
        return;
    }

    if let Err(err) = backend
        .verify_template_params(&spec.template_name, &spec.template_version, &spec.template_parameters)
        .await
    {
        if err.is_transient() {
            info_mut(req).record_transient_failure(err.to_string());
        } else {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
        }
        return;
    }

    let classification = match backend
        .get_me_details_from_template(&spec.template_name, &spec.template_version, &spec.template_parameters)
        .await
    {
        Ok(classification) => classification,
        Err(err) if err.is_transient() => {
            info_mut(req).record_transient_failure(err.to_string());
            return;
        }
        Err(err) => {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
            return;
        }
    };

    match backend
        .create_me(&me_name, &spec.description, &classification.product, &classification.kind)
        .await
    {
        Ok(()) => {}
        Err(err) if err.is_already_exists() => match backend.get_me(&me_name).await {
            Ok(existing) if existing.product == classification.product && existing.flavor == classification.kind => {}
            Ok(_) => {
                info_mut(req).transition_to(ReconciliationState::Error, None);
                info_mut(req).api_failure =
                    "existing managed element classification does not match the requested template".to_string();
                return;
            }
            Err(err) => {
                info_mut(req).record_transient_failure(err.to_string());
                return;
            }
        },
        Err(err) if err.is_transient() => {
            info_mut(req).record_transient_failure(err.to_string());
            return;
        }
        Err(err) => {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
            return;
        }
    }

    let info = info_mut(req);
    info.me_name = me_name;
    info.me_description = spec.description;
    info.me_product_type = classification.product;
    info.me_flavor_type = classification.kind;
    info.me_sw_ver = classification.software_version;
    info.transition_to(ReconciliationState::Init, Some(SubState::WaitingOnMe));

    // fallthrough: the managed element is known to exist in time for the
    // same tick to check on its readiness, rather than waiting a full cycle.
    reconcile_waiting_on_me(req, backend).await;
}

async fn reconcile_waiting_on_me(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    let me_name = info_mut(req).me_name.clone();

    let me = match backend.get_me(&me_name).await {
        Ok(me) => me,
        Err(err) if err.is_transient() || err.is_not_found() => {
            info_mut(req).record_transient_failure(err.to_string());
            return;
        }
        Err(err) => {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
            return;
        }
    };

    if me.state.administrative == AdministrativeState::Unlocked
        && matches!(
            me.state.operational,
            OperationalState::Ready | OperationalState::Defined | OperationalState::Error
        )
    {
        info_mut(req).transition_to(ReconciliationState::Provisioning, Some(SubState::CreateConfig));
    }
}

// -----------------------------------------------------------------------------
// Provisioning

async fn reconcile_provisioning(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    match info_mut(req).sub_state.unwrap_or(SubState::CreateConfig) {
        SubState::CreateConfig => reconcile_create_config(req, backend).await,
        SubState::PushConfig => reconcile_push_config(req, backend).await,
        SubState::OperationStart => reconcile_operation_start(req, backend).await,
        SubState::OperationMonitor => reconcile_operation_monitor(req, backend).await,
        _ => reconcile_create_config(req, backend).await,
    }
}

async fn reconcile_create_config(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    let spec = req.spec.clone();
    let desired_name = rfc1123(&format!("{}-{}", spec.template_name, spec.template_version));
    let desired_crc = crc::fingerprint(&spec.template_parameters);

    let already_applied = {
        let info = &req.status.as_ref().unwrap().extensions.as_ref().unwrap().reconciliation_info;
        info.template_params_applied && info.config_set_name == desired_name && info.config_set_crc == desired_crc
    };

    if !already_applied {
        let tree = match backend
            .gen_config_set(&spec.template_name, &spec.template_version, &spec.template_parameters)
            .await
        {
            Ok(tree) => tree,
            Err(err) if err.is_transient() => {
                info_mut(req).record_transient_failure(err.to_string());
                return;
            }
            Err(err) => {
                info_mut(req).transition_to(ReconciliationState::Error, None);
                info_mut(req).api_failure = err.to_string();
                return;
            }
        };

        // persisted as the node tree itself, not a flattened rendering: the
        // bundle packaged at PushConfig time needs the original
        // directory/file layout `gen_config_set` returned, not one merged
        // yaml document.
        let serialized = match serde_json::to_vec(&tree) {
            Ok(serialized) => serialized,
            Err(err) => {
                info_mut(req).transition_to(ReconciliationState::Error, None);
                info_mut(req).api_failure = format!("failed to serialize config tree, {err}");
                return;
            }
        };

        let me_name = info_mut(req).me_name.clone();
        let local_path = format!("/tmp/{me_name}-{desired_name}.yaml");
        if let Err(err) = std::fs::write(&local_path, serialized) {
            info_mut(req).record_transient_failure(format!("failed to persist config at {local_path}, {err}"));
            return;
        }

        let info = info_mut(req);
        info.config_set_name = desired_name;
        info.config_set_crc = desired_crc;
        info.template_params_applied = true;
        info.template_name = spec.template_name.clone();
        info.template_version = spec.template_version.clone();
        info.template_params_crc = desired_crc;
        info.last_update_time = Some(chrono::Utc::now());
    }

    // fallthrough: the config set is known, push it in the same tick.
    reconcile_push_config(req, backend).await;
}

async fn reconcile_push_config(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    let (me_name, config_set_name, sw_ver) = {
        let info = &req.status.as_ref().unwrap().extensions.as_ref().unwrap().reconciliation_info;
        (info.me_name.clone(), info.config_set_name.clone(), info.me_sw_ver.clone())
    };

    let local_path = format!("/tmp/{me_name}-{config_set_name}.yaml");
    let serialized = match std::fs::read(&local_path) {
        Ok(serialized) => serialized,
        Err(err) => {
            info_mut(req).record_transient_failure(format!("failed to read persisted config at {local_path}, {err}"));
            return;
        }
    };

    let tree: crate::svc::backend::ConfigNode = match serde_json::from_slice(&serialized) {
        Ok(tree) => tree,
        Err(err) => {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = format!("failed to parse persisted config tree, {err}");
            return;
        }
    };

    // the uploaded artifact is a gzip-compressed tar of the directory
    // tree `gen_config_set` returned.
    let bytes = match configbundle::package(&tree) {
        Ok(bytes) => bytes,
        Err(err) => {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = format!("failed to package config bundle, {err}");
            return;
        }
    };

    let opts = ConfigSetOpts {
        config_set_name: config_set_name.clone(),
        sw_version: sw_ver,
        description: format!("config set for {me_name}"),
    };

    if let Err(err) = backend.create_config_set(&me_name, &opts).await {
        if err.is_transient() {
            info_mut(req).record_transient_failure(err.to_string());
        } else {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
        }
        return;
    }

    if let Err(err) = backend
        .upload_config_set_file(&me_name, &config_set_name, "operator applied config", &bytes)
        .await
    {
        if err.is_transient() {
            info_mut(req).record_transient_failure(err.to_string());
        } else {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
        }
        return;
    }

    info_mut(req).transition_to(ReconciliationState::Provisioning, Some(SubState::OperationStart));
}

async fn reconcile_operation_start(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    if info_mut(req).marked_for_deletion {
        info_mut(req).transition_to(ReconciliationState::Removing, Some(SubState::Undeploying));
        return;
    }

    let me_name = info_mut(req).me_name.clone();

    let me = match backend.get_me(&me_name).await {
        Ok(me) => me,
        Err(err) if err.is_transient() || err.is_not_found() => {
            info_mut(req).record_transient_failure(err.to_string());
            return;
        }
        Err(err) => {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
            return;
        }
    };

    if me.state.administrative == AdministrativeState::Locked {
        info_mut(req).transition_to(ReconciliationState::PendingForPrevious, None);
        return;
    }

    let operation = if me.state.operational == OperationalState::Defined {
        LcmOperation::Deploy
    } else {
        LcmOperation::Update
    };

    let config_set_name = info_mut(req).config_set_name.clone();
    let request = LcmRequest {
        operation_name: operation,
        managed_elements: vec![me_name],
        config_set: Some(config_set_name),
        optional_lcm_params: serde_json::json!({}),
        additional_params: LcmAdditionalParams::default(),
    };

    match backend.run_lcm_operation(&request).await {
        Ok(workflow_id) => {
            let info = info_mut(req);
            info.workflow_id = workflow_id;
            info.omc_operation = Some(match operation {
                LcmOperation::Deploy => OmcOperation::Deploy,
                LcmOperation::Update => OmcOperation::Update,
                LcmOperation::Undeploy => OmcOperation::Undeploy,
            });
            info.transition_to(ReconciliationState::Provisioning, Some(SubState::OperationMonitor));
        }
        Err(err) if err.is_transient() => {
            info_mut(req).record_transient_failure(err.to_string());
        }
        Err(err) => {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
        }
    }
}

async fn reconcile_operation_monitor(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    let me_name = info_mut(req).me_name.clone();

    let me = match backend.get_me(&me_name).await {
        Ok(me) => me,
        Err(err) if err.is_transient() => {
            info_mut(req).record_transient_failure(err.to_string());
            return;
        }
        Err(err) => {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
            return;
        }
    };

    if me.state.administrative == AdministrativeState::Locked {
        let delete_requested = info_mut(req).marked_for_deletion;

        if delete_requested || spec_changed(req) {
            info_mut(req).transition_to(ReconciliationState::PendingForPrevious, None);
        }

        return;
    }

    if me.state.operational == OperationalState::Ready {
        info_mut(req).transition_to(ReconciliationState::Completed, None);
    } else {
        info_mut(req).transition_to(ReconciliationState::Error, None);
        info_mut(req).api_failure = format!(
            "managed element reached unexpected operational state {:?} while unlocked",
            me.state.operational
        );
    }
}

// -----------------------------------------------------------------------------
// PendingForPrevious

async fn reconcile_pending_for_previous(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    let me_name = info_mut(req).me_name.clone();

    let me = match backend.get_me(&me_name).await {
        Ok(me) => me,
        Err(err) if err.is_transient() => {
            info_mut(req).record_transient_failure(err.to_string());
            return;
        }
        Err(err) => {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
            return;
        }
    };

    if me.state.administrative != AdministrativeState::Unlocked {
        return;
    }

    if info_mut(req).marked_for_deletion {
        info_mut(req).transition_to(ReconciliationState::Removing, Some(SubState::Undeploying));
        return;
    }

    // consult the latest spec on the way back in: edits received while
    // pending were ignored above, so pick them up as the new target now.
    let spec = req.spec.clone();
    let params_crc = crc::fingerprint(&spec.template_parameters);
    let info = info_mut(req);
    info.template_name = spec.template_name;
    info.template_version = spec.template_version;
    info.template_params_crc = params_crc;
    info.template_params_applied = false;
    info.transition_to(ReconciliationState::Provisioning, Some(SubState::CreateConfig));
}

// -----------------------------------------------------------------------------
// Completed / Error

async fn reconcile_stable(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    if info_mut(req).marked_for_deletion {
        info_mut(req).transition_to(ReconciliationState::Removing, Some(SubState::Undeploying));
        return;
    }

    if !spec_changed(req) {
        return;
    }

    let spec = req.spec.clone();

    // admission happens inline rather than through a dedicated sub-state:
    // completed/errored resources are not mid-workflow, so there is nothing
    // to fall through from.
    if let Err(err) = backend.check_template_support(&spec.template_name, &spec.template_version).await {
        if err.is_transient() {
            info_mut(req).record_transient_failure(err.to_string());
        } else {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
        }
        return;
    }

    if let Err(err) = backend
        .verify_template_params(&spec.template_name, &spec.template_version, &spec.template_parameters)
        .await
    {
        if err.is_transient() {
            info_mut(req).record_transient_failure(err.to_string());
        } else {
            info_mut(req).transition_to(ReconciliationState::Error, None);
            info_mut(req).api_failure = err.to_string();
        }
        return;
    }

    let params_crc = crc::fingerprint(&spec.template_parameters);
    let info = info_mut(req);
    info.template_name = spec.template_name;
    info.template_version = spec.template_version;
    info.template_params_crc = params_crc;
    info.template_params_applied = false;
    info.transition_to(ReconciliationState::Provisioning, Some(SubState::CreateConfig));
}

// -----------------------------------------------------------------------------
// Removing

async fn reconcile_removing(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    match info_mut(req).sub_state.unwrap_or(SubState::Undeploying) {
        SubState::WaitingForUndeploying => reconcile_waiting_for_undeploying(req, backend).await,
        SubState::RemovingMe => reconcile_removing_me(req, backend).await,
        _ => reconcile_undeploying(req, backend).await,
    }
}

async fn reconcile_undeploying(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    let me_name = info_mut(req).me_name.clone();

    let request = LcmRequest {
        operation_name: LcmOperation::Undeploy,
        managed_elements: vec![me_name.clone()],
        config_set: None,
        optional_lcm_params: serde_json::json!({}),
        additional_params: LcmAdditionalParams {
            unmanage_compute: true,
            delete_vpod: true,
            delete_relay: true,
            prompt_for_error: true,
        },
    };

    match backend.run_lcm_operation(&request).await {
        Ok(workflow_id) => {
            let info = info_mut(req);
            info.workflow_id = workflow_id;
            info.omc_operation = Some(OmcOperation::Undeploy);
            info.transition_to(ReconciliationState::Removing, Some(SubState::WaitingForUndeploying));
        }
        Err(err) if err.is_not_found() => {
            info_mut(req).transition_to(ReconciliationState::Deleted, None);
        }
        Err(err) => {
            info_mut(req).record_transient_failure(err.to_string());
        }
    }
}

async fn reconcile_waiting_for_undeploying(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    let me_name = info_mut(req).me_name.clone();

    let me = match backend.get_me(&me_name).await {
        Ok(me) => me,
        Err(err) if err.is_not_found() => {
            info_mut(req).transition_to(ReconciliationState::Deleted, None);
            return;
        }
        Err(err) => {
            info_mut(req).record_transient_failure(err.to_string());
            return;
        }
    };

    if me.state.administrative == AdministrativeState::Unlocked && me.state.operational == OperationalState::Defined
    {
        info_mut(req).transition_to(ReconciliationState::Removing, Some(SubState::RemovingMe));
    }
}

async fn reconcile_removing_me(req: &mut ProvisioningRequest, backend: &dyn BackendAdapter) {
    let me_name = info_mut(req).me_name.clone();

    match backend.delete_me(&me_name).await {
        Ok(()) => info_mut(req).transition_to(ReconciliationState::Deleted, None),
        Err(err) if err.is_not_found() => info_mut(req).transition_to(ReconciliationState::Deleted, None),
        Err(err) => info_mut(req).record_transient_failure(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svc::{backend::simulator::SimulatorBackend, resource::ManagedResource};
    use serde_json::json;

    fn request(name: &str, template: &str, params: serde_json::Value) -> ProvisioningRequest {
        let mut req = ProvisioningRequest::new(
            name,
            crate::svc::resource::ProvisioningRequestSpec {
                template_name: template.to_string(),
                template_version: "v1".to_string(),
                template_parameters: params.clone(),
                description: "integration test".to_string(),
            },
        );
        req.set_init_fields(
            name,
            crate::svc::resource::ProvisioningRequestSpec {
                template_name: template.to_string(),
                template_version: "v1".to_string(),
                template_parameters: params,
                description: "integration test".to_string(),
            },
        )
        .unwrap();
        req
    }

    fn state(req: &ProvisioningRequest) -> (ReconciliationState, Option<SubState>) {
        let info = &req.status.as_ref().unwrap().extensions.as_ref().unwrap().reconciliation_info;
        (info.reconciliation_state, info.sub_state)
    }

    /// ticks until `target` is reached or `max_ticks` is exhausted, whichever
    /// comes first, returning the number of ticks actually spent.
    async fn run_until(
        req: &mut ProvisioningRequest,
        backend: &dyn BackendAdapter,
        target: ReconciliationState,
        max_ticks: u32,
    ) -> u32 {
        for tick in 1..=max_ticks {
            reconcile(req, backend).await;
            if state(req).0 == target {
                return tick;
            }
        }

        panic!("did not reach {target:?} within {max_ticks} ticks, stuck at {:?}", state(req));
    }

    #[tokio::test]
    async fn e1_happy_path_reaches_completed() {
        let backend = SimulatorBackend::new(1);
        let mut req = request("req-1", "single-node-lpg2", json!({"node_count": 3}));

        run_until(&mut req, &backend, ReconciliationState::Completed, 10).await;

        let info = &req.status.as_ref().unwrap().extensions.as_ref().unwrap().reconciliation_info;
        assert_eq!(info.me_product_type, "CNIS");
        assert!(info.template_params_applied);
    }

    #[tokio::test]
    async fn e2_transient_failure_retries_without_changing_state() {
        let backend = SimulatorBackend::new(1);
        let mut req = request("req-2", "single-node-lpg2", json!({}));
        info_mut(&mut req).me_name = "req-2".to_string();
        info_mut(&mut req).transition_to(ReconciliationState::Init, Some(SubState::WaitingOnMe));

        reconcile(&mut req, &backend).await;

        let (state, _) = state(&req);
        assert_eq!(state, ReconciliationState::Init);
        let info = &req.status.as_ref().unwrap().extensions.as_ref().unwrap().reconciliation_info;
        assert_eq!(info.api_retry_count, 1);
    }

    #[tokio::test]
    async fn e4_deletion_from_completed_routes_to_removing() {
        let backend = SimulatorBackend::new(0);
        let mut req = request("req-4", "single-node-lpg2", json!({}));

        run_until(&mut req, &backend, ReconciliationState::Completed, 10).await;

        req.set_delete_flag();
        run_until(&mut req, &backend, ReconciliationState::Removing, 1).await;
        assert_eq!(state(&req).1, Some(SubState::Undeploying));

        run_until(&mut req, &backend, ReconciliationState::Deleted, 5).await;
    }

    #[tokio::test]
    async fn e6_hard_admission_failure_transitions_to_error() {
        let backend = SimulatorBackend::new(1);
        let mut req = request("req-6", "nope", json!({}));

        reconcile(&mut req, &backend).await;

        assert_eq!(state(&req).0, ReconciliationState::Error);
        let info = &req.status.as_ref().unwrap().extensions.as_ref().unwrap().reconciliation_info;
        assert!(!info.api_failure.is_empty());
    }

    #[test]
    fn rfc1123_strips_invalid_characters_and_caps_length() {
        let out = rfc1123("Single Node/LPG2_v1..");
        assert!(out.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.'));
        assert!(out.len() <= 63);
        assert!(!out.ends_with('.'));
    }
}
