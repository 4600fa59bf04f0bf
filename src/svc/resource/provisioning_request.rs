//! # ProvisioningRequest module
//!
//! This module provides the `ProvisioningRequest` custom resource: the
//! single domain entity the whole operator exists to reconcile.

use async_trait::async_trait;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::svc::{
    backend::BackendAdapter,
    crc,
    resource::{
        reconcile, CompareError, InitError, ManagedResource, ProvisioningStatus,
        ReconciliationInfo,
    },
};

// -----------------------------------------------------------------------------
// ProvisioningRequestSpec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "provisioning.o2ims.io")]
#[kube(version = "v1alpha1")]
#[kube(kind = "ProvisioningRequest")]
#[kube(singular = "provisioningrequest")]
#[kube(plural = "provisioningrequests")]
#[kube(shortname = "pr")]
#[kube(status = "ProvisioningRequestStatus")]
#[kube(namespaced)]
#[kube(apiextensions = "v1")]
#[kube(derive = "PartialEq")]
pub struct ProvisioningRequestSpec {
    #[serde(rename = "templateName")]
    pub template_name: String,
    #[serde(rename = "templateVersion")]
    pub template_version: String,
    #[serde(rename = "templateParameters")]
    pub template_parameters: serde_json::Value,
    #[serde(rename = "description", default)]
    pub description: String,
}

// -----------------------------------------------------------------------------
// ProvisioningRequestStatus structure

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct Extensions {
    #[serde(rename = "reconciliationInfo")]
    pub reconciliation_info: ReconciliationInfoWire,
}

/// mirrors [`ReconciliationInfo`] for (de)serialization; kept as a distinct
/// type so a schema-level change to the wire shape does not have to ripple
/// through the in-memory ledger the reconciler mutates directly.
pub type ReconciliationInfoWire = ReconciliationInfo;

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct ProvisioningRequestStatus {
    #[serde(rename = "provisioningStatus", default)]
    pub provisioning_status: ProvisioningStatusWire,
    #[serde(rename = "extensions", skip_serializing_if = "Option::is_none", default)]
    pub extensions: Option<Extensions>,
    #[serde(rename = "provisionedResources", skip_serializing_if = "Option::is_none", default)]
    pub provisioned_resources: Option<Vec<String>>,
}

pub type ProvisioningStatusWire = ProvisioningStatus;

impl PartialEq for ProvisioningStatus {
    fn eq(&self, other: &Self) -> bool {
        self.provisioning_state == other.provisioning_state
            && self.provisioning_message == other.provisioning_message
    }
}

impl PartialEq for ReconciliationInfo {
    fn eq(&self, other: &Self) -> bool {
        self.reconciliation_state == other.reconciliation_state
            && self.sub_state == other.sub_state
            && self.template_name == other.template_name
            && self.template_version == other.template_version
            && self.template_params_crc == other.template_params_crc
            && self.marked_for_deletion == other.marked_for_deletion
    }
}

// -----------------------------------------------------------------------------
// ManagedResource implementation

#[async_trait]
impl ManagedResource for ProvisioningRequest {
    fn id(&self) -> &str {
        self.metadata
            .name
            .as_deref()
            .unwrap_or_default()
    }

    fn set_init_fields(
        &mut self,
        id: &str,
        spec: ProvisioningRequestSpec,
    ) -> Result<(), InitError> {
        if id.is_empty() {
            return Err(InitError::EmptyName);
        }
        if spec.template_name.is_empty() {
            return Err(InitError::MissingField("templateName"));
        }
        if spec.template_version.is_empty() {
            return Err(InitError::MissingField("templateVersion"));
        }
        if spec.template_parameters.is_null() {
            return Err(InitError::MissingField("templateParameters"));
        }

        self.metadata.name = Some(id.to_string());
        self.spec = spec.clone();

        let mut info = ReconciliationInfo::default();
        info.template_name = spec.template_name;
        info.template_version = spec.template_version;
        info.template_params_crc = crc::fingerprint(&spec.template_parameters);

        self.status = Some(ProvisioningRequestStatus {
            provisioning_status: ProvisioningStatus::default(),
            extensions: Some(Extensions {
                reconciliation_info: info,
            }),
            provisioned_resources: None,
        });

        Ok(())
    }

    fn compare(
        &mut self,
        observed: ProvisioningRequestSpec,
        apply: bool,
    ) -> Result<bool, CompareError> {
        let status = self
            .status
            .get_or_insert_with(|| ProvisioningRequestStatus {
                provisioning_status: ProvisioningStatus::default(),
                extensions: Some(Extensions {
                    reconciliation_info: ReconciliationInfo::default(),
                }),
                provisioned_resources: None,
            });
        let extensions = status
            .extensions
            .get_or_insert_with(|| Extensions {
                reconciliation_info: ReconciliationInfo::default(),
            });
        let info = &extensions.reconciliation_info;

        let params_crc = crc::fingerprint(&observed.template_parameters);
        let changed = observed.template_name != info.template_name
            || observed.template_version != info.template_version
            || params_crc != info.template_params_crc;

        if apply {
            self.spec = observed;
        }

        Ok(changed)
    }

    fn status(&self) -> ProvisioningStatus {
        self.status
            .as_ref()
            .map(|status| status.provisioning_status.clone())
            .unwrap_or_default()
    }

    fn delete_flag(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|status| status.extensions.as_ref())
            .map(|extensions| extensions.reconciliation_info.marked_for_deletion)
            .unwrap_or(false)
    }

    fn is_deleted(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|status| status.extensions.as_ref())
            .map(|extensions| extensions.reconciliation_info.reconciliation_state == crate::svc::resource::ReconciliationState::Deleted)
            .unwrap_or(false)
    }

    fn set_delete_flag(&mut self) {
        if let Some(status) = self.status.as_mut() {
            if let Some(extensions) = status.extensions.as_mut() {
                extensions.reconciliation_info.marked_for_deletion = true;
                return;
            }
        }

        let mut info = ReconciliationInfo::default();
        info.marked_for_deletion = true;

        self.status = Some(ProvisioningRequestStatus {
            provisioning_status: ProvisioningStatus::default(),
            extensions: Some(Extensions {
                reconciliation_info: info,
            }),
            provisioned_resources: None,
        });
    }

    async fn reconcile(&mut self, backend: &dyn BackendAdapter) {
        reconcile::reconcile(self, backend).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(params: serde_json::Value) -> ProvisioningRequestSpec {
        ProvisioningRequestSpec {
            template_name: "single-node-lpg2".to_string(),
            template_version: "cnis-1.15_v1".to_string(),
            template_parameters: params,
            description: String::new(),
        }
    }

    #[test]
    fn set_init_fields_rejects_empty_id() {
        let mut req = ProvisioningRequest::new("placeholder", spec(json!({})));
        let err = req.set_init_fields("", spec(json!({}))).unwrap_err();
        assert!(matches!(err, InitError::EmptyName));
    }

    #[test]
    fn set_init_fields_is_idempotent() {
        let mut a = ProvisioningRequest::new("req-1", spec(json!({"node_count": 3})));
        let mut b = a.clone();

        a.set_init_fields("req-1", spec(json!({"node_count": 3})))
            .unwrap();
        b.set_init_fields("req-1", spec(json!({"node_count": 3})))
            .unwrap();

        let info_a = &a.status.as_ref().unwrap().extensions.as_ref().unwrap().reconciliation_info;
        let info_b = &b.status.as_ref().unwrap().extensions.as_ref().unwrap().reconciliation_info;

        assert_eq!(info_a.template_params_crc, info_b.template_params_crc);
        assert_eq!(info_a.reconciliation_state, info_b.reconciliation_state);
    }

    #[test]
    fn compare_detects_param_drift() {
        let mut req = ProvisioningRequest::new("req-1", spec(json!({"node_count": 3})));
        req.set_init_fields("req-1", spec(json!({"node_count": 3})))
            .unwrap();

        let changed = req.compare(spec(json!({"node_count": 4})), false).unwrap();
        assert!(changed);
    }

    #[test]
    fn round_trip_encode_decode_is_equal() {
        let mut req = ProvisioningRequest::new("req-1", spec(json!({"node_count": 3})));
        req.set_init_fields("req-1", spec(json!({"node_count": 3})))
            .unwrap();

        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: ProvisioningRequest = serde_json::from_str(&encoded).unwrap();

        assert_eq!(req.spec, decoded.spec);
        assert_eq!(req.status, decoded.status);
    }
}
