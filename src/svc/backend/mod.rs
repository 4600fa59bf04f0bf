//! # Backend adapter module
//!
//! This module provides the capability contract towards the external
//! Managed-Element (ME) orchestration backend, along with its concrete
//! implementations.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod rest;
pub mod simulator;

// -----------------------------------------------------------------------------
// AdministrativeState / OperationalState enums

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
pub enum AdministrativeState {
    Locked,
    Unlocked,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
pub enum OperationalState {
    New,
    Defined,
    Ready,
    Error,
    Install,
    Upgrade,
    Uninstall,
    Reinstall,
    Maintenance,
    Validation,
    Import,
}

// -----------------------------------------------------------------------------
// ManagedElement structure

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ManagedElementState {
    pub administrative: AdministrativeState,
    pub operational: OperationalState,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ManagedElement {
    pub name: String,
    pub description: String,
    pub product: String,
    pub flavor: String,
    pub state: ManagedElementState,
}

// -----------------------------------------------------------------------------
// Template classification

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TemplateClassification {
    pub product: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub software_version: String,
}

// -----------------------------------------------------------------------------
// Config set tree

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConfigNode {
    Directory {
        name: String,
        contents: Vec<ConfigNode>,
    },
    Yaml {
        name: String,
        content: serde_json::Value,
    },
    Text {
        name: String,
        content: String,
    },
}

impl ConfigNode {
    pub fn name(&self) -> &str {
        match self {
            ConfigNode::Directory { name, .. } => name,
            ConfigNode::Yaml { name, .. } => name,
            ConfigNode::Text { name, .. } => name,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConfigSetOpts {
    pub config_set_name: String,
    pub sw_version: String,
    pub description: String,
}

// -----------------------------------------------------------------------------
// LCM operation

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
pub enum LcmOperation {
    Deploy,
    Update,
    Undeploy,
}

impl LcmOperation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LcmOperation::Deploy => "deploy",
            LcmOperation::Update => "update",
            LcmOperation::Undeploy => "undeploy",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct LcmAdditionalParams {
    #[serde(default)]
    pub unmanage_compute: bool,
    #[serde(default)]
    pub delete_vpod: bool,
    #[serde(default)]
    pub delete_relay: bool,
    #[serde(default)]
    pub prompt_for_error: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LcmRequest {
    pub operation_name: LcmOperation,
    pub managed_elements: Vec<String>,
    pub config_set: Option<String>,
    pub optional_lcm_params: serde_json::Value,
    pub additional_params: LcmAdditionalParams,
}

// -----------------------------------------------------------------------------
// Workflow

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    New,
    Running,
    Paused,
    Waiting,
    Aborting,
    Aborted,
    Recovering,
    Recovered,
    Failed,
    Succeeded,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Workflow {
    pub id: String,
    pub state: WorkflowState,
    pub operation: LcmOperation,
    pub last_update_time: chrono::DateTime<chrono::Utc>,
}

// -----------------------------------------------------------------------------
// Error classification

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("managed element '{0}' not found")]
    NotFound(String),
    #[error("managed element '{0}' already exists")]
    AlreadyExists(String),
    #[error("transient backend failure, {0}")]
    Transient(String),
    #[error("permanent backend failure, {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, BackendError::AlreadyExists(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

// -----------------------------------------------------------------------------
// BackendAdapter trait

/// uniform capability set the reconciler drives the external orchestration
/// backend through.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// idempotent; refreshes a bearer token whose remaining validity is
    /// below a safety margin. all other operations call this first.
    async fn ensure_auth(&self) -> Result<(), BackendError>;

    async fn get_me(&self, name: &str) -> Result<ManagedElement, BackendError>;

    async fn create_me(
        &self,
        name: &str,
        description: &str,
        product: &str,
        flavor: &str,
    ) -> Result<(), BackendError>;

    async fn delete_me(&self, name: &str) -> Result<(), BackendError>;

    async fn get_me_details_from_template(
        &self,
        template_name: &str,
        template_version: &str,
        params: &serde_json::Value,
    ) -> Result<TemplateClassification, BackendError>;

    async fn check_template_support(
        &self,
        template_name: &str,
        template_version: &str,
    ) -> Result<(), BackendError>;

    async fn verify_template_params(
        &self,
        template_name: &str,
        template_version: &str,
        params: &serde_json::Value,
    ) -> Result<(), BackendError>;

    async fn gen_config_set(
        &self,
        template_name: &str,
        template_version: &str,
        params: &serde_json::Value,
    ) -> Result<ConfigNode, BackendError>;

    async fn create_config_set(
        &self,
        me_name: &str,
        opts: &ConfigSetOpts,
    ) -> Result<(), BackendError>;

    async fn upload_config_set_file(
        &self,
        me_name: &str,
        config_set_name: &str,
        commit_message: &str,
        bytes: &[u8],
    ) -> Result<(), BackendError>;

    async fn run_lcm_operation(&self, request: &LcmRequest) -> Result<String, BackendError>;

    async fn get_workflow(&self, id: &str) -> Result<Workflow, BackendError>;
}
