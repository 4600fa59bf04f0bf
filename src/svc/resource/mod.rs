//! # Resource module
//!
//! This module provides the ProvisioningRequest domain entity, its
//! reconciliation ledger, and the polymorphic capability contract the
//! Resource Store and Watcher drive resources through. Only
//! [`ProvisioningRequest`] implements [`ManagedResource`] today, but the
//! Store/Watcher stay generic over the trait because it is load-bearing for
//! future resource kinds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::svc::backend::BackendAdapter;

pub mod provisioning_request;
pub mod reconcile;

pub use provisioning_request::{ProvisioningRequest, ProvisioningRequestSpec};

// -----------------------------------------------------------------------------
// ReconciliationState / SubState enums

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ReconciliationState {
    #[default]
    Init,
    Provisioning,
    PendingForPrevious,
    Completed,
    Error,
    Removing,
    Deleted,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum SubState {
    CreateMe,
    WaitingOnMe,
    CreateConfig,
    PushConfig,
    OperationStart,
    OperationMonitor,
    Undeploying,
    WaitingForUndeploying,
    RemovingMe,
}

/// derived, user-visible progress. pure function of [`ReconciliationState`].
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningState {
    Progressing,
    Fulfilled,
    Deleting,
    Failed,
    Unknown,
}

impl From<ReconciliationState> for ProvisioningState {
    fn from(state: ReconciliationState) -> Self {
        match state {
            ReconciliationState::Init
            | ReconciliationState::PendingForPrevious
            | ReconciliationState::Provisioning => ProvisioningState::Progressing,
            ReconciliationState::Completed => ProvisioningState::Fulfilled,
            ReconciliationState::Removing => ProvisioningState::Deleting,
            ReconciliationState::Error => ProvisioningState::Failed,
            ReconciliationState::Deleted => ProvisioningState::Deleting,
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OmcOperation {
    Deploy,
    Update,
    Undeploy,
}

// -----------------------------------------------------------------------------
// ProvisioningStatus structure

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct ProvisioningStatus {
    pub provisioning_state: ProvisioningState,
    pub provisioning_message: String,
    pub provisioning_update_time: DateTime<Utc>,
}

impl Default for ProvisioningStatus {
    fn default() -> Self {
        Self {
            provisioning_state: ProvisioningState::Unknown,
            provisioning_message: String::new(),
            provisioning_update_time: Utc::now(),
        }
    }
}

// -----------------------------------------------------------------------------
// ReconciliationInfo structure
//
// operator-internal ledger. modelled as a record with named fields,
// rather than as a free-form map, while still nesting under
// `status.extensions.reconciliationInfo` on the wire (see
// `ProvisioningRequestStatus`).

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct ReconciliationInfo {
    pub reconciliation_state: ReconciliationState,
    pub sub_state: Option<SubState>,
    pub api_failure: String,
    /// consecutive backend failures at the current substate.
    ///
    /// intentionally unbounded. a future revision could escalate to `Error`
    /// after N consecutive failures; until that value is chosen this field
    /// is left to grow without a cap.
    pub api_retry_count: u32,
    pub back_off_time: Option<DateTime<Utc>>,
    pub marked_for_deletion: bool,
    pub template_name: String,
    pub template_version: String,
    pub template_params_crc: u32,
    pub template_params_applied: bool,
    pub workflow_id: String,
    pub config_set_name: String,
    pub config_set_crc: u32,
    pub me_name: String,
    pub me_description: String,
    pub me_product_type: String,
    pub me_flavor_type: String,
    pub me_sw_ver: String,
    pub omc_operation: Option<OmcOperation>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub transition_time: Option<DateTime<Utc>>,
    pub reconciliation_timeout: Option<String>,
}

impl Default for ReconciliationInfo {
    fn default() -> Self {
        let now = Utc::now();

        Self {
            reconciliation_state: ReconciliationState::Init,
            sub_state: Some(SubState::CreateMe),
            api_failure: String::new(),
            api_retry_count: 0,
            back_off_time: None,
            marked_for_deletion: false,
            template_name: String::new(),
            template_version: String::new(),
            template_params_crc: 0,
            template_params_applied: false,
            workflow_id: String::new(),
            config_set_name: String::new(),
            config_set_crc: 0,
            me_name: String::new(),
            me_description: String::new(),
            me_product_type: String::new(),
            me_flavor_type: String::new(),
            me_sw_ver: String::new(),
            omc_operation: None,
            start_time: Some(now),
            end_time: None,
            last_update_time: Some(now),
            transition_time: Some(now),
            reconciliation_timeout: None,
        }
    }
}

impl ReconciliationInfo {
    /// resets retry/backoff/substate bookkeeping and stamps `transitionTime`.
    pub fn transition_to(&mut self, state: ReconciliationState, sub_state: Option<SubState>) {
        let now = Utc::now();

        self.reconciliation_state = state;
        self.sub_state = sub_state;
        self.api_failure.clear();
        self.api_retry_count = 0;
        self.back_off_time = None;
        self.transition_time = Some(now);
        self.last_update_time = Some(now);

        if matches!(
            state,
            ReconciliationState::Completed | ReconciliationState::Error | ReconciliationState::Deleted
        ) {
            self.end_time = Some(now);
            self.sub_state = None;
            self.workflow_id.clear();
            self.omc_operation = None;
        }
    }

    /// records a transient backend failure at the current substate,
    /// incrementing the retry counter.
    pub fn record_transient_failure(&mut self, message: impl Into<String>) {
        self.api_failure = message.into();
        self.api_retry_count += 1;
        self.last_update_time = Some(Utc::now());
    }
}

// -----------------------------------------------------------------------------
// Errors

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("Name cannot be empty")]
    EmptyName,
    #[error("spec field '{0}' is required")]
    MissingField(&'static str),
}

#[derive(thiserror::Error, Debug)]
pub enum CompareError {
    #[error("observed spec is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("admission check rejected the spec, {0}")]
    Admission(String),
}

// -----------------------------------------------------------------------------
// ManagedResource trait
//
// the polymorphic capability set the Resource Store and Watcher are generic
// over, so future resource kinds can plug in without touching either. only
// `ProvisioningRequest` implements it today.

#[async_trait]
pub trait ManagedResource: Sized + Clone + Send + Sync + std::fmt::Debug {
    /// stable, immutable identifier; equals the resource name.
    fn id(&self) -> &str;

    /// populates reconciliation bookkeeping for a freshly observed record.
    /// idempotent: two consecutive calls with the same `spec` produce an
    /// identical ledger (testable property 2).
    fn set_init_fields(&mut self, id: &str, spec: ProvisioningRequestSpec) -> Result<(), InitError>;

    /// detects and, if `apply`, absorbs spec drift. returns whether the
    /// spec changed relative to the currently targeted snapshot.
    fn compare(&mut self, observed: ProvisioningRequestSpec, apply: bool) -> Result<bool, CompareError>;

    fn status(&self) -> ProvisioningStatus;

    fn delete_flag(&self) -> bool;

    /// monotonic: once set, stays set until the record is evicted
    /// (testable property 4).
    fn set_delete_flag(&mut self);

    /// whether reconciliation reached the terminal `Deleted` state, at
    /// which point the store should evict the record rather than persist
    /// another status update.
    fn is_deleted(&self) -> bool;

    /// one pass of the state machine: observe, compute next state, act via
    /// the backend adapter, persist into the ledger.
    async fn reconcile(&mut self, backend: &dyn BackendAdapter);
}
