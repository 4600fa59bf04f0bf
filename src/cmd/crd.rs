//! # Custom resource definition module
//!
//! This module provides the `custom-resource-definition` command line
//! interface function implementation, plus the startup helper that installs
//! the files listed under `crd.files[]` onto the cluster before the
//! watcher starts.

use std::{path::Path, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition as K8sCrd;
use kube::{
    api::{Patch, PatchParams},
    Api, CustomResourceExt,
};

use crate::{
    cmd::Executor,
    svc::{cfg::Configuration, k8s::client, resource::ProvisioningRequest},
};

// -----------------------------------------------------------------------------
// CustomResourceDefinitionError enum

#[derive(thiserror::Error, Debug)]
pub enum CustomResourceDefinitionError {
    #[error("failed to serialize custom resource definition, {0}")]
    Serialize(serde_yaml::Error),
    #[error("failed to read custom resource definition file '{0}', {1}")]
    Read(String, std::io::Error),
    #[error("failed to parse custom resource definition file '{0}', {1}")]
    Parse(String, serde_yaml::Error),
    #[error("failed to install custom resource definition '{0}', {1}")]
    Install(String, kube::Error),
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
}

// -----------------------------------------------------------------------------
// CustomResourceDefinition command line interface

#[derive(clap::Args, Clone, Debug)]
pub struct CustomResourceDefinition {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(clap::Subcommand, Clone, Debug)]
pub enum Action {
    /// Print the provisioning request custom resource definition as yaml
    View,
    /// Install the custom resource definition files listed under 'crd.files' onto the cluster
    Install {
        /// Specify location of kubeconfig
        #[arg(short = 'k', long = "kubeconfig")]
        kubeconfig: Option<PathBuf>,
    },
}

#[async_trait]
impl Executor for CustomResourceDefinition {
    type Error = CustomResourceDefinitionError;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match &self.action {
            Action::View => view(config).await,
            Action::Install { kubeconfig } => {
                let client = client::try_new(kubeconfig.to_owned())
                    .await
                    .map_err(CustomResourceDefinitionError::Client)?;

                install(client, &config.crd.files).await
            }
        }
    }
}

// -----------------------------------------------------------------------------
// view function

/// prints the `ProvisioningRequest` custom resource definition as YAML.
pub async fn view(_config: Arc<Configuration>) -> Result<(), CustomResourceDefinitionError> {
    let rendered = serde_yaml::to_string(&ProvisioningRequest::crd())
        .map_err(CustomResourceDefinitionError::Serialize)?;

    print!("{rendered}");
    Ok(())
}

/// installs every custom resource definition file named under
/// `crd.files[]` onto the cluster, applying each via a server-side patch so
/// re-running the daemon is idempotent.
pub async fn install(
    client: kube::Client,
    files: &[impl AsRef<Path>],
) -> Result<(), CustomResourceDefinitionError> {
    let api: Api<K8sCrd> = Api::all(client);

    for path in files {
        let path = path.as_ref();
        let display = path.display().to_string();

        let raw = std::fs::read_to_string(path)
            .map_err(|err| CustomResourceDefinitionError::Read(display.clone(), err))?;
        let crd: K8sCrd = serde_yaml::from_str(&raw)
            .map_err(|err| CustomResourceDefinitionError::Parse(display.clone(), err))?;
        let name = crd.metadata.name.clone().unwrap_or_default();

        api.patch(
            &name,
            &PatchParams::apply("provisioning-operator"),
            &Patch::Apply(&crd),
        )
        .await
        .map_err(|err| CustomResourceDefinitionError::Install(name, err))?;
    }

    Ok(())
}
