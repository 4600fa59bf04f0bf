//! # Command module
//!
//! This module provides command line interface structures and helpers, plus
//! the `daemon` entrypoint that wires together the configured Backend
//! Adapter, Resource Store and HTTP façade before handing control to the
//! watcher's control loop.

use std::{io, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::svc::{
    backend::{rest::RestBackend, simulator::SimulatorBackend, BackendAdapter},
    cfg::{BackendType, Configuration, DataStore},
    http,
    k8s::client,
    resource::ProvisioningRequest,
    store::{json::JsonStore, k8s::ClusterStore, FacadeStore},
    watcher::Watcher,
};

pub mod crd;

const KIND: &str = "ProvisioningRequest";

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<Error>),
    #[error("failed to execute command, {0}")]
    CustomResourceDefinition(crd::CustomResourceDefinitionError),
    #[error("failed to run daemon, {0}")]
    Daemon(DaemonError),
}

impl From<DaemonError> for Error {
    fn from(err: DaemonError) -> Self {
        Self::Daemon(err)
    }
}

// -----------------------------------------------------------------------------
// Command enum

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Interact with the provisioning request custom resource definition
    #[command(name = "custom-resource-definition", visible_alias = "crd")]
    CustomResourceDefinition(crd::CustomResourceDefinition),
}

#[async_trait]
impl Executor for Command {
    type Error = Error;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::CustomResourceDefinition(crd) => crd
                .execute(config)
                .await
                .map_err(Error::CustomResourceDefinition)
                .map_err(|err| Error::Execution("custom-resource-definition".into(), Arc::new(err))),
        }
    }
}

// -----------------------------------------------------------------------------
// Args struct

#[derive(Parser, Clone, Debug)]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity
    #[arg(short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of kubeconfig
    #[arg(short = 'k', long = "kubeconfig", global = true)]
    pub kubeconfig: Option<PathBuf>,
    /// Specify location of configuration
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy
    #[arg(short = 't', long = "check", global = true)]
    pub check: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

// -----------------------------------------------------------------------------
// DaemonError enum

#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("failed to handle termination signal, {0}")]
    SigTerm(io::Error),
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to install custom resource definitions, {0}")]
    CustomResourceDefinition(crd::CustomResourceDefinitionError),
    #[error("failed to create file-based resource store, {0}")]
    JsonStore(crate::svc::store::StoreError),
    #[error("failed to serve http façade, {0}")]
    Server(http::server::Error),
}

// -----------------------------------------------------------------------------
// Backend Adapter selection

fn backend(config: &Configuration) -> Arc<dyn BackendAdapter> {
    match config.backend_type {
        BackendType::OmcRestV1 => Arc::new(RestBackend::new(
            config.omc.url.to_owned(),
            &config.omc.username,
            &config.omc.password,
        )),
        BackendType::OmcRestSimulator => Arc::new(SimulatorBackend::new(3)),
    }
}

// -----------------------------------------------------------------------------
// daemon function

/// builds the configured Backend Adapter and Resource Store, installs any
/// configured custom resource definitions, then runs the watcher's control
/// loop alongside the HTTP façade until a termination signal arrives.
///
/// branches into two full wiring paths rather than a single dyn-dispatched
/// one: [`Watcher`] is generic over its store so the control loop never pays
/// for dynamic dispatch on its hot path, at the cost of this one place
/// knowing about both concrete stores.
pub async fn daemon(kubeconfig: Option<PathBuf>, config: Arc<Configuration>) -> Result<(), DaemonError> {
    let backend = backend(&config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let (watcher_handle, facade_store): (tokio::task::JoinHandle<()>, Arc<dyn FacadeStore>) = match config.data_store {
        DataStore::K8s => {
            let client = client::try_new(kubeconfig).await.map_err(DaemonError::Client)?;

            if !config.crd.files.is_empty() {
                crd::install(client.clone(), &config.crd.files)
                    .await
                    .map_err(DaemonError::CustomResourceDefinition)?;
            }

            let store = Arc::new(ClusterStore::new(client, &config.kubernetes.namespace));
            let watcher: Watcher<ProvisioningRequest, ClusterStore, _> = Watcher::new(store.clone(), backend, KIND);

            let rx = shutdown_rx.clone();
            let handle = tokio::spawn(async move {
                info!(kind = KIND, "watcher starting against the kubernetes resource store");
                if let Err(err) = watcher.watch(rx).await {
                    error!(kind = KIND, error = %err, "watcher exited without running");
                }
            });

            (handle, store as Arc<dyn FacadeStore>)
        }
        DataStore::Json => {
            let store = Arc::new(
                JsonStore::new(config.json.directory.clone())
                    .await
                    .map_err(DaemonError::JsonStore)?,
            );
            let watcher: Watcher<ProvisioningRequest, JsonStore, _> = Watcher::new(store.clone(), backend, KIND);

            let rx = shutdown_rx.clone();
            let handle = tokio::spawn(async move {
                info!(kind = KIND, "watcher starting against the file-based resource store");
                if let Err(err) = watcher.watch(rx).await {
                    error!(kind = KIND, error = %err, "watcher exited without running");
                }
            });

            (handle, store as Arc<dyn FacadeStore>)
        }
    };

    let server_port = config.server_port;
    let server_handle = tokio::spawn(async move {
        if let Err(err) = http::server::serve(server_port, facade_store).await {
            error!(error = %err, "http façade server exited with an error");
        }
    });

    tokio::signal::ctrl_c().await.map_err(DaemonError::SigTerm)?;
    info!("received termination signal, shutting down");

    let _ = shutdown_tx.send(true);

    if let Err(err) = watcher_handle.await {
        if !err.is_cancelled() {
            error!(error = %err, "could not wait for the watcher task to complete");
        }
    }

    server_handle.abort();
    if let Err(err) = server_handle.await {
        if !err.is_cancelled() {
            error!(error = %err, "could not wait for the http façade server to gracefully close");
        }
    }

    Ok(())
}
