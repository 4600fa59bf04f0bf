//! # Configuration module
//!
//! This module provides utilities and helpers to interact with the
//! operator's configuration: a YAML file located through a search
//! path (or an explicit path), layered with environment variable
//! overrides, and never hot-reloaded.

use std::{
    convert::TryFrom,
    env::{self, VarError},
    path::PathBuf,
};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// -----------------------------------------------------------------------------
// Constants

pub const SERVER_PORT: u16 = 8080;

// -----------------------------------------------------------------------------
// DataStore enum

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataStore {
    #[default]
    K8s,
    Json,
}

impl std::str::FromStr for DataStore {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "k8s" => Ok(DataStore::K8s),
            "json" => Ok(DataStore::Json),
            other => Err(Error::UnknownDataStore(other.to_string())),
        }
    }
}

// -----------------------------------------------------------------------------
// BackendType enum

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    OmcRestV1,
    OmcRestSimulator,
}

// -----------------------------------------------------------------------------
// Kubernetes structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Kubernetes {
    #[serde(rename = "namespace", default = "default_namespace")]
    pub namespace: String,
    #[serde(rename = "kubeconfig", default)]
    pub kubeconfig: Option<PathBuf>,
}

fn default_namespace() -> String {
    "default".to_string()
}

// -----------------------------------------------------------------------------
// Json structure
//
// a directory has to live somewhere for `data_store = json` to mean
// anything; kept alongside
// `kubernetes` as the other store backing's own options namespace.

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Json {
    #[serde(rename = "directory", default = "default_json_directory")]
    pub directory: PathBuf,
}

impl Default for Json {
    fn default() -> Self {
        Self {
            directory: default_json_directory(),
        }
    }
}

fn default_json_directory() -> PathBuf {
    PathBuf::from(format!("/var/lib/{}/store", env!("CARGO_PKG_NAME")))
}

// -----------------------------------------------------------------------------
// CustomResourceDefinition structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct CustomResourceDefinition {
    #[serde(rename = "files", default)]
    pub files: Vec<PathBuf>,
}

// -----------------------------------------------------------------------------
// Omc structure
//
// backend credentials. `password` is never rendered through the derived
// `Debug`/`Display` so a stray `{:?}` on the configuration cannot leak it
// into a log line.

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Omc {
    #[serde(rename = "url")]
    pub url: String,
    #[serde(rename = "username", default)]
    pub username: String,
    #[serde(rename = "password", default)]
    pub password: String,
}

impl std::fmt::Debug for Omc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Omc")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Sentry structure

#[cfg(feature = "tracker")]
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Sentry {
    #[serde(rename = "dsn")]
    pub dsn: Option<String>,
}

// -----------------------------------------------------------------------------
// Jaeger structure

#[cfg(feature = "trace")]
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Jaeger {
    pub endpoint: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

// -----------------------------------------------------------------------------
// Logging structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Logging {
    #[serde(rename = "level", default)]
    pub level: Option<String>,
    #[serde(rename = "filename", default)]
    pub filename: Option<PathBuf>,
}

// -----------------------------------------------------------------------------
// ConfigurationError enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to load configuration, {0}")]
    Build(ConfigError),
    #[error("failed to deserialize configuration, {0}")]
    Deserialize(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
    #[error("failed to retrieve environment variable '{0}', {1}")]
    EnvironmentVariable(&'static str, VarError),
    #[error("unknown data store '{0}', expected one of 'k8s', 'json' or an empty string")]
    UnknownDataStore(String),
}

// -----------------------------------------------------------------------------
// Configuration structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Configuration {
    #[serde(rename = "server_port", default = "default_server_port")]
    pub server_port: u16,
    #[serde(rename = "data_store", default)]
    pub data_store: DataStore,
    #[serde(rename = "backend_type")]
    pub backend_type: BackendType,
    #[serde(rename = "kubernetes", default)]
    pub kubernetes: Kubernetes,
    #[serde(rename = "json", default)]
    pub json: Json,
    #[serde(rename = "crd", default)]
    pub crd: CustomResourceDefinition,
    #[serde(rename = "omc")]
    pub omc: Omc,
    #[serde(rename = "logging", default)]
    pub logging: Logging,
    #[cfg(feature = "tracker")]
    #[serde(rename = "sentry", default = "Default::default")]
    pub sentry: Sentry,
    #[cfg(feature = "trace")]
    #[serde(rename = "jaeger", default)]
    pub jaeger: Option<Jaeger>,
}

fn default_server_port() -> u16 {
    SERVER_PORT
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument)]
    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        let config = Config::builder()
            .set_default("server_port", i64::from(SERVER_PORT))
            .map_err(|err| Error::Default("server_port".into(), err))?
            .set_default("data_store", "k8s")
            .map_err(|err| Error::Default("data_store".into(), err))?
            .add_source(Environment::with_prefix(
                &env!("CARGO_PKG_NAME").replace('-', "_"),
            ))
            .add_source(File::from(path).required(true))
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Deserialize)?;

        Self::finish(config)
    }
}

impl Configuration {
    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn try_default() -> Result<Self, Error> {
        let config = Config::builder()
            .set_default("server_port", i64::from(SERVER_PORT))
            .map_err(|err| Error::Default("server_port".into(), err))?
            .set_default("data_store", "k8s")
            .map_err(|err| Error::Default("data_store".into(), err))?
            .add_source(Environment::with_prefix(
                &env!("CARGO_PKG_NAME").replace('-', "_"),
            ))
            .add_source(
                File::from(PathBuf::from(format!(
                    "/usr/share/{}/config",
                    env!("CARGO_PKG_NAME")
                )))
                .required(false),
            )
            .add_source(
                File::from(PathBuf::from(format!(
                    "/etc/{}/config",
                    env!("CARGO_PKG_NAME")
                )))
                .required(false),
            )
            .add_source(
                File::from(PathBuf::from(format!(
                    "{}/.config/{}/config",
                    env::var("HOME").map_err(|err| Error::EnvironmentVariable("HOME", err))?,
                    env!("CARGO_PKG_NAME")
                )))
                .required(false),
            )
            .add_source(
                File::from(PathBuf::from(format!(
                    "{}/.local/share/{}/config",
                    env::var("HOME").map_err(|err| Error::EnvironmentVariable("HOME", err))?,
                    env!("CARGO_PKG_NAME")
                )))
                .required(false),
            )
            .add_source(File::from(PathBuf::from("config")).required(false))
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Deserialize)?;

        Self::finish(config)
    }

    /// exports the backend credentials into the environment variables a
    /// lazily-constructed Backend Adapter reads from, and returns the
    /// deserialized configuration unchanged.
    fn finish(config: Self) -> Result<Self, Error> {
        env::set_var(
            "OMC_BACKEND",
            match config.backend_type {
                BackendType::OmcRestV1 => "omc_rest_v1",
                BackendType::OmcRestSimulator => "omc_rest_simulator",
            },
        );
        env::set_var("OMC_BACKEND_URL", &config.omc.url);
        env::set_var("OMC_BACKEND_USERNAME", &config.omc.username);
        env::set_var("OMC_BACKEND_PASSWORD", &config.omc.password);

        Ok(config)
    }

    /// prints a message about missing or noteworthy configuration keys.
    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn help(&self) {
        #[cfg(feature = "metrics")]
        info!("Build with 'metrics' feature flag");

        #[cfg(feature = "trace")]
        info!("Build with 'trace' feature flag");

        #[cfg(feature = "tracker")]
        info!("Build with 'tracker' feature flag");

        if self.omc.url.is_empty() {
            warn!("Configuration key 'omc.url' has an empty value");
        }

        if self.omc.username.is_empty() {
            warn!("Configuration key 'omc.username' has an empty value");
        }

        if self.omc.password.is_empty() {
            warn!("Configuration key 'omc.password' has an empty value");
        }

        if self.data_store == DataStore::K8s && self.kubernetes.kubeconfig.is_none() {
            info!("Configuration key 'kubernetes.kubeconfig' is unset, falling back to in-cluster or default lookup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_store_empty_string_defaults_to_k8s() {
        assert_eq!("".parse::<DataStore>().unwrap(), DataStore::K8s);
    }

    #[test]
    fn data_store_rejects_unknown_value() {
        assert!("not-a-store".parse::<DataStore>().is_err());
    }

    #[test]
    fn omc_debug_redacts_password() {
        let omc = Omc {
            url: "https://omc.example".to_string(),
            username: "operator".to_string(),
            password: "super-secret".to_string(),
        };

        let rendered = format!("{omc:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
