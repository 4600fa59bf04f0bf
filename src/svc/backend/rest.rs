//! # REST v1 backend
//!
//! Thin wire client for the `omc_rest_v1` backend type. The wire transport
//! itself (exact endpoint shapes, multipart upload encoding) is explicitly
//! out of the core scope; this adapter only needs to exist so that
//! `backend_type` selection in configuration is meaningful end-to-end and
//! so the error-classification contract is exercised against real HTTP
//! status codes rather than only the simulator.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use hyper::{client::HttpConnector, header, Body, Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use serde::{de::DeserializeOwned, Serialize};

use crate::svc::backend::{
    BackendAdapter, BackendError, ConfigNode, ConfigSetOpts, LcmRequest, ManagedElement,
    TemplateClassification, Workflow,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct RestBackend {
    base_url: String,
    authorization: String,
    client: hyper::Client<HttpsConnector<HttpConnector>>,
}

impl RestBackend {
    pub fn new(base_url: String, username: &str, password: &str) -> Self {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{username}:{password}"));

        Self {
            base_url,
            authorization: format!("Basic {token}"),
            client: hyper::Client::builder().build(HttpsConnector::new()),
        }
    }

    fn classify(status: StatusCode, body: &str) -> BackendError {
        match status {
            StatusCode::NOT_FOUND => BackendError::NotFound(body.to_string()),
            StatusCode::CONFLICT => BackendError::AlreadyExists(body.to_string()),
            s if s.is_server_error() => BackendError::Transient(body.to_string()),
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                BackendError::Transient(body.to_string())
            }
            _ => BackendError::Permanent(body.to_string()),
        }
    }

    async fn call<B, R>(&self, method: Method, path: &str, body: Option<&B>) -> Result<R, BackendError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let uri = format!("{}{}", self.base_url, path);
        let payload = match body {
            Some(body) => serde_json::to_vec(body)
                .map_err(|err| BackendError::Permanent(format!("failed to serialize body, {err}")))?,
            None => Vec::new(),
        };

        let req = Request::builder()
            .method(method)
            .uri(&uri)
            .header(header::AUTHORIZATION, &self.authorization)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .map_err(|err| BackendError::Permanent(format!("failed to build request, {err}")))?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.request(req))
            .await
            .map_err(|_| BackendError::Transient(format!("request to {uri} timed out")))?
            .map_err(|err| BackendError::Transient(err.to_string()))?;

        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|err| BackendError::Transient(err.to_string()))?;
        let text = String::from_utf8_lossy(&bytes).to_string();

        if !status.is_success() {
            return Err(Self::classify(status, &text));
        }

        if text.is_empty() {
            return serde_json::from_str("null")
                .map_err(|err| BackendError::Permanent(format!("failed to deserialize empty body, {err}")));
        }

        serde_json::from_str(&text)
            .map_err(|err| BackendError::Permanent(format!("failed to deserialize response, {err}")))
    }
}

#[async_trait]
impl BackendAdapter for RestBackend {
    async fn ensure_auth(&self) -> Result<(), BackendError> {
        // the basic-auth credentials used here do not expire; a bearer-token
        // backend would refresh here when remaining validity < 280s.
        Ok(())
    }

    async fn get_me(&self, name: &str) -> Result<ManagedElement, BackendError> {
        self.call::<(), ManagedElement>(Method::GET, &format!("/managed-elements/{name}"), None)
            .await
    }

    async fn create_me(
        &self,
        name: &str,
        description: &str,
        product: &str,
        flavor: &str,
    ) -> Result<(), BackendError> {
        #[derive(Serialize)]
        struct CreateMe<'a> {
            name: &'a str,
            description: &'a str,
            product: &'a str,
            flavor: &'a str,
        }

        self.call::<_, serde_json::Value>(
            Method::POST,
            "/managed-elements",
            Some(&CreateMe {
                name,
                description,
                product,
                flavor,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn delete_me(&self, name: &str) -> Result<(), BackendError> {
        self.call::<(), serde_json::Value>(
            Method::DELETE,
            &format!("/managed-elements/{name}"),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn get_me_details_from_template(
        &self,
        template_name: &str,
        template_version: &str,
        params: &serde_json::Value,
    ) -> Result<TemplateClassification, BackendError> {
        #[derive(Serialize)]
        struct Payload<'a> {
            template_name: &'a str,
            template_version: &'a str,
            params: &'a serde_json::Value,
        }

        self.call(
            Method::POST,
            "/templates/details",
            Some(&Payload {
                template_name,
                template_version,
                params,
            }),
        )
        .await
    }

    async fn check_template_support(
        &self,
        template_name: &str,
        template_version: &str,
    ) -> Result<(), BackendError> {
        self.call::<(), serde_json::Value>(
            Method::GET,
            &format!("/templates/{template_name}/{template_version}/support"),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn verify_template_params(
        &self,
        template_name: &str,
        template_version: &str,
        params: &serde_json::Value,
    ) -> Result<(), BackendError> {
        #[derive(Serialize)]
        struct Payload<'a> {
            params: &'a serde_json::Value,
        }

        self.call::<_, serde_json::Value>(
            Method::POST,
            &format!("/templates/{template_name}/{template_version}/verify"),
            Some(&Payload { params }),
        )
        .await
        .map(|_| ())
    }

    async fn gen_config_set(
        &self,
        template_name: &str,
        template_version: &str,
        params: &serde_json::Value,
    ) -> Result<ConfigNode, BackendError> {
        #[derive(Serialize)]
        struct Payload<'a> {
            params: &'a serde_json::Value,
        }

        self.call(
            Method::POST,
            &format!("/templates/{template_name}/{template_version}/configset"),
            Some(&Payload { params }),
        )
        .await
    }

    async fn create_config_set(
        &self,
        me_name: &str,
        opts: &ConfigSetOpts,
    ) -> Result<(), BackendError> {
        match self
            .call::<_, serde_json::Value>(
                Method::POST,
                &format!("/managed-elements/{me_name}/config-sets"),
                Some(opts),
            )
            .await
        {
            Ok(_) => Ok(()),
            // idempotent: an already-uploaded config set of the same name is success.
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn upload_config_set_file(
        &self,
        me_name: &str,
        config_set_name: &str,
        commit_message: &str,
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        #[derive(Serialize)]
        struct Payload<'a> {
            commit_message: &'a str,
            content: String,
        }

        self.call::<_, serde_json::Value>(
            Method::PUT,
            &format!("/managed-elements/{me_name}/config-sets/{config_set_name}/file"),
            Some(&Payload {
                commit_message,
                content: base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
        )
        .await
        .map(|_| ())
    }

    async fn run_lcm_operation(&self, request: &LcmRequest) -> Result<String, BackendError> {
        #[derive(serde::Deserialize)]
        struct Response {
            #[serde(rename = "workflowId")]
            workflow_id: String,
        }

        self.call::<_, Response>(Method::POST, "/lcm-operations", Some(request))
            .await
            .map(|res| res.workflow_id)
    }

    async fn get_workflow(&self, id: &str) -> Result<Workflow, BackendError> {
        self.call::<(), Workflow>(Method::GET, &format!("/workflows/{id}"), None)
            .await
    }
}
