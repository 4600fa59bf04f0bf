//! # Server module
//!
//! This module provides the HTTP façade: a thin, out-of-core surface
//! that lets a caller submit and inspect `ProvisioningRequest`s without
//! going through the kubernetes API, plus the always-on `/healthz` and,
//! under the `metrics` feature, `/metrics` endpoints.

use std::{net::AddrParseError, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::get,
    Json, Router,
};
use hyper::Server;
use serde::Deserialize;
use tracing::{info, Instrument};

use crate::svc::{
    resource::{ProvisioningRequest, ProvisioningRequestSpec},
    store::FacadeStore,
};

use super::layer;

// -----------------------------------------------------------------------------
// Error

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse listen address '{0}', {1}")]
    Listen(String, AddrParseError),
    #[error("failed to bind server, {0}")]
    Bind(hyper::Error),
    #[error("failed to serve content, {0}")]
    Serve(hyper::Error),
}

// -----------------------------------------------------------------------------
// Facade request body

/// a `POST` body names the record together with its spec; a cluster-native
/// resource gets this same name from `metadata.name`, but the façade has no
/// such envelope to take it from.
#[derive(Deserialize)]
struct CreateProvisioningRequest {
    id: String,
    #[serde(flatten)]
    spec: ProvisioningRequestSpec,
}

// -----------------------------------------------------------------------------
// Handlers

async fn list_provisioning_requests(
    State(store): State<Arc<dyn FacadeStore>>,
) -> Result<Json<Vec<ProvisioningRequest>>, StatusCode> {
    store
        .list_all()
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn create_provisioning_request(
    State(store): State<Arc<dyn FacadeStore>>,
    Json(body): Json<CreateProvisioningRequest>,
) -> Result<(StatusCode, Json<ProvisioningRequest>), StatusCode> {
    store
        .create(&body.id, body.spec)
        .await
        .map(|record| (StatusCode::CREATED, Json(record)))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn get_provisioning_request(
    State(store): State<Arc<dyn FacadeStore>>,
    Path(id): Path<String>,
) -> Result<Json<ProvisioningRequest>, StatusCode> {
    match store.get(&id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

async fn delete_provisioning_request(
    State(store): State<Arc<dyn FacadeStore>>,
    Path(id): Path<String>,
) -> StatusCode {
    match store.request_deletion(&id).await {
        Ok(true) => StatusCode::ACCEPTED,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// -----------------------------------------------------------------------------
// Router

pub fn router(store: Arc<dyn FacadeStore>) -> Router {
    let facade = Router::new()
        .route(
            "/o2ims-infrastructureprovisioning/v1/provisioningrequests",
            get(list_provisioning_requests).post(create_provisioning_request),
        )
        .route(
            "/o2ims-infrastructureprovisioning/v1/provisioningrequests/:id",
            get(get_provisioning_request).delete(delete_provisioning_request),
        )
        .with_state(store);

    let router = Router::new()
        .merge(facade)
        .route("/healthz", get(super::healthz));

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(super::metrics::handler));

    router
        .fallback(super::not_found)
        .route_layer(middleware::from_fn(layer::access))
}

// -----------------------------------------------------------------------------
// serve

#[tracing::instrument(skip(store))]
pub async fn serve(port: u16, store: Arc<dyn FacadeStore>) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{port}")
        .parse()
        .map_err(|err| Error::Listen(port.to_string(), err))?;

    info!("Start to listen for http request on {}", addr);
    Server::try_bind(&addr)
        .map_err(Error::Bind)?
        .serve(router(store).into_make_service())
        .instrument(tracing::info_span!("Server::serve"))
        .await
        .map_err(Error::Serve)?;

    Ok(())
}
