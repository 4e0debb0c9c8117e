//! Bridge management API
//!
//! Endpoints under `/api/bridge/` for listing, registering and updating
//! services and for traffic statistics, plus the plain `/health` and
//! `/metrics` endpoints. Handlers take the already-read body so they can be
//! driven without a live connection.

use crate::db::{NewService, ServiceUpdate};
use crate::error::{json_error_response, BridgeErrorCode};
use crate::proxy::BridgeContext;
use crate::registry::ServiceRegistry;
use anyhow::Result;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{HeaderMap, Response, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

/// Response body type shared by every bridge response
pub type BridgeBody = BoxBody<Bytes, hyper::Error>;

/// Service name reported by `/api/bridge/health`
pub const BRIDGE_SERVICE_NAME: &str = "project-bridge";
/// Service name reported by `/health`
pub const HEALTH_SERVICE_NAME: &str = "startup-project-bridge";

/// Request to register a service
#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub service_type: Option<String>,
    pub target_url: Option<String>,
    pub path_prefix: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_rate_limit() -> i64 {
    100
}

impl CreateServiceRequest {
    /// `None` if any of the required fields is missing
    pub fn into_new_service(self) -> Option<NewService> {
        Some(NewService {
            name: self.name?,
            service_type: self.service_type?,
            target_url: self.target_url?,
            path_prefix: self.path_prefix?,
            enabled: self.enabled,
            auth_required: self.auth_required,
            rate_limit: self.rate_limit,
        })
    }
}

// ==================== Handlers ====================

pub fn bridge_health() -> Result<Response<BridgeBody>> {
    let body = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": BRIDGE_SERVICE_NAME,
    });
    Ok(json_response(StatusCode::OK, body.to_string()))
}

pub fn health() -> Result<Response<BridgeBody>> {
    let body = serde_json::json!({
        "status": "healthy",
        "service": HEALTH_SERVICE_NAME,
    });
    Ok(json_response(StatusCode::OK, body.to_string()))
}

pub fn metrics(ctx: &BridgeContext) -> Result<Response<BridgeBody>> {
    Ok(json_response(
        StatusCode::OK,
        serde_json::to_string(&ctx.metrics.snapshot())?,
    ))
}

pub fn list_services(ctx: &BridgeContext) -> Result<Response<BridgeBody>> {
    let services = ctx.db.list()?;
    Ok(json_response(StatusCode::OK, serde_json::to_string(&services)?))
}

pub fn create_service(
    ctx: &BridgeContext,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response<BridgeBody>> {
    if !ctx.auth.authorize(headers) {
        warn!("Unauthorized service registration");
        return Ok(json_error_response(BridgeErrorCode::Unauthorized, "Unauthorized"));
    }

    let create_req: CreateServiceRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return Ok(json_error_response(
                BridgeErrorCode::InvalidJson,
                format!("Invalid JSON: {}", e),
            ));
        }
    };

    let Some(service) = create_req.into_new_service() else {
        return Ok(json_error_response(
            BridgeErrorCode::ValidationError,
            "Missing required fields",
        ));
    };

    let id = ctx.db.add(&service)?;
    info!(
        id,
        name = %service.name,
        prefix = %service.path_prefix,
        target = %service.target_url,
        "Service registered"
    );

    let body = serde_json::json!({
        "id": id,
        "message": "Service added successfully",
    });
    Ok(json_response(StatusCode::CREATED, body.to_string()))
}

pub fn update_service(
    ctx: &BridgeContext,
    id: i64,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response<BridgeBody>> {
    if !ctx.auth.authorize(headers) {
        warn!(id, "Unauthorized service update");
        return Ok(json_error_response(BridgeErrorCode::Unauthorized, "Unauthorized"));
    }

    let update: ServiceUpdate = match serde_json::from_slice(body) {
        Ok(u) => u,
        Err(e) => {
            return Ok(json_error_response(
                BridgeErrorCode::InvalidJson,
                format!("Invalid JSON: {}", e),
            ));
        }
    };

    if !ctx.db.update(id, &update)? {
        return Ok(json_error_response(BridgeErrorCode::NotFound, "Service not found"));
    }

    info!(id, "Service updated");
    let body = serde_json::json!({ "message": "Service updated successfully" });
    Ok(json_response(StatusCode::OK, body.to_string()))
}

pub fn bridge_stats(ctx: &BridgeContext) -> Result<Response<BridgeBody>> {
    let stats = ctx.db.bridge_stats()?;
    Ok(json_response(StatusCode::OK, serde_json::to_string(&stats)?))
}

// ==================== Helper Functions ====================

pub fn full_body(bytes: impl Into<Bytes>) -> BridgeBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

pub fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<BridgeBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .expect("valid response with StatusCode enum and static header")
}
