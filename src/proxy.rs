use crate::api::{self, full_body, BridgeBody};
use crate::auth::{AdminAuth, OpenAccess};
use crate::db::{Database, NewRequestLog};
use crate::error::{json_error_response, BridgeErrorCode, ForwardError};
use crate::forwarder::{InboundRequest, RequestForwarder};
use crate::logger::RequestLogger;
use crate::matcher::PathMatcher;
use crate::metrics::BridgeMetrics;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS,
    ACCESS_CONTROL_REQUEST_METHOD, USER_AGENT,
};
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const BRIDGE_API_PREFIX: &str = "/api/bridge";
const SERVICES_PATH: &str = "/api/bridge/services";

/// Methods accepted on the proxy catch-all
const PROXY_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
];

const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";
const CORS_DEFAULT_ALLOW_HEADERS: &str = "Content-Type, Authorization";
const CORS_MAX_AGE_SECS: &str = "86400";

/// Shared state for every request handled by the bridge
pub struct BridgeContext {
    pub(crate) db: Arc<Database>,
    pub(crate) matcher: PathMatcher,
    pub(crate) forwarder: RequestForwarder,
    pub(crate) logger: RequestLogger,
    pub(crate) auth: Arc<dyn AdminAuth>,
    pub(crate) metrics: Arc<BridgeMetrics>,
    pub(crate) cors_origin: Option<String>,
}

impl BridgeContext {
    /// Context backed by `db`, open admin access and CORS for any origin
    pub fn new(db: Arc<Database>, request_timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            matcher: PathMatcher::new(db.clone()),
            logger: RequestLogger::new(db.clone()),
            forwarder: RequestForwarder::new(request_timeout)?,
            auth: Arc::new(OpenAccess),
            metrics: Arc::new(BridgeMetrics::default()),
            cors_origin: Some("*".to_string()),
            db,
        })
    }

    pub fn with_auth(mut self, auth: Arc<dyn AdminAuth>) -> Self {
        self.auth = auth;
        self
    }

    /// `None` disables CORS headers entirely
    pub fn with_cors_origin(mut self, origin: Option<String>) -> Self {
        self.cors_origin = origin;
        self
    }
}

/// The bridge HTTP server: management API plus the proxy catch-all
pub struct BridgeServer {
    bind_addr: SocketAddr,
    context: Arc<BridgeContext>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BridgeServer {
    pub fn new(
        bind_addr: SocketAddr,
        context: BridgeContext,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            context: Arc::new(context),
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(
            addr = %self.bind_addr,
            timeout_secs = self.context.forwarder.timeout().as_secs(),
            "Bridge listening (HTTP/1.1 and HTTP/2)"
        );

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let context = Arc::clone(&self.context);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, context).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Bridge shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<BridgeContext>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = Arc::clone(&context);
        async move { handle_request(req, ctx, addr).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

/// Where an inbound request is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    BridgeHealth,
    ListServices,
    CreateService,
    UpdateService(i64),
    Stats,
    Health,
    Metrics,
    Proxy,
}

/// Resolve the management endpoint for `method` and `path`. Anything that is
/// not a management endpoint goes to the proxy.
pub fn route(method: &Method, path: &str) -> Route {
    if let Some(rest) = path.strip_prefix(BRIDGE_API_PREFIX) {
        match (method, rest) {
            (&Method::GET, "/health") => return Route::BridgeHealth,
            (&Method::GET, "/services") => return Route::ListServices,
            (&Method::POST, "/services") => return Route::CreateService,
            (&Method::GET, "/stats") => return Route::Stats,
            _ => {}
        }
    }

    if *method == Method::PUT {
        if let Some(id) = path
            .strip_prefix(SERVICES_PATH)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(parse_service_id)
        {
            return Route::UpdateService(id);
        }
    }

    match (method, path) {
        (&Method::GET, "/health") => Route::Health,
        (&Method::GET, "/metrics") => Route::Metrics,
        _ => Route::Proxy,
    }
}

fn parse_service_id(segment: &str) -> Option<i64> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

fn is_preflight(req: &Request<Incoming>) -> bool {
    *req.method() == Method::OPTIONS && req.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD)
}

async fn handle_request(
    req: Request<Incoming>,
    ctx: Arc<BridgeContext>,
    client_addr: SocketAddr,
) -> Result<Response<BridgeBody>, hyper::Error> {
    let request_id = Uuid::new_v4().to_string();
    debug!(
        method = %req.method(),
        uri = %req.uri(),
        client = %client_addr,
        request_id,
        "Incoming request"
    );

    let mut response = match ctx.cors_origin.as_deref() {
        Some(_) if is_preflight(&req) => preflight_response(req.headers()),
        _ => dispatch(req, &ctx, client_addr, &request_id).await,
    };

    if let Some(origin) = ctx.cors_origin.as_deref() {
        apply_cors(&mut response, origin);
    }

    Ok(response)
}

async fn dispatch(
    req: Request<Incoming>,
    ctx: &BridgeContext,
    client_addr: SocketAddr,
    request_id: &str,
) -> Response<BridgeBody> {
    let route = route(req.method(), req.uri().path());

    let result = match route {
        Route::BridgeHealth => api::bridge_health(),
        Route::ListServices => api::list_services(ctx),
        Route::Stats => api::bridge_stats(ctx),
        Route::Health => api::health(),
        Route::Metrics => api::metrics(ctx),
        Route::CreateService => match read_body(req).await {
            Ok((headers, body)) => api::create_service(ctx, &headers, &body),
            Err(e) => Err(e),
        },
        Route::UpdateService(id) => match read_body(req).await {
            Ok((headers, body)) => api::update_service(ctx, id, &headers, &body),
            Err(e) => Err(e),
        },
        Route::Proxy => return proxy_request(req, ctx, client_addr, request_id).await,
    };

    result.unwrap_or_else(|e| {
        error!(?route, request_id, error = %e, "Management request failed");
        json_error_response(BridgeErrorCode::InternalError, "Internal server error")
    })
}

async fn read_body(req: Request<Incoming>) -> anyhow::Result<(HeaderMap, Bytes)> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok((parts.headers, body))
}

async fn proxy_request(
    req: Request<Incoming>,
    ctx: &BridgeContext,
    client_addr: SocketAddr,
    request_id: &str,
) -> Response<BridgeBody> {
    if !PROXY_METHODS.contains(req.method()) {
        return json_error_response(BridgeErrorCode::MethodNotAllowed, "Method not allowed");
    }

    ctx.metrics.record_request();

    let path = decode_path(req.uri().path());
    let service = match ctx.matcher.find(&path) {
        Ok(Some(service)) => service,
        Ok(None) => {
            ctx.metrics.record_route_not_found();
            debug!(path, request_id, "No service for path");
            return json_error_response(BridgeErrorCode::RouteNotFound, "Service not found");
        }
        Err(e) => {
            error!(path, request_id, error = %e, "Failed to read service registry");
            return json_error_response(BridgeErrorCode::InternalError, "Internal server error");
        }
    };

    if service.auth_required {
        debug!(
            service_id = service.id,
            request_id,
            "Service marks auth_required; forwarding unchanged"
        );
    }

    let start = Instant::now();
    let (parts, body) = req.into_parts();
    let user_agent = parts
        .headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut entry = NewRequestLog {
        service_id: Some(service.id),
        method: parts.method.to_string(),
        path: path.clone(),
        status_code: 0,
        response_time: None,
        user_agent,
        ip_address: Some(client_addr.ip().to_string()),
    };

    let result = match body.collect().await {
        Ok(collected) => {
            let inbound = InboundRequest {
                method: parts.method,
                path,
                query: parts.uri.query().map(String::from),
                headers: parts.headers,
                body: collected.to_bytes(),
            };
            ctx.forwarder.forward(&inbound, &service).await
        }
        Err(e) => Err(ForwardError::Unexpected(format!("failed to read request body: {}", e))),
    };

    match result {
        Ok(upstream) => {
            entry.status_code = upstream.status.as_u16();
            entry.response_time = Some(start.elapsed().as_secs_f64());
            ctx.logger.record(entry);

            let mut response = Response::new(full_body(upstream.body));
            *response.status_mut() = upstream.status;
            *response.headers_mut() = upstream.headers;
            response
        }
        Err(e) => {
            ctx.metrics.record_failure(&e);
            warn!(
                service_id = service.id,
                target = %service.target_url,
                request_id,
                error = %e,
                "Forwarding failed"
            );

            let code = e.code();
            entry.status_code = code.status_code().as_u16();
            ctx.logger.record(entry);

            json_error_response(code, e.public_message())
        }
    }
}

/// Percent-decode the request path. Invalid UTF-8 becomes U+FFFD.
fn decode_path(raw: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}

fn preflight_response(headers: &HeaderMap) -> Response<BridgeBody> {
    let allow_headers = headers
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(CORS_DEFAULT_ALLOW_HEADERS));

    Response::builder()
        .status(StatusCode::OK)
        .header(ACCESS_CONTROL_ALLOW_METHODS, CORS_ALLOW_METHODS)
        .header(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers)
        .header(ACCESS_CONTROL_MAX_AGE, CORS_MAX_AGE_SECS)
        .body(full_body(Bytes::new()))
        .expect("valid preflight response with static headers")
}

/// Add the allow-origin header unless the upstream already set one
fn apply_cors(response: &mut Response<BridgeBody>, origin: &str) {
    if response.headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(origin) {
        response.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_management_endpoints() {
        assert_eq!(route(&Method::GET, "/api/bridge/health"), Route::BridgeHealth);
        assert_eq!(route(&Method::GET, "/api/bridge/services"), Route::ListServices);
        assert_eq!(route(&Method::POST, "/api/bridge/services"), Route::CreateService);
        assert_eq!(route(&Method::PUT, "/api/bridge/services/7"), Route::UpdateService(7));
        assert_eq!(route(&Method::GET, "/api/bridge/stats"), Route::Stats);
        assert_eq!(route(&Method::GET, "/health"), Route::Health);
        assert_eq!(route(&Method::GET, "/metrics"), Route::Metrics);
    }

    #[test]
    fn test_route_falls_through_to_proxy() {
        assert_eq!(route(&Method::GET, "/api/chat/send"), Route::Proxy);
        assert_eq!(route(&Method::DELETE, "/api/bridge/services"), Route::Proxy);
        assert_eq!(route(&Method::POST, "/health"), Route::Proxy);
        assert_eq!(route(&Method::GET, "/api/bridge/services/7"), Route::Proxy);
        assert_eq!(route(&Method::GET, "/api/bridge/healthz"), Route::Proxy);
    }

    #[test]
    fn test_route_non_integer_service_id() {
        assert_eq!(route(&Method::PUT, "/api/bridge/services/abc"), Route::Proxy);
        assert_eq!(route(&Method::PUT, "/api/bridge/services/-1"), Route::Proxy);
        assert_eq!(route(&Method::PUT, "/api/bridge/services/"), Route::Proxy);
        assert_eq!(route(&Method::PUT, "/api/bridge/services/1/extra"), Route::Proxy);
        assert_eq!(
            route(&Method::PUT, "/api/bridge/services/99999999999999999999"),
            Route::Proxy
        );
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("/api/chat/send"), "/api/chat/send");
        assert_eq!(decode_path("/api/chat%2Fv2/x"), "/api/chat/v2/x");
        assert_eq!(decode_path("/api/my%20svc/x"), "/api/my svc/x");
        assert_eq!(decode_path("/caf%C3%A9"), "/caf\u{e9}");
        assert_eq!(decode_path("/bad%FF"), "/bad\u{fffd}");
    }

    #[test]
    fn test_apply_cors_keeps_upstream_origin() {
        let mut response = Response::new(full_body(Bytes::new()));
        response
            .headers_mut()
            .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("https://app.example"));
        apply_cors(&mut response, "*");
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://app.example"
        );

        let mut response = Response::new(full_body(Bytes::new()));
        apply_cors(&mut response, "*");
        assert_eq!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    }

    #[test]
    fn test_preflight_echoes_requested_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_CONTROL_REQUEST_HEADERS, HeaderValue::from_static("x-custom"));

        let response = preflight_response(&headers);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(ACCESS_CONTROL_ALLOW_HEADERS).unwrap(), "x-custom");
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            CORS_ALLOW_METHODS
        );

        let response = preflight_response(&HeaderMap::new());
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
            CORS_DEFAULT_ALLOW_HEADERS
        );
    }
}
