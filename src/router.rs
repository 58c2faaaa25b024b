//! # Routing
//!
//! - `GET /health` - liveness probe
//! - `POST /v1/uploads` - assemble the submitted files into one object
//! - `GET /v1/uploads` - upload sessions in flight
//! - `OPTIONS *` - CORS preflight

use worker::*;
use std::sync::Arc;

use crate::config::Config;
use crate::handlers::*;
use crate::logging::Logger;
use crate::middleware::CorsMiddleware;
use crate::registry::SessionRegistry;

/// Dispatches a request by method and path. `registry` is shared by every
/// request served from this isolate.
pub async fn handle_request(
    req: Request,
    env: Env,
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    logger: Logger,
) -> Result<Response> {
    if req.method() == Method::Options {
        return CorsMiddleware::handle_preflight();
    }

    let url = req.url()?;
    let path = url.path();
    let method = req.method();

    logger.info(
        "Routing request",
        crate::log_data!("method" => method.to_string(), "path" => path),
    );

    match (method, path) {
        (Method::Get, "/health") => handle_health_check(req, env).await,

        (Method::Post | Method::Get, path) if path.starts_with("/v1/uploads") => {
            handle_upload_routes(req, env, config, registry, logger).await
        }

        _ => handle_not_found(req, env).await,
    }
}
