//! # Handlers Module
//!
//! HTTP request handlers for the upload façade. All handlers share one error
//! path: an [`AppError`](crate::errors::AppError) becomes a JSON error response,
//! and every response carries CORS headers.

use worker::*;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::AppResult;
use crate::logging::Logger;
use crate::registry::SessionRegistry;
use crate::middleware::CorsMiddleware;

pub mod upload;

/// Handles all upload-related operations.
pub async fn handle_upload_routes(
    req: Request,
    env: Env,
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    logger: Logger,
) -> Result<Response> {
    use upload::{list_sessions, upload_object};

    let method = req.method();
    let url = req.url()?;
    let path = url.path().trim_end_matches('/').to_string();

    let result: AppResult<Response> = match (method, path.as_str()) {
        (Method::Post, "/v1/uploads") => {
            upload_object(req, &env, &config, registry, &logger).await
        }
        (Method::Get, "/v1/uploads") => list_sessions(&registry),
        _ => {
            return Response::error("Not Found", 404);
        }
    };

    match result {
        Ok(response) => Ok(CorsMiddleware::apply_headers(response)),
        Err(app_error) => {
            logger.error(
                "Upload request failed",
                crate::log_data!("error" => app_error.to_string()),
            );
            match app_error.to_response() {
                Ok(response) => Ok(CorsMiddleware::apply_headers(response)),
                Err(_) => Response::error("Internal Server Error", 500).map(CorsMiddleware::apply_headers),
            }
        }
    }
}

/// Provides a health check endpoint for monitoring and load balancer probes.
pub async fn handle_health_check(_req: Request, _env: Env) -> Result<Response> {
    Response::from_json(&serde_json::json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Handles requests to unmatched routes with a 404 Not Found response.
pub async fn handle_not_found(_req: Request, _env: Env) -> Result<Response> {
    Response::error("Not Found", 404)
}
