//! # R2 Multipart Coordinator
//!
//! Assembles a set of independently uploaded parts into one object in remote
//! object storage, using the store's three-phase multipart protocol
//! (initiate, upload parts, complete or abort). The finished object is either
//! fully assembled or never created.
//!
//! ## Architecture
//!
//! - **Coordinator**: state machine of every upload session; the only code that mutates one
//! - **Sequencer**: drives a batch of part uploads with bounded concurrency
//! - **Registry**: process-wide table of sessions in flight, bounded and sweepable
//! - **Store**: the object store collaborator (R2 in deployment, in-memory for tests)
//! - **Router / Handlers / Middleware**: the thin Worker façade in front of the coordinator
//!
//! ## Example Usage
//!
//! ```text
//! POST /v1/uploads   multipart/form-data: filename=<key>, file=<part 1>, file=<part 2>, ...
//! GET  /v1/uploads   sessions in flight
//! GET  /health
//! ```

use std::sync::{Arc, OnceLock};
use worker::*;

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod errors;
mod handlers;
pub mod logging;
mod middleware;
pub mod models;
pub mod registry;
mod router;
pub mod sequencer;
pub mod session;
pub mod store;
pub mod utils;

use config::Config;
use constants::STORAGE_CONFIG_KV_NAME;
use logging::Logger;
use registry::SessionRegistry;

pub use coordinator::{Coordinator, CoordinatorOptions};
pub use errors::{StoreError, UploadError};
pub use models::{ObjectDescriptor, PartRequest, PartResult, SessionState};
pub use sequencer::{BatchFailure, CancelFlag, PartSequencer};
pub use session::UploadSession;
pub use store::ObjectStore;

static CONFIG_CACHE: OnceLock<Arc<Config>> = OnceLock::new();
static SESSION_REGISTRY: OnceLock<Arc<SessionRegistry>> = OnceLock::new();

/// Main entry point for the Cloudflare Worker.
///
/// Loads configuration (once per isolate), then hands the request to the
/// router together with the isolate's session registry.
#[event(fetch)]
pub async fn main(req: Request, env: Env, _ctx: Context) -> Result<Response> {
    // Set up panic hook for better error reporting in development
    console_error_panic_hook::set_once();

    let logger = Logger::new(utils::generate_request_id());
    let config = load_config(&env, &logger).await?;
    let registry = session_registry(&config);

    router::handle_request(req, env, config, registry, logger).await
}

async fn load_config(env: &Env, logger: &Logger) -> Result<Arc<Config>> {
    if let Some(config) = CONFIG_CACHE.get() {
        return Ok(config.clone());
    }

    let kv = env.kv(STORAGE_CONFIG_KV_NAME)?;
    let config = Arc::new(Config::load(&kv, logger).await?);
    config.describe(logger);
    let _ = CONFIG_CACHE.set(config.clone());
    Ok(config)
}

/// The registry is sized by the first configuration seen in the isolate.
fn session_registry(config: &Config) -> Arc<SessionRegistry> {
    SESSION_REGISTRY
        .get_or_init(|| Arc::new(SessionRegistry::new(config.max_sessions)))
        .clone()
}
