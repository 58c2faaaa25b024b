//! # Upload Handlers
//!
//! - **Upload Object**: assemble the files of one form submission into a single
//!   object through the multipart coordinator
//! - **List Sessions**: report the uploads currently in flight in this isolate

use std::sync::Arc;

use serde_json::json;
use worker::*;

use crate::config::Config;
use crate::constants::{FORM_FIELD_FILE, FORM_FIELD_FILENAME};
use crate::coordinator::Coordinator;
use crate::errors::{AppError, AppResult};
use crate::log_data;
use crate::logging::Logger;
use crate::middleware::ValidationMiddleware;
use crate::models::PartRequest;
use crate::registry::SessionRegistry;
use crate::sequencer::CancelFlag;
use crate::store::r2::R2Store;
use crate::utils::WorkerTimer;

/// Reads the `filename` field and the non-empty `file` fields, in form order.
async fn read_form(req: &mut Request, logger: &Logger) -> AppResult<(String, Vec<Vec<u8>>)> {
    let form = req.form_data().await?;
    let object_key = match form.get(FORM_FIELD_FILENAME) {
        Some(FormEntry::Field(value)) => value,
        _ => {
            return Err(AppError::BadRequest(format!(
                "missing `{FORM_FIELD_FILENAME}` form field"
            )))
        }
    };

    let mut payloads = Vec::new();
    for entry in form.get_all(FORM_FIELD_FILE).unwrap_or_default() {
        let FormEntry::File(file) = entry else {
            return Err(AppError::BadRequest(format!(
                "`{FORM_FIELD_FILE}` fields must carry files"
            )));
        };
        let bytes = file.bytes().await?;
        if bytes.is_empty() {
            logger.info("Skipping empty file part", log_data!("fileName" => file.name()));
            continue;
        }
        payloads.push(bytes);
    }
    Ok((object_key, payloads))
}

/// Assembles the uploaded files into one object, numbering them as parts 1..N.
pub async fn upload_object(
    mut req: Request,
    env: &Env,
    config: &Config,
    registry: Arc<SessionRegistry>,
    logger: &Logger,
) -> AppResult<Response> {
    let (object_key, payloads) = read_form(&mut req, logger).await?;
    ValidationMiddleware::validate_object_key(&object_key)?;
    ValidationMiddleware::validate_part_count(payloads.len())?;
    let total_size: u64 = payloads.iter().map(|p| p.len() as u64).sum();
    ValidationMiddleware::validate_object_size(total_size, config.max_object_size)?;

    let parts: Vec<PartRequest> = payloads
        .into_iter()
        .zip(1u16..)
        .map(|(payload, part_number)| PartRequest::new(part_number, payload))
        .collect();

    let coordinator = Coordinator::new(R2Store::new(env), registry, config.coordinator_options())
        .with_timer(WorkerTimer)
        .with_logger(logger.clone());

    let swept = coordinator.sweep_stale(config.stale_after()).await;
    if !swept.is_empty() {
        logger.warn("Aborted stale upload sessions", log_data!("uploadIds" => swept));
    }

    let descriptor = coordinator
        .assemble(&object_key, parts, &config.sequencer(), &CancelFlag::new())
        .await?;
    Ok(Response::from_json(&descriptor)?.with_status(201))
}

/// Lists the sessions registered in this isolate.
pub fn list_sessions(registry: &SessionRegistry) -> AppResult<Response> {
    let sessions = registry.snapshots();
    Ok(Response::from_json(&json!({
        "count": sessions.len(),
        "maxSessions": registry.max_sessions(),
        "sessions": sessions,
    }))?)
}
