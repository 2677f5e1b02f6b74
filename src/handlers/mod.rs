use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::database::DocumentStore;
use crate::models::ResponseStatus;
use crate::utils::{self, error::AppError};

pub mod auth;
pub mod resource;

/// Health check endpoint
pub async fn health_check(store: web::Data<Arc<dyn DocumentStore>>) -> HttpResponse {
    match store.ping().await {
        Ok(()) => utils::response::success_response(serde_json::json!({ "status": "healthy" })),
        Err(e) => {
            log::error!("Health check failed: {}", e);
            utils::response::error_response(ResponseStatus::ServerError, "Database unavailable")
        }
    }
}

/// Server status endpoint
pub async fn server_status() -> HttpResponse {
    let status = serde_json::json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    });
    utils::response::success_response(status)
}

/// Persist internal errors to `errorLogs` without holding up the response.
pub(crate) fn report(
    store: Arc<dyn DocumentStore>,
    category: &'static str,
    user_id: Option<String>,
) -> impl FnOnce(AppError) -> AppError {
    move |err| {
        if err.is_internal() {
            let err_str = err.to_string();
            tokio::spawn(async move {
                let _ = utils::log_internal_error(
                    store,
                    "ERROR",
                    category,
                    "Internal error while handling request",
                    Some(serde_json::json!({ "error": err_str })),
                    user_id,
                )
                .await;
            });
        }
        err
    }
}

#[cfg(test)]
mod health_test;
