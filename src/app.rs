//! Shared state and route table.

use actix_web::{error::InternalError, error::JsonPayloadError, web};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::{AuthService, RateLimitStore};
use crate::config::SecurityConfig;
use crate::database::DocumentStore;
use crate::handlers;
use crate::middleware::{AuthMiddleware, RateLimitMiddleware};
use crate::models::ResponseStatus;
use crate::services::{GoogleTokenVerifier, NotificationService, ResourceService, UserService};
use crate::utils::response;

/// Everything a worker needs to build its `App`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub resources: Arc<ResourceService>,
    pub users: Arc<UserService>,
    pub notifier: Arc<NotificationService>,
    pub rate_limits: Arc<Mutex<RateLimitStore>>,
    pub security: SecurityConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: Arc<AuthService>,
        notifier: Arc<NotificationService>,
        google: Arc<dyn GoogleTokenVerifier>,
        security: SecurityConfig,
    ) -> Self {
        let resources = Arc::new(ResourceService::new(Arc::clone(&store)));
        let users = Arc::new(UserService::new(
            Arc::clone(&store),
            auth,
            Arc::clone(&notifier),
            google,
        ));
        Self {
            store,
            resources,
            users,
            notifier,
            rate_limits: Arc::new(Mutex::new(RateLimitStore::new())),
            security,
        }
    }

    fn json_config(&self) -> web::JsonConfig {
        web::JsonConfig::default()
            .limit(self.security.max_request_size_bytes)
            .error_handler(|err, _req| {
                let res = match &err {
                    JsonPayloadError::Deserialize(e) if e.is_data() => response::error_response(
                        ResponseStatus::ValidationError,
                        &format!("Invalid values in parameters, {}", e),
                    ),
                    JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
                        response::error_response(ResponseStatus::BadRequest, "Request payload too large")
                    }
                    _ => response::error_response(
                        ResponseStatus::BadRequest,
                        ResponseStatus::BadRequest.default_message(),
                    ),
                };
                InternalError::from_response(err, res).into()
            })
    }

    /// Register shared data and every route.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::new(Arc::clone(&self.store)))
            .app_data(web::Data::new(Arc::clone(&self.resources)))
            .app_data(web::Data::new(Arc::clone(&self.users)))
            .app_data(web::Data::new(Arc::clone(&self.notifier)))
            .app_data(self.json_config())
            .route("/health", web::get().to(handlers::health_check))
            .route("/status", web::get().to(handlers::server_status))
            .service(
                web::scope("/userapp")
                    .wrap(AuthMiddleware {
                        user_service: Arc::clone(&self.users),
                    })
                    .service(
                        web::scope("/auth")
                            .wrap(RateLimitMiddleware {
                                store: Arc::clone(&self.rate_limits),
                                max_requests: self.security.rate_limit_requests,
                                window_seconds: self.security.rate_limit_window_seconds,
                            })
                            .configure(handlers::auth::configure),
                    )
                    .configure(handlers::resource::configure),
            );
    }
}
