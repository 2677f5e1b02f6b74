use actix_web::{middleware as actix_middleware, App, HttpServer};
use dotenvy::dotenv;
use std::io::{Error, ErrorKind};
use std::sync::Arc;
use tokio::time::{interval, Duration};

use eventapp_server::app::AppState;
use eventapp_server::auth::AuthService;
use eventapp_server::config::AppConfig;
use eventapp_server::database::{DatabaseService, DocumentStore};
use eventapp_server::middleware::{CorsMiddleware, LoggingMiddleware, SecurityHeadersMiddleware};
use eventapp_server::services::{NotificationService, TokenInfoVerifier};
use eventapp_server::utils;

/// File + stdout through flexi_logger; env_logger if that cannot start.
fn init_logging(level: &str, directory: &str) -> Option<flexi_logger::LoggerHandle> {
    let flexi = flexi_logger::Logger::try_with_str(level).and_then(|logger| {
        logger
            .log_to_file(flexi_logger::FileSpec::default().directory(directory).suppress_timestamp())
            .duplicate_to_stdout(flexi_logger::Duplicate::Info)
            .start()
    });
    match flexi {
        Ok(handle) => Some(handle),
        Err(e) => {
            env_logger::builder()
                .filter_level(utils::logging::level_from_string(level))
                .format_timestamp_secs()
                .init();
            log::warn!("File logging unavailable: {}", e);
            None
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let _ = dotenv();

    let config = AppConfig::from_env().map_err(|e| Error::new(ErrorKind::InvalidInput, e.to_string()))?;
    let _logger = init_logging(&config.logging.level, &config.logging.directory);

    log::info!("Starting event app server v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Server: {}:{}", config.server.host, config.server.port);
    log::info!("Workers: {}", config.server.workers);

    let db_service = DatabaseService::new(&config.database)
        .await
        .map_err(|e| Error::new(ErrorKind::Other, format!("Failed to initialize database: {}", e)))?;
    if let Err(e) = db_service.init_schema().await {
        log::error!("Failed to initialize DB schema: {}", e);
    } else {
        log::info!("DB schema ensured");
    }
    let store: Arc<dyn DocumentStore> = Arc::new(db_service);

    let auth_service = Arc::new(AuthService::new(config.auth.clone()));
    let notifier = Arc::new(NotificationService::from_config(&config.notification));
    let google = Arc::new(TokenInfoVerifier::new(config.auth.google_client_id.clone()));
    let state = AppState::new(store, auth_service, notifier, google, config.security.clone());

    // Hourly: drop revoked/expired tokens and idle rate-limit keys
    let users_bg = Arc::clone(&state.users);
    let rate_limits_bg = Arc::clone(&state.rate_limits);
    let store_bg = Arc::clone(&state.store);
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match users_bg.purge_expired_tokens().await {
                Ok(purged) => log::info!("Purged {} expired tokens", purged),
                Err(e) => {
                    let err_str = e.to_string();
                    let _ = utils::log_internal_error(
                        Arc::clone(&store_bg),
                        "ERROR",
                        "purge_expired_tokens",
                        "Failed to purge expired tokens",
                        Some(serde_json::json!({ "error": err_str })),
                        None,
                    )
                    .await;
                }
            }
            rate_limits_bg.lock().await.cleanup();
        }
    });

    let server = config.server.clone();
    let allowed_origins = config.security.cors_allowed_origins.clone();
    HttpServer::new(move || {
        App::new()
            .configure(|cfg| state.configure(cfg))
            // Custom middleware sits inside Compress so it sees uncompressed bodies
            .wrap(SecurityHeadersMiddleware)
            .wrap(LoggingMiddleware)
            .wrap(CorsMiddleware {
                allowed_origins: allowed_origins.clone(),
            })
            .wrap(actix_middleware::Compress::default())
    })
    .bind((server.host.clone(), server.port))?
    .workers(server.workers)
    .keep_alive(std::time::Duration::from_secs(server.keep_alive_seconds))
    .client_request_timeout(std::time::Duration::from_secs(server.client_timeout_seconds))
    .client_disconnect_timeout(std::time::Duration::from_secs(server.client_shutdown_seconds))
    .max_connections(server.max_connections)
    .run()
    .await
}
