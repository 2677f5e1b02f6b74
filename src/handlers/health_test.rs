use super::*;
use crate::database::{Filter, MemoryStore};
use actix_web::{test, web, App};

#[actix_rt::test]
async fn health_check_returns_healthy() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(store))
            .route("/health", web::get().to(health_check)),
    )
    .await;
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "SUCCESS");
    assert_eq!(body["data"]["status"], "healthy");
}

#[actix_rt::test]
async fn status_reports_version() {
    let app = test::init_service(App::new().route("/status", web::get().to(server_status))).await;
    let req = test::TestRequest::get().uri("/status").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
}

#[actix_rt::test]
async fn internal_errors_are_persisted() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let err = report(Arc::clone(&store), "test", Some("u1".into()))(AppError::internal("boom"));
    assert!(err.is_internal());
    let mut logged = 0;
    for _ in 0..50 {
        tokio::task::yield_now().await;
        logged = store
            .count(utils::ERROR_LOG_COLLECTION, &Filter::new().eq("category", "test"))
            .await
            .unwrap();
        if logged > 0 {
            break;
        }
    }
    assert_eq!(logged, 1);

    report(Arc::clone(&store), "client", None)(AppError::not_found());
    tokio::task::yield_now().await;
    let client = store
        .count(utils::ERROR_LOG_COLLECTION, &Filter::new().eq("category", "client"))
        .await
        .unwrap();
    assert_eq!(client, 0);
}
