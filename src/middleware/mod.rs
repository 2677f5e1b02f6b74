use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpMessage, HttpResponse,
};

use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::{extract_token_from_request, RateLimitStore};
use crate::models::{ApiResponse, ResponseStatus};
use crate::services::UserService;

/// Resolves the caller from a bearer token or `access_token` cookie.
///
/// Identity is optional here: requests without a usable token pass through
/// and handlers that need a caller reject them through the `AuthUser`
/// extractor.
pub struct AuthMiddleware {
    pub user_service: Arc<UserService>,
}

impl<S> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Arc::new(service),
            user_service: Arc::clone(&self.user_service),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Arc<S>,
    user_service: Arc<UserService>,
}

impl<S> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let user_service = Arc::clone(&self.user_service);

        Box::pin(async move {
            if let Some(token) = extract_token_from_request(&req) {
                match user_service.authenticate(&token).await {
                    Ok(Some(user)) => {
                        req.extensions_mut().insert(user);
                    }
                    Ok(None) => {}
                    Err(e) => log::error!("Token lookup failed: {}", e),
                }
            }
            service.call(req).await
        })
    }
}

/// CORS middleware
pub struct CorsMiddleware {
    pub allowed_origins: Vec<String>,
}

impl<S> Transform<S, ServiceRequest> for CorsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = CorsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CorsMiddlewareService {
            service: Arc::new(service),
            allowed_origins: Arc::new(self.allowed_origins.clone()),
        }))
    }
}

pub struct CorsMiddlewareService<S> {
    service: Arc<S>,
    allowed_origins: Arc<Vec<String>>,
}

fn origin_allowed(origins: &[String], origin: &str) -> bool {
    origins.iter().any(|o| o == "*" || o == origin)
}

impl<S> Service<ServiceRequest> for CorsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let allowed_origins = Arc::clone(&self.allowed_origins);

        Box::pin(async move {
            // Preflight never reaches the routes
            let mut res = if req.method() == actix_web::http::Method::OPTIONS {
                req.into_response(HttpResponse::NoContent().finish())
            } else {
                service.call(req).await?
            };

            let origin_header = res.request().headers().get(header::ORIGIN).cloned();
            let headers = res.headers_mut();

            if let Some(origin) = origin_header {
                if let Ok(origin_str) = origin.to_str() {
                    if origin_allowed(&allowed_origins, origin_str) {
                        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
                    }
                }
            }

            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                header::HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                header::HeaderValue::from_static("Content-Type, Authorization, X-Requested-With"),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                header::HeaderValue::from_static("true"),
            );

            Ok(res)
        })
    }
}

/// Per client IP and path request limit.
pub struct RateLimitMiddleware {
    pub store: Arc<Mutex<RateLimitStore>>,
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl<S> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Arc::new(service),
            store: Arc::clone(&self.store),
            max_requests: self.max_requests,
            window_seconds: self.window_seconds,
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Arc<S>,
    store: Arc<Mutex<RateLimitStore>>,
    max_requests: u32,
    window_seconds: u64,
}

impl<S> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let store = Arc::clone(&self.store);
        let max_requests = self.max_requests;
        let window_seconds = self.window_seconds;

        Box::pin(async move {
            let ip = req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string();
            let key = format!("{}|{}", ip, req.path());

            let allowed = {
                let mut store = store.lock().await;
                store.is_allowed(&key, max_requests, window_seconds)
            };
            if !allowed {
                log::warn!("Rate limit exceeded for {}", key);
                let response = HttpResponse::TooManyRequests().json(ApiResponse::status(
                    ResponseStatus::Failure,
                    "Too many requests, please try again later.",
                ));
                return Ok(req.into_response(response));
            }

            service.call(req).await
        })
    }
}

/// Security headers middleware
pub struct SecurityHeadersMiddleware;

impl<S> Transform<S, ServiceRequest> for SecurityHeadersMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = SecurityHeadersMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecurityHeadersMiddlewareService {
            service: Arc::new(service),
        }))
    }
}

pub struct SecurityHeadersMiddlewareService<S> {
    service: Arc<S>,
}

impl<S> Service<ServiceRequest> for SecurityHeadersMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);

        Box::pin(async move {
            let mut res = service.call(req).await?;
            let headers = res.headers_mut();

            for (name, value) in [
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
                (header::X_FRAME_OPTIONS, "DENY"),
                (header::STRICT_TRANSPORT_SECURITY, "max-age=31536000; includeSubDomains"),
                (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
            ] {
                headers.insert(name, header::HeaderValue::from_static(value));
            }

            Ok(res)
        })
    }
}

/// Request logging middleware
pub struct LoggingMiddleware;

impl<S> Transform<S, ServiceRequest> for LoggingMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = LoggingMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(LoggingMiddlewareService {
            service: Arc::new(service),
        }))
    }
}

pub struct LoggingMiddlewareService<S> {
    service: Arc<S>,
}

impl<S> Service<ServiceRequest> for LoggingMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let start_time = std::time::Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_addr = req.connection_info().peer_addr().unwrap_or("unknown").to_string();

        Box::pin(async move {
            let result = service.call(req).await;
            let elapsed = start_time.elapsed().as_millis();

            match &result {
                Ok(res) => crate::utils::logging::log_request(
                    &method,
                    &path,
                    res.status().as_u16(),
                    elapsed,
                    &remote_addr,
                ),
                Err(err) => log::error!(
                    "Request failed: {} {} {} {}ms from {}",
                    method,
                    path,
                    err,
                    elapsed,
                    &remote_addr
                ),
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, web, App};

    #[::core::prelude::v1::test]
    fn wildcard_and_exact_origins() {
        let origins = vec!["http://localhost:3000".to_string()];
        assert!(origin_allowed(&origins, "http://localhost:3000"));
        assert!(!origin_allowed(&origins, "http://evil.test"));
        assert!(origin_allowed(&["*".to_string()], "http://evil.test"));
    }

    #[actix_rt::test]
    async fn preflight_and_allowed_origin() {
        let app = test::init_service(
            App::new()
                .route("/ping", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .wrap(SecurityHeadersMiddleware)
                .wrap(CorsMiddleware {
                    allowed_origins: vec!["http://localhost:3000".into()],
                }),
        )
        .await;

        let req = test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/ping")
            .insert_header((header::ORIGIN, "http://localhost:3000"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );

        let req = test::TestRequest::get()
            .uri("/ping")
            .insert_header((header::ORIGIN, "http://evil.test"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(resp.headers().get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
    }
}
