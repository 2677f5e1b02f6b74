//! Generic CRUD routes mounted once per registered resource.

use actix_web::{web, HttpResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use validator::Validate;

use super::report;
use crate::auth::AuthUser;
use crate::models::resource::RESOURCES;
use crate::models::{
    BulkInsertRequest, BulkUpdateRequest, CountRequest, Extension, IdsRequest, ListRequest,
    PushRequest, ResourceSpec,
};
use crate::services::resource::ListOutcome;
use crate::services::{NotificationService, ResourceService};
use crate::utils::{error::AppError, flatten_validation_errors, response};

type Spec = web::Data<&'static ResourceSpec>;
type Resources = web::Data<Arc<ResourceService>>;
type HandlerResult = Result<HttpResponse, AppError>;

/// Mount `/<name>/...` for every resource.
pub fn configure(cfg: &mut web::ServiceConfig) {
    for spec in RESOURCES {
        let mut scope = web::scope(&format!("/{}", spec.name))
            .app_data(web::Data::new(spec))
            .route("/create", web::post().to(create))
            .route("/list", web::post().to(list))
            .route("/get/{id}", web::get().to(get))
            .route("/count", web::post().to(count))
            .route("/update/{id}", web::put().to(update))
            .route("/delete/{id}", web::delete().to(delete))
            .route("/softdelete/{id}", web::put().to(soft_delete))
            .route("/bulkinsert", web::post().to(bulk_insert))
            .route("/bulkupdate", web::put().to(bulk_update))
            .route("/deletemany", web::post().to(delete_many))
            .route("/softdeletemany", web::put().to(soft_delete_many));
        scope = match spec.extension {
            Extension::Discussion => scope
                .route("/like/{id}", web::put().to(toggle_like))
                .route("/quandalist", web::post().to(list_with_replies)),
            Extension::PushDispatch => scope.route("/push", web::post().to(push)),
            Extension::None | Extension::VisitStatus => scope,
        };
        cfg.service(scope);
    }
}

fn list_response(outcome: ListOutcome) -> HttpResponse {
    match outcome {
        ListOutcome::Count(total) => response::success_response(json!({ "totalRecords": total })),
        ListOutcome::Page(page) => response::success_response(page),
        ListOutcome::All(data) => response::success_response(json!({ "data": data })),
    }
}

fn caller_id(caller: &AuthUser) -> Option<String> {
    Some(caller.id_string())
}

pub async fn create(spec: Spec, svc: Resources, caller: AuthUser, body: web::Json<Value>) -> HandlerResult {
    let doc = svc
        .create(&spec, &caller, body.into_inner())
        .await
        .map_err(report(svc.store(), "create", caller_id(&caller)))?;
    Ok(response::success_response(doc))
}

pub async fn list(spec: Spec, svc: Resources, caller: Option<AuthUser>, body: web::Json<ListRequest>) -> HandlerResult {
    if spec.list_requires_auth && caller.is_none() {
        return Err(AppError::unauthorized(
            crate::models::ResponseStatus::Unauthorized.default_message(),
        ));
    }
    let outcome = svc
        .list(&spec, caller.as_ref(), body.into_inner())
        .await
        .map_err(report(svc.store(), "list", caller.as_ref().and_then(caller_id)))?;
    Ok(list_response(outcome))
}

pub async fn get(spec: Spec, svc: Resources, id: web::Path<String>) -> HandlerResult {
    let doc = svc.get(&spec, &id).await.map_err(report(svc.store(), "get", None))?;
    Ok(response::success_response(doc))
}

pub async fn count(spec: Spec, svc: Resources, body: web::Json<CountRequest>) -> HandlerResult {
    let total = svc
        .count(&spec, &body.filter)
        .await
        .map_err(report(svc.store(), "count", None))?;
    Ok(response::success_response(json!({ "count": total })))
}

pub async fn update(
    spec: Spec,
    svc: Resources,
    caller: AuthUser,
    id: web::Path<String>,
    body: web::Json<Value>,
) -> HandlerResult {
    let doc = svc
        .update(&spec, &caller, &id, body.into_inner())
        .await
        .map_err(report(svc.store(), "update", caller_id(&caller)))?;
    Ok(response::success_response(doc))
}

pub async fn delete(spec: Spec, svc: Resources, caller: AuthUser, id: web::Path<String>) -> HandlerResult {
    let doc = svc
        .delete(&spec, &id)
        .await
        .map_err(report(svc.store(), "delete", caller_id(&caller)))?;
    Ok(response::success_response(doc))
}

pub async fn soft_delete(spec: Spec, svc: Resources, caller: AuthUser, id: web::Path<String>) -> HandlerResult {
    let doc = svc
        .soft_delete(&spec, &caller, &id)
        .await
        .map_err(report(svc.store(), "soft_delete", caller_id(&caller)))?;
    Ok(response::success_response(doc))
}

pub async fn bulk_insert(spec: Spec, svc: Resources, caller: AuthUser, body: web::Json<BulkInsertRequest>) -> HandlerResult {
    let inserted = svc
        .bulk_insert(&spec, &caller, body.into_inner().data)
        .await
        .map_err(report(svc.store(), "bulk_insert", caller_id(&caller)))?;
    Ok(response::success_response(json!({ "count": inserted })))
}

pub async fn bulk_update(spec: Spec, svc: Resources, caller: AuthUser, body: web::Json<BulkUpdateRequest>) -> HandlerResult {
    let BulkUpdateRequest { filter, data } = body.into_inner();
    let updated = svc
        .bulk_update(&spec, &caller, &filter, data)
        .await
        .map_err(report(svc.store(), "bulk_update", caller_id(&caller)))?;
    Ok(response::success_response(json!({ "count": updated })))
}

pub async fn delete_many(spec: Spec, svc: Resources, caller: AuthUser, body: web::Json<IdsRequest>) -> HandlerResult {
    let deleted = svc
        .delete_many(&spec, &body.ids)
        .await
        .map_err(report(svc.store(), "delete_many", caller_id(&caller)))?;
    Ok(response::success_response(json!({ "count": deleted })))
}

pub async fn soft_delete_many(spec: Spec, svc: Resources, caller: AuthUser, body: web::Json<IdsRequest>) -> HandlerResult {
    let updated = svc
        .soft_delete_many(&spec, &caller, &body.ids)
        .await
        .map_err(report(svc.store(), "soft_delete_many", caller_id(&caller)))?;
    Ok(response::success_response(json!({ "count": updated })))
}

pub async fn toggle_like(spec: Spec, svc: Resources, caller: AuthUser, id: web::Path<String>) -> HandlerResult {
    let outcome = svc
        .toggle_like(&spec, &caller, &id)
        .await
        .map_err(report(svc.store(), "toggle_like", caller_id(&caller)))?;
    Ok(response::success_response(outcome))
}

pub async fn list_with_replies(spec: Spec, svc: Resources, body: web::Json<ListRequest>) -> HandlerResult {
    let outcome = svc
        .list_with_replies(&spec, body.into_inner())
        .await
        .map_err(report(svc.store(), "list_with_replies", None))?;
    Ok(list_response(outcome))
}

pub async fn push(
    spec: Spec,
    svc: Resources,
    notifier: web::Data<Arc<NotificationService>>,
    caller: AuthUser,
    body: web::Json<PushRequest>,
) -> HandlerResult {
    let req = body.into_inner();
    if let Err(e) = req.validate() {
        return Ok(response::validation_error_response(&flatten_validation_errors(&e)));
    }
    let outcome = svc
        .push_notification(&spec, &caller, req, &notifier)
        .await
        .map_err(report(svc.store(), "push_notification", caller_id(&caller)))?;
    Ok(response::success_response(outcome))
}
