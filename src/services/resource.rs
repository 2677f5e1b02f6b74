//! The CRUD template shared by every resource, plus the few per-resource extras.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::database::{Document, DocumentStore, FieldOp, Filter, SortSpec, Window};
use crate::models::resource::{self, Extension, ListMode, ResourceSpec, UniqueRule};
use crate::models::schema::{self, Mode};
use crate::models::{ListRequest, Paginated, Paginator, PushRequest};
use crate::services::notification::{NotificationService, PushMessage};
use crate::utils::error::AppError;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 1000;

/// Result of `POST /list`.
#[derive(Debug)]
pub enum ListOutcome {
    Count(u64),
    Page(Paginated),
    All(Vec<Value>),
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct LikeOutcome {
    pub like: u64,
    pub liked: bool,
}

#[derive(Debug, Serialize)]
pub struct PushOutcome {
    pub notification: Map<String, Value>,
    pub delivered: u64,
    pub failed: u64,
}

/// Field selection from `options.select`.
#[derive(Debug, Default, PartialEq)]
pub struct Projection {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl Projection {
    /// Accepts `"a b -c"`, `["a", "b"]` or `{"a": 1, "c": 0}`.
    pub fn parse(select: &Value) -> Result<Self, AppError> {
        let mut p = Self::default();
        let mut push = |field: &str, keep: bool| {
            if keep {
                p.include.push(field.to_string());
            } else {
                p.exclude.push(field.to_string());
            }
        };
        match select {
            Value::Null => {}
            Value::String(s) => {
                for token in s.split_whitespace() {
                    match token.strip_prefix('-') {
                        Some(field) => push(field, false),
                        None => push(token, true),
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    let field = item
                        .as_str()
                        .ok_or_else(|| AppError::validation("\"select\" entries must be strings"))?;
                    push(field, true);
                }
            }
            Value::Object(map) => {
                for (field, flag) in map {
                    let keep = match flag {
                        Value::Bool(b) => *b,
                        Value::Number(n) => n.as_i64() != Some(0),
                        _ => return Err(AppError::validation("\"select\" values must be 0 or 1")),
                    };
                    push(field, keep);
                }
            }
            _ => return Err(AppError::validation("\"select\" must be a string, array or object")),
        }
        Ok(p)
    }

    pub fn apply(&self, mut doc: Map<String, Value>) -> Map<String, Value> {
        if !self.include.is_empty() {
            doc.retain(|k, _| k == "id" || self.include.iter().any(|f| f == k));
        }
        for field in &self.exclude {
            doc.remove(field);
        }
        doc
    }
}

/// Parse a path id, rejecting anything that is not a UUID.
pub fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::validation("invalid objectId."))
}

fn parse_ids(raw: &[String]) -> Result<Vec<Uuid>, AppError> {
    if raw.is_empty() {
        return Err(AppError::bad_request("Insufficient request parameters! ids is required."));
    }
    raw.iter().map(|s| parse_id(s)).collect()
}

/// Values of a rule's fields, or `None` when any of them is absent or blank.
fn unique_key(rule: &UniqueRule, body: &Map<String, Value>) -> Option<Vec<Value>> {
    rule.fields
        .iter()
        .map(|field| match body.get(*field) {
            Some(Value::Null) | None => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(v) => Some(v.clone()),
        })
        .collect()
}

fn key_filter(rule: &UniqueRule, key: &[Value]) -> Filter {
    rule.fields
        .iter()
        .zip(key)
        .fold(Filter::new(), |f, (field, value)| f.eq(field, value.clone()))
}

/// Unique keys already used within one request.
#[derive(Default)]
struct BatchKeys(HashSet<(&'static str, String)>);

impl BatchKeys {
    fn claim(&mut self, rule: &UniqueRule, key: &[Value]) -> Result<(), AppError> {
        let entry = (rule.message, Value::Array(key.to_vec()).to_string());
        if self.0.insert(entry) {
            Ok(())
        } else {
            Err(AppError::validation(rule.message))
        }
    }
}

fn normalize(spec: &ResourceSpec, body: &mut Map<String, Value>) {
    for field in spec.normalized_fields {
        if let Some(Value::String(s)) = body.get_mut(*field) {
            *s = s.trim().to_lowercase();
        }
    }
}

fn invalid(errors: Vec<String>) -> AppError {
    AppError::validation(format!("Invalid values in parameters, {}", errors.join(", ")))
}

fn as_object(value: Value) -> Result<Map<String, Value>, AppError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::validation("Invalid values in parameters, body must be an object")),
    }
}

/// Hide soft-deleted documents unless the caller asks about `isDeleted` explicitly.
pub fn visible(filter: Filter) -> Filter {
    if filter.mentions("isDeleted") {
        filter
    } else {
        filter.with("isDeleted", FieldOp::Ne(Value::Bool(true)))
    }
}

/// Client view of a document: metadata added, hidden fields removed.
pub fn present(spec: &ResourceSpec, doc: Document) -> Map<String, Value> {
    let mut map = doc.into_json();
    for field in spec.hidden_fields {
        map.remove(*field);
    }
    map
}

pub struct ResourceService {
    store: Arc<dyn DocumentStore>,
}

impl ResourceService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    /// Validate and stamp a body for insertion.
    fn prepare_new(&self, spec: &ResourceSpec, caller: &AuthUser, body: Value) -> Result<Map<String, Value>, AppError> {
        let mut body = crate::database::strip_reserved(as_object(body)?);
        for field in spec.protected_fields {
            body.remove(*field);
        }
        if let Some(owner) = spec.owner_field {
            body.insert(owner.to_string(), Value::String(caller.id_string()));
        }
        normalize(spec, &mut body);
        schema::validate(spec.fields, &body, Mode::Create).map_err(invalid)?;
        schema::apply_defaults(spec.fields, &mut body);
        body.insert("addedBy".into(), Value::String(caller.id_string()));
        body.insert("isActive".into(), Value::Bool(true));
        body.insert("isDeleted".into(), Value::Bool(false));
        Ok(body)
    }

    /// Reject the body when a unique field combination is already taken.
    async fn check_unique(&self, spec: &ResourceSpec, body: &Map<String, Value>) -> Result<(), AppError> {
        for rule in spec.unique {
            let Some(key) = unique_key(rule, body) else { continue };
            if self.store.find_one(spec.name, &key_filter(rule, &key)).await?.is_some() {
                return Err(AppError::validation(rule.message));
            }
        }
        Ok(())
    }

    /// Check the unique rules a patch touches against the documents it will produce.
    /// The patched documents themselves are not counted as clashes.
    async fn check_patched_unique(
        &self,
        spec: &ResourceSpec,
        targets: &[Document],
        patch: &Map<String, Value>,
    ) -> Result<(), AppError> {
        let rules: Vec<&UniqueRule> = spec
            .unique
            .iter()
            .filter(|rule| rule.fields.iter().any(|f| patch.contains_key(*f)))
            .collect();
        if rules.is_empty() {
            return Ok(());
        }
        let own: HashSet<Uuid> = targets.iter().map(|d| d.id).collect();
        let mut batch = BatchKeys::default();
        for target in targets {
            let mut merged = target.body.clone();
            merged.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
            for rule in &rules {
                let Some(key) = unique_key(rule, &merged) else { continue };
                batch.claim(rule, &key)?;
                let holders = self
                    .store
                    .find_many(spec.name, &key_filter(rule, &key), &[], None)
                    .await?;
                if holders.iter().any(|d| !own.contains(&d.id)) {
                    return Err(AppError::validation(rule.message));
                }
            }
        }
        Ok(())
    }

    pub async fn create(&self, spec: &ResourceSpec, caller: &AuthUser, body: Value) -> Result<Map<String, Value>, AppError> {
        let body = self.prepare_new(spec, caller, body)?;
        self.check_unique(spec, &body).await?;
        let doc = self.store.insert_one(spec.name, body).await?;
        log::debug!("Created {} {}", spec.name, doc.id);
        Ok(present(spec, doc))
    }

    pub async fn bulk_insert(&self, spec: &ResourceSpec, caller: &AuthUser, data: Vec<Value>) -> Result<u64, AppError> {
        if data.is_empty() {
            return Err(AppError::bad_request("Insufficient request parameters! data is required."));
        }
        let bodies = data
            .into_iter()
            .map(|item| self.prepare_new(spec, caller, item))
            .collect::<Result<Vec<_>, _>>()?;
        let mut batch = BatchKeys::default();
        for body in &bodies {
            for rule in spec.unique {
                if let Some(key) = unique_key(rule, body) {
                    batch.claim(rule, &key)?;
                }
            }
            self.check_unique(spec, body).await?;
        }
        let docs = self.store.insert(spec.name, bodies).await?;
        Ok(docs.len() as u64)
    }

    pub async fn list(&self, spec: &ResourceSpec, caller: Option<&AuthUser>, req: ListRequest) -> Result<ListOutcome, AppError> {
        let filter = visible(Filter::parse(&req.query)?);
        if req.is_count_only {
            return Ok(ListOutcome::Count(self.store.count(spec.name, &filter).await?));
        }
        let sort = SortSpec::parse(&req.options.sort)?;
        let projection = Projection::parse(&req.options.select)?;

        let outcome = match spec.list_mode {
            ListMode::Unpaginated => {
                let docs = self.store.find_many(spec.name, &filter, &sort, None).await?;
                if docs.is_empty() {
                    return Err(AppError::not_found());
                }
                ListOutcome::All(self.render(spec, caller, docs, &projection).await?)
            }
            ListMode::Paginated => {
                let (paginator, docs) = self.paginate(spec, &filter, &sort, &req).await?;
                let data = self.render(spec, caller, docs, &projection).await?;
                ListOutcome::Page(Paginated { data, paginator })
            }
        };
        Ok(outcome)
    }

    async fn paginate(
        &self,
        spec: &ResourceSpec,
        filter: &Filter,
        sort: &[SortSpec],
        req: &ListRequest,
    ) -> Result<(Paginator, Vec<Document>), AppError> {
        let total = self.store.count(spec.name, filter).await?;
        let (paginator, window) = if req.options.pagination == Some(false) {
            (Paginator::new(total, 1, total), None)
        } else {
            let page = req.options.page.unwrap_or(DEFAULT_PAGE).max(1);
            let limit = req.options.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
            // an offset past i64 is past the last page
            let offset = (page - 1)
                .checked_mul(limit)
                .and_then(|o| i64::try_from(o).ok())
                .ok_or_else(AppError::not_found)?;
            let window = Window {
                limit: limit as i64,
                offset,
            };
            (Paginator::new(total, page, limit), Some(window))
        };
        let docs = self.store.find_many(spec.name, filter, sort, window).await?;
        if docs.is_empty() {
            return Err(AppError::not_found());
        }
        Ok((paginator, docs))
    }

    /// Present documents and apply the resource's list decoration.
    async fn render(
        &self,
        spec: &ResourceSpec,
        caller: Option<&AuthUser>,
        docs: Vec<Document>,
        projection: &Projection,
    ) -> Result<Vec<Value>, AppError> {
        let visited = match (spec.extension, caller) {
            (Extension::VisitStatus, Some(user)) => self.visited_exhibitors(user).await?,
            _ => HashSet::new(),
        };
        Ok(docs
            .into_iter()
            .map(|doc| {
                let id = doc.id.to_string();
                let mut map = present(spec, doc);
                if visited.contains(&id) {
                    map.insert("status".into(), Value::String("Visited".into()));
                }
                Value::Object(projection.apply(map))
            })
            .collect())
    }

    /// Exhibitor ids the caller has an active lead scan for.
    async fn visited_exhibitors(&self, user: &AuthUser) -> Result<HashSet<String>, AppError> {
        let filter = visible(Filter::new().eq("userId", user.id_string()));
        let scans = self.store.find_many("leadscan", &filter, &[], None).await?;
        Ok(scans
            .iter()
            .filter_map(|scan| scan.get_str("exhibitorId").map(str::to_string))
            .collect())
    }

    pub async fn get(&self, spec: &ResourceSpec, id: &str) -> Result<Map<String, Value>, AppError> {
        let id = parse_id(id)?;
        let doc = self
            .store
            .find_one(spec.name, &visible(Filter::id(id)))
            .await?
            .ok_or_else(AppError::not_found)?;
        Ok(present(spec, doc))
    }

    pub async fn count(&self, spec: &ResourceSpec, filter: &Value) -> Result<u64, AppError> {
        let filter = visible(Filter::parse(filter)?);
        Ok(self.store.count(spec.name, &filter).await?)
    }

    fn prepare_patch(&self, spec: &ResourceSpec, caller: &AuthUser, body: Map<String, Value>) -> Result<Map<String, Value>, AppError> {
        let mut patch = crate::database::strip_reserved(body);
        for field in spec.protected_fields {
            patch.remove(*field);
        }
        patch.remove("addedBy");
        if let Some(owner) = spec.owner_field {
            patch.remove(owner);
        }
        normalize(spec, &mut patch);
        schema::validate(spec.fields, &patch, Mode::Update).map_err(invalid)?;
        patch.insert("updatedBy".into(), Value::String(caller.id_string()));
        Ok(patch)
    }

    pub async fn update(&self, spec: &ResourceSpec, caller: &AuthUser, id: &str, body: Value) -> Result<Map<String, Value>, AppError> {
        let id = parse_id(id)?;
        let patch = self.prepare_patch(spec, caller, as_object(body)?)?;
        if let Some(current) = self.store.find_one(spec.name, &Filter::id(id)).await? {
            self.check_patched_unique(spec, &[current], &patch).await?;
        }
        let doc = self
            .store
            .update_one(spec.name, &Filter::id(id), &patch)
            .await?
            .ok_or_else(AppError::not_found)?;
        Ok(present(spec, doc))
    }

    pub async fn bulk_update(
        &self,
        spec: &ResourceSpec,
        caller: &AuthUser,
        filter: &Value,
        data: Map<String, Value>,
    ) -> Result<u64, AppError> {
        let filter = Filter::parse(filter)?;
        let patch = self.prepare_patch(spec, caller, data)?;
        if spec.unique.iter().any(|rule| rule.fields.iter().any(|f| patch.contains_key(*f))) {
            let targets = self.store.find_many(spec.name, &filter, &[], None).await?;
            self.check_patched_unique(spec, &targets, &patch).await?;
        }
        let count = self.store.update_many(spec.name, &filter, &patch).await?;
        if count == 0 {
            return Err(AppError::not_found());
        }
        Ok(count)
    }

    pub async fn delete(&self, spec: &ResourceSpec, id: &str) -> Result<Map<String, Value>, AppError> {
        let id = parse_id(id)?;
        let doc = self
            .store
            .delete_one(spec.name, &Filter::id(id))
            .await?
            .ok_or_else(AppError::not_found)?;
        Ok(present(spec, doc))
    }

    fn soft_delete_patch(caller: &AuthUser) -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert("isDeleted".into(), Value::Bool(true));
        patch.insert("updatedBy".into(), Value::String(caller.id_string()));
        patch
    }

    pub async fn soft_delete(&self, spec: &ResourceSpec, caller: &AuthUser, id: &str) -> Result<Map<String, Value>, AppError> {
        let id = parse_id(id)?;
        let doc = self
            .store
            .update_one(spec.name, &Filter::id(id), &Self::soft_delete_patch(caller))
            .await?
            .ok_or_else(AppError::not_found)?;
        Ok(present(spec, doc))
    }

    pub async fn delete_many(&self, spec: &ResourceSpec, ids: &[String]) -> Result<u64, AppError> {
        let ids = parse_ids(ids)?;
        let count = self.store.delete_many(spec.name, &Filter::ids(ids)).await?;
        if count == 0 {
            return Err(AppError::not_found());
        }
        Ok(count)
    }

    pub async fn soft_delete_many(&self, spec: &ResourceSpec, caller: &AuthUser, ids: &[String]) -> Result<u64, AppError> {
        let ids = parse_ids(ids)?;
        let count = self
            .store
            .update_many(spec.name, &Filter::ids(ids), &Self::soft_delete_patch(caller))
            .await?;
        if count == 0 {
            return Err(AppError::not_found());
        }
        Ok(count)
    }

    /// Add or remove the caller from `likedBy`, keeping `like` equal to its length.
    pub async fn toggle_like(&self, spec: &ResourceSpec, caller: &AuthUser, id: &str) -> Result<LikeOutcome, AppError> {
        let id = parse_id(id)?;
        let filter = visible(Filter::id(id));
        let doc = self
            .store
            .find_one(spec.name, &filter)
            .await?
            .ok_or_else(AppError::not_found)?;

        let me = Value::String(caller.id_string());
        let mut liked_by: Vec<Value> = match doc.get("likedBy") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let liked = if liked_by.contains(&me) {
            liked_by.retain(|v| v != &me);
            false
        } else {
            liked_by.push(me);
            true
        };
        let like = liked_by.len() as u64;

        let mut patch = Map::new();
        patch.insert("likedBy".into(), Value::Array(liked_by));
        patch.insert("like".into(), Value::from(like));
        self.store
            .update_one(spec.name, &Filter::id(id), &patch)
            .await?
            .ok_or_else(AppError::not_found)?;
        Ok(LikeOutcome { like, liked })
    }

    /// Paginated Q&A list with each entry's replies attached.
    pub async fn list_with_replies(&self, spec: &ResourceSpec, req: ListRequest) -> Result<ListOutcome, AppError> {
        let mut page = match self.list(spec, None, req).await? {
            ListOutcome::Page(page) => page,
            other => return Ok(other),
        };
        let ids: Vec<Value> = page
            .data
            .iter()
            .filter_map(|q| q.get("id").cloned())
            .collect();
        let reply_spec = resource::find("reply").ok_or_else(|| AppError::internal("reply resource missing"))?;
        let filter = visible(Filter::new().with("qandaId", FieldOp::In(ids)));
        let replies = self.store.find_many(reply_spec.name, &filter, &[], None).await?;
        let mut replies: Vec<Map<String, Value>> =
            replies.into_iter().map(|r| present(reply_spec, r)).collect();

        for question in page.data.iter_mut() {
            let Some(obj) = question.as_object_mut() else { continue };
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            let (mine, rest): (Vec<_>, Vec<_>) =
                replies.into_iter().partition(|r| r.get("qandaId") == Some(&id));
            replies = rest;
            obj.insert(
                "replies".into(),
                Value::Array(mine.into_iter().map(Value::Object).collect()),
            );
        }
        Ok(ListOutcome::Page(page))
    }

    /// Store a notification and push it to every device the user registered.
    pub async fn push_notification(
        &self,
        spec: &ResourceSpec,
        caller: &AuthUser,
        req: PushRequest,
        notifier: &NotificationService,
    ) -> Result<PushOutcome, AppError> {
        parse_id(&req.user_id)?;
        let mut body = Map::new();
        body.insert("userId".into(), Value::String(req.user_id.clone()));
        body.insert("title".into(), Value::String(req.title.clone()));
        body.insert("body".into(), Value::String(req.body.clone()));
        body.insert("isRead".into(), Value::Bool(false));
        if !req.data.is_empty() {
            body.insert("data".into(), Value::Object(req.data.clone()));
        }
        let notification = self.create(spec, caller, Value::Object(body)).await?;

        let filter = visible(Filter::new().eq("userId", req.user_id.clone()));
        let devices = self.store.find_many("devicetoken", &filter, &[], None).await?;
        let (mut delivered, mut failed) = (0, 0);
        for device in devices {
            let Some(token) = device.get_str("token") else { continue };
            let message = PushMessage {
                token: token.to_string(),
                title: req.title.clone(),
                body: req.body.clone(),
                data: req.data.clone(),
            };
            match notifier.push(&message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::warn!("Push to device {} failed: {}", device.id, e);
                    failed += 1;
                }
            }
        }
        Ok(PushOutcome {
            notification,
            delivered,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projection_forms() {
        let doc = json!({"id": "1", "name": "n", "hall": "h", "stall": "s"})
            .as_object()
            .cloned()
            .unwrap();
        let p = Projection::parse(&json!("name hall")).unwrap();
        assert_eq!(Value::Object(p.apply(doc.clone())), json!({"id": "1", "name": "n", "hall": "h"}));
        let p = Projection::parse(&json!({"stall": 0})).unwrap();
        assert!(!p.apply(doc.clone()).contains_key("stall"));
        let p = Projection::parse(&json!(["name"])).unwrap();
        assert_eq!(p.apply(doc).len(), 2);
        assert!(Projection::parse(&json!(5)).is_err());
    }

    #[test]
    fn visible_respects_explicit_is_deleted() {
        let f = visible(Filter::new());
        assert!(f.mentions("isDeleted"));
        let explicit = Filter::new().eq("isDeleted", true);
        assert_eq!(visible(explicit.clone()), explicit);
    }

    #[test]
    fn unique_keys_skip_blank_fields_and_repeat_once() {
        let rule = UniqueRule {
            fields: &["userId", "sessionId"],
            message: "taken",
        };
        let full = json!({"userId": "u", "sessionId": "s"}).as_object().cloned().unwrap();
        let blank = json!({"userId": "u", "sessionId": ""}).as_object().cloned().unwrap();
        assert_eq!(unique_key(&rule, &full), Some(vec![json!("u"), json!("s")]));
        assert_eq!(unique_key(&rule, &blank), None);

        let mut batch = BatchKeys::default();
        let key = unique_key(&rule, &full).unwrap();
        assert!(batch.claim(&rule, &key).is_ok());
        assert!(batch.claim(&rule, &key).is_err());
    }

    #[test]
    fn ids_must_be_uuids() {
        assert!(parse_id("abc").is_err());
        assert!(parse_ids(&[]).is_err());
        assert!(parse_ids(&[Uuid::new_v4().to_string()]).is_ok());
    }
}
