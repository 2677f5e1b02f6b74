use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::filter::sort_order;
use super::{batch_times, strip_reserved, Document, DocumentStore, Filter, SortSpec, StoreError, Window};

/// In-process store used by tests and local development. Documents of a
/// collection are kept in insertion order, which is also creation order.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn compare(a: &Document, b: &Document, sort: &[SortSpec]) -> Ordering {
    for spec in sort {
        let ord = match spec.column() {
            Some("created_at") => a.created_at.cmp(&b.created_at),
            Some("updated_at") => a.updated_at.cmp(&b.updated_at),
            Some(_) => a.id.cmp(&b.id),
            None => sort_order(spec.lookup(&a.body), spec.lookup(&b.body)),
        };
        let ord = if spec.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

fn merge(doc: &mut Document, patch: &Map<String, Value>) {
    for (k, v) in strip_reserved(patch.clone()) {
        doc.body.insert(k, v);
    }
    doc.updated_at = Utc::now();
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(
        &self,
        collection: &str,
        bodies: Vec<Map<String, Value>>,
    ) -> Result<Vec<Document>, StoreError> {
        let times = batch_times(bodies.len());
        let docs: Vec<Document> = bodies
            .into_iter()
            .zip(times)
            .map(|(body, t)| Document {
                id: Uuid::new_v4(),
                body: strip_reserved(body),
                created_at: t,
                updated_at: t,
            })
            .collect();
        let mut guard = self.collections.write().await;
        guard
            .entry(collection.to_string())
            .or_default()
            .extend(docs.iter().cloned());
        Ok(docs)
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(&d.id, &d.body)))
            .cloned())
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &[SortSpec],
        window: Option<Window>,
    ) -> Result<Vec<Document>, StoreError> {
        let guard = self.collections.read().await;
        let mut docs: Vec<Document> = guard
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.matches(&d.id, &d.body))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        docs.sort_by(|a, b| compare(a, b, sort));
        Ok(match window {
            Some(w) => docs
                .into_iter()
                .skip(w.offset.max(0) as usize)
                .take(w.limit.max(0) as usize)
                .collect(),
            None => docs,
        })
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(&d.id, &d.body)).count() as u64)
            .unwrap_or(0))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<Option<Document>, StoreError> {
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(None);
        };
        Ok(docs
            .iter_mut()
            .find(|d| filter.matches(&d.id, &d.body))
            .map(|doc| {
                merge(doc, patch);
                doc.clone()
            }))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<u64, StoreError> {
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(0);
        };
        let mut n = 0;
        for doc in docs.iter_mut().filter(|d| filter.matches(&d.id, &d.body)) {
            merge(doc, patch);
            n += 1;
        }
        Ok(n)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(None);
        };
        Ok(docs
            .iter()
            .position(|d| filter.matches(&d.id, &d.body))
            .map(|idx| docs.remove(idx)))
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(&d.id, &d.body));
        Ok((before - docs.len()) as u64)
    }
}
