//! Shared test fixtures: a serde-friendly entity and an in-memory mock of
//! the upstream API with call counters and injectable latency.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use duocache::{
    ActionOutcome, ApiError, EntityKey, ItemApi, Keyed, ListOptions, ListResult, LocationRef,
    ResultMetadata,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUser {
    pub id: String,
    pub name: String,
}

impl TestUser {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

impl Keyed for TestUser {
    fn key(&self) -> EntityKey {
        EntityKey::new("user", self.id.as_str())
    }
}

pub fn user_key(id: &str) -> EntityKey {
    EntityKey::new("user", id)
}

#[derive(Default)]
pub struct CallCounts {
    pub get: AtomicU32,
    pub list: AtomicU32,
    pub one: AtomicU32,
    pub find: AtomicU32,
}

pub struct MockApi {
    users: Mutex<BTreeMap<String, TestUser>>,
    latency: Mutex<Duration>,
    pub calls: CallCounts,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(BTreeMap::new()),
            latency: Mutex::new(Duration::ZERO),
            calls: CallCounts::default(),
        }
    }

    pub fn seeded(users: &[(&str, &str)]) -> Self {
        let api = Self::new();
        for (id, name) in users {
            api.put(TestUser::new(id, name));
        }
        api
    }

    /// Inserts or replaces a user upstream without going through the cache.
    pub fn put(&self, user: TestUser) {
        self.users.lock().insert(user.id.clone(), user);
    }

    /// Deletes a user upstream without going through the cache.
    pub fn drop_user(&self, id: &str) {
        self.users.lock().remove(id);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }
    }

    fn all_users(&self) -> Vec<TestUser> {
        self.users.lock().values().cloned().collect()
    }
}

#[async_trait]
impl ItemApi<TestUser> for MockApi {
    async fn get(&self, key: &EntityKey) -> Result<TestUser, ApiError> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.users
            .lock()
            .get(&key.pk.canonical().to_string())
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn list(
        &self,
        _query: &Value,
        _locations: &[LocationRef],
        options: Option<&ListOptions>,
    ) -> Result<ListResult<TestUser>, ApiError> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let mut items = self.all_users();
        let total = items.len() as u64;
        if let Some(options) = options {
            let offset = options.offset.unwrap_or(0) as usize;
            items = items.into_iter().skip(offset).collect();
            if let Some(limit) = options.limit {
                items.truncate(limit as usize);
            }
        }
        let returned = items.len() as u64;
        Ok(ListResult {
            items,
            metadata: ResultMetadata {
                total: Some(total),
                returned,
                limit: options.and_then(|o| o.limit),
                offset: options.and_then(|o| o.offset),
                has_more: returned < total,
            },
        })
    }

    async fn one(
        &self,
        query: &Value,
        _locations: &[LocationRef],
    ) -> Result<Option<TestUser>, ApiError> {
        self.calls.one.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let users = self.users.lock();
        match query.get("id").and_then(Value::as_str) {
            Some(id) => Ok(users.get(id).cloned()),
            None => Ok(users.values().next().cloned()),
        }
    }

    async fn create(
        &self,
        partial: &Value,
        _locations: &[LocationRef],
    ) -> Result<TestUser, ApiError> {
        self.simulate_latency().await;
        let id = partial
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Server("create without id".into()))?;
        let name = partial.get("name").and_then(Value::as_str).unwrap_or("");
        let user = TestUser::new(id, name);
        self.put(user.clone());
        Ok(user)
    }

    async fn update(&self, key: &EntityKey, patch: &Value) -> Result<TestUser, ApiError> {
        self.simulate_latency().await;
        let mut users = self.users.lock();
        let user = users
            .get_mut(&key.pk.canonical().to_string())
            .ok_or(ApiError::NotFound)?;
        if let Some(name) = patch.get("name").and_then(Value::as_str) {
            user.name = name.to_string();
        }
        Ok(user.clone())
    }

    async fn remove(&self, key: &EntityKey) -> Result<(), ApiError> {
        self.simulate_latency().await;
        self.users
            .lock()
            .remove(&key.pk.canonical().to_string())
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }

    async fn action(
        &self,
        key: &EntityKey,
        name: &str,
        _body: &Value,
    ) -> Result<ActionOutcome<TestUser>, ApiError> {
        self.simulate_latency().await;
        let mut users = self.users.lock();
        let user = users
            .get_mut(&key.pk.canonical().to_string())
            .ok_or(ApiError::NotFound)?;
        if name == "promote" {
            user.name = format!("{} (promoted)", user.name);
        }
        Ok(ActionOutcome {
            result: serde_json::json!({ "action": name }),
            affected_items: vec![user.clone()],
        })
    }

    async fn all_action(
        &self,
        name: &str,
        _body: &Value,
        _locations: &[LocationRef],
    ) -> Result<ActionOutcome<TestUser>, ApiError> {
        self.simulate_latency().await;
        Ok(ActionOutcome {
            result: serde_json::json!({ "action": name }),
            affected_items: self.all_users(),
        })
    }

    async fn facet(
        &self,
        key: &EntityKey,
        name: &str,
        _params: &Value,
    ) -> Result<Value, ApiError> {
        self.simulate_latency().await;
        Ok(serde_json::json!({ "facet": name, "key": key.pk.canonical() }))
    }

    async fn all_facet(
        &self,
        name: &str,
        _params: &Value,
        _locations: &[LocationRef],
    ) -> Result<Value, ApiError> {
        self.simulate_latency().await;
        Ok(serde_json::json!({ "facet": name, "count": self.users.lock().len() }))
    }

    async fn find(
        &self,
        finder: &str,
        params: &Value,
        locations: &[LocationRef],
        options: Option<&ListOptions>,
    ) -> Result<ListResult<TestUser>, ApiError> {
        self.calls.find.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        match finder {
            "byName" => {
                let needle = params.get("name").and_then(Value::as_str).unwrap_or("");
                let items: Vec<TestUser> = self
                    .all_users()
                    .into_iter()
                    .filter(|u| u.name == needle)
                    .collect();
                Ok(ListResult::complete(items))
            }
            _ => self.list(params, locations, options).await,
        }
    }

    async fn find_one(
        &self,
        finder: &str,
        params: &Value,
        locations: &[LocationRef],
    ) -> Result<Option<TestUser>, ApiError> {
        let result = self.find(finder, params, locations, None).await?;
        Ok(result.items.into_iter().next())
    }
}
