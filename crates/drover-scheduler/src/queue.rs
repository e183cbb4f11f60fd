//! Queue implementations and route resolution.

use async_trait::async_trait;
use drover_core::{Error, QueueService, ResourceId, Result, WorkerAffinity};
use sqlx::PgPool;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Maps worker affinity onto the configured set of routes.
#[derive(Debug, Clone)]
pub struct RouteTable {
    channel: String,
    routes: Vec<String>,
}

impl RouteTable {
    pub fn new(channel: impl Into<String>, routes: Vec<String>) -> Self {
        Self {
            channel: channel.into(),
            routes,
        }
    }

    /// `channel[:flavor][:platform]`, which must be a configured route
    /// unless it is the bare channel.
    pub fn resolve(&self, worker: &WorkerAffinity) -> Result<String> {
        let mut route = self.channel.clone();
        for part in [&worker.flavor, &worker.platform].into_iter().flatten() {
            if !part.is_empty() {
                route.push(':');
                route.push_str(part);
            }
        }

        if route == self.channel || self.routes.contains(&route) {
            Ok(route)
        } else {
            Err(Error::Queue(format!("invalid route {} provided", route)))
        }
    }
}

/// Queue backed by the `queue_items` table.
pub struct PgQueue {
    pool: PgPool,
    routes: RouteTable,
}

impl PgQueue {
    pub fn new(pool: PgPool, routes: RouteTable) -> Self {
        Self { pool, routes }
    }
}

#[async_trait]
impl QueueService for PgQueue {
    fn route(&self, worker: &WorkerAffinity) -> Result<String> {
        self.routes.resolve(worker)
    }

    async fn push(&self, route: &str, build_id: ResourceId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_items (id, route, build_id, created_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(route)
        .bind(build_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Queue(e.to_string()))?;
        Ok(())
    }

    /// Uses SKIP LOCKED so concurrent workers never claim the same item.
    async fn pop(&self, routes: &[String]) -> Result<Option<ResourceId>> {
        let build_id: Option<uuid::Uuid> = sqlx::query_scalar(
            r#"
            DELETE FROM queue_items
            WHERE id = (
                SELECT id FROM queue_items
                WHERE route = ANY($1)
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING build_id
            "#,
        )
        .bind(routes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Queue(e.to_string()))?;
        Ok(build_id.map(ResourceId::from))
    }
}

/// In-process queue for tests and single-node development.
pub struct MemoryQueue {
    routes: RouteTable,
    items: Mutex<HashMap<String, VecDeque<(u64, ResourceId)>>>,
    seq: std::sync::atomic::AtomicU64,
}

impl MemoryQueue {
    pub fn new(channel: impl Into<String>, routes: Vec<String>) -> Self {
        Self {
            routes: RouteTable::new(channel, routes),
            items: Mutex::new(HashMap::new()),
            seq: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl QueueService for MemoryQueue {
    fn route(&self, worker: &WorkerAffinity) -> Result<String> {
        self.routes.resolve(worker)
    }

    async fn push(&self, route: &str, build_id: ResourceId) -> Result<()> {
        let seq = self
            .seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.items
            .lock()
            .await
            .entry(route.to_string())
            .or_default()
            .push_back((seq, build_id));
        Ok(())
    }

    /// Oldest item across the given routes.
    async fn pop(&self, routes: &[String]) -> Result<Option<ResourceId>> {
        let mut items = self.items.lock().await;
        let oldest = routes
            .iter()
            .filter_map(|r| items.get(r).and_then(|q| q.front()).map(|(seq, _)| (*seq, r)))
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, r)| r.clone());

        Ok(oldest
            .and_then(|route| items.get_mut(&route))
            .and_then(|q| q.pop_front())
            .map(|(_, id)| id))
    }
}
