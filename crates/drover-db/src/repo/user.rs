//! User repository.

use async_trait::async_trait;
use drover_core::{ResourceId, User};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub token: String,
    pub active: bool,
    pub admin: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id.into(),
            name: row.name,
            token: row.token,
            active: row.active,
            admin: row.admin,
        }
    }
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, user: &User) -> DbResult<User>;

    async fn get(&self, id: ResourceId) -> DbResult<User>;

    async fn get_by_name(&self, name: &str) -> DbResult<User>;
}

/// PostgreSQL implementation of UserRepo.
pub struct PgUserRepo {
    pool: PgPool,
}

impl PgUserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn create(&self, user: &User) -> DbResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, name, token, active, admin)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.token)
        .bind(user.active)
        .bind(user.admin)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::on_insert(e, format!("user {}", user.name)))?;
        Ok(row.into())
    }

    async fn get(&self, id: ResourceId) -> DbResult<User> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("user {}", id)))?;
        Ok(row.into())
    }

    async fn get_by_name(&self, name: &str) -> DbResult<User> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("user {}", name)))?;
        Ok(row.into())
    }
}
