//! Postgres-backed generation store and credit ledger.
//!
//! Expected tables (schema management lives outside this crate):
//!
//! ```sql
//! users       (id UUID PRIMARY KEY, credits BIGINT NOT NULL CHECK (credits >= 0))
//! generations (id BIGSERIAL PRIMARY KEY, user_id UUID NOT NULL REFERENCES users(id),
//!              subject TEXT NOT NULL, style TEXT, aspect_ratio TEXT NOT NULL,
//!              config JSONB NOT NULL, model_ids TEXT[] NOT NULL DEFAULT '{}',
//!              is_public BOOLEAN NOT NULL DEFAULT FALSE,
//!              created_at TIMESTAMPTZ NOT NULL DEFAULT NOW())
//! versions    (id BIGSERIAL PRIMARY KEY, generation_id BIGINT NOT NULL REFERENCES generations(id),
//!              version_number INT NOT NULL, content TEXT NOT NULL,
//!              edit_history JSONB NOT NULL DEFAULT '[]', ai_generated BOOLEAN NOT NULL,
//!              last_edited_at TIMESTAMPTZ, last_edited_by UUID,
//!              created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!              UNIQUE (generation_id, version_number))
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use vectorsmith_core::{EditHistory, GenerationId, UserId, VersionId};
use vectorsmith_generation::{
    Generation, GenerationDetail, GenerationFilter, GenerationSummary, NewGeneration, NewVersion, PageRequest,
    Paginated, Version,
};

use super::r#trait::{GenerationStore, StoreError, VersionEdit};
use crate::ledger::{CreditLedger, LedgerError, Reservation};

const GENERATION_COLUMNS: &str =
    "id, user_id, subject, style, aspect_ratio, config, model_ids, is_public, created_at";
const VERSION_COLUMNS: &str = "id, generation_id, version_number, content, edit_history, ai_generated, \
                               last_edited_at, last_edited_by, created_at";

/// Postgres-backed store.
///
/// ## Thread Safety
///
/// Uses SQLx connection pool which is thread-safe (Arc + Send + Sync).
///
/// ## Credit Guard
///
/// Every decrement is a single conditional `UPDATE ... WHERE credits > 0`, so
/// concurrent commits can never take a balance below zero. The synchronous
/// creation path runs the decrement and both inserts in one transaction.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl GenerationStore for PostgresStore {
    #[instrument(skip(self, generation, placeholder), fields(user_id = %generation.user_id), err)]
    async fn create_placeholder(
        &self,
        generation: NewGeneration,
        placeholder: String,
    ) -> Result<(Generation, Version), StoreError> {
        let mut tx = self.begin().await?;
        let generation = insert_generation(&mut tx, &generation).await?;
        let version = insert_version(
            &mut tx,
            generation.id,
            1,
            &NewVersion::new(placeholder).ai_generated(),
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok((generation, version))
    }

    #[instrument(skip(self, generation, version), fields(user_id = %generation.user_id), err)]
    async fn create_charged(
        &self,
        generation: NewGeneration,
        version: NewVersion,
    ) -> Result<(Generation, Version), StoreError> {
        let mut tx = self.begin().await?;

        let charged = sqlx::query("UPDATE users SET credits = credits - 1 WHERE id = $1 AND credits > 0 RETURNING credits")
            .bind(generation.user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("charge_credit", e))?;

        if charged.is_none() {
            let exists = user_exists(&mut tx, generation.user_id).await?;
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(if exists {
                StoreError::InsufficientCredit
            } else {
                StoreError::UserNotFound
            });
        }

        let generation = insert_generation(&mut tx, &generation).await?;
        let version = insert_version(&mut tx, generation.id, 1, &version).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok((generation, version))
    }

    #[instrument(skip(self, version), fields(generation_id = %generation_id), err)]
    async fn append_version(&self, generation_id: GenerationId, version: NewVersion) -> Result<Version, StoreError> {
        let mut tx = self.begin().await?;

        // Row lock serialises concurrent appends to one generation.
        let locked = sqlx::query("SELECT id FROM generations WHERE id = $1 FOR UPDATE")
            .bind(generation_id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_generation", e))?;
        if locked.is_none() {
            return Err(StoreError::NotFound(format!("generation {generation_id}")));
        }

        let version_number = match version.version_number {
            Some(n) if n < 1 => return Err(StoreError::Conflict(format!("invalid version number {n}"))),
            Some(n) => n,
            None => {
                let row = sqlx::query(
                    "SELECT COALESCE(MAX(version_number), 0) AS latest FROM versions WHERE generation_id = $1",
                )
                .bind(generation_id.get())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("latest_version", e))?;
                let latest: i32 = row
                    .try_get("latest")
                    .map_err(|e| StoreError::Storage(format!("failed to read latest version: {e}")))?;
                latest + 1
            }
        };

        let stored = insert_version(&mut tx, generation_id, version_number, &version).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(stored)
    }

    #[instrument(skip(self, edit), fields(version_id = %version_id), err)]
    async fn update_version(&self, version_id: VersionId, edit: VersionEdit) -> Result<Version, StoreError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query("SELECT edit_history FROM versions WHERE id = $1 FOR UPDATE")
            .bind(version_id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_edit_history", e))?
            .ok_or_else(|| StoreError::NotFound(format!("version {version_id}")))?;
        let Json(mut history): Json<EditHistory> = row
            .try_get("edit_history")
            .map_err(|e| StoreError::Storage(format!("failed to decode edit history: {e}")))?;

        let edited_at = edit.entry.timestamp;
        let edited_by = edit.entry.editor_user_id.map(Uuid::from);
        history.push(edit.entry);

        let row = sqlx::query(&format!(
            "UPDATE versions
             SET content = $2, edit_history = $3, ai_generated = $4, last_edited_at = $5, last_edited_by = $6
             WHERE id = $1
             RETURNING {VERSION_COLUMNS}"
        ))
        .bind(version_id.get())
        .bind(&edit.content)
        .bind(Json(&history))
        .bind(edit.ai_generated)
        .bind(edited_at)
        .bind(edited_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_version", e))?;

        let version = version_from_row(&row)?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(version)
    }

    #[instrument(skip(self, model_ids), fields(generation_id = %generation_id), err)]
    async fn record_models(&self, generation_id: GenerationId, model_ids: &[String]) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE generations SET model_ids = $2 WHERE id = $1")
            .bind(generation_id.get())
            .bind(model_ids)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_models", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("generation {generation_id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(generation_id = %generation_id), err)]
    async fn set_visibility(&self, generation_id: GenerationId, is_public: bool) -> Result<Generation, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE generations SET is_public = $2 WHERE id = $1 RETURNING {GENERATION_COLUMNS}"
        ))
        .bind(generation_id.get())
        .bind(is_public)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_visibility", e))?
        .ok_or_else(|| StoreError::NotFound(format!("generation {generation_id}")))?;
        generation_from_row(&row)
    }

    #[instrument(
        skip(self),
        fields(generation_id = %generation_id, version_count = tracing::field::Empty),
        err
    )]
    async fn get_generation(&self, generation_id: GenerationId) -> Result<GenerationDetail, StoreError> {
        let row = sqlx::query(&format!("SELECT {GENERATION_COLUMNS} FROM generations WHERE id = $1"))
            .bind(generation_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_generation", e))?
            .ok_or_else(|| StoreError::NotFound(format!("generation {generation_id}")))?;
        let generation = generation_from_row(&row)?;

        let rows = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM versions WHERE generation_id = $1 ORDER BY version_number ASC"
        ))
        .bind(generation_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_versions", e))?;
        let versions = rows.iter().map(version_from_row).collect::<Result<Vec<_>, _>>()?;

        Span::current().record("version_count", versions.len());
        Ok(GenerationDetail { generation, versions })
    }

    #[instrument(skip(self), fields(version_id = %version_id), err)]
    async fn get_version(&self, version_id: VersionId) -> Result<Version, StoreError> {
        let row = sqlx::query(&format!("SELECT {VERSION_COLUMNS} FROM versions WHERE id = $1"))
            .bind(version_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_version", e))?
            .ok_or_else(|| StoreError::NotFound(format!("version {version_id}")))?;
        version_from_row(&row)
    }

    #[instrument(skip(self), fields(page = page.page(), page_size = page.page_size()), err)]
    async fn list_paginated(
        &self,
        filter: GenerationFilter,
        page: PageRequest,
    ) -> Result<Paginated<GenerationSummary>, StoreError> {
        let owner = filter.owner.map(Uuid::from);

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM generations g
             WHERE ($1::uuid IS NULL OR g.user_id = $1) AND (NOT $2 OR g.is_public)",
        )
        .bind(owner)
        .bind(filter.public_only)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_generations", e))?
        .try_get("total")
        .map_err(|e| StoreError::Storage(format!("failed to read total: {e}")))?;

        let rows = sqlx::query(
            "SELECT g.id, g.user_id, g.subject, g.style, g.aspect_ratio, g.config, g.model_ids,
                    g.is_public, g.created_at,
                    COALESCE((SELECT MAX(v.version_number) FROM versions v WHERE v.generation_id = g.id), 0)
                        AS latest_version
             FROM generations g
             WHERE ($1::uuid IS NULL OR g.user_id = $1) AND (NOT $2 OR g.is_public)
             ORDER BY g.created_at DESC, g.id DESC
             LIMIT $3 OFFSET $4",
        )
        .bind(owner)
        .bind(filter.public_only)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_generations", e))?;

        let items = rows
            .iter()
            .map(|row| {
                let latest_version: i32 = row
                    .try_get("latest_version")
                    .map_err(|e| StoreError::Storage(format!("failed to read latest_version: {e}")))?;
                Ok(GenerationSummary {
                    generation: generation_from_row(row)?,
                    latest_version,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Paginated::new(items, total.max(0) as u64, page))
    }
}

#[async_trait]
impl CreditLedger for PostgresStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn balance(&self, user_id: UserId) -> Result<i64, LedgerError> {
        let row = sqlx::query("SELECT credits FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| ledger_error(map_sqlx_error("balance", e)))?
            .ok_or(LedgerError::UserNotFound)?;
        row.try_get("credits")
            .map_err(|e| LedgerError::Storage(format!("failed to read credits: {e}")))
    }

    #[instrument(skip(self, reservation), fields(user_id = %reservation.user_id()), err)]
    async fn commit(&self, reservation: Reservation) -> Result<i64, LedgerError> {
        let user_id = reservation.user_id();
        let row = sqlx::query("UPDATE users SET credits = credits - 1 WHERE id = $1 AND credits > 0 RETURNING credits")
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| ledger_error(map_sqlx_error("commit_credit", e)))?;

        match row {
            Some(row) => row
                .try_get("credits")
                .map_err(|e| LedgerError::Storage(format!("failed to read credits: {e}"))),
            None => {
                // Distinguish "gone" from "spent" for the caller.
                self.balance(user_id).await?;
                Err(LedgerError::InsufficientCredit)
            }
        }
    }
}

async fn user_exists(tx: &mut Transaction<'_, Postgres>, user_id: UserId) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT 1 AS present FROM users WHERE id = $1")
        .bind(user_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("user_exists", e))?;
    Ok(row.is_some())
}

async fn insert_generation(
    tx: &mut Transaction<'_, Postgres>,
    generation: &NewGeneration,
) -> Result<Generation, StoreError> {
    let row = sqlx::query(&format!(
        "INSERT INTO generations (user_id, subject, style, aspect_ratio, config, model_ids, is_public)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {GENERATION_COLUMNS}"
    ))
    .bind(generation.user_id.as_uuid())
    .bind(&generation.subject)
    .bind(&generation.style)
    .bind(&generation.aspect_ratio)
    .bind(&generation.config)
    .bind(&generation.model_ids)
    .bind(generation.is_public)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| match map_sqlx_error("insert_generation", e) {
        StoreError::NotFound(_) => StoreError::UserNotFound,
        other => other,
    })?;
    generation_from_row(&row)
}

async fn insert_version(
    tx: &mut Transaction<'_, Postgres>,
    generation_id: GenerationId,
    version_number: i32,
    version: &NewVersion,
) -> Result<Version, StoreError> {
    let history = EditHistory::from_entries(version.edit_history.entries().to_vec());
    let row = sqlx::query(&format!(
        "INSERT INTO versions (generation_id, version_number, content, edit_history, ai_generated)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {VERSION_COLUMNS}"
    ))
    .bind(generation_id.get())
    .bind(version_number)
    .bind(&version.content)
    .bind(Json(&history))
    .bind(version.ai_generated)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| match map_sqlx_error("insert_version", e) {
        StoreError::Conflict(_) => StoreError::Conflict(format!(
            "version {version_number} already exists for generation {generation_id}"
        )),
        other => other,
    })?;
    version_from_row(&row)
}

fn generation_from_row(row: &PgRow) -> Result<Generation, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Storage(format!("failed to decode generation row: {e}"));
    Ok(Generation {
        id: GenerationId::new(row.try_get("id").map_err(decode)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode)?),
        subject: row.try_get("subject").map_err(decode)?,
        style: row.try_get("style").map_err(decode)?,
        aspect_ratio: row.try_get("aspect_ratio").map_err(decode)?,
        config: row.try_get::<JsonValue, _>("config").map_err(decode)?,
        model_ids: row.try_get("model_ids").map_err(decode)?,
        is_public: row.try_get("is_public").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn version_from_row(row: &PgRow) -> Result<Version, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Storage(format!("failed to decode version row: {e}"));
    let Json(edit_history): Json<EditHistory> = row.try_get("edit_history").map_err(decode)?;
    let last_edited_by: Option<Uuid> = row.try_get("last_edited_by").map_err(decode)?;
    let last_edited_at: Option<DateTime<Utc>> = row.try_get("last_edited_at").map_err(decode)?;
    Ok(Version {
        id: VersionId::new(row.try_get("id").map_err(decode)?),
        generation_id: GenerationId::new(row.try_get("generation_id").map_err(decode)?),
        version_number: row.try_get("version_number").map_err(decode)?,
        content: row.try_get("content").map_err(decode)?,
        edit_history: EditHistory::from_entries(edit_history.into_entries()),
        ai_generated: row.try_get("ai_generated").map_err(decode)?,
        last_edited_at,
        last_edited_by: last_edited_by.map(UserId::from_uuid),
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn ledger_error(err: StoreError) -> LedgerError {
    match err {
        StoreError::UserNotFound | StoreError::NotFound(_) => LedgerError::UserNotFound,
        StoreError::InsufficientCredit => LedgerError::InsufficientCredit,
        StoreError::Conflict(msg) | StoreError::Storage(msg) => LedgerError::Storage(msg),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {}", operation)),
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row not found in {}", operation)),
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
