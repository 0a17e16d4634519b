//! Postgres checkpoint store over `dispatch_saga_transitions`

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::persistence::{CheckpointStore, NewTransition, SagaTransition, CLUSTER_SCOPE};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn transition_from_row(row: PgRow) -> Result<SagaTransition> {
    Ok(SagaTransition {
        execution_id: row.try_get("execution_id")?,
        scope: row.try_get("scope")?,
        from_state: row.try_get("from_state")?,
        to_state: row.try_get("to_state")?,
        event: row.try_get("event")?,
        terminal: row.try_get("terminal")?,
        sort_key: row.try_get("sort_key")?,
        most_recent: row.try_get("most_recent")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn register_execution(&self, execution_id: Uuid, input: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dispatch_executions (execution_id, input)
            VALUES ($1, $2)
            ON CONFLICT (execution_id) DO NOTHING
            "#,
        )
        .bind(execution_id)
        .bind(input)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn execution_input(&self, execution_id: Uuid) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT input FROM dispatch_executions WHERE execution_id = $1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.try_get("input")).transpose()?)
    }

    async fn append(&self, transition: NewTransition) -> Result<SagaTransition> {
        let mut tx = self.pool.begin().await?;

        let next_key: i32 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(sort_key), 0) + 1
            FROM dispatch_saga_transitions
            WHERE execution_id = $1 AND scope = $2
            "#,
        )
        .bind(transition.execution_id)
        .bind(&transition.scope)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE dispatch_saga_transitions
            SET most_recent = false
            WHERE execution_id = $1 AND scope = $2 AND most_recent
            "#,
        )
        .bind(transition.execution_id)
        .bind(&transition.scope)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            INSERT INTO dispatch_saga_transitions
            (execution_id, scope, from_state, to_state, event, terminal, sort_key, most_recent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, true)
            RETURNING execution_id, scope, from_state, to_state, event, terminal,
                      sort_key, most_recent, created_at
            "#,
        )
        .bind(transition.execution_id)
        .bind(&transition.scope)
        .bind(&transition.from_state)
        .bind(&transition.to_state)
        .bind(&transition.event)
        .bind(transition.terminal)
        .bind(next_key)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        transition_from_row(row)
    }

    async fn resolve_current(
        &self,
        execution_id: Uuid,
        scope: &str,
    ) -> Result<Option<SagaTransition>> {
        let row = sqlx::query(
            r#"
            SELECT execution_id, scope, from_state, to_state, event, terminal,
                   sort_key, most_recent, created_at
            FROM dispatch_saga_transitions
            WHERE execution_id = $1 AND scope = $2 AND most_recent
            ORDER BY sort_key DESC
            LIMIT 1
            "#,
        )
        .bind(execution_id)
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;

        row.map(transition_from_row).transpose()
    }

    async fn transitions(&self, execution_id: Uuid, scope: &str) -> Result<Vec<SagaTransition>> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, scope, from_state, to_state, event, terminal,
                   sort_key, most_recent, created_at
            FROM dispatch_saga_transitions
            WHERE execution_id = $1 AND scope = $2
            ORDER BY sort_key
            "#,
        )
        .bind(execution_id)
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }

    async fn incomplete_executions(&self) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT e.execution_id
            FROM dispatch_executions e
            LEFT JOIN dispatch_saga_transitions t
              ON t.execution_id = e.execution_id
             AND t.scope = $1
             AND t.most_recent
            WHERE t.id IS NULL OR NOT t.terminal
            ORDER BY e.created_at
            "#,
        )
        .bind(CLUSTER_SCOPE)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
