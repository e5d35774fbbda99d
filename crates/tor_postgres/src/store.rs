//! Postgres implementations of the tor_core port traits.
//!
//! Each adapter is a newtype wrapping PgPool.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use tor_core::document::{NewTorDocument, Precondition, TorContent, TorDocument};
use tor_core::engine::TransitionCommit;
use tor_core::error::TorError;
use tor_core::history::{ApprovalHistoryEntry, NewHistoryEntry};
use tor_core::org::{OrganizationalUnit, Position, UserRecord};
use tor_core::ports::{DirectoryStore, DocumentStore, HistoryStore, WorkflowStore};
use tor_core::types::{PositionId, TorId, UnitId, UserId, WorkflowId};
use tor_core::workflow::{WorkflowRecord, WorkflowStep};

use crate::error::{db_err, row_err};
use crate::rows::{HistoryRow, PositionRow, StepRow, TorRow, UnitRow, UserRow, WorkflowRow};

type Result<T> = std::result::Result<T, TorError>;

const TOR_COLUMNS: &str = r#"
    id, number, title, description, introduction, background, objective, scope,
    details, unit_id, creator_user_id, status_stage, current_step_number,
    is_final_approved, revision, created_at, updated_at
"#;

const HISTORY_COLUMNS: &str = r#"
    id, tor_id, step_number, action, from_status_stage, to_status_stage,
    acted_by_user_id, acted_by_name_snapshot, acted_by_position_snapshot,
    note, acted_at
"#;

const USER_COLUMNS: &str = "id, name, email, position_id, is_active, is_super_admin";

/// JSONB column is NOT NULL; absent details are stored as an empty object.
fn details_json(content: &TorContent) -> serde_json::Value {
    match &content.details {
        serde_json::Value::Null => serde_json::json!({}),
        v => v.clone(),
    }
}

fn to_doc(row: TorRow) -> Result<TorDocument> {
    row.try_into().map_err(row_err)
}

fn to_entry(row: HistoryRow) -> Result<ApprovalHistoryEntry> {
    row.try_into().map_err(row_err)
}

// ── PgDirectoryStore ──────────────────────────────────────────

pub struct PgDirectoryStore {
    pool: PgPool,
}

impl PgDirectoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DirectoryStore for PgDirectoryStore {
    async fn load_user(&self, id: UserId) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn load_position(&self, id: PositionId) -> Result<Option<Position>> {
        let row = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT p.id, p.name, p.code, p.unit_id, p.level_order, p.is_active,
                   COALESCE(
                       array_agg(pc.tag ORDER BY pc.tag) FILTER (WHERE pc.tag IS NOT NULL),
                       ARRAY[]::text[]
                   ) AS capabilities
            FROM positions p
            LEFT JOIN position_capabilities pc ON pc.position_id = p.id
            WHERE p.id = $1
            GROUP BY p.id
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn load_unit(&self, id: UnitId) -> Result<Option<OrganizationalUnit>> {
        let row = sqlx::query_as::<_, UnitRow>(
            "SELECT id, code, name, is_active FROM organizational_units WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    async fn first_active_holder(&self, position: PositionId) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE position_id = $1 AND is_active
            ORDER BY id
            LIMIT 1
            "#
        ))
        .bind(position.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }
}

// ── PgWorkflowStore ───────────────────────────────────────────

pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn load_workflow_for_unit(&self, unit: UnitId) -> Result<Option<WorkflowRecord>> {
        let Some(wf) = sqlx::query_as::<_, WorkflowRow>(
            "SELECT id, unit_id, name, is_active FROM workflows WHERE unit_id = $1",
        )
        .bind(unit.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT step_number, label, position_id, status_stage, can_revise, is_last_step
            FROM workflow_steps
            WHERE workflow_id = $1
            ORDER BY step_number
            "#,
        )
        .bind(wf.id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let steps = rows
            .into_iter()
            .map(WorkflowStep::try_from)
            .collect::<std::result::Result<Vec<_>, String>>()
            .map_err(row_err)?;

        Ok(Some(WorkflowRecord {
            id: WorkflowId(wf.id),
            unit_id: UnitId(wf.unit_id),
            name: wf.name,
            is_active: wf.is_active,
            steps,
        }))
    }
}

// ── PgDocumentStore ───────────────────────────────────────────

pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// After a guarded update matched nothing: gone, or changed underneath us.
    async fn stale_or_missing(&self, id: TorId) -> TorError {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM tors WHERE id = $1)")
                .bind(id.0)
                .fetch_one(&self.pool)
                .await;
        match exists {
            Ok(true) => TorError::ConcurrentModification,
            Ok(false) => TorError::NotFound(format!("tor {id}")),
            Err(e) => db_err(e),
        }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert_document(&self, doc: NewTorDocument) -> Result<TorDocument> {
        let c = &doc.content;
        let row = sqlx::query_as::<_, TorRow>(&format!(
            r#"
            INSERT INTO tors (
                number, title, description, introduction, background, objective,
                scope, details, unit_id, creator_user_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING {TOR_COLUMNS}
            "#
        ))
        .bind(&doc.number)
        .bind(&c.title)
        .bind(&c.description)
        .bind(&c.introduction)
        .bind(&c.background)
        .bind(&c.objective)
        .bind(&c.scope)
        .bind(details_json(c))
        .bind(doc.unit_id.0)
        .bind(doc.creator_user_id.0)
        .bind(doc.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        to_doc(row)
    }

    async fn load_document(&self, id: TorId) -> Result<Option<TorDocument>> {
        let row = sqlx::query_as::<_, TorRow>(&format!(
            "SELECT {TOR_COLUMNS} FROM tors WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(to_doc).transpose()
    }

    async fn list_by_creator(&self, creator: Option<UserId>) -> Result<Vec<TorDocument>> {
        let rows = sqlx::query_as::<_, TorRow>(&format!(
            r#"
            SELECT {TOR_COLUMNS} FROM tors
            WHERE $1::bigint IS NULL OR creator_user_id = $1
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(creator.map(|c| c.0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(to_doc).collect()
    }

    async fn list_awaiting_position(&self, position: PositionId) -> Result<Vec<TorDocument>> {
        let rows = sqlx::query_as::<_, TorRow>(&format!(
            r#"
            SELECT {TOR_COLUMNS} FROM tors t
            WHERE t.status_stage LIKE 'APPROVAL_%'
              AND NOT t.is_final_approved
              AND EXISTS (
                  SELECT 1
                  FROM workflows w
                  JOIN workflow_steps s ON s.workflow_id = w.id
                  WHERE w.unit_id = t.unit_id
                    AND w.is_active
                    AND s.step_number = t.current_step_number
                    AND s.position_id = $1
              )
            ORDER BY t.updated_at DESC, t.id DESC
            "#
        ))
        .bind(position.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(to_doc).collect()
    }

    async fn update_content(
        &self,
        id: TorId,
        expected: &Precondition,
        content: &TorContent,
    ) -> Result<TorDocument> {
        let row = sqlx::query_as::<_, TorRow>(&format!(
            r#"
            UPDATE tors
            SET title = $2, description = $3, introduction = $4, background = $5,
                objective = $6, scope = $7, details = $8, updated_at = now(),
                revision = revision + 1
            WHERE id = $1
              AND status_stage = $9
              AND current_step_number = $10
              AND is_final_approved = $11
              AND revision = $12
            RETURNING {TOR_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(&content.title)
        .bind(&content.description)
        .bind(&content.introduction)
        .bind(&content.background)
        .bind(&content.objective)
        .bind(&content.scope)
        .bind(details_json(content))
        .bind(expected.state.status_stage.as_str())
        .bind(expected.state.current_step_number)
        .bind(expected.state.is_final_approved)
        .bind(expected.revision)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => to_doc(row),
            None => Err(self.stale_or_missing(id).await),
        }
    }

    async fn commit_transition(
        &self,
        id: TorId,
        expected: &Precondition,
        commit: &TransitionCommit,
    ) -> Result<(TorDocument, ApprovalHistoryEntry)> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let updated = sqlx::query_as::<_, TorRow>(&format!(
            r#"
            UPDATE tors
            SET status_stage = $2,
                current_step_number = $3,
                is_final_approved = $4,
                number = COALESCE($5, number),
                updated_at = $6,
                revision = revision + 1
            WHERE id = $1
              AND status_stage = $7
              AND current_step_number = $8
              AND is_final_approved = $9
              AND revision = $10
            RETURNING {TOR_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(commit.next.status_stage.as_str())
        .bind(commit.next.current_step_number)
        .bind(commit.next.is_final_approved)
        .bind(&commit.number)
        .bind(commit.entry.acted_at)
        .bind(expected.state.status_stage.as_str())
        .bind(expected.state.current_step_number)
        .bind(expected.state.is_final_approved)
        .bind(expected.revision)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(updated) = updated else {
            tx.rollback().await.map_err(db_err)?;
            debug!(tor_id = id.0, "guarded transition update matched no row");
            return Err(self.stale_or_missing(id).await);
        };

        let entry = insert_history(&mut tx, &commit.entry).await?;
        tx.commit().await.map_err(db_err)?;

        Ok((to_doc(updated)?, entry))
    }
}

async fn insert_history(
    conn: &mut PgConnection,
    entry: &NewHistoryEntry,
) -> Result<ApprovalHistoryEntry> {
    let row = sqlx::query_as::<_, HistoryRow>(&format!(
        r#"
        INSERT INTO tor_approval_history (
            tor_id, step_number, action, from_status_stage, to_status_stage,
            acted_by_user_id, acted_by_name_snapshot, acted_by_position_snapshot,
            note, acted_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {HISTORY_COLUMNS}
        "#
    ))
    .bind(entry.tor_id.0)
    .bind(entry.step_number)
    .bind(entry.action.as_str())
    .bind(entry.from_status_stage.as_str())
    .bind(entry.to_status_stage.as_str())
    .bind(entry.acted_by_user_id.0)
    .bind(&entry.acted_by_name_snapshot)
    .bind(&entry.acted_by_position_snapshot)
    .bind(&entry.note)
    .bind(entry.acted_at)
    .fetch_one(conn)
    .await
    .map_err(db_err)?;
    to_entry(row)
}

// ── PgHistoryStore ────────────────────────────────────────────

pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn append(&self, entry: &NewHistoryEntry) -> Result<ApprovalHistoryEntry> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        insert_history(&mut conn, entry).await.map_err(|e| match e {
            // tor_id foreign key
            TorError::Conflict(_) => TorError::NotFound(format!("tor {}", entry.tor_id)),
            other => other,
        })
    }

    async fn list_for(&self, tor: TorId) -> Result<Vec<ApprovalHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM tor_approval_history WHERE tor_id = $1 ORDER BY id"
        ))
        .bind(tor.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(to_entry).collect()
    }
}
