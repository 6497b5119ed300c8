//! SQLite backend.
//!
//! Three tables:
//! - `chat_sessions`
//! - `content_blocks`: the append-only conversation log, unique on
//!   `(chat_session_id, sequence_number)`
//! - `agent_actions`: one row per executed tool call
//!
//! Block sequence numbers are computed inside the INSERT itself, so two
//! writers can never claim the same number.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opencodex_core::error::StorageError;
use opencodex_core::session::{
    ActionMetadata, ActionOutput, ActionStatus, AgentAction, BlockContent, ChatSession,
    ContentBlock, NewAgentAction,
};
use opencodex_core::store::SessionStore;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// A SQLite-backed [`SessionStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `url`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::Backend(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite session store initialized at {url}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                id           TEXT PRIMARY KEY NOT NULL,
                project_id   TEXT NOT NULL,
                name         TEXT NOT NULL,
                environment  TEXT,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("chat_sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_blocks (
                id               TEXT PRIMARY KEY NOT NULL,
                chat_session_id  TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                sequence_number  INTEGER NOT NULL,
                kind             TEXT NOT NULL,
                content          TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                UNIQUE (chat_session_id, sequence_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("content_blocks table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_actions (
                iid              INTEGER PRIMARY KEY AUTOINCREMENT,
                id               TEXT UNIQUE NOT NULL,
                chat_session_id  TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                turn_id          TEXT NOT NULL,
                action_type      TEXT NOT NULL,
                action_input     TEXT NOT NULL,
                action_output    TEXT,
                action_metadata  TEXT,
                status           TEXT NOT NULL,
                step             INTEGER NOT NULL,
                created_at       TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("agent_actions table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_agent_actions_session ON agent_actions(chat_session_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("agent_actions index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, StorageError>
    where
        T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        row.try_get(name)
            .map_err(|e| StorageError::QueryFailed(format!("{name} column: {e}")))
    }

    fn parse_time(s: &str) -> Result<DateTime<Utc>, StorageError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::Corrupt(format!("timestamp '{s}': {e}")))
    }

    fn parse_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, StorageError> {
        serde_json::from_str(s).map_err(|e| StorageError::Corrupt(format!("{what}: {e}")))
    }

    fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, StorageError> {
        serde_json::to_string(value)
            .map_err(|e| StorageError::Backend(format!("{what} serialization: {e}")))
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<ChatSession, StorageError> {
        let environment: Option<String> = Self::column(row, "environment")?;
        Ok(ChatSession {
            id: Self::column(row, "id")?,
            project_id: Self::column(row, "project_id")?,
            name: Self::column(row, "name")?,
            environment: environment
                .map(|e| Self::parse_json(&e, "environment"))
                .transpose()?,
            created_at: Self::parse_time(&Self::column::<String>(row, "created_at")?)?,
            updated_at: Self::parse_time(&Self::column::<String>(row, "updated_at")?)?,
        })
    }

    fn row_to_block(row: &sqlx::sqlite::SqliteRow) -> Result<ContentBlock, StorageError> {
        Ok(ContentBlock {
            id: Self::column(row, "id")?,
            chat_session_id: Self::column(row, "chat_session_id")?,
            sequence_number: Self::column(row, "sequence_number")?,
            content: Self::parse_json(&Self::column::<String>(row, "content")?, "block content")?,
            created_at: Self::parse_time(&Self::column::<String>(row, "created_at")?)?,
        })
    }

    fn row_to_action(row: &sqlx::sqlite::SqliteRow) -> Result<AgentAction, StorageError> {
        let output: Option<String> = Self::column(row, "action_output")?;
        let metadata: Option<String> = Self::column(row, "action_metadata")?;
        let status: String = Self::column(row, "status")?;
        let step: i64 = Self::column(row, "step")?;

        Ok(AgentAction {
            id: Self::column(row, "id")?,
            chat_session_id: Self::column(row, "chat_session_id")?,
            turn_id: Self::column(row, "turn_id")?,
            action_type: Self::column(row, "action_type")?,
            action_input: Self::parse_json(
                &Self::column::<String>(row, "action_input")?,
                "action_input",
            )?,
            action_output: output
                .map(|o| Self::parse_json::<ActionOutput>(&o, "action_output"))
                .transpose()?,
            action_metadata: metadata
                .map(|m| Self::parse_json::<ActionMetadata>(&m, "action_metadata"))
                .transpose()?,
            status: ActionStatus::parse(&status)
                .ok_or_else(|| StorageError::Corrupt(format!("unknown action status '{status}'")))?,
            step: u32::try_from(step)
                .map_err(|_| StorageError::Corrupt(format!("negative step {step}")))?,
            created_at: Self::parse_time(&Self::column::<String>(row, "created_at")?)?,
        })
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_session(&self, session: ChatSession) -> Result<ChatSession, StorageError> {
        let environment = session
            .environment
            .as_ref()
            .map(|e| Self::to_json(e, "environment"))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, project_id, name, environment, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&session.id)
        .bind(&session.project_id)
        .bind(&session.name)
        .bind(&environment)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("INSERT session failed: {e}")))?;

        debug!(session_id = %session.id, "Created chat session");
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, StorageError> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("get session: {e}")))?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn touch_session(&self, id: &str) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("UPDATE session failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn append_block(
        &self,
        session_id: &str,
        content: BlockContent,
    ) -> Result<ContentBlock, StorageError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let payload = Self::to_json(&content, "block content")?;

        // Zero rows selected when the session does not exist.
        let row = sqlx::query(
            r#"
            INSERT INTO content_blocks (id, chat_session_id, sequence_number, kind, content, created_at)
            SELECT ?1, s.id, COALESCE(MAX(b.sequence_number), 0) + 1, ?3, ?4, ?5
            FROM chat_sessions s
            LEFT JOIN content_blocks b ON b.chat_session_id = s.id
            WHERE s.id = ?2
            GROUP BY s.id
            RETURNING sequence_number
            "#,
        )
        .bind(&id)
        .bind(session_id)
        .bind(content.kind().as_str())
        .bind(&payload)
        .bind(created_at.to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("INSERT block failed: {e}")))?
        .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;

        let sequence_number: i64 = Self::column(&row, "sequence_number")?;
        debug!(session_id, sequence_number, kind = %content.kind(), "Appended content block");

        Ok(ContentBlock {
            id,
            chat_session_id: session_id.to_string(),
            sequence_number,
            content,
            created_at,
        })
    }

    async fn list_blocks(&self, session_id: &str) -> Result<Vec<ContentBlock>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM content_blocks WHERE chat_session_id = ?1 ORDER BY sequence_number ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("list blocks: {e}")))?;

        rows.iter().map(Self::row_to_block).collect()
    }

    async fn create_action(&self, action: NewAgentAction) -> Result<AgentAction, StorageError> {
        if self.get_session(&action.chat_session_id).await?.is_none() {
            return Err(StorageError::SessionNotFound(action.chat_session_id));
        }

        let action = AgentAction {
            id: Uuid::new_v4().to_string(),
            chat_session_id: action.chat_session_id,
            turn_id: action.turn_id,
            action_type: action.action_type,
            action_input: action.action_input,
            action_output: None,
            action_metadata: None,
            status: ActionStatus::Running,
            step: action.step,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO agent_actions
                (id, chat_session_id, turn_id, action_type, action_input, status, step, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&action.id)
        .bind(&action.chat_session_id)
        .bind(&action.turn_id)
        .bind(&action.action_type)
        .bind(Self::to_json(&action.action_input, "action_input")?)
        .bind(action.status.as_str())
        .bind(i64::from(action.step))
        .bind(action.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("INSERT action failed: {e}")))?;

        Ok(action)
    }

    async fn complete_action(
        &self,
        id: &str,
        success: bool,
        output: String,
        metadata: Option<ActionMetadata>,
    ) -> Result<AgentAction, StorageError> {
        let status = if success {
            ActionStatus::Success
        } else {
            ActionStatus::Failed
        };
        let output = ActionOutput {
            success,
            result: output,
        };
        let metadata = metadata
            .as_ref()
            .map(|m| Self::to_json(m, "action_metadata"))
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE agent_actions
            SET status = ?1, action_output = ?2, action_metadata = ?3
            WHERE id = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(Self::to_json(&output, "action_output")?)
        .bind(&metadata)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("UPDATE action failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ActionNotFound(id.to_string()));
        }

        self.get_action(id)
            .await?
            .ok_or_else(|| StorageError::ActionNotFound(id.to_string()))
    }

    async fn get_action(&self, id: &str) -> Result<Option<AgentAction>, StorageError> {
        let row = sqlx::query("SELECT * FROM agent_actions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("get action: {e}")))?;

        row.as_ref().map(Self::row_to_action).transpose()
    }

    async fn list_actions(&self, session_id: &str) -> Result<Vec<AgentAction>, StorageError> {
        let rows =
            sqlx::query("SELECT * FROM agent_actions WHERE chat_session_id = ?1 ORDER BY iid ASC")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(format!("list actions: {e}")))?;

        rows.iter().map(Self::row_to_action).collect()
    }
}
