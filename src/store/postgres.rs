//! PostgreSQL store backed by a `sqlx` pool.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::Persistence;
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::{Message, NewMessage, NewThread, Thread, ThreadStatus};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const MESSAGE_COLUMNS: &str = "id, message_id, in_reply_to, thread_id, from_email, from_name, \
     subject, date, body, is_patch, patch_content, raw_email";

const THREAD_COLUMNS: &str = "id, subject, first_message_id, created_at, updated_at, is_patch, status";

/// Row shape of `threads`; `status` is stored as text.
#[derive(Debug, FromRow)]
struct ThreadRow {
    id: i32,
    subject: String,
    first_message_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    is_patch: bool,
    status: String,
}

impl TryFrom<ThreadRow> for Thread {
    type Error = StoreError;

    fn try_from(row: ThreadRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<ThreadStatus>().map_err(StoreError::InvalidStatus)?;
        Ok(Thread {
            id: row.id,
            subject: row.subject,
            first_message_id: row.first_message_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            is_patch: row.is_patch,
            status,
        })
    }
}

async fn insert_thread_row<'e, E>(executor: E, thread: &NewThread) -> Result<Thread, StoreError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, ThreadRow>(&format!(
        r#"INSERT INTO threads (subject, first_message_id, created_at, updated_at, is_patch, status)
           VALUES ($1, $2, $3, $4, $5, $6)
           RETURNING {THREAD_COLUMNS}"#
    ))
    .bind(&thread.subject)
    .bind(&thread.first_message_id)
    .bind(thread.created_at)
    .bind(thread.updated_at)
    .bind(thread.is_patch)
    .bind(thread.status.as_str())
    .fetch_one(executor)
    .await?;

    log::trace!("created thread {} for root {}", row.id, row.first_message_id);
    Thread::try_from(row)
}

async fn insert_message_row<'e, E>(executor: E, message: &NewMessage) -> Result<Message, StoreError>
where
    E: PgExecutor<'e>,
{
    let stored = sqlx::query_as::<_, Message>(&format!(
        r#"INSERT INTO messages (
               message_id, in_reply_to, thread_id, from_email, from_name,
               subject, date, body, is_patch, patch_content, raw_email
           )
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
           RETURNING {MESSAGE_COLUMNS}"#
    ))
    .bind(&message.message_id)
    .bind(&message.in_reply_to)
    .bind(message.thread_id)
    .bind(&message.from_email)
    .bind(&message.from_name)
    .bind(&message.subject)
    .bind(message.date)
    .bind(&message.body)
    .bind(message.is_patch)
    .bind(&message.patch_content)
    .bind(&message.raw_email)
    .fetch_one(executor)
    .await
    .map_err(|err| match &err {
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            StoreError::ThreadNotFound(message.thread_id)
        }
        _ => StoreError::from(err),
    })?;

    log::trace!("inserted message {} into thread {}", stored.message_id, stored.thread_id);
    Ok(stored)
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        log::info!(
            "connected to database (max_connections={})",
            config.max_connections
        );
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        log::info!("database migrations applied");
        Ok(())
    }

    /// Delete a thread; its messages go with it via `ON DELETE CASCADE`.
    pub async fn delete_thread(&self, thread_id: i32) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM threads WHERE id = $1")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

impl Persistence for PgStore {
    async fn find_message_by_id(&self, message_id: &str) -> Result<Option<Message>, StoreError> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = $1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(message)
    }

    async fn find_thread_by_root_id(
        &self,
        first_message_id: &str,
    ) -> Result<Option<Thread>, StoreError> {
        let row = sqlx::query_as::<_, ThreadRow>(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads WHERE first_message_id = $1"
        ))
        .bind(first_message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Thread::try_from).transpose()
    }

    async fn find_thread_by_id(&self, thread_id: i32) -> Result<Option<Thread>, StoreError> {
        let row = sqlx::query_as::<_, ThreadRow>(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads WHERE id = $1"
        ))
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Thread::try_from).transpose()
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        insert_message_row(&self.pool, &message).await
    }

    async fn insert_thread(&self, thread: NewThread) -> Result<Thread, StoreError> {
        insert_thread_row(&self.pool, &thread).await
    }

    async fn insert_thread_with_message(
        &self,
        thread: NewThread,
        mut message: NewMessage,
    ) -> Result<(Thread, Message), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Dropping `tx` on an early return rolls both inserts back
        let thread = insert_thread_row(&mut *tx, &thread).await?;
        message.thread_id = thread.id;
        let message = insert_message_row(&mut *tx, &message).await?;

        tx.commit().await?;
        Ok((thread, message))
    }

    async fn touch_thread_updated_at(
        &self,
        thread_id: i32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE threads SET updated_at = GREATEST(updated_at, $2) WHERE id = $1",
        )
        .bind(thread_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ThreadNotFound(thread_id));
        }
        Ok(())
    }

    async fn list_messages_for_thread(&self, thread_id: i32) -> Result<Vec<Message>, StoreError> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE thread_id = $1 ORDER BY id"
        ))
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    async fn set_thread_status(
        &self,
        thread_id: i32,
        status: ThreadStatus,
    ) -> Result<Thread, StoreError> {
        let row = sqlx::query_as::<_, ThreadRow>(&format!(
            r#"UPDATE threads SET status = $2, updated_at = NOW()
               WHERE id = $1
               RETURNING {THREAD_COLUMNS}"#
        ))
        .bind(thread_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::ThreadNotFound(thread_id))?;

        log::debug!("thread {} marked {}", thread_id, status);
        Thread::try_from(row)
    }
}
