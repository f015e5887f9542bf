//! Persistence for threads and messages.
//!
//! The resolver and the renderer only talk to the [`Persistence`] trait.
//! Two implementations ship with the crate:
//!
//! - **`postgres`**: [`PgStore`], backed by a `sqlx` connection pool and the
//!   schema in `migrations/`.
//! - **`memory`**: [`MemoryStore`], a mutex-guarded set of maps used by the
//!   dry-run mode of the ingest binary and by tests.
//!
//! Both enforce the same constraints: `message_id` is unique across messages,
//! `first_message_id` is unique across threads, and a message must point at an
//! existing thread. Violations of the first two surface as
//! [`StoreError::Conflict`].

use chrono::{DateTime, Utc};
use std::future::Future;

use crate::error::StoreError;
use crate::models::{Message, NewMessage, NewThread, Thread, ThreadStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Unique constraint guarding `messages.message_id`.
pub const MESSAGE_ID_CONSTRAINT: &str = "messages_message_id_key";
/// Unique constraint guarding `threads.first_message_id`.
pub const THREAD_ROOT_CONSTRAINT: &str = "threads_first_message_id_key";

pub trait Persistence: Sync {
    fn find_message_by_id(
        &self,
        message_id: &str,
    ) -> impl Future<Output = Result<Option<Message>, StoreError>> + Send;

    fn find_thread_by_root_id(
        &self,
        first_message_id: &str,
    ) -> impl Future<Output = Result<Option<Thread>, StoreError>> + Send;

    fn find_thread_by_id(
        &self,
        thread_id: i32,
    ) -> impl Future<Output = Result<Option<Thread>, StoreError>> + Send;

    /// Insert a message. Fails with a conflict if `message_id` exists.
    fn insert_message(
        &self,
        message: NewMessage,
    ) -> impl Future<Output = Result<Message, StoreError>> + Send;

    /// Insert a thread. Fails with a conflict if `first_message_id` exists.
    fn insert_thread(
        &self,
        thread: NewThread,
    ) -> impl Future<Output = Result<Thread, StoreError>> + Send;

    /// Insert a thread together with its first message, all or nothing.
    ///
    /// `message.thread_id` is replaced by the new thread's id. A conflict on
    /// either unique constraint leaves both tables untouched; the thread's
    /// constraint is checked first.
    fn insert_thread_with_message(
        &self,
        thread: NewThread,
        message: NewMessage,
    ) -> impl Future<Output = Result<(Thread, Message), StoreError>> + Send;

    /// Move `updated_at` forward to `at`. Never moves it backwards.
    fn touch_thread_updated_at(
        &self,
        thread_id: i32,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// All messages of a thread in insertion order.
    fn list_messages_for_thread(
        &self,
        thread_id: i32,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Set the status and bump `updated_at` to now.
    fn set_thread_status(
        &self,
        thread_id: i32,
        status: ThreadStatus,
    ) -> impl Future<Output = Result<Thread, StoreError>> + Send;
}
