//! In-process store.
//!
//! Holds every table in one `parking_lot::Mutex`. No lock is held across an
//! await point; each operation completes synchronously inside its future.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::{MESSAGE_ID_CONSTRAINT, Persistence, THREAD_ROOT_CONSTRAINT};
use crate::error::StoreError;
use crate::models::{Message, NewMessage, NewThread, Thread, ThreadStatus};

#[derive(Debug)]
struct Tables {
    threads: BTreeMap<i32, Thread>,
    messages: BTreeMap<i32, Message>,
    thread_by_root: HashMap<String, i32>,
    message_by_id: HashMap<String, i32>,
    next_thread_id: i32,
    next_message_id: i32,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            threads: BTreeMap::new(),
            messages: BTreeMap::new(),
            thread_by_root: HashMap::new(),
            message_by_id: HashMap::new(),
            next_thread_id: 1,
            next_message_id: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_count(&self) -> usize {
        self.tables.lock().threads.len()
    }

    pub fn message_count(&self) -> usize {
        self.tables.lock().messages.len()
    }

    /// Snapshot of all threads ordered by id.
    pub fn threads(&self) -> Vec<Thread> {
        self.tables.lock().threads.values().cloned().collect()
    }

    /// Delete a thread and, by cascade, its messages.
    pub fn delete_thread(&self, thread_id: i32) -> bool {
        let mut tables = self.tables.lock();
        let Some(thread) = tables.threads.remove(&thread_id) else {
            return false;
        };
        tables.thread_by_root.remove(&thread.first_message_id);

        let doomed: Vec<i32> = tables
            .messages
            .values()
            .filter(|m| m.thread_id == thread_id)
            .map(|m| m.id)
            .collect();
        for id in doomed {
            if let Some(message) = tables.messages.remove(&id) {
                tables.message_by_id.remove(&message.message_id);
            }
        }
        true
    }
}

impl Persistence for MemoryStore {
    async fn find_message_by_id(&self, message_id: &str) -> Result<Option<Message>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .message_by_id
            .get(message_id)
            .and_then(|id| tables.messages.get(id))
            .cloned())
    }

    async fn find_thread_by_root_id(
        &self,
        first_message_id: &str,
    ) -> Result<Option<Thread>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .thread_by_root
            .get(first_message_id)
            .and_then(|id| tables.threads.get(id))
            .cloned())
    }

    async fn find_thread_by_id(&self, thread_id: i32) -> Result<Option<Thread>, StoreError> {
        Ok(self.tables.lock().threads.get(&thread_id).cloned())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tables = self.tables.lock();
        if tables.message_by_id.contains_key(&message.message_id) {
            return Err(StoreError::conflict(MESSAGE_ID_CONSTRAINT));
        }
        if !tables.threads.contains_key(&message.thread_id) {
            return Err(StoreError::ThreadNotFound(message.thread_id));
        }

        let id = tables.next_message_id;
        tables.next_message_id += 1;
        tables.message_by_id.insert(message.message_id.clone(), id);
        let message = message.into_message(id);
        tables.messages.insert(id, message.clone());
        Ok(message)
    }

    async fn insert_thread(&self, thread: NewThread) -> Result<Thread, StoreError> {
        let mut tables = self.tables.lock();
        if tables.thread_by_root.contains_key(&thread.first_message_id) {
            return Err(StoreError::conflict(THREAD_ROOT_CONSTRAINT));
        }

        let id = tables.next_thread_id;
        tables.next_thread_id += 1;
        tables.thread_by_root.insert(thread.first_message_id.clone(), id);
        let thread = thread.into_thread(id);
        tables.threads.insert(id, thread.clone());
        Ok(thread)
    }

    async fn insert_thread_with_message(
        &self,
        thread: NewThread,
        mut message: NewMessage,
    ) -> Result<(Thread, Message), StoreError> {
        let mut tables = self.tables.lock();
        if tables.thread_by_root.contains_key(&thread.first_message_id) {
            return Err(StoreError::conflict(THREAD_ROOT_CONSTRAINT));
        }
        if tables.message_by_id.contains_key(&message.message_id) {
            return Err(StoreError::conflict(MESSAGE_ID_CONSTRAINT));
        }

        let thread_id = tables.next_thread_id;
        tables.next_thread_id += 1;
        tables.thread_by_root.insert(thread.first_message_id.clone(), thread_id);
        let thread = thread.into_thread(thread_id);
        tables.threads.insert(thread_id, thread.clone());

        let message_id = tables.next_message_id;
        tables.next_message_id += 1;
        message.thread_id = thread_id;
        tables.message_by_id.insert(message.message_id.clone(), message_id);
        let message = message.into_message(message_id);
        tables.messages.insert(message_id, message.clone());

        Ok((thread, message))
    }

    async fn touch_thread_updated_at(
        &self,
        thread_id: i32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let thread = tables
            .threads
            .get_mut(&thread_id)
            .ok_or(StoreError::ThreadNotFound(thread_id))?;
        if at > thread.updated_at {
            thread.updated_at = at;
        }
        Ok(())
    }

    async fn list_messages_for_thread(&self, thread_id: i32) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .tables
            .lock()
            .messages
            .values()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect())
    }

    async fn set_thread_status(
        &self,
        thread_id: i32,
        status: ThreadStatus,
    ) -> Result<Thread, StoreError> {
        let mut tables = self.tables.lock();
        let thread = tables
            .threads
            .get_mut(&thread_id)
            .ok_or(StoreError::ThreadNotFound(thread_id))?;
        thread.status = status;
        thread.updated_at = Utc::now();
        Ok(thread.clone())
    }
}
