//! Deduplication and thread resolution.
//!
//! Decides which thread a parsed message belongs to, creating or repairing the
//! thread when needed, and stores the message.
//!
//! # Resolution Order
//!
//! 1. **Dedup**: a stored message with the same id short-circuits everything.
//! 2. **Root lookup**: the thread whose `first_message_id` equals the
//!    message's claimed root (`References[0]`, else `In-Reply-To`, else itself).
//! 3. **Repair** (archive mode only) when the claimed root has no thread:
//!    - the claimed root is stored as a message: join its thread
//!    - the `In-Reply-To` target is stored: join its thread
//!    - otherwise start a new thread rooted at the message itself and warn
//! 4. **Create**: a new thread rooted at the claimed root.
//!
//! A new thread and its first message are written in one store call, so a
//! failed write never leaves an empty thread behind. Two writers racing on
//! the same root are settled by the store's unique constraints: the loser
//! joins the winner's thread (or reports the message as a duplicate).

use crate::config::{PatchHeuristic, ResolverConfig};
use crate::error::{IngestError, StoreError};
use crate::models::{Message, NewMessage, NewThread, Thread, ThreadStatus};
use crate::store::{MESSAGE_ID_CONSTRAINT, Persistence, THREAD_ROOT_CONSTRAINT};
use crate::sync::parser::ParsedMessage;
use crate::sync::patch::subject_mentions_patch;

/// How a message whose claimed root was missing got anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    /// The claimed root was stored as a message; joined its thread.
    RootMessage,
    /// The `In-Reply-To` target was stored; joined its thread.
    InReplyTo,
    /// Nothing to attach to; started a thread rooted at the message itself.
    FallbackRoot,
}

/// Result of ingesting one message.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// The stored message, `None` for duplicates.
    pub message: Option<Message>,
    pub thread_id: i32,
    pub was_duplicate: bool,
    pub thread_created: bool,
    pub repair: Option<Repair>,
    pub warnings: Vec<String>,
}

impl IngestOutcome {
    fn duplicate(thread_id: i32) -> Self {
        Self {
            message: None,
            thread_id,
            was_duplicate: true,
            thread_created: false,
            repair: None,
            warnings: Vec::new(),
        }
    }
}

/// Thread a message belongs in, decided before anything is written.
enum Target {
    Existing(Thread),
    /// No thread yet; it is created together with the message.
    Create(NewThread),
}

struct Resolution {
    target: Target,
    repair: Option<Repair>,
    warnings: Vec<String>,
}

impl Resolution {
    fn plain(target: Target) -> Self {
        Self {
            target,
            repair: None,
            warnings: Vec::new(),
        }
    }

    fn repaired(target: Target, repair: Repair) -> Self {
        Self {
            target,
            repair: Some(repair),
            warnings: Vec::new(),
        }
    }
}

/// Decide the thread `is_patch` flag for a thread started by `parsed`.
pub fn thread_is_patch(parsed: &ParsedMessage, heuristic: PatchHeuristic) -> bool {
    let by_subject = subject_mentions_patch(&parsed.subject);
    match heuristic {
        PatchHeuristic::SubjectKeyword => by_subject,
        PatchHeuristic::ParserFlag => parsed.is_patch,
        PatchHeuristic::Either => by_subject || parsed.is_patch,
    }
}

pub struct ThreadResolver<'a, S: Persistence> {
    store: &'a S,
    config: ResolverConfig,
}

impl<'a, S: Persistence> ThreadResolver<'a, S> {
    pub fn new(store: &'a S, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    /// Resolve the thread for `parsed` and store it.
    ///
    /// Writes at most one thread row and one message row; a new thread and
    /// its first message are written together or not at all. Re-ingesting a
    /// message that is already stored writes nothing.
    pub async fn resolve_and_ingest(
        &self,
        parsed: &ParsedMessage,
    ) -> Result<IngestOutcome, IngestError> {
        if !parsed.has_usable_id() {
            return Err(IngestError::MissingMessageId);
        }
        let message_id = parsed.message_id.as_str();
        let store_err = |source: StoreError| IngestError::Store {
            message_id: message_id.to_string(),
            source,
        };

        if let Some(existing) = self
            .store
            .find_message_by_id(message_id)
            .await
            .map_err(store_err)?
        {
            log::debug!("skipping duplicate message {}", message_id);
            return Ok(IngestOutcome::duplicate(existing.thread_id));
        }

        let Resolution {
            target,
            repair,
            warnings,
        } = self.resolve_thread(parsed).await.map_err(store_err)?;

        let thread = match target {
            Target::Existing(thread) => thread,
            Target::Create(new_thread) => {
                let root_id = new_thread.first_message_id.clone();
                match self
                    .store
                    .insert_thread_with_message(new_thread, NewMessage::from_parsed(parsed, 0))
                    .await
                {
                    Ok((thread, stored)) => {
                        log::debug!("stored message {} in thread {} (new)", message_id, thread.id);
                        return Ok(IngestOutcome {
                            thread_id: thread.id,
                            message: Some(stored),
                            was_duplicate: false,
                            thread_created: true,
                            repair,
                            warnings,
                        });
                    }
                    Err(StoreError::Conflict { constraint }) if constraint == THREAD_ROOT_CONSTRAINT => {
                        // Another writer created the thread first; join it
                        log::debug!("thread for root {} created concurrently", root_id);
                        self.store
                            .find_thread_by_root_id(&root_id)
                            .await
                            .map_err(store_err)?
                            .ok_or_else(|| store_err(StoreError::Conflict { constraint }))?
                    }
                    Err(StoreError::Conflict { .. }) => {
                        return self.concurrent_duplicate(message_id).await.map_err(store_err);
                    }
                    Err(e) => return Err(store_err(e)),
                }
            }
        };

        let stored = match self
            .store
            .insert_message(NewMessage::from_parsed(parsed, thread.id))
            .await
        {
            Ok(message) => message,
            Err(StoreError::Conflict { .. }) => {
                return self.concurrent_duplicate(message_id).await.map_err(store_err);
            }
            Err(e) => return Err(store_err(e)),
        };

        if stored.date > thread.updated_at {
            self.store
                .touch_thread_updated_at(thread.id, stored.date)
                .await
                .map_err(store_err)?;
        }

        log::debug!("stored message {} in thread {}", message_id, thread.id);

        Ok(IngestOutcome {
            thread_id: thread.id,
            message: Some(stored),
            was_duplicate: false,
            thread_created: false,
            repair,
            warnings,
        })
    }

    /// Another writer stored `message_id` between the dedup check and the insert.
    async fn concurrent_duplicate(&self, message_id: &str) -> Result<IngestOutcome, StoreError> {
        log::debug!("message {} inserted concurrently, treating as duplicate", message_id);
        match self.store.find_message_by_id(message_id).await? {
            Some(existing) => Ok(IngestOutcome::duplicate(existing.thread_id)),
            None => Err(StoreError::conflict(MESSAGE_ID_CONSTRAINT)),
        }
    }

    async fn resolve_thread(&self, parsed: &ParsedMessage) -> Result<Resolution, StoreError> {
        let root_id = parsed.thread_root_id();

        if let Some(thread) = self.store.find_thread_by_root_id(root_id).await? {
            return Ok(Resolution::plain(Target::Existing(thread)));
        }

        if !self.config.repair_missing_roots || root_id == parsed.message_id {
            return Ok(Resolution::plain(Target::Create(self.new_thread(parsed, root_id))));
        }

        if let Some(thread) = self.thread_of_message(root_id).await? {
            log::debug!(
                "message {}: root {} has no thread of its own, joining thread {}",
                parsed.message_id,
                root_id,
                thread.id
            );
            return Ok(Resolution::repaired(Target::Existing(thread), Repair::RootMessage));
        }

        if let Some(parent_id) = parsed.in_reply_to.as_deref() {
            if let Some(thread) = self.thread_of_message(parent_id).await? {
                log::debug!(
                    "message {}: root {} missing, joining thread {} of parent {}",
                    parsed.message_id,
                    root_id,
                    thread.id,
                    parent_id
                );
                return Ok(Resolution::repaired(Target::Existing(thread), Repair::InReplyTo));
            }
        }

        let warning = format!(
            "message {}: thread root {} not found, starting a new thread at the message itself",
            parsed.message_id, root_id
        );
        log::warn!("{}", warning);

        Ok(Resolution {
            target: Target::Create(self.new_thread(parsed, &parsed.message_id)),
            repair: Some(Repair::FallbackRoot),
            warnings: vec![warning],
        })
    }

    /// Thread of a stored message, if both exist.
    async fn thread_of_message(&self, message_id: &str) -> Result<Option<Thread>, StoreError> {
        match self.store.find_message_by_id(message_id).await? {
            Some(message) => self.store.find_thread_by_id(message.thread_id).await,
            None => Ok(None),
        }
    }

    /// Thread row for a thread started by `parsed` and rooted at `root_id`.
    fn new_thread(&self, parsed: &ParsedMessage, root_id: &str) -> NewThread {
        NewThread {
            subject: parsed.clean_subject(),
            first_message_id: root_id.to_string(),
            created_at: parsed.date,
            updated_at: parsed.date,
            is_patch: thread_is_patch(parsed, self.config.patch_heuristic),
            status: ThreadStatus::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::parser::parse_message;

    #[test]
    fn test_thread_is_patch_heuristics() {
        let cover = parse_message(b"Message-ID: <c@x>\nSubject: [PATCH 0/2] series\n\nCover.\n");
        let bare_diff = parse_message(
            b"Message-ID: <d@x>\nSubject: Fix leak\n\ndiff --git a/x b/x\n+fix\n",
        );

        assert!(thread_is_patch(&cover, PatchHeuristic::SubjectKeyword));
        assert!(thread_is_patch(&cover, PatchHeuristic::ParserFlag));
        assert!(!thread_is_patch(&bare_diff, PatchHeuristic::SubjectKeyword));
        assert!(thread_is_patch(&bare_diff, PatchHeuristic::ParserFlag));
        assert!(thread_is_patch(&bare_diff, PatchHeuristic::Either));
    }
}
