use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::sync::parser::ParsedMessage;

// ===== Thread Models =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    #[default]
    Open,
    Closed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Open => "open",
            ThreadStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(ThreadStatus::Open),
            "closed" => Ok(ThreadStatus::Closed),
            other => Err(other.to_string()),
        }
    }
}

/// A discussion anchored to `first_message_id`, unique across threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: i32,
    pub subject: String,
    pub first_message_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_patch: bool,
    pub status: ThreadStatus,
}

#[derive(Debug, Clone)]
pub struct NewThread {
    pub subject: String,
    pub first_message_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_patch: bool,
    pub status: ThreadStatus,
}

// ===== Message Models =====

/// A stored email. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: i32,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub thread_id: i32,
    pub from_email: String,
    pub from_name: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub body: String,
    pub is_patch: bool,
    pub patch_content: Option<String>,
    #[serde(skip)]
    pub raw_email: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub thread_id: i32,
    pub from_email: String,
    pub from_name: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub body: String,
    pub is_patch: bool,
    pub patch_content: Option<String>,
    pub raw_email: Vec<u8>,
}

impl NewMessage {
    pub fn from_parsed(parsed: &ParsedMessage, thread_id: i32) -> Self {
        Self {
            message_id: parsed.message_id.clone(),
            in_reply_to: parsed.in_reply_to.clone(),
            thread_id,
            from_email: parsed.from_email.clone(),
            from_name: parsed.from_name.clone(),
            subject: parsed.subject.clone(),
            date: parsed.date,
            body: parsed.body.clone(),
            is_patch: parsed.is_patch,
            patch_content: parsed.patch_content.clone(),
            raw_email: parsed.raw.clone(),
        }
    }

    pub fn into_message(self, id: i32) -> Message {
        Message {
            id,
            message_id: self.message_id,
            in_reply_to: self.in_reply_to,
            thread_id: self.thread_id,
            from_email: self.from_email,
            from_name: self.from_name,
            subject: self.subject,
            date: self.date,
            body: self.body,
            is_patch: self.is_patch,
            patch_content: self.patch_content,
            raw_email: self.raw_email,
        }
    }
}

impl NewThread {
    pub fn into_thread(self, id: i32) -> Thread {
        Thread {
            id,
            subject: self.subject,
            first_message_id: self.first_message_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            is_patch: self.is_patch,
            status: self.status,
        }
    }
}
