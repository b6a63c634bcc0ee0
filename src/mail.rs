//! Mail transport used to notify other roles.
//!
//! Delivery guarantees belong to the transport; the witness only needs a
//! send call that either returns the id of the stored message or fails.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workspace::Workspace;
use crate::{zlog_debug, zlog_trace, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Requires action from the recipient.
    Task,
    #[default]
    Notification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by the transport on a successful send; empty before.
    #[serde(default)]
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub priority: Priority,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub body: String,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

pub trait Mailer: Send + Sync {
    /// Deliver a message and return the id it was stored under.
    fn send(&self, message: &Message) -> Result<String>;
}

fn new_message_id() -> String {
    format!("msg-{}", &Uuid::new_v4().simple().to_string()[..12])
}

/// Mailbox on disk: `<workspace>/.mail/<recipient>/<id>.json`.
pub struct FileMailbox {
    dir: PathBuf,
}

impl FileMailbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn for_workspace(workspace: &Workspace) -> Self {
        Self::new(workspace.mail_dir())
    }

    /// Directory holding one recipient's messages. `mayor/` and `mayor`
    /// address the same inbox; nested addresses keep their hierarchy.
    pub fn inbox_dir(&self, recipient: &str) -> Result<PathBuf> {
        let mut dir = self.dir.clone();
        let mut any = false;
        for part in recipient.split('/').filter(|p| !p.is_empty()) {
            if part == "." || part == ".." {
                return Err(Error::Transport(format!("invalid recipient '{}'", recipient)));
            }
            dir.push(part);
            any = true;
        }
        if !any {
            return Err(Error::Transport("message has no recipient".to_string()));
        }
        Ok(dir)
    }

    /// Messages in a recipient's inbox, oldest first.
    pub fn inbox(&self, recipient: &str) -> Result<Vec<Message>> {
        let dir = self.inbox_dir(recipient)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut messages = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                messages.push(serde_json::from_str::<Message>(&fs::read_to_string(&path)?)?);
            }
        }
        messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }
}

impl Mailer for FileMailbox {
    fn send(&self, message: &Message) -> Result<String> {
        let dir = self.inbox_dir(&message.to)?;
        let mut stored = message.clone();
        stored.id = new_message_id();
        stored.sent_at = Some(Utc::now());

        let write = || -> std::io::Result<()> {
            fs::create_dir_all(&dir)?;
            let path = dir.join(format!("{}.json", stored.id));
            let json = serde_json::to_string_pretty(&stored)?;
            fs::write(path, json)
        };
        write().map_err(|e| Error::Transport(format!("writing to {}: {}", dir.display(), e)))?;

        zlog_debug!(
            "Mail sent id={} to={} subject={:?} priority={}",
            stored.id,
            stored.to,
            stored.subject,
            stored.priority
        );
        zlog_trace!("Mail body {}:\n{}", stored.id, stored.body);
        Ok(stored.id)
    }
}

/// In-memory transport for tests and dry runs. Can be switched into a
/// failing mode to exercise send errors.
#[derive(Default)]
pub struct MemoryMailbox {
    sent: Mutex<Vec<Message>>,
    failing: AtomicBool,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Mailer for MemoryMailbox {
    fn send(&self, message: &Message) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transport("mailbox unavailable".to_string()));
        }
        let mut stored = message.clone();
        stored.id = new_message_id();
        stored.sent_at = Some(Utc::now());
        let id = stored.id.clone();
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).push(stored);
        Ok(id)
    }
}
