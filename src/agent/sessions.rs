//! Persistent conversation sessions
//!
//! A session is an append-only list of role-tagged turns stored as one JSON
//! file per session name. Every field is optional on read so files written
//! by older or newer versions still load.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default token budget for a conversation window
pub const DEFAULT_TOKEN_BUDGET: usize = 260_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// One role-tagged message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub turn_index: u64,
    /// Tool that produced a `tool` turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl ConversationTurn {
    /// Rough token count: one token per four characters, rounded up
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// A saved conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    /// Unique session ID (UUID v7)
    pub id: String,
    /// File name the session is stored under
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turns: Vec<ConversationTurn>,
    pub token_budget: usize,
    pub metadata: BTreeMap<String, String>,
    /// Next turn index; indices keep increasing across `clear`
    next_index: u64,
}

impl Default for Session {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            name: String::new(),
            created_at: now,
            updated_at: now,
            turns: Vec::new(),
            token_budget: DEFAULT_TOKEN_BUDGET,
            metadata: BTreeMap::new(),
            next_index: 0,
        }
    }
}

impl Session {
    pub fn new(name: impl Into<String>, token_budget: usize) -> Self {
        Self {
            name: name.into(),
            token_budget,
            ..Self::default()
        }
    }

    fn next_turn_index(&self) -> u64 {
        let after_last = self.turns.last().map_or(0, |t| t.turn_index + 1);
        self.next_index.max(after_last)
    }

    /// Append a turn and return its index
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> u64 {
        self.push(role, content.into(), None)
    }

    pub fn append_tool(&mut self, tool: impl Into<String>, content: impl Into<String>) -> u64 {
        self.push(Role::Tool, content.into(), Some(tool.into()))
    }

    fn push(&mut self, role: Role, content: String, tool: Option<String>) -> u64 {
        let turn_index = self.next_turn_index();
        self.turns.push(ConversationTurn {
            role,
            content,
            timestamp: Utc::now(),
            turn_index,
            tool,
        });
        self.next_index = turn_index + 1;
        self.updated_at = Utc::now();
        turn_index
    }

    /// Drop every turn; the index counter keeps running
    pub fn clear(&mut self) {
        self.next_index = self.next_turn_index();
        self.turns.clear();
        self.updated_at = Utc::now();
    }

    pub fn total_tokens(&self) -> usize {
        self.turns.iter().map(ConversationTurn::estimated_tokens).sum()
    }

    pub fn total_chars(&self) -> usize {
        self.turns.iter().map(|t| t.content.chars().count()).sum()
    }

    /// Newest turns that fit in the token budget minus `reserve`
    ///
    /// Read-time only: the session itself is never shortened.
    pub fn context_window(&self, reserve: usize) -> &[ConversationTurn] {
        let budget = self.token_budget.saturating_sub(reserve);
        let mut used = 0;
        let mut start = self.turns.len();
        for (i, turn) in self.turns.iter().enumerate().rev() {
            used += turn.estimated_tokens();
            if used > budget {
                break;
            }
            start = i;
        }
        &self.turns[start..]
    }
}

/// Error type for session storage
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session name '{0}' (use letters, digits, '-', '_' or '.')")]
    InvalidName(String),
    #[error("session '{0}' not found")]
    NotFound(String),
    #[error("session file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session file {} is not valid JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Summary of a session for listing
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub id: String,
    pub turns: usize,
    pub updated_at: DateTime<Utc>,
    pub preview: String,
}

/// Session storage manager: one `<name>.json` per session
#[derive(Debug, Clone)]
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    /// Create a new session store, creating the directory if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|source| SessionError::Io {
            path: base_dir.clone(),
            source,
        })?;
        Ok(Self { base_dir })
    }

    /// Default directory (~/.toolchat/sessions)
    pub fn default_dir() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".toolchat").join("sessions")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn session_path(&self, name: &str) -> Result<PathBuf, SessionError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(SessionError::InvalidName(name.to_string()));
        }
        Ok(self.base_dir.join(format!("{name}.json")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.session_path(name).map_or(false, |p| p.exists())
    }

    /// Load a session from disk
    pub fn load(&self, name: &str) -> Result<Session, SessionError> {
        let path = self.session_path(name)?;
        let mut session = load_from_path(&path).map_err(|e| match e {
            SessionError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                SessionError::NotFound(name.to_string())
            }
            other => other,
        })?;
        if session.name.is_empty() {
            session.name = name.to_string();
        }
        Ok(session)
    }

    /// Load `name`, or start an empty session if it was never saved
    pub fn load_or_create(&self, name: &str, token_budget: usize) -> Result<Session, SessionError> {
        match self.load(name) {
            Ok(session) => Ok(session),
            Err(SessionError::NotFound(_)) => Ok(Session::new(name, token_budget)),
            Err(e) => Err(e),
        }
    }

    /// Write a session to disk atomically (temp file, then rename)
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        let path = self.session_path(&session.name)?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| SessionError::Io { path, source }
        };

        let json = serde_json::to_string_pretty(session).map_err(|source| SessionError::Parse {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&tmp, json).map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_err(&path))
    }

    /// List all sessions, most recently updated first
    pub fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let entries = std::fs::read_dir(&self.base_dir).map_err(|source| SessionError::Io {
            path: self.base_dir.clone(),
            source,
        })?;

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let Ok(session) = load_from_path(&path) else {
                continue;
            };
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let preview = session
                .turns
                .iter()
                .find(|t| t.role == Role::User)
                .map(|t| truncate(&t.content, 50))
                .unwrap_or_default();
            sessions.push(SessionSummary {
                name,
                id: session.id,
                turns: session.turns.len(),
                updated_at: session.updated_at,
                preview,
            });
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Delete a session
    pub fn delete(&self, name: &str) -> Result<(), SessionError> {
        let path = self.session_path(name)?;
        std::fs::remove_file(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SessionError::NotFound(name.to_string())
            } else {
                SessionError::Io { path, source }
            }
        })
    }
}

fn load_from_path(path: &Path) -> Result<Session, SessionError> {
    let json = std::fs::read_to_string(path).map_err(|source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&json).map_err(|source| SessionError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Truncate a string to max characters, adding ellipsis if needed
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
