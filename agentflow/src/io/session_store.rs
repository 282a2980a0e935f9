//! Durable session storage keyed by `session_id`.
//!
//! Every stored session carries a `revision`. Saves are compare-and-swap on
//! that revision so two controllers driving the same session cannot silently
//! overwrite each other.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::Record;

static SESSION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,128}$").unwrap());

/// Persisted controller state for one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub session_id: String,
    /// Name of the workflow that owns this session.
    pub workflow: String,
    pub current_state: String,
    pub state_data: Record,
    /// Number of successful saves; 0 means never stored.
    pub revision: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid session id '{0}' (expected [A-Za-z0-9_.-], at most 128 chars)")]
    InvalidSessionId(String),
    #[error("session '{session_id}' changed concurrently: expected revision {expected}, found {found}")]
    Conflict {
        session_id: String,
        expected: u64,
        found: u64,
    },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Key-value store for sessions.
pub trait SessionStore {
    fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError>;

    /// Store `state` if the current revision equals `expected_revision`
    /// (0 when the session does not exist yet). Returns the stored state with
    /// its new revision.
    fn save(&self, expected_revision: u64, state: SessionState)
    -> Result<SessionState, StoreError>;
}

impl<T: SessionStore + ?Sized> SessionStore for &T {
    fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        (**self).load(session_id)
    }

    fn save(
        &self,
        expected_revision: u64,
        state: SessionState,
    ) -> Result<SessionState, StoreError> {
        (**self).save(expected_revision, state)
    }
}

pub fn validate_session_id(session_id: &str) -> Result<(), StoreError> {
    if SESSION_ID_RE.is_match(session_id) {
        Ok(())
    } else {
        Err(StoreError::InvalidSessionId(session_id.to_string()))
    }
}

fn check_revision(session_id: &str, expected: u64, found: u64) -> Result<(), StoreError> {
    if expected != found {
        return Err(StoreError::Conflict {
            session_id: session_id.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

/// One JSON file per session under a directory.
///
/// The revision check and the write are not atomic across processes; the
/// check catches stale controllers, not simultaneous writers.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        validate_session_id(session_id)?;
        let path = self.path_for(session_id);
        debug!(path = %path.display(), "loading session");
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow!(err)
                    .context(format!("read session {}", path.display()))
                    .into());
            }
        };
        let state: SessionState = serde_json::from_str(&contents)
            .with_context(|| format!("parse session {}", path.display()))?;
        Ok(Some(state))
    }

    fn save(
        &self,
        expected_revision: u64,
        mut state: SessionState,
    ) -> Result<SessionState, StoreError> {
        validate_session_id(&state.session_id)?;
        let found = self
            .load(&state.session_id)?
            .map(|stored| stored.revision)
            .unwrap_or(0);
        check_revision(&state.session_id, expected_revision, found)?;

        state.revision = expected_revision + 1;
        let path = self.path_for(&state.session_id);
        debug!(path = %path.display(), revision = state.revision, current_state = %state.current_state, "writing session");
        let mut buf = serde_json::to_string_pretty(&state).context("serialize session")?;
        buf.push('\n');
        write_session_file(&path, &buf)?;
        Ok(state)
    }
}

fn write_session_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    crate::io::write_atomic(path, contents)
        .with_context(|| format!("write session {}", path.display()))
}

/// In-process store; sessions live as long as the value.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        validate_session_id(session_id)?;
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        Ok(sessions.get(session_id).cloned())
    }

    fn save(
        &self,
        expected_revision: u64,
        mut state: SessionState,
    ) -> Result<SessionState, StoreError> {
        validate_session_id(&state.session_id)?;
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        let found = sessions
            .get(&state.session_id)
            .map(|stored| stored.revision)
            .unwrap_or(0);
        check_revision(&state.session_id, expected_revision, found)?;
        state.revision = expected_revision + 1;
        sessions.insert(state.session_id.clone(), state.clone());
        Ok(state)
    }
}
