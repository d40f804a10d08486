//! Explicit auth session.
//!
//! The browser original kept the access token in a React context backed by
//! localStorage. Here the session is a plain object injected into the client:
//! an in-memory token slot behind a lock, with optional load/persist against
//! a token file so the CLI survives process restarts. Logout is an explicit
//! `clear()`. There is no token refresh.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Holds the bearer token for the current user, if any.
#[derive(Debug, Default)]
pub struct Session {
    token: RwLock<Option<String>>,
    /// Token persistence path; in-memory only when `None`.
    token_file: Option<PathBuf>,
}

impl Session {
    /// A purely in-memory session (tests, embedding).
    pub fn new() -> Self {
        Self::default()
    }

    /// A session backed by a token file. Loads an existing token if the file
    /// is present; a missing file just means "not logged in".
    pub fn with_token_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let token = match fs::read_to_string(&path) {
            Ok(contents) => {
                let trimmed = contents.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    debug!("Loaded session token from {}", path.display());
                    Some(trimmed.to_string())
                }
            }
            Err(_) => None,
        };

        Self {
            token: RwLock::new(token),
            token_file: Some(path),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    /// Current bearer token, cloned out of the slot.
    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Install a new token and persist it when file-backed.
    pub fn set_token(&self, token: impl Into<String>) -> Result<()> {
        let token = token.into();
        if let Some(path) = &self.token_file {
            fs::write(path, &token)
                .with_context(|| format!("Failed to persist token to {}", path.display()))?;
        }
        *self.token.write() = Some(token);
        Ok(())
    }

    /// Logout: drop the token and remove the token file if present.
    pub fn clear(&self) -> Result<()> {
        *self.token.write() = None;
        if let Some(path) = &self.token_file {
            if path.exists() {
                fs::remove_file(path)
                    .with_context(|| format!("Failed to remove token file {}", path.display()))?;
            }
        }
        Ok(())
    }
}
