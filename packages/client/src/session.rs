//! Persisted login session.
//!
//! The logged-in user is stored as JSON under the `user` key, one file per
//! key inside the session directory.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::{domain::User, error::ClientError};

const USER_KEY: &str = "user";

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn user_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", USER_KEY))
    }

    pub async fn save(&self, user: &User) -> Result<(), ClientError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ClientError::Session(e.to_string()))?;
        let body =
            serde_json::to_vec_pretty(user).map_err(|e| ClientError::Session(e.to_string()))?;
        tokio::fs::write(self.user_path(), body)
            .await
            .map_err(|e| ClientError::Session(e.to_string()))?;
        tracing::debug!("Session saved for user {}", user.id);
        Ok(())
    }

    /// Stored user, or `None` when nobody is logged in.
    ///
    /// A corrupt file is treated as no session.
    pub async fn load(&self) -> Result<Option<User>, ClientError> {
        let body = match tokio::fs::read(self.user_path()).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ClientError::Session(e.to_string())),
        };
        match serde_json::from_slice(&body) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::warn!("Discarding unreadable session: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn clear(&self) -> Result<(), ClientError> {
        match tokio::fs::remove_file(self.user_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClientError::Session(e.to_string())),
        }
    }
}
