//! User e-mail lookup for cancellation notifications.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::UserId;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

/// Errors from the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("User directory unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a user's notification address.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn email_for(&self, user_id: UserId) -> Result<String, DirectoryError>;
}

#[async_trait]
impl<T: UserDirectory + ?Sized> UserDirectory for Arc<T> {
    async fn email_for(&self, user_id: UserId) -> Result<String, DirectoryError> {
        (**self).email_for(user_id).await
    }
}

#[derive(Debug, Default)]
struct InMemoryDirectoryState {
    emails: HashMap<UserId, String>,
    fallback: Option<String>,
    unavailable: bool,
}

/// In-memory directory. Unknown users resolve to the fallback address when
/// one is configured.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    state: Arc<Mutex<InMemoryDirectoryState>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory that answers every unknown user with `email`.
    pub fn with_fallback(email: impl Into<String>) -> Self {
        let directory = Self::new();
        directory.lock().fallback = Some(email.into());
        directory
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryDirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, user_id: UserId, email: impl Into<String>) {
        self.lock().emails.insert(user_id, email.into());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn email_for(&self, user_id: UserId) -> Result<String, DirectoryError> {
        let state = self.lock();
        if state.unavailable {
            return Err(DirectoryError::Unavailable("user service unreachable".to_string()));
        }
        state
            .emails
            .get(&user_id)
            .or(state.fallback.as_ref())
            .cloned()
            .ok_or(DirectoryError::UserNotFound(user_id))
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: UserData,
}

#[derive(Debug, Deserialize)]
struct UserData {
    email: String,
}

/// User service client over HTTP (`GET {base}/users/{id}`).
#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    base_url: String,
    http: Client,
}

impl HttpUserDirectory {
    /// Creates a client whose calls give up after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DirectoryError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn email_for(&self, user_id: UserId) -> Result<String, DirectoryError> {
        let url = format!("{}/users/{}", self.base_url, user_id);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let parsed: UserResponse = response
                    .json()
                    .await
                    .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
                Ok(parsed.user.email)
            }
            StatusCode::NOT_FOUND => Err(DirectoryError::UserNotFound(user_id)),
            status => Err(DirectoryError::Unavailable(format!(
                "user lookup failed with status {status}"
            ))),
        }
    }
}
