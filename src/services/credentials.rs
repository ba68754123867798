use std::sync::{Arc, RwLock};

/// Supplies the bearer token for analysis API calls.
///
/// Implementations are read on every request and never cached by callers,
/// so a rotated token takes effect on the next status check.
pub trait CredentialSource: Send + Sync {
    /// Current token, or `None` when the user is signed out.
    fn bearer_token(&self) -> Option<String>;
}

impl<T: CredentialSource + ?Sized> CredentialSource for Arc<T> {
    fn bearer_token(&self) -> Option<String> {
        (**self).bearer_token()
    }
}

/// A token fixed at construction (e.g. from `ANALYSIS_API_TOKEN`).
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(normalize(token))
    }
}

impl CredentialSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// A token the host application can swap or clear at runtime.
#[derive(Debug, Default)]
pub struct RotatingToken {
    inner: RwLock<Option<String>>,
}

impl RotatingToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            inner: RwLock::new(normalize(token)),
        }
    }

    pub fn rotate(&self, token: impl Into<String>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = normalize(Some(token.into()));
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}

impl CredentialSource for RotatingToken {
    fn bearer_token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn normalize(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
