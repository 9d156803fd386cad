use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chunkdrop_store::OwnerId;

/// Future returned by [`Authenticator::authenticate`].
pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = Option<OwnerId>> + Send + 'a>>;

/// Resolves a bearer token to the owner it was issued for.
///
/// Token issuance lives elsewhere; the server only asks.
pub trait Authenticator: Send + Sync + 'static {
    /// Returns `None` for unknown or expired tokens.
    fn authenticate<'a>(&'a self, token: &'a str) -> AuthFuture<'a>;
}

/// Fixed token table, usually loaded from the daemon config.
#[derive(Debug, Default, Clone)]
pub struct StaticTokens {
    tokens: HashMap<String, OwnerId>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, owner_id: OwnerId) {
        self.tokens.insert(token.into(), owner_id);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl FromIterator<(String, OwnerId)> for StaticTokens {
    fn from_iter<I: IntoIterator<Item = (String, OwnerId)>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

impl Authenticator for StaticTokens {
    fn authenticate<'a>(&'a self, token: &'a str) -> AuthFuture<'a> {
        let owner = if token.is_empty() {
            None
        } else {
            self.tokens.get(token).cloned()
        };
        Box::pin(async move { owner })
    }
}
