//! Bearer token sources.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

/// Supplies the bearer token for negotiate and transport requests.
///
/// Called once per negotiation and once per transport request that needs it,
/// so implementations may refresh expiring tokens.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Current token. Errors are surfaced as negotiation or transport failures.
    async fn access_token(&self) -> Result<String, String>;
}

/// Shared handle to a token provider.
pub type SharedTokenProvider = Arc<dyn AccessTokenProvider>;

/// A fixed token, e.g. one handed out in a negotiate redirect.
#[derive(Clone, Debug)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Wrap a token as a shared provider.
    pub fn shared(token: impl Into<String>) -> SharedTokenProvider {
        Arc::new(Self::new(token))
    }
}

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, String> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl<F, Fut> AccessTokenProvider for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, String>> + Send + 'static,
{
    async fn access_token(&self) -> Result<String, String> {
        self().await
    }
}

/// Resolve an optional provider into an optional token.
///
/// An empty token is treated as "no token".
pub async fn resolve(provider: Option<&SharedTokenProvider>) -> Result<Option<String>, String> {
    let Some(provider) = provider else {
        return Ok(None);
    };
    let token = provider.access_token().await?;
    Ok((!token.is_empty()).then_some(token))
}
