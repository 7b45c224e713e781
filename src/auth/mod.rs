mod device_flow;
mod token_cache;

pub use device_flow::DeviceCodeAuth;
pub use token_cache::TokenCache;

use async_trait::async_trait;

use crate::error::Result;

/// Source of bearer tokens for the Graph API.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// `interactive` allows prompting the user; otherwise only cached or
    /// silently refreshed credentials are returned.
    async fn get_token(&self, interactive: bool) -> Result<Option<String>>;

    async fn clear_cached_credential(&self) -> Result<()>;

    async fn has_cached_credential(&self) -> bool;
}
