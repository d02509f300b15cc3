use async_trait::async_trait;

use crate::config::Config;
use crate::errors::GatewayError;

pub mod anthropic;
pub mod retry;

/// The model gateway: one text prompt in, raw completion text out.
///
/// Implementations retry transient failures internally; any `Err` means
/// "no result for this call" to the caller.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn send(&self, prompt: &str, temperature: f32) -> Result<String, GatewayError>;
}

pub type DynProvider = Box<dyn Provider + Send + Sync>;

pub fn make_provider(cfg: &Config, api_key: String) -> Result<DynProvider, GatewayError> {
    Ok(Box::new(anthropic::Anthropic::new(cfg, api_key)?))
}
