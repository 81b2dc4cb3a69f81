//! Assistant registry collaborator
//!
//! Creates assistants on the hosted voice-AI platform and hands back the
//! identifier the platform assigned.

mod http;

pub use http::{HttpRegistry, RegistryConfig};

use async_trait::async_trait;
use thiserror::Error;

use crate::session::AssistantDraft;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry credentials are not configured (set VAPI_API_KEY)")]
    MissingCredentials,

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("response parsing error: {0}")]
    Parse(String),
}

#[async_trait]
pub trait AssistantRegistry: Send + Sync {
    /// Create an assistant from `draft`, returning its registry id
    async fn create_assistant(&self, draft: &AssistantDraft) -> Result<String, RegistryError>;
}
