//! HTTP client for the hosted assistant registry
//!
//! The request shape (transcriber, language model, voice) is fixed by
//! configuration; only the draft's fields vary per call. The bearer key lives
//! in the daemon and is never forwarded to UI clients.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretBox};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{AssistantRegistry, RegistryError};
use crate::session::AssistantDraft;

/// Transcription, model and voice settings sent with every creation request
#[derive(Debug)]
pub struct RegistryConfig {
    pub base_url: String,
    pub api_key: Option<SecretBox<String>>,
    pub timeout: Duration,
    pub transcriber_provider: String,
    pub transcriber_model: String,
    pub model_provider: String,
    pub model: String,
    pub emotion_recognition: bool,
    pub voice_provider: String,
    pub voice_id: String,
    pub voice_model: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.vapi.ai".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            transcriber_provider: "deepgram".to_string(),
            transcriber_model: "nova-2".to_string(),
            model_provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            emotion_recognition: true,
            voice_provider: "11labs".to_string(),
            voice_id: "joseph".to_string(),
            voice_model: "eleven_multilingual_v2".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedAssistant {
    id: String,
}

pub struct HttpRegistry {
    client: Client,
    config: RegistryConfig,
}

impl HttpRegistry {
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        if config.api_key.is_none() {
            warn!("no registry API key configured, assistant creation will fail");
        }

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/assistant", self.config.base_url.trim_end_matches('/'))
    }

    /// JSON body for a creation request
    fn request_body(&self, draft: &AssistantDraft) -> Value {
        let cfg = &self.config;
        json!({
            "transcriber": {
                "provider": cfg.transcriber_provider,
                "codeSwitchingEnabled": draft.language_recognition_enabled,
                "model": cfg.transcriber_model,
            },
            "model": {
                "provider": cfg.model_provider,
                "model": cfg.model,
                "messages": [
                    { "role": "system", "content": draft.system_prompt }
                ],
                "emotionRecognitionEnabled": cfg.emotion_recognition,
            },
            "firstMessage": draft.first_message,
            "voice": {
                "provider": cfg.voice_provider,
                "voiceId": cfg.voice_id,
                "model": cfg.voice_model,
            },
            "name": draft.name,
        })
    }
}

#[async_trait]
impl AssistantRegistry for HttpRegistry {
    async fn create_assistant(&self, draft: &AssistantDraft) -> Result<String, RegistryError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or(RegistryError::MissingCredentials)?;

        debug!(name = %draft.name, "creating assistant");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key.expose_secret())
            .json(&self.request_body(draft))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(RegistryError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let id = parse_created(&text)?;
        info!(%id, name = %draft.name, "assistant created");
        Ok(id)
    }
}

fn parse_created(text: &str) -> Result<String, RegistryError> {
    let created: CreatedAssistant =
        serde_json::from_str(text).map_err(|e| RegistryError::Parse(e.to_string()))?;

    if created.id.trim().is_empty() {
        return Err(RegistryError::Parse("registry returned an empty id".to_string()));
    }
    Ok(created.id)
}
