//! Domain records shared by the session machine and its collaborators

use serde::{Deserialize, Serialize};

/// Connected wallet account, used as the persistence key for assistants
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Parse an account string reported by a wallet, trimming whitespace.
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A remotely hosted voice assistant owned by an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assistant {
    /// Registry-assigned identifier
    pub id: String,
    /// User-supplied display name
    pub name: String,
}

/// Speaker of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript line of a voice session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

/// Creation form contents submitted by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantDraft {
    pub name: String,
    pub system_prompt: String,
    pub first_message: String,
    #[serde(default = "default_language_recognition")]
    pub language_recognition_enabled: bool,
}

fn default_language_recognition() -> bool {
    true
}

impl AssistantDraft {
    /// Name of the first blank required field, if any
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("name", &self.name),
            ("system_prompt", &self.system_prompt),
            ("first_message", &self.first_message),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> AssistantDraft {
        AssistantDraft {
            name: "Helper".into(),
            system_prompt: "You are helpful".into(),
            first_message: "Hi there".into(),
            language_recognition_enabled: true,
        }
    }

    #[test]
    fn test_identity_parse_trims() {
        let id = Identity::parse("  0xABC \n").unwrap();
        assert_eq!(id.as_str(), "0xABC");
        assert!(Identity::parse("   ").is_none());
    }

    #[test]
    fn test_draft_required_fields() {
        assert_eq!(draft().missing_field(), None);

        let mut blank_prompt = draft();
        blank_prompt.system_prompt = "  ".into();
        assert_eq!(blank_prompt.missing_field(), Some("system_prompt"));
    }

    #[test]
    fn test_draft_language_recognition_defaults_on() {
        let json = r#"{"name":"a","system_prompt":"b","first_message":"c"}"#;
        let draft: AssistantDraft = serde_json::from_str(json).unwrap();
        assert!(draft.language_recognition_enabled);
    }

    #[test]
    fn test_role_serialization() {
        let msg = Message { role: Role::Assistant, text: "hello".into() };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"assistant","text":"hello"}"#);
    }
}
