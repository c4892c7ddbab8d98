//! Conversation messages and their Gemini wire representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GenerationParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Local notes shown in the chat window. Never sent to the provider.
    System,
}

/// One entry of the in-memory conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderContent {
    pub role: ProviderRole,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl From<&GenerationParams> for GenerationConfig {
    fn from(params: &GenerationParams) -> Self {
        Self {
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            max_output_tokens: params.max_output_tokens,
        }
    }
}

/// Body of `POST models/{model}:generateContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<ProviderContent>,
    pub generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    pub fn new(history: &[ChatMessage], params: &GenerationParams) -> Self {
        Self {
            contents: to_provider_contents(history),
            generation_config: params.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

// Non-text parts (function calls, inline data) deserialize with `text: None`.
#[derive(Debug, Default, Deserialize)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
}

/// Converts the conversation into provider contents, one block per message.
///
/// Messages with a role other than user or assistant are dropped. Order is kept
/// and consecutive messages of the same role are not merged.
pub fn to_provider_contents(history: &[ChatMessage]) -> Vec<ProviderContent> {
    history
        .iter()
        .filter_map(|message| {
            let role = match message.role {
                Role::User => ProviderRole::User,
                Role::Assistant => ProviderRole::Model,
                Role::System => return None,
            };
            Some(ProviderContent {
                role,
                parts: vec![Part {
                    text: message.content.clone(),
                }],
            })
        })
        .collect()
}

/// Joins the text parts of the first candidate with newlines.
///
/// Returns an empty string when there is nothing to extract.
pub fn extract_text(payload: &GenerateContentResponse) -> String {
    let Some(parts) = payload
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| &content.parts)
    else {
        return String::new();
    };

    parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn system_only_history_maps_to_nothing() {
        let history = vec![ChatMessage::system("welcome"), ChatMessage::system("note")];
        assert!(to_provider_contents(&history).is_empty());
    }

    #[test]
    fn roles_map_in_order_without_merging() {
        let history = vec![
            ChatMessage::assistant("hello"),
            ChatMessage::user("one"),
            ChatMessage::system("dropped"),
            ChatMessage::user("two"),
        ];
        let contents = to_provider_contents(&history);

        let roles: Vec<_> = contents.iter().map(|c| c.role).collect();
        assert_eq!(
            roles,
            vec![ProviderRole::Model, ProviderRole::User, ProviderRole::User]
        );
        let texts: Vec<_> = contents.iter().map(|c| c.parts[0].text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "one", "two"]);
        assert!(contents.iter().all(|c| c.parts.len() == 1));
    }

    #[test]
    fn request_serializes_to_wire_shape() {
        let request =
            GenerateContentRequest::new(&[ChatMessage::user("hi")], &GenerationParams::default());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(value["generationConfig"]["topK"], 40);
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn chat_message_uses_camel_case_timestamp() {
        let value = serde_json::to_value(ChatMessage::assistant("x")).unwrap();
        assert_eq!(value["role"], "assistant");
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn extract_text_without_candidates_is_empty() {
        assert_eq!(extract_text(&response(json!({}))), "");
        assert_eq!(extract_text(&response(json!({"candidates": []}))), "");
        assert_eq!(extract_text(&response(json!({"candidates": [{}]}))), "");
    }

    #[test]
    fn extract_text_skips_empty_parts_and_trims() {
        let payload = response(json!({
            "candidates": [
                {"content": {"parts": [{"text": " a"}, {"text": ""}, {"functionCall": {}}, {"text": "b\n"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }));
        assert_eq!(extract_text(&payload), "a\nb");
    }
}
