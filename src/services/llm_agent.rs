use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
        CreateChatCompletionRequest, FinishReason, Role,
    },
    Client,
};

use crate::config::Config;
use crate::error::AppError;
use crate::models::Table;
use crate::services::summary::{describe_text, Summary};

pub const SNAPSHOT_ROWS: usize = 30;
const MIN_MAX_TOKENS: u32 = 256;
const DEFAULT_MAX_TOKENS: u32 = 1000;

// Fenced block first, then the outermost braces
static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]+?)\s*```").expect("Invalid regex: fenced block"));
static OBJECT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\{[\s\S]+\})").expect("Invalid regex: object block"));

const SYSTEM_PROMPT: &str = "You are a concise data analyst. Always respond in JSON only.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInsight {
    pub insight: String,
    pub confidence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<Value>,
}

impl QueryInsight {
    fn low(insight: impl Into<String>) -> Self {
        Self {
            insight: insight.into(),
            confidence: "low".to_string(),
            chart: None,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let insight = match obj.get("insight") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        let confidence = obj
            .get("confidence")
            .and_then(Value::as_str)
            .unwrap_or("low")
            .to_string();
        let chart = obj.get("chart").filter(|c| c.is_object()).cloned();
        Some(Self { insight, confidence, chart })
    }

    pub fn is_empty(&self) -> bool {
        self.insight.trim().is_empty()
    }
}

pub struct LlmAgent {
    client: Option<Client<OpenAIConfig>>,
    model: String,
}

impl LlmAgent {
    pub fn new(config: &Config) -> Self {
        let client = config.openrouter_key.as_ref().map(|key| {
            let openai_config = OpenAIConfig::new()
                .with_api_base(config.openrouter_base_url.clone())
                .with_api_key(key.clone());
            Client::with_config(openai_config)
        });
        if client.is_none() {
            tracing::warn!("OPENROUTER_API_KEY is not set; /query will be unavailable");
        }

        Self {
            client,
            model: config.model.clone(),
        }
    }

    pub async fn ask(&self, table: &Table, summary: &Summary, question: &str) -> Result<QueryInsight, AppError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AppError::LlmError("AI API key is not set in backend environment.".to_string()))?;

        let prompt = build_prompt(table, summary, question)?;
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: SYSTEM_PROMPT.to_string(),
                name: None,
                role: Role::System,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt),
                name: None,
                role: Role::User,
            }),
        ];

        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.1),
            max_tokens: DEFAULT_MAX_TOKENS.max(MIN_MAX_TOKENS).try_into().ok(),
            ..Default::default()
        };

        let start = std::time::Instant::now();
        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| AppError::LlmError(format!("AI request failed: {}", e)))?;
        tracing::info!("LLM response from {} in {:?}", self.model, start.elapsed());

        let Some(choice) = response.choices.first() else {
            return Ok(QueryInsight::low(
                "AI model returned an empty response. Please try again or use a different model.",
            ));
        };
        let content = choice.message.content.clone().unwrap_or_default();
        Ok(interpret_completion(&content, choice.finish_reason))
    }
}

fn interpret_completion(content: &str, finish_reason: Option<FinishReason>) -> QueryInsight {
    if content.trim().is_empty() {
        return QueryInsight::low("AI model returned an empty response. Please try again or use a different model.");
    }
    if finish_reason == Some(FinishReason::Length) {
        return QueryInsight::low(
            "AI model response was cut off. Please rephrase your question or use a smaller dataset.",
        );
    }
    extract_json_or_text(content)
}

pub fn build_prompt(table: &Table, summary: &Summary, question: &str) -> Result<String, AppError> {
    let snapshot = serde_json::to_string(&table.to_records(SNAPSHOT_ROWS))?;
    let columns = serde_json::to_string(&table.column_names())?;
    let stats = describe_text(summary);

    Ok(format!(
        "Here is a dataset snapshot (first rows): {}\n\
         Columns: {}\n\
         Stats:\n{}\n\
         Question: \"{}\"\n\
         Please reply exactly with JSON:\n\
         {{\n  \"insight\": \"<short explanation, 1-3 sentences>\",\n  \"confidence\": \"low|medium|high\",\n  \
         \"chart\": {{ \"type\": \"bar|line|pie|scatter|histogram\", \"x\": \"column\", \"y\": \"column\", \
         \"agg\": \"sum|mean|count|none\", \"top_n\": 10 }}\n}}\n\
         The chart field is optional.",
        snapshot, columns, stats, question
    ))
}

pub fn extract_json_or_text(content: &str) -> QueryInsight {
    let body = FENCED_BLOCK
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content);

    let parsed = serde_json::from_str::<Value>(body).ok().or_else(|| {
        OBJECT_BLOCK
            .find(body)
            .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
    });

    parsed
        .as_ref()
        .and_then(QueryInsight::from_value)
        .unwrap_or_else(|| QueryInsight::low(body.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Column;
    use crate::services::summary::summarize;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_fenced_json() {
        let reply = "Sure!\n```json\n{\"insight\": \"Sales peak in May.\", \"confidence\": \"high\"}\n```";
        let insight = extract_json_or_text(reply);
        assert_eq!(insight.insight, "Sales peak in May.");
        assert_eq!(insight.confidence, "high");
        assert_eq!(insight.chart, None);
    }

    #[test]
    fn parses_embedded_object_with_chart() {
        let reply = r#"Answer: {"insight": "NY leads", "confidence": "medium", "chart": {"type": "bar", "x": "city", "y": "sales"}} done"#;
        let insight = extract_json_or_text(reply);
        assert_eq!(insight.insight, "NY leads");
        assert_eq!(insight.chart, Some(json!({"type": "bar", "x": "city", "y": "sales"})));
    }

    #[test]
    fn plain_text_becomes_low_confidence_insight() {
        let insight = extract_json_or_text("  The average age is 30.  ");
        assert_eq!(insight, QueryInsight::low("The average age is 30."));
    }

    #[test]
    fn missing_confidence_defaults_to_low() {
        let insight = extract_json_or_text(r#"{"insight": "ok"}"#);
        assert_eq!(insight.confidence, "low");
    }

    #[test]
    fn empty_and_truncated_completions() {
        assert!(interpret_completion("   ", None).insight.contains("empty response"));
        assert!(interpret_completion("{\"insight\": \"partial", Some(FinishReason::Length))
            .insight
            .contains("cut off"));
        assert_eq!(interpret_completion("{\"insight\": \"x\"}", Some(FinishReason::Stop)).insight, "x");
    }

    #[test]
    fn prompt_contains_snapshot_columns_and_question() {
        let table = Table::new(vec![Column::numeric("age", vec![Some(30.0), Some(40.0)])]).unwrap();
        let prompt = build_prompt(&table, &summarize(&table), "What is the mean age?").unwrap();
        assert!(prompt.contains(r#"[{"age":30.0},{"age":40.0}]"#));
        assert!(prompt.contains(r#"Columns: ["age"]"#));
        assert!(prompt.contains("Question: \"What is the mean age?\""));
    }

    #[tokio::test]
    async fn missing_key_is_an_llm_error() {
        let config = Config::from_lookup(|_| None).unwrap();
        let agent = LlmAgent::new(&config);
        let table = Table::default();
        let err = agent.ask(&table, &summarize(&table), "anything").await.unwrap_err();
        assert!(matches!(err, AppError::LlmError(_)));
    }
}
