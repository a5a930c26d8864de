use anyhow::anyhow;
use care_flow::{UnitError, extract_json_object};
use reqwest::Client;
use rig::{agent::Agent, client::CompletionClient, completion::Prompt, providers::openrouter};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Model used by every LLM-backed unit, overridable with `LLM_MODEL`
pub fn llm_model() -> String {
    std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string())
}

pub fn get_llm_agent(preamble: &str) -> anyhow::Result<Agent<openrouter::CompletionModel>> {
    let api_key = std::env::var("OPENROUTER_API_KEY")
        .map_err(|_| anyhow!("OPENROUTER_API_KEY not set"))?;
    let client = openrouter::Client::new(&api_key);
    let agent = client.agent(&llm_model()).preamble(preamble).build();
    Ok(agent)
}

/// One-shot prompt against a fresh agent
pub async fn prompt_llm(preamble: &str, prompt: &str) -> anyhow::Result<String> {
    let agent = get_llm_agent(preamble)?;
    let response = agent.prompt(prompt).await?;
    Ok(response)
}

/// Parse the JSON object out of an LLM reply that may wrap it in a code fence or prose
pub fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> anyhow::Result<T> {
    let json = extract_json_object(raw).ok_or_else(|| anyhow!("no JSON object in reply"))?;
    serde_json::from_str(json).map_err(|e| anyhow!("reply does not match schema: {e}"))
}

/// Pretty JSON for prompt interpolation; absent values render as `null`
pub fn render<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

pub fn unit_failure(error: impl std::fmt::Display) -> UnitError {
    UnitError::Failed(error.to_string())
}

/// Raw chat-completions call, used where rig's prompt API cannot carry image parts
pub async fn call_openrouter_api(
    model: &str,
    content: Vec<Value>,
    max_tokens: u32,
) -> anyhow::Result<String> {
    let api_key = std::env::var("OPENROUTER_API_KEY")
        .map_err(|_| anyhow!("OPENROUTER_API_KEY environment variable not set"))?;

    let payload = json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": content
            }
        ],
        "max_tokens": max_tokens
    });

    let response = Client::new()
        .post(OPENROUTER_CHAT_URL)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&payload)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(anyhow!("LLM API request failed: {}", response.status()));
    }

    let response_json: Value = response.json().await?;
    let content = response_json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| anyhow!("Invalid response format from LLM"))?;

    Ok(content.to_string())
}
