// 该文件是 Kanjian （看见） 项目的一部分。
// src/client/openai.rs - OpenAI Chat Completions 客户端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  client::{ClientError, Message, ModelClient, RetryPolicy, check_response, timeout_from_url},
  frame::EncodedFrame,
  query_param,
};

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";
const OPENAI_DEFAULT_MAX_TOKENS: u32 = 1024;
const OPENAI_DEFAULT_DETAIL: &str = "high";
const OPENAI_DEFAULT_TIMEOUT_SECS: u64 = 120;
const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

/// OpenAI 客户端配置，来自 `openai:///<model>?max_tokens=...&temperature=...`
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiConfig {
  pub endpoint: String,
  pub model: String,
  pub max_tokens: u32,
  pub temperature: f32,
  /// 例如 `json_object`
  pub response_format: Option<String>,
  pub system: Option<String>,
  /// 图像细节等级：`low`、`high` 或 `auto`
  pub detail: String,
  pub retry: RetryPolicy,
  pub timeout: std::time::Duration,
}

impl OpenAiConfig {
  pub fn from_url(url: &Url) -> Result<Self, ClientError> {
    if url.scheme() != OpenAiClient::SCHEME {
      return Err(ClientError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        OpenAiClient::SCHEME,
        url.scheme()
      )));
    }

    let text_param = |key: &str| {
      url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
    };
    let model = url.path().trim_matches('/');

    Ok(Self {
      endpoint: text_param("endpoint").unwrap_or_else(|| OPENAI_ENDPOINT.to_string()),
      model: if model.is_empty() {
        OPENAI_DEFAULT_MODEL.to_string()
      } else {
        model.to_string()
      },
      max_tokens: query_param(url, "max_tokens")
        .map_err(ClientError::Config)?
        .unwrap_or(OPENAI_DEFAULT_MAX_TOKENS),
      temperature: query_param(url, "temperature")
        .map_err(ClientError::Config)?
        .unwrap_or(0.0),
      response_format: text_param("response_format"),
      system: text_param("system"),
      detail: text_param("detail").unwrap_or_else(|| OPENAI_DEFAULT_DETAIL.to_string()),
      retry: RetryPolicy::from_url(url)?,
      timeout: timeout_from_url(url, OPENAI_DEFAULT_TIMEOUT_SECS)?,
    })
  }
}

pub struct OpenAiClient {
  client: reqwest::blocking::Client,
  config: OpenAiConfig,
  api_key: String,
  system_message: Option<Message>,
}

impl FromUrlWithScheme for OpenAiClient {
  const SCHEME: &'static str = "openai";
}

impl FromUrl for OpenAiClient {
  type Error = ClientError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let config = OpenAiConfig::from_url(url)?;
    let api_key =
      std::env::var(OPENAI_KEY_ENV).map_err(|_| ClientError::MissingCredential(OPENAI_KEY_ENV))?;
    OpenAiClient::new(config, api_key)
  }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  max_tokens: u32,
  temperature: f32,
  messages: Vec<&'a Message>,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat<'a>>,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
  #[serde(rename = "type")]
  kind: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
  choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
  message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
  content: Option<String>,
}

/// 取出 `choices[0].message.content`
fn parse_chat_completion(body: &str) -> Result<String, ClientError> {
  let response: ChatResponse =
    serde_json::from_str(body).map_err(|e| ClientError::Envelope(e.to_string()))?;
  let content = response
    .choices
    .into_iter()
    .next()
    .and_then(|c| c.message.content)
    .ok_or_else(|| ClientError::Envelope(format!("缺少 choices[0] 内容: {}", body)))?;

  let content = content.trim();
  if content.is_empty() {
    return Err(ClientError::EmptyResponse);
  }
  Ok(content.to_string())
}

impl OpenAiClient {
  pub fn new(config: OpenAiConfig, api_key: String) -> Result<Self, ClientError> {
    let client = reqwest::blocking::Client::builder()
      .timeout(config.timeout)
      .build()?;
    let system_message = config
      .system
      .as_ref()
      .map(|system| Message::new(json!({ "role": "system", "content": system })));

    Ok(Self {
      client,
      config,
      api_key,
      system_message,
    })
  }

  fn chat_request<'a>(&'a self, messages: &'a [Message]) -> ChatRequest<'a> {
    ChatRequest {
      model: &self.config.model,
      max_tokens: self.config.max_tokens,
      temperature: self.config.temperature,
      messages: self.system_message.iter().chain(messages).collect(),
      response_format: self
        .config
        .response_format
        .as_deref()
        .map(|kind| ResponseFormat { kind }),
    }
  }

  fn send(&self, body: &ChatRequest) -> Result<String, ClientError> {
    let response = self
      .client
      .post(&self.config.endpoint)
      .bearer_auth(&self.api_key)
      .json(body)
      .send()?;
    let text = check_response(response)?;
    parse_chat_completion(&text)
  }
}

impl ModelClient for OpenAiClient {
  fn format_image_message(&self, image: &EncodedFrame) -> Message {
    Message::new(json!({
      "role": "user",
      "content": [{
        "type": "image_url",
        "image_url": {
          "url": format!("data:{};base64,{}", image.mime_type(), STANDARD.encode(image)),
          "detail": self.config.detail,
        }
      }]
    }))
  }

  fn format_text_message(&self, text: &str) -> Message {
    Message::new(json!({ "role": "user", "content": text }))
  }

  fn request_message(&self, messages: &[Message]) -> Result<String, ClientError> {
    let body = self.chat_request(messages);
    self.config.retry.run(|attempt| {
      debug!("OpenAI 请求, 第 {} 次尝试", attempt + 1);
      self.send(&body)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(url: &str) -> OpenAiClient {
    let config = OpenAiConfig::from_url(&Url::parse(url).unwrap()).unwrap();
    OpenAiClient::new(config, "key".to_string()).unwrap()
  }

  #[test]
  fn config_defaults() {
    let config = OpenAiConfig::from_url(&Url::parse("openai:").unwrap()).unwrap();
    assert_eq!(config.model, "gpt-4o");
    assert_eq!(config.max_tokens, 1024);
    assert_eq!(config.temperature, 0.0);
    assert_eq!(config.detail, "high");
    assert_eq!(config.endpoint, OPENAI_ENDPOINT);
    assert!(config.response_format.is_none());
    assert!(config.system.is_none());
  }

  #[test]
  fn invalid_numbers_are_config_errors() {
    assert!(matches!(
      OpenAiConfig::from_url(&Url::parse("openai:///gpt-4o?max_tokens=lots").unwrap()),
      Err(ClientError::Config(_))
    ));
  }

  #[test]
  fn request_body_prepends_system_message() {
    let client = client(
      "openai:///gpt-4o-mini?system=You%20verify%20objects&response_format=json_object&temperature=0.5",
    );
    let messages = [client.format_text_message("is it a cat?")];
    let body = serde_json::to_value(client.chat_request(&messages)).unwrap();

    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["temperature"], 0.5);
    assert_eq!(body["response_format"]["type"], "json_object");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "You verify objects");
    assert_eq!(body["messages"][1]["content"], "is it a cat?");
  }

  #[test]
  fn request_body_omits_absent_response_format() {
    let client = client("openai:///gpt-4o");
    let body = serde_json::to_value(client.chat_request(&[])).unwrap();
    assert!(body.get("response_format").is_none());
    assert_eq!(body["messages"], json!([]));
  }

  #[test]
  fn image_message_is_data_url() {
    let client = client("openai:///gpt-4o?detail=low");
    let image = EncodedFrame::from_image(&image::DynamicImage::new_rgb8(2, 2)).unwrap();
    let message = client.format_image_message(&image);
    let part = &message.as_value()["content"][0];
    assert_eq!(part["type"], "image_url");
    assert_eq!(part["image_url"]["detail"], "low");
    assert!(
      part["image_url"]["url"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,")
    );
  }

  #[test]
  fn parses_choice_content() {
    let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"looks right|yes"}}]}"#;
    assert_eq!(parse_chat_completion(body).unwrap(), "looks right|yes");
    assert!(matches!(
      parse_chat_completion(r#"{"error":{"message":"rate limited"}}"#),
      Err(ClientError::Envelope(_))
    ));
    assert!(matches!(
      parse_chat_completion(r#"{"choices":[{"message":{"content":null}}]}"#),
      Err(ClientError::Envelope(_))
    ));
  }
}
