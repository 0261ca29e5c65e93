// 该文件是 Kanjian （看见） 项目的一部分。
// src/client/gemini.rs - Vertex AI Gemini 客户端
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
};

const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-pro-preview-0409";
const GEMINI_DEFAULT_REGION: &str = "us-central1";
const GEMINI_DEFAULT_TIMEOUT_SECS: u64 = 120;
const GEMINI_TOKEN_ENV: &str = "GOOGLE_ACCESS_TOKEN";

/// Gemini 客户端配置，来自 `gemini:///<model>?project=...&region=...`
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
  pub model: String,
  pub project: String,
  pub region: String,
  pub retry: RetryPolicy,
  pub timeout: std::time::Duration,
}

impl GeminiConfig {
  pub fn from_url(url: &Url) -> Result<Self, ClientError> {
    if url.scheme() != GeminiClient::SCHEME {
      return Err(ClientError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        GeminiClient::SCHEME,
        url.scheme()
      )));
    }

    let model = url.path().trim_matches('/');
    let project = url
      .query_pairs()
      .find(|(k, _)| k == "project")
      .map(|(_, v)| v.into_owned())
      .ok_or_else(|| ClientError::Config("Gemini 客户端需要 project 参数".to_string()))?;
    let region = url
      .query_pairs()
      .find(|(k, _)| k == "region")
      .map(|(_, v)| v.into_owned())
      .unwrap_or_else(|| GEMINI_DEFAULT_REGION.to_string());

    Ok(Self {
      model: if model.is_empty() {
        GEMINI_DEFAULT_MODEL.to_string()
      } else {
        model.to_string()
      },
      project,
      region,
      retry: RetryPolicy::from_url(url)?,
      timeout: timeout_from_url(url, GEMINI_DEFAULT_TIMEOUT_SECS)?,
    })
  }

  pub fn endpoint(&self) -> String {
    format!(
      "https://{region}-aiplatform.googleapis.com/v1/projects/{project}/locations/{region}/publishers/google/models/{model}:generateContent",
      region = self.region,
      project = self.project,
      model = self.model
    )
  }
}

pub struct GeminiClient {
  client: reqwest::blocking::Client,
  endpoint: String,
  access_token: String,
  retry: RetryPolicy,
}

impl FromUrlWithScheme for GeminiClient {
  const SCHEME: &'static str = "gemini";
}

impl FromUrl for GeminiClient {
  type Error = ClientError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let config = GeminiConfig::from_url(url)?;
    let access_token =
      std::env::var(GEMINI_TOKEN_ENV).map_err(|_| ClientError::MissingCredential(GEMINI_TOKEN_ENV))?;
    GeminiClient::new(config, access_token)
  }
}

impl GeminiClient {
  pub fn new(config: GeminiConfig, access_token: String) -> Result<Self, ClientError> {
    let client = reqwest::blocking::Client::builder()
      .timeout(config.timeout)
      .build()?;

    Ok(Self {
      client,
      endpoint: config.endpoint(),
      access_token,
      retry: config.retry,
    })
  }

  fn send(&self, body: &GenerateContentRequest) -> Result<String, ClientError> {
    let response = self
      .client
      .post(&self.endpoint)
      .bearer_auth(&self.access_token)
      .json(body)
      .send()?;
    let text = check_response(response)?;
    parse_generate_content(&text)
  }
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
  contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
  role: &'static str,
  parts: &'a [Message],
}

#[derive(Deserialize)]
struct GenerateContentResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
  content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
  #[serde(default)]
  parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
  text: Option<String>,
}

/// 取出 `candidates[0].content.parts[0].text`
fn parse_generate_content(body: &str) -> Result<String, ClientError> {
  let response: GenerateContentResponse =
    serde_json::from_str(body).map_err(|e| ClientError::Envelope(e.to_string()))?;
  let text = response
    .candidates
    .into_iter()
    .next()
    .and_then(|c| c.content.parts.into_iter().next())
    .and_then(|p| p.text)
    .ok_or_else(|| ClientError::Envelope(format!("缺少 candidates[0] 文本: {}", body)))?;

  let text = text.trim();
  if text.is_empty() {
    return Err(ClientError::EmptyResponse);
  }
  Ok(text.to_string())
}

impl ModelClient for GeminiClient {
  fn format_image_message(&self, image: &EncodedFrame) -> Message {
    Message::new(json!({
      "inlineData": {
        "mimeType": image.mime_type(),
        "data": STANDARD.encode(image),
      }
    }))
  }

  fn format_text_message(&self, text: &str) -> Message {
    Message::new(json!({ "text": text }))
  }

  fn request_message(&self, messages: &[Message]) -> Result<String, ClientError> {
    let body = GenerateContentRequest {
      contents: [Content {
        role: "user",
        parts: messages,
      }],
    };
    self.retry.run(|attempt| {
      debug!("Gemini 请求, 第 {} 次尝试", attempt + 1);
      self.send(&body)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn config_from_url_with_defaults() {
    let url = Url::parse("gemini:///?project=demo").unwrap();
    let config = GeminiConfig::from_url(&url).unwrap();
    assert_eq!(config.model, GEMINI_DEFAULT_MODEL);
    assert_eq!(config.region, "us-central1");
    assert_eq!(config.retry, RetryPolicy::default());
    assert_eq!(
      config.endpoint(),
      "https://us-central1-aiplatform.googleapis.com/v1/projects/demo/locations/us-central1/publishers/google/models/gemini-1.5-pro-preview-0409:generateContent"
    );
  }

  #[test]
  fn config_requires_project() {
    let url = Url::parse("gemini:///gemini-1.5-flash").unwrap();
    assert!(matches!(
      GeminiConfig::from_url(&url),
      Err(ClientError::Config(_))
    ));
  }

  #[test]
  fn config_reads_overrides() {
    let url =
      Url::parse("gemini:///gemini-1.5-flash?project=p&region=europe-west4&max_retries=1&timeout=9")
        .unwrap();
    let config = GeminiConfig::from_url(&url).unwrap();
    assert_eq!(config.model, "gemini-1.5-flash");
    assert_eq!(config.region, "europe-west4");
    assert_eq!(config.retry.max_retries, 1);
    assert_eq!(config.timeout, std::time::Duration::from_secs(9));
  }

  #[test]
  fn parses_candidate_text() {
    let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":" cat | dog \n"}]}}]}"#;
    assert_eq!(parse_generate_content(body).unwrap(), "cat | dog");
  }

  #[test]
  fn malformed_envelopes_are_errors() {
    assert!(matches!(
      parse_generate_content(r#"{"error":{"code":429}}"#),
      Err(ClientError::Envelope(_))
    ));
    assert!(matches!(
      parse_generate_content("<html>"),
      Err(ClientError::Envelope(_))
    ));
    assert!(matches!(
      parse_generate_content(r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#),
      Err(ClientError::EmptyResponse)
    ));
  }

  #[test]
  fn messages_use_inline_data_parts() {
    let client = GeminiClient::new(
      GeminiConfig::from_url(&Url::parse("gemini:///?project=p").unwrap()).unwrap(),
      "token".to_string(),
    )
    .unwrap();
    let text = client.format_text_message("hello");
    assert_eq!(text.as_value(), &json!({ "text": "hello" }));

    let image = EncodedFrame::from_image(&image::DynamicImage::new_rgb8(2, 2)).unwrap();
    let message = client.format_image_message(&image);
    assert_eq!(message.as_value()["inlineData"]["mimeType"], "image/png");
    assert_eq!(
      message.as_value()["inlineData"]["data"],
      STANDARD.encode(image.as_ref())
    );
  }
}
