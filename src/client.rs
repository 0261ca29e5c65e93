// 该文件是 Kanjian （看见） 项目的一部分。
// src/client.rs - 多模态语言模型客户端定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::EncodedFrame};

const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Error, Debug)]
pub enum ClientError {
  #[error("网络请求错误: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("服务返回错误状态 {status}: {body}")]
  Status { status: u16, body: String },
  #[error("响应格式错误: {0}")]
  Envelope(String),
  #[error("响应内容为空")]
  EmptyResponse,
  #[error("重试 {attempts} 次后仍然失败: {last}")]
  RetriesExhausted {
    attempts: u32,
    last: Box<ClientError>,
  },
  #[error("缺少凭据，请设置环境变量 {0}")]
  MissingCredential(&'static str),
  #[error("客户端配置错误: {0}")]
  Config(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("脚本客户端错误: {0}")]
  Scripted(String),
}

/// 发往模型的一条消息
///
/// 负载格式由产生它的后端决定，调用方不应解析其内容。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Message(serde_json::Value);

impl Message {
  pub(crate) fn new(value: serde_json::Value) -> Self {
    Self(value)
  }

  pub(crate) fn as_value(&self) -> &serde_json::Value {
    &self.0
  }
}

/// 多模态语言模型的统一请求接口
pub trait ModelClient: Send + Sync {
  fn format_image_message(&self, image: &EncodedFrame) -> Message;

  fn format_text_message(&self, text: &str) -> Message;

  /// 同步发送请求并返回纯文本回复；内部按重试策略重试，耗尽后返回错误
  fn request_message(&self, messages: &[Message]) -> Result<String, ClientError>;
}

/// 有上限的重试策略，共尝试 `max_retries + 1` 次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: DEFAULT_MAX_RETRIES,
    }
  }
}

impl RetryPolicy {
  pub fn new(max_retries: u32) -> Self {
    Self { max_retries }
  }

  pub fn from_url(url: &Url) -> Result<Self, ClientError> {
    let max_retries = crate::query_param(url, "max_retries")
      .map_err(ClientError::Config)?
      .unwrap_or(DEFAULT_MAX_RETRIES);
    Ok(Self { max_retries })
  }

  pub fn run<T>(
    &self,
    mut attempt: impl FnMut(u32) -> Result<T, ClientError>,
  ) -> Result<T, ClientError> {
    let mut n = 0;
    loop {
      match attempt(n) {
        Ok(value) => return Ok(value),
        Err(e) if n >= self.max_retries => {
          return Err(ClientError::RetriesExhausted {
            attempts: n + 1,
            last: Box::new(e),
          });
        }
        Err(e) => {
          warn!("第 {} 次请求失败，准备重试: {}", n + 1, e);
          n += 1;
        }
      }
    }
  }
}

pub(crate) fn timeout_from_url(url: &Url, default_secs: u64) -> Result<std::time::Duration, ClientError> {
  let secs = crate::query_param(url, "timeout")
    .map_err(ClientError::Config)?
    .unwrap_or(default_secs);
  Ok(std::time::Duration::from_secs(secs))
}

pub(crate) fn check_response(
  response: reqwest::blocking::Response,
) -> Result<String, ClientError> {
  let status = response.status();
  if !status.is_success() {
    let body = response.text().unwrap_or_default();
    return Err(ClientError::Status {
      status: status.as_u16(),
      body,
    });
  }
  Ok(response.text()?)
}

mod gemini;
mod openai;
mod scripted;
pub use self::gemini::{GeminiClient, GeminiConfig};
pub use self::openai::{OpenAiClient, OpenAiConfig};
pub use self::scripted::{ScriptedClient, ScriptedRequest};

/// 根据 URL 方案创建对应的模型客户端
pub fn client_from_url(url: &Url) -> Result<Arc<dyn ModelClient>, ClientError> {
  match url.scheme() {
    GeminiClient::SCHEME => Ok(Arc::new(GeminiClient::from_url(url)?)),
    OpenAiClient::SCHEME => Ok(Arc::new(OpenAiClient::from_url(url)?)),
    other => Err(ClientError::SchemeMismatch(format!(
      "不支持的模型方案 '{}'，可选 '{}' 或 '{}'",
      other,
      GeminiClient::SCHEME,
      OpenAiClient::SCHEME
    ))),
  }
}
