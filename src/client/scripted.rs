// 该文件是 Kanjian （看见） 项目的一部分。
// src/client/scripted.rs - 进程内脚本客户端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use std::sync::atomic::{AtomicUsize, Ordering};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::json;

use crate::{
  client::{ClientError, Message, ModelClient},
  frame::EncodedFrame,
};

/// 脚本客户端收到的一次请求，按消息顺序拆分为图像与文本
#[derive(Debug, Clone, Default)]
pub struct ScriptedRequest {
  pub images: Vec<EncodedFrame>,
  pub texts: Vec<String>,
}

impl ScriptedRequest {
  /// 所有文本消息拼接后的提示词
  pub fn prompt(&self) -> String {
    self.texts.join("\n")
  }
}

type Handler = dyn Fn(&ScriptedRequest) -> Result<String, ClientError> + Send + Sync;

/// 由闭包驱动的模型客户端，不访问网络
///
/// 用于离线测试流水线，闭包根据请求内容决定回复。
pub struct ScriptedClient {
  handler: Box<Handler>,
  calls: AtomicUsize,
}

impl ScriptedClient {
  pub fn new<F>(handler: F) -> Self
  where
    F: Fn(&ScriptedRequest) -> Result<String, ClientError> + Send + Sync + 'static,
  {
    Self {
      handler: Box::new(handler),
      calls: AtomicUsize::new(0),
    }
  }

  /// 对所有请求返回同一回复
  pub fn constant(response: &str) -> Self {
    let response = response.to_string();
    Self::new(move |_| Ok(response.clone()))
  }

  pub fn call_count(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  fn unpack(messages: &[Message]) -> Result<ScriptedRequest, ClientError> {
    let mut request = ScriptedRequest::default();
    for message in messages {
      let value = message.as_value();
      if let Some(text) = value.get("text").and_then(|t| t.as_str()) {
        request.texts.push(text.to_string());
      } else if let Some(data) = value.get("image").and_then(|d| d.as_str()) {
        let bytes = STANDARD
          .decode(data)
          .map_err(|e| ClientError::Scripted(e.to_string()))?;
        let frame =
          EncodedFrame::from_bytes(bytes).map_err(|e| ClientError::Scripted(e.to_string()))?;
        request.images.push(frame);
      } else {
        return Err(ClientError::Scripted(format!("未知的消息: {}", value)));
      }
    }
    Ok(request)
  }
}

impl ModelClient for ScriptedClient {
  fn format_image_message(&self, image: &EncodedFrame) -> Message {
    Message::new(json!({ "image": STANDARD.encode(image) }))
  }

  fn format_text_message(&self, text: &str) -> Message {
    Message::new(json!({ "text": text }))
  }

  fn request_message(&self, messages: &[Message]) -> Result<String, ClientError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let request = Self::unpack(messages)?;
    (self.handler)(&request)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn constant_client_counts_calls() {
    let client = ScriptedClient::constant("cat|dog");
    let prompt = client.format_text_message("list objects");
    assert_eq!(client.request_message(&[prompt.clone()]).unwrap(), "cat|dog");
    assert_eq!(client.request_message(&[prompt]).unwrap(), "cat|dog");
    assert_eq!(client.call_count(), 2);
  }

  #[test]
  fn handler_sees_images_and_texts_in_order() {
    let client = ScriptedClient::new(|request| {
      Ok(format!(
        "{} image(s): {}",
        request.images.len(),
        request.prompt()
      ))
    });
    let image = EncodedFrame::from_image(&image::DynamicImage::new_rgb8(3, 2)).unwrap();
    let messages = [
      client.format_image_message(&image),
      client.format_text_message("where is the cat?"),
    ];
    assert_eq!(
      client.request_message(&messages).unwrap(),
      "1 image(s): where is the cat?"
    );
  }

  #[test]
  fn foreign_messages_are_rejected() {
    let client = ScriptedClient::constant("unused");
    let foreign = Message::new(json!({ "role": "user", "content": "hi" }));
    assert!(matches!(
      client.request_message(&[foreign]),
      Err(ClientError::Scripted(_))
    ));
  }
}
