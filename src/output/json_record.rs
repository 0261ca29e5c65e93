// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/json_record.rs - JSON 检测记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use std::io::Write;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::{DetectItem, DetectResult, DetectStats},
  input::InputImage,
  output::{OutputTarget, Render, ensure_parent},
};

#[derive(Error, Debug)]
pub enum JsonRecordError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Record<'a> {
  source: String,
  created_at: String,
  items: &'a [DetectItem],
  stats: DetectStats,
}

/// `json:` 或 `json:-` 写到标准输出，`json:///dir/` 按输入文件名写入目录，其余写入单个文件
pub struct JsonRecordOutput {
  target: Option<OutputTarget>,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonRecordError::SchemeMismatch);
    }

    let target = match uri.path() {
      "" | "-" => None,
      _ => Some(OutputTarget::from_url(uri)),
    };
    Ok(JsonRecordOutput { target })
  }
}

impl JsonRecordOutput {
  fn record(input: &InputImage, result: &DetectResult) -> Result<String, serde_json::Error> {
    let record = Record {
      source: input.path.display().to_string(),
      created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
      items: &result.items,
      stats: result.stats,
    };
    serde_json::to_string_pretty(&record)
  }
}

impl Render<InputImage, DetectResult> for JsonRecordOutput {
  type Error = JsonRecordError;

  fn render_result(&self, input: &InputImage, result: &DetectResult) -> Result<(), Self::Error> {
    let json = Self::record(input, result)?;

    match &self.target {
      None => {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", json)?;
      }
      Some(target) => {
        let path = target.resolve(&input.stem(), "json");
        ensure_parent(&path)?;
        std::fs::write(&path, json)?;
        info!("检测记录已写入: {}", path.display());
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::EncodedFrame;
  use image::{DynamicImage, RgbImage};

  fn input() -> InputImage {
    InputImage {
      path: "/photos/desk.png".into(),
      frame: EncodedFrame::from_image(&DynamicImage::ImageRgb8(RgbImage::new(4, 4))).unwrap(),
    }
  }

  fn result() -> DetectResult {
    DetectResult {
      items: vec![DetectItem {
        name: "laptop".into(),
        label: "7".into(),
        x: 130,
        y: 40,
      }]
      .into_boxed_slice(),
      stats: DetectStats {
        chunks: 20,
        candidates: 3,
        located: 2,
        verified: 1,
      },
    }
  }

  #[test]
  fn stdout_targets() {
    for url in ["json:", "json:-"] {
      let output = JsonRecordOutput::from_url(&Url::parse(url).unwrap()).unwrap();
      assert!(output.target.is_none());
    }
  }

  #[test]
  fn writes_record_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("result.json");
    let url = Url::parse(&format!("json://{}", path.display())).unwrap();
    let output = JsonRecordOutput::from_url(&url).unwrap();
    output.render_result(&input(), &result()).unwrap();

    let value: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["source"], "/photos/desk.png");
    assert_eq!(value["items"][0]["name"], "laptop");
    assert_eq!(value["items"][0]["x"], 130);
    assert_eq!(value["stats"]["verified"], 1);
    assert!(value["created_at"].as_str().unwrap().ends_with('Z'));
  }
}
