// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use std::path::{Path, PathBuf};

use crate::FromUrl;
#[cfg(any(feature = "save_image_file", feature = "json_record"))]
use crate::FromUrlWithScheme;
use crate::detector::DetectResult;
use crate::input::InputImage;
use thiserror::Error;
use url::Url;

pub trait Render<Input, Output>: Sized {
  type Error;
  fn render_result(&self, input: &Input, result: &Output) -> Result<(), Self::Error>;
}

pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "json_record")]
mod json_record;
#[cfg(feature = "json_record")]
pub use self::json_record::{JsonRecordError, JsonRecordOutput};

/// 输出目标：单个文件，或按输入文件名逐个写入的目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutputTarget {
  File(PathBuf),
  Directory(PathBuf),
}

impl OutputTarget {
  /// 以 `/` 结尾或已存在的目录视为目录
  pub(crate) fn from_url(url: &Url) -> Self {
    let path = crate::url_file_path(url);
    if url.path().ends_with('/') || path.is_dir() {
      OutputTarget::Directory(path)
    } else {
      OutputTarget::File(path)
    }
  }

  pub(crate) fn resolve(&self, stem: &str, extension: &str) -> PathBuf {
    match self {
      OutputTarget::File(path) => path.clone(),
      OutputTarget::Directory(dir) => dir.join(format!("{}.{}", stem, extension)),
    }
  }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<(), std::io::Error> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  Ok(())
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "json_record")]
  #[error("JSON 记录输出错误: {0}")]
  JsonRecordError(#[from] JsonRecordError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "json_record")]
  JsonRecordOutput(JsonRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "save_image_file")]
    {
      if url.scheme() == SaveImageFileOutput::SCHEME {
        let output = SaveImageFileOutput::from_url(url)?;
        return Ok(OutputWrapper::SaveImageFileOutput(output));
      }
    }
    #[cfg(feature = "json_record")]
    {
      if url.scheme() == JsonRecordOutput::SCHEME {
        let output = JsonRecordOutput::from_url(url)?;
        return Ok(OutputWrapper::JsonRecordOutput(output));
      }
    }
    let _ = url;
    Err(OutputError::SchemeMismatch)
  }
}

impl Render<InputImage, DetectResult> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, input: &InputImage, result: &DetectResult) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(input, result)
        .map_err(OutputError::from),
      #[cfg(feature = "json_record")]
      OutputWrapper::JsonRecordOutput(output) => output
        .render_result(input, result)
        .map_err(OutputError::from),
      #[allow(unreachable_patterns)]
      _ => {
        let _ = (input, result);
        Err(OutputError::SchemeMismatch)
      }
    }
  }
}
