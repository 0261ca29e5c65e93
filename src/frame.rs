// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - 编码图像定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("无法识别的图像格式")]
  UnknownFormat,
  #[error("不支持的图像格式: {0:?}")]
  UnsupportedFormat(ImageFormat),
  #[error("图像解码错误: {0}")]
  DecodeError(image::ImageError),
  #[error("图像编码错误: {0}")]
  EncodeError(image::ImageError),
}

/// 图像的两种逻辑形态：原始图像与叠加了坐标标签的图像
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
  Raw,
  Labeled,
}

/// 编码后的栅格图像（字节负载 + 声明的格式）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
  data: Box<[u8]>,
  format: ImageFormat,
}

const SUPPORTED_FORMATS: [ImageFormat; 2] = [ImageFormat::Png, ImageFormat::Jpeg];

impl EncodedFrame {
  /// 根据文件头猜测格式
  pub fn from_bytes(data: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
    let data = data.into();
    let format = image::guess_format(&data).map_err(|_| FrameError::UnknownFormat)?;
    Self::with_format(data, format)
  }

  pub fn with_format(data: impl Into<Vec<u8>>, format: ImageFormat) -> Result<Self, FrameError> {
    if !SUPPORTED_FORMATS.contains(&format) {
      return Err(FrameError::UnsupportedFormat(format));
    }

    Ok(Self {
      data: data.into().into_boxed_slice(),
      format,
    })
  }

  /// 将解码后的图像重新编码为 PNG
  pub fn from_image(image: &DynamicImage) -> Result<Self, FrameError> {
    let mut buffer = Cursor::new(Vec::new());
    image
      .write_to(&mut buffer, ImageFormat::Png)
      .map_err(FrameError::EncodeError)?;

    Ok(Self {
      data: buffer.into_inner().into_boxed_slice(),
      format: ImageFormat::Png,
    })
  }

  pub fn decode(&self) -> Result<DynamicImage, FrameError> {
    image::load_from_memory_with_format(&self.data, self.format).map_err(FrameError::DecodeError)
  }

  pub fn format(&self) -> ImageFormat {
    self.format
  }

  pub fn mime_type(&self) -> &'static str {
    self.format.to_mime_type()
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

impl AsRef<[u8]> for EncodedFrame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}
