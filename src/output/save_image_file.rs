// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/save_image_file.rs - 保存标注后的图像文件
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::DetectResult,
  frame::FrameError,
  input::InputImage,
  output::{OutputTarget, Render, draw::Draw, ensure_parent},
};

pub struct SaveImageFileOutput {
  target: OutputTarget,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("输入图像错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      target: OutputTarget::from_url(uri),
      draw: Draw::default(),
    })
  }
}

impl Render<InputImage, DetectResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, input: &InputImage, result: &DetectResult) -> Result<(), Self::Error> {
    let mut image = input.frame.decode()?.to_rgb8();
    self.draw.draw_detections_on_image(&mut image, result);

    let path = self.target.resolve(&input.stem(), "png");
    ensure_parent(&path)?;
    image.save(&path)?;

    info!("保存图像到文件: {}", path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::{DetectItem, DetectStats};
  use crate::frame::EncodedFrame;
  use image::{DynamicImage, RgbImage};

  #[test]
  fn saves_into_directory_by_stem() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("image://{}/out/", dir.path().display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let input = InputImage {
      path: "/photos/kitchen.jpg".into(),
      frame: EncodedFrame::from_image(&DynamicImage::ImageRgb8(RgbImage::new(64, 48))).unwrap(),
    };
    let result = DetectResult {
      items: vec![DetectItem {
        name: "mug".into(),
        label: "4".into(),
        x: 20,
        y: 20,
      }]
      .into_boxed_slice(),
      stats: DetectStats::default(),
    };
    output.render_result(&input, &result).unwrap();

    let saved = image::open(dir.path().join("out").join("kitchen.png")).unwrap();
    assert_eq!((saved.width(), saved.height()), (64, 48));
  }
}
