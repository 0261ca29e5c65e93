// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{EncodedFrame, FrameError},
  input::InputImage,
  url_file_path,
};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("{}: {}", .path.display(), .source)]
  FrameError { path: PathBuf, source: FrameError },
}

/// 从单个图像文件或目录读取图像
///
/// 目录中只读取 png/jpg/jpeg 文件，按文件名排序，不递归。
pub struct ImageFileInput {
  pending: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(&url_file_path(url))
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
    .unwrap_or(false)
}

impl ImageFileInput {
  pub fn open(path: &Path) -> Result<Self, ImageFileInputError> {
    let pending = if path.is_dir() {
      let mut files = Vec::new();
      for entry in std::fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_file() && is_image_file(&entry_path) {
          files.push(entry_path);
        }
      }
      files.sort();
      debug!("目录 {} 中共有 {} 张图像", path.display(), files.len());
      files.into()
    } else {
      // 提前检查文件是否存在
      std::fs::metadata(path)?;
      VecDeque::from([path.to_path_buf()])
    };

    Ok(Self { pending })
  }

  fn read(path: PathBuf) -> Result<InputImage, ImageFileInputError> {
    let data = std::fs::read(&path)?;
    match EncodedFrame::from_bytes(data) {
      Ok(frame) => Ok(InputImage { path, frame }),
      Err(source) => Err(ImageFileInputError::FrameError { path, source }),
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<InputImage, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.pending.pop_front().map(Self::read)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{DynamicImage, RgbImage};

  fn write_png(path: &Path) {
    DynamicImage::ImageRgb8(RgbImage::new(4, 4)).save(path).unwrap();
  }

  #[test]
  fn reads_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.png");
    write_png(&path);

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file:", "image:", 1)).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    let image = input.next().unwrap().unwrap();
    assert_eq!(image.path, path);
    assert_eq!(image.stem(), "photo");
    assert!(input.next().is_none());
  }

  #[test]
  fn reads_directory_sorted_and_filtered() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("b.png"));
    write_png(&dir.path().join("a.png"));
    std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

    let names: Vec<String> = ImageFileInput::open(dir.path())
      .unwrap()
      .map(|r| r.unwrap().stem())
      .collect();
    assert_eq!(names, vec!["a", "b"]);
  }

  #[test]
  fn corrupt_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    std::fs::write(&path, b"definitely not a png").unwrap();

    let err = ImageFileInput::open(&path).unwrap().next().unwrap().unwrap_err();
    assert!(matches!(err, ImageFileInputError::FrameError { .. }));
    assert!(err.to_string().contains("broken.png"));
  }

  #[test]
  fn missing_file_fails_on_open() {
    assert!(ImageFileInput::open(Path::new("/nonexistent/photo.png")).is_err());
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("video:///tmp/a.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}
