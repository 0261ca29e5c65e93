// 该文件是 Kanjian （看见） 项目的一部分。
// src/label.rs - 坐标标签网格绘制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ab_glyph::{FontRef, PxScale};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{Blend, draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::{EncodedFrame, FrameError};

// 标签网格默认参数
const LABEL_INCREMENT: u32 = 30;
const LABEL_PADDING: u32 = 10;
const LABEL_FONT_SIZE: f32 = 11.0;
const LABEL_BACKGROUND: [u8; 4] = [255, 255, 255, 150]; // 半透明白色

pub(crate) static FONT_DATA: &[u8] = include_bytes!("../assets/font.ttf");

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("图像错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("字体加载错误")]
  FontError,
  #[error("标签间距必须大于 0")]
  ZeroIncrement,
  #[error("无效的字体颜色: {0}")]
  InvalidColor(String),
}

/// 标签文字颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontColor([u8; 3]);

impl FontColor {
  pub const MAGENTA: FontColor = FontColor([255, 0, 255]);

  pub fn rgb(&self) -> [u8; 3] {
    self.0
  }
}

impl Default for FontColor {
  fn default() -> Self {
    FontColor::MAGENTA
  }
}

impl FromStr for FontColor {
  type Err = LabelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let name = s.trim().to_lowercase();
    let rgb = match name.as_str() {
      "black" => [0, 0, 0],
      "white" => [255, 255, 255],
      "red" => [255, 0, 0],
      "green" => [0, 128, 0],
      "blue" => [0, 0, 255],
      "yellow" => [255, 255, 0],
      "cyan" => [0, 255, 255],
      "magenta" => [255, 0, 255],
      "orange" => [255, 165, 0],
      "purple" => [128, 0, 128],
      hex if hex.len() == 7 && hex.starts_with('#') => {
        let channel = |i: usize| {
          u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| LabelError::InvalidColor(s.to_string()))
        };
        [channel(1)?, channel(3)?, channel(5)?]
      }
      _ => return Err(LabelError::InvalidColor(s.to_string())),
    };
    Ok(FontColor(rgb))
  }
}

/// 标签网格配置
#[derive(Debug, Clone)]
pub struct LabelConfig {
  /// 相邻标签点之间的像素间距
  pub increment: u32,
  /// 图像四周不绘制标签的边距
  pub padding: u32,
  pub font_size: f32,
  pub font_color: FontColor,
}

impl Default for LabelConfig {
  fn default() -> Self {
    Self {
      increment: LABEL_INCREMENT,
      padding: LABEL_PADDING,
      font_size: LABEL_FONT_SIZE,
      font_color: FontColor::default(),
    }
  }
}

/// 标签到像素坐标的映射，构建后只读
///
/// 标签为从 0 开始的连续整数。x 方向为外层循环、y 方向为内层循环，
/// 因此标签沿 y 轴（向下）增长最快：标签 `n` 位于第 `n / rows` 列、第 `n % rows` 行。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
  points: Box<[(u32, u32)]>,
  rows: usize,
  columns: usize,
}

impl LabelMap {
  /// 只接受规范的十进制写法（"7" 可以，"07" 与 "+7" 不行）
  fn index_of(label: &str) -> Option<usize> {
    let index: usize = label.parse().ok()?;
    (index.to_string() == label).then_some(index)
  }

  pub fn get(&self, label: &str) -> Option<(u32, u32)> {
    Self::index_of(label).and_then(|i| self.points.get(i).copied())
  }

  pub fn contains(&self, label: &str) -> bool {
    self.get(label).is_some()
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn columns(&self) -> usize {
    self.columns
  }

  /// 按标签顺序遍历
  pub fn iter(&self) -> impl Iterator<Item = (String, (u32, u32))> + '_ {
    self
      .points
      .iter()
      .enumerate()
      .map(|(i, point)| (i.to_string(), *point))
  }
}

fn grid_axis(padding: u32, extent: u32, increment: u32) -> Vec<u32> {
  (padding..extent.saturating_sub(padding))
    .step_by(increment as usize)
    .collect()
}

/// 计算标签网格坐标，不涉及绘制
pub fn grid_points(width: u32, height: u32, config: &LabelConfig) -> Result<LabelMap, LabelError> {
  if config.increment == 0 {
    return Err(LabelError::ZeroIncrement);
  }

  let xs = grid_axis(config.padding, width, config.increment);
  let ys = grid_axis(config.padding, height, config.increment);

  let mut points = Vec::with_capacity(xs.len() * ys.len());
  for &x in &xs {
    for &y in &ys {
      points.push((x, y));
    }
  }

  Ok(LabelMap {
    points: points.into_boxed_slice(),
    rows: ys.len(),
    columns: xs.len(),
  })
}

pub struct Labeler {
  config: LabelConfig,
  font: FontRef<'static>,
  labeled_output: Option<PathBuf>,
}

impl Labeler {
  pub fn new(config: LabelConfig) -> Result<Self, LabelError> {
    if config.increment == 0 {
      return Err(LabelError::ZeroIncrement);
    }
    let font = FontRef::try_from_slice(FONT_DATA).map_err(|_| LabelError::FontError)?;

    Ok(Self {
      config,
      font,
      labeled_output: None,
    })
  }

  /// 额外保存一份带标签的图像，仅用于人工检查
  pub fn with_labeled_output(mut self, path: Option<PathBuf>) -> Self {
    self.labeled_output = path;
    self
  }

  pub fn config(&self) -> &LabelConfig {
    &self.config
  }

  /// 在图像副本上绘制标签网格，返回标签映射与带标签的图像
  pub fn label_image(&self, frame: &EncodedFrame) -> Result<(LabelMap, EncodedFrame), LabelError> {
    let image = frame.decode()?.to_rgba8();
    let (width, height) = image.dimensions();
    let labels = grid_points(width, height, &self.config)?;
    debug!(
      "标签网格: {} 列 x {} 行, 共 {} 个标签",
      labels.columns(),
      labels.rows(),
      labels.len()
    );

    let image = self.draw_labels(image, &labels);

    if let Some(path) = &self.labeled_output {
      // 调试产物，保存失败不影响检测
      if let Err(e) = save_labeled_image(&image, path) {
        warn!("保存带标签图像失败: {}", e);
      } else {
        info!("带标签图像已保存到: {}", path.display());
      }
    }

    let labeled = EncodedFrame::from_image(&DynamicImage::ImageRgba8(image))?;
    Ok((labels, labeled))
  }

  fn draw_labels(&self, image: RgbaImage, labels: &LabelMap) -> RgbaImage {
    let scale = PxScale::from(self.config.font_size);
    let [r, g, b] = self.config.font_color.rgb();
    let text_color = Rgba([r, g, b, 255]);

    let mut canvas = Blend(image);
    for (label, (x, y)) in labels.iter() {
      let (text_width, text_height) = text_size(scale, &self.font, &label);
      let rect = Rect::at(x as i32, y as i32).of_size(text_width.max(1), text_height.max(1));
      draw_filled_rect_mut(&mut canvas, rect, Rgba(LABEL_BACKGROUND));
      draw_text_mut(
        &mut canvas.0,
        text_color,
        x as i32,
        y as i32,
        scale,
        &self.font,
        &label,
      );
    }
    canvas.0
  }
}

fn save_labeled_image(image: &RgbaImage, path: &Path) -> Result<(), image::ImageError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).map_err(image::ImageError::IoError)?;
  }
  image.save_with_format(path, image::ImageFormat::Png)
}
