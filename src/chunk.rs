// 该文件是 Kanjian （看见） 项目的一部分。
// src/chunk.rs - 图像分块
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use std::fmt;
use std::str::FromStr;

use image::DynamicImage;
use thiserror::Error;
use tracing::debug;

use crate::frame::{EncodedFrame, FrameError, FrameKind};

#[derive(Error, Debug)]
pub enum ChunkError {
  #[error("图像错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("切分 {cut} 超出图像尺寸 {width}x{height}")]
  TooManyCuts { cut: Cut, width: u32, height: u32 },
  #[error("原始图像 {raw:?} 与带标签图像 {labeled:?} 尺寸不一致")]
  DimensionMismatch {
    raw: (u32, u32),
    labeled: (u32, u32),
  },
  #[error("无效的切分描述: {0}，应为 VxH 形式，例如 4x3")]
  InvalidCut(String),
}

/// 切分配置：竖直切线数与水平切线数
///
/// 得到 `(vertical + 1) x (horizontal + 1)` 个分块。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cut {
  pub vertical: u32,
  pub horizontal: u32,
}

impl Cut {
  pub const fn new(vertical: u32, horizontal: u32) -> Self {
    Self {
      vertical,
      horizontal,
    }
  }

  pub fn chunk_count(&self) -> usize {
    (self.vertical as usize + 1) * (self.horizontal as usize + 1)
  }
}

impl Default for Cut {
  fn default() -> Self {
    Cut::new(4, 3)
  }
}

impl fmt::Display for Cut {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.vertical, self.horizontal)
  }
}

impl FromStr for Cut {
  type Err = ChunkError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (v, h) = s
      .trim()
      .split_once(['x', 'X'])
      .ok_or_else(|| ChunkError::InvalidCut(s.to_string()))?;
    let parse = |part: &str| {
      part
        .trim()
        .parse::<u32>()
        .map_err(|_| ChunkError::InvalidCut(s.to_string()))
    };
    Ok(Cut::new(parse(v)?, parse(h)?))
  }
}

/// 分块矩形，右、下边界不包含在内
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRect {
  pub left: u32,
  pub top: u32,
  pub right: u32,
  pub bottom: u32,
}

impl ChunkRect {
  pub fn width(&self) -> u32 {
    self.right - self.left
  }

  pub fn height(&self) -> u32 {
    self.bottom - self.top
  }
}

/// 按行优先顺序计算分块矩形，最后一行/列吸收余数像素
pub fn chunk_rects(width: u32, height: u32, cut: Cut) -> Result<Vec<ChunkRect>, ChunkError> {
  let step_x = width / (cut.vertical + 1);
  let step_y = height / (cut.horizontal + 1);
  if step_x == 0 || step_y == 0 {
    return Err(ChunkError::TooManyCuts { cut, width, height });
  }

  let mut rects = Vec::with_capacity(cut.chunk_count());
  for i in 0..=cut.horizontal {
    for j in 0..=cut.vertical {
      rects.push(ChunkRect {
        left: j * step_x,
        top: i * step_y,
        right: if j == cut.vertical {
          width
        } else {
          (j + 1) * step_x
        },
        bottom: if i == cut.horizontal {
          height
        } else {
          (i + 1) * step_y
        },
      });
    }
  }
  Ok(rects)
}

/// 将图像按切分配置裁剪并重新编码
pub fn chunkize(image: &DynamicImage, cut: Cut) -> Result<Vec<(ChunkRect, EncodedFrame)>, ChunkError> {
  chunk_rects(image.width(), image.height(), cut)?
    .into_iter()
    .map(|rect| {
      let cropped = image.crop_imm(rect.left, rect.top, rect.width(), rect.height());
      Ok((rect, EncodedFrame::from_image(&cropped)?))
    })
    .collect()
}

/// 空间对齐的原始分块与带标签分块
#[derive(Debug, Clone)]
pub struct ChunkPair {
  /// 在所有切分配置拼接后的序号
  pub index: usize,
  pub cut: Cut,
  pub rect: ChunkRect,
  pub raw: EncodedFrame,
  pub labeled: EncodedFrame,
}

impl ChunkPair {
  pub fn frame(&self, kind: FrameKind) -> &EncodedFrame {
    match kind {
      FrameKind::Raw => &self.raw,
      FrameKind::Labeled => &self.labeled,
    }
  }
}

/// 对原始图像与带标签图像应用同样的切分配置，依次拼接所有分块对
pub fn chunk_pairs(
  raw: &EncodedFrame,
  labeled: &EncodedFrame,
  cuts: &[Cut],
) -> Result<Vec<ChunkPair>, ChunkError> {
  let raw = raw.decode()?;
  let labeled = labeled.decode()?;
  if raw.width() != labeled.width() || raw.height() != labeled.height() {
    return Err(ChunkError::DimensionMismatch {
      raw: (raw.width(), raw.height()),
      labeled: (labeled.width(), labeled.height()),
    });
  }

  let mut pairs = Vec::with_capacity(cuts.iter().map(Cut::chunk_count).sum());
  for &cut in cuts {
    let raw_chunks = chunkize(&raw, cut)?;
    let labeled_chunks = chunkize(&labeled, cut)?;
    debug!("切分 {} 得到 {} 个分块", cut, raw_chunks.len());

    for ((rect, raw), (_, labeled)) in raw_chunks.into_iter().zip(labeled_chunks) {
      pairs.push(ChunkPair {
        index: pairs.len(),
        cut,
        rect,
        raw,
        labeled,
      });
    }
  }
  Ok(pairs)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn assert_exact_cover(width: u32, height: u32, rects: &[ChunkRect]) {
    let mut hits = vec![0u8; (width * height) as usize];
    for rect in rects {
      for y in rect.top..rect.bottom {
        for x in rect.left..rect.right {
          hits[(y * width + x) as usize] += 1;
        }
      }
    }
    assert!(hits.iter().all(|&h| h == 1), "分块存在缝隙或重叠");
  }

  #[test]
  fn rects_cover_image_without_overlap() {
    for &(w, h) in &[(10, 10), (101, 37), (640, 480), (7, 5)] {
      for &cut in &[Cut::new(0, 0), Cut::new(1, 0), Cut::new(4, 3), Cut::new(2, 4)] {
        let rects = chunk_rects(w, h, cut).unwrap();
        assert_eq!(rects.len(), cut.chunk_count());
        assert_exact_cover(w, h, &rects);
      }
    }
  }

  #[test]
  fn last_row_and_column_absorb_remainder() {
    let rects = chunk_rects(103, 50, Cut::new(4, 1)).unwrap();
    // step_x = 20, step_y = 25
    assert_eq!(rects[0], ChunkRect { left: 0, top: 0, right: 20, bottom: 25 });
    assert_eq!(rects[4], ChunkRect { left: 80, top: 0, right: 103, bottom: 25 });
    assert_eq!(rects[5], ChunkRect { left: 0, top: 25, right: 20, bottom: 50 });
  }

  #[test]
  fn too_many_cuts_is_an_error() {
    assert!(matches!(
      chunk_rects(3, 3, Cut::new(4, 0)),
      Err(ChunkError::TooManyCuts { .. })
    ));
  }

  #[test]
  fn cut_parsing() {
    assert_eq!("4x3".parse::<Cut>().unwrap(), Cut::new(4, 3));
    assert_eq!(" 1X0 ".parse::<Cut>().unwrap(), Cut::new(1, 0));
    assert!("4,3".parse::<Cut>().is_err());
    assert!("ax3".parse::<Cut>().is_err());
    assert_eq!(Cut::default().to_string(), "4x3");
  }

  #[test]
  fn pairs_are_aligned_and_concatenated() {
    let raw = EncodedFrame::from_image(&DynamicImage::ImageRgb8(RgbImage::from_pixel(
      60,
      40,
      Rgb([0, 0, 0]),
    )))
    .unwrap();
    let labeled = EncodedFrame::from_image(&DynamicImage::ImageRgb8(RgbImage::from_pixel(
      60,
      40,
      Rgb([255, 255, 255]),
    )))
    .unwrap();

    let pairs = chunk_pairs(&raw, &labeled, &[Cut::new(0, 0), Cut::new(2, 1)]).unwrap();
    assert_eq!(pairs.len(), 1 + 6);
    for (i, pair) in pairs.iter().enumerate() {
      assert_eq!(pair.index, i);
      let r = pair.raw.decode().unwrap();
      let l = pair.labeled.decode().unwrap();
      assert_eq!((r.width(), r.height()), (pair.rect.width(), pair.rect.height()));
      assert_eq!((r.width(), r.height()), (l.width(), l.height()));
    }
    let pixel = |kind| *pairs[2].frame(kind).decode().unwrap().to_rgb8().get_pixel(0, 0);
    assert_eq!(pixel(FrameKind::Raw), Rgb([0, 0, 0]));
    assert_eq!(pixel(FrameKind::Labeled), Rgb([255, 255, 255]));
    assert_eq!(pairs[0].cut, Cut::new(0, 0));
    assert_eq!(pairs[3].rect, ChunkRect { left: 40, top: 0, right: 60, bottom: 20 });
  }

  #[test]
  fn mismatched_variants_are_rejected() {
    let a = EncodedFrame::from_image(&DynamicImage::ImageRgb8(RgbImage::new(10, 10))).unwrap();
    let b = EncodedFrame::from_image(&DynamicImage::ImageRgb8(RgbImage::new(10, 12))).unwrap();
    assert!(matches!(
      chunk_pairs(&a, &b, &[Cut::default()]),
      Err(ChunkError::DimensionMismatch { .. })
    ));
  }
}
