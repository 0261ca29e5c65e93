// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detector::{DetectItem, DetectResult};
use crate::label::FONT_DATA;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_PADDING: i32 = 2;
const MARKER_RADIUS: i32 = 5;
const MARKER_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色

pub struct Draw {
  font_size: f32,
  marker_radius: i32,
  marker_color: [u8; 3],
  font: FontRef<'static>,
}

impl Default for Draw {
  fn default() -> Self {
    let font = FontRef::try_from_slice(FONT_DATA).expect("无法加载嵌入的字体文件");

    Self {
      font_size: LABEL_FONT_SIZE,
      marker_radius: MARKER_RADIUS,
      marker_color: MARKER_COLOR,
      font,
    }
  }
}

impl Draw {
  pub fn with_marker_color(mut self, color: [u8; 3]) -> Self {
    self.marker_color = color;
    self
  }

  // 在检测坐标处绘制圆点，并在右侧写上 "名称 #标签"
  fn draw_item(&self, image: &mut RgbImage, item: &DetectItem) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let (x, y) = (item.x as i32, item.y as i32);
    let color = Rgb(self.marker_color);

    draw_filled_circle_mut(image, (x, y), self.marker_radius, color);

    let text = format!("{} #{}", item.name, item.label);
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, &self.font, &text);
    let label_width = text_width as i32 + 2 * LABEL_TEXT_PADDING;
    let label_height = text_height as i32 + 2 * LABEL_TEXT_PADDING;

    // 右侧放不下时改放左侧，并保持在图像内
    let mut label_x = x + self.marker_radius + 2;
    if label_x + label_width > w {
      label_x = x - self.marker_radius - 2 - label_width;
    }
    let label_x = label_x.clamp(0, (w - 1).max(0));
    let label_y = (y - label_height / 2).clamp(0, (h - label_height).max(0));

    let label_width = label_width.min(w - label_x);
    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb([255u8, 255u8, 255u8]),
      label_x + LABEL_TEXT_PADDING,
      label_y + LABEL_TEXT_PADDING,
      scale,
      &self.font,
      &text,
    );
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    for item in result.items.iter() {
      self.draw_item(image, item);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::DetectStats;

  fn result(items: Vec<DetectItem>) -> DetectResult {
    DetectResult {
      items: items.into_boxed_slice(),
      stats: DetectStats::default(),
    }
  }

  #[test]
  fn marks_detected_coordinates() {
    let mut image = RgbImage::from_pixel(200, 100, Rgb([0, 0, 0]));
    let item = DetectItem {
      name: "cat".into(),
      label: "3".into(),
      x: 40,
      y: 50,
    };
    Draw::default().draw_detections_on_image(&mut image, &result(vec![item]));
    assert_eq!(*image.get_pixel(40, 50), Rgb(MARKER_COLOR));
    assert_eq!(*image.get_pixel(199, 0), Rgb([0, 0, 0]));
  }

  #[test]
  fn items_near_edges_do_not_panic() {
    let mut image = RgbImage::new(30, 20);
    let items = vec![
      DetectItem {
        name: "a rather long object name".into(),
        label: "0".into(),
        x: 29,
        y: 19,
      },
      DetectItem {
        name: "corner".into(),
        label: "1".into(),
        x: 0,
        y: 0,
      },
    ];
    Draw::default()
      .with_marker_color([255, 0, 0])
      .draw_detections_on_image(&mut image, &result(items));
    assert_eq!(*image.get_pixel(0, 0), Rgb([255, 0, 0]));
  }
}
