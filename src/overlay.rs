// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/overlay.rs - 检测结果叠加绘制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::warn;

use crate::model::Detection;

/// 中心点标记半径（像素）
const MARKER_RADIUS: i32 = 5;
/// 轨迹点半径（像素）
const TRAIL_RADIUS: i32 = 2;
/// 标签字体大小
const LABEL_FONT_SIZE: f32 = 16.0;

/// 常见系统字体位置，按顺序探测
const FONT_SEARCH_PATHS: [&str; 4] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/System/Library/Fonts/Helvetica.ttc",
];

#[derive(Error, Debug)]
pub enum OverlayError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法加载字体文件: {0}")]
  FontError(String),
}

/// 叠加绘制工具
///
/// 为每个检测结果绘制边界框、中心点标记与置信度标签；
/// 可选地绘制最近的中心点轨迹。
pub struct Painter {
  /// 标签字体；缺失时跳过标签，只画框与标记
  font: Option<FontArc>,
  font_scale: PxScale,
  /// 边界框颜色映射（按类别）
  colors: Vec<Rgb<u8>>,
}

impl Default for Painter {
  fn default() -> Self {
    Self::new()
  }
}

impl Painter {
  /// 创建一个不带字体的绘制工具
  pub fn new() -> Self {
    // 生成 80 种不同的颜色（对应 COCO 数据集的 80 个类别）
    let colors: Vec<Rgb<u8>> = (0..80)
      .map(|i| {
        let hue = (i as f32 / 80.0) * 360.0;
        Self::hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      colors,
    }
  }

  /// 从指定字体文件创建
  pub fn with_font_file(path: &Path) -> Result<Self, OverlayError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)
      .map_err(|_| OverlayError::FontError(path.display().to_string()))?;
    let mut painter = Self::new();
    painter.font = Some(font);
    Ok(painter)
  }

  /// 探测常见系统字体；找不到时退化为无标签绘制并告警一次
  pub fn with_system_font() -> Self {
    for path in FONT_SEARCH_PATHS {
      if let Ok(painter) = Self::with_font_file(Path::new(path)) {
        return painter;
      }
    }
    warn!("未找到可用字体，检测标签将不会绘制");
    Self::new()
  }

  /// HSV 转 RGB
  fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
      (c, x, 0.0)
    } else if h < 120.0 {
      (x, c, 0.0)
    } else if h < 180.0 {
      (0.0, c, x)
    } else if h < 240.0 {
      (0.0, x, c)
    } else if h < 300.0 {
      (x, 0.0, c)
    } else {
      (c, 0.0, x)
    };

    Rgb([
      ((r + m) * 255.0) as u8,
      ((g + m) * 255.0) as u8,
      ((b + m) * 255.0) as u8,
    ])
  }

  /// 类别对应的颜色
  pub fn class_color(&self, class_id: usize) -> Rgb<u8> {
    self.colors[class_id % self.colors.len()]
  }

  /// 标签文本：类别名与两位小数的置信度
  pub fn label(detection: &Detection) -> String {
    format!("{}: {:.2}", detection.class_name(), detection.confidence)
  }

  /// 在图像上绘制检测结果
  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      let color = self.class_color(detection.class_id);

      // 绘制边界框
      let x = detection.bbox[0].max(0.0) as i32;
      let y = detection.bbox[1].max(0.0) as i32;
      let width = (detection.bbox[2] - detection.bbox[0])
        .min(image.width() as f32 - detection.bbox[0]) as u32;
      let height = (detection.bbox[3] - detection.bbox[1])
        .min(image.height() as f32 - detection.bbox[1]) as u32;

      if width > 0 && height > 0 {
        let rect = Rect::at(x, y).of_size(width, height);
        draw_hollow_rect_mut(image, rect, color);

        // 绘制第二个边框以增加可见度
        if x > 0 && y > 0 {
          let inner_rect =
            Rect::at(x + 1, y + 1).of_size(width.saturating_sub(2), height.saturating_sub(2));
          draw_hollow_rect_mut(image, inner_rect, color);
        }
      }

      // 绘制中心点标记
      draw_filled_circle_mut(image, detection.center(), MARKER_RADIUS, color);

      // 绘制标签
      if let Some(font) = &self.font {
        let label = Self::label(detection);
        let text_y = (y - 20).max(0);
        draw_text_mut(image, color, x, text_y, self.font_scale, font, &label);
      }
    }
  }

  /// 绘制中心点轨迹
  pub fn draw_trail<'a>(
    &self,
    image: &mut RgbImage,
    centers: impl Iterator<Item = &'a (i32, i32)>,
  ) {
    let color = Rgb([255u8, 255u8, 255u8]);
    for &(cx, cy) in centers {
      draw_filled_circle_mut(image, (cx, cy), TRAIL_RADIUS, color);
    }
  }
}
