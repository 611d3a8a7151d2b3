// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/display.rs - 显示输出
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::RgbImage;
use thiserror::Error;

/// 缩放策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectPolicy {
  /// 保持宽高比，缩入目标区域
  Fit,
  /// 拉伸填满目标区域
  Stretch,
}

/// 显示输出错误类型
#[derive(Error, Debug)]
pub enum DisplayError {
  #[cfg(feature = "gstreamer_display")]
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gstreamer::glib::Error),
  #[cfg(feature = "gstreamer_display")]
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gstreamer::glib::BoolError),
  #[cfg(feature = "gstreamer_display")]
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gstreamer::StateChangeError),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区创建错误")]
  BufferCreationError,
}

/// 显示汇 trait
///
/// 接收标注后的帧并呈现到屏幕；缩放与像素格式转换由实现负责。
pub trait DisplaySink {
  /// 显示一帧图像，缩放到 `target` 尺寸
  fn show(
    &mut self,
    image: &RgbImage,
    target: (u32, u32),
    policy: AspectPolicy,
  ) -> Result<(), DisplayError>;
}

/// 计算缩放后的尺寸
pub fn fit_within(source: (u32, u32), target: (u32, u32), policy: AspectPolicy) -> (u32, u32) {
  match policy {
    AspectPolicy::Stretch => target,
    AspectPolicy::Fit => {
      let ratio =
        (target.0 as f64 / source.0 as f64).min(target.1 as f64 / source.1 as f64);
      (
        ((source.0 as f64 * ratio).round() as u32).max(1),
        ((source.1 as f64 * ratio).round() as u32).max(1),
      )
    }
  }
}

/// 按策略缩放图像
pub fn scale_for_display(image: &RgbImage, target: (u32, u32), policy: AspectPolicy) -> RgbImage {
  let (width, height) = fit_within((image.width(), image.height()), target, policy);
  if (width, height) == (image.width(), image.height()) {
    return image.clone();
  }
  image::imageops::resize(image, width, height, image::imageops::FilterType::Triangle)
}

/// RGB 转 BGR（显示管道的通道顺序）
pub fn rgb_to_bgr(image: &RgbImage) -> Vec<u8> {
  let mut data = Vec::with_capacity((image.width() * image.height() * 3) as usize);
  for pixel in image.pixels() {
    data.push(pixel[2]);
    data.push(pixel[1]);
    data.push(pixel[0]);
  }
  data
}

#[cfg(feature = "gstreamer_display")]
mod gstreamer_display;
#[cfg(feature = "gstreamer_display")]
pub use self::gstreamer_display::GStreamerDisplaySink;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fit_preserves_aspect_ratio() {
    // 1280x720 缩入 960x540：等比例，正好贴合
    assert_eq!(fit_within((1280, 720), (960, 540), AspectPolicy::Fit), (960, 540));
    // 640x480 缩入 960x540：受高度约束
    assert_eq!(fit_within((640, 480), (960, 540), AspectPolicy::Fit), (720, 540));
    // 窄高图受宽度约束
    assert_eq!(fit_within((100, 400), (200, 200), AspectPolicy::Fit), (50, 200));
  }

  #[test]
  fn stretch_ignores_aspect_ratio() {
    assert_eq!(
      fit_within((640, 480), (960, 540), AspectPolicy::Stretch),
      (960, 540)
    );
  }

  #[test]
  fn fit_never_collapses_to_zero() {
    let (w, h) = fit_within((10000, 1), (100, 100), AspectPolicy::Fit);
    assert!(w >= 1 && h >= 1);
  }

  #[test]
  fn rgb_to_bgr_swaps_channels() {
    let mut image = RgbImage::new(1, 2);
    image.put_pixel(0, 0, image::Rgb([1, 2, 3]));
    image.put_pixel(0, 1, image::Rgb([4, 5, 6]));

    assert_eq!(rgb_to_bgr(&image), vec![3, 2, 1, 6, 5, 4]);
  }

  #[test]
  fn scale_for_display_is_identity_at_same_size() {
    let image = RgbImage::new(64, 48);
    let scaled = scale_for_display(&image, (64, 48), AspectPolicy::Fit);
    assert_eq!(scaled.dimensions(), (64, 48));
  }
}
