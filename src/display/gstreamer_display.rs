// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/display/gstreamer_display.rs - GStreamer 窗口显示
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 窗口显示模块
//!
//! 将标注后的帧推入 `appsrc ! videoconvert ! autovideosink` 管道，
//! 在独立窗口中呈现。推入的缓冲区为 BGR 通道顺序，
//! 图像在推入前按策略缩放并居中贴到目标尺寸的画布上。
//!
//! ## URL Scheme
//!
//! `display://?width=960&height=540&fps=20`

use std::sync::{Arc, Mutex};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use tracing::info;
use url::Url;

use crate::display::{scale_for_display, rgb_to_bgr, AspectPolicy, DisplayError, DisplaySink};
use crate::{FromUrl, FromUrlWithScheme};

const DISPLAY_SCHEME: &str = "display";
const DEFAULT_DISPLAY_WIDTH: u32 = 960;
const DEFAULT_DISPLAY_HEIGHT: u32 = 540;
const DEFAULT_DISPLAY_FPS: i32 = 20;

/// GStreamer 窗口显示汇
pub struct GStreamerDisplaySink {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: u32,
  height: u32,
  fps: i32,
  frame_count: Arc<Mutex<u64>>,
}

impl GStreamerDisplaySink {
  /// 创建一个固定尺寸的显示窗口
  pub fn new(width: u32, height: u32, fps: i32) -> Result<Self, DisplayError> {
    gst::init()?;

    let pipeline_desc =
      "appsrc name=src is-live=true format=time ! videoconvert ! videoscale ! autovideosink sync=false";
    info!("创建显示管道: {}", pipeline_desc);

    let pipeline = gst::parse::launch(pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| DisplayError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or_else(|| DisplayError::PipelineError("Failed to get appsrc element".to_string()))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| DisplayError::PipelineError("Failed to convert element to appsrc".to_string()))?;

    // 推入缓冲区为 BGR 顺序，由 videoconvert 转换为显示格式
    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "BGR")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(fps, 1))
      .build();

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!("显示窗口已创建: {}x{} @ {} fps", width, height, fps);

    Ok(GStreamerDisplaySink {
      pipeline,
      appsrc,
      width,
      height,
      fps,
      frame_count: Arc::new(Mutex::new(0)),
    })
  }

  fn push_frame(&self, data: &[u8]) -> Result<(), DisplayError> {
    let mut buffer =
      gst::Buffer::with_size(data.len()).map_err(|_| DisplayError::BufferCreationError)?;

    {
      let buffer_ref = buffer.get_mut().unwrap();
      let mut buffer_map = buffer_ref
        .map_writable()
        .map_err(|_| DisplayError::PipelineError("Failed to map buffer".to_string()))?;
      buffer_map.copy_from_slice(data);
    }

    // Set timestamp
    let mut frame_count = self.frame_count.lock().unwrap();
    let timestamp = (*frame_count * 1_000_000_000) / (self.fps as u64);
    *frame_count += 1;

    {
      let buffer_ref = buffer.get_mut().unwrap();
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(
        1_000_000_000 / self.fps as u64,
      ));
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      DisplayError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    Ok(())
  }
}

impl FromUrlWithScheme for GStreamerDisplaySink {
  const SCHEME: &'static str = DISPLAY_SCHEME;
}

impl FromUrl for GStreamerDisplaySink {
  type Error = DisplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != DISPLAY_SCHEME {
      return Err(DisplayError::PipelineError(format!(
        "URI scheme mismatch: expected '{}', found '{}'",
        DISPLAY_SCHEME,
        url.scheme()
      )));
    }

    let query_pairs: std::collections::HashMap<_, _> = url.query_pairs().collect();
    let width = query_pairs
      .get("width")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_DISPLAY_WIDTH);
    let height = query_pairs
      .get("height")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_DISPLAY_HEIGHT);
    let fps = query_pairs
      .get("fps")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_DISPLAY_FPS);

    Self::new(width, height, fps)
  }
}

impl DisplaySink for GStreamerDisplaySink {
  fn show(
    &mut self,
    image: &RgbImage,
    target: (u32, u32),
    policy: AspectPolicy,
  ) -> Result<(), DisplayError> {
    // 目标尺寸受管道 caps 约束，取两者中较小者
    let target = (target.0.min(self.width), target.1.min(self.height));
    let scaled = scale_for_display(image, target, policy);

    // 居中贴到固定尺寸画布上（letterbox），保证缓冲区大小与 caps 一致
    let mut canvas = RgbImage::new(self.width, self.height);
    let offset_x = ((self.width - scaled.width()) / 2) as i64;
    let offset_y = ((self.height - scaled.height()) / 2) as i64;
    image::imageops::overlay(&mut canvas, &scaled, offset_x, offset_y);

    self.push_frame(&rgb_to_bgr(&canvas))
  }
}

impl Drop for GStreamerDisplaySink {
  fn drop(&mut self) {
    // Send EOS to properly close the window
    let _ = self.appsrc.end_of_stream();

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      tracing::warn!("Failed to stop display pipeline: {}", e);
    }

    let frame_count = self.frame_count.lock().unwrap();
    info!("显示窗口已关闭，共推送 {} 帧", *frame_count);
  }
}
