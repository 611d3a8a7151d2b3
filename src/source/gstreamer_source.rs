// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/source/gstreamer_source.rs - GStreamer 帧源
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 帧源模块
//!
//! 从本地视频文件顺序拉取解码帧，供叠加循环采样使用。
//! 管道固定为 `filesrc ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink`，
//! 解码输出统一转换为 RGB。
//!
//! ## 系统依赖
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use zuokan::source::{FrameSource, GStreamerFrameSource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut source = GStreamerFrameSource::open(std::path::Path::new("video.mp4"))?;
//! while let Some(frame) = source.read_next()? {
//!     println!("帧 {}: {}x{}", frame.index, frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::frame::VideoFrame;
use crate::source::{FrameSource, SourceError};

/// 单帧拉取的超时时间
const PULL_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(5);

/// GStreamer 视频文件帧源
///
/// 维护一个独立于回放引擎的解码管道；读取游标即 appsink 的消费进度。
pub struct GStreamerFrameSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  fps: Option<f64>,
  index: u64,
}

impl GStreamerFrameSource {
  /// 打开一个本地视频文件
  pub fn open(path: &Path) -> Result<Self, SourceError> {
    gst::init()?;

    let pipeline_desc = format!(
      "filesrc location={} ! decodebin ! videoconvert ! video/x-raw,format=RGB \
       ! appsink name=sink sync=false max-buffers=4",
      path.display()
    );
    info!("创建帧源管道: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| SourceError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| SourceError::PipelineError("Failed to get appsink element".to_string()))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| SourceError::PipelineError("Failed to convert element to appsink".to_string()))?;

    pipeline.set_state(gst::State::Playing)?;

    // 预滚动一次以确定帧尺寸与帧率
    let (width, height, fps) = match appsink.try_pull_preroll(PULL_TIMEOUT) {
      Some(sample) => {
        let info = video_info(&sample)?;
        let fps = info.fps();
        let fps = if fps.numer() > 0 {
          Some(fps.numer() as f64 / fps.denom() as f64)
        } else {
          None
        };
        (info.width(), info.height(), fps)
      }
      None => {
        return Err(SourceError::PipelineError(
          "No preroll sample from pipeline".to_string(),
        ));
      }
    };

    info!("帧源已打开: {}x{} @ {:?} fps", width, height, fps);

    Ok(GStreamerFrameSource {
      pipeline,
      appsink,
      width,
      height,
      fps,
      index: 0,
    })
  }

  fn convert_sample(&self, sample: gst::Sample) -> Result<RgbImage, SourceError> {
    let buffer = sample
      .buffer()
      .ok_or_else(|| SourceError::PipelineError("No buffer in sample".to_string()))?;
    let info = video_info(&sample)?;

    let width = info.width() as usize;
    let height = info.height() as usize;
    let stride = info.stride()[0] as usize;

    let map = buffer
      .map_readable()
      .map_err(|e| SourceError::PipelineError(format!("Failed to map buffer for reading: {}", e)))?;
    let data = map.as_slice();

    // Validate buffer size
    let expected_size = height * stride;
    if data.len() < expected_size {
      return Err(SourceError::BufferSizeMismatch {
        expected: expected_size,
        actual: data.len(),
      });
    }

    // 逐行拷贝，去掉步长对齐产生的行尾填充
    let mut pixels = Vec::with_capacity(width * height * 3);
    for y in 0..height {
      let row_start = y * stride;
      pixels.extend_from_slice(&data[row_start..row_start + width * 3]);
    }

    RgbImage::from_raw(info.width(), info.height(), pixels)
      .ok_or_else(|| SourceError::PipelineError("Failed to build RGB image".to_string()))
  }
}

fn video_info(sample: &gst::Sample) -> Result<gst_video::VideoInfo, SourceError> {
  let caps = sample
    .caps()
    .ok_or_else(|| SourceError::PipelineError("No caps in sample".to_string()))?;
  gst_video::VideoInfo::from_caps(caps)
    .map_err(|_| SourceError::PipelineError("Failed to get video info from caps".to_string()))
}

impl FrameSource for GStreamerFrameSource {
  fn read_next(&mut self) -> Result<Option<VideoFrame>, SourceError> {
    if self.appsink.is_eos() {
      debug!("帧源到达结尾");
      return Ok(None);
    }

    let Some(sample) = self.appsink.try_pull_sample(PULL_TIMEOUT) else {
      // 超时或管道停摆与到达结尾同样处理
      debug!("帧源无可用样本，按到达结尾处理");
      return Ok(None);
    };

    let timestamp_ms = sample
      .buffer()
      .and_then(|b| b.pts())
      .map(|t| t.mseconds())
      .unwrap_or(0);

    let image = self.convert_sample(sample)?;
    let frame = VideoFrame {
      image,
      index: self.index,
      timestamp_ms,
    };
    self.index += 1;

    Ok(Some(frame))
  }

  fn rewind(&mut self) -> Result<(), SourceError> {
    debug!("帧源游标重置到 0");
    self.pipeline.seek_simple(
      gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
      gst::ClockTime::ZERO,
    )?;
    self.index = 0;
    Ok(())
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }
}

impl Drop for GStreamerFrameSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop frame source pipeline: {}", e);
    }
  }
}
