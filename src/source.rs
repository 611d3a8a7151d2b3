// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/source.rs - 帧源
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

use thiserror::Error;

use crate::frame::VideoFrame;

/// 帧源错误类型
#[derive(Error, Debug)]
pub enum SourceError {
  #[cfg(feature = "gstreamer_playback")]
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gstreamer::glib::Error),
  #[cfg(feature = "gstreamer_playback")]
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gstreamer::glib::BoolError),
  #[cfg(feature = "gstreamer_playback")]
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gstreamer::StateChangeError),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

/// 帧源 trait
///
/// 按解码顺序提供视频帧，内部维护一个读取游标。
/// 读取失败按到达结尾处理（调用方不会将其视为致命错误）。
pub trait FrameSource {
  /// 读取下一帧并推进游标；到达结尾时返回 `Ok(None)`
  fn read_next(&mut self) -> Result<Option<VideoFrame>, SourceError>;

  /// 将读取游标重置到位置 0
  fn rewind(&mut self) -> Result<(), SourceError>;

  /// 帧宽度（像素）
  fn width(&self) -> u32;

  /// 帧高度（像素）
  fn height(&self) -> u32;

  /// 帧率（如果已知）
  fn fps(&self) -> Option<f64>;
}

#[cfg(feature = "gstreamer_playback")]
mod gstreamer_source;
#[cfg(feature = "gstreamer_playback")]
pub use self::gstreamer_source::GStreamerFrameSource;
