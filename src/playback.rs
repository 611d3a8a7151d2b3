// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/playback.rs - 回放引擎
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

/// 回放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
  /// 正在播放
  Playing,
  /// 已暂停
  Paused,
  /// 已停止（尚未播放，或已到达结尾）
  Stopped,
}

/// 回放引擎错误类型
#[derive(Error, Debug)]
pub enum PlaybackError {
  #[cfg(feature = "gstreamer_playback")]
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gstreamer::glib::Error),
  #[cfg(feature = "gstreamer_playback")]
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gstreamer::glib::BoolError),
  #[cfg(feature = "gstreamer_playback")]
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gstreamer::StateChangeError),
  #[error("回放引擎不可用: {0}")]
  Unavailable(String),
}

/// 回放引擎 trait
///
/// 负责视频的播放、暂停与跳转，并汇报当前回放状态与进度。
/// 叠加循环只读取 [`Playback::state`]，从不改变回放状态。
pub trait Playback {
  /// 开始或继续播放
  fn play(&self) -> Result<(), PlaybackError>;

  /// 暂停播放
  fn pause(&self) -> Result<(), PlaybackError>;

  /// 跳转到指定位置（毫秒）
  fn seek_ms(&self, position_ms: u64) -> Result<(), PlaybackError>;

  /// 获取当前回放状态
  fn state(&self) -> PlaybackState;

  /// 获取当前播放位置（毫秒），未知时返回 None
  fn position_ms(&self) -> Option<u64>;

  /// 获取视频总时长（毫秒），未知时返回 None
  fn duration_ms(&self) -> Option<u64>;
}

#[cfg(feature = "gstreamer_playback")]
mod playbin;
#[cfg(feature = "gstreamer_playback")]
pub use self::playbin::PlaybinEngine;
