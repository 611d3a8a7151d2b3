// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/playback/playbin.rs - GStreamer playbin 回放引擎
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 回放引擎模块
//!
//! 基于 `playbin` 的视频回放：自带解码、音频输出与显示窗口，
//! 与叠加循环的采样管道相互独立（两者各自打开同一文件）。
//!
//! ## 基本用法
//!
//! ```no_run
//! use zuokan::playback::{Playback, PlaybinEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = PlaybinEngine::open(std::path::Path::new("video.mp4"))?;
//! engine.play()?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Mutex;

use gstreamer::{self as gst, prelude::*};
use tracing::{debug, error, info};

use crate::playback::{Playback, PlaybackError, PlaybackState};

/// 基于 GStreamer playbin 的回放引擎
///
/// 状态以影子变量维护：播放/暂停由命令直接驱动，
/// 到达结尾与管道错误通过总线消息折算为 [`PlaybackState::Stopped`]。
pub struct PlaybinEngine {
  playbin: gst::Element,
  state: Mutex<PlaybackState>,
}

impl PlaybinEngine {
  /// 打开一个本地视频文件
  pub fn open(path: &Path) -> Result<Self, PlaybackError> {
    gst::init()?;

    // playbin 需要绝对路径的 file:// URI
    let path = path
      .canonicalize()
      .map_err(|e| PlaybackError::Unavailable(format!("无效的文件路径 {}: {}", path.display(), e)))?;
    let uri = url::Url::from_file_path(&path)
      .map_err(|_| PlaybackError::Unavailable(format!("无效的文件路径: {}", path.display())))?;

    info!("创建回放管道: {}", uri);
    let playbin = gst::ElementFactory::make("playbin")
      .property("uri", uri.as_str())
      .build()?;

    // 预滚动到 Paused，让时长查询尽早可用
    playbin.set_state(gst::State::Paused)?;

    Ok(PlaybinEngine {
      playbin,
      state: Mutex::new(PlaybackState::Stopped),
    })
  }

  /// 处理总线上的待决消息，折算到影子状态
  fn poll_bus(&self) {
    let Some(bus) = self.playbin.bus() else {
      return;
    };

    for message in bus.iter() {
      match message.view() {
        gst::MessageView::Eos(..) => {
          debug!("回放到达结尾");
          *self.state.lock().unwrap() = PlaybackState::Stopped;
        }
        gst::MessageView::Error(err) => {
          error!(
            "回放管道错误: {} ({})",
            err.error(),
            err.debug().map(|d| d.to_string()).unwrap_or_default()
          );
          *self.state.lock().unwrap() = PlaybackState::Stopped;
        }
        _ => {}
      }
    }
  }
}

impl Playback for PlaybinEngine {
  fn play(&self) -> Result<(), PlaybackError> {
    self.playbin.set_state(gst::State::Playing)?;
    *self.state.lock().unwrap() = PlaybackState::Playing;
    Ok(())
  }

  fn pause(&self) -> Result<(), PlaybackError> {
    self.playbin.set_state(gst::State::Paused)?;
    *self.state.lock().unwrap() = PlaybackState::Paused;
    Ok(())
  }

  fn seek_ms(&self, position_ms: u64) -> Result<(), PlaybackError> {
    self.playbin.seek_simple(
      gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
      gst::ClockTime::from_mseconds(position_ms),
    )?;
    Ok(())
  }

  fn state(&self) -> PlaybackState {
    self.poll_bus();
    *self.state.lock().unwrap()
  }

  fn position_ms(&self) -> Option<u64> {
    self
      .playbin
      .query_position::<gst::ClockTime>()
      .map(|t| t.mseconds())
  }

  fn duration_ms(&self) -> Option<u64> {
    self
      .playbin
      .query_duration::<gst::ClockTime>()
      .map(|t| t.mseconds())
  }
}

impl Drop for PlaybinEngine {
  fn drop(&mut self) {
    if let Err(e) = self.playbin.set_state(gst::State::Null) {
      tracing::warn!("Failed to stop playbin pipeline: {}", e);
    }
  }
}
