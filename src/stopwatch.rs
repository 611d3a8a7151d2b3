// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/stopwatch.rs - 毫秒秒表
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

use std::time::{Duration, Instant};

/// 毫秒秒表
///
/// 独立于回放与检测的计时器。基于单调时钟累计，
/// 而不是固定周期回调的逐毫秒累加。
#[derive(Debug, Default)]
pub struct Stopwatch {
  /// 已累计的运行时长（不含当前一段）
  accumulated: Duration,
  /// 当前一段的起点；None 表示未在运行
  started_at: Option<Instant>,
}

impl Stopwatch {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_running(&self) -> bool {
    self.started_at.is_some()
  }

  /// 开始计时；已在运行时无效果
  pub fn start(&mut self) {
    if self.started_at.is_none() {
      self.started_at = Some(Instant::now());
    }
  }

  /// 停止计时并累计当前一段；未在运行时无效果
  pub fn stop(&mut self) {
    if let Some(started_at) = self.started_at.take() {
      self.accumulated += started_at.elapsed();
    }
  }

  /// 在开始与停止之间切换；返回切换后是否在运行
  pub fn toggle(&mut self) -> bool {
    if self.is_running() {
      self.stop();
      false
    } else {
      self.start();
      true
    }
  }

  /// 停止并清零
  pub fn reset(&mut self) {
    self.accumulated = Duration::ZERO;
    self.started_at = None;
  }

  /// 当前累计时长
  pub fn elapsed(&self) -> Duration {
    match self.started_at {
      Some(started_at) => self.accumulated + started_at.elapsed(),
      None => self.accumulated,
    }
  }

  /// 显示文本，格式 `M:SS.mmm`
  pub fn display(&self) -> String {
    format_elapsed(self.elapsed())
  }
}

/// 格式化时长为 `M:SS.mmm`
pub fn format_elapsed(elapsed: Duration) -> String {
  let total_ms = elapsed.as_millis();
  let minutes = total_ms / 60_000;
  let seconds = (total_ms % 60_000) / 1_000;
  let millis = total_ms % 1_000;
  format!("{}:{:02}.{:03}", minutes, seconds, millis)
}
