// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/session.rs - 检测叠加循环
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

//! # 检测叠加循环模块
//!
//! 以固定节奏从帧源拉帧，按采样间隔运行检测，把结果画到帧上
//! 并交给显示汇。循环在一个独立线程上自驱动，取消通过共享的
//! 跟踪开关（[`TrackingSwitch`]）完成：关闭开关后，下一次迭代
//! 的守卫检查即失败，线程退出。
//!
//! 循环的退出是无声的：守卫失败、到达结尾都只是停止迭代，
//! 由外部触发事件（回放转为播放、跟踪被打开）重新拉起。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::display::{AspectPolicy, DisplaySink};
use crate::model::Detector;
use crate::overlay::Painter;
use crate::playback::{Playback, PlaybackState};
use crate::source::FrameSource;

/// 默认采样间隔（帧）
pub const DEFAULT_SAMPLING_STRIDE: u64 = 5;
/// 默认循环周期
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);
/// 默认置信度阈值
pub const DEFAULT_CONFIDENCE: f32 = 0.25;
/// 默认轨迹容量
pub const DEFAULT_TRAIL_CAPACITY: usize = 1024;

/// 叠加循环配置
#[derive(Debug, Clone)]
pub struct OverlayConfig {
  /// 采样间隔：每 N 帧运行一次检测
  pub sampling_stride: u64,
  /// 两次迭代之间的间隔
  pub tick_interval: Duration,
  /// 检测置信度阈值
  pub confidence: f32,
  /// 显示目标尺寸
  pub target_size: (u32, u32),
  /// 缩放策略
  pub aspect: AspectPolicy,
  /// 中心点轨迹容量
  pub trail_capacity: usize,
  /// 是否绘制中心点轨迹
  pub draw_trail: bool,
}

impl Default for OverlayConfig {
  fn default() -> Self {
    Self {
      sampling_stride: DEFAULT_SAMPLING_STRIDE,
      tick_interval: DEFAULT_TICK_INTERVAL,
      confidence: DEFAULT_CONFIDENCE,
      target_size: (960, 540),
      aspect: AspectPolicy::Fit,
      trail_capacity: DEFAULT_TRAIL_CAPACITY,
      draw_trail: false,
    }
  }
}

/// 跟踪开关：叠加循环的取消令牌
///
/// 克隆出的各个句柄共享同一状态。关闭开关后，循环在下一次
/// 迭代前观察到并退出，不存在滞后一拍的旧式回调。
#[derive(Clone, Default)]
pub struct TrackingSwitch {
  enabled: Arc<AtomicBool>,
}

impl TrackingSwitch {
  pub fn new() -> Self {
    Self::default()
  }

  /// 设置开关；返回值表示状态是否发生变化
  ///
  /// 幂等：以相同值重复调用返回 false，调用方据此避免重复拉起循环。
  pub fn set(&self, enabled: bool) -> bool {
    self.enabled.swap(enabled, Ordering::SeqCst) != enabled
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled.load(Ordering::SeqCst)
  }
}

/// 有界的中心点轨迹缓冲
///
/// 固定容量的环形缓冲：写满后淘汰最旧的点，内存有上界。
pub struct CenterTrail {
  points: VecDeque<(i32, i32)>,
  capacity: usize,
}

impl CenterTrail {
  pub fn new(capacity: usize) -> Self {
    Self {
      points: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn push(&mut self, center: (i32, i32)) {
    while self.points.len() >= self.capacity {
      self.points.pop_front();
    }
    self.points.push_back(center);
  }

  pub fn iter(&self) -> impl Iterator<Item = &(i32, i32)> {
    self.points.iter()
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn clear(&mut self) {
    self.points.clear();
  }
}

/// 单次迭代的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
  /// 跟踪未开启（终止）
  Disabled,
  /// 未绑定帧源（终止）
  NoSource,
  /// 回放不在播放状态（终止）
  NotPlaying,
  /// 帧源到达结尾，游标已重置（终止）
  EndOfStream,
  /// 帧已读取计数，但不在采样点上（继续）
  Skipped,
  /// 完成检测并显示（继续）
  Rendered {
    /// 本帧的检测数量
    detections: usize,
  },
  /// 检测模型调用失败，本帧放弃叠加（继续）
  DetectorFailed,
  /// 显示汇写入失败（继续）
  SinkFailed,
}

impl TickOutcome {
  /// 终止结果使循环退出且不再重新调度
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      TickOutcome::Disabled
        | TickOutcome::NoSource
        | TickOutcome::NotPlaying
        | TickOutcome::EndOfStream
    )
  }
}

/// 叠加会话
///
/// 持有一个打开视频的跟踪生命周期内的全部可变状态：开关、
/// 帧计数、轨迹缓冲，以及三个协作方（帧源、模型、显示汇）。
/// 会话是单属主的：所有可变访问都经由持有它的循环线程。
pub struct OverlaySession<S, D, K> {
  switch: TrackingSwitch,
  config: OverlayConfig,
  source: Option<S>,
  detector: D,
  sink: K,
  painter: Painter,
  frame_counter: u64,
  trail: CenterTrail,
}

impl<S, D, K> OverlaySession<S, D, K>
where
  S: FrameSource,
  D: Detector,
  K: DisplaySink,
{
  pub fn new(detector: D, sink: K, painter: Painter, config: OverlayConfig) -> Self {
    let trail = CenterTrail::new(config.trail_capacity);
    Self {
      switch: TrackingSwitch::new(),
      config,
      source: None,
      detector,
      sink,
      painter,
      frame_counter: 0,
      trail,
    }
  }

  /// 跟踪开关句柄（可克隆，跨线程共享）
  pub fn switch(&self) -> TrackingSwitch {
    self.switch.clone()
  }

  pub fn config(&self) -> &OverlayConfig {
    &self.config
  }

  pub fn frame_counter(&self) -> u64 {
    self.frame_counter
  }

  pub fn trail(&self) -> &CenterTrail {
    &self.trail
  }

  pub fn source(&self) -> Option<&S> {
    self.source.as_ref()
  }

  pub fn sink(&self) -> &K {
    &self.sink
  }

  pub fn detector(&self) -> &D {
    &self.detector
  }

  /// 绑定新的帧源；帧计数与轨迹随之重置
  pub fn bind_source(&mut self, source: S) {
    info!("绑定帧源: {}x{}", source.width(), source.height());
    self.source = Some(source);
    self.frame_counter = 0;
    self.trail.clear();
  }

  pub fn clear_source(&mut self) {
    self.source = None;
  }

  /// 执行一次迭代
  ///
  /// 守卫条件（跟踪开启、帧源存在、回放播放中）任一不满足即返回
  /// 终止结果。其余情况读取一帧、推进计数，并仅在采样点上运行
  /// 检测、叠加与显示。
  pub fn tick(&mut self, playback: PlaybackState) -> TickOutcome {
    if !self.switch.is_enabled() {
      return TickOutcome::Disabled;
    }
    let Some(source) = self.source.as_mut() else {
      return TickOutcome::NoSource;
    };
    if playback != PlaybackState::Playing {
      return TickOutcome::NotPlaying;
    }

    let frame = match source.read_next() {
      Ok(Some(frame)) => frame,
      Ok(None) => {
        // 到达结尾：游标回到起点，循环停止，等待外部触发
        if let Err(e) = source.rewind() {
          warn!("帧源游标重置失败: {}", e);
        }
        return TickOutcome::EndOfStream;
      }
      Err(e) => {
        // 读帧失败按到达结尾处理
        warn!("读取帧失败，按到达结尾处理: {}", e);
        if let Err(e) = source.rewind() {
          warn!("帧源游标重置失败: {}", e);
        }
        return TickOutcome::EndOfStream;
      }
    };

    self.frame_counter += 1;
    if self.frame_counter % self.config.sampling_stride != 0 {
      // 非采样帧：只消费不检测，保持节奏
      return TickOutcome::Skipped;
    }

    let detections = match self.detector.detect(&frame.image, self.config.confidence) {
      Ok(detections) => detections,
      Err(e) => {
        error!("检测模型调用失败，跳过本帧叠加: {}", e);
        return TickOutcome::DetectorFailed;
      }
    };

    debug!(
      "帧 {} (时间: {}ms): 检测到 {} 个物体",
      frame.index,
      frame.timestamp_ms,
      detections.len()
    );

    let mut canvas = frame.image;
    for detection in &detections {
      self.trail.push(detection.center());
    }
    self.painter.draw_detections(&mut canvas, &detections);
    if self.config.draw_trail {
      self.painter.draw_trail(&mut canvas, self.trail.iter());
    }

    if let Err(e) = self
      .sink
      .show(&canvas, self.config.target_size, self.config.aspect)
    {
      error!("显示输出失败: {}", e);
      return TickOutcome::SinkFailed;
    }

    TickOutcome::Rendered {
      detections: detections.len(),
    }
  }
}

/// 在独立线程上拉起叠加循环
///
/// 循环以 `tick_interval` 为周期重复执行迭代，直到出现终止结果。
/// 取消经由会话的 [`TrackingSwitch`]；回放离开播放状态同样使循环
/// 退出。重新拉起由调用方在触发事件上完成。
pub fn spawn_overlay_loop<S, D, K, P>(
  session: Arc<Mutex<OverlaySession<S, D, K>>>,
  playback: Arc<P>,
) -> thread::JoinHandle<()>
where
  S: FrameSource + Send + 'static,
  D: Detector + Send + 'static,
  K: DisplaySink + Send + 'static,
  P: Playback + Send + Sync + 'static,
{
  let interval = session.lock().unwrap().config().tick_interval;

  thread::Builder::new()
    .name("overlay-loop".to_string())
    .spawn(move || {
      debug!("叠加循环启动");
      loop {
        let outcome = session.lock().unwrap().tick(playback.state());
        if outcome.is_terminal() {
          debug!("叠加循环退出: {:?}", outcome);
          break;
        }
        thread::sleep(interval);
      }
    })
    .expect("Error spawning overlay loop thread")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;
  use std::sync::atomic::AtomicBool;

  use image::RgbImage;

  use crate::display::DisplayError;
  use crate::frame::VideoFrame;
  use crate::model::{DetectError, Detection};
  use crate::playback::PlaybackError;
  use crate::source::SourceError;

  const FRAME_W: u32 = 100;
  const FRAME_H: u32 = 100;

  /// 固定帧数的脚本帧源
  struct ScriptedSource {
    total: u64,
    cursor: u64,
  }

  impl ScriptedSource {
    fn new(total: u64) -> Self {
      Self { total, cursor: 0 }
    }
  }

  impl FrameSource for ScriptedSource {
    fn read_next(&mut self) -> Result<Option<VideoFrame>, SourceError> {
      if self.cursor >= self.total {
        return Ok(None);
      }
      let frame = VideoFrame {
        image: RgbImage::new(FRAME_W, FRAME_H),
        index: self.cursor,
        timestamp_ms: self.cursor * 40,
      };
      self.cursor += 1;
      Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
      self.cursor = 0;
      Ok(())
    }

    fn width(&self) -> u32 {
      FRAME_W
    }

    fn height(&self) -> u32 {
      FRAME_H
    }

    fn fps(&self) -> Option<f64> {
      Some(25.0)
    }
  }

  /// 记录调用次数、返回固定结果的检测桩
  struct FixedDetector {
    calls: Cell<usize>,
    result: Vec<Detection>,
  }

  impl FixedDetector {
    fn new(result: Vec<Detection>) -> Self {
      Self {
        calls: Cell::new(0),
        result,
      }
    }

    fn stub() -> Self {
      Self::new(vec![Detection {
        bbox: [10.0, 10.0, 50.0, 50.0],
        confidence: 0.9,
        class_id: 0,
      }])
    }
  }

  impl Detector for FixedDetector {
    fn detect(
      &self,
      _image: &RgbImage,
      _confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectError> {
      self.calls.set(self.calls.get() + 1);
      Ok(self.result.clone())
    }
  }

  /// 永远失败的检测桩
  struct FailingDetector;

  impl Detector for FailingDetector {
    fn detect(
      &self,
      _image: &RgbImage,
      _confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectError> {
      Err(DetectError::OutputShapeError("stub failure".to_string()))
    }
  }

  /// 记录每次显示调用的显示桩
  struct RecordingSink {
    frames: Vec<RgbImage>,
  }

  impl RecordingSink {
    fn new() -> Self {
      Self { frames: Vec::new() }
    }
  }

  impl DisplaySink for RecordingSink {
    fn show(
      &mut self,
      image: &RgbImage,
      _target: (u32, u32),
      _policy: AspectPolicy,
    ) -> Result<(), DisplayError> {
      self.frames.push(image.clone());
      Ok(())
    }
  }

  /// 原子状态的回放桩
  struct StubPlayback {
    playing: AtomicBool,
  }

  impl StubPlayback {
    fn playing() -> Self {
      Self {
        playing: AtomicBool::new(true),
      }
    }
  }

  impl Playback for StubPlayback {
    fn play(&self) -> Result<(), PlaybackError> {
      self.playing.store(true, Ordering::SeqCst);
      Ok(())
    }

    fn pause(&self) -> Result<(), PlaybackError> {
      self.playing.store(false, Ordering::SeqCst);
      Ok(())
    }

    fn seek_ms(&self, _position_ms: u64) -> Result<(), PlaybackError> {
      Ok(())
    }

    fn state(&self) -> PlaybackState {
      if self.playing.load(Ordering::SeqCst) {
        PlaybackState::Playing
      } else {
        PlaybackState::Paused
      }
    }

    fn position_ms(&self) -> Option<u64> {
      None
    }

    fn duration_ms(&self) -> Option<u64> {
      None
    }
  }

  fn test_config() -> OverlayConfig {
    OverlayConfig {
      target_size: (FRAME_W, FRAME_H),
      tick_interval: Duration::from_millis(1),
      ..OverlayConfig::default()
    }
  }

  fn session_with(
    source: ScriptedSource,
    detector: FixedDetector,
  ) -> OverlaySession<ScriptedSource, FixedDetector, RecordingSink> {
    let mut session = OverlaySession::new(
      detector,
      RecordingSink::new(),
      Painter::new(),
      test_config(),
    );
    session.bind_source(source);
    session
  }

  #[test]
  fn detection_runs_only_on_sampling_stride() {
    let mut session = session_with(ScriptedSource::new(12), FixedDetector::stub());
    session.switch().set(true);

    for n in 1..=10u64 {
      let outcome = session.tick(PlaybackState::Playing);
      if n % 5 == 0 {
        assert_eq!(outcome, TickOutcome::Rendered { detections: 1 });
      } else {
        assert_eq!(outcome, TickOutcome::Skipped);
      }
    }

    // 10 帧全部被读取计数，检测只在第 5、10 帧上运行
    assert_eq!(session.frame_counter(), 10);
    assert_eq!(session.detector().calls.get(), 2);
    assert_eq!(session.sink().frames.len(), 2);
  }

  #[test]
  fn disabled_tracking_never_touches_the_sink() {
    let mut session = session_with(ScriptedSource::new(20), FixedDetector::stub());
    session.switch().set(true);

    for _ in 0..5 {
      session.tick(PlaybackState::Playing);
    }
    let shown_before = session.sink().frames.len();
    assert_eq!(shown_before, 1);

    // 关闭开关后，下一次迭代即终止，不再写显示汇
    session.switch().set(false);
    assert_eq!(session.tick(PlaybackState::Playing), TickOutcome::Disabled);
    assert_eq!(session.sink().frames.len(), shown_before);
    assert_eq!(session.frame_counter(), 5);
  }

  #[test]
  fn end_of_stream_rewinds_and_parks_the_loop() {
    let mut session = session_with(ScriptedSource::new(3), FixedDetector::stub());
    session.switch().set(true);

    for _ in 0..3 {
      assert_eq!(session.tick(PlaybackState::Playing), TickOutcome::Skipped);
    }
    let outcome = session.tick(PlaybackState::Playing);
    assert_eq!(outcome, TickOutcome::EndOfStream);
    assert!(outcome.is_terminal());

    // 游标已回到起点；外部再次触发后从第 0 帧继续
    assert_eq!(session.source().unwrap().cursor, 0);
    assert_eq!(session.tick(PlaybackState::Playing), TickOutcome::Skipped);
    assert_eq!(session.source().unwrap().cursor, 1);
  }

  #[test]
  fn no_detection_while_paused() {
    let mut session = session_with(ScriptedSource::new(10), FixedDetector::stub());
    session.switch().set(true);

    let outcome = session.tick(PlaybackState::Paused);
    assert_eq!(outcome, TickOutcome::NotPlaying);
    assert!(outcome.is_terminal());
    assert_eq!(session.detector().calls.get(), 0);
    assert_eq!(session.frame_counter(), 0);

    // 回放进入播放后检测恢复
    for _ in 0..5 {
      session.tick(PlaybackState::Playing);
    }
    assert_eq!(session.detector().calls.get(), 1);
  }

  #[test]
  fn tracking_switch_toggle_is_idempotent() {
    let switch = TrackingSwitch::new();
    assert!(!switch.is_enabled());

    assert!(switch.set(true));
    assert!(!switch.set(true));
    assert!(switch.is_enabled());

    assert!(switch.set(false));
    assert!(!switch.set(false));
    assert!(!switch.is_enabled());
  }

  #[test]
  fn rendered_frame_carries_marker_and_label() {
    let mut session = session_with(ScriptedSource::new(10), FixedDetector::stub());
    session.switch().set(true);

    let mut rendered = 0;
    for _ in 0..5 {
      if let TickOutcome::Rendered { detections } = session.tick(PlaybackState::Playing) {
        rendered += 1;
        assert_eq!(detections, 1);
      }
    }
    assert_eq!(rendered, 1);

    // 固定检测 {box:(10,10,50,50)} 的中心 (30,30) 被标记
    let shown = &session.sink().frames[0];
    let painter = Painter::new();
    assert_eq!(*shown.get_pixel(30, 30), painter.class_color(0));
    // 置信度 0.9 的标签文本为两位小数
    let label = Painter::label(&Detection {
      bbox: [10.0, 10.0, 50.0, 50.0],
      confidence: 0.9,
      class_id: 0,
    });
    assert!(label.contains("0.90"));
  }

  #[test]
  fn detector_failure_is_recoverable_per_iteration() {
    let mut session = OverlaySession::new(
      FailingDetector,
      RecordingSink::new(),
      Painter::new(),
      test_config(),
    );
    session.bind_source(ScriptedSource::new(10));
    session.switch().set(true);

    for n in 1..=5u64 {
      let outcome = session.tick(PlaybackState::Playing);
      if n % 5 == 0 {
        // 采样帧上模型失败：放弃叠加，但不终止循环
        assert_eq!(outcome, TickOutcome::DetectorFailed);
        assert!(!outcome.is_terminal());
      }
    }
    assert!(session.sink().frames.is_empty());
  }

  #[test]
  fn binding_a_new_source_resets_counter_and_trail() {
    let mut session = session_with(ScriptedSource::new(10), FixedDetector::stub());
    session.switch().set(true);

    for _ in 0..5 {
      session.tick(PlaybackState::Playing);
    }
    assert_eq!(session.frame_counter(), 5);
    assert_eq!(session.trail().len(), 1);

    session.bind_source(ScriptedSource::new(10));
    assert_eq!(session.frame_counter(), 0);
    assert!(session.trail().is_empty());
  }

  #[test]
  fn trail_is_bounded_by_capacity() {
    let mut trail = CenterTrail::new(4);
    for i in 0..10 {
      trail.push((i, i));
    }
    assert_eq!(trail.len(), 4);
    // 留下的是最新的四个点
    assert_eq!(trail.iter().next(), Some(&(6, 6)));
    assert_eq!(trail.iter().last(), Some(&(9, 9)));
  }

  #[test]
  fn overlay_loop_thread_exits_on_disable() {
    let session = OverlaySession::new(
      FixedDetector::stub(),
      RecordingSink::new(),
      Painter::new(),
      test_config(),
    );
    let switch = session.switch();
    let session = Arc::new(Mutex::new(session));
    session
      .lock()
      .unwrap()
      .bind_source(ScriptedSource::new(u64::MAX));

    let playback = Arc::new(StubPlayback::playing());
    switch.set(true);
    let handle = spawn_overlay_loop(session.clone(), playback.clone());

    thread::sleep(Duration::from_millis(20));
    switch.set(false);
    handle.join().expect("overlay loop thread panicked");

    // 线程退出后状态保持一致：开关关闭，循环不再运行
    assert!(!switch.is_enabled());
    assert!(session.lock().unwrap().frame_counter() > 0);
  }

  #[test]
  fn overlay_loop_thread_exits_when_playback_pauses() {
    let session = OverlaySession::new(
      FixedDetector::stub(),
      RecordingSink::new(),
      Painter::new(),
      test_config(),
    );
    let switch = session.switch();
    let session = Arc::new(Mutex::new(session));
    session
      .lock()
      .unwrap()
      .bind_source(ScriptedSource::new(u64::MAX));

    let playback = Arc::new(StubPlayback::playing());
    switch.set(true);
    let handle = spawn_overlay_loop(session.clone(), playback.clone());

    thread::sleep(Duration::from_millis(20));
    playback.pause().unwrap();
    handle.join().expect("overlay loop thread panicked");
    assert!(switch.is_enabled());
  }
}
