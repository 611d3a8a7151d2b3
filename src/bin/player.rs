// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/bin/player.rs - 视频播放器主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use zuokan::display::{AspectPolicy, GStreamerDisplaySink};
use zuokan::model::{Yolov8, Yolov8Builder};
use zuokan::overlay::Painter;
use zuokan::playback::{Playback, PlaybackState, PlaybinEngine};
use zuokan::session::{
  spawn_overlay_loop, OverlayConfig, OverlaySession, TrackingSwitch,
};
use zuokan::source::GStreamerFrameSource;
use zuokan::stopwatch::Stopwatch;
use zuokan::FromUrl;

type PlayerSession = OverlaySession<GStreamerFrameSource, Yolov8, GStreamerDisplaySink>;

/// Zuokan 播放器参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 视频文件路径
  #[arg(value_name = "VIDEO")]
  pub video: PathBuf,

  /// 检测模型地址
  /// 格式: yolov8:///path/to/model.onnx?width=640&height=640
  #[arg(long, value_name = "MODEL", default_value = "yolov8:///models/yolov8n.onnx")]
  pub model: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 采样间隔（每 N 帧检测一次）
  #[arg(long, default_value = "5", value_name = "STRIDE")]
  pub stride: u64,

  /// 叠加循环周期（毫秒）
  #[arg(long, default_value = "50", value_name = "MS")]
  pub interval_ms: u64,

  /// 叠加窗口宽度（像素）
  #[arg(long, default_value = "960", value_name = "WIDTH")]
  pub width: u32,

  /// 叠加窗口高度（像素）
  #[arg(long, default_value = "540", value_name = "HEIGHT")]
  pub height: u32,

  /// 标签字体文件路径（缺省时探测系统字体）
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 绘制检测中心点轨迹
  #[arg(long)]
  pub trail: bool,

  /// 启动后立即开启目标跟踪
  #[arg(long)]
  pub track: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("视频文件: {}", args.video.display());
  info!("模型地址: {}", args.model);
  info!("置信度阈值: {}", args.confidence);

  // 回放引擎与采样管道各自打开同一个文件
  let playback = Arc::new(
    PlaybinEngine::open(&args.video)
      .with_context(|| format!("无法打开视频文件: {}", args.video.display()))?,
  );
  let source = GStreamerFrameSource::open(&args.video)
    .with_context(|| format!("无法创建帧源: {}", args.video.display()))?;

  info!("正在加载模型...");
  let detector = Yolov8Builder::from_url(&args.model)?
    .build()
    .with_context(|| format!("无法加载模型: {}", args.model))?;

  let fps = (1_000 / args.interval_ms.max(1)).max(1) as i32;
  let sink = GStreamerDisplaySink::new(args.width, args.height, fps)?;

  let painter = match &args.font {
    Some(path) => Painter::with_font_file(path)
      .with_context(|| format!("无法加载字体文件: {}", path.display()))?,
    None => Painter::with_system_font(),
  };

  let config = OverlayConfig {
    sampling_stride: args.stride.max(1),
    tick_interval: Duration::from_millis(args.interval_ms.max(1)),
    confidence: args.confidence,
    target_size: (args.width, args.height),
    aspect: AspectPolicy::Fit,
    draw_trail: args.trail,
    ..OverlayConfig::default()
  };

  let mut session = OverlaySession::new(detector, sink, painter, config);
  session.bind_source(source);
  let switch = session.switch();
  let session: Arc<Mutex<PlayerSession>> = Arc::new(Mutex::new(session));

  let quit = Arc::new(AtomicBool::new(false));
  {
    let quit = quit.clone();
    let switch = switch.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      switch.set(false);
      quit.store(true, Ordering::SeqCst);
      thread::spawn(|| {
        thread::sleep(Duration::from_millis(500));
        std::process::exit(0);
      });
    })
    .expect("Error setting Ctrl-C handler");
  }

  let mut overlay_handle: Option<thread::JoinHandle<()>> = None;
  let mut stopwatch = Stopwatch::new();

  if args.track {
    switch.set(true);
  }
  playback.play()?;
  ensure_overlay_running(&mut overlay_handle, &session, &playback, &switch);

  println!("Zuokan 视频播放器");
  println!("=================");
  println!("命令: play | pause | seek <秒> | track on|off | timer (或 1) | reset | status | quit");

  let stdin = std::io::stdin();
  for line in stdin.lock().lines() {
    if quit.load(Ordering::SeqCst) {
      break;
    }
    let line = line?;
    let mut words = line.split_whitespace();
    match words.next() {
      Some("play") => {
        playback.play()?;
      }
      Some("pause") => {
        playback.pause()?;
      }
      Some("seek") => match words.next().and_then(|v| v.parse::<f64>().ok()) {
        Some(secs) if secs >= 0.0 => {
          playback.seek_ms((secs * 1_000.0) as u64)?;
        }
        _ => println!("用法: seek <秒>"),
      },
      Some("track") => match words.next() {
        Some("on") => {
          if switch.set(true) {
            info!("目标跟踪已开启");
          }
        }
        Some("off") => {
          if switch.set(false) {
            info!("目标跟踪已关闭");
          }
        }
        _ => println!("用法: track on|off"),
      },
      // 秒表快捷键与按钮等价
      Some("timer") | Some("1") => {
        if stopwatch.toggle() {
          println!("秒表启动: {}", stopwatch.display());
        } else {
          println!("秒表停止: {}", stopwatch.display());
        }
      }
      Some("reset") => {
        stopwatch.reset();
        println!("秒表已清零: {}", stopwatch.display());
      }
      Some("status") => {
        print_status(playback.as_ref(), &switch, &stopwatch, &session);
      }
      Some("quit") | Some("q") => break,
      Some(other) => println!("未知命令: {}", other),
      None => {}
    }

    // 触发事件之后检查是否需要重新拉起叠加循环
    ensure_overlay_running(&mut overlay_handle, &session, &playback, &switch);
  }

  // 退出：关闭开关并等待循环线程结束
  switch.set(false);
  if let Some(handle) = overlay_handle {
    let _ = handle.join();
  }
  playback.pause()?;
  info!("退出");

  Ok(())
}

/// 在触发事件上（重新）拉起叠加循环
///
/// 仅当跟踪开启、回放在播放中且当前没有存活的循环线程时才拉起，
/// 因此重复触发是无害的。
fn ensure_overlay_running(
  handle: &mut Option<thread::JoinHandle<()>>,
  session: &Arc<Mutex<PlayerSession>>,
  playback: &Arc<PlaybinEngine>,
  switch: &TrackingSwitch,
) {
  let running = handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false);
  if running {
    return;
  }
  if switch.is_enabled() && playback.state() == PlaybackState::Playing {
    info!("拉起叠加循环");
    *handle = Some(spawn_overlay_loop(session.clone(), playback.clone()));
  }
}

fn print_status(
  playback: &PlaybinEngine,
  switch: &TrackingSwitch,
  stopwatch: &Stopwatch,
  session: &Arc<Mutex<PlayerSession>>,
) {
  let position = playback
    .position_ms()
    .map(|ms| format!("{:.1}s", ms as f64 / 1_000.0))
    .unwrap_or_else(|| "?".to_string());
  let duration = playback
    .duration_ms()
    .map(|ms| format!("{:.1}s", ms as f64 / 1_000.0))
    .unwrap_or_else(|| "?".to_string());
  let state = match playback.state() {
    PlaybackState::Playing => "播放中",
    PlaybackState::Paused => "已暂停",
    PlaybackState::Stopped => "已停止",
  };

  println!("回放: {} {} / {}", state, position, duration);
  println!(
    "跟踪: {} (已处理 {} 帧)",
    if switch.is_enabled() { "开启" } else { "关闭" },
    session.lock().unwrap().frame_counter()
  );
  println!("秒表: {}", stopwatch.display());
}
