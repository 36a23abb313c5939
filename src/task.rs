// 该文件是 Daoyin （导引） 项目的一部分。
// src/task.rs - 轮询循环、流水线生命周期与任务
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

use std::{
  sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use anyhow::{Context, anyhow};
use tracing::{debug, error, info, warn};

use crate::{
  config::PipelineConfig,
  detector::DetectionEngine,
  feedback::{FeedbackRouter, RouteSummary, action_for},
  haptic::{HapticCell, HapticDevice, HapticMapper, HapticState, start_pulses},
  input::FrameSource,
  model::{InferenceEngine, WithLabel},
  output::FeedbackDevices,
  timer::{MIN_PERIOD, RepeatingTask},
  voice::{AudioDevice, VoiceQueue},
};

/// 单轮轮询的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
  /// 没有新帧，本轮跳过
  NoFrame,
  /// 推理失败，本轮视为空
  Failed,
  Routed {
    detections: usize,
    summary: RouteSummary,
  },
}

/// 轮询统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
  pub cycles: usize,
  pub frames: usize,
  pub skipped: usize,
  pub failures: usize,
  pub detections: usize,
}

impl PollStats {
  fn record(&mut self, outcome: &CycleOutcome) {
    self.cycles += 1;
    match outcome {
      CycleOutcome::NoFrame => self.skipped += 1,
      CycleOutcome::Failed => {
        self.frames += 1;
        self.failures += 1;
      }
      CycleOutcome::Routed { detections, .. } => {
        self.frames += 1;
        self.detections += detections;
      }
    }
  }
}

/// 在 `duration` 内等待关闭信号，收到信号或发送端已关闭时返回 `true`
fn shutdown_within(shutdown: &Receiver<()>, duration: Duration) -> bool {
  !matches!(
    shutdown.recv_timeout(duration),
    Err(RecvTimeoutError::Timeout)
  )
}

/// 取帧、检测、路由，然后休眠
pub struct PollLoop<S, E> {
  source: S,
  detector: DetectionEngine<E>,
  router: FeedbackRouter,
  poll_interval: Duration,
  startup_delay: Duration,
  max_cycles: Option<usize>,
}

impl<S: FrameSource, E: InferenceEngine> PollLoop<S, E> {
  pub fn new(
    source: S,
    detector: DetectionEngine<E>,
    router: FeedbackRouter,
    config: &PipelineConfig,
  ) -> Self {
    Self {
      source,
      detector,
      router,
      poll_interval: config.poll_interval,
      startup_delay: config.startup_delay,
      max_cycles: config.max_cycles,
    }
  }

  pub fn run_cycle(&mut self) -> CycleOutcome {
    let Some(frame) = self.source.latest_frame() else {
      debug!("没有新帧，跳过本轮");
      return CycleOutcome::NoFrame;
    };
    let index = frame.index();

    match self.detector.process(frame) {
      Ok(detections) => {
        let summary = self.router.route(&detections);
        CycleOutcome::Routed {
          detections: detections.len(),
          summary,
        }
      }
      Err(e) => {
        error!("第 {} 帧检测失败: {}", index, e);
        CycleOutcome::Failed
      }
    }
  }

  /// 运行到收到关闭信号或达到轮数上限
  pub fn run(mut self, shutdown: Receiver<()>) -> PollStats {
    let mut stats = PollStats::default();

    if shutdown_within(&shutdown, self.startup_delay) {
      info!("启动等待期间收到关闭信号");
      return stats;
    }

    loop {
      let now = Instant::now();
      let outcome = self.run_cycle();
      stats.record(&outcome);
      debug!(
        "第 {} 轮: {:?}, 耗时 {:.2?}",
        stats.cycles,
        outcome,
        now.elapsed()
      );

      if self.max_cycles.map(|n| stats.cycles >= n).unwrap_or(false) {
        info!("达到指定轮数 {}, 退出轮询", stats.cycles);
        break;
      }
      if shutdown_within(&shutdown, self.poll_interval) {
        info!("收到关闭信号，退出轮询");
        break;
      }
    }

    stats
  }
}

/// 运行中的流水线，拥有轮询线程、振动任务与语音队列
pub struct Pipeline {
  shutdown: Option<Sender<()>>,
  poll: Option<JoinHandle<PollStats>>,
  haptic_task: RepeatingTask,
  haptic_cell: HapticCell,
  voice: VoiceQueue,
}

impl Pipeline {
  pub fn start<S, E, H, A>(
    config: PipelineConfig,
    source: S,
    engine: E,
    haptic: H,
    audio: A,
  ) -> anyhow::Result<Self>
  where
    S: FrameSource + Send + 'static,
    E: InferenceEngine + Send + 'static,
    H: HapticDevice,
    A: AudioDevice,
  {
    let voice = VoiceQueue::spawn(audio).context("无法启动语音队列")?;

    let mapper = HapticMapper::new(config.haptic.clone());
    let haptic_cell = mapper.cell();
    let mut haptic_task = RepeatingTask::new("haptic-timer");
    haptic_task.handle().set_enabled(config.haptics_enabled);
    start_pulses(&mut haptic_task, haptic_cell.clone(), haptic).context("无法启动振动任务")?;

    let router =
      FeedbackRouter::new(mapper, voice.handle()).with_fixed_signal(config.fixed_signal);
    let detector = DetectionEngine::new(engine, config.detector.clone());
    let poll_loop = PollLoop::new(source, detector, router, &config);

    let (shutdown, shutdown_rx) = mpsc::channel();
    let poll = thread::Builder::new()
      .name("poll-loop".to_string())
      .spawn(move || poll_loop.run(shutdown_rx))
      .context("无法启动轮询线程")?;

    info!(
      "流水线已启动: 轮询间隔 {:?}, 启动等待 {:?}, 振动 {}",
      config.poll_interval,
      config.startup_delay,
      if config.haptics_enabled { "开启" } else { "关闭" }
    );

    Ok(Self {
      shutdown: Some(shutdown),
      poll: Some(poll),
      haptic_task,
      haptic_cell,
      voice,
    })
  }

  pub fn haptic_state(&self) -> HapticState {
    self.haptic_cell.load()
  }

  pub fn set_haptics_enabled(&self, enabled: bool) {
    self.haptic_task.handle().set_enabled(enabled);
  }

  pub fn is_voice_busy(&self) -> bool {
    self.voice.is_busy()
  }

  /// 轮询线程是否已退出
  pub fn is_finished(&self) -> bool {
    self
      .poll
      .as_ref()
      .map(|poll| poll.is_finished())
      .unwrap_or(true)
  }

  /// 停止全部活动并返回轮询统计
  pub fn shutdown(mut self) -> PollStats {
    self.teardown().unwrap_or_default()
  }

  fn teardown(&mut self) -> Option<PollStats> {
    // 关闭发送端即唤醒轮询线程
    drop(self.shutdown.take());
    let stats = match self.poll.take() {
      Some(poll) => match poll.join() {
        Ok(stats) => Some(stats),
        Err(_) => {
          error!("轮询线程异常退出");
          None
        }
      },
      None => None,
    };

    self.haptic_task.stop();
    if let Err(e) = self.voice.stop() {
      warn!("停止语音队列失败: {}", e);
    }
    if let Some(stats) = &stats {
      info!("流水线已停止: {:?}", stats);
    }
    stats
  }
}

impl Drop for Pipeline {
  fn drop(&mut self) {
    self.teardown();
  }
}

pub trait Task<S, E, O>: Sized {
  type Error;
  fn run_task(self, input: S, model: E, output: O) -> Result<(), Self::Error>;
}

/// 一次性任务等待语音播放结束的最长时间
const ONE_SHOT_VOICE_TIMEOUT: Duration = Duration::from_secs(30);

/// 只处理一帧：检测、打印结果，再把反馈播放一次
#[derive(Default, Debug)]
pub struct OneShotTask {
  config: PipelineConfig,
}

impl OneShotTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self { config }
  }
}

impl<S, E, H, A> Task<S, E, FeedbackDevices<H, A>> for OneShotTask
where
  S: FrameSource,
  E: InferenceEngine,
  H: HapticDevice,
  A: AudioDevice,
{
  type Error = anyhow::Error;

  fn run_task(self, input: S, model: E, output: FeedbackDevices<H, A>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.latest_frame().ok_or_else(|| anyhow!("没有输入帧"))?;
    info!(
      "输入帧获取成功 ({}x{})，开始推理...",
      frame.width(),
      frame.height()
    );

    let mut detector = DetectionEngine::new(model, self.config.detector.clone());
    let now = Instant::now();
    let detections = detector.process(frame).context("检测失败")?;
    info!(
      "推理完成，耗时: {:.2?}, 共 {} 个目标",
      now.elapsed(),
      detections.len()
    );
    for det in &detections {
      let (cx, cy) = det.bbox.center();
      info!(
        "  - {}: {:.2}% 中心 ({:.3}, {:.3}) -> {:?}",
        det.label().to_label_str(),
        det.confidence * 100.0,
        cx,
        cy,
        action_for(det.label())
      );
    }

    let FeedbackDevices { mut haptic, audio } = output;
    let voice = VoiceQueue::spawn(audio).context("无法启动语音队列")?;
    let mapper = HapticMapper::new(self.config.haptic.clone());
    let mut router =
      FeedbackRouter::new(mapper, voice.handle()).with_fixed_signal(self.config.fixed_signal);
    let summary = router.route(&detections);

    if summary.haptic_updates > 0 && self.config.haptics_enabled {
      let state = router.haptic().state();
      info!("振动参数: 周期 {:?}, 强度 {}", state.period, state.intensity);
      if let Err(e) = haptic.vibrate((state.period / 2).max(MIN_PERIOD), state.intensity) {
        warn!("振动失败: {}", e);
      }
    }

    let deadline = Instant::now() + ONE_SHOT_VOICE_TIMEOUT;
    while voice.is_busy() {
      if Instant::now() > deadline {
        warn!("语音播放超时");
        break;
      }
      thread::sleep(Duration::from_millis(10));
    }

    info!("任务完成: {:?}", summary);
    Ok(())
  }
}

/// 持续运行的引导任务，Ctrl-C 退出
#[derive(Default, Debug)]
pub struct ContinuousTask {
  config: PipelineConfig,
}

impl ContinuousTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self { config }
  }
}

impl<S, E, H, A> Task<S, E, FeedbackDevices<H, A>> for ContinuousTask
where
  S: FrameSource + Send + 'static,
  E: InferenceEngine + Send + 'static,
  H: HapticDevice,
  A: AudioDevice,
{
  type Error = anyhow::Error;

  fn run_task(self, input: S, model: E, output: FeedbackDevices<H, A>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("无法设置 Ctrl-C 处理函数")?;

    let FeedbackDevices { haptic, audio } = output;
    let pipeline = Pipeline::start(self.config, input, model, haptic, audio)?;

    loop {
      if pipeline.is_finished() {
        info!("轮询已结束，退出任务");
        break;
      }
      match rx.recv_timeout(Duration::from_millis(200)) {
        Ok(()) => {
          warn!("中断信号接收，退出任务循环");
          break;
        }
        Err(RecvTimeoutError::Timeout) => continue,
        Err(RecvTimeoutError::Disconnected) => break,
      }
    }

    let stats = pipeline.shutdown();
    info!(
      "共 {} 轮, 处理 {} 帧, 检测到 {} 个目标, 失败 {} 次",
      stats.cycles, stats.frames, stats.detections, stats.failures
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    config::HapticConfig,
    frame::{Frame, NhwcTensor},
    haptic::HapticError,
    model::RawTensor,
    voice::{AudioError, ClipId, Completion, Playback},
  };
  use image::RgbImage;
  use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  };

  /// 依次返回预置的帧
  struct QueuedFrames {
    frames: Mutex<Vec<Frame>>,
  }

  impl QueuedFrames {
    fn new(count: u64) -> Self {
      Self {
        frames: Mutex::new(
          (0..count)
            .rev()
            .map(|i| Frame::new(RgbImage::new(64, 64), i))
            .collect(),
        ),
      }
    }
  }

  impl FrameSource for QueuedFrames {
    fn latest_frame(&self) -> Option<Frame> {
      self.frames.lock().unwrap().pop()
    }
  }

  /// 候选 0 为画面中心的出口标志；`fail` 时返回错误
  struct ExitEngine {
    fail: bool,
    runs: Arc<AtomicUsize>,
  }

  impl InferenceEngine for ExitEngine {
    type Error = std::io::Error;

    fn input_size(&self) -> (u32, u32) {
      (64, 64)
    }

    fn output_shape(&self) -> (usize, usize) {
      (10, 1)
    }

    fn run(&mut self, _input: &NhwcTensor) -> Result<RawTensor, Self::Error> {
      self.runs.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        return Err(std::io::Error::other("推理失败"));
      }
      let data = vec![32.0, 32.0, 8.0, 8.0, 0.0, 0.0, 0.0, 0.9, 0.0, 0.0];
      Ok(RawTensor::new(10, 1, data).unwrap())
    }
  }

  struct NoHaptic;

  impl HapticDevice for NoHaptic {
    fn vibrate(&mut self, _: Duration, _: u8) -> Result<(), HapticError> {
      Ok(())
    }
  }

  struct NoAudio;

  impl AudioDevice for NoAudio {
    fn play_clip(&mut self, clip: ClipId, _: Completion) -> Result<Box<dyn Playback>, AudioError> {
      Err(AudioError::ClipLoad(clip))
    }
  }

  fn quick_config(max_cycles: Option<usize>) -> PipelineConfig {
    PipelineConfig {
      poll_interval: Duration::from_millis(1),
      startup_delay: Duration::ZERO,
      max_cycles,
      ..PipelineConfig::default()
    }
  }

  fn poll_loop(
    frames: u64,
    fail: bool,
    config: &PipelineConfig,
  ) -> PollLoop<QueuedFrames, ExitEngine> {
    let voice = VoiceQueue::spawn(NoAudio).unwrap();
    let router = FeedbackRouter::new(HapticMapper::new(HapticConfig::default()), voice.handle());
    let engine = ExitEngine {
      fail,
      runs: Arc::new(AtomicUsize::new(0)),
    };
    PollLoop::new(
      QueuedFrames::new(frames),
      DetectionEngine::new(engine, config.detector.clone()),
      router,
      config,
    )
  }

  #[test]
  fn cycle_outcomes() {
    let config = quick_config(None);
    let mut poll = poll_loop(1, false, &config);

    assert_eq!(
      poll.run_cycle(),
      CycleOutcome::Routed {
        detections: 1,
        summary: RouteSummary {
          haptic_updates: 1,
          ..RouteSummary::default()
        },
      }
    );
    assert_eq!(poll.run_cycle(), CycleOutcome::NoFrame);

    let mut failing = poll_loop(1, true, &config);
    assert_eq!(failing.run_cycle(), CycleOutcome::Failed);
  }

  #[test]
  fn run_continues_after_inference_failure() {
    let config = quick_config(Some(3));
    let (_tx, rx) = mpsc::channel();
    let stats = poll_loop(3, true, &config).run(rx);

    assert_eq!(
      stats,
      PollStats {
        cycles: 3,
        frames: 3,
        skipped: 0,
        failures: 3,
        detections: 0,
      }
    );
  }

  #[test]
  fn run_stops_at_cycle_limit() {
    let config = quick_config(Some(3));
    let (_tx, rx) = mpsc::channel();
    let stats = poll_loop(2, false, &config).run(rx);

    assert_eq!(
      stats,
      PollStats {
        cycles: 3,
        frames: 2,
        skipped: 1,
        failures: 0,
        detections: 2,
      }
    );
  }

  #[test]
  fn shutdown_cancels_startup_delay() {
    let config = PipelineConfig {
      startup_delay: Duration::from_secs(60),
      ..quick_config(None)
    };
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || poll_loop(1, false, &config).run(rx));

    let now = Instant::now();
    drop(tx);
    let stats = handle.join().unwrap();
    assert!(now.elapsed() < Duration::from_secs(5));
    assert_eq!(stats.cycles, 0);
  }

  #[test]
  fn pipeline_updates_haptics_and_shuts_down() {
    let runs = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::start(
      quick_config(None),
      QueuedFrames::new(3),
      ExitEngine {
        fail: false,
        runs: runs.clone(),
      },
      NoHaptic,
      NoAudio,
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while runs.load(Ordering::SeqCst) < 3 {
      assert!(Instant::now() < deadline);
      thread::sleep(Duration::from_millis(2));
    }
    assert!(pipeline.haptic_state().period <= Duration::from_millis(20));
    assert!(!pipeline.is_finished());

    let stats = pipeline.shutdown();
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.detections, 3);
  }
}
