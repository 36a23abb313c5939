// 该文件是 Daoyin （导引） 项目的一部分。
// src/voice.rs - 顺序播放、带防抖的语音指引队列
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
  collections::VecDeque,
  fmt,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, Sender},
  },
  thread::{self, JoinHandle},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

/// 语音片段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipId {
  Fence,
  RoundHandle,
  LeverHandle,
  PushbarHandle,
  HandleInstruction,
}

impl ClipId {
  pub fn file_name(&self) -> &'static str {
    match self {
      ClipId::Fence => "fence.mp3",
      ClipId::RoundHandle => "roundhandle.mp3",
      ClipId::LeverHandle => "leverhandle.mp3",
      ClipId::PushbarHandle => "pushbarhandle.mp3",
      ClipId::HandleInstruction => "handleinstruction.mp3",
    }
  }
}

impl fmt::Display for ClipId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.file_name())
  }
}

#[derive(Error, Debug)]
pub enum AudioError {
  #[error("音频设备不可用: {0}")]
  Unavailable(String),
  #[error("语音片段 {0} 加载失败")]
  ClipLoad(ClipId),
}

#[derive(Error, Debug)]
pub enum VoiceQueueError {
  #[error("无法启动语音线程: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("语音线程已退出")]
  WorkerGone,
}

/// 正在播放的片段，drop 即释放
pub trait Playback: Send {
  fn stop(&mut self);
}

/// 音频硬件
pub trait AudioDevice: Send + 'static {
  /// 开始播放，片段结束时由设备调用 [`Completion::complete`]
  fn play_clip(
    &mut self,
    clip: ClipId,
    completion: Completion,
  ) -> Result<Box<dyn Playback>, AudioError>;
}

impl<A: AudioDevice + ?Sized> AudioDevice for Box<A> {
  fn play_clip(
    &mut self,
    clip: ClipId,
    completion: Completion,
  ) -> Result<Box<dyn Playback>, AudioError> {
    (**self).play_clip(clip, completion)
  }
}

enum Command {
  Enqueue(Vec<ClipId>),
  Completed(u64),
  Stop(Sender<()>),
  Shutdown,
}

/// 播放完成信号，只能发送一次
pub struct Completion {
  token: u64,
  tx: Sender<Command>,
}

impl Completion {
  pub fn complete(self) {
    // 队列已关闭时忽略
    let _ = self.tx.send(Command::Completed(self.token));
  }
}

impl fmt::Debug for Completion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Completion")
      .field("token", &self.token)
      .finish()
  }
}

/// 可在线程间传递的语音队列句柄
#[derive(Clone)]
pub struct VoiceHandle {
  busy: Arc<AtomicBool>,
  tx: Sender<Command>,
}

impl VoiceHandle {
  /// 请求播放一组片段；正在播放时丢弃请求并返回 `false`
  pub fn request_guide(&self, clips: &[ClipId]) -> bool {
    if clips.is_empty() {
      return false;
    }
    if self
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("语音正在播放，忽略请求: {:?}", clips);
      return false;
    }

    if self.tx.send(Command::Enqueue(clips.to_vec())).is_err() {
      warn!("语音线程已退出，忽略请求: {:?}", clips);
      self.busy.store(false, Ordering::Release);
      return false;
    }
    debug!("语音请求已接受: {:?}", clips);
    true
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }

  /// 清空队列并停止当前播放，返回时已回到空闲
  pub fn stop(&self) -> Result<(), VoiceQueueError> {
    let (ack_tx, ack_rx) = mpsc::channel();
    self
      .tx
      .send(Command::Stop(ack_tx))
      .map_err(|_| VoiceQueueError::WorkerGone)?;
    ack_rx.recv().map_err(|_| VoiceQueueError::WorkerGone)
  }
}

/// 语音队列，拥有后台播放线程
pub struct VoiceQueue {
  handle: VoiceHandle,
  thread: Option<JoinHandle<()>>,
}

impl VoiceQueue {
  pub fn spawn<A: AudioDevice>(device: A) -> Result<Self, VoiceQueueError> {
    let busy = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();

    let mut worker = QueueWorker {
      device,
      busy: busy.clone(),
      tx: tx.clone(),
      pending: VecDeque::new(),
      current: None,
      next_token: 0,
    };
    let thread = thread::Builder::new()
      .name("voice-queue".to_string())
      .spawn(move || worker.run(rx))?;
    info!("语音队列已启动");

    Ok(Self {
      handle: VoiceHandle { busy, tx },
      thread: Some(thread),
    })
  }

  pub fn handle(&self) -> VoiceHandle {
    self.handle.clone()
  }

  pub fn request_guide(&self, clips: &[ClipId]) -> bool {
    self.handle.request_guide(clips)
  }

  pub fn is_busy(&self) -> bool {
    self.handle.is_busy()
  }

  pub fn stop(&self) -> Result<(), VoiceQueueError> {
    self.handle.stop()
  }
}

impl Drop for VoiceQueue {
  fn drop(&mut self) {
    if let Some(thread) = self.thread.take() {
      let _ = self.handle.tx.send(Command::Shutdown);
      if thread.join().is_err() {
        error!("语音线程异常退出");
      } else {
        info!("语音队列已关闭");
      }
    }
  }
}

struct QueueWorker<A> {
  device: A,
  busy: Arc<AtomicBool>,
  tx: Sender<Command>,
  pending: VecDeque<ClipId>,
  current: Option<(u64, Box<dyn Playback>)>,
  next_token: u64,
}

impl<A: AudioDevice> QueueWorker<A> {
  fn run(&mut self, rx: Receiver<Command>) {
    while let Ok(command) = rx.recv() {
      match command {
        Command::Enqueue(clips) => {
          // 并发的 stop 可能已在请求送达前清除了 busy
          self.busy.store(true, Ordering::Release);
          self.pending.extend(clips);
          if self.current.is_none() {
            self.play_next();
          }
        }
        Command::Completed(token) => match &self.current {
          Some((current, _)) if *current == token => {
            // 先释放上一段，再开始下一段
            self.current = None;
            self.play_next();
          }
          _ => debug!("忽略过期的完成信号 {}", token),
        },
        Command::Stop(ack) => {
          self.reset();
          let _ = ack.send(());
        }
        Command::Shutdown => {
          self.reset();
          break;
        }
      }
    }
  }

  fn play_next(&mut self) {
    while let Some(clip) = self.pending.pop_front() {
      self.next_token += 1;
      let completion = Completion {
        token: self.next_token,
        tx: self.tx.clone(),
      };
      match self.device.play_clip(clip, completion) {
        Ok(playback) => {
          debug!("播放语音 {}", clip);
          self.current = Some((self.next_token, playback));
          return;
        }
        Err(e) => warn!("语音 {} 播放失败: {}", clip, e),
      }
    }
    self.busy.store(false, Ordering::Release);
    debug!("语音队列空闲");
  }

  fn reset(&mut self) {
    if let Some((_, mut playback)) = self.current.take() {
      playback.stop();
    }
    self.pending.clear();
    self.busy.store(false, Ordering::Release);
  }
}
