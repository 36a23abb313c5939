// 该文件是 Daoyin （导引） 项目的一部分。
// src/output/console.rs - 以日志代替硬件的反馈设备
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  sync::mpsc::{self, RecvTimeoutError, Sender},
  thread,
  time::Duration,
};

use tracing::{debug, info};

use crate::{
  haptic::{HapticDevice, HapticError},
  voice::{AudioDevice, AudioError, ClipId, Completion, Playback},
};

#[derive(Debug, Default)]
pub struct LogHapticDevice {
  pulses: u64,
}

impl LogHapticDevice {
  pub fn pulses(&self) -> u64 {
    self.pulses
  }
}

impl HapticDevice for LogHapticDevice {
  fn vibrate(&mut self, duration: Duration, intensity: u8) -> Result<(), HapticError> {
    if intensity == 0 {
      return Err(HapticError::InvalidParameter {
        duration,
        intensity,
      });
    }
    self.pulses += 1;
    debug!("振动 {:?}, 强度 {}", duration, intensity);
    Ok(())
  }
}

/// 每段语音“播放” `clip_duration` 后自动完成
#[derive(Debug, Clone)]
pub struct LogAudioDevice {
  clip_duration: Duration,
}

impl LogAudioDevice {
  pub fn new(clip_duration: Duration) -> Self {
    Self { clip_duration }
  }
}

impl AudioDevice for LogAudioDevice {
  fn play_clip(
    &mut self,
    clip: ClipId,
    completion: Completion,
  ) -> Result<Box<dyn Playback>, AudioError> {
    info!("播放语音: {}", clip);
    let (cancel, cancelled) = mpsc::channel::<()>();
    let duration = self.clip_duration;

    thread::Builder::new()
      .name(format!("clip-{}", clip.file_name()))
      .spawn(move || match cancelled.recv_timeout(duration) {
        Err(RecvTimeoutError::Timeout) => completion.complete(),
        _ => debug!("语音 {} 被取消", clip),
      })
      .map_err(|e| AudioError::Unavailable(e.to_string()))?;

    Ok(Box::new(LogPlayback {
      clip,
      cancel: Some(cancel),
    }))
  }
}

/// 正在“播放”的片段，停止或释放时取消完成信号
pub struct LogPlayback {
  clip: ClipId,
  cancel: Option<Sender<()>>,
}

impl Playback for LogPlayback {
  fn stop(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      debug!("停止语音: {}", self.clip);
      let _ = cancel.send(());
    }
  }
}
