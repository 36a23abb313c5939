// 该文件是 Daoyin （导引） 项目的一部分。
// src/output.rs - 反馈输出设备
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::{haptic::HapticDevice, voice::AudioDevice};

mod console;
pub use self::console::{LogAudioDevice, LogHapticDevice, LogPlayback};

/// 一套反馈设备：振动与音频
pub struct FeedbackDevices<H, A> {
  pub haptic: H,
  pub audio: A,
}

impl<H: HapticDevice, A: AudioDevice> FeedbackDevices<H, A> {
  pub fn new(haptic: H, audio: A) -> Self {
    Self { haptic, audio }
  }
}

impl FeedbackDevices<LogHapticDevice, LogAudioDevice> {
  /// 只写日志的设备，片段播放时长为 `clip_duration`
  pub fn logging(clip_duration: std::time::Duration) -> Self {
    Self::new(LogHapticDevice::default(), LogAudioDevice::new(clip_duration))
  }
}
