// 该文件是 Daoyin （导引） 项目的一部分。
// src/input/latest.rs - 只保留最新一帧的缓存槽
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

use std::sync::{
  Mutex, MutexGuard,
  atomic::{AtomicU64, Ordering},
};

use tracing::trace;

use crate::{frame::Frame, input::FrameSource};

/// 相机回调写入、轮询线程取出
///
/// 新帧替换旧帧时旧帧立即释放；取出后槽为空，同一帧不会被处理两次。
#[derive(Default)]
pub struct LatestFrameSlot {
  slot: Mutex<Option<Frame>>,
  dropped: AtomicU64,
}

impl LatestFrameSlot {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn publish(&self, frame: Frame) {
    let replaced = self.lock().replace(frame);
    // 在锁外释放旧帧
    if let Some(old) = replaced {
      trace!("丢弃未处理的第 {} 帧", old.index());
      self.dropped.fetch_add(1, Ordering::Relaxed);
    }
  }

  /// 未被处理就被替换的帧数
  pub fn dropped_frames(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }

  fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
    self
      .slot
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

impl FrameSource for LatestFrameSlot {
  fn latest_frame(&self) -> Option<Frame> {
    self.lock().take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;
  use std::sync::{Arc, atomic::AtomicUsize};

  fn frame(index: u64, released: &Arc<AtomicUsize>) -> Frame {
    let released = released.clone();
    Frame::new(RgbImage::new(4, 4), index).with_release(move || {
      released.fetch_add(1, Ordering::SeqCst);
    })
  }

  #[test]
  fn newer_frame_releases_older() {
    let slot = LatestFrameSlot::new();
    let released = Arc::new(AtomicUsize::new(0));

    slot.publish(frame(1, &released));
    slot.publish(frame(2, &released));
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(slot.dropped_frames(), 1);

    let latest = slot.latest_frame().unwrap();
    assert_eq!(latest.index(), 2);
    drop(latest);
    assert_eq!(released.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn frame_is_taken_once() {
    let slot = LatestFrameSlot::new();
    let released = Arc::new(AtomicUsize::new(0));

    assert!(slot.latest_frame().is_none());
    slot.publish(frame(7, &released));
    assert!(slot.latest_frame().is_some());
    assert!(slot.latest_frame().is_none());
  }

  #[test]
  fn slot_drop_releases_pending_frame() {
    let released = Arc::new(AtomicUsize::new(0));
    {
      let slot = LatestFrameSlot::new();
      slot.publish(frame(1, &released));
    }
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }
}
