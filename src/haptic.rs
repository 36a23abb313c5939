// 该文件是 Daoyin （导引） 项目的一部分。
// src/haptic.rs - 振动反馈映射
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
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  config::HapticConfig,
  timer::{MIN_PERIOD, RepeatingTask},
};

/// 饱和 logistic 函数 `1 / (1 + exp(k (x - 0.5)))`，随 x 单调递减
pub fn logistic(x: f32, steepness: f32) -> f32 {
  1.0 / (1.0 + (steepness * (x - 0.5)).exp())
}

/// 振动参数：重复周期与强度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HapticState {
  pub period: Duration,
  pub intensity: u8,
}

impl HapticState {
  // 高位存周期毫秒，低 8 位存强度
  fn pack(&self) -> u64 {
    let period_ms = (self.period.as_millis() as u64).min(u64::MAX >> 8);
    (period_ms << 8) | self.intensity as u64
  }

  fn unpack(bits: u64) -> Self {
    Self {
      period: Duration::from_millis(bits >> 8),
      intensity: (bits & 0xFF) as u8,
    }
  }
}

/// 进程内共享的振动状态，一次原子写入同时更新周期与强度
#[derive(Debug, Clone)]
pub struct HapticCell {
  bits: Arc<AtomicU64>,
}

impl HapticCell {
  pub fn new(state: HapticState) -> Self {
    Self {
      bits: Arc::new(AtomicU64::new(state.pack())),
    }
  }

  pub fn load(&self) -> HapticState {
    HapticState::unpack(self.bits.load(Ordering::Acquire))
  }

  pub fn store(&self, state: HapticState) {
    self.bits.store(state.pack(), Ordering::Release);
  }
}

/// 把连续信号映射为振动参数
///
/// 偏移信号决定周期：目标越靠近画面中线脉冲越快；固定信号决定强度。
pub struct HapticMapper {
  cell: HapticCell,
  config: HapticConfig,
}

impl HapticMapper {
  pub fn new(config: HapticConfig) -> Self {
    Self {
      cell: HapticCell::new(config.initial),
      config,
    }
  }

  pub fn cell(&self) -> HapticCell {
    self.cell.clone()
  }

  pub fn state(&self) -> HapticState {
    self.cell.load()
  }

  /// 只计算，不写入
  pub fn compute(&self, offset: f32, fixed: f32) -> HapticState {
    let max_ms = self.config.max_period.as_millis() as u64;
    let min_ms = (self.config.min_period.max(MIN_PERIOD)).as_millis() as u64;

    let rate = logistic(offset.clamp(0.0, 1.0), self.config.steepness);
    let period_ms = max_ms
      .saturating_sub((rate * max_ms as f32) as u64)
      .max(min_ms);

    let strength = logistic(fixed, self.config.steepness);
    let intensity = ((strength * self.config.max_intensity as f32) as i32).clamp(
      self.config.min_intensity as i32,
      self.config.max_intensity as i32,
    ) as u8;

    HapticState {
      period: Duration::from_millis(period_ms),
      intensity,
    }
  }

  /// 更新共享状态，下一次振动节拍生效
  pub fn update(&self, offset: f32, fixed: f32) -> HapticState {
    let state = self.compute(offset, fixed);
    debug!(
      "更新振动参数: offset {:.4}, 周期 {:?}, 强度 {}",
      offset, state.period, state.intensity
    );
    self.cell.store(state);
    state
  }
}

#[derive(Error, Debug)]
pub enum HapticError {
  #[error("振动设备不可用: {0}")]
  Unavailable(String),
  #[error("振动参数无效: 时长 {duration:?}, 强度 {intensity}")]
  InvalidParameter { duration: Duration, intensity: u8 },
}

/// 振动硬件
pub trait HapticDevice: Send + 'static {
  /// 以给定强度振动一段时间，不阻塞
  fn vibrate(&mut self, duration: Duration, intensity: u8) -> Result<(), HapticError>;
}

impl<D: HapticDevice + ?Sized> HapticDevice for Box<D> {
  fn vibrate(&mut self, duration: Duration, intensity: u8) -> Result<(), HapticError> {
    (**self).vibrate(duration, intensity)
  }
}

/// 在重复任务上启动振动脉冲
///
/// 每个节拍读取一次共享状态，振动半个周期，再把任务周期设为该状态的周期。
pub fn start_pulses<D: HapticDevice>(
  task: &mut RepeatingTask,
  cell: HapticCell,
  mut device: D,
) -> std::io::Result<()> {
  let control = task.handle();
  let initial = cell.load().period;

  task.start(initial, move || {
    let state = cell.load();
    let duration = (state.period / 2).max(MIN_PERIOD);
    if let Err(e) = device.vibrate(duration, state.intensity) {
      warn!("振动失败: {}", e);
    }
    control.set_period(state.period);
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::mpsc;

  #[test]
  fn period_grows_as_target_leaves_center() {
    let mapper = HapticMapper::new(HapticConfig::default());
    let periods = (0..=10)
      .map(|i| mapper.compute(i as f32 * 0.05, 0.0).period)
      .collect::<Vec<_>>();

    for pair in periods.windows(2) {
      assert!(pair[0] < pair[1], "{:?}", periods);
    }
    assert_eq!(periods[10], Duration::from_millis(500));
  }

  #[test]
  fn centered_target_pulses_near_fastest() {
    let mapper = HapticMapper::new(HapticConfig::default());
    let state = mapper.compute(0.0, 0.0);
    assert!(state.period <= Duration::from_millis(20), "{:?}", state);
    assert!(state.period >= Duration::from_millis(1));
  }

  #[test]
  fn intensity_is_clamped_into_device_range() {
    let mapper = HapticMapper::new(HapticConfig::default());
    assert_eq!(mapper.compute(0.0, 100.0).intensity, 1);
    assert_eq!(mapper.compute(0.0, 0.0).intensity, 252);
    assert_eq!(mapper.compute(0.0, -100.0).intensity, 255);
  }

  #[test]
  fn update_takes_last_write() {
    let mapper = HapticMapper::new(HapticConfig::default());
    let cell = mapper.cell();
    assert_eq!(cell.load(), HapticConfig::default().initial);

    mapper.update(0.4, 0.0);
    let last = mapper.update(0.1, 0.0);
    assert_eq!(cell.load(), last);
  }

  #[test]
  fn state_survives_packing() {
    let state = HapticState {
      period: Duration::from_millis(987),
      intensity: 201,
    };
    assert_eq!(HapticState::unpack(state.pack()), state);
  }

  struct FlakyDevice {
    calls: mpsc::Sender<(Duration, u8)>,
    fail: bool,
  }

  impl HapticDevice for FlakyDevice {
    fn vibrate(&mut self, duration: Duration, intensity: u8) -> Result<(), HapticError> {
      let _ = self.calls.send((duration, intensity));
      self.fail = !self.fail;
      if self.fail {
        Err(HapticError::Unavailable("测试".to_string()))
      } else {
        Ok(())
      }
    }
  }

  #[test]
  fn pulses_follow_live_state_and_survive_failures() {
    let cell = HapticCell::new(HapticState {
      period: Duration::from_millis(10),
      intensity: 100,
    });
    let (tx, rx) = mpsc::channel();
    let mut task = RepeatingTask::new("haptic-test");
    start_pulses(
      &mut task,
      cell.clone(),
      FlakyDevice {
        calls: tx,
        fail: false,
      },
    )
    .unwrap();

    let timeout = Duration::from_secs(2);
    assert_eq!(
      rx.recv_timeout(timeout).unwrap(),
      (Duration::from_millis(5), 100)
    );
    // 失败之后节拍继续
    rx.recv_timeout(timeout).unwrap();

    cell.store(HapticState {
      period: Duration::from_millis(20),
      intensity: 42,
    });
    let seen = (0..10)
      .filter_map(|_| rx.recv_timeout(timeout).ok())
      .any(|call| call == (Duration::from_millis(10), 42));
    task.stop();
    assert!(seen);
  }
}
