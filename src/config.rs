// 该文件是 Daoyin （导引） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::time::Duration;

use crate::haptic::HapticState;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_STARTUP_DELAY_MS: u64 = 2000;

pub const DEFAULT_LOGISTIC_STEEPNESS: f32 = 9.19;
pub const DEFAULT_MAX_PERIOD_MS: u64 = 1000;
pub const DEFAULT_MIN_PERIOD_MS: u64 = 1;
pub const DEFAULT_MIN_INTENSITY: u8 = 1;
pub const DEFAULT_MAX_INTENSITY: u8 = 255;
pub const DEFAULT_INITIAL_INTENSITY: u8 = 100;

/// 路由振动更新时使用的固定信号，经 logistic 变换后接近满幅
///
/// 不沿用旧版应用的常量 100：该值经 logistic 变换后强度会降到下限 1。
pub const DEFAULT_FIXED_SIGNAL: f32 = 0.0;

/// 检测后处理参数
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  /// 置信度阈值，严格大于才保留
  pub confidence_threshold: f32,
  /// NMS IoU 阈值，严格大于才抑制
  pub iou_threshold: f32,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
    }
  }
}

/// 振动映射参数
#[derive(Debug, Clone, PartialEq)]
pub struct HapticConfig {
  pub steepness: f32,
  pub max_period: Duration,
  pub min_period: Duration,
  pub min_intensity: u8,
  pub max_intensity: u8,
  /// 尚未收到任何更新时的振动状态
  pub initial: HapticState,
}

impl Default for HapticConfig {
  fn default() -> Self {
    Self {
      steepness: DEFAULT_LOGISTIC_STEEPNESS,
      max_period: Duration::from_millis(DEFAULT_MAX_PERIOD_MS),
      min_period: Duration::from_millis(DEFAULT_MIN_PERIOD_MS),
      min_intensity: DEFAULT_MIN_INTENSITY,
      max_intensity: DEFAULT_MAX_INTENSITY,
      initial: HapticState {
        period: Duration::from_millis(DEFAULT_MAX_PERIOD_MS),
        intensity: DEFAULT_INITIAL_INTENSITY,
      },
    }
  }
}

/// 整条流水线的配置
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  /// 两轮轮询之间的休眠时长
  pub poll_interval: Duration,
  /// 第一轮轮询前的等待时长
  pub startup_delay: Duration,
  /// 最多执行的轮数，`None` 表示不限
  pub max_cycles: Option<usize>,
  /// 启动时是否使能振动
  pub haptics_enabled: bool,
  pub fixed_signal: f32,
  pub detector: DetectorConfig,
  pub haptic: HapticConfig,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
      startup_delay: Duration::from_millis(DEFAULT_STARTUP_DELAY_MS),
      max_cycles: None,
      haptics_enabled: true,
      fixed_signal: DEFAULT_FIXED_SIGNAL,
      detector: DetectorConfig::default(),
      haptic: HapticConfig::default(),
    }
  }
}
