// 该文件是 Daoyin （导引） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Duration;

use clap::Parser;
use url::Url;

use daoyin::config::{
  DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_FIXED_SIGNAL, DEFAULT_IOU_THRESHOLD,
  DEFAULT_POLL_INTERVAL_MS, DEFAULT_STARTUP_DELAY_MS, DetectorConfig, PipelineConfig,
};

/// Daoyin 逃生引导参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  /// 支持格式:
  /// - 录制张量: tensor:///path/output.json
  /// - ONNX 模型: onnx:///path/model.onnx?size=640&threads=4
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// 支持格式:
  /// - 静态图片: image:///path/frame.jpg
  /// - 图片目录: folder:///path/frames
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_IOU_THRESHOLD, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 轮询间隔（毫秒）
  #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS, value_name = "MS")]
  pub poll_interval_ms: u64,

  /// 第一轮轮询前的等待（毫秒）
  #[arg(long, default_value_t = DEFAULT_STARTUP_DELAY_MS, value_name = "MS")]
  pub startup_delay_ms: u64,

  /// 最大轮询次数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_cycles: usize,

  /// 振动强度使用的固定信号
  #[arg(long, default_value_t = DEFAULT_FIXED_SIGNAL, value_name = "SIGNAL")]
  pub fixed_signal: f32,

  /// 日志音频设备中每段语音的时长（毫秒）
  #[arg(long, default_value = "1500", value_name = "MS")]
  pub clip_duration_ms: u64,

  /// 关闭振动反馈
  #[arg(long)]
  pub no_haptic: bool,
}

impl Args {
  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      poll_interval: Duration::from_millis(self.poll_interval_ms),
      startup_delay: Duration::from_millis(self.startup_delay_ms),
      max_cycles: (self.max_cycles > 0).then_some(self.max_cycles),
      haptics_enabled: !self.no_haptic,
      fixed_signal: self.fixed_signal,
      detector: DetectorConfig {
        confidence_threshold: self.confidence,
        iou_threshold: self.nms_threshold,
      },
      ..PipelineConfig::default()
    }
  }

  pub fn clip_duration(&self) -> Duration {
    Duration::from_millis(self.clip_duration_ms)
  }
}
