// 该文件是 Daoyin （导引） 项目的一部分。
// src/bin/simple_oneshot.rs - 单帧检测与反馈测试
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use url::Url;

use daoyin::{
  FromUrl,
  config::PipelineConfig,
  input::InputWrapper,
  model::ModelWrapper,
  output::FeedbackDevices,
  task::{OneShotTask, Task},
};
use tracing::info;

/// 单帧检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);

  let model = ModelWrapper::from_url(&args.model)?;
  let input = InputWrapper::from_url(&args.input)?;
  let devices = FeedbackDevices::logging(Duration::from_millis(200));

  OneShotTask::new(PipelineConfig::default()).run_task(input, model, devices)
}
