// 该文件是 Daoyin （导引） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use daoyin::{
  FromUrl,
  input::InputWrapper,
  model::ModelWrapper,
  output::FeedbackDevices,
  task::{ContinuousTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("Daoyin 逃生引导");
  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("置信度阈值: {}", args.confidence);
  info!("NMS 阈值: {}", args.nms_threshold);

  let model = ModelWrapper::from_url(&args.model).context("模型加载失败")?;
  let input = InputWrapper::from_url(&args.input).context("输入来源打开失败")?;
  let devices = FeedbackDevices::logging(args.clip_duration());

  ContinuousTask::new(args.pipeline_config()).run_task(input, model, devices)
}
