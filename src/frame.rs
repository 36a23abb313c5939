// 该文件是 Daoyin （导引） 项目的一部分。
// src/frame.rs - 帧与 NHWC 输入张量定义
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

use image::RgbImage;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// 一帧已解码的 RGB 图像
///
/// 帧在任意时刻只属于一个组件，所有权从输入源转移给检测引擎。
/// 附带的释放回调在帧被丢弃时恰好调用一次，无论是正常路径还是取消路径。
pub struct Frame {
  image: RgbImage,
  index: u64,
  timestamp_ms: i64,
  release: Option<ReleaseHook>,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms: chrono::Utc::now().timestamp_millis(),
      release: None,
    }
  }

  /// 设置释放回调，由持有底层缓冲区的采集端提供
  pub fn with_release<F>(mut self, release: F) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    self.release = Some(Box::new(release));
    self
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn timestamp_ms(&self) -> i64 {
    self.timestamp_ms
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

impl std::fmt::Debug for Frame {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Frame")
      .field("index", &self.index)
      .field("width", &self.image.width())
      .field("height", &self.image.height())
      .field("timestamp_ms", &self.timestamp_ms)
      .finish()
  }
}

impl Drop for Frame {
  fn drop(&mut self) {
    if let Some(release) = self.release.take() {
      release();
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorLayoutError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 归一化后的模型输入，布局为 `[1][H][W][3]`，通道顺序 R、G、B，取值 `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct NhwcTensor {
  width: u32,
  height: u32,
  data: Box<[f32]>,
}

impl NhwcTensor {
  pub fn from_vec(width: u32, height: u32, data: Vec<f32>) -> Result<Self, TensorLayoutError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(TensorLayoutError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[f32] {
    &self.data
  }
}

impl From<&RgbImage> for NhwcTensor {
  fn from(image: &RgbImage) -> Self {
    let data = image
      .as_raw()
      .iter()
      .map(|&value| value as f32 / 255.0)
      .collect::<Vec<_>>();

    Self {
      width: image.width(),
      height: image.height(),
      data: data.into_boxed_slice(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  #[test]
  fn release_hook_runs_exactly_once_on_drop() {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    let frame = Frame::new(RgbImage::new(2, 2), 7).with_release(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(released.load(Ordering::SeqCst), 0);
    drop(frame);
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn normalization_keeps_rgb_order() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([255, 0, 51]));
    image.put_pixel(1, 0, Rgb([0, 102, 255]));

    let tensor = NhwcTensor::from(&image);
    let expected = [1.0, 0.0, 0.2, 0.0, 0.4, 1.0];
    for (got, want) in tensor.as_nhwc().iter().zip(expected) {
      assert!((got - want).abs() < 1e-6);
    }
  }

  #[test]
  fn from_vec_checks_length() {
    assert!(NhwcTensor::from_vec(2, 2, vec![0.0; 12]).is_ok());
    assert_eq!(
      NhwcTensor::from_vec(2, 2, vec![0.0; 11]),
      Err(TensorLayoutError::LengthMismatch {
        expected: 12,
        actual: 11
      })
    );
  }
}
