// 该文件是 Daoyin （导引） 项目的一部分。
// src/geometry.rs - 几何变换：Letterbox、边界框解码、IoU 与 NMS
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

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;

/// Letterbox 填充色（中性灰）
pub const LETTERBOX_FILL: [u8; 3] = [114, 114, 114];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GeometryError {
  #[error("源图像尺寸无效: {0}x{1}")]
  EmptySource(u32, u32),
  #[error("目标尺寸无效: {0}x{1}")]
  EmptyTarget(u32, u32),
}

/// 归一化边界框
///
/// `(x, y)` 为左上角，宽高与坐标均相对于原始（Letterbox 之前的）帧，
/// 取值通常位于 `[0, 1]`。宽高为 0 的退化框是合法的，其面积为 0。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width: width.max(0.0),
      height: height.max(0.0),
    }
  }

  /// 由中心点与宽高构造
  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    let width = width.max(0.0);
    let height = height.max(0.0);
    Self {
      x: cx - width / 2.0,
      y: cy - height / 2.0,
      width,
      height,
    }
  }

  pub fn center(&self) -> (f32, f32) {
    (self.x + self.width / 2.0, self.y + self.height / 2.0)
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }

  /// 计算两个轴对齐边界框的 IoU，并集面积不为正时返回 0
  pub fn iou(&self, other: &BBox) -> f32 {
    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = self.right().min(other.right());
    let y2 = self.bottom().min(other.bottom());

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

/// Letterbox 变换参数
///
/// 记录缩放后内容区域在模型输入画布中的位置，
/// 解码时据此把模型像素坐标还原到原始帧的归一化坐标。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub target_width: u32,
  pub target_height: u32,
  pub content_width: u32,
  pub content_height: u32,
  pub offset_x: u32,
  pub offset_y: u32,
}

impl Letterbox {
  /// 计算把 `source` 尺寸等比缩放进 `target` 画布所需的参数
  pub fn compute(
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
  ) -> Result<Self, GeometryError> {
    if source_width == 0 || source_height == 0 {
      return Err(GeometryError::EmptySource(source_width, source_height));
    }
    if target_width == 0 || target_height == 0 {
      return Err(GeometryError::EmptyTarget(target_width, target_height));
    }

    let ratio = (target_width as f32 / source_width as f32)
      .min(target_height as f32 / source_height as f32);

    let content_width = ((source_width as f32 * ratio) as u32).clamp(1, target_width);
    let content_height = ((source_height as f32 * ratio) as u32).clamp(1, target_height);

    Ok(Self {
      target_width,
      target_height,
      content_width,
      content_height,
      offset_x: (target_width - content_width) / 2,
      offset_y: (target_height - content_height) / 2,
    })
  }

  /// 无填充的变换，源图像与模型输入同尺寸时使用
  pub fn identity(width: u32, height: u32) -> Self {
    Self {
      target_width: width,
      target_height: height,
      content_width: width,
      content_height: height,
      offset_x: 0,
      offset_y: 0,
    }
  }

  /// 水平填充占模型输入宽度的比例
  pub fn pad_x(&self) -> f32 {
    self.offset_x as f32 / self.target_width as f32
  }

  /// 垂直填充占模型输入高度的比例
  pub fn pad_y(&self) -> f32 {
    self.offset_y as f32 / self.target_height as f32
  }

  /// 把模型像素空间中的中心式 xywh 还原为原始帧归一化的左上角式边界框
  pub fn unwarp(&self, cx: f32, cy: f32, width: f32, height: f32) -> BBox {
    let (cx, scale_x) = unwarp_axis(cx, self.pad_x(), self.target_width as f32);
    let (cy, scale_y) = unwarp_axis(cy, self.pad_y(), self.target_height as f32);
    let width = width * scale_x;
    let height = height * scale_y;
    BBox::from_center(cx, cy, width, height)
  }
}

// 单轴还原：pad 换算回像素，按 dim / (dim - 2 * pad) 放大后再归一化
fn unwarp_axis(value: f32, pad_fraction: f32, dim: f32) -> (f32, f32) {
  let pad = pad_fraction * dim;
  let scale = dim / (dim - 2.0 * pad);
  ((value - pad) * scale / dim, scale / dim)
}

/// 对图像做 Letterbox：等比缩放后居中放到灰色画布上
pub fn letterbox_image(
  image: &RgbImage,
  target_width: u32,
  target_height: u32,
) -> Result<(RgbImage, Letterbox), GeometryError> {
  let letterbox = Letterbox::compute(image.width(), image.height(), target_width, target_height)?;

  let mut canvas = RgbImage::from_pixel(target_width, target_height, Rgb(LETTERBOX_FILL));
  if letterbox.content_width == image.width() && letterbox.content_height == image.height() {
    imageops::overlay(
      &mut canvas,
      image,
      letterbox.offset_x as i64,
      letterbox.offset_y as i64,
    );
  } else {
    let resized = imageops::resize(
      image,
      letterbox.content_width,
      letterbox.content_height,
      FilterType::Triangle,
    );
    imageops::overlay(
      &mut canvas,
      &resized,
      letterbox.offset_x as i64,
      letterbox.offset_y as i64,
    );
  }

  Ok((canvas, letterbox))
}

/// 可参与非极大值抑制的条目
pub trait Scored {
  fn score(&self) -> f32;
  fn bbox(&self) -> &BBox;
}

/// 非极大值抑制（类别无关）
///
/// 按置信度降序稳定排序后贪心保留，任何与已保留条目 IoU 超过阈值的
/// 低置信度条目都会被抑制，无论类别是否相同。
pub fn non_max_suppression<T: Scored>(mut items: Vec<T>, iou_threshold: f32) -> Vec<T> {
  items.sort_by(|a, b| b.score().total_cmp(&a.score()));

  let mut suppressed = vec![false; items.len()];
  for i in 0..items.len() {
    if suppressed[i] {
      continue;
    }
    for j in (i + 1)..items.len() {
      if !suppressed[j] && items[i].bbox().iou(items[j].bbox()) > iou_threshold {
        suppressed[j] = true;
      }
    }
  }

  items
    .into_iter()
    .zip(suppressed)
    .filter_map(|(item, dropped)| (!dropped).then_some(item))
    .collect()
}
