// 该文件是 Daoyin （导引） 项目的一部分。
// src/detector.rs - 逃生设施检测器
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

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::DetectorConfig,
  frame::{Frame, NhwcTensor},
  geometry::{GeometryError, Letterbox, letterbox_image, non_max_suppression},
  model::{BOX_ATTRIBUTES, Detection, InferenceEngine, RawTensor, TensorError, WithLabel},
};

#[derive(Error, Debug)]
pub enum DetectError<E: std::error::Error + 'static> {
  #[error("Letterbox 失败: {0}")]
  Geometry(#[from] GeometryError),
  #[error("推理失败: {0}")]
  Inference(#[source] E),
  #[error("输出张量无效: {0}")]
  Tensor(#[from] TensorError),
}

/// 检测引擎：Letterbox、归一化、推理、后处理
pub struct DetectionEngine<E> {
  engine: E,
  config: DetectorConfig,
}

impl<E: InferenceEngine> DetectionEngine<E> {
  pub fn new(engine: E, config: DetectorConfig) -> Self {
    let (w, h) = engine.input_size();
    let (attributes, candidates) = engine.output_shape();
    info!(
      "检测引擎就绪: 输入 {}x{}, 输出 {} x {}, 置信度阈值 {}, NMS 阈值 {}",
      w, h, attributes, candidates, config.confidence_threshold, config.iou_threshold
    );
    if attributes <= BOX_ATTRIBUTES {
      warn!("模型输出属性数 {} 不足以包含类别分数", attributes);
    }

    Self { engine, config }
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn input_size(&self) -> (u32, u32) {
    self.engine.input_size()
  }

  /// 处理一帧，帧在完成 Letterbox 后即被释放
  pub fn process(&mut self, frame: Frame) -> Result<Vec<Detection>, DetectError<E::Error>> {
    let (w, h) = self.engine.input_size();
    let (canvas, letterbox) = letterbox_image(frame.image(), w, h)?;
    debug!(
      "第 {} 帧 {}x{} Letterbox 到 {}x{}, 填充 ({:.4}, {:.4})",
      frame.index(),
      frame.width(),
      frame.height(),
      w,
      h,
      letterbox.pad_x(),
      letterbox.pad_y()
    );
    drop(frame);

    let input = NhwcTensor::from(&canvas);
    let now = std::time::Instant::now();
    let tensor = self.engine.run(&input).map_err(DetectError::Inference)?;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    let detections = postprocess(&tensor, &letterbox, &self.config);
    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }
}

/// 选出某个候选的最高类别分数，并列时取编号最小的类别
///
/// NaN 分数永远不会被选中；全部无效时返回类别 0 与负无穷。
pub fn select_class(tensor: &RawTensor, candidate: usize) -> (u32, f32) {
  let mut class_id = 0usize;
  let mut max_score = f32::NEG_INFINITY;
  for c in 0..tensor.num_classes() {
    let score = tensor.get(BOX_ATTRIBUTES + c, candidate);
    if score > max_score {
      max_score = score;
      class_id = c;
    }
  }
  (class_id as u32, max_score)
}

/// 原始张量后处理：类别选择、置信度过滤、框解码、NMS
pub fn postprocess(
  tensor: &RawTensor,
  letterbox: &Letterbox,
  config: &DetectorConfig,
) -> Vec<Detection> {
  let mut detections = Vec::new();

  for candidate in 0..tensor.candidates() {
    let (class_id, confidence) = select_class(tensor, candidate);
    // 严格大于阈值才保留，同时排除 NaN
    if confidence.is_nan() || confidence <= config.confidence_threshold {
      continue;
    }

    let bbox = letterbox.unwarp(
      tensor.get(0, candidate),
      tensor.get(1, candidate),
      tensor.get(2, candidate),
      tensor.get(3, candidate),
    );

    detections.push(Detection {
      class_id,
      confidence,
      bbox,
    });
  }

  let candidates = detections.len();
  let detections = non_max_suppression(detections, config.iou_threshold);
  debug!("NMS: {} -> {}", candidates, detections.len());
  for det in &detections {
    debug!(
      "  - {}: {:.2}% at ({:.3}, {:.3}, {:.3}x{:.3})",
      det.label().to_label_str(),
      det.confidence * 100.0,
      det.bbox.x,
      det.bbox.y,
      det.bbox.width,
      det.bbox.height
    );
  }

  detections
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ESCAPE_CLASS_NUM;

  const ATTRS: usize = BOX_ATTRIBUTES + ESCAPE_CLASS_NUM;

  /// 按候选列表构造 `[属性][候选]` 张量
  fn tensor_of(candidates: &[[f32; ATTRS]]) -> RawTensor {
    let n = candidates.len();
    let mut data = vec![0.0; ATTRS * n];
    for (i, cand) in candidates.iter().enumerate() {
      for (a, value) in cand.iter().enumerate() {
        data[a * n + i] = *value;
      }
    }
    RawTensor::new(ATTRS, n, data).unwrap()
  }

  fn candidate(cx: f32, cy: f32, w: f32, h: f32, class: usize, score: f32) -> [f32; ATTRS] {
    let mut c = [0.0; ATTRS];
    c[0] = cx;
    c[1] = cy;
    c[2] = w;
    c[3] = h;
    c[BOX_ATTRIBUTES + class] = score;
    c
  }

  #[test]
  fn confidence_threshold_is_strict() {
    let tensor = tensor_of(&[
      candidate(100.0, 100.0, 20.0, 20.0, 1, 0.5),
      candidate(400.0, 400.0, 20.0, 20.0, 2, 0.50001),
    ]);
    let dets = postprocess(
      &tensor,
      &Letterbox::identity(640, 640),
      &DetectorConfig::default(),
    );

    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_id, 2);
  }

  #[test]
  fn single_label_per_candidate() {
    let mut c = candidate(320.0, 320.0, 64.0, 64.0, 0, 0.7);
    c[BOX_ATTRIBUTES + 4] = 0.8;
    let dets = postprocess(
      &tensor_of(&[c]),
      &Letterbox::identity(640, 640),
      &DetectorConfig::default(),
    );

    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_id, 4);
    assert!((dets[0].confidence - 0.8).abs() < 1e-6);
  }

  #[test]
  fn ties_pick_lowest_class() {
    let mut c = candidate(320.0, 320.0, 64.0, 64.0, 2, 0.9);
    c[BOX_ATTRIBUTES + 5] = 0.9;
    assert_eq!(select_class(&tensor_of(&[c]), 0), (2, 0.9));
  }

  #[test]
  fn nan_score_never_wins() {
    let mut broken = candidate(320.0, 320.0, 64.0, 64.0, 0, f32::NAN);
    broken[BOX_ATTRIBUTES + 1] = 0.2;
    assert_eq!(select_class(&tensor_of(&[broken]), 0), (1, 0.2));

    let all_nan = [f32::NAN; ATTRS];
    let (_, score) = select_class(&tensor_of(&[all_nan]), 0);
    assert_eq!(score, f32::NEG_INFINITY);
  }

  #[test]
  fn nan_candidate_does_not_suppress_real_box() {
    let tensor = tensor_of(&[
      candidate(320.0, 320.0, 64.0, 64.0, 0, f32::NAN),
      candidate(320.0, 320.0, 64.0, 64.0, 3, 0.9),
    ]);
    let dets = postprocess(
      &tensor,
      &Letterbox::identity(640, 640),
      &DetectorConfig::default(),
    );

    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_id, 3);
    assert!((dets[0].confidence - 0.9).abs() < 1e-6);
  }

  #[test]
  fn suppression_is_class_agnostic() {
    let tensor = tensor_of(&[
      candidate(320.0, 320.0, 100.0, 100.0, 0, 0.8),
      candidate(322.0, 320.0, 100.0, 100.0, 5, 0.95),
    ]);
    let dets = postprocess(
      &tensor,
      &Letterbox::identity(640, 640),
      &DetectorConfig::default(),
    );

    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_id, 5);
  }

  #[test]
  fn boxes_are_unletterboxed_to_frame_coordinates() {
    // 1280x720 放入 640x640: 内容 640x360, 上下各填充 140
    let letterbox = Letterbox::compute(1280, 720, 640, 640).unwrap();
    let tensor = tensor_of(&[candidate(160.0, 230.0, 64.0, 36.0, 3, 0.9)]);
    let dets = postprocess(&tensor, &letterbox, &DetectorConfig::default());

    assert_eq!(dets.len(), 1);
    let (cx, cy) = dets[0].bbox.center();
    assert!((cx - 0.25).abs() < 1e-5);
    assert!((cy - 0.25).abs() < 1e-5);
    assert!((dets[0].bbox.width - 0.1).abs() < 1e-5);
    assert!((dets[0].bbox.height - 0.1).abs() < 1e-5);
  }
}
