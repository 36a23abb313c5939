// 该文件是 Daoyin （导引） 项目的一部分。
// src/model.rs - 模型
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

use crate::{
  FromUrl,
  frame::NhwcTensor,
  geometry::{BBox, Scored},
};

/// 框参数个数：中心 x、中心 y、宽、高
pub const BOX_ATTRIBUTES: usize = 4;

/// 逃生设施模型的类别数
pub const ESCAPE_CLASS_NUM: usize = 6;

/// 推理后端
///
/// 输入为固定尺寸的归一化 NHWC 缓冲区，输出为 `[4 + 类别数][候选数]` 的原始张量。
/// 输入尺寸和输出形状在模型加载时确定。
pub trait InferenceEngine {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型输入尺寸 `(宽, 高)`
  fn input_size(&self) -> (u32, u32);

  /// 模型输出形状 `(属性数, 候选数)`
  fn output_shape(&self) -> (usize, usize);

  fn run(&mut self, input: &NhwcTensor) -> Result<RawTensor, Self::Error>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
  type Error = E::Error;

  fn input_size(&self) -> (u32, u32) {
    (**self).input_size()
  }

  fn output_shape(&self) -> (usize, usize) {
    (**self).output_shape()
  }

  fn run(&mut self, input: &NhwcTensor) -> Result<RawTensor, Self::Error> {
    (**self).run(input)
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
  #[error("张量形状不受支持: {0:?}")]
  UnsupportedShape(Vec<usize>),
  #[error("批大小必须为 1, 实际为 {0}")]
  BatchSize(usize),
  #[error("属性数 {0} 过少, 至少需要 4 个框参数和 1 个类别分数")]
  TooFewAttributes(usize),
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 模型原始输出，逻辑形状 `[属性][候选]`
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
  attributes: usize,
  candidates: usize,
  data: Box<[f32]>,
}

impl RawTensor {
  pub fn new(attributes: usize, candidates: usize, data: Vec<f32>) -> Result<Self, TensorError> {
    if attributes <= BOX_ATTRIBUTES {
      return Err(TensorError::TooFewAttributes(attributes));
    }
    let expected = attributes * candidates;
    if data.len() != expected {
      return Err(TensorError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      attributes,
      candidates,
      data: data.into_boxed_slice(),
    })
  }

  /// 从 `[属性, 候选]` 或 `[1, 属性, 候选]` 形状构造
  pub fn from_shape(shape: &[usize], data: Vec<f32>) -> Result<Self, TensorError> {
    match *shape {
      [attributes, candidates] => Self::new(attributes, candidates, data),
      [1, attributes, candidates] => Self::new(attributes, candidates, data),
      [batch, _, _] => Err(TensorError::BatchSize(batch)),
      _ => Err(TensorError::UnsupportedShape(shape.to_vec())),
    }
  }

  pub fn attributes(&self) -> usize {
    self.attributes
  }

  pub fn candidates(&self) -> usize {
    self.candidates
  }

  pub fn num_classes(&self) -> usize {
    self.attributes - BOX_ATTRIBUTES
  }

  /// 读取第 `candidate` 个候选的第 `attribute` 个属性，相当于转置后访问
  pub fn get(&self, attribute: usize, candidate: usize) -> f32 {
    self.data[attribute * self.candidates + candidate]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

/// 单个检测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub confidence: f32,
  pub bbox: BBox,
}

impl Detection {
  pub fn label(&self) -> EscapeLabel {
    EscapeLabel::from_label_id(self.class_id)
  }
}

impl Scored for Detection {
  fn score(&self) -> f32 {
    self.confidence
  }

  fn bbox(&self) -> &BBox {
    &self.bbox
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn from_label_id(id: u32) -> Self;
}

/// 逃生设施类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscapeLabel {
  LeverHandle,
  PushbarHandle,
  RoundHandle,
  Exit,
  Fire,
  Handrail,
  Unknown(u32),
}

impl WithLabel for EscapeLabel {
  fn to_label_str(&self) -> String {
    match self {
      EscapeLabel::LeverHandle => "Leverhandle".to_string(),
      EscapeLabel::PushbarHandle => "Pushbarhandle".to_string(),
      EscapeLabel::RoundHandle => "Roundhandle".to_string(),
      EscapeLabel::Exit => "Exit".to_string(),
      EscapeLabel::Fire => "Fire".to_string(),
      EscapeLabel::Handrail => "Handrail".to_string(),
      EscapeLabel::Unknown(id) => format!("unknown-{}", id),
    }
  }

  fn from_label_id(id: u32) -> Self {
    match id {
      0 => EscapeLabel::LeverHandle,
      1 => EscapeLabel::PushbarHandle,
      2 => EscapeLabel::RoundHandle,
      3 => EscapeLabel::Exit,
      4 => EscapeLabel::Fire,
      5 => EscapeLabel::Handrail,
      other => EscapeLabel::Unknown(other),
    }
  }
}

#[cfg(feature = "model_recorded")]
mod recorded;
#[cfg(feature = "model_recorded")]
pub use self::recorded::{RecordedEngine, RecordedEngineError};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxEngine, OnnxEngineError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_recorded")]
  #[error("录制张量模型错误: {0}")]
  Recorded(#[from] RecordedEngineError),
  #[cfg(feature = "onnx")]
  #[error("ONNX 模型错误: {0}")]
  Onnx(#[from] OnnxEngineError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 按 URL 方案选择的推理后端
pub enum ModelWrapper {
  #[cfg(feature = "model_recorded")]
  Recorded(RecordedEngine),
  #[cfg(feature = "onnx")]
  Onnx(OnnxEngine),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_recorded")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RecordedEngine::SCHEME {
        let engine = RecordedEngine::from_url(url)?;
        return Ok(ModelWrapper::Recorded(engine));
      }
    }
    #[cfg(feature = "onnx")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == OnnxEngine::SCHEME {
        let engine = OnnxEngine::from_url(url)?;
        return Ok(ModelWrapper::Onnx(engine));
      }
    }
    Err(ModelError::SchemeMismatch)
  }
}

impl InferenceEngine for ModelWrapper {
  type Error = ModelError;

  fn input_size(&self) -> (u32, u32) {
    match self {
      #[cfg(feature = "model_recorded")]
      ModelWrapper::Recorded(engine) => engine.input_size(),
      #[cfg(feature = "onnx")]
      ModelWrapper::Onnx(engine) => engine.input_size(),
    }
  }

  fn output_shape(&self) -> (usize, usize) {
    match self {
      #[cfg(feature = "model_recorded")]
      ModelWrapper::Recorded(engine) => engine.output_shape(),
      #[cfg(feature = "onnx")]
      ModelWrapper::Onnx(engine) => engine.output_shape(),
    }
  }

  fn run(&mut self, input: &NhwcTensor) -> Result<RawTensor, Self::Error> {
    match self {
      #[cfg(feature = "model_recorded")]
      ModelWrapper::Recorded(engine) => engine.run(input).map_err(ModelError::from),
      #[cfg(feature = "onnx")]
      ModelWrapper::Onnx(engine) => engine.run(input).map_err(ModelError::from),
    }
  }
}
