// 该文件是 Daoyin （导引） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use ndarray::Array4;
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::NhwcTensor,
  model::{InferenceEngine, RawTensor, TensorError},
};

const ONNX_DEFAULT_INPUT_SIZE: u32 = 640;
const ONNX_DEFAULT_THREADS: usize = 4;

#[derive(Error, Debug)]
pub enum OnnxEngineError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径解码错误: {0}")]
  PathDecode(#[from] std::string::FromUtf8Error),
  #[error("查询参数无效: {0}")]
  InvalidQuery(String),
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(String),
  #[error("数组形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

impl OnnxEngineError {
  fn runtime<E: std::fmt::Display>(e: E) -> Self {
    OnnxEngineError::Runtime(e.to_string())
  }
}

/// ONNX 检测模型，输出形状 `[1, 4 + 类别数, 候选数]`
pub struct OnnxEngine {
  session: Session,
  input_size: (u32, u32),
  output_shape: (usize, usize),
}

impl FromUrlWithScheme for OnnxEngine {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxEngine {
  type Error = OnnxEngineError;

  /// `onnx:///path/model.onnx?size=640&threads=4`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxEngineError::SchemeMismatch);
    }

    let mut size = ONNX_DEFAULT_INPUT_SIZE;
    let mut threads = ONNX_DEFAULT_THREADS;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "size" => {
          size = value
            .parse()
            .map_err(|_| OnnxEngineError::InvalidQuery(format!("size={}", value)))?
        }
        "threads" => {
          threads = value
            .parse()
            .map_err(|_| OnnxEngineError::InvalidQuery(format!("threads={}", value)))?
        }
        _ => {}
      }
    }

    let path = urlencoding::decode(url.path())?;
    Self::load(path.as_ref(), (size, size), threads)
  }
}

impl OnnxEngine {
  pub fn load(path: &str, input_size: (u32, u32), threads: usize) -> Result<Self, OnnxEngineError> {
    info!("加载模型文件: {}", path);
    let session = Session::builder()
      .map_err(OnnxEngineError::runtime)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(OnnxEngineError::runtime)?
      .with_intra_threads(threads)
      .map_err(OnnxEngineError::runtime)?
      .commit_from_file(path)
      .map_err(OnnxEngineError::runtime)?;

    let mut engine = Self {
      session,
      input_size,
      output_shape: (0, 0),
    };

    // 输出形状通过一次空白推理确定
    let (w, h) = input_size;
    let blank = NhwcTensor::from_vec(w, h, vec![0.5; (w * h * 3) as usize])
      .map_err(|e| OnnxEngineError::InvalidQuery(e.to_string()))?;
    let probe = engine.run(&blank)?;
    engine.output_shape = (probe.attributes(), probe.candidates());
    info!(
      "模型加载完成, 输入 {}x{}, 输出 {} x {}",
      w,
      h,
      probe.attributes(),
      probe.candidates()
    );

    Ok(engine)
  }
}

impl InferenceEngine for OnnxEngine {
  type Error = OnnxEngineError;

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn output_shape(&self) -> (usize, usize) {
    self.output_shape
  }

  fn run(&mut self, input: &NhwcTensor) -> Result<RawTensor, Self::Error> {
    let (w, h) = (input.width() as usize, input.height() as usize);
    let nhwc = Array4::from_shape_vec((1, h, w, input.channels()), input.as_nhwc().to_vec())?;
    let nchw = nhwc.permuted_axes([0, 3, 1, 2]).as_standard_layout().into_owned();

    let tensor = Tensor::from_array(nchw).map_err(OnnxEngineError::runtime)?;
    let outputs = self
      .session
      .run(ort::inputs![tensor])
      .map_err(OnnxEngineError::runtime)?;

    let output: ndarray::ArrayViewD<f32> = outputs[0]
      .try_extract_array()
      .map_err(OnnxEngineError::runtime)?;
    let shape = output.shape().to_vec();
    debug!("模型输出形状: {:?}", shape);

    let data = output.iter().copied().collect::<Vec<_>>();
    Ok(RawTensor::from_shape(&shape, data)?)
  }
}
