// 该文件是 Daoyin （导引） 项目的一部分。
// src/model/recorded.rs - 回放录制的模型输出张量
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

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::NhwcTensor,
  model::{InferenceEngine, RawTensor, TensorError},
};

#[derive(Error, Debug)]
pub enum RecordedEngineError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径解码错误: {0}")]
  PathDecode(#[from] std::string::FromUtf8Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("输入尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

/// 录制文件格式
#[derive(Debug, Deserialize)]
struct RecordedTensorFile {
  /// 模型输入尺寸 `[宽, 高]`
  input: [u32; 2],
  /// 输出形状，`[1, 属性, 候选]` 或 `[属性, 候选]`
  shape: Vec<usize>,
  data: Vec<f32>,
}

/// 每次推理都返回同一个录制张量的后端，用于离线回放与测试
#[derive(Debug, Clone)]
pub struct RecordedEngine {
  input_size: (u32, u32),
  tensor: RawTensor,
}

impl FromUrlWithScheme for RecordedEngine {
  const SCHEME: &'static str = "tensor";
}

impl FromUrl for RecordedEngine {
  type Error = RecordedEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordedEngineError::SchemeMismatch);
    }

    let path = urlencoding::decode(url.path())?;
    Self::from_path(path.into_owned())
  }
}

impl RecordedEngine {
  pub fn new(input_size: (u32, u32), tensor: RawTensor) -> Self {
    Self { input_size, tensor }
  }

  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, RecordedEngineError> {
    let path = path.as_ref();
    info!("加载录制张量: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Self::from_json(&content)
  }

  pub fn from_json(content: &str) -> Result<Self, RecordedEngineError> {
    let file: RecordedTensorFile = serde_json::from_str(content)?;
    let tensor = RawTensor::from_shape(&file.shape, file.data)?;
    debug!(
      "录制张量形状: {} x {}, 输入尺寸: {}x{}",
      tensor.attributes(),
      tensor.candidates(),
      file.input[0],
      file.input[1]
    );

    Ok(Self::new((file.input[0], file.input[1]), tensor))
  }
}

impl InferenceEngine for RecordedEngine {
  type Error = RecordedEngineError;

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn output_shape(&self) -> (usize, usize) {
    (self.tensor.attributes(), self.tensor.candidates())
  }

  fn run(&mut self, input: &NhwcTensor) -> Result<RawTensor, Self::Error> {
    let actual = (input.width(), input.height());
    if actual != self.input_size {
      return Err(RecordedEngineError::InputMismatch {
        expected: self.input_size,
        actual,
      });
    }

    Ok(self.tensor.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_recorded_json() {
    let json = r#"{"input":[4,4],"shape":[1,5,2],"data":[1,2,3,4,5,6,7,8,0.2,0.7]}"#;
    let mut engine = RecordedEngine::from_json(json).unwrap();

    assert_eq!(engine.input_size(), (4, 4));
    assert_eq!(engine.output_shape(), (5, 2));

    let input = NhwcTensor::from_vec(4, 4, vec![0.0; 48]).unwrap();
    let tensor = engine.run(&input).unwrap();
    assert_eq!(tensor.get(4, 1), 0.7);
  }

  #[test]
  fn rejects_wrong_input_size() {
    let tensor = RawTensor::new(5, 1, vec![0.0; 5]).unwrap();
    let mut engine = RecordedEngine::new((4, 4), tensor);
    let input = NhwcTensor::from_vec(2, 2, vec![0.0; 12]).unwrap();

    assert!(matches!(
      engine.run(&input),
      Err(RecordedEngineError::InputMismatch { .. })
    ));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("onnx:///tmp/model.onnx").unwrap();
    assert!(matches!(
      RecordedEngine::from_url(&url),
      Err(RecordedEngineError::SchemeMismatch)
    ));
  }
}
