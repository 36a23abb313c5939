// 该文件是 Daoyin （导引） 项目的一部分。
// src/input.rs - 图像帧输入
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

use std::sync::Arc;

use thiserror::Error;

use crate::{FromUrl, frame::Frame};

/// 帧来源，只提供最新一帧
pub trait FrameSource {
  /// 取出最新一帧；没有新帧时返回 `None`，本轮跳过
  fn latest_frame(&self) -> Option<Frame>;
}

impl<S: FrameSource + ?Sized> FrameSource for &S {
  fn latest_frame(&self) -> Option<Frame> {
    (**self).latest_frame()
  }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn latest_frame(&self) -> Option<Frame> {
    (**self).latest_frame()
  }
}

impl<S: FrameSource + ?Sized> FrameSource for Arc<S> {
  fn latest_frame(&self) -> Option<Frame> {
    (**self).latest_frame()
  }
}

mod latest;
pub use self::latest::LatestFrameSlot;

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{FolderInput, ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFile(#[from] ImageFileInputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 按 URL 方案选择的帧来源
pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileInput),
  #[cfg(feature = "read_image_file")]
  Folder(FolderInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ImageFile(input));
      }
      if url.scheme() == FolderInput::SCHEME {
        let input = FolderInput::from_url(url)?;
        return Ok(InputWrapper::Folder(input));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl FrameSource for InputWrapper {
  fn latest_frame(&self) -> Option<Frame> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFile(input) => input.latest_frame(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::Folder(input) => input.latest_frame(),
    }
  }
}
