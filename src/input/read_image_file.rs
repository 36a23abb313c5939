// 该文件是 Daoyin （导引） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, input::FrameSource};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径解码错误: {0}")]
  PathDecode(#[from] std::string::FromUtf8Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoad(#[from] image::ImageError),
  #[error("目录 {0} 中没有图像文件")]
  EmptyFolder(String),
}

fn decode_path(url: &Url, scheme: &str) -> Result<String, ImageFileInputError> {
  if url.scheme() != scheme {
    error!("URI 方案不匹配: 期望 '{}', 实际 '{}'", scheme, url.scheme());
    return Err(ImageFileInputError::SchemeMismatch);
  }
  Ok(urlencoding::decode(url.path())?.into_owned())
}

fn load_image(path: &Path) -> Result<RgbImage, ImageFileInputError> {
  Ok(ImageReader::open(path)?.decode()?.into_rgb8())
}

/// 静态图像，模拟一台始终拍到同一画面的相机
pub struct ImageFileInput {
  image: RgbImage,
  next_index: AtomicU64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let path = decode_path(url, Self::SCHEME)?;
    let image = load_image(Path::new(&path))?;
    info!("读取图像 {}: {}x{}", path, image.width(), image.height());
    Ok(Self::new(image))
  }
}

impl ImageFileInput {
  pub fn new(image: RgbImage) -> Self {
    Self {
      image,
      next_index: AtomicU64::new(0),
    }
  }
}

impl FrameSource for ImageFileInput {
  fn latest_frame(&self) -> Option<Frame> {
    let index = self.next_index.fetch_add(1, Ordering::Relaxed);
    Some(Frame::new(self.image.clone(), index))
  }
}

/// 目录中的图像按文件名顺序各提供一次
pub struct FolderInput {
  paths: Vec<PathBuf>,
  cursor: AtomicUsize,
}

impl FromUrlWithScheme for FolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FolderInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let dir = decode_path(url, Self::SCHEME)?;
    let input = Self::scan(&dir)?;
    info!("目录 {} 中共 {} 张图像", dir, input.len());
    Ok(input)
  }
}

impl FolderInput {
  pub fn scan(dir: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let dir = dir.as_ref();
    let mut paths = std::fs::read_dir(dir)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| {
        path
          .extension()
          .and_then(|ext| ext.to_str())
          .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
          .unwrap_or(false)
      })
      .collect::<Vec<_>>();
    if paths.is_empty() {
      return Err(ImageFileInputError::EmptyFolder(dir.display().to_string()));
    }
    paths.sort();

    Ok(Self {
      paths,
      cursor: AtomicUsize::new(0),
    })
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }

  pub fn remaining(&self) -> usize {
    self
      .paths
      .len()
      .saturating_sub(self.cursor.load(Ordering::Relaxed))
  }
}

impl FrameSource for FolderInput {
  fn latest_frame(&self) -> Option<Frame> {
    let index = self.cursor.fetch_add(1, Ordering::Relaxed);
    let path = self.paths.get(index)?;
    match load_image(path) {
      Ok(image) => Some(Frame::new(image, index as u64)),
      Err(e) => {
        warn!("跳过无法读取的图像 {}: {}", path.display(), e);
        None
      }
    }
  }
}
