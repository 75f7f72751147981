// 该文件是 Menshen （门神） 项目的一部分。
// src/input/mod.rs - 输入源模块
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

mod image_source;
#[cfg(feature = "camera")]
mod v4l2_source;

use anyhow::Result;

use crate::frame::Frame;

pub use image_source::ImageSource;
#[cfg(feature = "camera")]
pub use v4l2_source::V4l2Source;

/// 输入源类型
pub enum InputSourceType {
  /// 图片文件
  Image,
  /// V4L2 摄像头
  V4l2,
}

/// 输入源 trait
///
/// 帧循环独占持有输入源，其余组件不接触设备句柄。
pub trait InputSource: Iterator<Item = Result<Frame>> {
  /// 获取输入源类型
  fn source_type(&self) -> InputSourceType;

  /// 获取帧宽度
  fn width(&self) -> u32;

  /// 获取帧高度
  fn height(&self) -> u32;

  /// 获取帧率（如果适用）
  fn fps(&self) -> Option<f64>;
}

/// 从路径创建输入源。
///
/// `repeat` 只对静态图片生效，用于离线回放去抖动流程。
pub fn create_input_source(source: &str, repeat: u64) -> Result<Box<dyn InputSource>> {
  if source.starts_with("/dev/video") || source.starts_with("v4l2://") {
    #[cfg(feature = "camera")]
    {
      let device_path = source.trim_start_matches("v4l2://");
      return Ok(Box::new(V4l2Source::new(device_path)?));
    }
    #[cfg(not(feature = "camera"))]
    anyhow::bail!("未启用 camera 特性, 无法打开摄像头: {}", source);
  }

  Ok(Box::new(ImageSource::new(source, repeat)?))
}
