// 该文件是 Menshen （门神） 项目的一部分。
// src/output/mjpeg.rs - MJPEG 多部分流输出
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

use std::io::Write;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use thiserror::Error;

/// 分片头，对应 multipart/x-mixed-replace; boundary=frame
const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
/// JPEG 编码质量
const JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum MjpegError {
  #[error("JPEG 编码失败: {0}")]
  Encode(#[from] image::ImageError),
  #[error("写入失败: {0}")]
  Sink(#[from] std::io::Error),
}

/// 将一帧编码为 JPEG 字节
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY).encode(
    image.as_raw(),
    image.width(),
    image.height(),
    ExtendedColorType::Rgb8,
  )?;
  Ok(buffer)
}

/// MJPEG 多部分流写入器。
///
/// 背压由消费者读取速率天然提供；消费者断开表现为写入失败，
/// 调用方据此终止流。
pub struct MjpegWriter<W: Write> {
  sink: W,
}

impl<W: Write> MjpegWriter<W> {
  pub fn new(sink: W) -> Self {
    Self { sink }
  }

  /// 写入一个 JPEG 帧分片并刷新
  pub fn write_frame(&mut self, jpeg: &[u8]) -> Result<(), MjpegError> {
    self.sink.write_all(PART_HEADER)?;
    self.sink.write_all(jpeg)?;
    self.sink.write_all(b"\r\n")?;
    self.sink.flush()?;
    Ok(())
  }
}
