// 该文件是 Menshen （门神） 项目的一部分。
// src/model/mod.rs - 推理模型定义
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

#[cfg(feature = "onnx")]
mod classifier;
#[cfg(feature = "onnx")]
mod detector;

#[cfg(feature = "onnx")]
pub use classifier::VitClassifier;
#[cfg(feature = "onnx")]
pub use detector::OnnxDetector;

/// 推理模型 trait
///
/// 模型是黑盒：判定管线只依赖该最小接口，测试用确定性桩实现替换真实模型。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 检测候选框
#[derive(Debug, Clone)]
pub struct Detection {
  /// 边界框 [x_min, y_min, x_max, y_max]（像素坐标）
  pub bbox: [f32; 4],
  /// 置信度，[0,1]
  pub confidence: f32,
  /// 类别名称
  pub label: String,
}

impl Detection {
  /// 候选框面积（像素）
  pub fn area(&self) -> f32 {
    (self.bbox[2] - self.bbox[0]).max(0.0) * (self.bbox[3] - self.bbox[1]).max(0.0)
  }
}

/// 分类预测结果
#[derive(Debug, Clone)]
pub struct ClassPrediction {
  /// 类别索引
  pub class_id: usize,
  /// softmax 概率
  pub score: f32,
}

#[derive(Error, Debug)]
pub enum ModelError {
  /// 模型初始化失败。会话期间对应能力整体缺失，只在启动时报告一次。
  #[error("模型不可用: {0}")]
  Unavailable(String),
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("模型输出无效: {0}")]
  InvalidOutput(String),
  #[error("输入图像为空")]
  EmptyInput,
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for ModelError {
  fn from(err: ort::Error) -> Self {
    ModelError::Inference(err.to_string())
  }
}

/// 装箱的检测模型，管线按可选能力持有
pub type BoxedDetector =
  Box<dyn Model<Input = RgbImage, Output = Vec<Detection>, Error = ModelError> + Send>;

/// 装箱的确认分类器
pub type BoxedClassifier =
  Box<dyn Model<Input = RgbImage, Output = ClassPrediction, Error = ModelError> + Send>;
