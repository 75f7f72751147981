// 该文件是 Menshen （门神） 项目的一部分。
// src/model/classifier.rs - ViT 确认分类器
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
use std::sync::Mutex;

use image::{RgbImage, imageops};
use ndarray::Array4;
use ort::session::Session;
use tracing::info;

use super::{ClassPrediction, Model, ModelError};

/// ViT 输入边长
const INPUT_SIZE: u32 = 224;
/// ImageNet 归一化均值
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet 归一化标准差
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 基于 ONNX Runtime 的视觉 Transformer 分类器。
///
/// 二级软确认信号：对候选框在原始帧上的裁剪做分类，输出最高类与其
/// softmax 概率。不参与放行判定。
pub struct VitClassifier {
  session: Mutex<Session>,
  output_name: String,
}

impl VitClassifier {
  pub fn new(model_path: &Path) -> Result<Self, ModelError> {
    info!("加载确认分类器: {}", model_path.display());
    let session = Session::builder()
      .and_then(|builder| builder.commit_from_file(model_path))
      .map_err(|err| ModelError::Unavailable(err.to_string()))?;

    let output_name = session
      .outputs
      .first()
      .map(|output| output.name.clone())
      .ok_or_else(|| ModelError::Unavailable("模型没有输出节点".to_string()))?;
    info!("确认分类器加载完成, 输出节点: {}", output_name);

    Ok(Self {
      session: Mutex::new(session),
      output_name,
    })
  }

  /// 缩放到 224×224 并做 ImageNet 归一化，NCHW 排布
  fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(
      image,
      INPUT_SIZE,
      INPUT_SIZE,
      imageops::FilterType::Triangle,
    );

    let mut input = Array4::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
      for c in 0..3 {
        input[[0, c, y as usize, x as usize]] =
          (pixel.0[c] as f32 / 255.0 - MEAN[c]) / STD[c];
      }
    }
    input
  }
}

impl Model for VitClassifier {
  type Input = RgbImage;
  type Output = ClassPrediction;
  type Error = ModelError;

  fn infer(&self, input: &RgbImage) -> Result<ClassPrediction, ModelError> {
    if input.width() == 0 || input.height() == 0 {
      return Err(ModelError::EmptyInput);
    }

    let tensor = self.preprocess(input);
    let value = ort::value::Value::from_array(tensor)?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| ModelError::Inference("会话锁中毒".to_string()))?;
    let outputs = session.run(ort::inputs![value])?;

    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| ModelError::InvalidOutput(format!("缺少输出节点 {}", self.output_name)))?;
    let (_, logits) = output.try_extract_tensor::<f32>()?;
    if logits.is_empty() {
      return Err(ModelError::InvalidOutput("logits 为空".to_string()));
    }

    let probabilities = softmax(logits);
    let (class_id, score) = probabilities
      .iter()
      .enumerate()
      .max_by(|a, b| a.1.total_cmp(b.1))
      .map(|(idx, &p)| (idx, p))
      .unwrap_or((0, 0.0));

    Ok(ClassPrediction { class_id, score })
  }
}

/// 数值稳定的 softmax
fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::MIN, f32::max);
  let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  if sum > 0.0 {
    exps.into_iter().map(|x| x / sum).collect()
  } else {
    vec![0.0; logits.len()]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn softmax_sums_to_one() {
    let probabilities = softmax(&[1.0, 2.0, 3.0]);
    let sum: f32 = probabilities.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
    // 最大 logit 对应最大概率
    assert!(probabilities[2] > probabilities[1] && probabilities[1] > probabilities[0]);
  }

  #[test]
  fn softmax_is_stable_for_large_logits() {
    let probabilities = softmax(&[1000.0, 1001.0]);
    assert!(probabilities.iter().all(|p| p.is_finite()));
    assert!(probabilities[1] > probabilities[0]);
  }
}
