// 该文件是 Menshen （门神） 项目的一部分。
// src/model/detector.rs - ONNX 服装检测器
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
use tracing::{debug, info};

use super::{Detection, Model, ModelError};

/// 模型输入边长
const INPUT_SIZE: u32 = 640;
/// letterbox 填充灰度
const PAD_VALUE: f32 = 114.0 / 255.0;
/// NMS IoU 阈值
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// 基于 ONNX Runtime 的服装检测器（YOLO 系检测头）。
///
/// 输出按置信度降序，只保留高于阈值的候选框，坐标为原图像素坐标。
pub struct OnnxDetector {
  session: Mutex<Session>,
  output_name: String,
  confidence_threshold: f32,
  label: String,
}

impl OnnxDetector {
  pub fn new(
    model_path: &Path,
    confidence_threshold: f32,
    label: &str,
  ) -> Result<Self, ModelError> {
    info!("加载检测模型: {}", model_path.display());
    let session = Session::builder()
      .and_then(|builder| builder.commit_from_file(model_path))
      .map_err(|err| ModelError::Unavailable(err.to_string()))?;

    let output_name = session
      .outputs
      .first()
      .map(|output| output.name.clone())
      .ok_or_else(|| ModelError::Unavailable("模型没有输出节点".to_string()))?;
    info!("检测模型加载完成, 输出节点: {}", output_name);

    Ok(Self {
      session: Mutex::new(session),
      output_name,
      confidence_threshold,
      label: label.to_string(),
    })
  }

  /// letterbox 预处理：保持宽高比缩放，灰色填充到 INPUT_SIZE 方形
  fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, f32, f32, f32) {
    let (w0, h0) = image.dimensions();
    let scale = (INPUT_SIZE as f32 / w0 as f32).min(INPUT_SIZE as f32 / h0 as f32);
    let new_w = ((w0 as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((h0 as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);

    let pad_x = (INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (INPUT_SIZE - new_h) as f32 / 2.0;
    let (offset_x, offset_y) = (pad_x.floor() as usize, pad_y.floor() as usize);

    let mut input = Array4::from_elem(
      (1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
      PAD_VALUE,
    );
    for (x, y, pixel) in resized.enumerate_pixels() {
      let [r, g, b] = pixel.0;
      input[[0, 0, offset_y + y as usize, offset_x + x as usize]] = r as f32 / 255.0;
      input[[0, 1, offset_y + y as usize, offset_x + x as usize]] = g as f32 / 255.0;
      input[[0, 2, offset_y + y as usize, offset_x + x as usize]] = b as f32 / 255.0;
    }

    (input, scale, pad_x, pad_y)
  }

  /// 解码检测头输出，还原到原图坐标
  fn decode(
    &self,
    data: &[f32],
    shape: &[i64],
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    orig_w: f32,
    orig_h: f32,
  ) -> Result<Vec<Detection>, ModelError> {
    if shape.len() != 3 {
      return Err(ModelError::InvalidOutput(format!(
        "期望 3 维输出, 实际 {:?}",
        shape
      )));
    }

    let d1 = shape[1] as usize;
    let d2 = shape[2] as usize;
    if data.len() < d1 * d2 {
      return Err(ModelError::InvalidOutput(format!(
        "输出长度不足: {} < {}x{}",
        data.len(),
        d1,
        d2
      )));
    }

    // 特征维 = 4 + 类别数。[1, 特征, 锚点] 与 [1, 锚点, 特征] 两种排布都可能出现，
    // 取较小维作为特征维
    let (features, anchors, feature_major) = if d1 <= d2 { (d1, d2, true) } else { (d2, d1, false) };
    if features < 5 {
      return Err(ModelError::InvalidOutput(format!(
        "特征维过小: {}",
        features
      )));
    }
    let num_classes = features - 4;

    let at = |feature: usize, anchor: usize| {
      if feature_major {
        data[feature * anchors + anchor]
      } else {
        data[anchor * features + feature]
      }
    };

    let mut candidates = Vec::new();
    for i in 0..anchors {
      let mut best = f32::MIN;
      for c in 0..num_classes {
        let score = at(4 + c, i);
        if score > best {
          best = score;
        }
      }
      if !best.is_finite() || best < self.confidence_threshold {
        continue;
      }

      let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
      if w <= 0.0 || h <= 0.0 {
        continue;
      }

      let x1 = (((cx - w / 2.0) - pad_x) / scale).clamp(0.0, orig_w);
      let y1 = (((cy - h / 2.0) - pad_y) / scale).clamp(0.0, orig_h);
      let x2 = (((cx + w / 2.0) - pad_x) / scale).clamp(0.0, orig_w);
      let y2 = (((cy + h / 2.0) - pad_y) / scale).clamp(0.0, orig_h);
      if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
        continue;
      }

      candidates.push(Detection {
        bbox: [x1, y1, x2, y2],
        confidence: best,
        label: self.label.clone(),
      });
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(nms(candidates, NMS_IOU_THRESHOLD))
  }
}

impl Model for OnnxDetector {
  type Input = RgbImage;
  type Output = Vec<Detection>;
  type Error = ModelError;

  fn infer(&self, input: &RgbImage) -> Result<Vec<Detection>, ModelError> {
    let (orig_w, orig_h) = input.dimensions();
    if orig_w == 0 || orig_h == 0 {
      return Err(ModelError::EmptyInput);
    }

    let (tensor, scale, pad_x, pad_y) = self.preprocess(input);
    let value = ort::value::Value::from_array(tensor)?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| ModelError::Inference("会话锁中毒".to_string()))?;
    let outputs = session.run(ort::inputs![value])?;

    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| ModelError::InvalidOutput(format!("缺少输出节点 {}", self.output_name)))?;
    let (shape, data) = output.try_extract_tensor::<f32>()?;

    let detections = self.decode(
      data,
      &shape,
      scale,
      pad_x,
      pad_y,
      orig_w as f32,
      orig_h as f32,
    )?;
    debug!("检测到 {} 个候选框", detections.len());
    Ok(detections)
  }
}

/// 非极大值抑制。输入须已按置信度降序排序。
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  let mut kept = Vec::new();
  while !detections.is_empty() {
    let best = detections.remove(0);
    detections.retain(|other| iou(&best, other) < iou_threshold);
    kept.push(best);
  }
  kept
}

/// 两个边界框的交并比
fn iou(a: &Detection, b: &Detection) -> f32 {
  let x1 = a.bbox[0].max(b.bbox[0]);
  let y1 = a.bbox[1].max(b.bbox[1]);
  let x2 = a.bbox[2].min(b.bbox[2]);
  let y2 = a.bbox[3].min(b.bbox[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(bbox: [f32; 4], confidence: f32) -> Detection {
    Detection {
      bbox,
      confidence,
      label: "coat".to_string(),
    }
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = det([10.0, 10.0, 50.0, 50.0], 0.9);
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = det([0.0, 0.0, 10.0, 10.0], 0.9);
    let b = det([20.0, 20.0, 30.0, 30.0], 0.8);
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn nms_suppresses_overlapping() {
    let detections = vec![
      det([10.0, 10.0, 50.0, 50.0], 0.95),
      det([12.0, 12.0, 52.0, 52.0], 0.90),
      det([100.0, 100.0, 150.0, 150.0], 0.88),
    ];
    let kept = nms(detections, NMS_IOU_THRESHOLD);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].confidence, 0.95);
    assert_eq!(kept[1].confidence, 0.88);
  }

  #[test]
  fn nms_keeps_empty() {
    assert!(nms(Vec::new(), NMS_IOU_THRESHOLD).is_empty());
  }
}
