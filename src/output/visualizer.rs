// 该文件是 Menshen （门神） 项目的一部分。
// src/output/visualizer.rs - 检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::warn;

use crate::model::Detection;

/// 检测框颜色（绿色）
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// 边框厚度（像素）
const BOX_THICKNESS: i32 = 3;
/// 标签字号
const FONT_SIZE: f32 = 16.0;
/// 标签相对框顶的偏移
const LABEL_OFFSET: i32 = 20;

/// 未显式指定字体时依次尝试的系统字体路径
const SYSTEM_FONTS: [&str; 3] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
];

/// 可视化工具：在显示帧上绘制检测框与置信度标签。
///
/// 纯副作用消费者，不影响会话状态。字体缺失时降级为只画边框。
pub struct Visualizer {
  font: Option<FontArc>,
  font_scale: PxScale,
}

impl Default for Visualizer {
  fn default() -> Self {
    Self {
      font: None,
      font_scale: PxScale::from(FONT_SIZE),
    }
  }
}

impl Visualizer {
  /// 创建可视化工具，按给定路径或系统路径加载标签字体
  pub fn new(font_path: Option<&Path>) -> Self {
    let font = match font_path {
      Some(path) => load_font(path),
      None => SYSTEM_FONTS
        .iter()
        .find_map(|candidate| load_font(Path::new(candidate))),
    };
    if font.is_none() {
      warn!("未找到可用字体，检测框将不带标签文本");
    }

    Self {
      font,
      font_scale: PxScale::from(FONT_SIZE),
    }
  }

  /// 在图像上绘制检测结果
  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    for detection in detections {
      let x = (detection.bbox[0] as i32).clamp(0, w - 1);
      let y = (detection.bbox[1] as i32).clamp(0, h - 1);
      let bw = ((detection.bbox[2] - detection.bbox[0]) as i32).min(w - x);
      let bh = ((detection.bbox[3] - detection.bbox[1]) as i32).min(h - y);
      if bw <= 0 || bh <= 0 {
        continue;
      }

      // 向内收缩绘制多圈以加粗边框
      for t in 0..BOX_THICKNESS {
        let inner_w = bw - 2 * t;
        let inner_h = bh - 2 * t;
        if inner_w <= 0 || inner_h <= 0 {
          break;
        }
        let rect = Rect::at(x + t, y + t).of_size(inner_w as u32, inner_h as u32);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
      }

      if let Some(font) = &self.font {
        let label = format!("{} {:.2}", detection.label, detection.confidence);
        let text_y = (y - LABEL_OFFSET).max(0);
        draw_text_mut(image, BOX_COLOR, x, text_y, self.font_scale, font, &label);
      }
    }
  }
}

fn load_font(path: &Path) -> Option<FontArc> {
  let data = std::fs::read(path).ok()?;
  FontArc::try_from_vec(data).ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn draws_box_outline() {
    let mut image = RgbImage::new(100, 100);
    let detections = vec![Detection {
      bbox: [10.0, 10.0, 60.0, 60.0],
      confidence: 0.9,
      label: "coat".to_string(),
    }];

    Visualizer::default().draw_detections(&mut image, &detections);

    assert_eq!(*image.get_pixel(10, 10), BOX_COLOR);
    assert_eq!(*image.get_pixel(30, 10), BOX_COLOR);
    // 框内部不被填充
    assert_eq!(*image.get_pixel(30, 30), Rgb([0, 0, 0]));
  }

  #[test]
  fn ignores_degenerate_boxes() {
    let mut image = RgbImage::new(100, 100);
    let detections = vec![Detection {
      bbox: [60.0, 60.0, 40.0, 40.0],
      confidence: 0.9,
      label: "coat".to_string(),
    }];

    Visualizer::default().draw_detections(&mut image, &detections);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }
}
