// 该文件是 Menshen （门神） 项目的一部分。
// src/filter.rs - 候选框几何过滤
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

/// 候选框面积下界（相对帧面积），低于视为噪声
pub const MIN_AREA_RATIO: f32 = 0.15;
/// 候选框面积上界（相对帧面积），高于视为背景或墙面
pub const MAX_AREA_RATIO: f32 = 0.90;

/// 几何过滤：候选框面积必须严格落在帧面积的 (0.15, 0.90) 区间内。
///
/// 阈值按帧面积比例计算，与分辨率无关。两端边界均为开区间，
/// 恰好压在边界上的候选框同样被拒绝。
pub fn accepts(candidate_area: f32, frame_area: f32) -> bool {
  if frame_area <= 0.0 {
    return false;
  }
  candidate_area > frame_area * MIN_AREA_RATIO && candidate_area < frame_area * MAX_AREA_RATIO
}

#[cfg(test)]
mod tests {
  use super::*;

  const FRAME_AREA: f32 = 640.0 * 480.0;

  #[test]
  fn rejects_low_boundary() {
    assert!(!accepts(FRAME_AREA * MIN_AREA_RATIO, FRAME_AREA));
  }

  #[test]
  fn rejects_high_boundary() {
    assert!(!accepts(FRAME_AREA * MAX_AREA_RATIO, FRAME_AREA));
  }

  #[test]
  fn accepts_half_frame() {
    assert!(accepts(FRAME_AREA * 0.50, FRAME_AREA));
  }

  #[test]
  fn rejects_noise_and_background() {
    assert!(!accepts(FRAME_AREA * 0.01, FRAME_AREA));
    assert!(!accepts(FRAME_AREA * 0.99, FRAME_AREA));
  }

  #[test]
  fn rejects_on_empty_frame() {
    assert!(!accepts(100.0, 0.0));
  }
}
