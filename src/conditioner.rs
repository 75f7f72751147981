// 该文件是 Menshen （门神） 项目的一部分。
// src/conditioner.rs - 帧条件化（对比度增强与降噪）
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
use imageproc::filter::gaussian_blur_f32;
use thiserror::Error;

/// CLAHE 对比度裁剪限制
pub const CLIP_LIMIT: f32 = 2.0;
/// CLAHE 网格（横向 × 纵向）
pub const TILE_GRID: (u32, u32) = (8, 8);
/// 高斯平滑 sigma，约等于 3×3 核
const BLUR_SIGMA: f32 = 0.8;

#[derive(Error, Debug)]
pub enum ConditionError {
  #[error("帧尺寸无效: {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },
}

/// Lab 平面表示。量化与 OpenCV 一致: L ∈ [0,255]，a/b 偏移 +128
pub struct LabPlanes {
  pub l: Vec<u8>,
  pub a: Vec<u8>,
  pub b: Vec<u8>,
  pub width: u32,
  pub height: u32,
}

/// 帧条件化：在 Lab 空间对亮度通道做 CLAHE，再轻微高斯平滑。
///
/// 色度通道原样保留，白色服装不会偏色；均衡化只作用于纹理与边缘
/// 可见度。输出尺寸与输入一致。输入的确定性函数，无学习参数。
pub fn condition(image: &RgbImage) -> Result<RgbImage, ConditionError> {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return Err(ConditionError::InvalidDimensions { width, height });
  }

  let mut planes = split_lab(image);
  planes.l = clahe(&planes.l, width, height, CLIP_LIMIT, TILE_GRID);
  let merged = merge_lab(&planes);

  // 均衡化会放大传感器噪声，末尾做一次轻度平滑
  Ok(gaussian_blur_f32(&merged, BLUR_SIGMA))
}

/// RGB → Lab 拆分三平面
pub fn split_lab(image: &RgbImage) -> LabPlanes {
  let (width, height) = image.dimensions();
  let size = (width * height) as usize;
  let mut l = Vec::with_capacity(size);
  let mut a = Vec::with_capacity(size);
  let mut b = Vec::with_capacity(size);

  for pixel in image.pixels() {
    let (lf, af, bf) = rgb_to_lab(pixel.0[0], pixel.0[1], pixel.0[2]);
    l.push((lf * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8);
    a.push((af + 128.0).round().clamp(0.0, 255.0) as u8);
    b.push((bf + 128.0).round().clamp(0.0, 255.0) as u8);
  }

  LabPlanes {
    l,
    a,
    b,
    width,
    height,
  }
}

/// Lab 三平面合并回 RGB
pub fn merge_lab(planes: &LabPlanes) -> RgbImage {
  RgbImage::from_fn(planes.width, planes.height, |x, y| {
    let idx = (y * planes.width + x) as usize;
    let lf = planes.l[idx] as f32 * 100.0 / 255.0;
    let af = planes.a[idx] as f32 - 128.0;
    let bf = planes.b[idx] as f32 - 128.0;
    let (r, g, b) = lab_to_rgb(lf, af, bf);
    image::Rgb([r, g, b])
  })
}

/// 对单通道平面做限制对比度自适应直方图均衡化。
///
/// 图像划分为 grid 网格，逐块建立裁剪直方图映射表，
/// 像素取值由四邻块映射表双线性插值得到，避免块边界伪影。
pub fn clahe(plane: &[u8], width: u32, height: u32, clip_limit: f32, grid: (u32, u32)) -> Vec<u8> {
  let (grid_x, grid_y) = (grid.0 as usize, grid.1 as usize);
  let (width, height) = (width as usize, height as usize);
  let tile_w = width.div_ceil(grid_x).max(1);
  let tile_h = height.div_ceil(grid_y).max(1);

  // 每块一张查找表
  let mut luts = vec![[0u8; 256]; grid_x * grid_y];
  for ty in 0..grid_y {
    for tx in 0..grid_x {
      let x0 = tx * tile_w;
      let y0 = ty * tile_h;
      let x1 = (x0 + tile_w).min(width);
      let y1 = (y0 + tile_h).min(height);

      let mut hist = [0u32; 256];
      for y in y0..y1 {
        for x in x0..x1 {
          hist[plane[y * width + x] as usize] += 1;
        }
      }

      let count = ((x1 - x0) * (y1 - y0)) as u32;
      if count == 0 {
        continue;
      }
      clip_histogram(&mut hist, clip_limit, count);

      // 累积分布映射到 [0,255]
      let mut cdf = 0u32;
      let lut = &mut luts[ty * grid_x + tx];
      for (value, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[value] = ((cdf as f32) * 255.0 / count as f32).round().clamp(0.0, 255.0) as u8;
      }
    }
  }

  // 双线性插值。边界像素把越界邻块夹回同一块，等价于单块直查。
  let mut out = vec![0u8; plane.len()];
  for y in 0..height {
    let fy = y as f32 / tile_h as f32 - 0.5;
    let ty_raw = fy.floor() as isize;
    let wy = fy - fy.floor();
    let ty0 = ty_raw.clamp(0, grid_y as isize - 1) as usize;
    let ty1 = (ty_raw + 1).clamp(0, grid_y as isize - 1) as usize;

    for x in 0..width {
      let fx = x as f32 / tile_w as f32 - 0.5;
      let tx_raw = fx.floor() as isize;
      let wx = fx - fx.floor();
      let tx0 = tx_raw.clamp(0, grid_x as isize - 1) as usize;
      let tx1 = (tx_raw + 1).clamp(0, grid_x as isize - 1) as usize;

      let value = plane[y * width + x] as usize;
      let v00 = luts[ty0 * grid_x + tx0][value] as f32;
      let v01 = luts[ty0 * grid_x + tx1][value] as f32;
      let v10 = luts[ty1 * grid_x + tx0][value] as f32;
      let v11 = luts[ty1 * grid_x + tx1][value] as f32;

      let top = v00 * (1.0 - wx) + v01 * wx;
      let bottom = v10 * (1.0 - wx) + v11 * wx;
      out[y * width + x] = (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8;
    }
  }

  out
}

/// 按裁剪限制截断直方图并把溢出量均匀回填
fn clip_histogram(hist: &mut [u32; 256], clip_limit: f32, count: u32) {
  let limit = ((clip_limit * count as f32 / 256.0) as u32).max(1);
  let mut excess = 0u32;
  for bin in hist.iter_mut() {
    if *bin > limit {
      excess += *bin - limit;
      *bin = limit;
    }
  }

  let per_bin = excess / 256;
  let mut remainder = (excess % 256) as usize;
  for bin in hist.iter_mut() {
    *bin += per_bin;
    if remainder > 0 {
      *bin += 1;
      remainder -= 1;
    }
  }
}

// sRGB ↔ CIELAB（D65 白点）

const XN: f32 = 0.95047;
const YN: f32 = 1.0;
const ZN: f32 = 1.08883;

fn srgb_to_linear(c: f32) -> f32 {
  if c <= 0.04045 {
    c / 12.92
  } else {
    ((c + 0.055) / 1.055).powf(2.4)
  }
}

fn linear_to_srgb(c: f32) -> f32 {
  if c <= 0.003_130_8 {
    c * 12.92
  } else {
    1.055 * c.powf(1.0 / 2.4) - 0.055
  }
}

fn lab_f(t: f32) -> f32 {
  const DELTA: f32 = 6.0 / 29.0;
  if t > DELTA * DELTA * DELTA {
    t.cbrt()
  } else {
    t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
  }
}

fn lab_f_inv(t: f32) -> f32 {
  const DELTA: f32 = 6.0 / 29.0;
  if t > DELTA {
    t * t * t
  } else {
    3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
  }
}

fn rgb_to_lab(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
  let r = srgb_to_linear(r as f32 / 255.0);
  let g = srgb_to_linear(g as f32 / 255.0);
  let b = srgb_to_linear(b as f32 / 255.0);

  let x = 0.4124 * r + 0.3576 * g + 0.1805 * b;
  let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
  let z = 0.0193 * r + 0.1192 * g + 0.9505 * b;

  let fx = lab_f(x / XN);
  let fy = lab_f(y / YN);
  let fz = lab_f(z / ZN);

  (116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
}

fn lab_to_rgb(l: f32, a: f32, b: f32) -> (u8, u8, u8) {
  let fy = (l + 16.0) / 116.0;
  let fx = fy + a / 500.0;
  let fz = fy - b / 200.0;

  let x = XN * lab_f_inv(fx);
  let y = YN * lab_f_inv(fy);
  let z = ZN * lab_f_inv(fz);

  let r = 3.2406 * x - 1.5372 * y - 0.4986 * z;
  let g = -0.9689 * x + 1.8758 * y + 0.0415 * z;
  let b = 0.0557 * x - 0.2040 * y + 1.0570 * z;

  (
    (linear_to_srgb(r.clamp(0.0, 1.0)) * 255.0).round() as u8,
    (linear_to_srgb(g.clamp(0.0, 1.0)) * 255.0).round() as u8,
    (linear_to_srgb(b.clamp(0.0, 1.0)) * 255.0).round() as u8,
  )
}
