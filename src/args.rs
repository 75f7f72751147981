// 该文件是 Menshen （门神） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;

/// Menshen 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源（V4L2 设备路径或图片文件）
  /// 支持格式:
  /// - V4L2: /dev/video0 或 v4l2:///dev/video0
  /// - 图片: *.jpg, *.jpeg, *.png, *.bmp
  #[arg(long, default_value = "/dev/video0", value_name = "SOURCE")]
  pub input: String,

  /// 服装检测模型（ONNX）文件路径；缺省或加载失败时降级运行
  #[arg(long, value_name = "FILE")]
  pub detector: Option<PathBuf>,

  /// 二级确认分类器（ONNX ViT）文件路径；可选的旁证信号
  #[arg(long, value_name = "FILE")]
  pub classifier: Option<PathBuf>,

  /// MJPEG 输出目标（文件路径，`-` 表示标准输出）
  #[arg(long, default_value = "-", value_name = "OUTPUT")]
  pub output: String,

  /// 标签字体文件路径（缺省时尝试系统字体）
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 放行快照记录目录
  #[arg(long, value_name = "DIR")]
  pub record_dir: Option<PathBuf>,

  /// 渲染标注使用的检测类别标签
  #[arg(long, default_value = "coat", value_name = "LABEL")]
  pub label: String,

  /// 图片输入时的重复帧数（离线回放去抖动流程用）
  #[arg(long, default_value = "1", value_name = "COUNT")]
  pub image_repeat: u64,

  /// 最大处理帧数（仅对视频/摄像头有效，0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,

  /// 启动后不自动开始扫描（等待外部控制面触发）
  #[arg(long)]
  pub no_scan: bool,

  /// 以调试显示模式启动（显示条件化帧而非原始帧）
  #[arg(long)]
  pub debug_display: bool,
}
