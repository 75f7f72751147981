// 该文件是 Menshen （门神） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use menshen::input::create_input_source;
use menshen::model::{BoxedClassifier, BoxedDetector};
use menshen::output::{MjpegWriter, SnapshotRecord, Visualizer};
use menshen::pipeline::{GatePipeline, PipelineError, video_feed};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();
  let args = args::Args::parse();

  info!("Menshen 门禁网关");
  info!("输入来源: {}", args.input);
  info!("输出目标: {}", args.output);

  // 模型加载失败只在此处报告一次，随后按降级能力运行
  let detector = load_detector(&args);
  let classifier = load_classifier(&args);

  let visualizer = Visualizer::new(args.font.as_deref());
  let pipeline = GatePipeline::new(detector, classifier, visualizer);
  info!("确认策略: {:?}", pipeline.policy());

  let session = pipeline.session();
  if args.debug_display {
    session.toggle_debug();
  }
  if !args.no_scan {
    session.start_scan();
    info!("扫描会话已开始");
  }

  let input = create_input_source(&args.input, args.image_repeat)
    .with_context(|| format!("无法打开输入源: {}", args.input))?;

  let sink: Box<dyn Write> = match args.output.as_str() {
    "-" => Box::new(std::io::stdout().lock()),
    path => Box::new(
      std::fs::File::create(path).with_context(|| format!("无法创建输出文件: {}", path))?,
    ),
  };
  let mut writer = MjpegWriter::new(sink);

  let record = args.record_dir.as_deref().map(SnapshotRecord::new);

  // 中断信号通道
  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    std::thread::spawn(|| {
      std::thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .expect("Error setting Ctrl-C handler");

  let mut frame_count = 0u64;
  let mut grant_recorded = false;
  let mut feed = video_feed(input, pipeline);

  for chunk in feed.by_ref() {
    match chunk {
      Ok(jpeg) => {
        if let Err(err) = writer.write_frame(&jpeg) {
          warn!("输出端断开, 视频流终止: {}", err);
          break;
        }
        frame_count += 1;

        // 放行时保存一张快照留痕
        if !grant_recorded && session.status().access_granted {
          grant_recorded = true;
          if let Some(record) = &record {
            if let Err(err) = record.save(&jpeg) {
              error!("放行快照保存失败: {}", err);
            }
          }
        }
      }
      Err(PipelineError::SourceExhausted) => {
        info!("输入源结束");
        break;
      }
      Err(err) => {
        error!("帧处理失败: {}", err);
        continue;
      }
    }

    if args.max_frames > 0 && frame_count >= args.max_frames {
      info!("已达到最大帧数限制: {}", args.max_frames);
      break;
    }
    if rx.try_recv().is_ok() {
      warn!("中断信号接收，退出帧循环");
      break;
    }
  }

  info!("处理完成!");
  info!("总帧数: {}", frame_count);
  info!("会话状态: {}", session.status().to_json());

  Ok(())
}

#[cfg(feature = "onnx")]
fn load_detector(args: &args::Args) -> Option<BoxedDetector> {
  use menshen::model::OnnxDetector;
  use menshen::pipeline::CONFIDENCE_THRESHOLD;

  let path = args.detector.as_deref()?;
  match OnnxDetector::new(path, CONFIDENCE_THRESHOLD, &args.label) {
    Ok(detector) => Some(Box::new(detector)),
    Err(err) => {
      error!("检测模型加载失败, 降级为仅转发视频: {}", err);
      None
    }
  }
}

#[cfg(not(feature = "onnx"))]
fn load_detector(args: &args::Args) -> Option<BoxedDetector> {
  if args.detector.is_some() {
    warn!("未启用 onnx 特性, 忽略检测模型参数");
  }
  None
}

#[cfg(feature = "onnx")]
fn load_classifier(args: &args::Args) -> Option<BoxedClassifier> {
  use menshen::model::VitClassifier;

  let path = args.classifier.as_deref()?;
  match VitClassifier::new(path) {
    Ok(classifier) => Some(Box::new(classifier)),
    Err(err) => {
      warn!("确认分类器加载失败, 降级为仅检测器确认: {}", err);
      None
    }
  }
}

#[cfg(not(feature = "onnx"))]
fn load_classifier(args: &args::Args) -> Option<BoxedClassifier> {
  if args.classifier.is_some() {
    warn!("未启用 onnx 特性, 忽略分类器参数");
  }
  None
}
