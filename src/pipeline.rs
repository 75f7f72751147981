// 该文件是 Menshen （门神） 项目的一部分。
// src/pipeline.rs - 帧判定管线与视频流
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
use tracing::{debug, info, warn};

use crate::conditioner::{self, ConditionError};
use crate::filter;
use crate::frame::Frame;
use crate::model::{BoxedClassifier, BoxedDetector, Detection};
use crate::output::mjpeg;
use crate::output::visualizer::Visualizer;
use crate::session::{FrameOutcome, SessionHandle};

/// 检测置信度阈值
pub const CONFIDENCE_THRESHOLD: f32 = 0.85;

/// 确认策略：软集成的三种能力档位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmPolicy {
  /// 检测模型缺失，扫描永远不会成功
  Disabled,
  /// 只有主检测器参与确认
  DetectorOnly,
  /// 主检测器确认，二级分类器做非门控旁证
  DetectorPlusClassifier,
}

#[derive(Error, Debug)]
pub enum PipelineError {
  /// 帧本身不可用，跳过该次迭代
  #[error("帧无效: {0}")]
  InvalidFrame(#[from] ConditionError),
  /// 输入源结束或读取失败，帧循环就此干净终止
  #[error("输入源已结束")]
  SourceExhausted,
  #[error("帧编码失败: {0}")]
  Encode(#[from] image::ImageError),
}

/// 帧判定管线。
///
/// 每帧的数据流：原始帧 → 条件化 → 主检测 → 几何过滤 →（逐框）软确认
/// → 状态机更新 → 渲染。模型句柄由管线独占，状态通过会话句柄共享。
pub struct GatePipeline {
  session: SessionHandle,
  detector: Option<BoxedDetector>,
  classifier: Option<BoxedClassifier>,
  visualizer: Visualizer,
}

impl GatePipeline {
  /// 组装管线。模型缺失在此处报告一次，随后整个会话按降级能力运行。
  pub fn new(
    detector: Option<BoxedDetector>,
    classifier: Option<BoxedClassifier>,
    visualizer: Visualizer,
  ) -> Self {
    if detector.is_none() {
      warn!("检测模型不可用，本次会话扫描无法成功，仅转发视频流");
    } else if classifier.is_none() {
      info!("确认分类器不可用，降级为仅检测器确认");
    }

    let confirmation_enabled = detector.is_some() && classifier.is_some();
    Self {
      session: SessionHandle::new(confirmation_enabled),
      detector,
      classifier,
      visualizer,
    }
  }

  /// 共享会话句柄，供外部控制面调用
  pub fn session(&self) -> SessionHandle {
    self.session.clone()
  }

  /// 当前确认策略
  pub fn policy(&self) -> ConfirmPolicy {
    match (&self.detector, &self.classifier) {
      (None, _) => ConfirmPolicy::Disabled,
      (Some(_), None) => ConfirmPolicy::DetectorOnly,
      (Some(_), Some(_)) => ConfirmPolicy::DetectorPlusClassifier,
    }
  }

  /// 处理一帧，返回渲染后的显示帧。
  ///
  /// 推理始终使用条件化帧；显示帧按调试标志在条件化帧与原始帧之间选择。
  pub fn process(&self, frame: &Frame) -> Result<RgbImage, PipelineError> {
    let conditioned = conditioner::condition(&frame.image)?;
    let status = self.session.status();

    let mut display = if status.debug_mode {
      conditioned.clone()
    } else {
      frame.image.clone()
    };

    let mut accepted = Vec::new();
    if status.is_scanning && !status.access_granted {
      if let Some(detector) = &self.detector {
        match detector.infer(&conditioned) {
          Ok(candidates) => accepted = self.sift(candidates, frame),
          // 瞬态推理失败按本帧无确认处理，不中断会话
          Err(err) => warn!("检测推理失败, 按无确认处理: {}", err),
        }

        match self.session.apply_frame(!accepted.is_empty()) {
          FrameOutcome::Granted => info!("帧 {} 触发放行", frame.index),
          FrameOutcome::Counting(n) => debug!("连续确认帧: {}", n),
          FrameOutcome::Reset | FrameOutcome::Idle => {}
        }
      }
    }

    self.visualizer.draw_detections(&mut display, &accepted);
    Ok(display)
  }

  /// 几何过滤并对存活候选做软确认
  fn sift(&self, candidates: Vec<Detection>, frame: &Frame) -> Vec<Detection> {
    let frame_area = frame.area() as f32;
    let mut accepted = Vec::new();

    for candidate in candidates {
      if !filter::accepts(candidate.area(), frame_area) {
        debug!("几何过滤拒绝: bbox={:?}", candidate.bbox);
        continue;
      }
      self.confirm(&candidate, frame);
      accepted.push(candidate);
    }

    accepted
  }

  /// 软确认：在原始帧（非条件化帧）的裁剪上运行二级分类器。
  ///
  /// 结果只作旁证，不参与放行判定。分类器缺失、裁剪退化或单次推理
  /// 失败都静默跳过，绝不影响主判定。
  fn confirm(&self, candidate: &Detection, frame: &Frame) {
    let Some(classifier) = &self.classifier else {
      return;
    };
    let Some(crop) = crop_image(&frame.image, &candidate.bbox) else {
      debug!("裁剪退化, 跳过软确认: bbox={:?}", candidate.bbox);
      return;
    };

    match classifier.infer(&crop) {
      Ok(prediction) => debug!(
        "软确认旁证: class={} score={:.3}",
        prediction.class_id, prediction.score
      ),
      Err(err) => debug!("软确认失败, 忽略: {}", err),
    }
  }
}

/// 裁剪候选框区域；退化区域返回 None
fn crop_image(image: &RgbImage, bbox: &[f32; 4]) -> Option<RgbImage> {
  let (w, h) = image.dimensions();
  let x1 = (bbox[0].max(0.0) as u32).min(w);
  let y1 = (bbox[1].max(0.0) as u32).min(h);
  let x2 = (bbox[2].max(0.0) as u32).min(w);
  let y2 = (bbox[3].max(0.0) as u32).min(h);
  if x2 <= x1 || y2 <= y1 {
    return None;
  }
  Some(image::imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image())
}

/// 视频流：逐帧运行管线并编码为 JPEG 的惰性序列。
///
/// 序列与输入源同生命周期，不可重启；输入源结束（或读取失败）时
/// 产出一次 [`PipelineError::SourceExhausted`]，随后终止。
pub struct VideoFeed<I> {
  input: I,
  pipeline: GatePipeline,
  finished: bool,
}

/// 组装视频流
pub fn video_feed<I>(input: I, pipeline: GatePipeline) -> VideoFeed<I>
where
  I: Iterator<Item = anyhow::Result<Frame>>,
{
  VideoFeed {
    input,
    pipeline,
    finished: false,
  }
}

impl<I> Iterator for VideoFeed<I>
where
  I: Iterator<Item = anyhow::Result<Frame>>,
{
  type Item = Result<Vec<u8>, PipelineError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    loop {
      let frame = match self.input.next() {
        Some(Ok(frame)) => frame,
        Some(Err(err)) => {
          warn!("输入源读取失败, 视频流终止: {}", err);
          self.finished = true;
          return Some(Err(PipelineError::SourceExhausted));
        }
        None => {
          info!("输入源已结束, 视频流终止");
          self.finished = true;
          return Some(Err(PipelineError::SourceExhausted));
        }
      };

      match self.pipeline.process(&frame) {
        Ok(display) => return Some(mjpeg::encode_jpeg(&display).map_err(PipelineError::from)),
        // 坏帧跳过本次迭代，流继续
        Err(PipelineError::InvalidFrame(err)) => {
          warn!("跳过无效帧 {}: {}", frame.index, err);
          continue;
        }
        Err(err) => return Some(Err(err)),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::collections::VecDeque;

  use super::*;
  use crate::model::{ClassPrediction, Detection, Model, ModelError};
  use crate::session::ALERT_FRAMES_TRIGGER;

  const FRAME_SIDE: u32 = 100;

  /// 按脚本逐帧产出检测结果的桩检测器
  struct ScriptedDetector {
    script: RefCell<VecDeque<Vec<Detection>>>,
  }

  impl ScriptedDetector {
    fn boxed(script: Vec<Vec<Detection>>) -> BoxedDetector {
      Box::new(Self {
        script: RefCell::new(script.into()),
      })
    }
  }

  impl Model for ScriptedDetector {
    type Input = RgbImage;
    type Output = Vec<Detection>;
    type Error = ModelError;

    fn infer(&self, _: &RgbImage) -> Result<Vec<Detection>, ModelError> {
      Ok(self.script.borrow_mut().pop_front().unwrap_or_default())
    }
  }

  /// 每次调用都失败的桩分类器
  struct FailingClassifier;

  impl Model for FailingClassifier {
    type Input = RgbImage;
    type Output = ClassPrediction;
    type Error = ModelError;

    fn infer(&self, _: &RgbImage) -> Result<ClassPrediction, ModelError> {
      Err(ModelError::Inference("模拟故障".to_string()))
    }
  }

  fn frame(index: u64) -> Frame {
    Frame {
      image: RgbImage::new(FRAME_SIDE, FRAME_SIDE),
      index,
      timestamp_ms: index * 33,
    }
  }

  /// 覆盖帧面积给定比例的候选框
  fn detection(area_ratio: f32) -> Detection {
    Detection {
      bbox: [0.0, 0.0, FRAME_SIDE as f32, FRAME_SIDE as f32 * area_ratio],
      confidence: 0.95,
      label: "coat".to_string(),
    }
  }

  #[test]
  fn grants_exactly_on_trigger_frame() {
    let script = (0..ALERT_FRAMES_TRIGGER)
      .map(|_| vec![detection(0.5)])
      .collect();
    let pipeline = GatePipeline::new(
      Some(ScriptedDetector::boxed(script)),
      None,
      Visualizer::default(),
    );
    let session = pipeline.session();
    session.start_scan();

    for i in 0..ALERT_FRAMES_TRIGGER as u64 - 1 {
      pipeline.process(&frame(i)).unwrap();
    }
    let status = session.status();
    assert!(status.is_scanning);
    assert!(!status.access_granted);
    assert_eq!(status.consecutive_frames, ALERT_FRAMES_TRIGGER - 1);

    pipeline.process(&frame(14)).unwrap();
    let status = session.status();
    assert!(status.access_granted);
    assert!(!status.is_scanning);
  }

  #[test]
  fn empty_frame_resets_counter() {
    let mut script: Vec<Vec<Detection>> =
      (0..10).map(|_| vec![detection(0.5)]).collect();
    script.push(Vec::new());

    let pipeline = GatePipeline::new(
      Some(ScriptedDetector::boxed(script)),
      None,
      Visualizer::default(),
    );
    let session = pipeline.session();
    session.start_scan();

    for i in 0..11 {
      pipeline.process(&frame(i)).unwrap();
    }
    let status = session.status();
    assert_eq!(status.consecutive_frames, 0);
    assert!(!status.access_granted);
  }

  #[test]
  fn geometry_rejected_candidate_counts_as_miss() {
    let script = vec![
      vec![detection(0.5)],
      vec![detection(0.5)],
      // 过小与过大候选框都会被几何过滤拒绝
      vec![detection(0.05), detection(0.95)],
    ];
    let pipeline = GatePipeline::new(
      Some(ScriptedDetector::boxed(script)),
      None,
      Visualizer::default(),
    );
    let session = pipeline.session();
    session.start_scan();

    for i in 0..3 {
      pipeline.process(&frame(i)).unwrap();
    }
    assert_eq!(session.status().consecutive_frames, 0);
  }

  #[test]
  fn classifier_failure_does_not_affect_counting() {
    let script = (0..ALERT_FRAMES_TRIGGER)
      .map(|_| vec![detection(0.5)])
      .collect();
    let pipeline = GatePipeline::new(
      Some(ScriptedDetector::boxed(script)),
      Some(Box::new(FailingClassifier)),
      Visualizer::default(),
    );
    let session = pipeline.session();
    session.start_scan();

    for i in 0..ALERT_FRAMES_TRIGGER as u64 {
      pipeline.process(&frame(i)).unwrap();
    }
    assert!(session.status().access_granted);
  }

  #[test]
  fn missing_detector_degrades_to_passthrough() {
    let pipeline = GatePipeline::new(None, None, Visualizer::default());
    assert_eq!(pipeline.policy(), ConfirmPolicy::Disabled);
    let session = pipeline.session();
    session.start_scan();

    for i in 0..20 {
      // 帧照常渲染，但计数永不增长
      pipeline.process(&frame(i)).unwrap();
    }
    let status = session.status();
    assert!(status.is_scanning);
    assert!(!status.access_granted);
    assert_eq!(status.consecutive_frames, 0);
  }

  #[test]
  fn skips_detection_when_not_scanning() {
    let script = vec![vec![detection(0.5)]];
    let pipeline = GatePipeline::new(
      Some(ScriptedDetector::boxed(script)),
      None,
      Visualizer::default(),
    );
    let session = pipeline.session();

    pipeline.process(&frame(0)).unwrap();
    assert_eq!(session.status().consecutive_frames, 0);
  }

  #[test]
  fn policy_reflects_model_availability() {
    let detector_only = GatePipeline::new(
      Some(ScriptedDetector::boxed(Vec::new())),
      None,
      Visualizer::default(),
    );
    assert_eq!(detector_only.policy(), ConfirmPolicy::DetectorOnly);
    assert!(!detector_only.session().status().confirmation_enabled);

    let full = GatePipeline::new(
      Some(ScriptedDetector::boxed(Vec::new())),
      Some(Box::new(FailingClassifier)),
      Visualizer::default(),
    );
    assert_eq!(full.policy(), ConfirmPolicy::DetectorPlusClassifier);
    assert!(full.session().status().confirmation_enabled);
  }

  #[test]
  fn crop_rejects_degenerate_boxes() {
    let image = RgbImage::new(100, 100);
    assert!(crop_image(&image, &[50.0, 50.0, 50.0, 80.0]).is_none());
    assert!(crop_image(&image, &[120.0, 0.0, 140.0, 40.0]).is_none());

    let crop = crop_image(&image, &[10.0, 20.0, 50.0, 60.0]).unwrap();
    assert_eq!(crop.dimensions(), (40, 40));
  }

  #[test]
  fn feed_yields_jpeg_then_source_exhausted() {
    let frames = vec![Ok(frame(0)), Ok(frame(1))];
    let pipeline = GatePipeline::new(None, None, Visualizer::default());
    let mut feed = video_feed(frames.into_iter(), pipeline);

    for _ in 0..2 {
      let jpeg = feed.next().unwrap().unwrap();
      assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
    assert!(matches!(
      feed.next(),
      Some(Err(PipelineError::SourceExhausted))
    ));
    assert!(feed.next().is_none());
  }

  #[test]
  fn feed_skips_invalid_frames() {
    let bad = Frame {
      image: RgbImage::new(0, 0),
      index: 0,
      timestamp_ms: 0,
    };
    let frames = vec![Ok(bad), Ok(frame(1))];
    let pipeline = GatePipeline::new(None, None, Visualizer::default());
    let mut feed = video_feed(frames.into_iter(), pipeline);

    // 坏帧被跳过，直接得到下一帧的编码结果
    let jpeg = feed.next().unwrap().unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
  }
}
