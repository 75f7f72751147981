// 该文件是 Menshen （门神） 项目的一部分。
// src/session.rs - 会话状态与判定状态机
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

use std::sync::{Arc, Mutex};
use tracing::info;

/// 连续确认帧数阈值：计数达到该值即放行
pub const ALERT_FRAMES_TRIGGER: u32 = 15;

/// 会话状态快照（对外只读）
///
/// 状态查询方拿到的是单次加锁拷贝，不会观察到半更新的字段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
  pub is_scanning: bool,
  pub access_granted: bool,
  pub consecutive_frames: u32,
  pub debug_mode: bool,
  pub confirmation_enabled: bool,
}

impl SessionStatus {
  /// 序列化为 JSON 对象，字段名与对外控制面约定一致
  pub fn to_json(&self) -> serde_json::Value {
    serde_json::json!({
      "is_scanning": self.is_scanning,
      "access_granted": self.access_granted,
      "consecutive_frames": self.consecutive_frames,
      "debug_mode": self.debug_mode,
      "confirmation_enabled": self.confirmation_enabled,
    })
  }
}

/// 单帧更新的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
  /// 未在扫描或已放行，本帧不参与计数
  Idle,
  /// 本帧有确认，计数累加至所含值
  Counting(u32),
  /// 本帧无确认，计数硬清零
  Reset,
  /// 本帧达到阈值，已放行
  Granted,
}

struct SessionState {
  is_scanning: bool,
  access_granted: bool,
  consecutive_frames: u32,
  debug_mode: bool,
  confirmation_enabled: bool,
}

/// 会话句柄：进程内唯一状态实例的共享入口。
///
/// 帧循环与外部控制面各持一份克隆；所有读写都在单次加锁内完成，
/// 一帧的计数与放行标志作为一个不可分割的单元落地。
#[derive(Clone)]
pub struct SessionHandle {
  state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
  pub fn new(confirmation_enabled: bool) -> Self {
    Self {
      state: Arc::new(Mutex::new(SessionState {
        is_scanning: false,
        access_granted: false,
        consecutive_frames: 0,
        debug_mode: false,
        confirmation_enabled,
      })),
    }
  }

  /// 开始扫描：任意状态进入扫描态，清零计数与放行标志。
  /// 扫描中重复调用等价于重新开始，幂等。
  pub fn start_scan(&self) {
    let mut state = self.state.lock().unwrap();
    state.is_scanning = true;
    state.access_granted = false;
    state.consecutive_frames = 0;
  }

  /// 复位到空闲态，清零计数与放行标志
  pub fn reset(&self) {
    let mut state = self.state.lock().unwrap();
    state.is_scanning = false;
    state.access_granted = false;
    state.consecutive_frames = 0;
  }

  /// 翻转调试显示标志，返回新值。与扫描状态正交。
  pub fn toggle_debug(&self) -> bool {
    let mut state = self.state.lock().unwrap();
    state.debug_mode = !state.debug_mode;
    state.debug_mode
  }

  /// 读取一致性快照。任何时刻都成功，包括降级运行期间。
  pub fn status(&self) -> SessionStatus {
    let state = self.state.lock().unwrap();
    SessionStatus {
      is_scanning: state.is_scanning,
      access_granted: state.access_granted,
      consecutive_frames: state.consecutive_frames,
      debug_mode: state.debug_mode,
      confirmation_enabled: state.confirmation_enabled,
    }
  }

  /// 帧循环专用：以单次加锁应用一帧的判定结果。
  ///
  /// 仅在扫描中且未放行时计数。无确认的帧硬清零，不做衰减；
  /// 计数达到 [`ALERT_FRAMES_TRIGGER`] 恰好在该帧放行并停止扫描。
  pub fn apply_frame(&self, confirmed: bool) -> FrameOutcome {
    let mut state = self.state.lock().unwrap();
    if !state.is_scanning || state.access_granted {
      return FrameOutcome::Idle;
    }
    if !confirmed {
      state.consecutive_frames = 0;
      return FrameOutcome::Reset;
    }
    state.consecutive_frames += 1;
    if state.consecutive_frames >= ALERT_FRAMES_TRIGGER {
      state.access_granted = true;
      state.is_scanning = false;
      info!("连续 {} 帧确认，访问放行", state.consecutive_frames);
      return FrameOutcome::Granted;
    }
    FrameOutcome::Counting(state.consecutive_frames)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn grants_exactly_at_trigger() {
    let session = SessionHandle::new(true);
    session.start_scan();

    for n in 1..ALERT_FRAMES_TRIGGER {
      assert_eq!(session.apply_frame(true), FrameOutcome::Counting(n));
      let status = session.status();
      assert!(status.is_scanning);
      assert!(!status.access_granted);
      assert_eq!(status.consecutive_frames, n);
    }

    // 第 15 帧恰好放行
    assert_eq!(session.apply_frame(true), FrameOutcome::Granted);
    let status = session.status();
    assert!(status.access_granted);
    assert!(!status.is_scanning);
  }

  #[test]
  fn miss_resets_counter_to_zero() {
    let session = SessionHandle::new(true);
    session.start_scan();

    for _ in 0..10 {
      session.apply_frame(true);
    }
    assert_eq!(session.status().consecutive_frames, 10);

    assert_eq!(session.apply_frame(false), FrameOutcome::Reset);
    let status = session.status();
    assert_eq!(status.consecutive_frames, 0);
    assert!(!status.access_granted);
    assert!(status.is_scanning);
  }

  #[test]
  fn reset_clears_any_state() {
    let session = SessionHandle::new(false);

    // 扫描中
    session.start_scan();
    session.apply_frame(true);
    session.reset();
    let status = session.status();
    assert!(!status.is_scanning);
    assert!(!status.access_granted);
    assert_eq!(status.consecutive_frames, 0);

    // 已放行
    session.start_scan();
    for _ in 0..ALERT_FRAMES_TRIGGER {
      session.apply_frame(true);
    }
    assert!(session.status().access_granted);
    session.reset();
    let status = session.status();
    assert!(!status.is_scanning);
    assert!(!status.access_granted);
    assert_eq!(status.consecutive_frames, 0);
  }

  #[test]
  fn start_scan_restarts_counting() {
    let session = SessionHandle::new(true);
    session.start_scan();
    for _ in 0..5 {
      session.apply_frame(true);
    }
    session.start_scan();
    let status = session.status();
    assert!(status.is_scanning);
    assert_eq!(status.consecutive_frames, 0);
  }

  #[test]
  fn idle_when_not_scanning() {
    let session = SessionHandle::new(true);
    assert_eq!(session.apply_frame(true), FrameOutcome::Idle);
    assert_eq!(session.status().consecutive_frames, 0);
  }

  #[test]
  fn no_counting_after_grant() {
    let session = SessionHandle::new(true);
    session.start_scan();
    for _ in 0..ALERT_FRAMES_TRIGGER {
      session.apply_frame(true);
    }
    assert_eq!(session.apply_frame(true), FrameOutcome::Idle);
    // 放行后计数不再变化
    assert_eq!(
      session.status().consecutive_frames,
      ALERT_FRAMES_TRIGGER
    );
  }

  #[test]
  fn toggle_debug_is_orthogonal() {
    let session = SessionHandle::new(true);
    session.start_scan();
    session.apply_frame(true);

    assert!(session.toggle_debug());
    let status = session.status();
    assert!(status.debug_mode);
    assert!(status.is_scanning);
    assert_eq!(status.consecutive_frames, 1);

    assert!(!session.toggle_debug());
    assert!(!session.status().debug_mode);
  }

  #[test]
  fn granted_implies_not_scanning() {
    let session = SessionHandle::new(true);
    session.start_scan();
    for _ in 0..ALERT_FRAMES_TRIGGER * 2 {
      session.apply_frame(true);
      let status = session.status();
      if status.access_granted {
        assert!(!status.is_scanning);
      }
    }
  }

  #[test]
  fn status_serializes_expected_fields() {
    let session = SessionHandle::new(true);
    let json = session.status().to_json();
    assert_eq!(json["is_scanning"], false);
    assert_eq!(json["access_granted"], false);
    assert_eq!(json["consecutive_frames"], 0);
    assert_eq!(json["debug_mode"], false);
    assert_eq!(json["confirmation_enabled"], true);
  }
}
