// 该文件是 Menshen （门神） 项目的一部分。
// src/output/record.rs - 放行快照记录
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

use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use tracing::info;

/// 放行快照记录：在放行时刻把标注后的显示帧存入按日期分层的目录。
///
/// 运维留痕用，不是历史判定的持久化。
pub struct SnapshotRecord {
  directory: PathBuf,
}

impl SnapshotRecord {
  pub fn new(directory: &Path) -> Self {
    Self {
      directory: directory.to_path_buf(),
    }
  }

  /// 保存放行时刻的 JPEG 帧，返回写入路径
  pub fn save(&self, jpeg: &[u8]) -> Result<PathBuf, std::io::Error> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    let path = directory.join(format!("granted-{}.jpg", now.format("%H-%M-%S")));
    std::fs::write(&path, jpeg)?;
    info!("放行快照已保存: {}", path.display());
    Ok(path)
  }
}
