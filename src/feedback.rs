// 该文件是 Daoyin （导引） 项目的一部分。
// src/feedback.rs - 检测结果到反馈通道的路由
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

use tracing::{debug, trace};

use crate::{
  config::DEFAULT_FIXED_SIGNAL,
  geometry::BBox,
  haptic::HapticMapper,
  model::{Detection, EscapeLabel, WithLabel},
  voice::{ClipId, VoiceHandle},
};

/// 某一类别触发的反馈
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackAction {
  Haptic,
  Voice(&'static [ClipId]),
  Nothing,
}

const LEVER_HANDLE_GUIDE: &[ClipId] = &[ClipId::RoundHandle, ClipId::HandleInstruction];
const PUSHBAR_HANDLE_GUIDE: &[ClipId] = &[ClipId::LeverHandle, ClipId::HandleInstruction];
const ROUND_HANDLE_GUIDE: &[ClipId] = &[ClipId::PushbarHandle, ClipId::HandleInstruction];
const HANDRAIL_GUIDE: &[ClipId] = &[ClipId::Fence];

/// 类别到反馈的固定映射
///
/// 门把手三类与语音片段的对应关系是交叉的，沿用已部署版本的行为。
pub fn action_for(label: EscapeLabel) -> FeedbackAction {
  match label {
    EscapeLabel::LeverHandle => FeedbackAction::Voice(LEVER_HANDLE_GUIDE),
    EscapeLabel::PushbarHandle => FeedbackAction::Voice(PUSHBAR_HANDLE_GUIDE),
    EscapeLabel::RoundHandle => FeedbackAction::Voice(ROUND_HANDLE_GUIDE),
    EscapeLabel::Exit => FeedbackAction::Haptic,
    EscapeLabel::Handrail => FeedbackAction::Voice(HANDRAIL_GUIDE),
    EscapeLabel::Fire | EscapeLabel::Unknown(_) => FeedbackAction::Nothing,
  }
}

/// 框中心到画面竖直中线的归一化距离，范围 `[0, 1]`
pub fn horizontal_offset(bbox: &BBox) -> f32 {
  let (cx, _) = bbox.center();
  (cx - 0.5).abs().clamp(0.0, 1.0)
}

/// 一轮路由的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteSummary {
  pub haptic_updates: usize,
  pub voice_accepted: usize,
  pub voice_dropped: usize,
  pub ignored: usize,
}

impl RouteSummary {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

pub struct FeedbackRouter {
  haptic: HapticMapper,
  voice: VoiceHandle,
  fixed_signal: f32,
}

impl FeedbackRouter {
  pub fn new(haptic: HapticMapper, voice: VoiceHandle) -> Self {
    Self {
      haptic,
      voice,
      fixed_signal: DEFAULT_FIXED_SIGNAL,
    }
  }

  pub fn with_fixed_signal(mut self, fixed_signal: f32) -> Self {
    self.fixed_signal = fixed_signal;
    self
  }

  pub fn haptic(&self) -> &HapticMapper {
    &self.haptic
  }

  /// 逐个路由本轮的检测结果
  pub fn route(&mut self, detections: &[Detection]) -> RouteSummary {
    let mut summary = RouteSummary::default();

    for det in detections {
      let label = det.label();
      match action_for(label) {
        FeedbackAction::Haptic => {
          let offset = horizontal_offset(&det.bbox);
          self.haptic.update(offset, self.fixed_signal);
          summary.haptic_updates += 1;
        }
        FeedbackAction::Voice(clips) => {
          if self.voice.request_guide(clips) {
            summary.voice_accepted += 1;
          } else {
            summary.voice_dropped += 1;
          }
        }
        FeedbackAction::Nothing => {
          trace!("{} 无反馈动作", label.to_label_str());
          summary.ignored += 1;
        }
      }
    }

    if !summary.is_empty() {
      debug!("本轮反馈: {:?}", summary);
    }
    summary
  }
}
