//! 流水线状态机
//!
//! `Idle → Decoding → {Projecting → Gating → Emitting}* → Done | Cancelled | Failed`

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Decoding,
    Projecting,
    Gating,
    Emitting,
    Done,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Start,
    /// 间隔或运动门控未选中
    FrameSkipped,
    FrameSelected,
    Projected,
    GatesPassed,
    /// 所有视角都被拒绝
    ViewsRejected,
    Emitted,
    EndOfStream,
    CancelRequested,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateAction {
    Continue,
    Stop,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Done | PipelineState::Cancelled | PipelineState::Failed
        )
    }

    pub fn transition(&self, event: PipelineEvent) -> (PipelineState, StateAction) {
        use PipelineEvent as E;
        use PipelineState as S;

        if self.is_terminal() {
            return (*self, StateAction::Stop);
        }

        match (self, event) {
            (_, E::CancelRequested) => (S::Cancelled, StateAction::Stop),
            (_, E::Error) => (S::Failed, StateAction::Stop),

            (S::Idle, E::Start) => (S::Decoding, StateAction::Continue),

            (S::Decoding, E::FrameSkipped) => (S::Decoding, StateAction::Continue),
            (S::Decoding, E::FrameSelected) => (S::Projecting, StateAction::Continue),
            (S::Decoding, E::EndOfStream) => (S::Done, StateAction::Stop),

            (S::Projecting, E::Projected) => (S::Gating, StateAction::Continue),

            (S::Gating, E::GatesPassed) => (S::Emitting, StateAction::Continue),
            (S::Gating, E::ViewsRejected) => (S::Decoding, StateAction::Continue),

            (S::Emitting, E::Emitted) => (S::Decoding, StateAction::Continue),

            _ => (S::Failed, StateAction::Stop),
        }
    }
}

/// 记录状态与已处理帧数
pub struct StateMachine {
    state: PipelineState,
    selected_frames: u64,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            selected_frames: 0,
        }
    }

    pub fn process(&mut self, event: PipelineEvent) -> StateAction {
        if event == PipelineEvent::FrameSelected {
            self.selected_frames += 1;
        }
        let (next, action) = self.state.transition(event);
        if next == PipelineState::Failed && event != PipelineEvent::Error {
            log::error!("invalid pipeline event {:?} in state {:?}", event, self.state);
        }
        self.state = next;
        action
    }

    pub fn current_state(&self) -> PipelineState {
        self.state
    }

    pub fn selected_frames(&self) -> u64 {
        self.selected_frames
    }

    pub fn reset(&mut self) {
        self.state = PipelineState::Idle;
        self.selected_frames = 0;
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
