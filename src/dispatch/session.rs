//! Session state owned by the dispatcher.

use crate::protocol::Command;

/// Analysis mode of the current or last session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// No analysis has begun yet.
    #[default]
    None,
    /// Sterile-clamp trajectory.
    Trajectory,
    /// Chest compressions.
    Cpr,
    /// Z-shaped trajectory.
    ZShape,
}

impl AnalysisMode {
    /// Mode driven by `command`, if it is an analysis command.
    pub fn for_command(command: Command) -> Option<Self> {
        match command {
            Command::Trajectory => Some(Self::Trajectory),
            Command::Cpr => Some(Self::Cpr),
            Command::ZShape => Some(Self::ZShape),
            Command::RescueAppConfig => None,
        }
    }

    /// Human-readable label used in status text.
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Trajectory => "Trajectory",
            Self::Cpr => "CPR",
            Self::ZShape => "Z-shape trajectory",
        }
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Active mode, its business id and whether analysis is in progress.
///
/// `mode` and `biz_id` keep their last values after a stop; only
/// `analyzing` says whether they are live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Mode set by the last `begin`.
    pub mode: AnalysisMode,
    /// Business id from the last `begin`.
    pub biz_id: String,
    /// Whether an analysis is running.
    pub analyzing: bool,
}

impl Session {
    /// Enter `Analyzing(mode, biz_id)`, replacing whatever was active.
    pub(crate) fn begin(&mut self, mode: AnalysisMode, biz_id: String) {
        self.mode = mode;
        self.biz_id = biz_id;
        self.analyzing = true;
    }

    /// Return to idle. Returns whether an analysis was running.
    pub(crate) fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.analyzing, false)
    }

    /// Business id of the running analysis in `mode`, if any.
    pub fn active_biz_id(&self, mode: AnalysisMode) -> Option<&str> {
        (self.analyzing && self.mode == mode).then_some(self.biz_id.as_str())
    }
}
