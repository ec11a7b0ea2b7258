use super::error::CaptureError;

/// Process tap state machine.
///
/// State transitions:
/// ```text
/// uninitialized → prepared → capturing → stopped
///       ↓             ↓          ↓
///       └──────── failed ────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapState {
    Uninitialized,
    Prepared,
    Capturing,
    Stopped,
    Failed(CaptureError),
}

impl TapState {
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, Self::Uninitialized)
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self, Self::Prepared)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }

    /// Whether native resources may still be held in this state.
    pub fn holds_resources(&self) -> bool {
        matches!(self, Self::Prepared | Self::Capturing)
    }

    pub fn error(&self) -> Option<&CaptureError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Prepared => "prepared",
            Self::Capturing => "capturing",
            Self::Stopped => "stopped",
            Self::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_live_states_hold_resources() {
        assert!(!TapState::Uninitialized.holds_resources());
        assert!(TapState::Prepared.holds_resources());
        assert!(TapState::Capturing.holds_resources());
        assert!(!TapState::Stopped.holds_resources());
        assert!(!TapState::Failed(CaptureError::NotPrepared).holds_resources());
    }

    #[test]
    fn failed_state_exposes_error() {
        let state = TapState::Failed(CaptureError::AlreadyCapturing);
        assert!(state.is_terminal());
        assert_eq!(state.error(), Some(&CaptureError::AlreadyCapturing));
        assert_eq!(state.name(), "failed");
    }
}
