//! Recognition mode state machine
//!
//! The session is in one of three modes: streaming to the recognition
//! socket, running the local fallback recognizer, or nothing. Every failure
//! or lifecycle event is a [`Trigger`]; [`transition`] decides the next mode,
//! what the session must do about it, and what to tell the user.

/// Which recognizer is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecognitionMode {
    /// Streaming PCM to the recognition socket
    Networked,
    /// Local fallback recognizer
    Fallback,
    /// Nothing running
    #[default]
    None,
}

/// Capture failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// The user refused microphone access
    PermissionDenied,
    /// No microphone
    NotFound,
    /// Anything else
    Other,
}

/// Event fed into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The socket reported an error
    SocketError,
    /// The socket could not be opened
    TransportUnavailable,
    /// The capture device failed to open
    DeviceError(DeviceErrorKind),
    /// The socket closed
    SocketClosed,
    /// No fallback recognizer in this environment
    FallbackUnsupported,
    /// The fallback recognizer failed
    FallbackError,
    /// The fallback recognizer finished
    FallbackEnded,
    /// The user stopped recognition
    Stopped,
}

/// What the session does after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing
    None,
    /// Release networked resources and start the fallback recognizer
    StartFallback,
    /// Release everything and go idle
    Cleanup,
}

/// Result of [`transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Next mode
    pub mode: RecognitionMode,
    /// Side effect
    pub action: Action,
    /// Error to record on the session
    pub error: Option<&'static str>,
    /// Notice for the user
    pub notice: Option<&'static str>,
}

impl Transition {
    fn stay(mode: RecognitionMode) -> Self {
        Self {
            mode,
            action: Action::None,
            error: None,
            notice: None,
        }
    }

    fn fallback(error: &'static str, notice: &'static str) -> Self {
        Self {
            mode: RecognitionMode::Fallback,
            action: Action::StartFallback,
            error: Some(error),
            notice: Some(notice),
        }
    }

    fn cleanup(error: Option<&'static str>, notice: Option<&'static str>) -> Self {
        Self {
            mode: RecognitionMode::None,
            action: Action::Cleanup,
            error,
            notice,
        }
    }
}

/// Compute the next mode for `trigger`
///
/// Triggers that do not belong to the current mode (a late socket error
/// after the fallback already took over) leave the mode unchanged.
#[must_use]
pub fn transition(mode: RecognitionMode, trigger: Trigger) -> Transition {
    use RecognitionMode as M;

    match (mode, trigger) {
        (_, Trigger::Stopped) => Transition::cleanup(None, None),

        (M::Networked, Trigger::SocketError) => Transition::fallback(
            "语音识别连接失败",
            "语音识别连接失败，尝试使用本地语音识别...",
        ),
        (M::Networked, Trigger::TransportUnavailable) => Transition::fallback(
            "启动语音识别失败",
            "语音识别连接失败，尝试使用本地语音识别...",
        ),
        (M::Networked, Trigger::DeviceError(DeviceErrorKind::PermissionDenied)) => {
            Transition::cleanup(Some("麦克风权限被拒绝"), Some("请允许麦克风权限"))
        }
        (M::Networked, Trigger::DeviceError(DeviceErrorKind::NotFound)) => {
            Transition::fallback("未找到麦克风设备", "未找到麦克风设备")
        }
        (M::Networked, Trigger::DeviceError(DeviceErrorKind::Other)) => {
            Transition::fallback("启动语音识别失败", "启动语音识别失败")
        }
        (M::Networked, Trigger::SocketClosed) => Transition::cleanup(None, None),

        (M::Fallback, Trigger::FallbackUnsupported) => Transition::cleanup(
            Some("当前环境不支持语音识别"),
            Some("当前环境不支持语音识别"),
        ),
        (M::Fallback, Trigger::FallbackError) => {
            Transition::cleanup(Some("语音识别失败"), Some("语音识别失败"))
        }
        (M::Fallback, Trigger::FallbackEnded) => Transition::cleanup(None, None),

        (mode, _) => Transition::stay(mode),
    }
}
