use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Описание кадра, между которыми идёт переход.
///
/// Пиксели остаются на стороне рендера, здесь только идентичность и размер.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    pub source: Arc<str>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(source: impl Into<Arc<str>>, width: u32, height: u32) -> Self {
        Self {
            source: source.into(),
            width,
            height,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}x{})", self.source, self.width, self.height)
    }
}

/// Состояние сессии перехода одного окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionState {
    Idle,
    Running,
    TimedOut,
}

impl fmt::Display for TransitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionState::Idle => "idle",
            TransitionState::Running => "running",
            TransitionState::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Причина принудительной остановки перехода
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CancelReason {
    WatchdogTimeout,
    WindowTeardown,
    Explicit(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::WatchdogTimeout => f.write_str("watchdog_timeout"),
            CancelReason::WindowTeardown => f.write_str("window_teardown"),
            CancelReason::Explicit(reason) => f.write_str(reason),
        }
    }
}

/// Уведомления сессии для внешних слушателей
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionNotice {
    Started {
        window_index: usize,
        transition: String,
    },
    Skipped {
        window_index: usize,
        skip_count: u64,
    },
    Finished {
        window_index: usize,
        transition: String,
        elapsed: Duration,
    },
    Cancelled {
        window_index: usize,
        transition: String,
        reason: CancelReason,
    },
}

impl TransitionNotice {
    pub fn is_watchdog_timeout(&self) -> bool {
        matches!(
            self,
            TransitionNotice::Cancelled {
                reason: CancelReason::WatchdogTimeout,
                ..
            }
        )
    }
}

impl fmt::Display for TransitionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionNotice::Started { window_index, transition } => {
                write!(f, "#{} started: {}", window_index, transition)
            }
            TransitionNotice::Skipped { window_index, skip_count } => {
                write!(f, "#{} skipped (total {})", window_index, skip_count)
            }
            TransitionNotice::Finished { window_index, transition, elapsed } => {
                write!(f, "#{} finished: {} in {}ms", window_index, transition, elapsed.as_millis())
            }
            TransitionNotice::Cancelled { window_index, transition, reason } => {
                write!(f, "#{} cancelled: {} ({})", window_index, reason, transition)
            }
        }
    }
}

/// Событие, доставляемое в цикл окна из колбэков таймера и перехода.
///
/// `generation` привязывает событие к конкретному запуску: поздние события
/// от предыдущего запуска игнорируются.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Finished { generation: u64 },
    WatchdogFired { generation: u64 },
}

impl SessionEvent {
    pub fn generation(&self) -> u64 {
        match self {
            SessionEvent::Finished { generation } | SessionEvent::WatchdogFired { generation } => *generation,
        }
    }
}
