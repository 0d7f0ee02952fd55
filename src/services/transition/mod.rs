//! Переходы между кадрами: сессия с watchdog, таймер и учёт оверлеев

mod overlay;
mod session;
mod timer;
mod r#trait;

pub use overlay::{OverlayEntry, OverlayLedger};
pub use r#trait::{CompletionSignal, Timer, TimerCallback, TimerHandle, Transition, TransitionTarget};
pub use session::{FinishedCallback, TransitionSession};
pub use timer::TokioTimer;
