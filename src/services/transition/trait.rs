use crate::events::{Frame, SessionEvent};
use crate::services::barrier::ReadySignal;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Контракт визуального перехода.
///
/// Реализация рисует сама; сессия только решает, когда переход может
/// начаться и когда его нужно оборвать.
pub trait Transition: Send {
    /// Имя для логов (обычно имя эффекта)
    fn name(&self) -> &str;

    /// Запустить переход. `false` означает, что переход не стартовал.
    fn start(&mut self, old_frame: &Frame, new_frame: &Frame, target: TransitionTarget) -> bool;

    /// Снять паузу после синхронного старта
    fn resume(&mut self) {}

    fn stop(&mut self);

    fn cleanup(&mut self);
}

/// Всё, что переход получает при старте
pub struct TransitionTarget {
    pub window_index: usize,
    pub overlay_key: Option<String>,
    pub completion: CompletionSignal,
    /// Есть только при синхронном старте: переход сообщает о готовности
    /// первого кадра и ждёт `resume()`
    pub ready: Option<ReadySignal>,
}

/// Одноразовый сигнал завершения перехода.
///
/// `notify` поглощает сигнал, поэтому повторный вызов невозможен.
#[derive(Debug)]
pub struct CompletionSignal {
    generation: u64,
    tx: UnboundedSender<SessionEvent>,
}

impl CompletionSignal {
    pub(crate) fn new(generation: u64, tx: UnboundedSender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn notify(self) {
        // Цикл окна уже мог завершиться
        let _ = self.tx.send(SessionEvent::Finished {
            generation: self.generation,
        });
    }
}

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Дескриптор запланированного таймера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// Внешний таймер: однократный колбэк через заданное время с возможностью
/// отмены до срабатывания
pub trait Timer: Send + Sync {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    fn cancel(&self, handle: TimerHandle);
}
