//! Общие заглушки для модульных тестов

use crate::services::transition::{Timer, TimerCallback, TimerHandle};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub use crate::services::dry_run::{DryRunTransition as FakeTransition, DryRunWindow as FakeWindow};

/// Таймер, который срабатывает только по команде теста
#[derive(Default)]
pub struct ManualTimer {
    next_id: AtomicU64,
    armed: Mutex<BTreeMap<u64, (Duration, TimerCallback)>>,
    cancelled: AtomicUsize,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed_count(&self) -> usize {
        self.armed.lock().len()
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Запустить все взведённые колбэки в порядке планирования
    pub fn fire_all(&self) -> usize {
        let armed = std::mem::take(&mut *self.armed.lock());
        let fired = armed.len();
        for (_, (_, callback)) in armed {
            callback();
        }
        fired
    }
}

impl Timer for ManualTimer {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.armed.lock().insert(id, (delay, callback));
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        if self.armed.lock().remove(&handle.0).is_some() {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}
