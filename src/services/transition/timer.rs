use super::r#trait::{Timer, TimerCallback, TimerHandle};
use crate::debug_if_enabled;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Запланированный колбэк: задача плюс флаг "сработал или отменён"
struct PendingTimer {
    task: JoinHandle<()>,
    done: Arc<AtomicBool>,
}

/// Таймер на задачах tokio: каждый запланированный колбэк живёт в своей
/// задаче, отмена прерывает задачу
pub struct TokioTimer {
    runtime: Handle,
    next_id: AtomicU64,
    pending: Arc<DashMap<u64, PendingTimer>>,
}

impl TokioTimer {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Таймер на текущем рантайме; паникует вне контекста tokio
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Timer for TokioTimer {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let done = Arc::new(AtomicBool::new(false));
        let done_for_task = Arc::clone(&done);
        let pending = Arc::clone(&self.pending);

        let task = self.runtime.spawn(async move {
            sleep(delay).await;
            // Срабатывание и отмена соревнуются за один флаг: побеждает ровно один
            if !done_for_task.swap(true, Ordering::SeqCst) {
                pending.remove(&id);
                callback();
            }
        });

        self.pending.insert(id, PendingTimer { task, done: Arc::clone(&done) });
        // Колбэк мог сработать до вставки записи
        if done.load(Ordering::SeqCst) {
            self.pending.remove(&id);
        }

        debug_if_enabled!("Таймер #{} запланирован через {}мс", id, delay.as_millis());
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some((_, entry)) = self.pending.remove(&handle.0) {
            if !entry.done.swap(true, Ordering::SeqCst) {
                entry.task.abort();
                debug_if_enabled!("Таймер #{} отменён", handle.0);
            }
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for entry in self.pending.iter() {
            entry.value().done.store(true, Ordering::SeqCst);
            entry.value().task.abort();
        }
        self.pending.clear();
    }
}
