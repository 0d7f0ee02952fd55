//! Барьер готовности: контроллер ждёт, пока каждое окно сообщит о готовности
//! первого кадра, и только потом снимает паузу с анимации.
//!
//! Очередь ограничена и не блокирует производителя: при переполнении сигнал
//! теряется, раунд синхронизации деградирует до "как получится".

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::debug_if_enabled;
use crate::error::Result;

/// Сигнал готовности одного окна, передаётся переходу при синхронном старте
#[derive(Debug, Clone)]
pub struct ReadySignal {
    index: usize,
    tx: Sender<usize>,
}

impl ReadySignal {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Сообщить о готовности; `false`, если очередь переполнена
    pub fn signal(&self) -> bool {
        push(&self.tx, self.index)
    }
}

fn push(tx: &Sender<usize>, index: usize) -> bool {
    match tx.try_send(index) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("Очередь готовности переполнена, сигнал окна #{} потерян", index);
            false
        }
        Err(TrySendError::Disconnected(_)) => {
            debug!("Очередь готовности закрыта, сигнал окна #{} отброшен", index);
            false
        }
    }
}

pub struct ReadinessBarrier {
    capacity: usize,
    expected_count: AtomicUsize,
    poll_interval: Duration,
    tx: Sender<usize>,
    rx: Receiver<usize>,
    // Накопитель потребителя
    ready_set: Mutex<HashSet<usize>>,
}

impl ReadinessBarrier {
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            capacity,
            expected_count: AtomicUsize::new(0),
            poll_interval,
            tx,
            rx,
            ready_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn expected_count(&self) -> usize {
        self.expected_count.load(Ordering::Acquire)
    }

    /// Подготовить новый раунд; 0 или 1 окно синхронизировать не нужно
    pub fn configure(&self, expected_count: usize) {
        self.ready_set.lock().clear();
        self.expected_count.store(expected_count, Ordering::Release);
        debug_if_enabled!("Барьер готовности настроен на {} окон", expected_count);
    }

    /// 0 или 1 окно: ждать некого
    pub fn is_trivial(&self) -> bool {
        self.expected_count() <= 1
    }

    pub fn signal_ready(&self, index: usize) -> bool {
        push(&self.tx, index)
    }

    /// Сигнал для окна с индексом `index`
    pub fn signaller(&self, index: usize) -> ReadySignal {
        ReadySignal {
            index,
            tx: self.tx.clone(),
        }
    }

    /// Выбросить все ожидающие сигналы (остатки прошлого раунда)
    pub fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug_if_enabled!("Барьер: отброшено {} устаревших сигналов", dropped);
        }
        dropped
    }

    /// Опрашивать очередь, пока не придут все индексы `[0, expected_count)`
    /// или не истечёт `timeout`. Блокирует вызывающий поток, но не дольше
    /// таймаута. Накопитель блокируется только на время вставки, во время
    /// сна `ready_count` доступен другим потокам.
    pub fn wait_all(&self, timeout: Duration) -> bool {
        if self.is_trivial() {
            return true;
        }
        let expected = self.expected_count();
        let deadline = Instant::now() + timeout;

        loop {
            match self.rx.try_recv() {
                Ok(index) => {
                    if index >= expected {
                        debug!("Барьер: индекс {} вне диапазона 0..{}", index, expected);
                        continue;
                    }
                    let ready = {
                        let mut ready_set = self.ready_set.lock();
                        ready_set.insert(index);
                        ready_set.len()
                    };
                    if ready >= expected {
                        debug_if_enabled!("Барьер: все {} окон готовы", expected);
                        return true;
                    }
                }
                Err(TryRecvError::Empty) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(
                            "Барьер: таймаут {}мс, готовы {}/{} окон",
                            timeout.as_millis(),
                            self.ready_count(),
                            expected
                        );
                        return false;
                    }
                    std::thread::sleep(self.poll_interval.min(deadline - now));
                }
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// То же ожидание, но на пуле блокирующих задач tokio: поток цикла окна
    /// не занимается опросом, результат приходит через await
    pub async fn wait_all_async(self: Arc<Self>, timeout: Duration) -> Result<bool> {
        let ready = tokio::task::spawn_blocking(move || self.wait_all(timeout)).await?;
        Ok(ready)
    }

    pub fn ready_count(&self) -> usize {
        self.ready_set.lock().len()
    }
}
