use crate::debug_if_enabled;
use dashmap::DashMap;
use std::time::Instant;
use tracing::warn;

/// Кто и до какого момента занимает оверлей
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayEntry {
    pub window_index: usize,
    pub started_at: Instant,
    pub deadline: Instant,
}

/// Учёт таймаутов оверлеев, общий для всех сессий.
///
/// Ключ оверлея обозначает визуальный подресурс, который занимает переход.
#[derive(Debug, Default)]
pub struct OverlayLedger {
    entries: DashMap<String, OverlayEntry>,
}

impl OverlayLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn occupy(&self, key: &str, window_index: usize, deadline: Instant) {
        let entry = OverlayEntry {
            window_index,
            started_at: Instant::now(),
            deadline,
        };

        if let Some(previous) = self.entries.insert(key.to_string(), entry) {
            if previous.window_index != window_index {
                warn!(
                    "Оверлей '{}' перехвачен окном #{} у окна #{}",
                    key, window_index, previous.window_index
                );
            }
        }
    }

    /// Освободить оверлей; чужая запись не трогается
    pub fn release(&self, key: &str, window_index: usize) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.window_index == window_index)
            .is_some();
        if removed {
            debug_if_enabled!("Оверлей '{}' освобождён окном #{}", key, window_index);
        }
        removed
    }

    pub fn is_occupied(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<OverlayEntry> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    /// Оверлеи, чей дедлайн уже прошёл
    pub fn overdue(&self, now: Instant) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
