//! Эмуляция окон и переходов без реального рендера.
//!
//! Используется демо-бинарником и тестами: окна ведут счётчики показов
//! ореола, переходы завершаются по таймеру или вручную.

use crate::events::{DisplayInfo, DisplaySignature, Frame, LocalPoint, WindowGeometry, WindowId};
use crate::services::ownership::{ScreenWindow, WindowRef};
use crate::services::transition::{CompletionSignal, Transition, TransitionTarget};
use crate::{debug_if_enabled, trace_if_enabled};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;

/// Окно-заглушка на заданном дисплее
pub struct DryRunWindow {
    id: WindowId,
    valid: AtomicBool,
    visible: AtomicBool,
    display: Mutex<Option<DisplayInfo>>,
    halo_shown: AtomicUsize,
    halo_hidden: AtomicUsize,
}

impl DryRunWindow {
    pub fn new(signature: &str) -> Arc<Self> {
        Self::with_geometry(signature, WindowGeometry::new(0, 0, DEFAULT_WIDTH, DEFAULT_HEIGHT))
    }

    pub fn with_geometry(signature: &str, geometry: WindowGeometry) -> Arc<Self> {
        Arc::new(Self {
            id: WindowId::next(),
            valid: AtomicBool::new(true),
            visible: AtomicBool::new(true),
            display: Mutex::new(Some(DisplayInfo::new(DisplaySignature::from(signature), geometry))),
            halo_shown: AtomicUsize::new(0),
            halo_hidden: AtomicUsize::new(0),
        })
    }

    /// То же, что `new`, но сразу как `WindowRef`
    pub fn on_display(signature: &str) -> WindowRef {
        Self::new(signature)
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    pub fn set_display(&self, display: Option<DisplayInfo>) {
        *self.display.lock() = display;
    }

    pub fn set_geometry(&self, geometry: WindowGeometry) {
        if let Some(display) = self.display.lock().as_mut() {
            display.geometry = geometry;
        }
    }

    pub fn halo_shown_count(&self) -> usize {
        self.halo_shown.load(Ordering::SeqCst)
    }

    pub fn halo_hidden_count(&self) -> usize {
        self.halo_hidden.load(Ordering::SeqCst)
    }
}

impl ScreenWindow for DryRunWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn bound_display(&self) -> Option<DisplayInfo> {
        self.display.lock().clone()
    }

    fn show_halo(&self, at: LocalPoint) {
        self.halo_shown.fetch_add(1, Ordering::SeqCst);
        trace_if_enabled!("Dry-run: {} показывает ореол в ({}, {})", self.id, at.x, at.y);
    }

    fn hide_halo(&self) {
        self.halo_hidden.fetch_add(1, Ordering::SeqCst);
        trace_if_enabled!("Dry-run: {} скрывает ореол", self.id);
    }
}

impl Drop for DryRunWindow {
    fn drop(&mut self) {
        debug_if_enabled!("Dry-run окно {} уничтожено", self.id);
    }
}

/// Счётчики вызовов перехода, доступные снаружи после того, как переход
/// передан сессии
#[derive(Debug, Default)]
pub struct TransitionStats {
    starts: AtomicUsize,
    resumes: AtomicUsize,
    stops: AtomicUsize,
    cleanups: AtomicUsize,
    last_generation: AtomicU64,
    pending: Mutex<Option<CompletionSignal>>,
}

impl TransitionStats {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    /// Поколение последнего запуска
    pub fn generation(&self) -> Option<u64> {
        match self.last_generation.load(Ordering::SeqCst) {
            0 => None,
            generation => Some(generation),
        }
    }

    /// Завершить переход вручную; `false`, если сигнала уже нет
    pub fn complete(&self) -> bool {
        match self.pending.lock().take() {
            Some(completion) => {
                completion.notify();
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    /// Завершается только через `TransitionStats::complete`
    Manual,
    /// Завершается сам через заданное время после старта (или `resume`)
    After(Duration),
    /// `start` возвращает `false`
    FailStart,
}

/// Переход-заглушка
pub struct DryRunTransition {
    name: String,
    completion: Completion,
    stats: Arc<TransitionStats>,
    window_index: usize,
    paused: bool,
    task: Option<JoinHandle<()>>,
}

impl DryRunTransition {
    fn build(name: &str, completion: Completion) -> (Self, Arc<TransitionStats>) {
        let stats = Arc::new(TransitionStats::default());
        let transition = Self {
            name: name.to_string(),
            completion,
            stats: Arc::clone(&stats),
            window_index: 0,
            paused: false,
            task: None,
        };
        (transition, stats)
    }

    pub fn manual(name: &str) -> (Self, Arc<TransitionStats>) {
        Self::build(name, Completion::Manual)
    }

    pub fn timed(name: &str, duration: Duration) -> (Self, Arc<TransitionStats>) {
        Self::build(name, Completion::After(duration))
    }

    pub fn failing(name: &str) -> (Self, Arc<TransitionStats>) {
        Self::build(name, Completion::FailStart)
    }

    fn spawn_completion(&mut self, duration: Duration) {
        let Some(completion) = self.stats.pending.lock().take() else {
            return;
        };

        match Handle::try_current() {
            Ok(runtime) => {
                self.task = Some(runtime.spawn(async move {
                    tokio::time::sleep(duration).await;
                    completion.notify();
                }));
            }
            Err(_) => {
                warn!(
                    "Dry-run: переход '{}' окна #{} запущен вне рантайма tokio, завершения не будет",
                    self.name, self.window_index
                );
                *self.stats.pending.lock() = Some(completion);
            }
        }
    }
}

impl Transition for DryRunTransition {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, old_frame: &Frame, new_frame: &Frame, target: TransitionTarget) -> bool {
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        if self.completion == Completion::FailStart {
            return false;
        }

        self.window_index = target.window_index;
        self.stats
            .last_generation
            .store(target.completion.generation(), Ordering::SeqCst);
        *self.stats.pending.lock() = Some(target.completion);

        info!(
            "Dry-run: окно #{} рисует '{}' {} -> {}",
            self.window_index, self.name, old_frame, new_frame
        );

        if let Some(ready) = target.ready {
            // Первый кадр "готов" сразу, дальше ждём resume
            ready.signal();
            self.paused = true;
            return true;
        }

        if let Completion::After(duration) = self.completion {
            self.spawn_completion(duration);
        }
        true
    }

    fn resume(&mut self) {
        self.stats.resumes.fetch_add(1, Ordering::SeqCst);
        if !self.paused {
            return;
        }
        self.paused = false;
        if let Completion::After(duration) = self.completion {
            self.spawn_completion(duration);
        }
    }

    fn stop(&mut self) {
        self.stats.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn cleanup(&mut self) {
        self.stats.cleanups.fetch_add(1, Ordering::SeqCst);
        self.paused = false;
    }
}

impl Drop for DryRunTransition {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SessionEvent;
    use tokio::sync::mpsc;

    fn target(generation: u64) -> (TransitionTarget, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let target = TransitionTarget {
            window_index: 3,
            overlay_key: None,
            completion: CompletionSignal::new(generation, tx),
            ready: None,
        };
        (target, rx)
    }

    fn frames() -> (Frame, Frame) {
        (Frame::new("old.png", 800, 600), Frame::new("new.png", 800, 600))
    }

    #[test]
    fn test_window_reports_bound_display() {
        let window = DryRunWindow::new("DELL:42");
        let display = window.bound_display().unwrap();
        assert_eq!(display.signature.as_str(), "DELL:42");
        assert!(display.geometry.is_valid());

        window.set_geometry(WindowGeometry::new(0, 0, 0, 10));
        assert!(!window.bound_display().unwrap().geometry.is_valid());
        window.set_display(None);
        assert!(window.bound_display().is_none());
    }

    #[test]
    fn test_manual_transition_completes_on_demand() {
        let (mut transition, stats) = DryRunTransition::manual("crossfade");
        let (target, mut rx) = target(7);
        let (old, new) = frames();

        assert!(transition.start(&old, &new, target));
        assert_eq!(stats.generation(), Some(7));
        assert!(rx.try_recv().is_err());

        assert!(stats.complete());
        assert!(!stats.complete());
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Finished { generation: 7 });
    }

    #[tokio::test]
    async fn test_timed_transition_waits_for_resume_when_synchronized() {
        let (mut transition, stats) = DryRunTransition::timed("slide", Duration::from_millis(10));
        let (mut target, mut rx) = target(1);
        let barrier = crate::services::barrier::ReadinessBarrier::new(1, Duration::from_millis(1));
        target.ready = Some(barrier.signaller(3));
        let (old, new) = frames();

        assert!(transition.start(&old, &new, target));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());

        transition.resume();
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(event, Some(SessionEvent::Finished { generation: 1 }));
        assert_eq!(stats.resumes(), 1);
    }

    #[tokio::test]
    async fn test_stop_aborts_pending_completion() {
        let (mut transition, stats) = DryRunTransition::timed("zoom", Duration::from_millis(20));
        let (target, mut rx) = target(2);
        let (old, new) = frames();

        assert!(transition.start(&old, &new, target));
        transition.stop();
        transition.cleanup();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(stats.stops(), 1);
        assert_eq!(stats.cleanups(), 1);
    }
}
