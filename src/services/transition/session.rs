use super::overlay::OverlayLedger;
use super::r#trait::{CompletionSignal, Timer, TimerHandle, Transition, TransitionTarget};
use crate::debug_if_enabled;
use crate::events::{CancelReason, Frame, SessionEvent, TransitionNotice, TransitionState};
use crate::services::barrier::ReadySignal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

const NOTICE_CHANNEL_CAPACITY: usize = 32;

/// Колбэк вызывающего: вызывается ровно один раз, когда запущенный переход
/// покидает состояние Running (нормально или принудительно)
pub type FinishedCallback = Box<dyn FnOnce(&TransitionNotice) + Send + 'static>;

/// Переход, который сейчас выполняется
struct ActiveTransition {
    transition: Box<dyn Transition>,
    name: String,
    overlay_key: Option<String>,
    started_at: Instant,
    watchdog_deadline: Instant,
    watchdog: Option<TimerHandle>,
    on_finished: Option<FinishedCallback>,
}

/// Сессия перехода одного окна.
///
/// Принадлежит циклу окна и не требует блокировок: `start`, `on_finished`,
/// `stop_current` и срабатывание watchdog сериализуются этим циклом. Колбэки
/// таймера и перехода приходят как `SessionEvent` через канал, который
/// возвращает конструктор.
pub struct TransitionSession {
    window_index: usize,
    state: TransitionState,
    active: Option<ActiveTransition>,
    skip_count: u64,
    generation: u64,
    watchdog_timeout: Duration,
    timer: Arc<dyn Timer>,
    overlays: Arc<OverlayLedger>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    notices: broadcast::Sender<TransitionNotice>,
}

impl TransitionSession {
    pub fn new(
        window_index: usize,
        watchdog_timeout: Duration,
        timer: Arc<dyn Timer>,
        overlays: Arc<OverlayLedger>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);

        let session = Self {
            window_index,
            state: TransitionState::Idle,
            active: None,
            skip_count: 0,
            generation: 0,
            watchdog_timeout,
            timer,
            overlays,
            events_tx,
            notices,
        };
        (session, events_rx)
    }

    pub fn window_index(&self) -> usize {
        self.window_index
    }

    pub fn state(&self) -> TransitionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TransitionState::Running
    }

    pub fn skip_count(&self) -> u64 {
        self.skip_count
    }

    pub fn overlay_key(&self) -> Option<&str> {
        self.active.as_ref().and_then(|active| active.overlay_key.as_deref())
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.active.as_ref().map(|active| active.started_at)
    }

    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|active| active.watchdog_deadline)
    }

    pub fn watchdog_armed(&self) -> bool {
        self.active.as_ref().is_some_and(|active| active.watchdog.is_some())
    }

    pub fn current_transition(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.name.as_str())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionNotice> {
        self.notices.subscribe()
    }

    /// Запустить переход. Если уже идёт другой, запрос молча отбрасывается
    pub fn start(
        &mut self,
        transition: Box<dyn Transition>,
        old_frame: &Frame,
        new_frame: &Frame,
        overlay_key: Option<String>,
        on_finished: Option<FinishedCallback>,
    ) -> bool {
        self.start_inner(transition, old_frame, new_frame, overlay_key, None, on_finished)
    }

    /// Запуск с паузой до `resume()`: переход сообщает о готовности через `ready`
    pub fn start_synchronized(
        &mut self,
        transition: Box<dyn Transition>,
        old_frame: &Frame,
        new_frame: &Frame,
        overlay_key: Option<String>,
        ready: ReadySignal,
        on_finished: Option<FinishedCallback>,
    ) -> bool {
        self.start_inner(transition, old_frame, new_frame, overlay_key, Some(ready), on_finished)
    }

    fn start_inner(
        &mut self,
        mut transition: Box<dyn Transition>,
        old_frame: &Frame,
        new_frame: &Frame,
        overlay_key: Option<String>,
        ready: Option<ReadySignal>,
        on_finished: Option<FinishedCallback>,
    ) -> bool {
        if self.state == TransitionState::Running {
            self.skip_count += 1;
            debug_if_enabled!(
                "Окно #{}: переход '{}' пропущен, уже идёт '{}' (пропусков: {})",
                self.window_index,
                transition.name(),
                self.current_transition().unwrap_or("?"),
                self.skip_count
            );
            self.notify(TransitionNotice::Skipped {
                window_index: self.window_index,
                skip_count: self.skip_count,
            });
            return false;
        }

        // Новое поколение отсекает поздние события прошлых запусков
        self.generation += 1;
        let generation = self.generation;
        let name = transition.name().to_string();

        let target = TransitionTarget {
            window_index: self.window_index,
            overlay_key: overlay_key.clone(),
            completion: CompletionSignal::new(generation, self.events_tx.clone()),
            ready,
        };

        if !transition.start(old_frame, new_frame, target) {
            warn!(
                "Окно #{}: переход '{}' не стартовал ({} -> {})",
                self.window_index, name, old_frame, new_frame
            );
            transition.cleanup();
            return false;
        }

        let started_at = Instant::now();
        let watchdog_deadline = started_at + self.watchdog_timeout;

        if let Some(key) = &overlay_key {
            self.overlays.occupy(key, self.window_index, watchdog_deadline);
        }

        let events_tx = self.events_tx.clone();
        let watchdog = self.timer.schedule_once(
            self.watchdog_timeout,
            Box::new(move || {
                let _ = events_tx.send(SessionEvent::WatchdogFired { generation });
            }),
        );

        self.active = Some(ActiveTransition {
            transition,
            name: name.clone(),
            overlay_key,
            started_at,
            watchdog_deadline,
            watchdog: Some(watchdog),
            on_finished,
        });
        self.state = TransitionState::Running;

        info!(
            "Окно #{}: переход '{}' запущен, watchdog {}мс",
            self.window_index,
            name,
            self.watchdog_timeout.as_millis()
        );
        self.notify(TransitionNotice::Started {
            window_index: self.window_index,
            transition: name,
        });
        true
    }

    /// Снять паузу с перехода после синхронного старта
    pub fn resume(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.transition.resume();
        }
    }

    /// Разобрать событие из канала сессии
    pub fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Finished { generation } => self.on_finished(generation),
            SessionEvent::WatchdogFired { generation } => self.on_watchdog_fired(generation),
        }
    }

    /// Нормальное завершение перехода
    pub fn on_finished(&mut self, generation: u64) -> bool {
        if !self.accepts(generation) {
            debug_if_enabled!(
                "Окно #{}: запоздалое завершение поколения {} проигнорировано",
                self.window_index,
                generation
            );
            return false;
        }
        let Some(mut active) = self.active.take() else {
            return false;
        };

        // Сначала разоружить watchdog, потом менять состояние
        self.disarm(&mut active);
        self.state = TransitionState::Idle;
        self.release_overlay(&active);
        active.transition.cleanup();

        let elapsed = active.started_at.elapsed();
        info!(
            "Окно #{}: переход '{}' завершён за {}мс",
            self.window_index,
            active.name,
            elapsed.as_millis()
        );
        let notice = TransitionNotice::Finished {
            window_index: self.window_index,
            transition: active.name.clone(),
            elapsed,
        };
        self.finish(active, notice);
        true
    }

    /// Принудительно остановить текущий переход; в Idle ничего не делает
    pub fn stop_current(&mut self, reason: CancelReason) -> bool {
        if self.state != TransitionState::Running {
            return false;
        }
        let Some(mut active) = self.active.take() else {
            self.state = TransitionState::Idle;
            return false;
        };

        self.disarm(&mut active);
        active.transition.stop();
        active.transition.cleanup();
        self.release_overlay(&active);
        self.state = TransitionState::Idle;

        info!(
            "Окно #{}: переход '{}' остановлен ({})",
            self.window_index, active.name, reason
        );
        let notice = TransitionNotice::Cancelled {
            window_index: self.window_index,
            transition: active.name.clone(),
            reason,
        };
        self.finish(active, notice);
        true
    }

    fn on_watchdog_fired(&mut self, generation: u64) -> bool {
        if !self.accepts(generation) {
            debug_if_enabled!(
                "Окно #{}: watchdog поколения {} сработал после завершения, игнорируем",
                self.window_index,
                generation
            );
            return false;
        }
        let Some(mut active) = self.active.take() else {
            return false;
        };

        // Таймер уже сработал, отменять нечего
        active.watchdog = None;
        self.state = TransitionState::TimedOut;

        warn!(
            "Окно #{}: переход '{}' превысил дедлайн, прошло {}мс, принудительная остановка",
            self.window_index,
            active.name,
            active.started_at.elapsed().as_millis()
        );

        active.transition.stop();
        active.transition.cleanup();
        self.release_overlay(&active);
        self.state = TransitionState::Idle;

        let notice = TransitionNotice::Cancelled {
            window_index: self.window_index,
            transition: active.name.clone(),
            reason: CancelReason::WatchdogTimeout,
        };
        self.finish(active, notice);
        true
    }

    fn accepts(&self, generation: u64) -> bool {
        self.state == TransitionState::Running && generation == self.generation
    }

    fn disarm(&self, active: &mut ActiveTransition) {
        if let Some(handle) = active.watchdog.take() {
            self.timer.cancel(handle);
        }
    }

    fn release_overlay(&self, active: &ActiveTransition) {
        if let Some(key) = &active.overlay_key {
            self.overlays.release(key, self.window_index);
        }
    }

    fn finish(&self, mut active: ActiveTransition, notice: TransitionNotice) {
        if let Some(callback) = active.on_finished.take() {
            callback(&notice);
        }
        self.notify(notice);
    }

    fn notify(&self, notice: TransitionNotice) {
        // Слушателей может не быть
        let _ = self.notices.send(notice);
    }
}

impl Drop for TransitionSession {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop_current(CancelReason::WindowTeardown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::barrier::ReadinessBarrier;
    use crate::services::transition::TokioTimer;
    use crate::testing::{FakeTransition, ManualTimer};
    use parking_lot::Mutex;

    struct Harness {
        session: TransitionSession,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        timer: Arc<ManualTimer>,
        overlays: Arc<OverlayLedger>,
    }

    impl Harness {
        fn new(watchdog: Duration) -> Self {
            let timer = Arc::new(ManualTimer::new());
            let overlays = Arc::new(OverlayLedger::new());
            let (session, events) = TransitionSession::new(0, watchdog, timer.clone(), overlays.clone());
            Self {
                session,
                events,
                timer,
                overlays,
            }
        }

        /// Доставить в сессию всё, что накопилось в канале
        fn pump(&mut self) -> usize {
            let mut handled = 0;
            while let Ok(event) = self.events.try_recv() {
                if self.session.handle_event(event) {
                    handled += 1;
                }
            }
            handled
        }
    }

    fn frames() -> (Frame, Frame) {
        (Frame::new("a.jpg", 1920, 1080), Frame::new("b.jpg", 1920, 1080))
    }

    #[test]
    fn test_start_arms_watchdog_and_runs() {
        let mut h = Harness::new(Duration::from_millis(100));
        let (old, new) = frames();
        let (transition, stats) = FakeTransition::manual("crossfade");

        assert!(h.session.start(Box::new(transition), &old, &new, Some("caption".into()), None));
        assert_eq!(h.session.state(), TransitionState::Running);
        assert!(h.session.watchdog_armed());
        assert_eq!(h.timer.armed_count(), 1);
        assert_eq!(h.session.overlay_key(), Some("caption"));
        assert!(h.overlays.is_occupied("caption"));
        assert_eq!(stats.starts(), 1);
        let deadline = h.session.watchdog_deadline().unwrap();
        assert_eq!(deadline - h.session.started_at().unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn test_second_start_is_skipped_once_and_first_untouched() {
        let mut h = Harness::new(Duration::from_millis(100));
        let (old, new) = frames();
        let (first, first_stats) = FakeTransition::manual("crossfade");
        let (second, second_stats) = FakeTransition::manual("slide");

        assert!(h.session.start(Box::new(first), &old, &new, None, None));
        assert!(!h.session.start(Box::new(second), &old, &new, None, None));

        assert_eq!(h.session.skip_count(), 1);
        assert_eq!(h.session.current_transition(), Some("crossfade"));
        assert_eq!(first_stats.stops(), 0);
        assert_eq!(first_stats.cleanups(), 0);
        assert_eq!(second_stats.starts(), 0);
        assert_eq!(h.timer.armed_count(), 1);
    }

    #[test]
    fn test_failed_start_cleans_up_and_stays_idle() {
        let mut h = Harness::new(Duration::from_millis(100));
        let (old, new) = frames();
        let (transition, stats) = FakeTransition::failing("ripple");

        assert!(!h.session.start(Box::new(transition), &old, &new, Some("ripple".into()), None));
        assert_eq!(h.session.state(), TransitionState::Idle);
        assert_eq!(stats.cleanups(), 1);
        assert_eq!(h.timer.armed_count(), 0);
        assert!(!h.overlays.is_occupied("ripple"));
        assert_eq!(h.session.skip_count(), 0);
    }

    #[test]
    fn test_normal_finish_disarms_and_cleans_up() {
        let mut h = Harness::new(Duration::from_millis(100));
        let (old, new) = frames();
        let (transition, stats) = FakeTransition::manual("crossfade");
        let finished = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&finished);

        h.session.start(
            Box::new(transition),
            &old,
            &new,
            Some("caption".into()),
            Some(Box::new(move |notice: &TransitionNotice| sink.lock().push(notice.clone()))),
        );
        assert!(stats.complete());
        assert_eq!(h.pump(), 1);

        assert_eq!(h.session.state(), TransitionState::Idle);
        assert_eq!(h.timer.armed_count(), 0);
        assert_eq!(h.timer.cancelled_count(), 1);
        assert_eq!(stats.cleanups(), 1);
        assert_eq!(stats.stops(), 0);
        assert!(!h.overlays.is_occupied("caption"));
        assert_eq!(finished.lock().len(), 1);
        assert!(matches!(finished.lock()[0], TransitionNotice::Finished { .. }));
    }

    #[test]
    fn test_watchdog_after_finish_has_no_effect() {
        let mut h = Harness::new(Duration::from_millis(100));
        let (old, new) = frames();
        let (transition, stats) = FakeTransition::manual("crossfade");
        let mut notices = h.session.subscribe();

        h.session.start(Box::new(transition), &old, &new, None, None);
        let generation = stats.generation().unwrap();
        stats.complete();
        h.pump();

        // Таймер "сработал" уже после завершения
        assert!(!h.session.handle_event(SessionEvent::WatchdogFired { generation }));
        assert_eq!(h.session.state(), TransitionState::Idle);
        assert_eq!(stats.cleanups(), 1);
        assert_eq!(stats.stops(), 0);

        let mut cancelled = 0;
        while let Ok(notice) = notices.try_recv() {
            if matches!(notice, TransitionNotice::Cancelled { .. }) {
                cancelled += 1;
            }
        }
        assert_eq!(cancelled, 0);
    }

    #[test]
    fn test_watchdog_forces_stop_and_reports_once() {
        let mut h = Harness::new(Duration::from_millis(100));
        let (old, new) = frames();
        let (transition, stats) = FakeTransition::manual("page_curl");
        let mut notices = h.session.subscribe();

        h.session.start(Box::new(transition), &old, &new, Some("curl".into()), None);
        assert_eq!(h.timer.fire_all(), 1);
        assert_eq!(h.pump(), 1);

        assert_eq!(h.session.state(), TransitionState::Idle);
        assert_eq!(stats.stops(), 1);
        assert_eq!(stats.cleanups(), 1);
        assert!(!h.overlays.is_occupied("curl"));

        // Запоздалое завершение от перехода уже ничего не меняет
        assert!(stats.complete());
        assert_eq!(h.pump(), 0);
        assert_eq!(stats.cleanups(), 1);

        let timeouts: Vec<_> = std::iter::from_fn(|| notices.try_recv().ok())
            .filter(|notice| notice.is_watchdog_timeout())
            .collect();
        assert_eq!(timeouts.len(), 1);
    }

    #[test]
    fn test_stop_current_is_idempotent() {
        let mut h = Harness::new(Duration::from_millis(100));
        let (old, new) = frames();
        let (transition, stats) = FakeTransition::manual("zoom");

        assert!(!h.session.stop_current(CancelReason::Explicit("noop".into())));

        h.session.start(Box::new(transition), &old, &new, None, None);
        assert!(h.session.stop_current(CancelReason::Explicit("user".into())));
        assert!(!h.session.stop_current(CancelReason::Explicit("user".into())));

        assert_eq!(stats.stops(), 1);
        assert_eq!(stats.cleanups(), 1);
        assert_eq!(h.timer.cancelled_count(), 1);

        // Таймер отменён до изменения состояния: срабатывать нечему
        assert_eq!(h.timer.fire_all(), 0);
        assert_eq!(h.pump(), 0);
    }

    #[test]
    fn test_late_events_from_previous_generation_are_ignored() {
        let mut h = Harness::new(Duration::from_millis(100));
        let (old, new) = frames();
        let (first, first_stats) = FakeTransition::manual("crossfade");
        let (second, second_stats) = FakeTransition::manual("slide");

        h.session.start(Box::new(first), &old, &new, None, None);
        let stale_generation = first_stats.generation().unwrap();
        h.session.stop_current(CancelReason::Explicit("next".into()));

        h.session.start(Box::new(second), &old, &new, None, None);
        assert!(!h.session.handle_event(SessionEvent::WatchdogFired {
            generation: stale_generation
        }));
        assert!(!h.session.handle_event(SessionEvent::Finished {
            generation: stale_generation
        }));
        assert_eq!(h.session.current_transition(), Some("slide"));

        second_stats.complete();
        assert_eq!(h.pump(), 1);
        assert_eq!(h.session.state(), TransitionState::Idle);
    }

    #[test]
    fn test_synchronized_start_signals_ready_and_resumes() {
        let mut h = Harness::new(Duration::from_millis(100));
        let (old, new) = frames();
        let barrier = ReadinessBarrier::new(4, Duration::from_millis(1));
        barrier.configure(2);
        let (transition, stats) = FakeTransition::manual("crossfade");

        assert!(h.session.start_synchronized(Box::new(transition), &old, &new, None, barrier.signaller(1), None));
        barrier.signal_ready(0);
        assert!(barrier.wait_all(Duration::from_millis(100)));

        h.session.resume();
        assert_eq!(stats.resumes(), 1);
    }

    #[test]
    fn test_drop_while_running_tears_down() {
        let h = Harness::new(Duration::from_millis(100));
        let Harness { mut session, timer, .. } = h;
        let (old, new) = frames();
        let (transition, stats) = FakeTransition::manual("dissolve");

        session.start(Box::new(transition), &old, &new, None, None);
        drop(session);
        assert_eq!(stats.stops(), 1);
        assert_eq!(stats.cleanups(), 1);
        assert_eq!(timer.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_real_timer_watchdog_scenario() {
        let timer: Arc<dyn Timer> = Arc::new(TokioTimer::current());
        let overlays = Arc::new(OverlayLedger::new());
        let (mut session, mut events) = TransitionSession::new(0, Duration::from_millis(100), timer, overlays);
        let mut notices = session.subscribe();
        let (old, new) = frames();
        let (transition, _stats) = FakeTransition::manual("stuck");

        let started = Instant::now();
        session.start(Box::new(transition), &old, &new, None, None);

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("watchdog не сработал")
            .unwrap();
        assert!(session.handle_event(event));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(session.state(), TransitionState::Idle);

        let notices: Vec<_> = std::iter::from_fn(|| notices.try_recv().ok()).collect();
        assert_eq!(notices.iter().filter(|n| n.is_watchdog_timeout()).count(), 1);
        assert_eq!(notices.iter().filter(|n| n.to_string().contains("watchdog_timeout")).count(), 1);
    }
}
