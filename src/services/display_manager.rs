//! Контроллер дисплеев: раздаёт старт перехода всем циклам окон и, если
//! окон больше одного, выравнивает первый кадр через барьер готовности.

use crate::debug_if_enabled;
use crate::error::{Result, SyncError};
use crate::events::{CancelReason, DisplaySignature, Frame, TransitionNotice};
use crate::services::barrier::ReadinessBarrier;
use crate::services::ownership::WindowRef;
use crate::services::transition::Transition;
use crate::services::window_loop::{LoopContext, WindowLoop, WindowLoopHandle, WindowStatus};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Итог раунда запуска переходов
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Все окна сообщили о готовности до таймаута
    Synchronized,
    /// Барьер не дождался всех окон, окна продолжили как получится
    Degraded,
    /// Синхронизация не требовалась (выключена или одно окно)
    Unsynchronized,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncOutcome::Synchronized => "synchronized",
            SyncOutcome::Degraded => "degraded",
            SyncOutcome::Unsynchronized => "unsynchronized",
        };
        f.write_str(name)
    }
}

pub struct DisplayManager {
    ctx: LoopContext,
    barrier: Arc<ReadinessBarrier>,
    windows: Vec<WindowLoopHandle>,
}

impl DisplayManager {
    pub fn new(ctx: LoopContext) -> Self {
        let barrier = Arc::new(ReadinessBarrier::new(
            ctx.config.sync.barrier_capacity,
            ctx.config.barrier_poll_interval(),
        ));
        Self {
            ctx,
            barrier,
            windows: Vec::new(),
        }
    }

    pub fn context(&self) -> &LoopContext {
        &self.ctx
    }

    pub fn barrier(&self) -> &Arc<ReadinessBarrier> {
        &self.barrier
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Подключить окно: запускается его цикл, окно регистрируется в координаторе
    pub fn add_window(&mut self, window: WindowRef, signature: DisplaySignature) -> usize {
        let index = self.windows.len();
        info!("Подключено окно #{} на дисплее {}", index, signature);
        self.windows.push(WindowLoop::spawn(index, window, signature, &self.ctx));
        index
    }

    fn window(&self, index: usize) -> Result<&WindowLoopHandle> {
        match self.windows.get(index) {
            Some(handle) => Ok(handle),
            None => SyncError::window_not_found(format!("#{}", index)),
        }
    }

    pub fn subscribe(&self, index: usize) -> Result<broadcast::Receiver<TransitionNotice>> {
        Ok(self.window(index)?.subscribe())
    }

    pub async fn status(&self, index: usize) -> Result<WindowStatus> {
        self.window(index)?.status().await
    }

    /// Запустить переход на всех окнах.
    ///
    /// `factory` создаёт переход для окна с данным индексом. При включённой
    /// синхронизации и нескольких окнах каждое окно стартует на паузе, после
    /// барьера `Resume` получают только окна, принявшие старт. Если хоть одно
    /// окно пропустило раунд, раунд считается деградировавшим.
    pub async fn start_all<F>(&self, old_frame: &Frame, new_frame: &Frame, mut factory: F) -> Result<SyncOutcome>
    where
        F: FnMut(usize) -> Box<dyn Transition>,
    {
        let count = self.windows.len();
        let synchronized = self.ctx.config.sync.enabled && count > 1;

        if !synchronized {
            for handle in &self.windows {
                let index = handle.index();
                let started = handle
                    .start(factory(index), old_frame.clone(), new_frame.clone(), overlay_key(index), None)
                    .await?;
                if !started {
                    debug_if_enabled!("Окно #{} пропустило раунд", index);
                }
            }
            return Ok(SyncOutcome::Unsynchronized);
        }

        self.barrier.configure(count);
        self.barrier.drain();

        let mut started = Vec::with_capacity(count);
        let mut failure = None;
        for handle in &self.windows {
            let index = handle.index();
            let result = handle
                .start(
                    factory(index),
                    old_frame.clone(),
                    new_frame.clone(),
                    overlay_key(index),
                    Some(self.barrier.signaller(index)),
                )
                .await;
            match result {
                Ok(true) => started.push(true),
                Ok(false) => {
                    warn!("Окно #{} занято предыдущим переходом и пропускает раунд", index);
                    started.push(false);
                }
                Err(e) => {
                    error!("Окно #{} не приняло команду старта: {}", index, e);
                    started.push(false);
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        let wait = Arc::clone(&self.barrier)
            .wait_all_async(self.ctx.config.barrier_wait_timeout())
            .await;

        // Снять паузу нужно в любом случае, иначе окна зависнут на первом кадре
        self.resume_started(&started);

        if let Some(e) = failure {
            return Err(e);
        }

        let skipped = started.iter().filter(|started| !**started).count();
        if !wait? {
            warn!(
                "Синхронизация не удалась: готовы {}/{} окон, продолжаем без неё",
                self.barrier.ready_count(),
                count
            );
            Ok(SyncOutcome::Degraded)
        } else if skipped > 0 {
            warn!("Раунд без {} из {} окон: они ещё заняты переходом", skipped, count);
            Ok(SyncOutcome::Degraded)
        } else {
            info!("Переход синхронно запущен на {} окнах", count);
            Ok(SyncOutcome::Synchronized)
        }
    }

    /// `Resume` только окнам, которые приняли старт в этом раунде
    fn resume_started(&self, started: &[bool]) {
        for (handle, _) in self.windows.iter().zip(started).filter(|(_, started)| **started) {
            if let Err(e) = handle.resume() {
                warn!("Не удалось снять паузу: {}", e);
            }
        }
    }

    /// Остановить переходы, чьи оверлеи пережили свой дедлайн.
    ///
    /// Дедлайн оверлея совпадает с дедлайном сторожевого таймера сессии.
    pub fn stop_overdue(&self, now: Instant) -> Result<usize> {
        let mut stopped = 0;
        for key in self.ctx.overlays.overdue(now) {
            let Some(entry) = self.ctx.overlays.get(&key) else {
                continue;
            };
            warn!("Оверлей '{}' окна #{} просрочен, переход останавливается", key, entry.window_index);
            self.window(entry.window_index)?
                .stop(CancelReason::Explicit("overlay_overdue".to_string()))?;
            stopped += 1;
        }
        Ok(stopped)
    }

    /// Остановить текущие переходы на всех окнах
    pub fn stop_all(&self, reason: CancelReason) -> Result<()> {
        info!("Остановка переходов на всех окнах ({})", reason);
        let mut failure = None;
        for handle in &self.windows {
            if let Err(e) = handle.stop(reason.clone()) {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Завершить циклы всех окон
    pub async fn shutdown(self) -> Result<()> {
        info!("Завершение {} циклов окон", self.windows.len());
        let mut failure = None;
        for handle in self.windows {
            let index = handle.index();
            if let Err(e) = handle.shutdown().await {
                error!("Цикл окна #{} завершился с ошибкой: {}", index, e);
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

fn overlay_key(index: usize) -> Option<String> {
    Some(format!("transition#{}", index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::TransitionState;
    use crate::services::ownership::OwnershipCoordinator;
    use crate::services::transition::{OverlayLedger, TokioTimer};
    use crate::testing::{FakeTransition, FakeWindow};
    use std::time::{Duration, Instant};

    fn manager(displays: usize, mut config: Config) -> DisplayManager {
        config.sync.wait_timeout_ms = 200;
        let ctx = LoopContext {
            config: Arc::new(config),
            coordinator: Arc::new(OwnershipCoordinator::new()),
            timer: Arc::new(TokioTimer::current()),
            overlays: Arc::new(OverlayLedger::new()),
        };
        let mut manager = DisplayManager::new(ctx);
        for i in 0..displays {
            let signature = format!("DP-{}", i);
            manager.add_window(FakeWindow::on_display(&signature), signature.as_str().into());
        }
        manager
    }

    fn frames() -> (Frame, Frame) {
        (Frame::new("a.jpg", 1920, 1080), Frame::new("b.jpg", 1920, 1080))
    }

    #[tokio::test]
    async fn test_synchronized_start_resumes_every_window() {
        let manager = manager(3, Config::default());
        let (old, new) = frames();
        let mut stats_list = Vec::new();

        let outcome = manager
            .start_all(&old, &new, |_| {
                let (transition, stats) = FakeTransition::timed("crossfade", Duration::from_millis(10));
                stats_list.push(stats);
                Box::new(transition)
            })
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Synchronized);
        // Resume доходит до циклов асинхронно
        tokio::time::sleep(Duration::from_millis(100)).await;
        for stats in &stats_list {
            assert_eq!(stats.resumes(), 1);
        }
        for index in 0..3 {
            assert_eq!(manager.status(index).await.unwrap().state, TransitionState::Idle);
        }
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_busy_window_does_not_block_the_round() {
        let manager = manager(2, Config::default());
        let (old, new) = frames();

        // Окно #1 занято долгим переходом
        let (busy, busy_stats) = FakeTransition::manual("ken_burns");
        assert!(manager.windows[1]
            .start(Box::new(busy), old.clone(), new.clone(), None, None)
            .await
            .unwrap());

        let mut fresh = Vec::new();
        let started = Instant::now();
        let outcome = manager
            .start_all(&old, &new, |_| {
                let (transition, stats) = FakeTransition::manual("slide");
                fresh.push(stats);
                Box::new(transition)
            })
            .await
            .unwrap();

        // Раунд не ждёт таймаута, но пропуск окна делает его неполным
        assert_eq!(outcome, SyncOutcome::Degraded);
        assert!(started.elapsed() < Duration::from_millis(200));

        let status = manager.status(1).await.unwrap();
        assert_eq!(status.skip_count, 1);
        assert_eq!(status.current_transition.as_deref(), Some("ken_burns"));
        // Чужой переход на занятом окне не получает Resume
        assert_eq!(busy_stats.resumes(), 0);
        manager.status(0).await.unwrap();
        assert_eq!(fresh[0].resumes(), 1);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_ready_signal_degrades_round() {
        let manager = manager(2, Config::default());
        let (old, new) = frames();

        // Окно #1 стартует, но так и не сообщает о готовности
        let outcome = manager
            .start_all(&old, &new, |index| {
                if index == 0 {
                    Box::new(FakeTransition::manual("slide").0) as Box<dyn Transition>
                } else {
                    Box::new(SilentTransition)
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Degraded);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_window_or_disabled_sync_skips_barrier() {
        let single = manager(1, Config::default());
        let (old, new) = frames();
        let outcome = single
            .start_all(&old, &new, |_| Box::new(FakeTransition::manual("slide").0))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Unsynchronized);
        single.shutdown().await.unwrap();

        let mut config = Config::default();
        config.sync.enabled = false;
        let disabled = manager(3, config);
        let outcome = disabled
            .start_all(&old, &new, |_| Box::new(FakeTransition::manual("slide").0))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Unsynchronized);
        disabled.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_all_cancels_running_transitions() {
        let manager = manager(2, Config::default());
        let (old, new) = frames();
        let mut receivers: Vec<_> = (0..2).map(|i| manager.subscribe(i).unwrap()).collect();

        manager
            .start_all(&old, &new, |_| Box::new(FakeTransition::manual("zoom").0))
            .await
            .unwrap();
        manager.stop_all(CancelReason::Explicit("user".into())).unwrap();

        for rx in &mut receivers {
            let mut cancelled = false;
            while let Ok(Ok(notice)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                if matches!(notice, TransitionNotice::Cancelled { .. }) {
                    cancelled = true;
                    break;
                }
            }
            assert!(cancelled);
        }
        assert!(matches!(manager.status(7).await, Err(SyncError::WindowNotFound(_))));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_overdue_cancels_stuck_transition() {
        let manager = manager(2, Config::default());
        let (old, new) = frames();
        let mut rx = manager.subscribe(0).unwrap();

        manager
            .start_all(&old, &new, |_| Box::new(FakeTransition::manual("curl").0))
            .await
            .unwrap();

        assert_eq!(manager.stop_overdue(Instant::now()).unwrap(), 0);

        // Момент далеко за дедлайном сторожевого таймера
        let later = Instant::now() + manager.context().config.watchdog_timeout() * 2;
        assert_eq!(manager.stop_overdue(later).unwrap(), 2);

        let mut reason = None;
        while let Ok(Ok(notice)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            if let TransitionNotice::Cancelled { reason: r, .. } = notice {
                reason = Some(r);
                break;
            }
        }
        assert_eq!(reason, Some(CancelReason::Explicit("overlay_overdue".into())));

        // Status проходит через ту же очередь, что и Stop
        for index in 0..2 {
            assert_eq!(manager.status(index).await.unwrap().state, TransitionState::Idle);
        }
        assert!(manager.context().overlays.is_empty());
        manager.shutdown().await.unwrap();
    }

    /// Переход, который стартует, но никогда не сообщает о готовности
    struct SilentTransition;

    impl Transition for SilentTransition {
        fn name(&self) -> &str {
            "silent"
        }

        fn start(&mut self, _: &Frame, _: &Frame, _target: crate::services::transition::TransitionTarget) -> bool {
            true
        }

        fn stop(&mut self) {}

        fn cleanup(&mut self) {}
    }
}
