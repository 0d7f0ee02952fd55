use anyhow::Result;
use clap::Parser;
use mdsync::config::Config;
use mdsync::events::{CancelReason, DisplayDescriptor, DisplaySignature, Frame, TransitionState, WindowGeometry};
use mdsync::services::{
    DisplayManager, DryRunTransition, DryRunWindow, LoopContext, OverlayLedger, OwnershipCoordinator, TokioTimer,
    WindowRef,
};
use mdsync::utils::EffectCatalog;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Во сколько раз демо ускоряет эффекты из справочника
const DEMO_TIME_SCALE: u32 = 10;
const DISPLAY_WIDTH: u32 = 1920;
const DISPLAY_HEIGHT: u32 = 1080;

#[derive(Parser, Debug)]
#[command(name = "mdsync")]
#[command(about = "Эмуляция сессии из нескольких полноэкранных окон: фокус, ореол курсора и синхронные переходы")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "mdsync.toml")]
    config: String,

    /// Количество эмулируемых дисплеев
    #[arg(short, long, default_value_t = 3)]
    displays: usize,

    /// Количество раундов переходов
    #[arg(short, long, default_value_t = 3)]
    rounds: usize,

    /// Уровень логирования
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Инициализация системы логирования
    init_tracing(&args.log_level)?;

    info!("Запуск mdsync v{}", env!("CARGO_PKG_VERSION"));

    // Загрузка конфигурации
    let config = Arc::new(Config::load(&args.config)?);
    info!(
        "Конфигурация загружена из: {} (watchdog {}мс, синхронизация: {})",
        args.config,
        config.watchdog_timeout().as_millis(),
        config.sync.enabled
    );

    let ctx = LoopContext {
        config: config.clone(),
        coordinator: Arc::new(OwnershipCoordinator::new()),
        timer: Arc::new(TokioTimer::current()),
        overlays: Arc::new(OverlayLedger::new()),
    };

    let events_handle = spawn_event_logger(&ctx.coordinator);

    let mut manager = DisplayManager::new(ctx.clone());
    let mut windows: Vec<(WindowRef, DisplaySignature)> = Vec::with_capacity(args.displays);
    for i in 0..args.displays {
        let geometry = WindowGeometry::new((i as u32 * DISPLAY_WIDTH) as i32, 0, DISPLAY_WIDTH, DISPLAY_HEIGHT);
        let descriptor = DisplayDescriptor::new(geometry, 0x1000 + i)
            .with_model("DRYRUN")
            .with_serial(format!("{:04}", i));
        let signature = DisplaySignature::derive(&descriptor);
        let window: WindowRef = DryRunWindow::with_geometry(signature.as_str(), geometry);
        manager.add_window(window.clone(), signature.clone());
        windows.push((window, signature));
    }

    info!("Все компоненты инициализированы ({} дисплеев)", manager.window_count());

    let demo = run_demo(&manager, &windows, args.rounds);

    // Ожидание конца демо или сигнала завершения
    tokio::select! {
        result = demo => {
            if let Err(e) = result {
                error!("Ошибка в демо: {}", e);
            }
        }
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
                Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
            }
            if let Err(e) = manager.stop_all(CancelReason::Explicit("shutdown".to_string())) {
                warn!("Не удалось остановить переходы: {}", e);
            }
        }
    }

    info!("Завершение работы...");

    let snapshot = ctx.coordinator.snapshot();
    info!(
        "Итоговое состояние: фокус {:?}, ореол {:?}, перехватчик {:?}, окон {}",
        snapshot.focus_owner, snapshot.halo_owner, snapshot.interceptor_owner, snapshot.registered
    );

    drop(windows);
    let shutdown_timeout = Duration::from_secs(5);
    match tokio::time::timeout(shutdown_timeout, manager.shutdown()).await {
        Ok(Ok(())) => info!("Все циклы окон завершили работу корректно"),
        Ok(Err(e)) => warn!("Ошибка при завершении циклов окон: {}", e),
        Err(_) => warn!("Таймаут при завершении циклов окон"),
    }
    events_handle.abort();

    info!("mdsync завершил работу");
    Ok(())
}

async fn run_demo(manager: &DisplayManager, windows: &[(WindowRef, DisplaySignature)], rounds: usize) -> Result<()> {
    let coordinator = &manager.context().coordinator;

    // Все окна пытаются захватить фокус и перехватчик: выигрывает первое
    for (window, _) in windows {
        coordinator.claim_focus(window);
        coordinator.install_interceptor(window);
    }

    // Курсор проходит по всем дисплеям слева направо
    let pointer_y = (DISPLAY_HEIGHT / 2) as i32;
    for step in 0..windows.len() {
        let pointer_x = (step as u32 * DISPLAY_WIDTH + DISPLAY_WIDTH / 2) as i32;
        let hit = windows.iter().find_map(|(window, signature)| {
            window
                .bound_display()
                .filter(|display| display.geometry.contains(pointer_x, pointer_y))
                .map(|display| (signature, display.geometry))
        });
        let Some((signature, geometry)) = hit else {
            warn!("Курсор ({}, {}) вне всех дисплеев", pointer_x, pointer_y);
            continue;
        };

        coordinator.migrate_halo_owner_for_screen(signature);
        if let Some(owner) = coordinator.halo_owner() {
            owner.show_halo(geometry.to_local(pointer_x, pointer_y));
        }
    }

    // Модальный диалог гасит ореол и ctrl
    coordinator.set_ctrl_held(true);
    coordinator.set_modal_suppressed(true);
    coordinator.set_ctrl_held(true);
    coordinator.set_modal_suppressed(false);

    let effects = EffectCatalog::names();
    let mut frame = Frame::new("frame-0.jpg", DISPLAY_WIDTH, DISPLAY_HEIGHT);

    for round in 0..rounds {
        let effect = effects[round % effects.len()];
        let duration = EffectCatalog::duration_of(effect).unwrap_or_default() / DEMO_TIME_SCALE;
        let next = Frame::new(format!("frame-{}.jpg", round + 1), DISPLAY_WIDTH, DISPLAY_HEIGHT);

        info!("Раунд {}: эффект '{}' ({}мс)", round + 1, effect, duration.as_millis());
        let outcome = manager
            .start_all(&frame, &next, |_| Box::new(DryRunTransition::timed(effect, duration).0))
            .await?;
        info!("Раунд {}: {}", round + 1, outcome);

        wait_until_idle(manager, manager.context().config.watchdog_timeout()).await?;
        frame = next;
    }

    Ok(())
}

/// Дождаться, пока все окна вернутся в Idle
async fn wait_until_idle(manager: &DisplayManager, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut interval = tokio::time::interval(Duration::from_millis(50));

    loop {
        interval.tick().await;

        let mut busy = 0;
        for index in 0..manager.window_count() {
            if manager.status(index).await?.state != TransitionState::Idle {
                busy += 1;
            }
        }
        if busy == 0 {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            warn!("{} окон всё ещё заняты переходом", busy);
            let stopped = manager.stop_overdue(std::time::Instant::now())?;
            if stopped > 0 {
                warn!("Остановлено {} переходов с просроченным оверлеем", stopped);
            }
            return Ok(());
        }
    }
}

fn spawn_event_logger(coordinator: &OwnershipCoordinator) -> tokio::task::JoinHandle<()> {
    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!("Координатор: {}", event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Пропущено {} событий координатора", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    Ok(())
}
