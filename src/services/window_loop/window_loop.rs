use super::handle::{WindowCommand, WindowLoopHandle, WindowStatus};
use super::r#trait::WindowServiceTrait;
use crate::config::Config;
use crate::debug_if_enabled;
use crate::error::Result;
use crate::events::{CancelReason, DisplaySignature, SessionEvent};
use crate::services::ownership::{OwnershipCoordinator, WindowRef};
use crate::services::transition::{OverlayLedger, Timer, TransitionSession};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Общие зависимости всех циклов окон
#[derive(Clone)]
pub struct LoopContext {
    pub config: Arc<Config>,
    pub coordinator: Arc<OwnershipCoordinator>,
    pub timer: Arc<dyn Timer>,
    pub overlays: Arc<OverlayLedger>,
}

enum Wake {
    Command(Option<WindowCommand>),
    Session(SessionEvent),
}

pub struct WindowLoop {
    index: usize,
    window: WindowRef,
    signature: DisplaySignature,
    coordinator: Arc<OwnershipCoordinator>,
    session: TransitionSession,
    commands: mpsc::UnboundedReceiver<WindowCommand>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl WindowLoop {
    /// Зарегистрировать окно в координаторе и запустить его цикл
    pub fn spawn(index: usize, window: WindowRef, signature: DisplaySignature, ctx: &LoopContext) -> WindowLoopHandle {
        let (session, events) = TransitionSession::new(
            index,
            ctx.config.watchdog_timeout(),
            Arc::clone(&ctx.timer),
            Arc::clone(&ctx.overlays),
        );
        let notices = session.subscribe();
        let (commands_tx, commands) = mpsc::unbounded_channel();

        ctx.coordinator.register_instance(&window, signature.clone());

        let window_loop = Box::new(Self {
            index,
            window,
            signature,
            coordinator: Arc::clone(&ctx.coordinator),
            session,
            commands,
            events,
        });

        let task = tokio::spawn(async move {
            if let Err(e) = window_loop.run().await {
                error!("Ошибка в цикле окна #{}: {}", index, e);
            }
        });

        WindowLoopHandle::new(index, commands_tx, notices, task)
    }

    fn handle_command(&mut self, command: WindowCommand) {
        debug_if_enabled!("Окно #{}: команда {:?}", self.index, command);
        match command {
            WindowCommand::StartTransition {
                transition,
                old_frame,
                new_frame,
                overlay_key,
                ready,
                reply,
            } => {
                let started = match ready {
                    Some(ready) => {
                        let fallback = ready.clone();
                        let started = self.session.start_synchronized(
                            transition,
                            &old_frame,
                            &new_frame,
                            overlay_key,
                            ready,
                            None,
                        );
                        // Окно, которое не стартовало, не должно задерживать остальных
                        if !started {
                            fallback.signal();
                        }
                        started
                    }
                    None => self.session.start(transition, &old_frame, &new_frame, overlay_key, None),
                };
                let _ = reply.send(started);
            }
            WindowCommand::Resume => self.session.resume(),
            WindowCommand::Stop(reason) => {
                self.session.stop_current(reason);
            }
            WindowCommand::Status(reply) => {
                let _ = reply.send(WindowStatus {
                    window_index: self.index,
                    state: self.session.state(),
                    skip_count: self.session.skip_count(),
                    current_transition: self.session.current_transition().map(str::to_string),
                });
            }
            // Обрабатывается в run()
            WindowCommand::Shutdown => {}
        }
    }

    fn teardown(&mut self) {
        self.session.stop_current(CancelReason::WindowTeardown);
        self.coordinator.release_focus(&self.window);
        self.coordinator.uninstall_interceptor(&self.window);
        self.coordinator.unregister_instance(&self.window, &self.signature);
    }
}

#[async_trait::async_trait]
impl WindowServiceTrait for WindowLoop {
    async fn run(mut self: Box<Self>) -> Result<()> {
        info!("Цикл окна #{} запущен ({})", self.index, self.signature);

        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                Some(event) = self.events.recv() => Wake::Session(event),
            };

            match wake {
                Wake::Command(Some(WindowCommand::Shutdown)) | Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.handle_command(command),
                Wake::Session(event) => {
                    self.session.handle_event(event);
                }
            }
        }

        self.teardown();
        info!("Цикл окна #{} остановлен", self.index);
        Ok(())
    }
}
