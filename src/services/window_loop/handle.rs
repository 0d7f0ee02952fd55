use crate::error::{Result, SyncError};
use crate::events::{CancelReason, Frame, TransitionNotice, TransitionState};
use crate::services::barrier::ReadySignal;
use crate::services::transition::Transition;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Команды контроллера циклу окна
pub enum WindowCommand {
    StartTransition {
        transition: Box<dyn Transition>,
        old_frame: Frame,
        new_frame: Frame,
        overlay_key: Option<String>,
        ready: Option<ReadySignal>,
        reply: oneshot::Sender<bool>,
    },
    Resume,
    Stop(CancelReason),
    Status(oneshot::Sender<WindowStatus>),
    Shutdown,
}

impl std::fmt::Debug for WindowCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowCommand::StartTransition { transition, ready, .. } => f
                .debug_struct("StartTransition")
                .field("transition", &transition.name())
                .field("synchronized", &ready.is_some())
                .finish(),
            WindowCommand::Resume => f.write_str("Resume"),
            WindowCommand::Stop(reason) => f.debug_tuple("Stop").field(reason).finish(),
            WindowCommand::Status(_) => f.write_str("Status"),
            WindowCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Снимок состояния сессии окна
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStatus {
    pub window_index: usize,
    pub state: TransitionState,
    pub skip_count: u64,
    pub current_transition: Option<String>,
}

/// Сторона контроллера: отправка команд в цикл окна
pub struct WindowLoopHandle {
    index: usize,
    commands: mpsc::UnboundedSender<WindowCommand>,
    notices: broadcast::Receiver<TransitionNotice>,
    task: JoinHandle<()>,
}

impl WindowLoopHandle {
    pub(super) fn new(
        index: usize,
        commands: mpsc::UnboundedSender<WindowCommand>,
        notices: broadcast::Receiver<TransitionNotice>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            index,
            commands,
            notices,
            task,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Новый слушатель уведомлений сессии этого окна
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionNotice> {
        self.notices.resubscribe()
    }

    pub fn send(&self, command: WindowCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::WindowLoopClosed(self.index))
    }

    /// Запустить переход и дождаться решения сессии (запущен или нет)
    pub async fn start(
        &self,
        transition: Box<dyn Transition>,
        old_frame: Frame,
        new_frame: Frame,
        overlay_key: Option<String>,
        ready: Option<ReadySignal>,
    ) -> Result<bool> {
        let (reply, accepted) = oneshot::channel();
        self.send(WindowCommand::StartTransition {
            transition,
            old_frame,
            new_frame,
            overlay_key,
            ready,
            reply,
        })?;
        accepted.await.map_err(|_| SyncError::WindowLoopClosed(self.index))
    }

    pub fn resume(&self) -> Result<()> {
        self.send(WindowCommand::Resume)
    }

    pub fn stop(&self, reason: CancelReason) -> Result<()> {
        self.send(WindowCommand::Stop(reason))
    }

    pub async fn status(&self) -> Result<WindowStatus> {
        let (reply, status) = oneshot::channel();
        self.send(WindowCommand::Status(reply))?;
        status.await.map_err(|_| SyncError::WindowLoopClosed(self.index))
    }

    /// Попросить цикл завершиться и дождаться его задачи
    pub async fn shutdown(self) -> Result<()> {
        // Цикл мог уже завершиться сам, тогда достаточно дождаться задачи
        let _ = self.commands.send(WindowCommand::Shutdown);
        self.task.await?;
        Ok(())
    }
}
