use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Цикл окна #{0} недоступен")]
    WindowLoopClosed(usize),

    #[error("Фоновая задача завершилась аварийно: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Окно не найдено: {0}")]
    WindowNotFound(String),
}

impl SyncError {
    pub fn window_not_found<T>(msg: impl Into<String>) -> Result<T> {
        let msg: String = msg.into();
        Err(crate::sync_error!(window_not_found, "{}", msg))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! sync_error {
    (window_not_found, $($arg:tt)*) => {
        $crate::error::SyncError::WindowNotFound(format!($($arg)*))
    };
}
