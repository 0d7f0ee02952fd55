use crate::error::Result;

/// Сервис, который живёт в собственной задаче tokio до команды остановки
#[async_trait::async_trait]
pub trait WindowServiceTrait {
    async fn run(self: Box<Self>) -> Result<()>;
}
