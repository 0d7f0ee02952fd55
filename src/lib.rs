//! Координация полноэкранных окон на нескольких дисплеях.
//!
//! Окна одной логической сессии делят фокус, ореол курсора и глобальный
//! перехватчик ввода через `OwnershipCoordinator`; переходы между кадрами
//! живут в `TransitionSession` каждого окна, а синхронный старт на всех
//! дисплеях обеспечивает `ReadinessBarrier`.

pub mod config;
pub mod error;
pub mod events;
pub mod services;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Result, SyncError};
