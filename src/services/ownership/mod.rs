//! Арбитраж общего состояния между окнами: фокус, ореол курсора, глобальный
//! перехватчик ввода и режим взаимодействия.
//!
//! Модуль НЕ рисует и не трогает виджеты напрямую. Единственный побочный
//! эффект в сторону окна: просьба скрыть ореол у прежнего владельца.

mod coordinator;
mod registry;
mod r#trait;

pub use self::coordinator::{CoordinatorSnapshot, OwnershipCoordinator};
pub use self::r#trait::{ScreenWindow, WindowRef};
pub use self::registry::{WindowHandle, WindowRegistry};
