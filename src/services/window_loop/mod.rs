//! Цикл окна: одна задача tokio на окно.
//!
//! Цикл владеет `TransitionSession` и последовательно обрабатывает команды
//! контроллера и события самой сессии (завершение, watchdog). Ничего, кроме
//! этой задачи, сессию не трогает.

mod handle;
mod window_loop;
mod r#trait;

pub use self::handle::{WindowCommand, WindowLoopHandle, WindowStatus};
pub use self::r#trait::WindowServiceTrait;
pub use self::window_loop::{LoopContext, WindowLoop};
