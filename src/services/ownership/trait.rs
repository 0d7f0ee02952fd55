use crate::events::{DisplayInfo, LocalPoint, WindowId};
use std::sync::Arc;

/// Контракт окна, с которым работает координатор.
///
/// Все вызовы могут прийти из любого потока. Операции с виджетами (показ и
/// скрытие ореола) реализация обязана переправить в собственный цикл окна.
/// Координатор не рассчитывает на их успех.
pub trait ScreenWindow: Send + Sync {
    fn id(&self) -> WindowId;

    /// Жив ли нативный объект окна
    fn is_valid(&self) -> bool {
        true
    }

    fn is_visible(&self) -> bool;

    /// Дисплей, к которому привязано окно, вместе с его геометрией
    fn bound_display(&self) -> Option<DisplayInfo>;

    fn show_halo(&self, at: LocalPoint);

    fn hide_halo(&self);
}

pub type WindowRef = Arc<dyn ScreenWindow>;
