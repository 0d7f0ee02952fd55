use super::r#trait::{ScreenWindow, WindowRef};
use crate::debug_if_enabled;
use crate::events::{DisplaySignature, WindowId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Невладеющая ссылка на окно.
///
/// Не продлевает жизнь окна. Считается устаревшей, если окно уже уничтожено
/// или сообщает о невалидности.
#[derive(Clone)]
pub struct WindowHandle {
    window: Weak<dyn ScreenWindow>,
    id: WindowId,
    addr: usize,
}

impl WindowHandle {
    pub fn new(window: &WindowRef) -> Self {
        Self {
            window: Arc::downgrade(window),
            id: window.id(),
            addr: Self::addr_of(window),
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    /// Получить живое окно или `None` для устаревшей ссылки
    pub fn resolve(&self) -> Option<WindowRef> {
        self.window.upgrade().filter(|window| window.is_valid())
    }

    pub fn is_stale(&self) -> bool {
        self.resolve().is_none()
    }

    /// Указывает ли ссылка на тот же экземпляр окна
    pub fn refers_to(&self, window: &WindowRef) -> bool {
        self.id == window.id() && self.addr == Self::addr_of(window)
    }

    pub fn same_as(&self, other: &WindowHandle) -> bool {
        self.id == other.id && self.addr == other.addr
    }

    fn addr_of(window: &WindowRef) -> usize {
        Arc::as_ptr(window) as *const () as usize
    }
}

impl std::fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowHandle")
            .field("id", &self.id)
            .field("stale", &self.is_stale())
            .finish()
    }
}

/// Соответствие "подпись дисплея -> окно, привязанное к нему сейчас".
///
/// Хранит только слабые ссылки; мёртвые записи вычищаются лениво при чтении.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    entries: HashMap<DisplaySignature, WindowHandle>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Зарегистрировать окно; возвращает вытесненную запись, если она была
    pub fn register(&mut self, signature: DisplaySignature, window: &WindowRef) -> Option<WindowHandle> {
        self.entries.insert(signature, WindowHandle::new(window))
    }

    /// Удалить запись, только если она всё ещё указывает на `window`
    pub fn unregister(&mut self, signature: &DisplaySignature, window: &WindowRef) -> bool {
        match self.entries.get(signature) {
            Some(handle) if handle.refers_to(window) => {
                self.entries.remove(signature);
                true
            }
            _ => false,
        }
    }

    /// Запись как есть, без проверки живости
    pub fn get(&self, signature: &DisplaySignature) -> Option<&WindowHandle> {
        self.entries.get(signature)
    }

    /// Копия всех записей, чтобы проверить живость без доступа к реестру
    pub fn handles(&self) -> Vec<(DisplaySignature, WindowHandle)> {
        self.entries
            .iter()
            .map(|(signature, handle)| (signature.clone(), handle.clone()))
            .collect()
    }

    /// Удалить устаревшую запись, если её ещё не заменили другим окном
    pub fn prune(&mut self, signature: &DisplaySignature, handle: &WindowHandle) -> bool {
        match self.entries.get(signature) {
            Some(current) if current.same_as(handle) => {
                debug_if_enabled!("Удаляем устаревшую запись реестра для дисплея {}", signature);
                self.entries.remove(signature);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWindow;

    #[test]
    fn test_handle_does_not_keep_window_alive() {
        let window = FakeWindow::on_display("DP-1");
        let handle = WindowHandle::new(&window);
        assert!(handle.resolve().is_some());

        drop(window);
        assert!(handle.is_stale());
    }

    #[test]
    fn test_handle_treats_invalid_window_as_stale() {
        let fake = FakeWindow::new("DP-1");
        let window: WindowRef = fake.clone();
        let handle = WindowHandle::new(&window);

        fake.set_valid(false);
        assert!(handle.resolve().is_none());
    }

    #[test]
    fn test_prune_removes_only_the_stale_entry() {
        let mut registry = WindowRegistry::new();
        let window = FakeWindow::on_display("DP-1");
        registry.register("DP-1".into(), &window);
        let stale = registry.get(&"DP-1".into()).cloned().unwrap();
        drop(window);
        assert!(stale.is_stale());

        // Запись уже заменена новым окном: старый дескриптор её не удаляет
        let replacement = FakeWindow::on_display("DP-1");
        registry.register("DP-1".into(), &replacement);
        assert!(!registry.prune(&"DP-1".into(), &stale));
        assert_eq!(registry.handles().len(), 1);

        let current = registry.get(&"DP-1".into()).cloned().unwrap();
        drop(replacement);
        assert!(registry.prune(&"DP-1".into(), &current));
        assert!(registry.handles().is_empty());
    }

    #[test]
    fn test_stale_unregister_keeps_newer_registration() {
        let mut registry = WindowRegistry::new();
        let old = FakeWindow::on_display("HDMI-1");
        let new = FakeWindow::on_display("HDMI-1");

        registry.register("HDMI-1".into(), &old);
        registry.register("HDMI-1".into(), &new);

        assert!(!registry.unregister(&"HDMI-1".into(), &old));
        assert!(registry.get(&"HDMI-1".into()).unwrap().refers_to(&new));

        assert!(registry.unregister(&"HDMI-1".into(), &new));
        assert!(registry.handles().is_empty());
    }

    #[test]
    fn test_handles_snapshot_entries() {
        let mut registry = WindowRegistry::new();
        let a = FakeWindow::on_display("DP-1");
        let b = FakeWindow::on_display("DP-2");
        registry.register("DP-1".into(), &a);
        registry.register("DP-2".into(), &b);

        drop(a);
        let mut handles = registry.handles();
        handles.sort_by(|x, y| x.0.cmp(&y.0));
        assert_eq!(handles.len(), 2);
        assert!(handles[0].1.is_stale());
        assert!(handles[1].1.refers_to(&b));
    }
}
