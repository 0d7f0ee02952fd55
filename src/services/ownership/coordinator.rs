use super::r#trait::WindowRef;
use super::registry::{WindowHandle, WindowRegistry};
use crate::debug_if_enabled;
use crate::events::{DisplaySignature, OwnerSlot, OwnershipEvent, WindowId};
use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::broadcast;
use tracing::{info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

type EventBatch = SmallVec<[OwnershipEvent; 2]>;

/// Общее состояние, разделяемое всеми окнами сессии
#[derive(Debug, Default)]
struct CoordinatorState {
    ctrl_held: bool,
    halo_owner: Option<WindowHandle>,
    focus_owner: Option<WindowHandle>,
    interceptor_owner: Option<WindowHandle>,
    modal_suppressed: bool,
    registry: WindowRegistry,
}

impl CoordinatorState {
    fn slot(&self, slot: OwnerSlot) -> &Option<WindowHandle> {
        match slot {
            OwnerSlot::Focus => &self.focus_owner,
            OwnerSlot::Halo => &self.halo_owner,
            OwnerSlot::Interceptor => &self.interceptor_owner,
        }
    }

    fn slot_mut(&mut self, slot: OwnerSlot) -> &mut Option<WindowHandle> {
        match slot {
            OwnerSlot::Focus => &mut self.focus_owner,
            OwnerSlot::Halo => &mut self.halo_owner,
            OwnerSlot::Interceptor => &mut self.interceptor_owner,
        }
    }
}

/// Снимок состояния координатора для диагностики и тестов.
///
/// Устаревшие владельцы показаны как `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    pub ctrl_held: bool,
    pub modal_suppressed: bool,
    pub halo_owner: Option<WindowId>,
    pub focus_owner: Option<WindowId>,
    pub interceptor_owner: Option<WindowId>,
    pub registered: usize,
}

/// Арбитр эксклюзивного владения фокусом, ореолом курсора и глобальным
/// перехватчиком ввода между окнами разных дисплеев.
///
/// Создаётся один раз при старте приложения и передаётся окнам через `Arc`.
/// Мьютекс удерживается только на время чтения/записи состояния; методы
/// окон вызываются после его освобождения.
pub struct OwnershipCoordinator {
    state: Mutex<CoordinatorState>,
    events: broadcast::Sender<OwnershipEvent>,
}

impl Default for OwnershipCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnershipCoordinator {
    pub fn new() -> Self {
        info!("Инициализация OwnershipCoordinator");
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(CoordinatorState::default()),
            events,
        }
    }

    /// Подписка на уведомления об изменениях
    pub fn subscribe(&self) -> broadcast::Receiver<OwnershipEvent> {
        self.events.subscribe()
    }

    // ---- фокус ----

    pub fn claim_focus(&self, window: &WindowRef) -> bool {
        self.claim_slot(OwnerSlot::Focus, window)
    }

    pub fn release_focus(&self, window: &WindowRef) {
        self.release_slot(OwnerSlot::Focus, window);
    }

    pub fn focus_owner(&self) -> Option<WindowRef> {
        self.owner_of(OwnerSlot::Focus)
    }

    // ---- перехватчик ввода ----

    pub fn install_interceptor(&self, window: &WindowRef) -> bool {
        self.claim_slot(OwnerSlot::Interceptor, window)
    }

    pub fn uninstall_interceptor(&self, window: &WindowRef) {
        self.release_slot(OwnerSlot::Interceptor, window);
    }

    pub fn interceptor_owner(&self) -> Option<WindowRef> {
        self.owner_of(OwnerSlot::Interceptor)
    }

    // ---- режим взаимодействия ----

    pub fn set_ctrl_held(&self, held: bool) {
        let changed = {
            let mut state = self.state.lock();
            let effective = held && !state.modal_suppressed;
            if held && !effective {
                debug_if_enabled!("ctrl_held подавлен модальным режимом");
            }
            let changed = state.ctrl_held != effective;
            state.ctrl_held = effective;
            changed.then_some(effective)
        };

        if let Some(effective) = changed {
            debug_if_enabled!("ctrl_held -> {}", effective);
            self.emit(OwnershipEvent::CtrlHeldChanged(effective));
        }
    }

    pub fn ctrl_held(&self) -> bool {
        self.state.lock().ctrl_held
    }

    pub fn set_modal_suppressed(&self, suppressed: bool) {
        let mut events = EventBatch::new();

        let previous_halo = {
            let mut state = self.state.lock();
            if state.modal_suppressed != suppressed {
                events.push(OwnershipEvent::ModalSuppressedChanged(suppressed));
            }
            state.modal_suppressed = suppressed;

            if suppressed {
                if state.ctrl_held {
                    state.ctrl_held = false;
                    events.push(OwnershipEvent::CtrlHeldChanged(false));
                }
                let previous = state.halo_owner.take();
                if let Some(handle) = &previous {
                    events.push(OwnershipEvent::owner_changed(OwnerSlot::Halo, Some(handle.id()), None));
                }
                previous
            } else {
                None
            }
        };

        info!("Модальное подавление: {}", suppressed);

        if let Some(window) = previous_halo.and_then(|handle| handle.resolve()) {
            window.hide_halo();
        }
        self.emit_all(events);
    }

    pub fn modal_suppressed(&self) -> bool {
        self.state.lock().modal_suppressed
    }

    // ---- ореол курсора ----

    /// Назначить владельца ореола; отказ во время модального подавления
    pub fn set_halo_owner(&self, window: &WindowRef) -> bool {
        let event = {
            let mut state = self.state.lock();
            if state.modal_suppressed {
                debug_if_enabled!("Ореол для {} отклонён: модальное подавление", window.id());
                return false;
            }
            Self::replace_owner(&mut state, OwnerSlot::Halo, window)
        };

        if let Some(event) = event {
            self.emit(event);
        }
        true
    }

    /// Снять владельца ореола; вызывающий скрывает индикатор у возвращённого окна
    pub fn clear_halo_owner(&self) -> Option<WindowRef> {
        let previous = self.state.lock().halo_owner.take();
        let handle = previous?;

        self.emit(OwnershipEvent::owner_changed(OwnerSlot::Halo, Some(handle.id()), None));
        handle.resolve()
    }

    pub fn halo_owner(&self) -> Option<WindowRef> {
        self.owner_of(OwnerSlot::Halo)
    }

    /// Перенести ореол на окно дисплея, где сейчас находится указатель
    pub fn migrate_halo_owner_for_screen(&self, signature: &DisplaySignature) -> bool {
        if self.modal_suppressed() {
            return false;
        }

        let Some(target) = self.instance_for(signature) else {
            debug_if_enabled!("Для дисплея {} нет зарегистрированного окна", signature);
            return false;
        };

        let (previous, event) = {
            let mut state = self.state.lock();
            if state.modal_suppressed {
                return false;
            }
            // Реестр мог измениться, пока окно проверялось без мьютекса
            if !state
                .registry
                .get(signature)
                .is_some_and(|handle| handle.refers_to(&target))
            {
                return false;
            }
            if state
                .halo_owner
                .as_ref()
                .is_some_and(|owner| owner.refers_to(&target))
            {
                return false;
            }

            let previous = state.halo_owner.clone();
            let event = Self::replace_owner(&mut state, OwnerSlot::Halo, &target);
            (previous, event)
        };
        drop(target);

        debug_if_enabled!("Ореол перенесён на дисплей {}", signature);

        // Скрыть, но не уничтожать индикатор прежнего владельца
        if let Some(window) = previous.and_then(|handle| handle.resolve()) {
            window.hide_halo();
        }
        if let Some(event) = event {
            self.emit(event);
        }
        true
    }

    // ---- реестр экземпляров ----

    pub fn register_instance(&self, window: &WindowRef, signature: DisplaySignature) {
        let displaced = self.state.lock().registry.register(signature.clone(), window);

        match displaced {
            Some(old) if !old.refers_to(window) => {
                info!("Дисплей {}: окно {} заменено на {}", signature, old.id(), window.id())
            }
            _ => info!("Окно {} зарегистрировано для дисплея {}", window.id(), signature),
        }
    }

    pub fn unregister_instance(&self, window: &WindowRef, signature: &DisplaySignature) -> bool {
        let removed = self.state.lock().registry.unregister(signature, window);
        if removed {
            info!("Окно {} снято с регистрации для дисплея {}", window.id(), signature);
        } else {
            debug_if_enabled!(
                "Запрос снятия регистрации {} для {} проигнорирован: запись принадлежит другому окну",
                window.id(),
                signature
            );
        }
        removed
    }

    pub fn instance_for(&self, signature: &DisplaySignature) -> Option<WindowRef> {
        let handle = self.state.lock().registry.get(signature).cloned()?;
        match handle.resolve() {
            Some(window) => Some(window),
            None => {
                self.state.lock().registry.prune(signature, &handle);
                None
            }
        }
    }

    /// Все живые окна; мёртвые записи вычищаются попутно
    pub fn all_instances(&self) -> Vec<WindowRef> {
        let handles = self.state.lock().registry.handles();

        let mut alive = Vec::with_capacity(handles.len());
        let mut stale = Vec::new();
        for (signature, handle) in handles {
            match handle.resolve() {
                Some(window) => alive.push(window),
                None => stale.push((signature, handle)),
            }
        }

        if !stale.is_empty() {
            let mut state = self.state.lock();
            for (signature, handle) in &stale {
                state.registry.prune(signature, handle);
            }
        }

        alive.sort_by_key(|window| window.id());
        alive
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let (ctrl_held, modal_suppressed, halo, focus, interceptor, handles) = {
            let state = self.state.lock();
            (
                state.ctrl_held,
                state.modal_suppressed,
                state.halo_owner.clone(),
                state.focus_owner.clone(),
                state.interceptor_owner.clone(),
                state.registry.handles(),
            )
        };

        // Проверка живости вне мьютекса; снимок ничего не вычищает
        let registered = handles.iter().filter(|(_, handle)| !handle.is_stale()).count();
        let live_id = |handle: Option<WindowHandle>| handle.filter(|h| !h.is_stale()).map(|h| h.id());

        CoordinatorSnapshot {
            ctrl_held,
            modal_suppressed,
            halo_owner: live_id(halo),
            focus_owner: live_id(focus),
            interceptor_owner: live_id(interceptor),
            registered,
        }
    }

    /// Сбросить всё состояние. Только для изоляции тестов.
    pub fn reset(&self) {
        warn!("Сброс состояния OwnershipCoordinator");
        *self.state.lock() = CoordinatorState::default();
    }

    // ---- арбитраж ----

    /// Первый захват выигрывает; текущий владелец уступает, если стал непригоден
    fn claim_slot(&self, slot: OwnerSlot, window: &WindowRef) -> bool {
        loop {
            let current = self.state.lock().slot(slot).clone();

            let expected = match current {
                None => None,
                Some(owner) if owner.refers_to(window) => return true,
                Some(owner) => {
                    // Проверка пригодности без удержания мьютекса
                    if Self::owner_is_usable(&owner) {
                        debug_if_enabled!("{}: {} отказано, владелец {} активен", slot, window.id(), owner.id());
                        return false;
                    }
                    Some(owner)
                }
            };

            let event = {
                let mut state = self.state.lock();
                let unchanged = match (state.slot(slot), &expected) {
                    (None, None) => true,
                    (Some(actual), Some(expected)) => actual.same_as(expected),
                    _ => false,
                };
                if !unchanged {
                    // Кто-то успел изменить слот, повторяем арбитраж
                    continue;
                }
                Self::replace_owner(&mut state, slot, window)
            };

            match &expected {
                Some(previous) => info!("{}: {} уступает {}", slot, previous.id(), window.id()),
                None => info!("{}: владелец {}", slot, window.id()),
            }
            if let Some(event) = event {
                self.emit(event);
            }
            return true;
        }
    }

    fn release_slot(&self, slot: OwnerSlot, window: &WindowRef) {
        let released = {
            let mut state = self.state.lock();
            let owner = state.slot_mut(slot);
            if owner.as_ref().is_some_and(|handle| handle.refers_to(window)) {
                owner.take()
            } else {
                None
            }
        };

        match released {
            Some(handle) => {
                info!("{}: {} освобождает владение", slot, handle.id());
                self.emit(OwnershipEvent::owner_changed(slot, Some(handle.id()), None));
            }
            None => debug_if_enabled!("{}: освобождение от {} проигнорировано, он не владелец", slot, window.id()),
        }
    }

    fn owner_of(&self, slot: OwnerSlot) -> Option<WindowRef> {
        let handle = self.state.lock().slot(slot).clone();
        handle.and_then(|handle| handle.resolve())
    }

    /// Условия уступки: окно мертво, скрыто, не привязано к дисплею или
    /// дисплей имеет нулевую геометрию
    fn owner_is_usable(owner: &WindowHandle) -> bool {
        let Some(window) = owner.resolve() else {
            return false;
        };
        if !window.is_visible() {
            return false;
        }
        match window.bound_display() {
            Some(display) => display.geometry.is_valid(),
            None => false,
        }
    }

    fn replace_owner(state: &mut CoordinatorState, slot: OwnerSlot, window: &WindowRef) -> Option<OwnershipEvent> {
        let owner = state.slot_mut(slot);
        let previous = owner.replace(WindowHandle::new(window));
        let previous_id = previous.map(|handle| handle.id());
        (previous_id != Some(window.id()))
            .then(|| OwnershipEvent::owner_changed(slot, previous_id, Some(window.id())))
    }

    fn emit(&self, event: OwnershipEvent) {
        // Отсутствие подписчиков не ошибка
        let _ = self.events.send(event);
    }

    fn emit_all(&self, events: EventBatch) {
        for event in events {
            self.emit(event);
        }
    }
}
