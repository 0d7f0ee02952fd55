use super::window::WindowId;
use std::fmt;

/// Слот эксклюзивного владения, разыгрываемый между окнами
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerSlot {
    Focus,
    Halo,
    Interceptor,
}

impl fmt::Display for OwnerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OwnerSlot::Focus => "focus",
            OwnerSlot::Halo => "halo",
            OwnerSlot::Interceptor => "interceptor",
        };
        f.write_str(name)
    }
}

/// Уведомление об изменении общего состояния координатора.
///
/// Рассылается только при фактической смене значения.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipEvent {
    CtrlHeldChanged(bool),
    ModalSuppressedChanged(bool),
    OwnerChanged {
        slot: OwnerSlot,
        previous: Option<WindowId>,
        current: Option<WindowId>,
    },
}

impl OwnershipEvent {
    pub fn owner_changed(slot: OwnerSlot, previous: Option<WindowId>, current: Option<WindowId>) -> Self {
        Self::OwnerChanged { slot, previous, current }
    }
}

impl fmt::Display for OwnershipEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnershipEvent::CtrlHeldChanged(held) => write!(f, "ctrl_held={}", held),
            OwnershipEvent::ModalSuppressedChanged(on) => write!(f, "modal_suppressed={}", on),
            OwnershipEvent::OwnerChanged { slot, previous, current } => {
                let fmt_owner = |owner: &Option<WindowId>| {
                    owner.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string())
                };
                write!(f, "{}: {} -> {}", slot, fmt_owner(previous), fmt_owner(current))
            }
        }
    }
}
