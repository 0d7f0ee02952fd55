pub mod ownership;
pub mod transition;
pub mod window;

pub use ownership::{OwnerSlot, OwnershipEvent};
pub use transition::{CancelReason, Frame, SessionEvent, TransitionNotice, TransitionState};
pub use window::{DisplayDescriptor, DisplayInfo, DisplaySignature, LocalPoint, WindowGeometry, WindowId};
