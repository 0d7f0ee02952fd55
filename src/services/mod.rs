pub mod barrier;
pub mod display_manager;
pub mod dry_run;
pub mod ownership;
pub mod transition;
pub mod window_loop;

pub use barrier::{ReadinessBarrier, ReadySignal};
pub use display_manager::{DisplayManager, SyncOutcome};
pub use dry_run::{DryRunTransition, DryRunWindow, TransitionStats};
pub use ownership::{OwnershipCoordinator, ScreenWindow, WindowRef};
pub use transition::{OverlayLedger, TokioTimer, Transition, TransitionSession};
pub use window_loop::{LoopContext, WindowLoop, WindowLoopHandle};
