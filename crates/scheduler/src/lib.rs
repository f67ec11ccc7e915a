pub mod adaptive;
pub mod cancel;
pub mod timer;

pub use adaptive::{AdaptiveUpdateScheduler, UpdateDecision, changed_fields};
pub use cancel::CancellationToken;
pub use timer::{Timer, TimerQueue};
