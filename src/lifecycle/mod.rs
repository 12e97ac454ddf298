//! Stop signal, operator control channel and shutdown sequencing

pub mod console;
pub mod coordinator;
pub mod stop;
pub mod throttle;

pub use console::{parse_command, ConsoleCommand};
pub use coordinator::{run_hook, shutdown_signal, Coordinator};
pub use stop::StopSignal;
pub use throttle::{read_throttle, ThrottleFile, ThrottlePersister};

/// Redraw delay in seconds used when nothing was persisted
pub const DEFAULT_THROTTLE_DELAY: f64 = 5.0;
