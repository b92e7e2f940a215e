//! OS/process primitives shared by the wrapper: the tick clock, PID-file
//! handling, and thin process/env helpers. Analogous in role to
//! `habitat_core`, scoped down to what the wrapper actually needs.

pub mod env;
pub mod pidfile;
pub mod process;
pub mod tick;

pub use process::Pid;
pub use tick::{Tick, TickClock};
