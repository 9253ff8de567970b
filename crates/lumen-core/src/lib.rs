#![forbid(unsafe_code)]

//! Core: event loop, scheduling seam, clocks, and logging bootstrap.

pub mod clock;
pub mod event_loop;
pub mod logging;
pub mod scheduler;

pub use clock::{LabClock, TimeSource};
pub use event_loop::{LoopHandle, MainLoop};
pub use scheduler::{Scheduler, SharedScheduler, Task, TimerHandle};
