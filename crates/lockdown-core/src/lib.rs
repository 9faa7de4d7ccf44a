//! lockdown-core: exam-lockdown suppression engine
//!
//! # Components
//! - keyboard and pointer layers: low-level input hooks that swallow
//!   configured key combinations and mouse buttons, with a reserved admin
//!   combination that is never blocked.
//! - window guard: removes minimize/maximize/close from exam windows and
//!   restores the original styles on stop.
//! - network suppressor: appends a marker-delimited blackhole section to the
//!   hosts file and restores it byte-for-byte afterwards.
//! - process monitor: terminates deny-listed executables.
//!
//! [`Lockdown`] owns one of each and drives them together.

pub mod activity;
pub mod error;
pub mod input;
pub mod journal;
pub mod metrics;
pub mod network;
pub mod orchestrator;
pub mod paths;
pub mod platform;
pub mod policy;
pub mod process;
pub mod settings;
pub mod storage;
pub mod window;
pub mod worker;

pub use activity::{ActivityLogger, FanoutLogger, NoopActivityLogger, TracingActivityLogger};
pub use error::{LockdownError, ProcessError, Result};
pub use journal::{ActivityJournal, JournalSink};
pub use orchestrator::{
    Backends, Category, Lockdown, LockdownStatus, Selection, StartReport, StopReport,
};
pub use policy::{KeyCombo, KeyboardPolicy, PointerButton, PointerPolicy};
pub use settings::LockdownSettings;
