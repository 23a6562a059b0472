// [libs/domain/models/src/lib.rs]
//! Domain types shared by every component of the lab lifecycle engine.
//! No I/O lives here: this crate is pure data plus the state-machine
//! transition table, so it can be depended on by both the engine and its
//! runtimes without pulling in tokio, libsql, or any transport crate.

pub mod intent;
pub mod recipe;
pub mod lab;
pub mod evidence;
pub mod cause;

pub use cause::{Cause, ErrorClass};
pub use evidence::{EvidenceBundle, EvidenceFile, ContainerRecord, Trust};
pub use intent::{Intent, Severity};
pub use lab::{Lab, LabStatus, RuntimeKind};
pub use recipe::{Recipe, ReviewState};
