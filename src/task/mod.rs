//! Tasks: definitions, resumable steps, and the per-task state machine

mod builtin;
mod definition;
mod instance;
mod state;

pub use builtin::{FnTask, WaitTask};
pub use definition::{StepContext, StepResult, TaskDefinition, TaskStep};
pub use instance::{ActivationSpec, StepDisposition, StepJob, TaskInstance, TickAction};
pub use state::{TaskOutcome, TaskState};
