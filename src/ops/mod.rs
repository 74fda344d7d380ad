pub mod archive;
pub mod check;
pub mod reconcile;
pub mod retention;
pub mod task;
pub mod views;

pub use reconcile::{Engine, EngineError, ReconcileReport, TickReport};
pub use task::{MovePosition, Task, TaskError};
