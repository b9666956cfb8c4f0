mod device;
mod error;
mod task;
mod wire;

pub use device::Device;
pub use error::{ModelError, Result};
pub use task::{NewTask, Params, Task, TaskId, TaskStatus};

/// Delimiter the coordinator uses for predecessor id lists on the wire.
pub const PREDECESSOR_DELIMITER: char = ',';
