pub mod queue;
pub mod worker;

pub use queue::{is_terminal, JobQueue, RelationalJobQueue};
pub use worker::{JobHandler, Reaper, Worker, WorkerConfig};
