mod broadcaster;
mod coordinator;
pub mod errors;
mod job;
mod status;
pub mod types;

pub use broadcaster::{Broadcaster, OutputReceiver, SUBSCRIBER_QUEUE_CAPACITY};
pub use coordinator::JobCoordinator;
pub use job::Job;
pub use status::{JobStatus, StatusCode};
pub use tokio_util::sync::CancellationToken;
