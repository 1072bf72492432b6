//! Queue module: the queue manager facade and retry policy.

mod manager;
mod retry;

pub use manager::{QueueManager, RequeueOptions};
pub use retry::RetryPolicy;
