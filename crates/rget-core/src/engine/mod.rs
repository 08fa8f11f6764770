//! Transfer engine
//!
//! - `retry`: attempt budget and backoff for opening a stream
//! - `throttle`: session-average bandwidth cap
//! - `transfer`: reply validation and the chunked write loop

mod retry;
mod throttle;
mod transfer;

pub use retry::{with_retry, RetryPolicy, RetryState};
pub use throttle::Throttle;
pub use transfer::{StreamOutcome, StreamResult, TransferEngine};
