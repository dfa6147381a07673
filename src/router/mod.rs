//! Priority-ordered dispatch over a pool.
//!
//! - [`retry`]: the channel x attempt loop shared by both modes
//! - [`Router::dispatch`]: blocking call, first validated response wins
//! - [`Router::dispatch_stream`]: incremental delivery with restart events
//! - [`validate`]: response predicates

mod dispatch;
pub mod retry;
mod stream;
pub mod validate;

pub use dispatch::{DispatchOptions, Dispatched, Router};
pub use retry::{format_retries_summary, retry_with_failover, AttemptRecord, RetryOutcome};
pub use stream::StreamEvent;
pub use validate::{Validator, ValidatorSpec};
