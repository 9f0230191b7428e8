//! Resilience layer
//!
//! Retry with backoff and the fallback controller that wraps every remote
//! model call.

pub mod fallback;
pub mod retry;

// Re-exports
pub use fallback::{should_substitute, FallbackController, Invocation};
pub use retry::{retry_if, with_jitter, RetryPolicy, RetryStrategy};
