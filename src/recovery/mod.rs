//! Opt-in recovery around conversions.
//!
//! Nothing here runs unless the caller asks for it: the engine returns every
//! failure as-is, and callers compose [`with_retry`], [`with_fallback`] or a
//! [`ResilientConverter`] when they want self-healing. Validation repair
//! ([`repair_corrupted`]) is the exception; the validation pipeline applies
//! it when `EngineConfig::repair_corrupted` is set.

pub mod fallback;
pub mod repair;
pub mod resilient;
pub mod retry;

pub use fallback::{with_fallback, ConvertFn, ConvertToFn, FallbackStrategy};
pub use repair::repair_corrupted;
pub use resilient::{convert_fn, ErrorObserver, ResilientConverter};
pub use retry::{with_retry, RetryConfig, RetryHook};
