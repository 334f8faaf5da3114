//! Progress reporting for a single conversion.
//!
//! Callers hand a [`ProgressSink`] to a conversion through
//! [`crate::request::ConversionOptions::progress`]. The converter base class
//! wraps it in a [`ProgressReporter`] which enforces the observable contract:
//!
//! * values are clamped to `[0.0, 1.0]`;
//! * the sequence seen by the sink is non-decreasing (late, lower values are dropped);
//! * a panicking sink never aborts the conversion.
//!
//! Every converter reports the same checkpoint curve (see [`checkpoint`]), so
//! a progress bar behaves identically no matter which format pair is running.
//!
//! # Example
//!
//! ```rust
//! use formatshift::progress::{ProgressReporter, ProgressSink};
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = {
//!     let seen = Arc::clone(&seen);
//!     move |p: f64| seen.lock().unwrap().push(p)
//! };
//! let reporter = ProgressReporter::new(Some(Arc::new(sink) as Arc<dyn ProgressSink>));
//! reporter.report(0.5);
//! reporter.report(0.3); // dropped
//! reporter.report(1.0);
//! assert_eq!(*seen.lock().unwrap(), vec![0.5, 1.0]);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// Fixed checkpoints shared by every converter.
pub mod checkpoint {
    /// Input normalised and validated.
    pub const VALIDATED: f64 = 0.1;
    /// Heavy dependencies loaded (skipped by lightweight converters).
    pub const DEPENDENCIES_READY: f64 = 0.3;
    /// Transform hook started its core work.
    pub const TRANSFORM_STARTED: f64 = 0.5;
    /// Transform hook finished its core work.
    pub const TRANSFORM_DONE: f64 = 0.7;
    /// Base class post-processing done.
    pub const POST_PROCESSED: f64 = 0.9;
    pub const COMPLETE: f64 = 1.0;
}

/// Receives progress values in `[0.0, 1.0]`.
///
/// Implementations must be cheap and must not block; they are called inline
/// on the conversion task.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(f64) + Send + Sync,
{
    fn on_progress(&self, progress: f64) {
        self(progress)
    }
}

/// A sink that ignores every value.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _progress: f64) {}
}

/// Convenience alias matching the type stored in conversion options.
pub type SharedProgress = Arc<dyn ProgressSink>;

/// Per-call wrapper around an optional sink.
pub struct ProgressReporter {
    sink: Option<SharedProgress>,
    /// Bit pattern of the last emitted value; starts below zero.
    last: AtomicU64,
}

impl ProgressReporter {
    pub fn new(sink: Option<SharedProgress>) -> Self {
        Self {
            sink,
            last: AtomicU64::new((-1.0f64).to_bits()),
        }
    }

    pub fn silent() -> Self {
        Self::new(None)
    }

    /// Report `progress`. Returns `true` when the value was forwarded.
    pub fn report(&self, progress: f64) -> bool {
        if progress.is_nan() {
            return false;
        }
        let value = progress.clamp(0.0, 1.0);
        let accepted = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                (value >= f64::from_bits(bits)).then_some(value.to_bits())
            })
            .is_ok();
        if !accepted {
            return false;
        }
        if let Some(sink) = &self.sink {
            if catch_unwind(AssertUnwindSafe(|| sink.on_progress(value))).is_err() {
                debug!("progress sink panicked at {value:.2}; ignoring");
            }
        }
        true
    }

    /// Last value forwarded, or `None` before the first report.
    pub fn last(&self) -> Option<f64> {
        let v = f64::from_bits(self.last.load(Ordering::SeqCst));
        (v >= 0.0).then_some(v)
    }
}

/// A reporter can itself be handed to a conversion as its sink, which keeps
/// one non-decreasing sequence across several attempts.
impl ProgressSink for ProgressReporter {
    fn on_progress(&self, progress: f64) {
        self.report(progress);
    }
}

/// Sink forwarding every value into an unbounded tokio channel, consumable as
/// a [`futures::Stream`].
#[derive(Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<f64>,
}

impl ChannelProgress {
    pub fn new() -> (Self, UnboundedReceiverStream<f64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }
}

impl ProgressSink for ChannelProgress {
    fn on_progress(&self, progress: f64) {
        // Receiver dropped: nobody is listening any more.
        let _ = self.tx.send(progress);
    }
}
