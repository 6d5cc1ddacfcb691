//! Send-status reporting.
//!
//! A [`DeliveryCallback`] is consumed by the first report, so a send can
//! only ever complete once. Stream links report inline on the task that
//! performed the write.

use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{ProtocolError, Result};

/// Two-outcome completion for a single send
pub trait DeliveryCallback: Send + Sized {
    fn on_success(self);

    fn on_failure(self, error: ProtocolError);

    /// Route a send result to the matching outcome
    fn complete(self, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.on_success(),
            Err(e) => self.on_failure(e),
        }
    }
}

/// Callback backed by a closure
pub struct FnCallback<F>(F);

/// Wrap a closure receiving the send outcome
pub fn callback_fn<F>(f: F) -> FnCallback<F>
where
    F: FnOnce(Result<()>) + Send,
{
    FnCallback(f)
}

impl<F> DeliveryCallback for FnCallback<F>
where
    F: FnOnce(Result<()>) + Send,
{
    fn on_success(self) {
        (self.0)(Ok(()))
    }

    fn on_failure(self, error: ProtocolError) {
        (self.0)(Err(error))
    }
}

/// Await the outcome elsewhere through the paired receiver
impl DeliveryCallback for oneshot::Sender<Result<()>> {
    fn on_success(self) {
        if self.send(Ok(())).is_err() {
            trace!("Send outcome receiver dropped");
        }
    }

    fn on_failure(self, error: ProtocolError) {
        if self.send(Err(error)).is_err() {
            trace!("Send outcome receiver dropped");
        }
    }
}
