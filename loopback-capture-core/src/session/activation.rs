use std::future::{Future, IntoFuture};
use std::pin::Pin;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::models::error::CaptureError;
use crate::traits::capture_source::CaptureSource;

pub type ActivationResult = Result<Box<dyn CaptureSource>, CaptureError>;

/// Create a single-use activation promise.
///
/// The resolver goes to whoever receives the platform's completion signal;
/// the pending half is either blocked on or awaited by the requester.
pub fn activation_channel() -> (ActivationResolver, PendingActivation) {
    let (sender, receiver) = oneshot::channel();
    (ActivationResolver { sender }, PendingActivation { receiver })
}

/// Completing half of an activation promise. Consumed on resolution.
pub struct ActivationResolver {
    sender: oneshot::Sender<ActivationResult>,
}

impl ActivationResolver {
    /// Resolve the promise. Returns `false` if nobody is waiting any more.
    pub fn resolve(self, result: ActivationResult) -> bool {
        self.sender.send(result).is_ok()
    }
}

/// Waiting half of an activation promise.
///
/// Resolves to `ActivationFailed` if the resolver is dropped without being used.
pub struct PendingActivation {
    receiver: oneshot::Receiver<ActivationResult>,
}

impl PendingActivation {
    /// Block the current thread until activation completes.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> ActivationResult {
        self.receiver.blocking_recv().unwrap_or_else(|_| Err(abandoned()))
    }
}

impl IntoFuture for PendingActivation {
    type Output = ActivationResult;
    type IntoFuture = Pin<Box<dyn Future<Output = ActivationResult> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.receiver.await.unwrap_or_else(|_| Err(abandoned())) })
    }
}

fn abandoned() -> CaptureError {
    CaptureError::ActivationFailed("activation completed without a result".into())
}

/// Holds the resolver of the activation in flight for a capturer.
#[derive(Default)]
pub struct ActivationSlot {
    resolver: Mutex<Option<ActivationResolver>>,
}

impl ActivationSlot {
    /// Arm the slot for a new activation and return the pending half.
    pub fn arm(&self) -> PendingActivation {
        let (resolver, pending) = activation_channel();
        *self.resolver.lock() = Some(resolver);
        pending
    }

    /// Drop an armed resolver whose request was never issued.
    pub fn disarm(&self) {
        self.resolver.lock().take();
    }

    /// Deliver the completion signal. Completions nobody asked for are dropped.
    pub fn complete(&self, result: ActivationResult) {
        let resolver = self.resolver.lock().take();
        match resolver {
            Some(resolver) => {
                if !resolver.resolve(result) {
                    log::warn!("Activation completed after the requester gave up");
                }
            }
            None => log::warn!("Unexpected activation completion ignored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedCaptureSource;
    use std::thread;

    #[test]
    fn resolves_across_threads() {
        let (resolver, pending) = activation_channel();
        let (source, _feed) = ScriptedCaptureSource::new();
        let source: Box<dyn CaptureSource> = Box::new(source);
        let handle = thread::spawn(move || resolver.resolve(Ok(source)));
        assert!(pending.wait().is_ok());
        assert!(handle.join().unwrap());
    }

    #[test]
    fn dropped_resolver_fails_activation() {
        let (resolver, pending) = activation_channel();
        drop(resolver);
        assert!(matches!(pending.wait(), Err(CaptureError::ActivationFailed(_))));
    }

    #[test]
    fn disarmed_slot_fails_pending_activation() {
        let slot = ActivationSlot::default();
        let pending = slot.arm();
        slot.disarm();
        assert!(matches!(pending.wait(), Err(CaptureError::ActivationFailed(_))));

        // later completions are ignored
        slot.complete(Err(CaptureError::ActivationFailed("late".into())));
    }

    #[tokio::test]
    async fn pending_activation_can_be_awaited() {
        let slot = ActivationSlot::default();
        let pending = slot.arm();
        slot.complete(Err(CaptureError::ActivationFailed("denied".into())));
        let result = pending.await;
        assert_eq!(result.err(), Some(CaptureError::ActivationFailed("denied".into())));
    }
}
