use tokio::sync::watch;

/// Sending half of a cancellation channel.
///
/// Cancelling is sticky: once set, every receiver observes it until it is dropped.
#[derive(Debug, Clone)]
pub struct CancelTx(watch::Sender<bool>);

impl CancelTx {
    pub fn cancel(&self) {
        // Receivers may already be gone, in which case there is nobody left to stop.
        let _ = self.0.send(true);
    }

    pub fn subscribe(&self) -> CancelRx {
        CancelRx(self.0.subscribe())
    }
}

/// Receiving half of a cancellation channel, polled by long running loops at their safe
/// points.
#[derive(Debug, Clone)]
pub struct CancelRx(watch::Receiver<bool>);

impl CancelRx {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation was requested or every sender is gone.
    pub async fn cancelled(&mut self) {
        let _ = self.0.wait_for(|cancelled| *cancelled).await;
    }
}

pub fn create_cancel_channel() -> (CancelTx, CancelRx) {
    let (tx, rx) = watch::channel(false);
    (CancelTx(tx), CancelRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_is_observed_by_every_receiver() {
        let (tx, rx) = create_cancel_channel();
        let mut other = tx.subscribe();
        assert!(!rx.is_cancelled());

        tx.cancel();
        assert!(rx.is_cancelled());
        other.cancelled().await;
        assert!(other.is_cancelled());
    }
}
