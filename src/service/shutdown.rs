use tokio::sync::watch;

/// Create a linked trigger/signal pair. The signal starts un-triggered.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Owner side of the shutdown signal, held by the process entry point.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown. Idempotent; succeeds even if no signal is listening.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side, cloned into every task that must stop on shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    ///
    /// A dropped trigger is not a shutdown request: the future then never
    /// resolves, so it is safe to race against real work in `select!`.
    pub async fn triggered(&mut self) {
        let trigger_dropped = self.rx.wait_for(|stop| *stop).await.is_err();
        if trigger_dropped {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_all_clones() {
        let (trigger, signal) = shutdown_channel();
        let mut a = signal.clone();
        let mut b = signal.clone();
        assert!(!signal.is_triggered());

        trigger.trigger();

        a.triggered().await;
        b.triggered().await;
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_signal_cloned_after_trigger_sees_it() {
        let (trigger, signal) = shutdown_channel();
        trigger.trigger();
        trigger.trigger(); // idempotent

        let mut late = signal.clone();
        late.triggered().await;
        assert!(late.is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_trigger_is_not_shutdown() {
        let (trigger, mut signal) = shutdown_channel();
        drop(trigger);

        let waited = tokio::time::timeout(Duration::from_millis(50), signal.triggered()).await;
        assert!(waited.is_err(), "dropping the trigger must not request shutdown");
        assert!(!signal.is_triggered());
    }
}
