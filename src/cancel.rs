use tokio::sync::watch;

/// One-shot abort flag observed by every suspension point of a public
/// operation. Cloneable so a migration can hand the same signal to each
/// in-flight query.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when the signal fires. Never resolves if the handle is
    /// dropped without aborting.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn new() -> (Self, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, AbortSignal { rx })
    }

    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

#[cfg(test)]
mod test {
    use super::AbortHandle;

    #[tokio::test]
    async fn abort_should_wake_waiters() {
        let (handle, mut signal) = AbortHandle::new();
        assert!(!signal.is_aborted());
        handle.abort();
        signal.aborted().await;
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn dropped_handle_should_never_fire() {
        let (handle, mut signal) = AbortHandle::new();
        drop(handle);
        let timeout =
            tokio::time::timeout(std::time::Duration::from_millis(20), signal.aborted()).await;
        assert!(timeout.is_err());
    }
}
