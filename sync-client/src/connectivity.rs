//! Connectivity signal.
//!
//! Connectivity detection is external: the host application owns a
//! [`ConnectivityHandle`] and reports transitions; the engine only consumes
//! a [`Connectivity`] watch. Both wrap a `tokio::sync::watch<bool>`.

use tokio::sync::watch;

/// Producer side of the connectivity signal, owned by the host.
#[derive(Debug)]
pub struct ConnectivityHandle {
    tx: watch::Sender<bool>,
}

/// Consumer side of the connectivity signal.
#[derive(Debug, Clone)]
pub struct Connectivity {
    rx: watch::Receiver<bool>,
}

/// Create a connectivity signal with an initial state.
pub fn connectivity(online: bool) -> (ConnectivityHandle, Connectivity) {
    let (tx, rx) = watch::channel(online);
    (ConnectivityHandle { tx }, Connectivity { rx })
}

impl ConnectivityHandle {
    /// Report the current connectivity. Repeated values are not re-notified.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Last reported state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another consumer of this signal.
    pub fn subscribe(&self) -> Connectivity {
        Connectivity {
            rx: self.tx.subscribe(),
        }
    }
}

impl Connectivity {
    /// A signal that never changes. Useful for tools that run one drain.
    pub fn fixed(online: bool) -> Self {
        let (_, rx) = watch::channel(online);
        Self { rx }
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next transition and return the new state.
    ///
    /// Never resolves once the producer is gone.
    pub async fn changed(&mut self) -> bool {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        *self.rx.borrow_and_update()
    }

    /// Resolve once connected.
    pub async fn wait_online(&mut self) {
        self.wait_for(true).await
    }

    /// Resolve once disconnected.
    pub async fn wait_offline(&mut self) {
        self.wait_for(false).await
    }

    async fn wait_for(&mut self, online: bool) {
        loop {
            if *self.rx.borrow_and_update() == online {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Producer dropped while in the other state: the state is final
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn reports_initial_state() {
        let (handle, watch) = connectivity(false);
        assert!(!handle.is_online());
        assert!(!watch.is_online());
    }

    #[tokio::test]
    async fn changed_observes_transition() {
        let (handle, mut watch) = connectivity(false);
        handle.set_online(true);

        let state = timeout(Duration::from_millis(100), watch.changed())
            .await
            .unwrap();
        assert!(state);
    }

    #[tokio::test]
    async fn repeated_state_is_not_renotified() {
        let (handle, mut watch) = connectivity(true);
        handle.set_online(true);

        let result = timeout(Duration::from_millis(20), watch.changed()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn wait_online_resolves_immediately_when_online() {
        let (_handle, mut watch) = connectivity(true);
        timeout(Duration::from_millis(50), watch.wait_online())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_offline_resolves_on_disconnect() {
        let (handle, mut watch) = connectivity(true);

        let waiter = tokio::spawn(async move { watch.wait_offline().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.set_online(false);

        timeout(Duration::from_millis(100), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn fixed_signal_never_goes_offline() {
        let mut watch = Connectivity::fixed(true);
        assert!(watch.is_online());

        let result = timeout(Duration::from_millis(20), watch.wait_offline()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn subscribers_share_state() {
        let (handle, _watch) = connectivity(false);
        let other = handle.subscribe();
        handle.set_online(true);
        assert!(other.is_online());
    }
}
