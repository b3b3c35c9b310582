//! Inactivity timeout.
//!
//! [`IdleWatch`] resolves once no activity signal has arrived for the
//! configured timeout. The embedding layer forwards whatever it considers
//! activity (key presses, pointer events, sent messages) through the
//! [`ActivityHandle`]; every signal restarts the countdown.

use std::time::Duration;

use tokio::sync::mpsc;

/// Sender half: call [`touch`](Self::touch) on user activity.
#[derive(Debug, Clone)]
pub struct ActivityHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ActivityHandle {
    /// Restart the idle countdown. Cheap and infallible; signals after the
    /// watch has expired are simply dropped.
    pub fn touch(&self) {
        let _ = self.tx.send(());
    }
}

/// The waiting half of the inactivity timer.
pub struct IdleWatch {
    timeout: Duration,
    rx: mpsc::UnboundedReceiver<()>,
}

impl IdleWatch {
    pub fn new(timeout: Duration) -> (ActivityHandle, IdleWatch) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ActivityHandle { tx }, IdleWatch { timeout, rx })
    }

    /// Resolve once `timeout` elapses with no activity.
    ///
    /// When every [`ActivityHandle`] has been dropped, no further resets
    /// are possible and the watch expires after one final timeout.
    pub async fn expired(mut self) {
        loop {
            match tokio::time::timeout(self.timeout, self.rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => {
                    tokio::time::sleep(self.timeout).await;
                    return;
                }
                Err(_) => return,
            }
        }
    }
}
