//! User-visible notifications (toasts).

use std::fmt;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: ToastKind,
    pub message: String,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icon = match self.kind {
            ToastKind::Info => "i",
            ToastKind::Success => "+",
            ToastKind::Warning => "!",
            ToastKind::Error => "x",
        };
        write!(f, "[{icon}] {}", self.message)
    }
}

/// Fan-out of toasts to whoever renders them. Every toast is logged too.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn success(&self, message: impl Into<String>) {
        let message = message.into();
        info!(%message, "toast");
        self.publish(ToastKind::Success, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(%message, "toast");
        self.publish(ToastKind::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "toast");
        self.publish(ToastKind::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(%message, "toast");
        self.publish(ToastKind::Error, message);
    }

    fn publish(&self, kind: ToastKind, message: String) {
        // No subscribers is fine: nobody is looking at the page.
        let _ = self.tx.send(Notification { kind, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_toasts_in_order() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        notifier.warning("Change the network to rinkeby");
        notifier.success("minted");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, ToastKind::Warning);
        assert_eq!(first.to_string(), "[!] Change the network to rinkeby");
        assert_eq!(rx.try_recv().unwrap().kind, ToastKind::Success);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        Notifier::new().error("nobody listening");
    }
}
