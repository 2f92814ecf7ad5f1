//! Upward notification interface.
//!
//! Every registered observer sees every notification, in registration order.
//! Notifications are only ever produced on the dispatch consumer thread.

use tokio::sync::mpsc::UnboundedSender;

use crate::transport::ConnectionState;

/// Category of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    /// Plain status, warning or error text.
    Message,
    /// Interim or final analysis result.
    AnalysisResult,
}

/// Listener for client notifications. All methods default to no-ops.
pub trait Observer: Send {
    /// Connection state changed.
    fn on_connection_state_changed(&mut self, _state: ConnectionState) {}

    /// A status or result message was produced.
    fn on_status_message(&mut self, _text: &str, _category: StatusCategory) {}

    /// Analysis started (`true`) or stopped (`false`).
    fn on_analysis_state_changed(&mut self, _analyzing: bool) {}
}

/// Owned form of a notification, for channel-based observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// See [`Observer::on_connection_state_changed`].
    ConnectionState(ConnectionState),
    /// See [`Observer::on_status_message`].
    Status {
        /// Human-readable text.
        text: String,
        /// Message or result.
        category: StatusCategory,
    },
    /// See [`Observer::on_analysis_state_changed`].
    Analysis(bool),
}

impl Observer for UnboundedSender<Notification> {
    fn on_connection_state_changed(&mut self, state: ConnectionState) {
        let _ = self.send(Notification::ConnectionState(state));
    }

    fn on_status_message(&mut self, text: &str, category: StatusCategory) {
        let _ = self.send(Notification::Status {
            text: text.to_string(),
            category,
        });
    }

    fn on_analysis_state_changed(&mut self, analyzing: bool) {
        let _ = self.send(Notification::Analysis(analyzing));
    }
}

/// Fan-out over registered observers.
#[derive(Default)]
pub struct ObserverList {
    observers: Vec<Box<dyn Observer>>,
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.observers.len())
            .finish()
    }
}

impl ObserverList {
    /// Register an observer.
    pub fn add(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub(crate) fn connection_state(&mut self, state: ConnectionState) {
        for observer in &mut self.observers {
            observer.on_connection_state_changed(state);
        }
    }

    pub(crate) fn status(&mut self, text: &str, category: StatusCategory) {
        for observer in &mut self.observers {
            observer.on_status_message(text, category);
        }
    }

    pub(crate) fn analysis(&mut self, analyzing: bool) {
        for observer in &mut self.observers {
            observer.on_analysis_state_changed(analyzing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_every_observer_sees_every_notification() {
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let mut list = ObserverList::default();
        list.add(Box::new(tx_a));
        list.add(Box::new(tx_b));
        assert_eq!(list.len(), 2);

        list.connection_state(ConnectionState::Connected);
        list.status("hello", StatusCategory::Message);
        list.analysis(true);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(
                rx.try_recv(),
                Ok(Notification::ConnectionState(ConnectionState::Connected))
            );
            assert_eq!(
                rx.try_recv(),
                Ok(Notification::Status {
                    text: "hello".to_string(),
                    category: StatusCategory::Message,
                })
            );
            assert_eq!(rx.try_recv(), Ok(Notification::Analysis(true)));
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        struct Quiet;
        impl Observer for Quiet {}

        let mut list = ObserverList::default();
        list.add(Box::new(Quiet));
        list.status("ignored", StatusCategory::AnalysisResult);
        list.analysis(false);
        assert!(!list.is_empty());
    }
}
