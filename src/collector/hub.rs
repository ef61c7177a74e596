//! Channel-backed signal hub.
//!
//! Producers (stdin readers, platform input hooks, tests) push signals
//! through a [`SignalSender`]; the consumer loop drains the hub and forwards
//! each signal to the idle monitor. While the hub is stopped, pushed signals
//! are discarded.

use crate::collector::types::{ActivitySignal, TimedSignal};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Channel capacity; producers drop signals once it is full.
const CHANNEL_CAPACITY: usize = 10_000;

/// Errors that can occur while operating the hub.
#[derive(Debug)]
pub enum HubError {
    AlreadyRunning,
    Disconnected,
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::AlreadyRunning => write!(f, "Signal hub is already running"),
            HubError::Disconnected => write!(f, "Signal hub disconnected"),
        }
    }
}

impl std::error::Error for HubError {}

/// Cloneable producer handle.
#[derive(Debug, Clone)]
pub struct SignalSender {
    sender: Sender<TimedSignal>,
    running: Arc<AtomicBool>,
}

impl SignalSender {
    /// Push a signal. Returns `false` if it was dropped (hub stopped or full).
    pub fn send(&self, signal: ActivitySignal) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.sender.try_send(TimedSignal::new(signal)).is_ok()
    }
}

/// Receives activity signals from any number of producers.
pub struct SignalHub {
    sender: Sender<TimedSignal>,
    receiver: Receiver<TimedSignal>,
    running: Arc<AtomicBool>,
}

impl SignalHub {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(CHANNEL_CAPACITY);
        Self {
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start accepting signals.
    pub fn start(&mut self) -> Result<(), HubError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(HubError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop accepting signals and drop anything still queued.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        while self.receiver.try_recv().is_ok() {}
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Producer handle for this hub.
    pub fn sender(&self) -> SignalSender {
        SignalSender {
            sender: self.sender.clone(),
            running: self.running.clone(),
        }
    }

    /// Try to receive a signal without blocking.
    pub fn try_recv(&self) -> Option<TimedSignal> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next signal.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<TimedSignal>, HubError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(signal) => Ok(Some(signal)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(HubError::Disconnected),
        }
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_flow_while_running() {
        let mut hub = SignalHub::new();
        let sender = hub.sender();

        assert!(!sender.send(ActivitySignal::KeyDown));
        assert!(hub.try_recv().is_none());

        hub.start().unwrap();
        assert!(sender.send(ActivitySignal::KeyDown));
        assert!(sender.send(ActivitySignal::VisibilityChange { hidden: true }));

        assert_eq!(hub.try_recv().unwrap().signal, ActivitySignal::KeyDown);
        let next = hub.recv_timeout(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(next.signal, ActivitySignal::VisibilityChange { hidden: true });
        assert!(hub.recv_timeout(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_double_start_rejected() {
        let mut hub = SignalHub::new();
        hub.start().unwrap();
        assert!(matches!(hub.start(), Err(HubError::AlreadyRunning)));
    }

    #[test]
    fn test_stop_discards_queued_signals() {
        let mut hub = SignalHub::new();
        let sender = hub.sender();
        hub.start().unwrap();
        sender.send(ActivitySignal::Scroll);

        hub.stop();
        assert!(!hub.is_running());
        assert!(hub.try_recv().is_none());
    }

    #[test]
    fn test_producers_on_other_threads() {
        let mut hub = SignalHub::new();
        hub.start().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sender = hub.sender();
                std::thread::spawn(move || sender.send(ActivitySignal::PointerMove))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        let mut received = 0;
        while hub.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, 4);
    }
}
