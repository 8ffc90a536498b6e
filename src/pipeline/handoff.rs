//! Worker → coordinator event handoff
//!
//! A worker sends a [`Handoff`] down an unbounded channel and blocks until the
//! coordinator has processed it. The acknowledgement is a one-shot channel
//! whose sender lives inside the handoff; it fires when the handoff is
//! dropped, so a coordinator that discards an event still releases the worker.

use crate::types::{JobEvent, JobId};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

/// One event in flight from a worker
#[derive(Debug)]
pub struct Handoff {
    pub job: JobId,
    pub event: JobEvent,
    ack: Ack,
}

impl Handoff {
    /// Release the posting worker
    pub fn acknowledge(self) {
        drop(self);
    }
}

#[derive(Debug)]
struct Ack(Sender<()>);

impl Drop for Ack {
    fn drop(&mut self) {
        // the worker may already be gone; nothing to do then
        let _ = self.0.try_send(());
    }
}

/// Create the coordinator's event queue
pub fn channel() -> (Sender<Handoff>, Receiver<Handoff>) {
    unbounded()
}

/// A job's private end of the event queue
///
/// `post` takes `&mut self`, so a job never has more than one event waiting.
#[derive(Debug)]
pub struct HandoffPort {
    job: JobId,
    sender: Sender<Handoff>,
}

/// An event that has been queued but not yet acknowledged
#[must_use = "the event is only handed off once the acknowledgement is awaited"]
pub struct PendingAck<'a> {
    _port: &'a mut HandoffPort,
    ack: Option<Receiver<()>>,
}

impl PendingAck<'_> {
    /// Block until the coordinator is done with the event
    ///
    /// Returns false when the coordinator is gone.
    pub fn wait(mut self) -> bool {
        match self.ack.take() {
            Some(ack) => ack.recv().is_ok(),
            None => false,
        }
    }
}

impl HandoffPort {
    pub fn new(job: JobId, sender: Sender<Handoff>) -> Self {
        Self { job, sender }
    }

    pub fn job(&self) -> JobId {
        self.job
    }

    /// Queue an event without waiting for it to be processed
    pub fn send(&mut self, event: JobEvent) -> PendingAck<'_> {
        let (ack_tx, ack_rx) = bounded(1);
        let handoff = Handoff {
            job: self.job,
            event,
            ack: Ack(ack_tx),
        };
        let ack = match self.sender.send(handoff) {
            Ok(()) => Some(ack_rx),
            Err(_) => None,
        };
        PendingAck { _port: self, ack }
    }

    /// Queue an event and block until it has been processed
    pub fn post(&mut self, event: JobEvent) -> bool {
        self.send(event).wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_post_blocks_until_acknowledged() {
        let (sender, receiver) = channel();
        let acknowledged = Arc::new(AtomicBool::new(false));

        let worker = {
            let acknowledged = Arc::clone(&acknowledged);
            thread::spawn(move || {
                let mut port = HandoffPort::new(JobId(7), sender);
                let delivered = port.post(JobEvent::Started);
                (delivered, acknowledged.load(Ordering::SeqCst))
            })
        };

        let handoff = receiver.recv().unwrap();
        assert_eq!(handoff.job, JobId(7));
        assert_eq!(handoff.event, JobEvent::Started);

        thread::sleep(Duration::from_millis(20));
        acknowledged.store(true, Ordering::SeqCst);
        handoff.acknowledge();

        let (delivered, seen_ack) = worker.join().unwrap();
        assert!(delivered);
        assert!(seen_ack);
    }

    #[test]
    fn test_post_without_coordinator_returns() {
        let (sender, receiver) = channel();
        drop(receiver);

        let mut port = HandoffPort::new(JobId(0), sender);
        assert!(!port.post(JobEvent::Progress(0.5)));
    }
}
