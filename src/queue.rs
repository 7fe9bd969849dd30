//! Outbound command queue.
//!
//! The bus is half-duplex and shared with the wallpad and its devices, and a
//! response carries no request id. Only the head of the queue is ever in
//! flight; the next command is not written until the head is acknowledged or
//! exhausts its retries.
//!
//! ```text
//! Queued ──(pacing delay)──► Sent ──ack──► Acked
//!                             │  ▲
//!                     timeout │  │ retries left
//!                             ▼  │
//!                           Retrying ──no retries left──► Exhausted
//! ```
//!
//! The queue is a pure state machine over [`Instant`]s: the owner calls
//! [`CommandQueue::poll`] when [`CommandQueue::next_deadline`] elapses and
//! performs the returned [`QueueAction`]. No timers live in here.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{BridgeError, Result};
use crate::state::PropertyKey;
use crate::value::{PropertyUpdate, PropertyValue};

/// Resolution of one command.
pub type CommandOutcome = Result<CommandReceipt>;

/// Successful acknowledgment of a command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReceipt {
    /// Property the command set.
    pub update: PropertyUpdate,
    /// Number of times the frame was written.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Not written yet; first write allowed at `ready_at`.
    Queued { ready_at: Instant },
    /// Written; retry or give up at `deadline`.
    Sent { deadline: Instant },
}

/// A command owned by the queue until it resolves.
#[derive(Debug)]
struct PendingCommand {
    frame: Bytes,
    update: PropertyUpdate,
    retries_remaining: u32,
    attempts: u32,
    phase: Phase,
    reply: Option<oneshot::Sender<CommandOutcome>>,
}

impl PendingCommand {
    fn resolve(&mut self, outcome: CommandOutcome) {
        if let Some(reply) = self.reply.take() {
            // the submitter may have stopped waiting
            let _ = reply.send(outcome);
        }
    }
}

/// What the owner of the queue must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueAction {
    /// Write `frame` to the transport.
    Transmit {
        frame: Bytes,
        update: PropertyUpdate,
        attempt: u32,
    },
    /// The head ran out of retries and was dropped.
    Exhausted {
        update: PropertyUpdate,
        attempts: u32,
    },
}

/// FIFO of outbound commands with pacing and bounded retries.
#[derive(Debug)]
pub struct CommandQueue {
    pending: VecDeque<PendingCommand>,
    max_retries: u32,
    min_gap: Duration,
    retry_interval: Duration,
    last_sync: Option<Instant>,
}

impl CommandQueue {
    pub fn new(max_retries: u32, min_gap: Duration, retry_interval: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            max_retries,
            min_gap,
            retry_interval,
            last_sync: None,
        }
    }

    /// A timing reference frame was observed at `now`.
    pub fn mark_sync(&mut self, now: Instant) {
        self.last_sync = Some(now);
    }

    pub fn last_sync(&self) -> Option<Instant> {
        self.last_sync
    }

    /// Delay before a command enqueued at `now` may be written.
    pub fn pacing_delay(&self, now: Instant) -> Duration {
        match self.last_sync {
            Some(sync) => self.min_gap.saturating_sub(now.saturating_duration_since(sync)),
            None => Duration::ZERO,
        }
    }

    /// Append a command. `reply` receives the outcome exactly once.
    pub fn enqueue(
        &mut self,
        frame: Bytes,
        update: PropertyUpdate,
        reply: Option<oneshot::Sender<CommandOutcome>>,
        now: Instant,
    ) {
        let ready_at = now + self.pacing_delay(now);
        tracing::debug!(
            frame = %hex::encode(&frame),
            queued = self.pending.len(),
            "command queued"
        );
        self.pending.push_back(PendingCommand {
            frame,
            update,
            retries_remaining: self.max_retries,
            attempts: 0,
            phase: Phase::Queued { ready_at },
            reply,
        });
    }

    /// Advance the head of the queue to `now`.
    ///
    /// Returns at most one action; call again until it yields `None`.
    pub fn poll(&mut self, now: Instant) -> Option<QueueAction> {
        let retry_interval = self.retry_interval;
        let head = self.pending.front_mut()?;

        match head.phase {
            Phase::Queued { ready_at } if now >= ready_at => {}
            Phase::Sent { deadline } if now >= deadline => {
                if head.retries_remaining == 0 {
                    return self.exhaust();
                }
                head.retries_remaining -= 1;
            }
            _ => return None,
        }

        head.attempts += 1;
        head.phase = Phase::Sent {
            deadline: now + retry_interval,
        };
        Some(QueueAction::Transmit {
            frame: head.frame.clone(),
            update: head.update.clone(),
            attempt: head.attempts,
        })
    }

    fn exhaust(&mut self) -> Option<QueueAction> {
        let mut head = self.pending.pop_front()?;
        let update = head.update.clone();
        let attempts = head.attempts;
        head.resolve(Err(BridgeError::CommandExhausted {
            device: update.device.to_string(),
            room: update.room.clone(),
            property: update.name.clone(),
            attempts,
        }));
        Some(QueueAction::Exhausted { update, attempts })
    }

    /// When the head next needs attention.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.front().map(|head| match head.phase {
            Phase::Queued { ready_at } => ready_at,
            Phase::Sent { deadline } => deadline,
        })
    }

    /// In-flight command bytes, if the head has been written.
    pub fn in_flight(&self) -> Option<&Bytes> {
        self.pending
            .front()
            .filter(|head| matches!(head.phase, Phase::Sent { .. }))
            .map(|head| &head.frame)
    }

    /// Resolve the in-flight command if `matches` accepts its frame bytes.
    pub fn acknowledge<F>(&mut self, matches: F) -> Option<CommandReceipt>
    where
        F: FnOnce(&[u8]) -> bool,
    {
        if !matches(self.in_flight()?) {
            return None;
        }
        let mut head = self.pending.pop_front()?;
        let receipt = CommandReceipt {
            update: head.update.clone(),
            attempts: head.attempts,
        };
        head.resolve(Ok(receipt.clone()));
        Some(receipt)
    }

    /// Whether a queued or in-flight command sets `key` to `value`.
    pub fn is_pending(&self, key: &PropertyKey, value: &PropertyValue) -> bool {
        self.pending.iter().any(|command| {
            let update = &command.update;
            update.device == key.device
                && update.room == key.room
                && update.name == key.name
                && &update.value == value
        })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DeviceKind;

    const GAP: Duration = Duration::from_millis(100);
    const RETRY: Duration = Duration::from_millis(100);

    fn update(name: &str) -> PropertyUpdate {
        PropertyUpdate::new(DeviceKind::Light, "1", name, PropertyValue::Switch(true))
    }

    fn frame(tag: u8) -> Bytes {
        Bytes::from(vec![0x02, 0x31, 0x0D, 0x01, tag])
    }

    /// Drive the queue with time advancing to each deadline, never acknowledging.
    fn run_to_idle(queue: &mut CommandQueue, mut now: Instant) -> Vec<QueueAction> {
        let mut actions = Vec::new();
        while let Some(deadline) = queue.next_deadline() {
            now = now.max(deadline);
            while let Some(action) = queue.poll(now) {
                actions.push(action);
            }
        }
        actions
    }

    #[test]
    fn test_bounded_retry() {
        let now = Instant::now();
        let mut queue = CommandQueue::new(3, GAP, RETRY);
        let (tx, mut rx) = oneshot::channel();
        queue.enqueue(frame(1), update("power1"), Some(tx), now);

        let actions = run_to_idle(&mut queue, now);
        let sends = actions
            .iter()
            .filter(|a| matches!(a, QueueAction::Transmit { .. }))
            .count();
        assert_eq!(sends, 4);
        assert!(matches!(
            actions.last(),
            Some(QueueAction::Exhausted { attempts: 4, .. })
        ));
        assert!(queue.is_empty());

        match rx.try_recv() {
            Ok(Err(BridgeError::CommandExhausted { attempts, .. })) => assert_eq!(attempts, 4),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_zero_retries_sends_once() {
        let now = Instant::now();
        let mut queue = CommandQueue::new(0, GAP, RETRY);
        queue.enqueue(frame(1), update("power1"), None, now);

        let actions = run_to_idle(&mut queue, now);
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], QueueAction::Transmit { attempt: 1, .. }));
        assert!(matches!(actions[1], QueueAction::Exhausted { attempts: 1, .. }));
    }

    #[test]
    fn test_serialization() {
        let now = Instant::now();
        let mut queue = CommandQueue::new(2, GAP, RETRY);
        queue.enqueue(frame(1), update("power1"), None, now);
        queue.enqueue(frame(2), update("power2"), None, now);

        let actions = run_to_idle(&mut queue, now);
        let order: Vec<_> = actions
            .iter()
            .map(|a| match a {
                QueueAction::Transmit { frame, .. } => ("tx", frame[4]),
                QueueAction::Exhausted { update, .. } => ("done", update.name.as_bytes()[5] - b'0'),
            })
            .collect();

        assert_eq!(
            order,
            vec![
                ("tx", 1),
                ("tx", 1),
                ("tx", 1),
                ("done", 1),
                ("tx", 2),
                ("tx", 2),
                ("tx", 2),
                ("done", 2),
            ]
        );
    }

    #[test]
    fn test_acknowledge_resolves_head_only() {
        let now = Instant::now();
        let mut queue = CommandQueue::new(3, GAP, RETRY);
        let (tx, mut rx) = oneshot::channel();
        queue.enqueue(frame(1), update("power1"), Some(tx), now);
        queue.enqueue(frame(2), update("power2"), None, now);

        // not written yet: nothing to acknowledge
        assert!(queue.acknowledge(|_| true).is_none());

        assert!(matches!(queue.poll(now), Some(QueueAction::Transmit { .. })));
        assert!(queue.poll(now).is_none());

        // a response for the second command does not resolve the first
        assert!(queue.acknowledge(|bytes| bytes[4] == 2).is_none());

        let receipt = queue.acknowledge(|bytes| bytes[4] == 1).unwrap();
        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.update.name, "power1");
        assert_eq!(queue.len(), 1);
        assert_eq!(rx.try_recv().unwrap().unwrap(), receipt);

        // the next command goes out immediately
        assert!(matches!(
            queue.poll(now),
            Some(QueueAction::Transmit { attempt: 1, .. })
        ));
    }

    #[test]
    fn test_pacing_after_sync() {
        let start = Instant::now();
        let mut queue = CommandQueue::new(0, GAP, RETRY);
        queue.mark_sync(start);

        let now = start + Duration::from_millis(30);
        assert_eq!(queue.pacing_delay(now), Duration::from_millis(70));
        queue.enqueue(frame(1), update("power1"), None, now);

        assert_eq!(queue.next_deadline(), Some(start + GAP));
        assert!(queue.poll(now).is_none());
        assert!(queue.poll(start + Duration::from_millis(99)).is_none());
        assert!(queue.poll(start + GAP).is_some());
    }

    #[test]
    fn test_no_pacing_when_bus_quiet() {
        let start = Instant::now();
        let mut queue = CommandQueue::new(0, GAP, RETRY);
        assert_eq!(queue.pacing_delay(start), Duration::ZERO);

        queue.mark_sync(start);
        assert_eq!(queue.pacing_delay(start + Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let now = Instant::now();
        let mut queue = CommandQueue::new(0, GAP, RETRY);
        let (tx, rx) = oneshot::channel();
        drop(rx);
        queue.enqueue(frame(1), update("power1"), Some(tx), now);
        let actions = run_to_idle(&mut queue, now);
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_is_pending_until_resolved() {
        let now = Instant::now();
        let mut queue = CommandQueue::new(1, GAP, RETRY);
        let key = PropertyKey::new(DeviceKind::Light, "1", "power1");
        let on = PropertyValue::Switch(true);
        queue.enqueue(frame(1), update("power1"), None, now);

        assert!(queue.is_pending(&key, &on));
        assert!(!queue.is_pending(&key, &PropertyValue::Switch(false)));
        assert!(!queue.is_pending(&PropertyKey::new(DeviceKind::Light, "2", "power1"), &on));

        assert!(matches!(queue.poll(now), Some(QueueAction::Transmit { .. })));
        assert!(queue.is_pending(&key, &on));

        assert!(queue.acknowledge(|_| true).is_some());
        assert!(!queue.is_pending(&key, &on));
    }
}
