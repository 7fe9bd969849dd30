//! Frame dispatch: checksum validation, acknowledgment correlation and decoding.

use tokio::time::Instant;

use crate::family::BusFamily;
use crate::protocol::Frame;
use crate::queue::{CommandQueue, CommandReceipt};
use crate::value::PropertyUpdate;

/// Result of dispatching one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The checksum did not match; the frame was dropped.
    ChecksumError,
    /// The frame was valid. `updates` is empty for unmatched messages.
    Decoded {
        updates: Vec<PropertyUpdate>,
        /// Command resolved by this frame.
        acknowledged: Option<CommandReceipt>,
    },
}

impl Dispatch {
    /// Updates derived from a just-acknowledged response are force-published.
    pub fn is_authoritative(&self) -> bool {
        matches!(
            self,
            Dispatch::Decoded {
                acknowledged: Some(_),
                ..
            }
        )
    }
}

/// Routes validated frames through a family's registry.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    family: &'static BusFamily,
}

impl Dispatcher {
    pub fn new(family: &'static BusFamily) -> Self {
        Self { family }
    }

    pub fn family(&self) -> &'static BusFamily {
        self.family
    }

    /// Process one frame received at `now`.
    ///
    /// Order matters: sync frames refresh the pacing reference even when they
    /// fail the checksum, and the in-flight command is resolved before the
    /// frame is decoded.
    pub fn dispatch(&self, frame: &Frame, queue: &mut CommandQueue, now: Instant) -> Dispatch {
        let family = self.family;

        if (family.is_sync)(frame) {
            queue.mark_sync(now);
        }

        if !family.verify(frame) {
            tracing::warn!(frame = %frame.to_hex(), "checksum error");
            return Dispatch::ChecksumError;
        }

        let acknowledged = queue.acknowledge(|pending| (family.acknowledges)(pending, frame));
        if let Some(receipt) = &acknowledged {
            tracing::debug!(
                device = %receipt.update.device,
                room = %receipt.update.room,
                property = %receipt.update.name,
                attempts = receipt.attempts,
                "command acknowledged"
            );
        }

        let key = (family.classify)(frame);
        let updates = family.registry.decode(&key, frame);
        if updates.is_empty() {
            tracing::trace!(
                header = key.header,
                command = key.command,
                length = key.length,
                "no decoder for frame"
            );
        }

        Dispatch::Decoded {
            updates,
            acknowledged,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::family::ProtocolKind;
    use crate::protocol::ChecksumPolicy;
    use crate::value::{DeviceKind, PropertyValue};

    fn bestin() -> Dispatcher {
        Dispatcher::new(ProtocolKind::Bestin.family())
    }

    /// 30-byte light acknowledgment for room 1 with unit 1 on.
    fn light_ack() -> Frame {
        let mut bytes = vec![0u8; 30];
        bytes[0] = 0x02;
        bytes[1] = 0x31;
        bytes[2] = 30;
        bytes[3] = 0x91;
        bytes[5] = 0x01;
        bytes[6] = 0x01;
        ChecksumPolicy::RollingXor.apply(&mut bytes);
        Frame::from(bytes)
    }

    #[test]
    fn test_checksum_error_is_dropped() {
        let mut bytes = light_ack().as_bytes().to_vec();
        bytes[29] ^= 0xFF;
        let mut queue = CommandQueue::new(0, Duration::ZERO, Duration::from_millis(100));

        let result = bestin().dispatch(&Frame::from(bytes), &mut queue, Instant::now());
        assert_eq!(result, Dispatch::ChecksumError);
        // sync still observed
        assert!(queue.last_sync().is_some());
    }

    #[test]
    fn test_unmatched_frame_is_not_an_error() {
        let mut bytes = vec![0x02, 0x31, 0x07, 0x11, 0x00, 0x00, 0x00];
        ChecksumPolicy::RollingXor.apply(&mut bytes);
        let mut queue = CommandQueue::new(0, Duration::ZERO, Duration::from_millis(100));

        let result = bestin().dispatch(&Frame::from(bytes), &mut queue, Instant::now());
        assert_eq!(
            result,
            Dispatch::Decoded {
                updates: vec![],
                acknowledged: None,
            }
        );
        assert!(!result.is_authoritative());
    }

    #[test]
    fn test_ack_resolves_pending_command() {
        let dispatcher = bestin();
        let now = Instant::now();
        let mut queue = CommandQueue::new(3, Duration::ZERO, Duration::from_millis(100));

        let value = PropertyValue::Switch(true);
        let command = dispatcher
            .family()
            .encode(DeviceKind::Light, "1", "power1", &value)
            .unwrap();
        queue.enqueue(
            command,
            PropertyUpdate::new(DeviceKind::Light, "1", "power1", value.clone()),
            None,
            now,
        );
        assert!(queue.poll(now).is_some());

        // a periodic status frame does not answer the command
        let result = dispatcher.dispatch(&light_ack(), &mut queue, now);
        assert!(!result.is_authoritative());
        assert_eq!(queue.len(), 1);

        let mut response = vec![0u8; 13];
        response[..6].copy_from_slice(&[0x02, 0x31, 0x0D, 0x81, 0x00, 0x01]);
        ChecksumPolicy::RollingXor.apply(&mut response);

        let result = dispatcher.dispatch(&Frame::from(response), &mut queue, now);
        assert!(result.is_authoritative());
        assert!(queue.is_empty());

        let Dispatch::Decoded { acknowledged, .. } = result else {
            panic!("expected decoded frame");
        };
        let receipt = acknowledged.unwrap();
        assert_eq!(receipt.update.value, value);
        assert_eq!(receipt.attempts, 1);
    }

    #[test]
    fn test_status_without_pending_command() {
        let mut queue = CommandQueue::new(0, Duration::ZERO, Duration::from_millis(100));
        let result = bestin().dispatch(&light_ack(), &mut queue, Instant::now());
        assert!(!result.is_authoritative());
        assert!(matches!(result, Dispatch::Decoded { ref updates, .. } if !updates.is_empty()));
    }
}
