//! Bridge builder and runtime loop.
//!
//! The [`BridgeBuilder`] selects a bus family and its timing. The [`Bridge`]
//! owns every piece of engine state and drives it from one task:
//! 1. Read bytes from the transport and split them into frames
//! 2. Dispatch each frame: checksum, acknowledgment, decode
//! 3. Publish real changes through the [`StatePublisher`]
//! 4. Accept commands from [`BridgeHandle`]s and write them onto the bus
//!
//! # Architecture
//!
//! ```text
//! BridgeHandle ─┐                         ┌─► StateStore ─► StatePublisher
//! BridgeHandle ─┼─► mpsc ─► Bridge::run ──┤
//!               │             ▲   │       └─► CommandQueue ─► transport write
//!               │  transport ─┘   └── queue deadlines (retry, pacing)
//! ```
//!
//! State survives [`Bridge::run`] returning, so the caller can reconnect the
//! transport and call it again.
//!
//! # Example
//!
//! ```ignore
//! use wallpad_bridge::bridge::Bridge;
//! use wallpad_bridge::family::ProtocolKind;
//! use wallpad_bridge::{DeviceKind, PropertyValue};
//!
//! let (changes, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let mut bridge = Bridge::builder(ProtocolKind::Bestin)
//!     .max_retries(5)
//!     .build(changes);
//! let handle = bridge.handle();
//!
//! tokio::spawn(async move {
//!     let receipt = handle
//!         .set(DeviceKind::Light, "1", "power1", PropertyValue::Switch(true))
//!         .await?;
//!     println!("acknowledged after {} attempts", receipt.attempts);
//!     Ok::<_, wallpad_bridge::BridgeError>(())
//! });
//!
//! bridge.run(stream).await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::dispatch::{Dispatch, Dispatcher};
use crate::error::{BridgeError, Result};
use crate::family::{BusFamily, ProtocolKind};
use crate::protocol::FrameDecoder;
use crate::queue::{CommandOutcome, CommandQueue, CommandReceipt, QueueAction};
use crate::state::{PropertyKey, StateStore};
use crate::topic::CommandRequest;
use crate::value::{DeviceKind, PropertyUpdate, PropertyValue};

/// Default retry budget per command.
pub const DEFAULT_MAX_RETRIES: u32 = 20;

/// Transport read buffer size.
const READ_BUFFER_SIZE: usize = 1024;

/// Why a property is being published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    /// Periodic status from the bus.
    Bus,
    /// Response to a just-acknowledged command; published even if unchanged.
    Confirmed,
    /// Commanded value applied before the bus confirmed it.
    Optimistic,
    /// Optimistic value rolled back after the command was never acknowledged.
    Retracted,
}

/// A property value to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub update: PropertyUpdate,
    pub reason: ChangeReason,
}

/// Sink for state changes, called on the bridge task.
pub trait StatePublisher: Send {
    fn publish(&mut self, change: StateChange);
}

impl StatePublisher for mpsc::UnboundedSender<StateChange> {
    fn publish(&mut self, change: StateChange) {
        if self.send(change).is_err() {
            tracing::debug!("state receiver dropped");
        }
    }
}

/// Command submitted by a handle, already encoded.
#[derive(Debug)]
struct BridgeCommand {
    frame: Bytes,
    update: PropertyUpdate,
    reply: oneshot::Sender<CommandOutcome>,
}

/// Builder for configuring and creating a [`Bridge`].
#[derive(Debug, Clone)]
pub struct BridgeBuilder {
    protocol: ProtocolKind,
    max_retries: u32,
    min_gap: Option<Duration>,
    retry_interval: Option<Duration>,
}

impl BridgeBuilder {
    pub fn new(protocol: ProtocolKind) -> Self {
        Self {
            protocol,
            max_retries: DEFAULT_MAX_RETRIES,
            min_gap: None,
            retry_interval: None,
        }
    }

    /// Retransmissions allowed after the first write.
    ///
    /// Default: 20
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Quiet time required after a sync frame before writing.
    ///
    /// Default: the family's gap
    pub fn min_gap(mut self, gap: Duration) -> Self {
        self.min_gap = Some(gap);
        self
    }

    /// Time to wait for an acknowledgment before retransmitting.
    ///
    /// Default: the family's interval
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    pub fn build<P: StatePublisher>(self, publisher: P) -> Bridge<P> {
        let family = self.protocol.family();
        let (sender, commands) = mpsc::unbounded_channel();
        Bridge {
            family,
            dispatcher: Dispatcher::new(family),
            decoder: FrameDecoder::new(family.framing),
            store: StateStore::new(),
            queue: CommandQueue::new(
                self.max_retries,
                self.min_gap.unwrap_or(family.min_gap),
                self.retry_interval.unwrap_or(family.retry_interval),
            ),
            publisher,
            commands,
            weak: sender.downgrade(),
            sender: Some(sender),
            draining: false,
        }
    }
}

/// Protocol engine bound to one bus.
pub struct Bridge<P> {
    family: &'static BusFamily,
    dispatcher: Dispatcher,
    decoder: FrameDecoder,
    store: StateStore,
    queue: CommandQueue,
    publisher: P,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
    /// Released when `run` starts so only external handles keep the channel open.
    sender: Option<mpsc::UnboundedSender<BridgeCommand>>,
    weak: mpsc::WeakUnboundedSender<BridgeCommand>,
    draining: bool,
}

impl Bridge<()> {
    /// Create a new bridge builder.
    pub fn builder(protocol: ProtocolKind) -> BridgeBuilder {
        BridgeBuilder::new(protocol)
    }
}

impl<P: StatePublisher> Bridge<P> {
    /// Handle for submitting commands.
    ///
    /// Take handles before the first [`run`](Self::run); a handle taken later
    /// is only live while another handle still is.
    pub fn handle(&self) -> BridgeHandle {
        let commands = match &self.sender {
            Some(sender) => sender.clone(),
            None => self
                .weak
                .upgrade()
                .unwrap_or_else(|| mpsc::unbounded_channel().0),
        };
        BridgeHandle {
            family: self.family,
            commands,
        }
    }

    pub fn family(&self) -> &'static BusFamily {
        self.family
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Drive the bus until it closes or every handle is dropped.
    ///
    /// Returns `Ok(())` once all handles are gone and the queue has drained,
    /// and an error when the transport fails or reaches end of stream. The
    /// framer restarts from scratch on every call; the state cache and queued
    /// commands carry over.
    pub async fn run<T>(&mut self, transport: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        self.sender.take();
        self.decoder.reset();

        let (mut reader, mut writer) = tokio::io::split(transport);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            self.drive_queue(&mut writer).await?;
            if self.draining && self.queue.is_empty() {
                tracing::debug!("all handles dropped, bridge stopping");
                return Ok(());
            }

            let deadline = self.queue.next_deadline();
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => return Err(BridgeError::ConnectionClosed),
                    Ok(n) => self.receive(&buf[..n]),
                    Err(e) => return Err(BridgeError::Io(e)),
                },
                command = self.commands.recv(), if !self.draining => match command {
                    Some(command) => self.submit(command),
                    None => self.draining = true,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }
        }
    }

    /// Feed raw transport bytes through the framer and dispatcher.
    pub fn receive(&mut self, data: &[u8]) {
        let now = Instant::now();
        self.decoder.extend(data);

        while let Some(frame) = self.decoder.next_frame() {
            tracing::debug!(frame = %frame.to_hex(), "frame received");
            let dispatch = self.dispatcher.dispatch(&frame, &mut self.queue, now);
            let reason = if dispatch.is_authoritative() {
                ChangeReason::Confirmed
            } else {
                ChangeReason::Bus
            };
            let Dispatch::Decoded { updates, .. } = dispatch else {
                continue;
            };

            for update in updates {
                let force = reason == ChangeReason::Confirmed;
                if !force && self.masked_by_command(&update) {
                    // stale status while the command is outstanding
                    tracing::debug!(
                        device = %update.device,
                        room = %update.room,
                        property = %update.name,
                        value = %update.value,
                        "status held back by pending command"
                    );
                    self.store
                        .confirm(update.device, &update.room, &update.name, update.value);
                    continue;
                }

                let changed = self.store.update(
                    update.device,
                    &update.room,
                    &update.name,
                    update.value.clone(),
                    force,
                );
                if changed {
                    self.publish(update, reason);
                }
            }
        }
    }

    /// Whether the published value of `update`'s property comes from a command
    /// still in the queue, and `update` would overwrite it.
    fn masked_by_command(&self, update: &PropertyUpdate) -> bool {
        let Some(published) = self.store.get(update.device, &update.room, &update.name) else {
            return false;
        };
        let key = PropertyKey::new(update.device, update.room.as_str(), update.name.as_str());
        *published != update.value && self.queue.is_pending(&key, published)
    }

    fn submit(&mut self, command: BridgeCommand) {
        let BridgeCommand {
            frame,
            update,
            reply,
        } = command;

        tracing::info!(
            device = %update.device,
            room = %update.room,
            property = %update.name,
            value = %update.value,
            "command"
        );

        let changed =
            self.store
                .optimistic(update.device, &update.room, &update.name, update.value.clone());
        if changed {
            self.publish(update.clone(), ChangeReason::Optimistic);
        }
        self.queue.enqueue(frame, update, Some(reply), Instant::now());
    }

    async fn drive_queue<W>(&mut self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let now = Instant::now();
        while let Some(action) = self.queue.poll(now) {
            match action {
                QueueAction::Transmit {
                    frame,
                    update,
                    attempt,
                } => {
                    if attempt > 1 {
                        tracing::debug!(
                            device = %update.device,
                            room = %update.room,
                            property = %update.name,
                            attempt,
                            "retrying command"
                        );
                    }
                    tracing::debug!(frame = %hex::encode(&frame), "frame sent");
                    writer.write_all(&frame).await?;
                    writer.flush().await?;
                }
                QueueAction::Exhausted { update, attempts } => {
                    tracing::warn!(
                        device = %update.device,
                        room = %update.room,
                        property = %update.name,
                        attempts,
                        "command not acknowledged, giving up"
                    );
                    if let Some(value) = self.store.retract(update.device, &update.room, &update.name) {
                        let restored = PropertyUpdate { value, ..update };
                        self.publish(restored, ChangeReason::Retracted);
                    }
                }
            }
        }
        Ok(())
    }

    fn publish(&mut self, update: PropertyUpdate, reason: ChangeReason) {
        if update.value.is_numeric() {
            tracing::debug!(device = %update.device, room = %update.room, property = %update.name, value = %update.value, "publish");
        } else {
            tracing::info!(device = %update.device, room = %update.room, property = %update.name, value = %update.value, "publish");
        }
        self.publisher.publish(StateChange { update, reason });
    }
}

/// Cloneable handle for submitting commands to a running [`Bridge`].
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    family: &'static BusFamily,
    commands: mpsc::UnboundedSender<BridgeCommand>,
}

impl BridgeHandle {
    /// Set `name` of `device` in `room` to `value`.
    ///
    /// The frame is encoded immediately; encoding errors resolve the ticket
    /// without touching the bus.
    pub fn set(
        &self,
        device: DeviceKind,
        room: &str,
        name: &str,
        value: PropertyValue,
    ) -> CommandTicket {
        let frame = match self.family.encode(device, room, name, &value) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%device, room, property = name, "cannot encode command: {}", e);
                return CommandTicket::failed(e);
            }
        };

        let (reply, rx) = oneshot::channel();
        let command = BridgeCommand {
            frame,
            update: PropertyUpdate::new(device, room, name, value),
            reply,
        };
        // on failure the command and its reply sender are dropped, which
        // resolves the ticket as closed
        let _ = self.commands.send(command);
        CommandTicket { rx }
    }

    /// Submit a request parsed from a command topic.
    pub fn submit(&self, request: &CommandRequest) -> CommandTicket {
        match request.value() {
            Ok(value) => self.set(request.device, &request.room, &request.name, value),
            Err(e) => {
                tracing::warn!("{}", e);
                CommandTicket::failed(e)
            }
        }
    }

    /// Whether the bridge has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Outcome of one submitted command, resolved exactly once.
#[derive(Debug)]
#[must_use = "a ticket does nothing unless awaited or dropped deliberately"]
pub struct CommandTicket {
    rx: oneshot::Receiver<CommandOutcome>,
}

impl CommandTicket {
    fn failed(error: BridgeError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { rx }
    }
}

impl Future for CommandTicket {
    type Output = Result<CommandReceipt>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(BridgeError::ConnectionClosed)))
    }
}
