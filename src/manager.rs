//! Connection lifecycle for a NUS link.
//!
//! [`UartManager`] is a state machine fed with [`RadioEvent`]s and send
//! requests. [`UartManager::run`] drains both queues from a single task, so
//! events and writes are processed strictly one at a time. Each queue is FIFO;
//! pending radio events are handled before pending sends, which lets a
//! disconnect void the sends queued behind it. After [`EVENT_BURST`] events in
//! a row one queued send is let through, so a peripheral flooding
//! notifications cannot hold writes back indefinitely.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capability::{find_uart_service, negotiate_capability, LinkCapability};
use crate::config::UartConfig;
use crate::error::{Error, LinkError, WriteError};
use crate::transport::{DeviceId, GattCharacteristic, GattLink, GattService, RadioEvent};
use crate::write_path;

/// Radio events handled back to back before a pending send gets a turn
pub const EVENT_BURST: usize = 16;

/// Externally visible connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Discovering,
    Negotiating,
    /// Writes and notifications flow only in this state
    Ready,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Discovering => write!(f, "discovering"),
            LinkState::Negotiating => write!(f, "negotiating"),
            LinkState::Ready => write!(f, "ready"),
        }
    }
}

/// Bytes from one TX notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub device: DeviceId,
    pub data: Vec<u8>,
}

/// Application hooks, called from the manager task
pub trait UartCallbacks: Send + Sync {
    fn on_data_received(&self, event: InboundEvent);

    /// One call per physical write that completed
    fn on_data_sent(&self, _device: &DeviceId, _bytes: &[u8]) {}

    fn on_write_failed(&self, _err: &WriteError) {}

    /// Setup of a connection failed, or the link dropped before it was
    /// Ready; the link is not usable
    fn on_link_failed(&self, _err: &Error) {}

    /// The peripheral went away. Called for every disconnect of a live
    /// connection, Ready or not.
    fn on_disconnected(&self, _device: &DeviceId) {}
}

/// Per-connection state, dropped as a whole on disconnect
#[derive(Debug)]
struct Session {
    device: DeviceId,
    rx: GattCharacteristic,
    tx: GattCharacteristic,
    capability: LinkCapability,
}

#[derive(Debug)]
enum Phase {
    Disconnected,
    Discovering(DeviceId),
    Negotiating,
    Ready(Session),
}

impl Phase {
    fn state(&self) -> LinkState {
        match self {
            Phase::Disconnected => LinkState::Disconnected,
            Phase::Discovering(_) => LinkState::Discovering,
            Phase::Negotiating => LinkState::Negotiating,
            Phase::Ready(_) => LinkState::Ready,
        }
    }
}

pub struct UartManager<L> {
    link: L,
    config: UartConfig,
    phase: Phase,
    state: watch::Sender<LinkState>,
    callbacks: Arc<dyn UartCallbacks>,
}

impl<L: GattLink> UartManager<L> {
    pub fn new(link: L, config: UartConfig, callbacks: Arc<dyn UartCallbacks>) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            link,
            config,
            phase: Phase::Disconnected,
            state,
            callbacks,
        }
    }

    pub fn state(&self) -> LinkState {
        self.phase.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Capability of the current connection, present only while Ready
    pub fn capability(&self) -> Option<&LinkCapability> {
        match &self.phase {
            Phase::Ready(session) => Some(&session.capability),
            _ => None,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        let state = phase.state();
        self.phase = phase;
        self.state.send_replace(state);
        debug!("link state: {}", state);
    }

    pub async fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Connected(device) => match self.phase {
                Phase::Disconnected => {
                    info!("connected to {}", device);
                    self.set_phase(Phase::Discovering(device));
                }
                _ => warn!("connect from {} while {}, ignored", device, self.state()),
            },
            RadioEvent::ServicesDiscovered(services) => {
                let Phase::Discovering(device) = &self.phase else {
                    warn!("services discovered while {}, ignored", self.state());
                    return;
                };
                let device = device.clone();
                self.setup(device, &services).await;
            }
            RadioEvent::Notification { uuid, value } => self.on_notification(uuid, value),
            RadioEvent::Disconnected(device) => {
                if matches!(self.phase, Phase::Disconnected) {
                    debug!("disconnect from {} while already disconnected", device);
                    return;
                }
                let was_ready = matches!(self.phase, Phase::Ready(_));
                info!("disconnected from {}", device);
                self.set_phase(Phase::Disconnected);
                if !was_ready {
                    self.callbacks.on_link_failed(&Error::Link(LinkError::Closed));
                }
                self.callbacks.on_disconnected(&device);
            }
        }
    }

    async fn setup(&mut self, device: DeviceId, services: &[GattService]) {
        self.set_phase(Phase::Negotiating);
        match self.negotiate(device, services).await {
            Ok(session) => {
                info!(
                    "{} ready: {:?} writes, long write {}, {} bytes per write",
                    session.device,
                    session.capability.write_mode,
                    session.capability.allow_long_write,
                    session.capability.max_payload_bytes
                );
                self.set_phase(Phase::Ready(session));
            }
            Err(err) => {
                warn!("link unusable: {}", err);
                self.set_phase(Phase::Disconnected);
                self.callbacks.on_link_failed(&err);
            }
        }
    }

    async fn negotiate(&self, device: DeviceId, services: &[GattService]) -> Result<Session, Error> {
        let (mut rx, tx) = find_uart_service(services)?;
        if !tx.properties.notify {
            warn!("TX characteristic does not advertise notify, subscribing anyway");
        }
        let mtu = self.link.request_mtu(self.config.requested_mtu).await?;
        debug!("MTU {} (requested {})", mtu, self.config.requested_mtu);
        let capability = negotiate_capability(&mut rx, mtu)?;
        self.link.enable_notifications(&tx).await?;
        Ok(Session {
            device,
            rx,
            tx,
            capability,
        })
    }

    fn on_notification(&self, uuid: uuid::Uuid, value: Vec<u8>) {
        match &self.phase {
            Phase::Ready(session) if session.tx.uuid == uuid => {
                info!("\"{}\" received", String::from_utf8_lossy(&value));
                self.callbacks.on_data_received(InboundEvent {
                    device: session.device.clone(),
                    data: value,
                });
            }
            _ => debug!("dropping notification from {} while {}", uuid, self.state()),
        }
    }

    /// Write a payload on the current connection.
    ///
    /// Outside Ready this does nothing and succeeds, as does an empty payload.
    pub async fn send(&self, payload: &[u8]) -> Result<(), WriteError> {
        let Phase::Ready(session) = &self.phase else {
            debug!("{}, dropping {} bytes", self.state(), payload.len());
            return Ok(());
        };
        let callbacks = &self.callbacks;
        let result = write_path::send(
            &self.link,
            &session.rx,
            Some(&session.capability),
            payload,
            |chunk| callbacks.on_data_sent(&session.device, chunk),
        )
        .await;
        if let Err(err) = &result {
            warn!("send to {}: {}", session.device, err);
            callbacks.on_write_failed(err);
        }
        result
    }

    /// Serve radio events and queued sends until the event queue closes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<RadioEvent>,
        mut sends: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        let mut streak = 0;
        loop {
            if streak >= EVENT_BURST {
                streak = 0;
                if let Ok(payload) = sends.try_recv() {
                    let _ = self.send(&payload).await;
                    continue;
                }
            }
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event).await;
                        streak += 1;
                    }
                    None => break,
                },
                Some(payload) = sends.recv() => {
                    streak = 0;
                    // failures already went to the callbacks
                    let _ = self.send(&payload).await;
                }
            }
        }
        debug!("event queue closed");
    }
}

impl<L: GattLink + 'static> UartManager<L> {
    /// Start the manager on its own task.
    ///
    /// Radio events go into the returned sender; the application talks to the
    /// manager through the [`UartHandle`].
    pub fn spawn(self) -> (UartHandle, mpsc::Sender<RadioEvent>, JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::channel(self.config.queue_depth);
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let handle = UartHandle {
            sends: send_tx,
            state: self.subscribe_state(),
        };
        let join = tokio::spawn(self.run(event_rx, send_rx));
        (handle, event_tx, join)
    }
}

/// Application side of a running manager
#[derive(Clone)]
pub struct UartHandle {
    sends: mpsc::UnboundedSender<Vec<u8>>,
    state: watch::Receiver<LinkState>,
}

impl UartHandle {
    /// Queue bytes for the RX characteristic and return at once.
    ///
    /// Nothing is sent while the link is not Ready; failures are reported
    /// through [`UartCallbacks::on_write_failed`].
    pub fn send(&self, bytes: impl Into<Vec<u8>>) {
        if self.sends.send(bytes.into()).is_err() {
            debug!("manager stopped, send dropped");
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LinkState::Ready
    }

    /// Wait until the link reaches `target`. Fails once the manager is gone.
    ///
    /// Only the latest state is observed, so a state that is entered and left
    /// before this task runs can be missed. Use
    /// [`UartCallbacks::on_disconnected`] to learn about every link loss.
    pub async fn wait_for_state(&self, target: LinkState) -> Result<(), watch::error::RecvError> {
        let mut state = self.state.clone();
        loop {
            if *state.borrow_and_update() == target {
                return Ok(());
            }
            state.changed().await?;
        }
    }
}
