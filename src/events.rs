//! Asynchronous network-stack notifications and their routing.
//!
//! The radio stack reports link and pairing events from a context the
//! supervisor does not control. Instead of acting inside that context, the
//! notification handler posts into a bounded queue and the cooperative main
//! loop drains it. That keeps all mutation of the connection state and the
//! pairing session on one thread.
//!
//! Routing itself makes almost no decisions: a link drop asks the platform
//! for its automatic reconnect (no ranking), pairing notifications go to
//! the state machine, and the resulting actions are executed here.

use crate::pairing::{PairingAction, PairingEvent, PairingStateMachine};
use crate::radio::{PairingListener, Radio};
use crate::retry::Sleeper;
use crate::supervisor::{ConnectError, ConnectionSupervisor};
use log::{info, warn};
use std::net::IpAddr;
use std::sync::mpsc;
use std::time::Duration;

/// Queue depth. Notification bursts beyond this are dropped with a warning
/// rather than blocking the radio stack's context.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Notification classes delivered by the network stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// Station mode came up.
    AssociationStarted,
    /// DHCP finished; the device has an address.
    AddressAcquired(IpAddr),
    /// The association dropped.
    Disassociated,
    /// Pairing-protocol notification.
    Pairing(PairingEvent),
}

/// Posting half, cloned into the notification context.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::SyncSender<NetworkEvent>,
}

impl EventSender {
    /// Post without blocking. A full queue drops the event.
    pub fn post(&self, event: NetworkEvent) {
        if let Err(mpsc::TrySendError::Full(event)) = self.tx.try_send(event) {
            warn!("Event queue full, dropping {:?}", event);
        }
    }
}

/// Draining half, owned by the cooperative loop.
#[derive(Debug)]
pub struct EventDispatcher {
    rx: mpsc::Receiver<NetworkEvent>,
}

impl EventDispatcher {
    pub fn new() -> (EventSender, EventDispatcher) {
        let (tx, rx) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);
        (EventSender { tx }, EventDispatcher { rx })
    }

    /// Wait up to `timeout` for the next event.
    pub fn poll(&self, timeout: Duration) -> Option<NetworkEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Take everything currently queued, without blocking.
    pub fn drain(&self) -> Vec<NetworkEvent> {
        self.rx.try_iter().collect()
    }
}

/// What a routed event amounted to, for the main loop to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutedOutcome {
    /// Log-only event, nothing to do.
    Informational,
    /// Link drop; the platform reconnect was requested.
    ReconnectRequested,
    /// Pairing failed or timed out and was re-entered.
    PairingRetried,
    /// Pairing PIN was rendered for the operator.
    PinDisplayed,
    /// Pairing finished and the association is up; time sync should run.
    PairingComplete,
    /// Pairing reported success but the follow-up association never came
    /// up. Terminal for this session; logged, no automatic retry.
    PairingAssociationFailed,
}

/// Routes drained events to the supervisor and the pairing machinery.
pub struct EventRouter<'a, R: Radio, S: Sleeper, L: PairingListener> {
    pub supervisor: &'a mut ConnectionSupervisor<R, S>,
    pub listener: &'a mut L,
    pub pairing: &'a mut PairingStateMachine,
}

impl<'a, R: Radio, S: Sleeper, L: PairingListener> EventRouter<'a, R, S, L> {
    /// Route one event. Never fails; every failure mode degrades to a
    /// logged outcome.
    pub fn route(&mut self, event: NetworkEvent) -> RoutedOutcome {
        match event {
            NetworkEvent::AssociationStarted => {
                info!("Station mode started");
                RoutedOutcome::Informational
            }
            NetworkEvent::AddressAcquired(ip) => {
                info!("Got IP: {}", ip);
                RoutedOutcome::Informational
            }
            NetworkEvent::Disassociated => {
                self.supervisor.request_reconnect();
                RoutedOutcome::ReconnectRequested
            }
            NetworkEvent::Pairing(pairing_event) => {
                let actions = self.pairing.handle(pairing_event);
                self.execute(actions)
            }
        }
    }

    /// Kick off a pairing session: run the machine's start actions.
    pub fn start_pairing(&mut self) -> RoutedOutcome {
        let actions = self.pairing.start();
        self.execute(actions)
    }

    fn execute(&mut self, actions: Vec<PairingAction>) -> RoutedOutcome {
        let mut outcome = RoutedOutcome::Informational;
        for action in actions {
            match action {
                PairingAction::EnableListener => {
                    match self.listener.enable(self.pairing.identity()) {
                        Ok(()) => {
                            self.pairing.listener_enabled();
                            // Re-enable after a failure means the retry loop
                            // went around once more.
                            if self.pairing.retries() > 0 {
                                outcome = RoutedOutcome::PairingRetried;
                            }
                        }
                        Err(e) => warn!("Enabling pairing listener failed: {}", e),
                    }
                }
                PairingAction::DisableListener => {
                    if let Err(e) = self.listener.disable() {
                        warn!("Disabling pairing listener failed: {}", e);
                    }
                }
                PairingAction::ConnectWithSavedCredentials => {
                    match self.supervisor.complete_pairing() {
                        Ok(()) => outcome = RoutedOutcome::PairingComplete,
                        Err(ConnectError::AssociationTimeout) => {
                            warn!("Pairing succeeded but connection failed");
                            outcome = RoutedOutcome::PairingAssociationFailed;
                        }
                        Err(e) => {
                            warn!("Post-pairing connection error: {}", e);
                            outcome = RoutedOutcome::PairingAssociationFailed;
                        }
                    }
                }
                PairingAction::DisplayPin(pin) => {
                    info!("Pairing PIN for the operator: {}", pin);
                    outcome = RoutedOutcome::PinDisplayed;
                }
            }
        }
        outcome
    }
}
