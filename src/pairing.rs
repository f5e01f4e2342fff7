//! Interactive pairing (WPS push-button) state machine.
//!
//! When no saved credentials work, the device enters pairing mode and waits
//! for the router to hand over credentials. The handshake itself runs inside
//! the radio stack; this machine only tracks where the session stands and
//! tells the caller what to do next. Failure and timeout always re-enter
//! pairing - a device with no credentials has no other recovery path, so
//! retries are unbounded by design.
//!
//! Each event produces a list of [`PairingAction`]s the caller executes
//! against the pairing listener and the radio. The machine itself never
//! touches hardware, which keeps it host-testable.

use log::{info, warn};

/// Length of the fixed-size PIN buffer delivered by the pairing protocol.
/// Exactly 8 ASCII digits, not null-terminated.
pub const PAIRING_PIN_LEN: usize = 8;

/// Device identity advertised during pairing. Static configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model_number: String,
    pub model_name: String,
    pub device_name: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            manufacturer: "XIAO".to_string(),
            model_number: "ESP32S3".to_string(),
            model_name: "SEED STUDIO".to_string(),
            device_name: "CeilingLamp".to_string(),
        }
    }
}

/// Primary pairing session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    /// No session in progress.
    Idle,
    /// Listener enable requested, not yet confirmed.
    Enabling,
    /// Handshake running in the radio stack; waiting for a notification.
    AwaitingResult,
    /// The protocol reported success; credentials are persisted.
    Succeeded,
}

/// Asynchronous notifications from the pairing protocol stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// Handshake completed; credentials are now in the credential store.
    Succeeded,
    /// Handshake failed.
    Failed,
    /// Handshake timed out.
    TimedOut,
    /// The protocol requires a PIN exchange; the operator must read this
    /// PIN off the device. Observational only.
    PinExchange([u8; PAIRING_PIN_LEN]),
}

/// Actions the caller must execute after feeding an event in.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "pairing actions must be executed against the listener and radio"]
pub enum PairingAction {
    /// Enable the pairing listener with the device identity.
    EnableListener,
    /// Disable the pairing listener.
    DisableListener,
    /// Associate using the credentials the handshake just persisted.
    ConnectWithSavedCredentials,
    /// Render this PIN for the operator.
    DisplayPin(String),
}

/// Event-driven pairing session.
///
/// Created when saved-credential connection fails; lives until pairing
/// succeeds (or forever, retrying).
#[derive(Debug)]
pub struct PairingStateMachine {
    state: PairingState,
    identity: DeviceIdentity,
    retries: u32,
}

impl PairingStateMachine {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            state: PairingState::Idle,
            identity,
            retries: 0,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// How many times the session has re-entered pairing after a failure
    /// or timeout.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Begin a pairing session. Valid from `Idle`.
    pub fn start(&mut self) -> Vec<PairingAction> {
        match self.state {
            PairingState::Idle => {
                info!(
                    "Starting pairing mode for {:?}; press the pairing button on the router",
                    self.identity.device_name
                );
                self.state = PairingState::Enabling;
                vec![PairingAction::EnableListener]
            }
            _ => {
                warn!("Pairing start ignored in state {:?}", self.state);
                Vec::new()
            }
        }
    }

    /// The caller confirms the listener is enabled and the handshake is
    /// running asynchronously.
    pub fn listener_enabled(&mut self) {
        if self.state == PairingState::Enabling {
            self.state = PairingState::AwaitingResult;
        } else {
            warn!("Listener-enabled confirmation in state {:?}", self.state);
        }
    }

    /// Feed one asynchronous notification in and get the actions to run.
    pub fn handle(&mut self, event: PairingEvent) -> Vec<PairingAction> {
        match event {
            PairingEvent::PinExchange(raw) => {
                // Orthogonal pseudo-state: does not touch the primary state.
                let pin = render_pin(&raw);
                info!("Pairing PIN = {}", pin);
                vec![PairingAction::DisplayPin(pin)]
            }
            PairingEvent::Succeeded => match self.state {
                PairingState::AwaitingResult => {
                    info!("Pairing successful, connecting with the new credentials");
                    self.state = PairingState::Succeeded;
                    vec![
                        PairingAction::DisableListener,
                        PairingAction::ConnectWithSavedCredentials,
                    ]
                }
                _ => {
                    warn!("Pairing success notification in state {:?}", self.state);
                    Vec::new()
                }
            },
            PairingEvent::Failed | PairingEvent::TimedOut => match self.state {
                PairingState::AwaitingResult | PairingState::Enabling => {
                    let what = if event == PairingEvent::Failed {
                        "failed"
                    } else {
                        "timed out"
                    };
                    self.retries += 1;
                    info!("Pairing {}, retrying (attempt {})", what, self.retries);
                    // No backoff and no retry cap: re-enable immediately.
                    self.state = PairingState::Enabling;
                    vec![PairingAction::DisableListener, PairingAction::EnableListener]
                }
                _ => {
                    warn!("Pairing failure notification in state {:?}", self.state);
                    Vec::new()
                }
            },
        }
    }
}

/// Render the raw 8-byte PIN buffer as an operator-readable string.
fn render_pin(raw: &[u8; PAIRING_PIN_LEN]) -> String {
    raw.iter().map(|b| char::from(*b)).collect()
}
