//! Connection supervisor: establish and maintain one wireless association.
//!
//! The supervisor owns the radio and the connection state. `establish` runs
//! the startup sequence: saved-credential association under a bounded retry
//! budget, then an opportunistic rescan to see whether a stronger AP for the
//! same SSID is worth migrating to. When saved credentials fail it signals
//! `NeedsPairing` and the caller wires up the pairing machinery; link drops
//! after that are handled by the event dispatcher, not here.

use crate::ap::{select_ap, ApCatalog, CurrentAssociation, SelectError, Selection};
use crate::radio::{AssociateTarget, AssociationInfo, Radio, RadioError};
use crate::retry::{poll_until, CancelToken, PollOutcome, Sleeper};
use log::{info, warn};
use std::fmt;
use std::time::Duration;

/// Attempts polling the link-status flag per association.
pub const LINK_POLL_ATTEMPTS: u32 = 40;

/// Interval between link-status polls. 40 x 500 ms is roughly a 20 s
/// association budget.
pub const LINK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Where the supervisor stands. Transitions happen only inside the
/// supervisor; everyone else reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    ConnectingSaved,
    Connected,
    ScanningForBetter,
    Reconnecting,
}

/// Failures surfaced by the supervisor.
#[derive(Debug)]
pub enum ConnectError {
    /// No usable saved credentials; the caller should start pairing.
    NeedsPairing,
    /// The bounded retry budget ran out while waiting for the link.
    AssociationTimeout,
    /// The cancel token fired mid-wait.
    Cancelled,
    /// The driver failed outright.
    Radio(RadioError),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeedsPairing => write!(f, "no usable saved credentials, pairing required"),
            Self::AssociationTimeout => write!(f, "association retry budget exhausted"),
            Self::Cancelled => write!(f, "connection attempt cancelled"),
            Self::Radio(e) => write!(f, "radio error: {}", e),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Radio(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RadioError> for ConnectError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

/// Top-level connectivity orchestrator. One radio, one association, one
/// supervisor per process.
pub struct ConnectionSupervisor<R: Radio, S: Sleeper> {
    radio: R,
    sleeper: S,
    cancel: CancelToken,
    state: ConnectionState,
}

impl<R: Radio, S: Sleeper> ConnectionSupervisor<R, S> {
    pub fn new(radio: R, sleeper: S, cancel: CancelToken) -> Self {
        Self {
            radio,
            sleeper,
            cancel,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// SSID, signal and addresses of the active association.
    pub fn association_info(&self) -> Result<AssociationInfo, RadioError> {
        self.radio.association_info()
    }

    /// Establish connectivity at startup. Idempotent to call once.
    ///
    /// Tries saved credentials first; on success runs the better-AP check
    /// and returns `Ok`. When no credentials exist or the retry budget runs
    /// out, returns `NeedsPairing` and leaves pairing to the caller.
    pub fn establish(&mut self) -> Result<(), ConnectError> {
        info!("Attempting to connect with saved credentials");
        self.state = ConnectionState::ConnectingSaved;

        if let Err(e) = self.radio.associate_saved() {
            warn!("Saved-credential association not started: {}", e);
            self.state = ConnectionState::Disconnected;
            return Err(ConnectError::NeedsPairing);
        }

        match self.wait_for_link() {
            PollOutcome::Ready => {}
            PollOutcome::Cancelled => {
                self.state = ConnectionState::Disconnected;
                return Err(ConnectError::Cancelled);
            }
            PollOutcome::Exhausted => {
                info!("No saved credentials or connection failed");
                self.state = ConnectionState::Disconnected;
                return Err(ConnectError::NeedsPairing);
            }
        }

        self.state = ConnectionState::Connected;
        match self.radio.association_info() {
            Ok(info) => {
                info!("Connected to saved network: {}", info.ssid);
                self.rescan_for_better(&info);
            }
            Err(e) => warn!("Connected but association info unavailable: {}", e),
        }

        if self.state == ConnectionState::Connected {
            self.log_addresses();
        }
        Ok(())
    }

    /// After a reported pairing success, associate with the now-persisted
    /// credentials under the usual budget.
    pub fn complete_pairing(&mut self) -> Result<(), ConnectError> {
        self.state = ConnectionState::ConnectingSaved;
        self.radio.associate_saved()?;
        match self.wait_for_link() {
            PollOutcome::Ready => {
                self.state = ConnectionState::Connected;
                info!("Pairing connection established; credentials persisted for future use");
                self.log_addresses();
                Ok(())
            }
            PollOutcome::Cancelled => {
                self.state = ConnectionState::Disconnected;
                Err(ConnectError::Cancelled)
            }
            PollOutcome::Exhausted => {
                self.state = ConnectionState::Disconnected;
                Err(ConnectError::AssociationTimeout)
            }
        }
    }

    /// Unconditional reconnect request after a link drop. No ranking.
    pub fn request_reconnect(&mut self) {
        info!("Link lost, requesting reconnect");
        self.state = ConnectionState::Reconnecting;
        self.radio.request_reconnect();
    }

    /// Scan for a stronger AP on the connected SSID and migrate if the gain
    /// clears the hysteresis margin. Failures here never undo `establish`'s
    /// success result; a failed migration does leave the link down (see the
    /// warning below).
    fn rescan_for_better(&mut self, current: &AssociationInfo) {
        info!("Scanning for potentially better access points");
        self.state = ConnectionState::ScanningForBetter;

        let scan = match self.radio.scan() {
            Ok(scan) => scan,
            Err(e) => {
                warn!("Rescan failed: {}", e);
                self.state = ConnectionState::Connected;
                return;
            }
        };

        let catalog = match ApCatalog::from_scan(&scan, &current.ssid) {
            Ok(catalog) => catalog,
            Err(SelectError::NoMatchingNetwork { ssid }) => {
                // Odd but non-fatal: we are associated, the rescan just
                // missed the AP beacon.
                warn!("Rescan saw no AP for {:?}", ssid);
                self.state = ConnectionState::Connected;
                return;
            }
        };

        let association = CurrentAssociation {
            bssid: current.bssid,
            rssi_dbm: current.rssi_dbm,
        };
        catalog.log_candidates(Some(&association));

        let target = match select_ap(&catalog, Some(association)) {
            Selection::Stay => {
                info!("Already connected to the best available AP");
                self.state = ConnectionState::Connected;
                return;
            }
            Selection::Migrate(record) => record,
        };

        let credentials = match self.radio.saved_credentials() {
            Some(creds) => creds,
            None => {
                warn!("Better AP found but no stored credentials to migrate with");
                self.state = ConnectionState::Connected;
                return;
            }
        };

        info!(
            "Found better AP {} with {} dBm stronger signal, reconnecting",
            target.bssid,
            target.rssi_dbm - current.rssi_dbm
        );

        if let Err(e) = self.radio.disassociate() {
            warn!("Disassociate before migration failed: {}", e);
            self.state = ConnectionState::Connected;
            return;
        }
        self.state = ConnectionState::Reconnecting;

        let request = AssociateTarget {
            credentials,
            bssid: target.bssid,
            channel: target.channel,
        };
        if let Err(e) = self.radio.associate_target(&request) {
            warn!("Migration association not started: {}", e);
            self.state = ConnectionState::Disconnected;
            return;
        }

        match self.wait_for_link() {
            PollOutcome::Ready => {
                info!(
                    "Reconnected to better AP: {} ({} dBm)",
                    target.bssid, target.rssi_dbm
                );
                self.state = ConnectionState::Connected;
            }
            _ => {
                // A working association was traded for nothing here. Kept
                // as the original behaves; the link-down event path is the
                // recovery route.
                warn!("Migration to {} failed, link is down", target.bssid);
                self.state = ConnectionState::Disconnected;
            }
        }
    }

    /// One bounded link wait: poll the status flag, sleep, repeat.
    fn wait_for_link(&mut self) -> PollOutcome {
        let radio = &self.radio;
        poll_until(
            LINK_POLL_ATTEMPTS,
            LINK_POLL_INTERVAL,
            &self.sleeper,
            &self.cancel,
            || radio.is_link_up(),
        )
    }

    fn log_addresses(&self) {
        if let Ok(info) = self.radio.association_info() {
            info!("IP address: {}", info.ip);
            info!("Gateway: {}", info.gateway);
            info!("DNS: {}", info.dns);
        }
    }
}
