//! Radio stack seam: traits and shared types.
//!
//! The supervisor never talks to ESP-IDF directly. Everything it needs from
//! the radio and the pairing protocol goes through the traits here, so the
//! decision logic runs unchanged against the real driver (see the
//! `platform` module, `esp32` feature) and against mocks in host tests.

use crate::ap::{AccessPointRecord, Bssid};
use crate::pairing::DeviceIdentity;
use std::fmt;
use std::net::IpAddr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum WPA2 passphrase length.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Saved network credentials. Zeroed on drop; `Debug` redacts the
/// passphrase so it never reaches the log sink.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let creds = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        creds.validate()?;
        Ok(creds)
    }

    pub fn validate(&self) -> Result<(), CredentialsError> {
        if self.ssid.is_empty() {
            return Err(CredentialsError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(CredentialsError::SsidTooLong(self.ssid.len()));
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(CredentialsError::PasswordTooLong(self.password.len()));
        }
        Ok(())
    }

    /// Serialize for the platform credential store.
    ///
    /// Format: `[ssid_len:1][ssid:N][password_len:1][password:M]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + self.ssid.len() + self.password.len());
        bytes.push(self.ssid.len() as u8);
        bytes.extend_from_slice(self.ssid.as_bytes());
        bytes.push(self.password.len() as u8);
        bytes.extend_from_slice(self.password.as_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CredentialsError> {
        if bytes.is_empty() {
            return Err(CredentialsError::InvalidStoredForm("empty data"));
        }
        let ssid_len = bytes[0] as usize;
        if bytes.len() < 1 + ssid_len + 1 {
            return Err(CredentialsError::InvalidStoredForm("truncated SSID"));
        }
        let ssid = String::from_utf8(bytes[1..1 + ssid_len].to_vec())
            .map_err(|_| CredentialsError::InvalidStoredForm("SSID not UTF-8"))?;
        let password_len = bytes[1 + ssid_len] as usize;
        let start = 2 + ssid_len;
        if bytes.len() < start + password_len {
            return Err(CredentialsError::InvalidStoredForm("truncated password"));
        }
        let password = String::from_utf8(bytes[start..start + password_len].to_vec())
            .map_err(|_| CredentialsError::InvalidStoredForm("password not UTF-8"))?;
        Self::new(ssid, password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Invalid credentials or corrupted credential-store data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsError {
    SsidEmpty,
    SsidTooLong(usize),
    PasswordTooLong(usize),
    InvalidStoredForm(&'static str),
}

impl fmt::Display for CredentialsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong(len) => {
                write!(f, "SSID too long: {} bytes (max {})", len, MAX_SSID_LEN)
            }
            Self::PasswordTooLong(len) => write!(
                f,
                "password too long: {} bytes (max {})",
                len, MAX_PASSWORD_LEN
            ),
            Self::InvalidStoredForm(msg) => write!(f, "invalid stored credentials: {}", msg),
        }
    }
}

impl std::error::Error for CredentialsError {}

/// A specific AP to associate with: SSID plus explicit BSSID and channel,
/// used for migration so the driver does not pick an arbitrary AP again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociateTarget {
    pub credentials: Credentials,
    pub bssid: Bssid,
    pub channel: u8,
}

/// Details of the active association, for display and for the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationInfo {
    pub ssid: String,
    pub bssid: Bssid,
    pub rssi_dbm: i32,
    pub ip: IpAddr,
    pub gateway: IpAddr,
    pub dns: IpAddr,
}

/// Errors surfaced by the radio driver.
#[derive(Debug)]
pub enum RadioError {
    /// The scan could not be started or completed.
    ScanFailed(String),
    /// No credentials exist in the platform credential store.
    NoSavedCredentials,
    /// The driver rejected the association request outright.
    AssociateFailed(String),
    /// An operation that needs an active association found none.
    NotAssociated,
    /// Any other driver-level failure.
    Driver(String),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScanFailed(e) => write!(f, "scan failed: {}", e),
            Self::NoSavedCredentials => write!(f, "no saved credentials"),
            Self::AssociateFailed(e) => write!(f, "association failed: {}", e),
            Self::NotAssociated => write!(f, "not associated"),
            Self::Driver(e) => write!(f, "radio driver error: {}", e),
        }
    }
}

impl std::error::Error for RadioError {}

/// One radio, one association. Associate calls start an attempt; completion
/// is observed by polling [`Radio::is_link_up`].
pub trait Radio {
    /// Scan for visible access points.
    fn scan(&mut self) -> Result<Vec<AccessPointRecord>, RadioError>;

    /// Begin association using whatever the credential store holds.
    fn associate_saved(&mut self) -> Result<(), RadioError>;

    /// Begin association with one explicit AP (BSSID and channel pinned).
    fn associate_target(&mut self, target: &AssociateTarget) -> Result<(), RadioError>;

    /// Drop the current association.
    fn disassociate(&mut self) -> Result<(), RadioError>;

    /// Link-status flag polled by the bounded retry loops.
    fn is_link_up(&self) -> bool;

    /// SSID, signal and addresses of the active association.
    fn association_info(&self) -> Result<AssociationInfo, RadioError>;

    /// Credentials currently held by the platform credential store.
    fn saved_credentials(&self) -> Option<Credentials>;

    /// Ask the platform for its automatic reconnect after a link drop.
    /// No ranking is applied on this path.
    fn request_reconnect(&mut self);
}

/// Pairing-protocol listener control.
pub trait PairingListener {
    fn enable(&mut self, identity: &DeviceIdentity) -> Result<(), RadioError>;
    fn disable(&mut self) -> Result<(), RadioError>;
}

/// Hostname with the last two MAC octets appended, so several devices of
/// the same model stay distinguishable on one network
/// (e.g. `CeilingLamp_A1B2`). The platform announces this name over DHCP.
pub fn unique_hostname(base: &str, mac: &[u8; 6]) -> String {
    format!("{}_{:02X}{:02X}", base, mac[4], mac[5])
}
