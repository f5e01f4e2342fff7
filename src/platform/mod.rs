//! ESP-IDF driver glue (`esp32` feature only).
//!
//! Implements the [`Radio`], [`PairingListener`] and [`TimeSource`] seams
//! on top of `esp-idf-svc`. Nothing in here makes connectivity decisions;
//! it translates between the supervisor's types and the driver.

pub mod storage;

use crate::ap::{AccessPointRecord, Bssid};
use crate::events::{EventSender, NetworkEvent};
use crate::pairing::{DeviceIdentity, PairingEvent, PAIRING_PIN_LEN};
use crate::radio::{
    unique_hostname, AssociateTarget, AssociationInfo, Credentials, PairingListener, Radio,
    RadioError,
};
use crate::timesync::{TimeSource, TimeSourceError};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::ipv4;
use esp_idf_svc::netif::{EspNetif, IpEvent, NetifConfiguration};
use esp_idf_svc::nvs::{EspNvs, NvsDefault};
use esp_idf_svc::sntp::{EspSntp, SntpConf, SyncStatus};
use esp_idf_svc::wifi::{
    AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi, WifiEvent,
};
use esp_idf_sys::EspError;
use log::{info, warn};
use std::net::IpAddr;
use std::time::Duration;

/// Attempts polling the SNTP sync status before a tier counts as failed.
const SNTP_POLL_ATTEMPTS: u32 = 10;
const SNTP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// ESP-IDF radio: one WiFi driver serving both the station role and the
/// WPS listener.
pub struct EspRadio<'a> {
    wifi: BlockingWifi<EspWifi<'a>>,
    nvs: EspNvs<NvsDefault>,
    hostname: String,
}

impl<'a> EspRadio<'a> {
    /// Bring up the WiFi driver with a unique hostname derived from
    /// `hostname_base` and the station MAC. The hostname is installed on
    /// the station netif before the driver starts, so DHCP announces it.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        hostname_base: &str,
    ) -> Result<Self, RadioError> {
        let mut esp_wifi = EspWifi::new(modem, sysloop.clone(), None).map_err(driver_err)?;
        let hostname = match esp_wifi.sta_netif().get_mac() {
            Ok(mac) => unique_hostname(hostname_base, &mac),
            Err(e) => {
                warn!("MAC unavailable ({}), using base hostname", e);
                hostname_base.to_string()
            }
        };
        esp_wifi
            .swap_netif_sta(Self::netif_with_hostname(&hostname)?)
            .map_err(driver_err)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop).map_err(driver_err)?;
        let nvs = storage::init_nvs().map_err(driver_err)?;
        Ok(Self {
            wifi,
            nvs,
            hostname,
        })
    }

    /// The hostname installed on the station interface.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    fn netif_with_hostname(hostname: &str) -> Result<EspNetif, RadioError> {
        let name = hostname
            .try_into()
            .map_err(|_| RadioError::Driver(format!("hostname too long: {}", hostname)))?;
        let conf = NetifConfiguration {
            ip_configuration: Some(ipv4::Configuration::Client(
                ipv4::ClientConfiguration::DHCP(ipv4::DHCPClientSettings {
                    hostname: Some(name),
                }),
            )),
            ..NetifConfiguration::wifi_default_client()
        };
        EspNetif::new_with_conf(&conf).map_err(driver_err)
    }

    fn configure_client(&mut self, config: ClientConfiguration) -> Result<(), RadioError> {
        self.wifi
            .set_configuration(&Configuration::Client(config))
            .map_err(driver_err)?;
        if !self.wifi.is_started().map_err(driver_err)? {
            self.wifi.start().map_err(driver_err)?;
        }
        self.wifi
            .connect()
            .map_err(|e| RadioError::AssociateFailed(format!("{:?}", e)))
    }

    fn client_config(creds: &Credentials) -> Result<ClientConfiguration, RadioError> {
        let auth_method = if creds.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        Ok(ClientConfiguration {
            ssid: creds
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| RadioError::AssociateFailed("invalid SSID".to_string()))?,
            password: creds
                .password
                .as_str()
                .try_into()
                .map_err(|_| RadioError::AssociateFailed("invalid password".to_string()))?,
            auth_method,
            ..Default::default()
        })
    }

    fn current_ap(&self) -> Result<(String, Bssid, i32), RadioError> {
        let mut record = esp_idf_sys::wifi_ap_record_t::default();
        esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut record) })
            .map_err(|_| RadioError::NotAssociated)?;
        let ssid_len = record.ssid.iter().position(|b| *b == 0).unwrap_or(32);
        let ssid = String::from_utf8_lossy(&record.ssid[..ssid_len]).into_owned();
        Ok((ssid, Bssid(record.bssid), record.rssi as i32))
    }
}

impl<'a> Radio for EspRadio<'a> {
    fn scan(&mut self) -> Result<Vec<AccessPointRecord>, RadioError> {
        let found = self
            .wifi
            .scan()
            .map_err(|e| RadioError::ScanFailed(format!("{:?}", e)))?;
        Ok(found
            .into_iter()
            .map(|ap| AccessPointRecord {
                ssid: ap.ssid.to_string(),
                bssid: Bssid(ap.bssid),
                rssi_dbm: ap.signal_strength as i32,
                channel: ap.channel,
            })
            .collect())
    }

    fn associate_saved(&mut self) -> Result<(), RadioError> {
        let creds = self
            .saved_credentials()
            .ok_or(RadioError::NoSavedCredentials)?;
        info!("Connecting to saved network: {}", creds.ssid);
        let config = Self::client_config(&creds)?;
        self.configure_client(config)
    }

    fn associate_target(&mut self, target: &AssociateTarget) -> Result<(), RadioError> {
        info!(
            "Connecting to {} on channel {} (pinned BSSID)",
            target.bssid, target.channel
        );
        let mut config = Self::client_config(&target.credentials)?;
        config.bssid = Some(target.bssid.octets());
        config.channel = Some(target.channel);
        self.configure_client(config)
    }

    fn disassociate(&mut self) -> Result<(), RadioError> {
        self.wifi.disconnect().map_err(driver_err)
    }

    fn is_link_up(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
            && self.wifi.wifi().sta_netif().is_up().unwrap_or(false)
    }

    fn association_info(&self) -> Result<AssociationInfo, RadioError> {
        let (ssid, bssid, rssi_dbm) = self.current_ap()?;
        let ip_info = self
            .wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .map_err(driver_err)?;
        let dns = ip_info.dns.unwrap_or(ipv4::Ipv4Addr::UNSPECIFIED);
        Ok(AssociationInfo {
            ssid,
            bssid,
            rssi_dbm,
            ip: IpAddr::V4(ip_info.ip),
            gateway: IpAddr::V4(ip_info.subnet.gateway),
            dns: IpAddr::V4(dns),
        })
    }

    fn saved_credentials(&self) -> Option<Credentials> {
        storage::load_credentials(&self.nvs)
    }

    fn request_reconnect(&mut self) {
        // The driver re-runs the last association; ranking is not applied
        // on this path.
        if let Err(e) = self.wifi.wifi_mut().connect() {
            warn!("Reconnect request failed: {:?}", e);
        }
    }
}

/// WPS push-button listener, driven through the raw IDF calls so it can be
/// enabled and disabled independently of the radio handle the supervisor
/// owns. One WiFi driver serves both roles underneath.
#[derive(Debug, Default)]
pub struct EspWpsControl;

impl EspWpsControl {
    fn wps_config(identity: &DeviceIdentity) -> esp_idf_sys::esp_wps_config_t {
        let mut config = esp_idf_sys::esp_wps_config_t {
            wps_type: esp_idf_sys::wps_type_WPS_TYPE_PBC,
            ..Default::default()
        };
        copy_c_field(&mut config.factory_info.manufacturer, &identity.manufacturer);
        copy_c_field(&mut config.factory_info.model_number, &identity.model_number);
        copy_c_field(&mut config.factory_info.model_name, &identity.model_name);
        copy_c_field(&mut config.factory_info.device_name, &identity.device_name);
        // Unused in push-button mode but part of the advertised config.
        copy_c_field(&mut config.pin, "00000000");
        config
    }
}

impl PairingListener for EspWpsControl {
    fn enable(&mut self, identity: &DeviceIdentity) -> Result<(), RadioError> {
        let config = Self::wps_config(identity);
        esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_wifi_wps_enable(&config) })
            .map_err(driver_err)?;
        esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_wifi_wps_start(0) }).map_err(driver_err)
    }

    fn disable(&mut self) -> Result<(), RadioError> {
        esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_wifi_wps_disable() }).map_err(driver_err)
    }
}

/// Copy a UTF-8 string into a fixed-size NUL-terminated C char field.
fn copy_c_field(field: &mut [core::ffi::c_char], value: &str) {
    let limit = field.len().saturating_sub(1);
    for (slot, byte) in field.iter_mut().zip(value.bytes().take(limit)) {
        *slot = byte as core::ffi::c_char;
    }
    if let Some(last) = field.get_mut(value.len().min(limit)) {
        *last = 0;
    }
}

/// Live event-loop subscriptions. Dropping this stops the notification
/// flow, so the caller keeps it for the life of the control loop.
pub struct EventWiring {
    _wifi: EspSubscription<'static, System>,
    _ip: EspSubscription<'static, System>,
}

/// Subscribe to driver notifications and forward them into the event
/// queue. Link and pairing notifications arrive as WiFi events; the
/// got-IP notification comes through the IP stack separately.
pub fn wire_events(
    sysloop: &EspSystemEventLoop,
    sender: EventSender,
) -> Result<EventWiring, EspError> {
    let wifi_sender = sender.clone();
    let wifi = sysloop.subscribe::<WifiEvent, _>(move |event| {
        let mapped = match event {
            WifiEvent::StaStarted => Some(NetworkEvent::AssociationStarted),
            WifiEvent::StaDisconnected(_) => Some(NetworkEvent::Disassociated),
            WifiEvent::StaWpsSuccess(_) => Some(NetworkEvent::Pairing(PairingEvent::Succeeded)),
            WifiEvent::StaWpsFailed => Some(NetworkEvent::Pairing(PairingEvent::Failed)),
            WifiEvent::StaWpsTimeout => Some(NetworkEvent::Pairing(PairingEvent::TimedOut)),
            WifiEvent::StaWpsPin(pin) => Some(NetworkEvent::Pairing(PairingEvent::PinExchange(
                render_pin_digits(pin),
            ))),
            _ => None,
        };
        if let Some(event) = mapped {
            wifi_sender.post(event);
        }
    })?;
    let ip = sysloop.subscribe::<IpEvent, _>(move |event| {
        if let IpEvent::DhcpIpAssigned(assignment) = event {
            sender.post(NetworkEvent::AddressAcquired(IpAddr::V4(assignment.ip())));
        }
    })?;
    Ok(EventWiring { _wifi: wifi, _ip: ip })
}

/// The driver reports the WPS PIN as a number; the pairing protocol wants
/// the fixed 8-digit ASCII buffer.
fn render_pin_digits(pin: Option<u32>) -> [u8; PAIRING_PIN_LEN] {
    let digits = format!("{:08}", pin.unwrap_or(0));
    let mut buf = [b'0'; PAIRING_PIN_LEN];
    for (slot, byte) in buf.iter_mut().zip(digits.bytes()) {
        *slot = byte;
    }
    buf
}

/// SNTP-backed time source. Each `force_update` starts a fresh client for
/// the configured server and polls the sync status.
pub struct EspTimeSource {
    server: String,
}

impl EspTimeSource {
    pub fn new() -> Self {
        Self {
            server: String::new(),
        }
    }
}

impl Default for EspTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for EspTimeSource {
    fn set_server(&mut self, host: &str) {
        self.server = host.to_string();
    }

    fn force_update(&mut self) -> Result<u64, TimeSourceError> {
        let conf = SntpConf {
            servers: [self.server.as_str()],
            ..Default::default()
        };
        let sntp = EspSntp::new(&conf).map_err(|e| TimeSourceError::Protocol(format!("{:?}", e)))?;

        for _ in 0..SNTP_POLL_ATTEMPTS {
            if sntp.get_sync_status() == SyncStatus::Completed {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map_err(|e| TimeSourceError::Protocol(e.to_string()))?;
                return Ok(now.as_secs());
            }
            std::thread::sleep(SNTP_POLL_INTERVAL);
        }
        Err(TimeSourceError::Unreachable)
    }
}

fn driver_err(e: EspError) -> RadioError {
    RadioError::Driver(format!("{:?}", e))
}
