//! NVS persistence for network credentials.
//!
//! Credentials obtained through pairing (or flashed manually) live in the
//! ESP32's Non-Volatile Storage so they survive reboots. The serialized
//! form is defined by [`Credentials`] itself and host-tested there.

use crate::radio::{Credentials, MAX_PASSWORD_LEN, MAX_SSID_LEN};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use esp_idf_sys::EspError;

/// NVS namespace for connectivity configuration.
const NVS_NAMESPACE: &str = "lamp_net";

/// NVS key for stored credentials.
const NVS_KEY: &str = "credentials";

/// Serialized form upper bound: two length bytes plus maximum SSID and
/// password, with a small margin.
const MAX_CREDENTIALS_BUFFER: usize = 1 + MAX_SSID_LEN + 1 + MAX_PASSWORD_LEN + 4;

/// Open the credential namespace.
pub fn init_nvs() -> Result<EspNvs<NvsDefault>, EspError> {
    let partition = EspNvsPartition::<NvsDefault>::take()?;
    EspNvs::new(partition, NVS_NAMESPACE, true)
}

/// Load stored credentials. `None` when nothing is stored or the blob is
/// corrupted.
pub fn load_credentials(nvs: &EspNvs<NvsDefault>) -> Option<Credentials> {
    let mut buf = [0u8; MAX_CREDENTIALS_BUFFER];
    let bytes = nvs.get_raw(NVS_KEY, &mut buf).ok()??;
    Credentials::from_bytes(bytes).ok()
}

/// Persist credentials.
pub fn save_credentials(
    nvs: &mut EspNvs<NvsDefault>,
    credentials: &Credentials,
) -> Result<(), EspError> {
    nvs.set_raw(NVS_KEY, &credentials.to_bytes())?;
    Ok(())
}

/// Forget stored credentials.
pub fn clear_credentials(nvs: &mut EspNvs<NvsDefault>) -> Result<(), EspError> {
    nvs.remove(NVS_KEY)?;
    Ok(())
}
