//! CeilingLamp connectivity and time synchronization supervisor.
//!
//! This library contains the platform-independent decision logic: AP
//! ranking and migration, the pairing state machine, the connection
//! supervisor, the ordered time-source fallback chain, and the event
//! routing between them. Everything here runs in host tests; the ESP-IDF
//! driver glue lives behind the `esp32` feature in [`platform`].

pub mod ap;
pub mod events;
pub mod pairing;
#[cfg(feature = "esp32")]
pub mod platform;
pub mod radio;
pub mod retry;
pub mod supervisor;
pub mod timesync;
pub mod timezone;

// Re-export commonly used items
pub use ap::{select_ap, AccessPointRecord, ApCatalog, Bssid, CurrentAssociation, Selection};
pub use events::{EventDispatcher, EventRouter, EventSender, NetworkEvent, RoutedOutcome};
pub use pairing::{DeviceIdentity, PairingEvent, PairingState, PairingStateMachine};
pub use radio::{
    unique_hostname, AssociationInfo, Credentials, PairingListener, Radio, RadioError,
};
pub use retry::{CancelToken, Sleeper, ThreadSleeper};
pub use supervisor::{ConnectError, ConnectionState, ConnectionSupervisor};
pub use timesync::{SharedClock, SyncedClock, TimeSource, TimeSyncChain, TimeSyncError};
pub use timezone::{EuropeanTzRule, TimezoneRule};
