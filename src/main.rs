//! CeilingLamp connectivity firmware binary.

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();

    // Route the log crate through the ESP-IDF logger
    esp_idf_svc::log::EspLogger::initialize_default();

    if let Err(e) = esp32_main::run() {
        log::error!("Connectivity supervisor stopped: {}", e);
    }
}

#[cfg(feature = "esp32")]
mod esp32_main {
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use lampnet_esp32::events::{EventDispatcher, EventRouter, RoutedOutcome};
    use lampnet_esp32::pairing::{DeviceIdentity, PairingStateMachine};
    use lampnet_esp32::platform::{wire_events, EspRadio, EspTimeSource, EspWpsControl};
    use lampnet_esp32::retry::{CancelToken, ThreadSleeper};
    use lampnet_esp32::supervisor::{ConnectError, ConnectionSupervisor};
    use lampnet_esp32::timesync::{SharedClock, TimeSyncChain};
    use lampnet_esp32::timezone::EuropeanTzRule;
    use log::{info, warn};
    use std::error::Error;
    use std::time::Duration;

    const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

    pub fn run() -> Result<(), Box<dyn Error>> {
        info!("CeilingLamp connectivity supervisor starting");

        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;

        let identity = DeviceIdentity::default();
        let radio = EspRadio::new(peripherals.modem, sysloop.clone(), &identity.device_name)?;
        info!("Hostname: {}", radio.hostname());

        let cancel = CancelToken::new();
        let mut supervisor = ConnectionSupervisor::new(radio, ThreadSleeper, cancel.clone());
        let mut listener = EspWpsControl;
        let mut pairing = PairingStateMachine::new(identity);

        let (sender, dispatcher) = EventDispatcher::new();
        let _wiring = wire_events(&sysloop, sender)?;

        let clock = SharedClock::new();
        let chain = TimeSyncChain::default();
        let rule = EuropeanTzRule::berlin();
        let mut time_source = EspTimeSource::new();

        let sync_clock = |supervisor: &ConnectionSupervisor<_, _>,
                              time_source: &mut EspTimeSource| {
            let gateway = supervisor.association_info().ok().map(|i| i.gateway);
            if let Err(e) = chain.run_and_apply(
                time_source,
                gateway,
                &clock,
                &rule,
                &ThreadSleeper,
                &cancel,
            ) {
                warn!("Clock left unsynchronized: {}", e);
            }
        };

        // Startup: saved credentials first, pairing as the fallback.
        match supervisor.establish() {
            Ok(()) => sync_clock(&supervisor, &mut time_source),
            Err(ConnectError::NeedsPairing) => {
                let mut router = EventRouter {
                    supervisor: &mut supervisor,
                    listener: &mut listener,
                    pairing: &mut pairing,
                };
                router.start_pairing();
            }
            Err(e) => return Err(Box::new(e)),
        }

        // Cooperative loop: drain notifications and react.
        loop {
            let Some(event) = dispatcher.poll(EVENT_POLL_INTERVAL) else {
                continue;
            };
            let outcome = {
                let mut router = EventRouter {
                    supervisor: &mut supervisor,
                    listener: &mut listener,
                    pairing: &mut pairing,
                };
                router.route(event)
            };
            match outcome {
                RoutedOutcome::PairingComplete => {
                    sync_clock(&supervisor, &mut time_source);
                }
                RoutedOutcome::PairingAssociationFailed => {
                    warn!("Pairing session ended without a usable connection");
                }
                _ => {}
            }
        }
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo test' for host-side testing of the supervisor logic.");
}
