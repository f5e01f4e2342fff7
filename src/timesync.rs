//! Time synchronization over a prioritized source chain.
//!
//! Unlike AP selection there is no quality signal to rank time sources by,
//! so the chain is a strict ordered fallback: primary host, secondary host,
//! the local gateway, then a fixed fallback IP. Every tier except the last
//! gets a single attempt; the last tier is retried a few times with a pause
//! before the whole chain is declared exhausted.
//!
//! A successful sync anchors the process-wide [`SharedClock`]; exhaustion
//! leaves whatever the clock held before (likely the boot default), which
//! callers must treat as "no reliable wall clock".

use crate::retry::{CancelToken, Sleeper};
use crate::timezone::TimezoneRule;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{info, warn};
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Primary time server (PTB, Germany).
pub const DEFAULT_PRIMARY_HOST: &str = "ptbtime1.ptb.de";

/// Secondary time server (German NTP pool).
pub const DEFAULT_SECONDARY_HOST: &str = "de.pool.ntp.org";

/// Last-resort fallback (Google public NTP, IP literal so it works without
/// DNS).
pub const DEFAULT_FALLBACK_IP: &str = "216.239.35.0";

/// Attempts on the final tier before giving up entirely.
pub const FINAL_TIER_ATTEMPTS: u32 = 5;

/// Pause between final-tier attempts.
pub const FINAL_TIER_PAUSE: Duration = Duration::from_secs(2);

/// Client for one network time source at a time.
pub trait TimeSource {
    /// Point the client at a new server (hostname or IP literal).
    fn set_server(&mut self, host: &str);

    /// Force a synchronous update. Returns the server-provided UTC epoch
    /// seconds on success.
    fn force_update(&mut self) -> Result<u64, TimeSourceError>;
}

/// A single time-source attempt that did not produce a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSourceError {
    /// The server did not answer (DNS failure, no route, dropped packets).
    Unreachable,
    /// The server answered with something unusable.
    Protocol(String),
}

impl fmt::Display for TimeSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "time server unreachable"),
            Self::Protocol(e) => write!(f, "time protocol error: {}", e),
        }
    }
}

impl std::error::Error for TimeSourceError {}

/// Whole-chain failure. Individual tier failures are only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSyncError {
    /// Every tier failed, including all final-tier retries.
    Exhausted,
    /// The cancel token fired during the final-tier retry loop.
    Cancelled,
}

impl fmt::Display for TimeSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "time synchronization failed after all attempts"),
            Self::Cancelled => write!(f, "time synchronization cancelled"),
        }
    }
}

impl std::error::Error for TimeSyncError {}

/// Result of a successful sync: the server-provided UTC epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncedClock {
    pub epoch_secs: u64,
}

/// Static time-source configuration, read-only at run time.
#[derive(Debug, Clone)]
pub struct TimeSyncConfig {
    pub primary: String,
    pub secondary: String,
    pub fallback_ip: String,
    pub final_attempts: u32,
    pub final_pause: Duration,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            primary: DEFAULT_PRIMARY_HOST.to_string(),
            secondary: DEFAULT_SECONDARY_HOST.to_string(),
            fallback_ip: DEFAULT_FALLBACK_IP.to_string(),
            final_attempts: FINAL_TIER_ATTEMPTS,
            final_pause: FINAL_TIER_PAUSE,
        }
    }
}

/// Ordered time-source fallback runner.
#[derive(Debug, Clone, Default)]
pub struct TimeSyncChain {
    config: TimeSyncConfig,
}

impl TimeSyncChain {
    pub fn new(config: TimeSyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TimeSyncConfig {
        &self.config
    }

    /// Try the chain strictly in order and return the first timestamp.
    ///
    /// `gateway` is the local network gateway of the active association,
    /// tried as the third tier when known (home routers often serve time).
    pub fn run<T, S>(
        &self,
        source: &mut T,
        gateway: Option<IpAddr>,
        sleeper: &S,
        cancel: &CancelToken,
    ) -> Result<SyncedClock, TimeSyncError>
    where
        T: TimeSource,
        S: Sleeper,
    {
        info!("--- Time synchronization ---");

        if let Some(epoch) = attempt(source, &self.config.primary, "1 (primary)") {
            return Ok(SyncedClock { epoch_secs: epoch });
        }
        if let Some(epoch) = attempt(source, &self.config.secondary, "2 (secondary)") {
            return Ok(SyncedClock { epoch_secs: epoch });
        }
        match gateway {
            Some(gw) => {
                if let Some(epoch) = attempt(source, &gw.to_string(), "3 (gateway)") {
                    return Ok(SyncedClock { epoch_secs: epoch });
                }
            }
            None => info!("Sync attempt 3 (gateway) skipped: gateway unknown"),
        }

        // Final tier: bounded retries with a pause between attempts.
        for attempt_no in 1..=self.config.final_attempts {
            if cancel.is_cancelled() {
                return Err(TimeSyncError::Cancelled);
            }
            let label = format!("4 (fallback IP), try {}", attempt_no);
            if let Some(epoch) = attempt(source, &self.config.fallback_ip, &label) {
                return Ok(SyncedClock { epoch_secs: epoch });
            }
            if attempt_no < self.config.final_attempts {
                sleeper.sleep(self.config.final_pause);
            }
        }

        warn!("Time synchronization failed after all attempts");
        Err(TimeSyncError::Exhausted)
    }

    /// Run the chain and, on success, anchor `clock` and log the moment in
    /// UTC and local time.
    pub fn run_and_apply<T, S>(
        &self,
        source: &mut T,
        gateway: Option<IpAddr>,
        clock: &SharedClock,
        rule: &dyn TimezoneRule,
        sleeper: &S,
        cancel: &CancelToken,
    ) -> Result<SyncedClock, TimeSyncError>
    where
        T: TimeSource,
        S: Sleeper,
    {
        let synced = self.run(source, gateway, sleeper, cancel)?;
        clock.apply(synced);
        if let Some(utc) = clock.utc_now() {
            info!("UTC time: {}", utc.format("%Y-%m-%d %H:%M:%S"));
            let marker = if rule.is_dst(utc) { "(DST)" } else { "(Standard)" };
            info!(
                "Local time: {} {}",
                rule.to_local(utc).format("%Y-%m-%d %H:%M:%S"),
                marker
            );
        }
        Ok(synced)
    }
}

/// One attempt against one server. Failures are logged, not propagated.
fn attempt<T: TimeSource>(source: &mut T, host: &str, label: &str) -> Option<u64> {
    info!("Sync attempt {}: {}", label, host);
    source.set_server(host);
    match source.force_update() {
        Ok(epoch) => {
            info!("  > success, epoch {}", epoch);
            Some(epoch)
        }
        Err(e) => {
            info!("  > attempt {} failed: {}", label, e);
            None
        }
    }
}

/// Process-wide wall clock, anchored by the last successful sync.
///
/// The anchor pairs the server epoch with a monotonic instant, so reads
/// advance with elapsed time. Set once per successful sync, overwritten by
/// the next one, never torn down.
#[derive(Debug, Clone, Default)]
pub struct SharedClock {
    anchor: Arc<Mutex<Option<ClockAnchor>>>,
}

#[derive(Debug, Clone, Copy)]
struct ClockAnchor {
    epoch_secs: u64,
    anchored_at: Instant,
}

impl SharedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchor the clock to a fresh sync result.
    pub fn apply(&self, synced: SyncedClock) {
        let mut anchor = self.anchor.lock().unwrap();
        *anchor = Some(ClockAnchor {
            epoch_secs: synced.epoch_secs,
            anchored_at: Instant::now(),
        });
    }

    /// Whether any sync has ever succeeded.
    pub fn is_synced(&self) -> bool {
        self.anchor.lock().unwrap().is_some()
    }

    /// Current UTC time, or `None` while no sync has succeeded.
    pub fn utc_now(&self) -> Option<DateTime<Utc>> {
        let anchor = self.anchor.lock().unwrap();
        anchor.map(|a| {
            let secs = a.epoch_secs + a.anchored_at.elapsed().as_secs();
            DateTime::<Utc>::from_timestamp(secs as i64, 0)
                .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
        })
    }

    /// Current local time and DST flag under the given rule, or `None`
    /// while no sync has succeeded.
    pub fn local_now(&self, rule: &dyn TimezoneRule) -> Option<(NaiveDateTime, bool)> {
        self.utc_now().map(|utc| (rule.to_local(utc), rule.is_dst(utc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::test_support::{init_test_logging, RecordingSleeper};
    use crate::timezone::EuropeanTzRule;
    use std::net::Ipv4Addr;

    /// Scripted time source: answers each `force_update` from a queue and
    /// records which server was configured for each attempt.
    struct ScriptedSource {
        script: Vec<Result<u64, TimeSourceError>>,
        servers: Vec<String>,
        current: String,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<u64, TimeSourceError>>) -> Self {
            Self {
                script,
                servers: Vec::new(),
                current: String::new(),
            }
        }
    }

    impl TimeSource for ScriptedSource {
        fn set_server(&mut self, host: &str) {
            self.current = host.to_string();
        }

        fn force_update(&mut self) -> Result<u64, TimeSourceError> {
            self.servers.push(self.current.clone());
            if self.script.is_empty() {
                Err(TimeSourceError::Unreachable)
            } else {
                self.script.remove(0)
            }
        }
    }

    fn gateway() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))
    }

    #[test]
    fn test_primary_success_stops_chain() {
        let chain = TimeSyncChain::default();
        let mut source = ScriptedSource::new(vec![Ok(1_700_000_000)]);
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();

        let synced = chain
            .run(&mut source, Some(gateway()), &&sleeper, &cancel)
            .unwrap();
        assert_eq!(synced.epoch_secs, 1_700_000_000);
        assert_eq!(source.servers, vec![DEFAULT_PRIMARY_HOST.to_string()]);
        assert_eq!(sleeper.sleep_count(), 0);
    }

    #[test]
    fn test_tiers_tried_in_configured_order() {
        let chain = TimeSyncChain::default();
        let mut source = ScriptedSource::new(vec![
            Err(TimeSourceError::Unreachable),
            Err(TimeSourceError::Unreachable),
            Err(TimeSourceError::Unreachable),
            Ok(1_700_000_000),
        ]);
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();

        chain
            .run(&mut source, Some(gateway()), &&sleeper, &cancel)
            .unwrap();
        assert_eq!(
            source.servers,
            vec![
                DEFAULT_PRIMARY_HOST.to_string(),
                DEFAULT_SECONDARY_HOST.to_string(),
                "192.168.1.1".to_string(),
                DEFAULT_FALLBACK_IP.to_string(),
            ]
        );
    }

    #[test]
    fn test_gateway_success_sets_clock() {
        // Primary and secondary fail, gateway answers with a known epoch:
        // the clock must be anchored and no failure surfaced.
        let chain = TimeSyncChain::default();
        let mut source = ScriptedSource::new(vec![
            Err(TimeSourceError::Unreachable),
            Err(TimeSourceError::Unreachable),
            Ok(1_700_000_000),
        ]);
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();
        let clock = SharedClock::new();
        let rule = EuropeanTzRule::berlin();

        let synced = chain
            .run_and_apply(
                &mut source,
                Some(gateway()),
                &clock,
                &rule,
                &&sleeper,
                &cancel,
            )
            .unwrap();
        assert_eq!(synced.epoch_secs, 1_700_000_000);
        assert!(clock.is_synced());
        let utc = clock.utc_now().unwrap();
        assert!(utc.timestamp() >= 1_700_000_000);
    }

    #[test]
    fn test_gateway_skipped_when_unknown() {
        let chain = TimeSyncChain::default();
        let mut source = ScriptedSource::new(vec![
            Err(TimeSourceError::Unreachable),
            Err(TimeSourceError::Unreachable),
            Ok(1_700_000_000),
        ]);
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();

        chain.run(&mut source, None, &&sleeper, &cancel).unwrap();
        // Third attempt goes straight to the fallback IP.
        assert_eq!(source.servers[2], DEFAULT_FALLBACK_IP);
    }

    #[test]
    fn test_total_exhaustion_reports_failure() {
        // All tiers fail on every attempt. Exactly 3 single-shot tiers plus
        // 5 final-tier attempts, with a pause between final attempts only.
        init_test_logging();
        let chain = TimeSyncChain::default();
        let mut source = ScriptedSource::new(Vec::new());
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();
        let clock = SharedClock::new();
        let rule = EuropeanTzRule::berlin();

        let result = chain.run_and_apply(
            &mut source,
            Some(gateway()),
            &clock,
            &rule,
            &&sleeper,
            &cancel,
        );
        assert_eq!(result, Err(TimeSyncError::Exhausted));
        assert_eq!(source.servers.len(), 3 + FINAL_TIER_ATTEMPTS as usize);
        assert_eq!(sleeper.sleep_count(), FINAL_TIER_ATTEMPTS as usize - 1);
        assert!(sleeper.sleeps().iter().all(|d| *d == FINAL_TIER_PAUSE));
        // Clock untouched.
        assert!(!clock.is_synced());
        assert_eq!(clock.utc_now(), None);
    }

    #[test]
    fn test_final_tier_success_on_last_attempt() {
        let chain = TimeSyncChain::default();
        let mut script = vec![Err(TimeSourceError::Unreachable); 3 + 4];
        script.push(Ok(1_700_000_000));
        let mut source = ScriptedSource::new(script);
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();

        let synced = chain
            .run(&mut source, Some(gateway()), &&sleeper, &cancel)
            .unwrap();
        assert_eq!(synced.epoch_secs, 1_700_000_000);
        assert_eq!(source.servers.len(), 8);
    }

    #[test]
    fn test_cancel_during_final_tier() {
        let chain = TimeSyncChain::default();
        let mut source = ScriptedSource::new(Vec::new());
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        // Single-shot tiers still run (they are synchronous one-offs); the
        // retry loop honors the token before its first attempt.
        let result = chain.run(&mut source, None, &&sleeper, &cancel);
        assert_eq!(result, Err(TimeSyncError::Cancelled));
    }

    #[test]
    fn test_shared_clock_resync_overwrites() {
        let clock = SharedClock::new();
        clock.apply(SyncedClock {
            epoch_secs: 1_600_000_000,
        });
        clock.apply(SyncedClock {
            epoch_secs: 1_700_000_000,
        });
        assert!(clock.utc_now().unwrap().timestamp() >= 1_700_000_000);
    }

    #[test]
    fn test_shared_clock_local_conversion() {
        let clock = SharedClock::new();
        clock.apply(SyncedClock {
            epoch_secs: 1_700_000_000,
        });
        let rule = EuropeanTzRule::berlin();
        let (local, dst) = clock.local_now(&rule).unwrap();
        // November: standard time, UTC+1.
        assert!(!dst);
        let utc = clock.utc_now().unwrap();
        assert_eq!(local, rule.to_local(utc));
    }

    #[test]
    fn test_shared_clock_unsynced_reads_none() {
        let clock = SharedClock::new();
        let rule = EuropeanTzRule::berlin();
        assert_eq!(clock.utc_now(), None);
        assert_eq!(clock.local_now(&rule), None);
    }
}
