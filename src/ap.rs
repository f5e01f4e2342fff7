//! Access-point ranking and selection.
//!
//! When several access points advertise the same SSID (mesh or repeater
//! setups), the device should associate with the strongest one, but only
//! migrate away from a working association when the gain is worth the
//! reconnect. This module is pure decision logic and fully host-testable.
//!
//! # Algorithm
//!
//! 1. Filter a scan result down to observations matching the target SSID
//! 2. Sort descending by RSSI (stable, so scan order breaks ties)
//! 3. If not associated: pick the strongest candidate
//! 4. If associated: migrate only when the strongest candidate beats the
//!    current signal by more than the hysteresis margin

use std::fmt;
use std::str::FromStr;

/// Minimum RSSI improvement (dBm) before migrating off a working AP.
/// Prevents oscillation between access points of similar strength.
pub const MIGRATION_HYSTERESIS_DB: i32 = 10;

/// Hardware address of one access point, canonical colon-hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bssid(pub [u8; 6]);

impl Bssid {
    /// Raw octets, as the radio driver wants them.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for Bssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for Bssid {
    type Err = BssidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 {
                return Err(BssidParseError(s.to_string()));
            }
            octets[count] =
                u8::from_str_radix(part, 16).map_err(|_| BssidParseError(s.to_string()))?;
            count += 1;
        }
        if count != 6 {
            return Err(BssidParseError(s.to_string()));
        }
        Ok(Bssid(octets))
    }
}

/// A BSSID string that is not six colon-separated hex octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BssidParseError(pub String);

impl fmt::Display for BssidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid BSSID: {:?}", self.0)
    }
}

impl std::error::Error for BssidParseError {}

/// One access point observed during a scan. Immutable snapshot; discarded
/// once a connection decision is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointRecord {
    /// Advertised network name.
    pub ssid: String,
    /// Hardware address of this specific AP.
    pub bssid: Bssid,
    /// Signal strength in dBm (less negative is stronger).
    pub rssi_dbm: i32,
    /// Radio channel the AP transmits on.
    pub channel: u8,
}

/// Errors from catalog construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    /// The scan produced no observation for the target SSID.
    NoMatchingNetwork { ssid: String },
}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatchingNetwork { ssid } => {
                write!(f, "no access point found for SSID {:?}", ssid)
            }
        }
    }
}

impl std::error::Error for SelectError {}

/// Ranked candidate set for one SSID.
///
/// Invariant: every record shares the catalog SSID and the records are
/// sorted descending by RSSI, with scan order preserved on exact ties.
#[derive(Debug, Clone)]
pub struct ApCatalog {
    ssid: String,
    records: Vec<AccessPointRecord>,
}

impl ApCatalog {
    /// Filter a full scan result down to one SSID and rank by signal.
    pub fn from_scan(scan: &[AccessPointRecord], ssid: &str) -> Result<Self, SelectError> {
        let mut records: Vec<AccessPointRecord> =
            scan.iter().filter(|ap| ap.ssid == ssid).cloned().collect();
        if records.is_empty() {
            return Err(SelectError::NoMatchingNetwork {
                ssid: ssid.to_string(),
            });
        }
        // Vec::sort_by is stable, so first-seen wins on equal RSSI.
        records.sort_by(|a, b| b.rssi_dbm.cmp(&a.rssi_dbm));
        Ok(Self {
            ssid: ssid.to_string(),
            records,
        })
    }

    /// The SSID all candidates share.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Ranked candidates, strongest first.
    pub fn records(&self) -> &[AccessPointRecord] {
        &self.records
    }

    /// Strongest candidate.
    pub fn best(&self) -> &AccessPointRecord {
        // Non-empty by construction.
        &self.records[0]
    }

    /// Log the ranked candidate list, marking the currently associated AP.
    pub fn log_candidates(&self, current: Option<&CurrentAssociation>) {
        log::info!(
            "Found {} access point(s) for {:?}:",
            self.records.len(),
            self.ssid
        );
        for ap in &self.records {
            let marker = match current {
                Some(cur) if cur.bssid == ap.bssid => " [CURRENT]",
                _ => "",
            };
            log::info!(
                "  {} ({} dBm, channel {}){}",
                ap.bssid,
                ap.rssi_dbm,
                ap.channel,
                marker
            );
        }
    }
}

/// The association the device currently holds, as selector input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentAssociation {
    pub bssid: Bssid,
    pub rssi_dbm: i32,
}

/// Outcome of an AP selection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "ignoring the selection leaves the device on an arbitrary AP"]
pub enum Selection {
    /// Associate with (or migrate to) this candidate.
    Migrate(AccessPointRecord),
    /// Keep the current association.
    Stay,
}

/// Decide whether to associate with the top-ranked candidate.
///
/// Not connected: the strongest candidate is chosen unconditionally.
/// Connected: migrate only if the strongest candidate is more than
/// [`MIGRATION_HYSTERESIS_DB`] stronger than the current signal, and never
/// to the AP we are already on.
pub fn select_ap(catalog: &ApCatalog, current: Option<CurrentAssociation>) -> Selection {
    let best = catalog.best();
    match current {
        None => Selection::Migrate(best.clone()),
        Some(cur) => {
            if best.bssid == cur.bssid {
                return Selection::Stay;
            }
            if best.rssi_dbm - cur.rssi_dbm > MIGRATION_HYSTERESIS_DB {
                Selection::Migrate(best.clone())
            } else {
                Selection::Stay
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ap(ssid: &str, bssid: &str, rssi: i32, channel: u8) -> AccessPointRecord {
        AccessPointRecord {
            ssid: ssid.to_string(),
            bssid: bssid.parse().unwrap(),
            rssi_dbm: rssi,
            channel,
        }
    }

    #[test]
    fn test_bssid_roundtrip() {
        let bssid: Bssid = "AA:BB:CC:00:00:01".parse().unwrap();
        assert_eq!(bssid.octets(), [0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x01]);
        assert_eq!(bssid.to_string(), "AA:BB:CC:00:00:01");
    }

    #[test]
    fn test_bssid_lowercase_accepted() {
        let bssid: Bssid = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(bssid.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_bssid_invalid() {
        assert!("AA:BB:CC:00:00".parse::<Bssid>().is_err()); // too short
        assert!("AA:BB:CC:00:00:01:02".parse::<Bssid>().is_err()); // too long
        assert!("AA:BB:CC:00:00:GG".parse::<Bssid>().is_err()); // not hex
        assert!("".parse::<Bssid>().is_err());
    }

    #[test]
    fn test_catalog_filters_other_ssids() {
        let scan = vec![
            ap("Home", "AA:BB:CC:00:00:01", -40, 1),
            ap("Guest", "AA:BB:CC:00:00:09", -30, 6),
            ap("Home", "AA:BB:CC:00:00:02", -65, 11),
        ];
        let catalog = ApCatalog::from_scan(&scan, "Home").unwrap();
        assert_eq!(catalog.records().len(), 2);
        assert!(catalog.records().iter().all(|ap| ap.ssid == "Home"));
    }

    #[test]
    fn test_catalog_empty_scan() {
        let result = ApCatalog::from_scan(&[], "Home");
        assert_eq!(
            result.unwrap_err(),
            SelectError::NoMatchingNetwork {
                ssid: "Home".to_string()
            }
        );
    }

    #[test]
    fn test_catalog_no_matching_ssid() {
        let scan = vec![ap("Guest", "AA:BB:CC:00:00:09", -30, 6)];
        assert!(matches!(
            ApCatalog::from_scan(&scan, "Home"),
            Err(SelectError::NoMatchingNetwork { .. })
        ));
    }

    #[test]
    fn test_catalog_sorted_descending() {
        let scan = vec![
            ap("Home", "AA:BB:CC:00:00:03", -70, 1),
            ap("Home", "AA:BB:CC:00:00:01", -40, 1),
            ap("Home", "AA:BB:CC:00:00:02", -55, 6),
        ];
        let catalog = ApCatalog::from_scan(&scan, "Home").unwrap();
        let rssi: Vec<i32> = catalog.records().iter().map(|ap| ap.rssi_dbm).collect();
        assert_eq!(rssi, vec![-40, -55, -70]);
    }

    #[test]
    fn test_catalog_ties_preserve_scan_order() {
        let scan = vec![
            ap("Home", "AA:BB:CC:00:00:01", -50, 1),
            ap("Home", "AA:BB:CC:00:00:02", -50, 6),
            ap("Home", "AA:BB:CC:00:00:03", -50, 11),
        ];
        let catalog = ApCatalog::from_scan(&scan, "Home").unwrap();
        let order: Vec<String> = catalog
            .records()
            .iter()
            .map(|ap| ap.bssid.to_string())
            .collect();
        assert_eq!(
            order,
            vec![
                "AA:BB:CC:00:00:01",
                "AA:BB:CC:00:00:02",
                "AA:BB:CC:00:00:03"
            ]
        );
    }

    #[test]
    fn test_select_not_connected_picks_strongest() {
        // Scenario: two "Home" APs plus an unrelated network; the device is
        // not associated yet, so the strongest matching AP wins outright.
        let scan = vec![
            ap("Home", "AA:BB:CC:00:00:01", -40, 1),
            ap("Home", "AA:BB:CC:00:00:02", -65, 6),
            ap("Guest", "AA:BB:CC:00:00:09", -30, 11),
        ];
        let catalog = ApCatalog::from_scan(&scan, "Home").unwrap();
        match select_ap(&catalog, None) {
            Selection::Migrate(rec) => {
                assert_eq!(rec.bssid.to_string(), "AA:BB:CC:00:00:01");
                assert_eq!(rec.rssi_dbm, -40);
            }
            Selection::Stay => panic!("expected migration when not connected"),
        }
    }

    #[test]
    fn test_select_stays_below_hysteresis() {
        // Connected at -65; best alternative is -58. 7 dBm gain is below the
        // 10 dBm margin, so stay.
        let scan = vec![
            ap("Home", "AA:BB:CC:00:00:01", -58, 1),
            ap("Home", "AA:BB:CC:00:00:02", -65, 6),
        ];
        let catalog = ApCatalog::from_scan(&scan, "Home").unwrap();
        let current = CurrentAssociation {
            bssid: "AA:BB:CC:00:00:02".parse().unwrap(),
            rssi_dbm: -65,
        };
        assert_eq!(select_ap(&catalog, Some(current)), Selection::Stay);
    }

    #[test]
    fn test_select_migrates_above_hysteresis() {
        // 15 dBm better than the current association: migrate.
        let scan = vec![
            ap("Home", "AA:BB:CC:00:00:01", -50, 1),
            ap("Home", "AA:BB:CC:00:00:02", -65, 6),
        ];
        let catalog = ApCatalog::from_scan(&scan, "Home").unwrap();
        let current = CurrentAssociation {
            bssid: "AA:BB:CC:00:00:02".parse().unwrap(),
            rssi_dbm: -65,
        };
        match select_ap(&catalog, Some(current)) {
            Selection::Migrate(rec) => assert_eq!(rec.bssid.to_string(), "AA:BB:CC:00:00:01"),
            Selection::Stay => panic!("expected migration for 15 dBm gain"),
        }
    }

    #[test]
    fn test_select_exact_margin_stays() {
        // Exactly 10 dBm better is not enough; the margin must be exceeded.
        let scan = vec![
            ap("Home", "AA:BB:CC:00:00:01", -55, 1),
            ap("Home", "AA:BB:CC:00:00:02", -65, 6),
        ];
        let catalog = ApCatalog::from_scan(&scan, "Home").unwrap();
        let current = CurrentAssociation {
            bssid: "AA:BB:CC:00:00:02".parse().unwrap(),
            rssi_dbm: -65,
        };
        assert_eq!(select_ap(&catalog, Some(current)), Selection::Stay);
    }

    #[test]
    fn test_select_no_self_migration() {
        // The current AP is also top-ranked; even a large apparent RSSI jump
        // (stale current reading) must not trigger a "migration" onto itself.
        let scan = vec![
            ap("Home", "AA:BB:CC:00:00:01", -40, 1),
            ap("Home", "AA:BB:CC:00:00:02", -80, 6),
        ];
        let catalog = ApCatalog::from_scan(&scan, "Home").unwrap();
        let current = CurrentAssociation {
            bssid: "AA:BB:CC:00:00:01".parse().unwrap(),
            rssi_dbm: -60,
        };
        assert_eq!(select_ap(&catalog, Some(current)), Selection::Stay);
    }

    #[test]
    fn test_select_single_candidate_connected() {
        let scan = vec![ap("Home", "AA:BB:CC:00:00:01", -40, 1)];
        let catalog = ApCatalog::from_scan(&scan, "Home").unwrap();
        let current = CurrentAssociation {
            bssid: "AA:BB:CC:00:00:01".parse().unwrap(),
            rssi_dbm: -40,
        };
        assert_eq!(select_ap(&catalog, Some(current)), Selection::Stay);
    }
}
