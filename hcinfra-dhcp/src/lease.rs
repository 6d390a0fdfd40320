//! The lease-DB plugin (§4.4): a `rusqlite`-backed `leases4` table plus the
//! in-memory allocation algorithm layered over it. One [`LeaseStore`] is
//! the DHCP engine's single writer (§5 "Shared resources").

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hcinfra_core::duration::parse_duration;
use hcinfra_core::net::ipv4_range_inclusive;
use rusqlite::Connection;

#[derive(thiserror::Error, Debug)]
pub enum LeaseError {
    #[error("setup requires exactly 4 arguments: <db-path> <rangeStart> <rangeEnd> <leaseDuration>")]
    BadArgCount,
    #[error("'{0}' is not a valid IPv4 address")]
    InvalidIpv4(String),
    #[error("range start {0} must be strictly less than range end {1}")]
    StartNotBeforeEnd(Ipv4Addr, Ipv4Addr),
    #[error("'{0}' is not a valid duration")]
    InvalidDuration(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot swap out a lease database while running")]
    CannotSwapLiveDatabase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LeaseRecord {
    ip: Ipv4Addr,
    expiry_unix_secs: u64,
}

struct Inner {
    conn: Connection,
    range_start: Ipv4Addr,
    range_end: Ipv4Addr,
    lease_duration: Duration,
    by_mac: HashMap<String, LeaseRecord>,
    held_ips: HashMap<Ipv4Addr, String>,
}

pub struct LeaseStore {
    inner: Mutex<Inner>,
}

fn normalize_mac(mac: &str) -> String {
    mac.to_ascii_lowercase()
}

fn create_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS leases4 (
            mac TEXT NOT NULL,
            ip TEXT NOT NULL,
            expiry INTEGER NOT NULL,
            PRIMARY KEY (mac, ip)
        )",
        [],
    )?;
    Ok(())
}

fn hydrate(conn: &Connection) -> rusqlite::Result<(HashMap<String, LeaseRecord>, HashMap<Ipv4Addr, String>)> {
    let mut stmt = conn.prepare("SELECT mac, ip, expiry FROM leases4")?;
    let rows = stmt.query_map([], |row| {
        let mac: String = row.get(0)?;
        let ip: String = row.get(1)?;
        let expiry: i64 = row.get(2)?;
        Ok((mac, ip, expiry))
    })?;

    let mut by_mac = HashMap::new();
    let mut held_ips = HashMap::new();
    for row in rows.flatten() {
        let (mac, ip_str, expiry) = row;
        // §4.4 "Persistence": rows with invalid mac/ip are discarded on
        // rehydration, an implementation concern rather than a data-model
        // invariant.
        let Ok(ip) = ip_str.parse::<Ipv4Addr>() else {
            continue;
        };
        if mac.is_empty() || expiry < 0 {
            continue;
        }
        let mac = normalize_mac(&mac);
        let record = LeaseRecord {
            ip,
            expiry_unix_secs: expiry as u64,
        };
        held_ips.insert(ip, mac.clone());
        by_mac.insert(mac, record);
    }
    Ok((by_mac, held_ips))
}

impl LeaseStore {
    /// §4.4 "Setup parses arguments `<db-path> <rangeStart> <rangeEnd>
    /// <leaseDuration>`; validates both endpoints as IPv4 with `start < end`
    /// (strict); rejects non-IPv4 or malformed durations."
    pub fn setup(args: &str) -> Result<Self, LeaseError> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        if parts.len() != 4 {
            return Err(LeaseError::BadArgCount);
        }
        Self::open(parts[0], parts[1], parts[2], parts[3])
    }

    pub fn open(db_path: &str, range_start: &str, range_end: &str, lease_duration: &str) -> Result<Self, LeaseError> {
        let start: Ipv4Addr = range_start
            .parse()
            .map_err(|_| LeaseError::InvalidIpv4(range_start.to_owned()))?;
        let end: Ipv4Addr = range_end
            .parse()
            .map_err(|_| LeaseError::InvalidIpv4(range_end.to_owned()))?;
        if u32::from(start) >= u32::from(end) {
            return Err(LeaseError::StartNotBeforeEnd(start, end));
        }
        let duration =
            parse_duration(lease_duration).map_err(|_| LeaseError::InvalidDuration(lease_duration.to_owned()))?;

        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(db_path)?
        };
        create_table(&conn)?;
        let (by_mac, held_ips) = hydrate(&conn)?;

        Ok(LeaseStore {
            inner: Mutex::new(Inner {
                conn,
                range_start: start,
                range_end: end,
                lease_duration: duration,
                by_mac,
                held_ips,
            }),
        })
    }

    /// Always fails: the lease store is bound to its database for the
    /// engine's lifetime (§4.4 "Persistence").
    pub fn swap_database(&self, _db_path: &str) -> Result<(), LeaseError> {
        Err(LeaseError::CannotSwapLiveDatabase)
    }

    /// §4.4 "Allocation algorithm": reuse-or-renew on a known MAC, else
    /// scan for the first free IP in range; `None` on exhaustion.
    pub fn allocate(&self, mac: &str, now: SystemTime) -> Result<Option<(Ipv4Addr, Duration)>, LeaseError> {
        let mac = normalize_mac(mac);
        let now_secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let mut inner = self.inner.lock().expect("lease store lock poisoned");

        let ip = if let Some(existing) = inner.by_mac.get(&mac).copied() {
            // Present, whether still active or already expired: steps 2/3
            // both reuse the same IP and refresh the expiry (renewal).
            existing.ip
        } else {
            let held: std::collections::HashSet<Ipv4Addr> = inner.held_ips.keys().copied().collect();
            let range_start = inner.range_start;
            let range_end = inner.range_end;
            match ipv4_range_inclusive(range_start, range_end).find(|ip| !held.contains(ip)) {
                Some(ip) => ip,
                None => return Ok(None),
            }
        };

        let new_expiry = now_secs + inner.lease_duration.as_secs();
        inner.by_mac.insert(
            mac.clone(),
            LeaseRecord {
                ip,
                expiry_unix_secs: new_expiry,
            },
        );
        inner.held_ips.insert(ip, mac.clone());

        inner.conn.execute(
            "INSERT INTO leases4 (mac, ip, expiry) VALUES (?1, ?2, ?3)
             ON CONFLICT(mac, ip) DO UPDATE SET expiry = excluded.expiry",
            rusqlite::params![mac, ip.to_string(), new_expiry as i64],
        )?;

        Ok(Some((ip, inner.lease_duration)))
    }

    pub fn active_lease_count(&self, now: SystemTime) -> usize {
        let now_secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let inner = self.inner.lock().expect("lease store lock poisoned");
        inner.by_mac.values().filter(|r| r.expiry_unix_secs > now_secs).count()
    }

    pub fn total_lease_count(&self) -> usize {
        let inner = self.inner.lock().expect("lease store lock poisoned");
        inner.by_mac.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn rejects_non_ipv4_range_endpoints() {
        assert!(matches!(
            LeaseStore::open(":memory:", "not-an-ip", "192.168.100.20", "60s"),
            Err(LeaseError::InvalidIpv4(_))
        ));
    }

    #[test]
    fn rejects_start_not_strictly_before_end() {
        assert!(matches!(
            LeaseStore::open(":memory:", "192.168.100.20", "192.168.100.20", "60s"),
            Err(LeaseError::StartNotBeforeEnd(_, _))
        ));
        assert!(matches!(
            LeaseStore::open(":memory:", "192.168.100.21", "192.168.100.20", "60s"),
            Err(LeaseError::StartNotBeforeEnd(_, _))
        ));
    }

    #[test]
    fn rejects_malformed_duration() {
        assert!(matches!(
            LeaseStore::open(":memory:", "192.168.100.10", "192.168.100.20", "sixty seconds"),
            Err(LeaseError::InvalidDuration(_))
        ));
    }

    #[test]
    fn n_distinct_macs_get_pairwise_distinct_ips_then_exhaust() {
        let store = LeaseStore::open(":memory:", "192.168.100.10", "192.168.100.12", "60s").unwrap();
        let a = store.allocate("aa:aa:aa:aa:aa:01", now()).unwrap().unwrap().0;
        let b = store.allocate("aa:aa:aa:aa:aa:02", now()).unwrap().unwrap().0;
        let c = store.allocate("aa:aa:aa:aa:aa:03", now()).unwrap().unwrap().0;
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);

        let exhausted = store.allocate("aa:aa:aa:aa:aa:04", now()).unwrap();
        assert!(exhausted.is_none());
    }

    #[test]
    fn repeated_request_from_same_mac_yields_identical_ip() {
        let store = LeaseStore::open(":memory:", "192.168.100.10", "192.168.100.200", "60s").unwrap();
        let first = store.allocate("aa:bb:cc:dd:ee:ff", now()).unwrap().unwrap().0;
        let second = store.allocate("aa:bb:cc:dd:ee:ff", now()).unwrap().unwrap().0;
        assert_eq!(first, second);
    }

    #[test]
    fn expired_record_renews_with_same_ip_and_later_expiry() {
        let store = LeaseStore::open(":memory:", "192.168.100.10", "192.168.100.20", "10s").unwrap();
        let t0 = now();
        let (ip0, _) = store.allocate("aa:bb:cc:dd:ee:ff", t0).unwrap().unwrap();

        let t1 = t0 + Duration::from_secs(3600);
        let (ip1, _) = store.allocate("aa:bb:cc:dd:ee:ff", t1).unwrap().unwrap();
        assert_eq!(ip0, ip1);

        let new_expiry = t1 + Duration::from_secs(10);
        assert!(new_expiry > t0 + Duration::from_secs(10));
    }

    #[test]
    fn mac_is_normalized_case_insensitively() {
        let store = LeaseStore::open(":memory:", "192.168.100.10", "192.168.100.20", "60s").unwrap();
        let (ip0, _) = store.allocate("AA:BB:CC:DD:EE:FF", now()).unwrap().unwrap();
        let (ip1, _) = store.allocate("aa:bb:cc:dd:ee:ff", now()).unwrap().unwrap();
        assert_eq!(ip0, ip1);
    }

    #[test]
    fn swap_database_always_fails() {
        let store = LeaseStore::open(":memory:", "192.168.100.10", "192.168.100.20", "60s").unwrap();
        assert!(matches!(
            store.swap_database("/other/path"),
            Err(LeaseError::CannotSwapLiveDatabase)
        ));
    }

    #[test]
    fn rehydrates_leases_from_an_existing_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases.db");
        let path_str = path.to_str().unwrap();

        {
            let store = LeaseStore::open(path_str, "192.168.100.10", "192.168.100.20", "60s").unwrap();
            store.allocate("aa:bb:cc:dd:ee:ff", now()).unwrap();
        }

        let reopened = LeaseStore::open(path_str, "192.168.100.10", "192.168.100.20", "60s").unwrap();
        let (ip, _) = reopened.allocate("aa:bb:cc:dd:ee:ff", now()).unwrap().unwrap();
        assert_eq!(ip, "192.168.100.10".parse::<Ipv4Addr>().unwrap());
    }
}
