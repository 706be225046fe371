// src/reputation.rs
// Strike/block state machine over the key-value store.
// Strikes carry a rolling expiry that is refreshed on every new strike;
// block flags carry their own independent expiry. Expired records are
// deleted on read; there is no explicit unblock path.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::store::KeyValueStore;

/// One strike counter per client IP, expiring `strike_ttl_seconds` after the
/// most recent strike.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StrikeRecord {
    pub count: u32,
    pub expires: u64,
}

/// Block flag written when the strike threshold is crossed.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BlockRecord {
    pub reason: String,
    pub expires: u64,
    pub blocked_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrikeOutcome {
    pub new_count: u32,
    pub just_blocked: bool,
}

fn strike_key(ip: &str) -> String {
    format!("strike:{}", ip)
}

fn block_key(ip: &str) -> String {
    format!("block:{}", ip)
}

/// Checks whether an IP is currently blocked. Read-only apart from pruning
/// expired or undecodable records, and idempotent with respect to strike
/// state.
pub fn is_blocked<S: KeyValueStore>(store: &S, ip: &str, now: u64) -> bool {
    let key = block_key(ip);
    match store.get(&key) {
        Ok(Some(val)) => {
            if let Ok(record) = serde_json::from_slice::<BlockRecord>(&val) {
                if record.expires > now {
                    return true;
                }
            }
            let _ = store.delete(&key);
        }
        Ok(None) => {}
        Err(_) => {}
    }
    false
}

/// Records one strike against an IP: the counter is incremented and its
/// expiry refreshed to the full window, so the window rolls forward with
/// every strike. Crossing the threshold additionally writes the block flag.
///
/// The read-increment-write sequence is not atomic; two concurrent strikes
/// against the same IP can collapse into one. The store is the sole source
/// of truth and offers no compare-and-set, so this under-count is accepted.
pub fn record_strike<S: KeyValueStore>(
    store: &S,
    ip: &str,
    now: u64,
    cfg: &Config,
) -> Result<StrikeOutcome, ()> {
    let key = strike_key(ip);
    let current = store
        .get(&key)
        .ok()
        .flatten()
        .and_then(|v| serde_json::from_slice::<StrikeRecord>(&v).ok())
        .filter(|r| r.expires > now)
        .map(|r| r.count)
        .unwrap_or(0);

    let new_count = current.saturating_add(1);
    let record = StrikeRecord {
        count: new_count,
        expires: now + cfg.strike_ttl_seconds,
    };
    let encoded = serde_json::to_vec(&record).map_err(|_| ())?;
    store.set(&key, &encoded)?;

    let just_blocked = new_count >= cfg.strike_threshold;
    if just_blocked {
        let block = BlockRecord {
            reason: "strike_threshold".to_string(),
            expires: now + cfg.block_ttl_seconds,
            blocked_at: now,
        };
        match serde_json::to_vec(&block) {
            Ok(val) => {
                if store.set(&block_key(ip), &val).is_err() {
                    eprintln!("[reputation] failed to persist block flag for {}", ip);
                }
            }
            Err(err) => {
                eprintln!("[reputation] failed to encode block flag for {}: {}", ip, err);
            }
        }
    }

    Ok(StrikeOutcome {
        new_count,
        just_blocked,
    })
}
