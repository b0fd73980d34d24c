//! Depth synchronization — incremental order-book merging with CRC-32
//! verification.
//!
//! The server pushes a full `snapshot` followed by incremental `update`
//! diffs. Each carries a CRC-32 (IEEE) checksum over a canonical string
//! built from the top 25 levels of both sides; the client must reproduce it
//! byte for byte after every merge or the book is desynced.
//!
//! [`DepthManager`] owns the map of current snapshots, keyed by the
//! serialized subscription argument. On a checksum mismatch the stored
//! snapshot is left untouched and the error is surfaced — re-establishing a
//! baseline is the caller's decision.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use ahash::AHashMap;
use tracing::debug;
use vx5_core::Vx5Error;

use crate::msg::{DEPTH_SNAPSHOT, DEPTH_UPDATE, DepthMsg, DepthSnapshot};

/// Levels per side entering the checksum base string.
const CRC_DEPTH: usize = 25;

/// Build the canonical checksum base string.
///
/// With equally deep sides the levels interleave as
/// `bid_px:bid_sz:ask_px:ask_sz` per index; with unequal depths the sides
/// advance independently, bids first at each index, until both are
/// exhausted. Fields join with `:`.
pub fn checksum_base(asks: &[Vec<String>], bids: &[Vec<String>]) -> String {
    let ask_depth = asks.len().min(CRC_DEPTH);
    let bid_depth = bids.len().min(CRC_DEPTH);

    let mut fields: Vec<&str> = Vec::with_capacity((ask_depth + bid_depth) * 2);

    if ask_depth == bid_depth {
        for i in 0..ask_depth {
            fields.extend([bids[i][0].as_str(), bids[i][1].as_str()]);
            fields.extend([asks[i][0].as_str(), asks[i][1].as_str()]);
        }
    } else {
        let (mut i, mut j) = (0, 0);
        while i < bid_depth || j < ask_depth {
            if i < bid_depth {
                fields.extend([bids[i][0].as_str(), bids[i][1].as_str()]);
                i += 1;
            }
            if j < ask_depth {
                fields.extend([asks[j][0].as_str(), asks[j][1].as_str()]);
                j += 1;
            }
        }
    }

    fields.join(":")
}

/// CRC-32 (IEEE) of the canonical base string, compared as a signed 32-bit
/// integer — the representation the server sends.
pub fn calc_crc32(asks: &[Vec<String>], bids: &[Vec<String>]) -> i32 {
    crc32fast::hash(checksum_base(asks, bids).as_bytes()) as i32
}

/// Merge one side of an update into the existing levels.
///
/// Both inputs are ordered by the book's sort direction (bids descending,
/// asks ascending). A two-pointer walk emits whichever price is ahead; on an
/// equal price the update wins, with the literal size `"0"` removing the
/// level. Unmatched tails append verbatim.
fn merge_side(
    old: &[Vec<String>],
    new: &[Vec<String>],
    descending: bool,
) -> Result<Vec<Vec<String>>, Vx5Error> {
    let parse = |level: &Vec<String>| -> Result<f64, Vx5Error> {
        level
            .first()
            .ok_or_else(|| Vx5Error::Depth("empty price level".to_string()))?
            .parse::<f64>()
            .map_err(|e| Vx5Error::Depth(format!("bad price: {e}")))
    };

    let mut res = Vec::with_capacity(old.len() + new.len());
    let (mut i, mut j) = (0, 0);

    while i < old.len() && j < new.len() {
        let old_px = parse(&old[i])?;
        let new_px = parse(&new[j])?;

        if old_px == new_px {
            if new[j][1] != "0" {
                res.push(new[j].clone());
            }
            i += 1;
            j += 1;
        } else {
            let new_ahead = if descending { old_px < new_px } else { old_px > new_px };
            if new_ahead {
                res.push(new[j].clone());
                j += 1;
            } else {
                res.push(old[i].clone());
                i += 1;
            }
        }
    }

    res.extend_from_slice(&old[i..]);
    res.extend_from_slice(&new[j..]);
    Ok(res)
}

/// Merge an incremental update into a stored snapshot and verify the result
/// against the update's checksum.
///
/// On a mismatch the error carries both checksums; the caller keeps its
/// stored state.
pub fn merge_snapshot(
    snap: &DepthSnapshot,
    update: &DepthSnapshot,
) -> Result<DepthSnapshot, Vx5Error> {
    let asks = merge_side(&snap.asks, &update.asks, false)?;
    let bids = merge_side(&snap.bids, &update.bids, true)?;

    let computed = calc_crc32(&asks, &bids);
    if computed != update.checksum {
        return Err(Vx5Error::Depth(format!(
            "checksum mismatch after merge: computed {computed}, server {}",
            update.checksum
        )));
    }

    Ok(DepthSnapshot { asks, bids, ts: update.ts.clone(), checksum: update.checksum })
}

/// Owner of all checksummed order-book state, one snapshot per subscription.
///
/// Presence of a key marks an active, verified subscription; a desynced
/// channel keeps its last good snapshot until the caller evicts or
/// resubscribes. Reads share the lock, writes are exclusive.
pub struct DepthManager {
    books: RwLock<AHashMap<String, DepthSnapshot>>,
}

impl DepthManager {
    pub fn new() -> Self {
        Self { books: RwLock::new(AHashMap::new()) }
    }

    /// Canonical map key: the subscription argument serialized with sorted
    /// keys, so the same argument always produces the same key.
    pub fn key_for(arg: &HashMap<String, String>) -> String {
        let sorted: BTreeMap<&str, &str> =
            arg.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        serde_json::to_string(&sorted).unwrap_or_default()
    }

    /// Apply one depth push, returning the new full snapshot for the key.
    ///
    /// - `books5` pushes replace stored state wholesale, no checksum.
    /// - `snapshot` actions must verify their own checksum before storing.
    /// - `update` actions require an existing baseline; the merged book must
    ///   match the update's checksum or the stored state stays untouched.
    pub fn apply(&self, msg: &DepthMsg) -> Result<DepthSnapshot, Vx5Error> {
        let key = Self::key_for(&msg.arg);

        if msg.data.len() != 1 {
            return Err(Vx5Error::Depth(format!(
                "expected one book per push, got {}",
                msg.data.len()
            )));
        }
        let pushed = &msg.data[0];

        // books5 is a rolling 5-level snapshot with no checksum contract.
        if msg.arg.get("channel").map(String::as_str) == Some("books5") {
            let mut books = self.books.write().expect("depth lock poisoned");
            books.insert(key, pushed.clone());
            return Ok(pushed.clone());
        }

        match msg.action.as_str() {
            DEPTH_SNAPSHOT => {
                let computed = calc_crc32(&pushed.asks, &pushed.bids);
                if computed != pushed.checksum {
                    return Err(Vx5Error::Depth(format!(
                        "snapshot checksum mismatch: computed {computed}, server {}",
                        pushed.checksum
                    )));
                }
                debug!(key, checksum = pushed.checksum, "depth snapshot verified");
                let mut books = self.books.write().expect("depth lock poisoned");
                books.insert(key, pushed.clone());
                Ok(pushed.clone())
            }
            DEPTH_UPDATE => {
                let baseline = {
                    let books = self.books.read().expect("depth lock poisoned");
                    books.get(&key).cloned()
                };
                let baseline = baseline.ok_or_else(|| {
                    Vx5Error::Depth(format!("no baseline snapshot for {key}"))
                })?;

                let merged = merge_snapshot(&baseline, pushed)?;
                debug!(key, checksum = merged.checksum, "depth update verified");
                let mut books = self.books.write().expect("depth lock poisoned");
                books.insert(key, merged.clone());
                Ok(merged)
            }
            other => Err(Vx5Error::Depth(format!("unknown depth action {other:?}"))),
        }
    }

    /// Current snapshot for a subscription argument, if one is stored.
    pub fn snapshot(&self, arg: &HashMap<String, String>) -> Option<DepthSnapshot> {
        let books = self.books.read().expect("depth lock poisoned");
        books.get(&Self::key_for(arg)).cloned()
    }

    /// True when no book is currently tracked.
    pub fn is_empty(&self) -> bool {
        let books = self.books.read().expect("depth lock poisoned");
        books.is_empty()
    }

    /// Evict a desynced or unsubscribed book.
    pub fn remove(&self, arg: &HashMap<String, String>) {
        let mut books = self.books.write().expect("depth lock poisoned");
        books.remove(&Self::key_for(arg));
    }

    /// Drop all stored books (connection teardown).
    pub fn clear(&self) {
        let mut books = self.books.write().expect("depth lock poisoned");
        books.clear();
    }
}

impl Default for DepthManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(raw: &[(&str, &str)]) -> Vec<Vec<String>> {
        raw.iter().map(|(p, s)| vec![p.to_string(), s.to_string()]).collect()
    }

    #[test]
    fn checksum_base_equal_depths_interleaves_levels() {
        let asks = levels(&[("101", "2")]);
        let bids = levels(&[("100", "1")]);
        assert_eq!(checksum_base(&asks, &bids), "100:1:101:2");
        assert_eq!(calc_crc32(&asks, &bids), -538653813);
    }

    #[test]
    fn checksum_base_unequal_depths_advances_sides_independently() {
        let asks = levels(&[("102", "3")]);
        let bids = levels(&[("100", "1"), ("99", "2"), ("98", "5")]);
        assert_eq!(checksum_base(&asks, &bids), "100:1:102:3:99:2:98:5");
        assert_eq!(calc_crc32(&asks, &bids), -65526330);
    }

    #[test]
    fn checksum_is_deterministic() {
        let asks = levels(&[("101", "2")]);
        let bids = levels(&[("100", "1")]);
        assert_eq!(calc_crc32(&asks, &bids), calc_crc32(&asks, &bids));
    }

    #[test]
    fn checksum_truncates_to_25_levels() {
        let deep: Vec<(String, String)> =
            (0..30).map(|i| (format!("{}", 1000 + i), "1".to_string())).collect();
        let side: Vec<Vec<String>> =
            deep.iter().map(|(p, s)| vec![p.clone(), s.clone()]).collect();
        let base = checksum_base(&side, &side);
        // 25 levels × 4 fields per level.
        assert_eq!(base.split(':').count(), 100);
    }

    #[test]
    fn merge_removes_and_inserts_bid_levels() {
        let old = levels(&[("100", "1"), ("99", "2")]);
        let update = levels(&[("100", "0"), ("98", "5")]);
        let merged = merge_side(&old, &update, true).unwrap();
        assert_eq!(merged, levels(&[("99", "2"), ("98", "5")]));
    }

    #[test]
    fn merge_inserts_ask_levels_ascending() {
        let old = levels(&[("101", "1"), ("103", "2")]);
        let update = levels(&[("102", "4")]);
        let merged = merge_side(&old, &update, false).unwrap();
        assert_eq!(merged, levels(&[("101", "1"), ("102", "4"), ("103", "2")]));
    }

    #[test]
    fn merge_replaces_size_on_equal_price() {
        let old = levels(&[("100", "1")]);
        let update = levels(&[("100", "7")]);
        let merged = merge_side(&old, &update, true).unwrap();
        assert_eq!(merged, levels(&[("100", "7")]));
    }

    #[test]
    fn noop_update_preserves_checksum() {
        let asks = levels(&[("101", "2"), ("102", "3")]);
        let bids = levels(&[("100", "1"), ("99", "2")]);
        let before = calc_crc32(&asks, &bids);

        let snap = DepthSnapshot { asks: asks.clone(), bids: bids.clone(), ts: "1".into(), checksum: before };
        let update = DepthSnapshot { asks, bids, ts: "2".into(), checksum: before };
        let merged = merge_snapshot(&snap, &update).unwrap();
        assert_eq!(calc_crc32(&merged.asks, &merged.bids), before);
    }

    fn depth_msg(channel: &str, action: &str, snap: DepthSnapshot) -> DepthMsg {
        let mut arg = HashMap::new();
        arg.insert("channel".to_string(), channel.to_string());
        arg.insert("instId".to_string(), "BTC-USDT".to_string());
        DepthMsg { arg, action: action.to_string(), data: vec![snap] }
    }

    #[test]
    fn manager_stores_verified_snapshot_then_merges_update() {
        let mgr = DepthManager::new();

        let snap = DepthSnapshot {
            asks: levels(&[("101", "2"), ("102", "3")]),
            bids: levels(&[("100", "1"), ("99", "2")]),
            ts: "1".into(),
            checksum: -2069711146,
        };
        mgr.apply(&depth_msg("books", DEPTH_SNAPSHOT, snap)).unwrap();

        // Remove ask 101, insert bid 98.
        let update = DepthSnapshot {
            asks: levels(&[("101", "0")]),
            bids: levels(&[("98", "5")]),
            ts: "2".into(),
            checksum: -65526330,
        };
        let merged = mgr.apply(&depth_msg("books", DEPTH_UPDATE, update)).unwrap();

        assert_eq!(merged.asks, levels(&[("102", "3")]));
        assert_eq!(merged.bids, levels(&[("100", "1"), ("99", "2"), ("98", "5")]));

        let mut arg = HashMap::new();
        arg.insert("channel".to_string(), "books".to_string());
        arg.insert("instId".to_string(), "BTC-USDT".to_string());
        assert_eq!(mgr.snapshot(&arg).unwrap().checksum, -65526330);
    }

    #[test]
    fn manager_rejects_bad_self_checksum() {
        let mgr = DepthManager::new();
        let snap = DepthSnapshot {
            asks: levels(&[("101", "2")]),
            bids: levels(&[("100", "1")]),
            ts: "1".into(),
            checksum: 42,
        };
        let msg = depth_msg("books", DEPTH_SNAPSHOT, snap);
        assert!(mgr.apply(&msg).is_err());
        assert!(mgr.snapshot(&msg.arg).is_none());
    }

    #[test]
    fn manager_requires_baseline_for_updates() {
        let mgr = DepthManager::new();
        let update = DepthSnapshot {
            asks: levels(&[("101", "2")]),
            bids: vec![],
            ts: "1".into(),
            checksum: 0,
        };
        let err = mgr.apply(&depth_msg("books", DEPTH_UPDATE, update)).unwrap_err();
        assert!(err.to_string().contains("no baseline"));
    }

    #[test]
    fn manager_keeps_stored_state_on_desync() {
        let mgr = DepthManager::new();
        let snap = DepthSnapshot {
            asks: levels(&[("101", "2")]),
            bids: levels(&[("100", "1")]),
            ts: "1".into(),
            checksum: -538653813,
        };
        let msg = depth_msg("books", DEPTH_SNAPSHOT, snap);
        mgr.apply(&msg).unwrap();

        let bad_update = DepthSnapshot {
            asks: levels(&[("101", "9")]),
            bids: vec![],
            ts: "2".into(),
            checksum: 1,
        };
        assert!(mgr.apply(&depth_msg("books", DEPTH_UPDATE, bad_update)).is_err());
        // Stale but uncorrupted.
        assert_eq!(mgr.snapshot(&msg.arg).unwrap().checksum, -538653813);
    }

    #[test]
    fn books5_replaces_without_checksum() {
        let mgr = DepthManager::new();
        let snap = DepthSnapshot {
            asks: levels(&[("101", "2")]),
            bids: levels(&[("100", "1")]),
            ts: "1".into(),
            checksum: 0,
        };
        let msg = depth_msg("books5", "", snap);
        mgr.apply(&msg).unwrap();

        let replacement = DepthSnapshot {
            asks: levels(&[("105", "1")]),
            bids: levels(&[("104", "1")]),
            ts: "2".into(),
            checksum: 0,
        };
        mgr.apply(&depth_msg("books5", "", replacement)).unwrap();
        assert_eq!(mgr.snapshot(&msg.arg).unwrap().asks, levels(&[("105", "1")]));
    }

    #[test]
    fn key_is_order_insensitive() {
        let mut a = HashMap::new();
        a.insert("channel".to_string(), "books".to_string());
        a.insert("instId".to_string(), "BTC-USDT".to_string());
        let mut b = HashMap::new();
        b.insert("instId".to_string(), "BTC-USDT".to_string());
        b.insert("channel".to_string(), "books".to_string());
        assert_eq!(DepthManager::key_for(&a), DepthManager::key_for(&b));
    }
}
