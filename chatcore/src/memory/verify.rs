//! Audit-chain verification (`SPEC_FULL.md` §4.6, §8): re-derive every row's
//! hash from its stored `canonical` and compare against the stored `hash`
//! and `prevHash`, independently for the message chain and the tool-ledger
//! chain.

use serde::{Deserialize, Serialize};

use crate::canon::chain_hash;

/// A single broken link found while walking a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Position of the offending row within the chain (0-based).
    pub index: usize,
    /// Row id of the offending row.
    pub row_id: i64,
    /// `true` if the stored `prevHash` matches the previous row's `hash`.
    pub prev_matches: bool,
    /// `true` if the stored `hash` matches `SHA256(prevHash || canonical)`.
    pub hash_matches: bool,
}

/// Result of walking one audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleChainVerification {
    /// Number of rows walked.
    pub rows_checked: usize,
    /// Breaks found, in chain order.
    pub breaks: Vec<ChainBreak>,
    /// `hash` of the last row walked, or `""` if the chain is empty.
    pub tail_hash: String,
}

impl SingleChainVerification {
    /// `true` if every row checked out.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.breaks.is_empty()
    }
}

/// Combined verification of the message chain and the tool-ledger chain for
/// one `(userId, conversationId)` scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Result of walking the message chain.
    pub messages: SingleChainVerification,
    /// Result of walking the tool-ledger chain.
    pub tool_ledger: SingleChainVerification,
}

impl ChainVerification {
    /// `true` if both chains checked out.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.messages.is_intact() && self.tool_ledger.is_intact()
    }
}

/// One row's audit triple, generic over message/tool-ledger rows.
pub struct AuditRow {
    /// Row id, for reporting.
    pub id: i64,
    /// Stored `prevHash`.
    pub prev_hash: String,
    /// Stored `hash`.
    pub hash: String,
    /// Stored `canonical` JSON that `hash` was derived from.
    pub canonical: String,
}

/// Walk `rows` (already ordered by `(createdAt, seq, id)`) and verify every
/// link. Used identically for the message chain and the tool-ledger chain.
#[must_use]
pub fn verify_rows(rows: &[AuditRow]) -> SingleChainVerification {
    let mut breaks = Vec::new();
    let mut prev_hash = String::new();

    for (index, row) in rows.iter().enumerate() {
        let prev_matches = row.prev_hash == prev_hash;
        let expected_hash = chain_hash(&row.prev_hash, &row.canonical);
        let hash_matches = row.hash == expected_hash;

        if !prev_matches || !hash_matches {
            breaks.push(ChainBreak {
                index,
                row_id: row.id,
                prev_matches,
                hash_matches,
            });
        }

        prev_hash = row.hash.clone();
    }

    SingleChainVerification {
        rows_checked: rows.len(),
        breaks,
        tail_hash: prev_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, prev_hash: &str, canonical: &str) -> AuditRow {
        AuditRow {
            id,
            prev_hash: prev_hash.to_string(),
            hash: chain_hash(prev_hash, canonical),
            canonical: canonical.to_string(),
        }
    }

    #[test]
    fn intact_chain_reports_no_breaks() {
        let first = row(1, "", "a");
        let second = row(2, &first.hash, "b");
        let result = verify_rows(&[first, second]);
        assert!(result.is_intact());
        assert_eq!(result.rows_checked, 2);
    }

    #[test]
    fn tampered_canonical_breaks_hash_match_and_the_next_link() {
        let first = row(1, "", "a");
        let mut tampered_second = row(2, &first.hash, "b");
        tampered_second.canonical = "tampered".to_string();
        let third = row(3, &tampered_second.hash, "c");

        let result = verify_rows(&[first, tampered_second, third]);
        assert_eq!(result.breaks.len(), 1);
        assert_eq!(result.breaks[0].index, 1);
        assert!(!result.breaks[0].hash_matches);
    }

    #[test]
    fn broken_prev_hash_link_is_reported() {
        let first = row(1, "", "a");
        let mut detached_second = row(2, "not-the-real-prev-hash", "b");
        detached_second.hash = chain_hash(&detached_second.prev_hash, &detached_second.canonical);

        let result = verify_rows(&[first, detached_second]);
        assert_eq!(result.breaks.len(), 1);
        assert!(!result.breaks[0].prev_matches);
        assert!(result.breaks[0].hash_matches);
    }

    #[test]
    fn empty_chain_is_intact_with_empty_tail_hash() {
        let result = verify_rows(&[]);
        assert!(result.is_intact());
        assert_eq!(result.tail_hash, "");
    }
}
