use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
    claims::types::{Claim, ClaimKind, ClaimLeg, ClaimStatus, NewClaim, Provisional, WalletTotals},
    error::{ClaimError, Result},
    providers::{ReferralRecord, SubjectStore, TransactionRecord},
    storage::{ledger::ClaimLedger, models::LedgerStats},
};

const CLAIM_COLUMNS: &str =
    "id, subject_id, kind, claimant_wallet, status, created_at, updated_at";

/// SQLite-backed claim ledger. Also serves the read-only order and referral
/// tables of the host application.
pub struct Database {
    conn: Mutex<Connection>,
}

struct ClaimRow {
    id: i64,
    subject_id: String,
    kind: String,
    claimant_wallet: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl ClaimRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject_id: row.get(1)?,
            kind: row.get(2)?,
            claimant_wallet: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_claim(self, legs: Vec<ClaimLeg>) -> Result<Claim> {
        Ok(Claim {
            id: self.id,
            kind: self.kind.parse().map_err(ClaimError::CorruptRow)?,
            status: self.status.parse().map_err(ClaimError::CorruptRow)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            subject_id: self.subject_id,
            claimant_wallet: self.claimant_wallet,
            legs,
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ClaimError::CorruptRow(format!("bad timestamp '{}': {}", raw, e)))
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ClaimError::Other(anyhow::anyhow!("database lock poisoned")))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS claims (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                claimant_wallet TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS claim_legs (
                claim_id INTEGER NOT NULL,
                leg_index INTEGER NOT NULL,
                recipient TEXT NOT NULL,
                amount INTEGER NOT NULL,
                token_symbol TEXT NOT NULL,
                tx_hash TEXT,
                PRIMARY KEY (claim_id, leg_index),
                FOREIGN KEY (claim_id) REFERENCES claims(id)
            );

            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                sender TEXT NOT NULL,
                network TEXT NOT NULL,
                status TEXT NOT NULL,
                amount INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS referrals (
                id TEXT PRIMARY KEY,
                referrer TEXT NOT NULL,
                referred TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_claims_wallet_status ON claims(claimant_wallet, status);
            CREATE INDEX IF NOT EXISTS idx_claims_status_updated ON claims(status, updated_at);
            CREATE INDEX IF NOT EXISTS idx_claim_legs_recipient ON claim_legs(recipient);
            CREATE INDEX IF NOT EXISTS idx_transactions_sender ON transactions(sender, status);",
        )?;
        Ok(())
    }

    fn load_legs(conn: &Connection, claim_id: i64) -> Result<Vec<ClaimLeg>> {
        let mut stmt = conn.prepare(
            "SELECT recipient, amount, token_symbol, tx_hash
             FROM claim_legs
             WHERE claim_id = ?1
             ORDER BY leg_index ASC",
        )?;

        let legs = stmt
            .query_map([claim_id], |row| {
                Ok(ClaimLeg {
                    recipient: row.get(0)?,
                    amount: row.get(1)?,
                    token_symbol: row.get(2)?,
                    tx_hash: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(legs)
    }

    fn load_claim_where(conn: &Connection, clause: &str, key: &dyn rusqlite::ToSql) -> Result<Option<Claim>> {
        let sql = format!("SELECT {} FROM claims WHERE {}", CLAIM_COLUMNS, clause);
        let row = conn.query_row(&sql, [key], ClaimRow::from_row).optional()?;

        match row {
            Some(row) => {
                let legs = Self::load_legs(conn, row.id)?;
                Ok(Some(row.into_claim(legs)?))
            }
            None => Ok(None),
        }
    }

    fn load_claims(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Claim>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, ClaimRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let legs = Self::load_legs(conn, row.id)?;
                row.into_claim(legs)
            })
            .collect()
    }

    pub fn get_claim(&self, claim_id: i64) -> Result<Option<Claim>> {
        let conn = self.lock()?;
        Self::load_claim_where(&conn, "id = ?1", &claim_id)
    }

    pub fn get_claim_by_subject(&self, subject_id: &str) -> Result<Option<Claim>> {
        let conn = self.lock()?;
        Self::load_claim_where(&conn, "subject_id = ?1", &subject_id)
    }

    /// Most recently updated claims first
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Claim>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM claims ORDER BY updated_at DESC, id DESC LIMIT ?1",
            CLAIM_COLUMNS
        );
        Self::load_claims(&conn, &sql, params![limit as i64])
    }

    /// Pending claims not touched since `cutoff`, oldest first
    pub fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Claim>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM claims WHERE status = 'pending' AND updated_at < ?1 ORDER BY updated_at ASC",
            CLAIM_COLUMNS
        );
        Self::load_claims(&conn, &sql, params![timestamp(cutoff)])
    }

    pub fn get_stats(&self) -> Result<LedgerStats> {
        let conn = self.lock()?;

        let count_with = |status: &str| -> Result<usize> {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM claims WHERE status = ?1",
                [status],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        };

        let paid_for = |kind: &str| -> Result<u64> {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(l.amount), 0)
                 FROM claim_legs l JOIN claims c ON c.id = l.claim_id
                 WHERE c.kind = ?1 AND l.tx_hash IS NOT NULL",
                [kind],
                |row| row.get(0),
            )?;
            Ok(total as u64)
        };

        let total_claims: i64 = conn.query_row("SELECT COUNT(*) FROM claims", [], |row| row.get(0))?;
        let cashback_paid = paid_for(ClaimKind::Cashback.as_str())?;
        let referral_paid = paid_for(ClaimKind::Referral.as_str())?;

        Ok(LedgerStats {
            total_claims: total_claims as usize,
            pending_claims: count_with(ClaimStatus::Pending.as_str())?,
            completed_claims: count_with(ClaimStatus::Completed.as_str())?,
            failed_claims: count_with(ClaimStatus::Failed.as_str())?,
            total_paid: cashback_paid + referral_paid,
            cashback_paid,
            referral_paid,
        })
    }

    pub fn save_transaction(&self, record: &TransactionRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO transactions (id, sender, network, status, amount, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.sender,
                record.network,
                record.status,
                record.amount,
                timestamp(record.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn save_referral(&self, record: &ReferralRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO referrals (id, referrer, referred, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.referrer,
                record.referred,
                timestamp(record.created_at),
            ],
        )?;
        Ok(())
    }

    fn load_referral(&self, clause: &str, key: &str) -> Result<Option<ReferralRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT id, referrer, referred, created_at FROM referrals WHERE {}",
            clause
        );
        let row = conn
            .query_row(&sql, [key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()?;

        row.map(|(id, referrer, referred, created_at)| -> Result<ReferralRecord> {
            Ok(ReferralRecord {
                id,
                referrer,
                referred,
                created_at: parse_timestamp(&created_at)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ClaimLedger for Database {
    async fn find(&self, subject_id: &str) -> Result<Option<Claim>> {
        self.get_claim_by_subject(subject_id)
    }

    async fn create_provisional(&self, claim: NewClaim) -> Result<Provisional> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = timestamp(Utc::now());

        let inserted = tx.execute(
            "INSERT INTO claims (subject_id, kind, claimant_wallet, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4)
             ON CONFLICT(subject_id) DO NOTHING",
            params![claim.subject_id, claim.kind.as_str(), claim.claimant_wallet, now],
        )?;

        if inserted == 0 {
            let existing = Self::load_claim_where(&tx, "subject_id = ?1", &claim.subject_id)?
                .ok_or_else(|| ClaimError::ClaimNotFound(claim.subject_id.clone()))?;
            tx.commit()?;
            debug!(
                "Claim for subject {} already exists (id {}, status {})",
                existing.subject_id, existing.id, existing.status
            );
            return Ok(Provisional::Existing(existing));
        }

        let claim_id = tx.last_insert_rowid();
        for (index, leg) in claim.legs.iter().enumerate() {
            tx.execute(
                "INSERT INTO claim_legs (claim_id, leg_index, recipient, amount, token_symbol, tx_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
                params![claim_id, index as i64, leg.recipient, leg.amount, leg.token_symbol],
            )?;
        }

        let created = Self::load_claim_where(&tx, "id = ?1", &claim_id)?
            .ok_or_else(|| ClaimError::ClaimNotFound(claim.subject_id.clone()))?;
        tx.commit()?;

        Ok(Provisional::Created(created))
    }

    async fn transition(&self, claim_id: i64, status: ClaimStatus, tx_hashes: &[String]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row("SELECT status FROM claims WHERE id = ?1", [claim_id], |row| row.get(0))
            .optional()?;
        let current: ClaimStatus = current
            .ok_or_else(|| ClaimError::ClaimNotFound(claim_id.to_string()))?
            .parse()
            .map_err(ClaimError::CorruptRow)?;

        if !current.can_transition_to(status) {
            warn!(
                "Refusing transition of claim {} from {} to {}",
                claim_id, current, status
            );
            return Err(ClaimError::InvalidTransition {
                claim_id,
                from: current,
                to: status,
            });
        }

        let updated = tx.execute(
            "UPDATE claims SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'pending'",
            params![status.as_str(), timestamp(Utc::now()), claim_id],
        )?;
        if updated == 0 {
            return Err(ClaimError::InvalidTransition {
                claim_id,
                from: current,
                to: status,
            });
        }

        for (index, hash) in tx_hashes.iter().enumerate() {
            tx.execute(
                "UPDATE claim_legs SET tx_hash = ?1 WHERE claim_id = ?2 AND leg_index = ?3",
                params![hash, claim_id, index as i64],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn sum_completed(&self, wallet: &str) -> Result<WalletTotals> {
        let conn = self.lock()?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM claims WHERE claimant_wallet = ?1 AND status = 'completed'",
            [wallet],
            |row| row.get(0),
        )?;

        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(l.amount), 0)
             FROM claim_legs l JOIN claims c ON c.id = l.claim_id
             WHERE c.status = 'completed' AND l.recipient = ?1",
            [wallet],
            |row| row.get(0),
        )?;

        Ok(WalletTotals {
            count: count as u64,
            total_amount: total as u64,
        })
    }
}

#[async_trait]
impl SubjectStore for Database {
    async fn transaction(&self, id: &str) -> Result<Option<TransactionRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, sender, network, status, amount, updated_at FROM transactions WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, sender, network, status, amount, updated_at)| -> Result<TransactionRecord> {
            Ok(TransactionRecord {
                id,
                sender,
                network,
                status,
                amount,
                updated_at: parse_timestamp(&updated_at)?,
            })
        })
        .transpose()
    }

    async fn referral(&self, id: &str) -> Result<Option<ReferralRecord>> {
        self.load_referral("id = ?1", id)
    }

    async fn referral_for_wallet(&self, wallet: &str) -> Result<Option<ReferralRecord>> {
        self.load_referral("referred = ?1", wallet)
    }

    async fn settled_volume(&self, wallet: &str) -> Result<u64> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM transactions
             WHERE sender = ?1 AND LOWER(status) = 'settled'",
            [wallet],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cashback(subject: &str, wallet: &str, amount: u64) -> NewClaim {
        NewClaim {
            subject_id: subject.to_string(),
            kind: ClaimKind::Cashback,
            claimant_wallet: wallet.to_string(),
            legs: vec![ClaimLeg::new(wallet, amount, "USDC")],
        }
    }

    fn created(provisional: Provisional) -> Claim {
        match provisional {
            Provisional::Created(claim) => claim,
            Provisional::Existing(claim) => panic!("expected a new row, got existing {}", claim.id),
        }
    }

    #[tokio::test]
    async fn test_insert_or_fetch_returns_existing_row() {
        let db = Database::in_memory().unwrap();

        let first = created(db.create_provisional(cashback("8453-order1", "alice", 500_000)).await.unwrap());
        assert_eq!(first.status, ClaimStatus::Pending);
        assert_eq!(first.legs.len(), 1);

        match db.create_provisional(cashback("8453-order1", "mallory", 9_000_000)).await.unwrap() {
            Provisional::Existing(existing) => {
                assert_eq!(existing.id, first.id);
                assert_eq!(existing.claimant_wallet, "alice");
                assert_eq!(existing.total_amount(), 500_000);
            }
            Provisional::Created(_) => panic!("duplicate subject created a second row"),
        }

        assert_eq!(db.get_stats().unwrap().total_claims, 1);
    }

    #[tokio::test]
    async fn test_transition_records_hashes_and_refuses_terminal() {
        let db = Database::in_memory().unwrap();
        let claim = created(db.create_provisional(cashback("s-1", "alice", 500_000)).await.unwrap());

        db.transition(claim.id, ClaimStatus::Completed, &["sig-a".to_string()])
            .await
            .unwrap();

        let stored = db.find("s-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ClaimStatus::Completed);
        assert_eq!(stored.tx_hashes(), vec!["sig-a".to_string()]);

        let err = db.transition(claim.id, ClaimStatus::Failed, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            ClaimError::InvalidTransition {
                from: ClaimStatus::Completed,
                to: ClaimStatus::Failed,
                ..
            }
        ));
        assert_eq!(db.find("s-1").await.unwrap().unwrap().status, ClaimStatus::Completed);
    }

    #[tokio::test]
    async fn test_partial_hashes_stay_aligned_with_legs() {
        let db = Database::in_memory().unwrap();
        let claim = created(
            db.create_provisional(NewClaim {
                subject_id: "ref-1".to_string(),
                kind: ClaimKind::Referral,
                claimant_wallet: "bob".to_string(),
                legs: vec![
                    ClaimLeg::new("alice", 1_000_000, "USDC"),
                    ClaimLeg::new("bob", 1_000_000, "USDC"),
                ],
            })
            .await
            .unwrap(),
        );

        db.transition(claim.id, ClaimStatus::Failed, &["sig-referrer".to_string()])
            .await
            .unwrap();

        let stored = db.get_claim(claim.id).unwrap().unwrap();
        assert_eq!(stored.legs[0].tx_hash.as_deref(), Some("sig-referrer"));
        assert_eq!(stored.legs[1].tx_hash, None);
        assert_eq!(stored.status, ClaimStatus::Failed);
    }

    #[tokio::test]
    async fn test_sum_completed_ignores_pending_and_failed() {
        let db = Database::in_memory().unwrap();

        let done = created(db.create_provisional(cashback("s-1", "alice", 500_000)).await.unwrap());
        db.transition(done.id, ClaimStatus::Completed, &["sig".to_string()]).await.unwrap();

        let failed = created(db.create_provisional(cashback("s-2", "alice", 700_000)).await.unwrap());
        db.transition(failed.id, ClaimStatus::Failed, &[]).await.unwrap();

        db.create_provisional(cashback("s-3", "alice", 900_000)).await.unwrap();

        let totals = db.sum_completed("alice").await.unwrap();
        assert_eq!(totals, WalletTotals { count: 1, total_amount: 500_000 });
        assert_eq!(db.sum_completed("bob").await.unwrap(), WalletTotals::default());
    }

    #[tokio::test]
    async fn test_stale_pending_listing() {
        let db = Database::in_memory().unwrap();
        db.create_provisional(cashback("s-1", "alice", 500_000)).await.unwrap();

        let future_cutoff = Utc::now() + Duration::minutes(5);
        let past_cutoff = Utc::now() - Duration::minutes(5);

        assert_eq!(db.list_stale_pending(future_cutoff).unwrap().len(), 1);
        assert!(db.list_stale_pending(past_cutoff).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subject_store_reads() {
        let db = Database::in_memory().unwrap();
        db.save_transaction(&TransactionRecord {
            id: "8453-order1".to_string(),
            sender: "alice".to_string(),
            network: "base".to_string(),
            status: "settled".to_string(),
            amount: 50_000_000,
            updated_at: Utc::now(),
        })
        .unwrap();
        db.save_transaction(&TransactionRecord {
            id: "8453-order2".to_string(),
            sender: "alice".to_string(),
            network: "base".to_string(),
            status: "pending".to_string(),
            amount: 10_000_000,
            updated_at: Utc::now(),
        })
        .unwrap();
        db.save_referral(&ReferralRecord {
            id: "ref-1".to_string(),
            referrer: "carol".to_string(),
            referred: "alice".to_string(),
            created_at: Utc::now(),
        })
        .unwrap();

        let tx = db.transaction("8453-order1").await.unwrap().unwrap();
        assert!(tx.is_settled());
        assert!(db.transaction("missing").await.unwrap().is_none());
        assert_eq!(db.settled_volume("alice").await.unwrap(), 50_000_000);

        let referral = db.referral_for_wallet("alice").await.unwrap().unwrap();
        assert_eq!(referral.id, "ref-1");
        assert!(db.referral_for_wallet("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ledger_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.db");
        let path = path.to_str().unwrap();

        let claim_id = {
            let db = Database::new(path).unwrap();
            let claim = created(db.create_provisional(cashback("8453-order1", "alice", 500_000)).await.unwrap());
            db.transition(claim.id, ClaimStatus::Completed, &["sig-a".to_string()])
                .await
                .unwrap();
            claim.id
        };

        let reopened = Database::new(path).unwrap();
        let claim = reopened.find("8453-order1").await.unwrap().unwrap();
        assert_eq!(claim.id, claim_id);
        assert_eq!(claim.status, ClaimStatus::Completed);
        assert_eq!(claim.tx_hashes(), vec!["sig-a".to_string()]);
        assert!(matches!(
            reopened.create_provisional(cashback("8453-order1", "alice", 500_000)).await.unwrap(),
            Provisional::Existing(_)
        ));
    }
}
