//! SQLite store.
//!
//! Persists blocks, transactions and logs to a single SQLite file through
//! `sqlx`. Foreign keys are enforced on every connection so deleting a block
//! cascades to its transactions and their logs.
//!
//! # Usage
//! ```rust,no_run
//! use chainwatch_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./chainwatch.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::B256;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainwatch_core::error::WatchError;
use chainwatch_core::store::Store;
use chainwatch_core::types::{
    BlockHeader, BlockId, LogRecord, Stability, StoreCounts, StoredBlock, StoredLog,
    StoredTransaction, TransactionId, TransactionRecord,
};

use crate::sql::{db_err, hex, parse_address, parse_b256, parse_u256};

const SCHEMA: [&str; 6] = [
    r#"CREATE TABLE IF NOT EXISTS block (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        block_num   INTEGER NOT NULL,
        block_hash  TEXT    NOT NULL,
        block_time  INTEGER NOT NULL,
        parent_hash TEXT    NOT NULL,
        is_stable   INTEGER NOT NULL DEFAULT 0,
        UNIQUE (block_num, block_hash)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS "transaction" (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        tx_hash  TEXT    NOT NULL UNIQUE,
        "from"   TEXT    NOT NULL,
        "to"     TEXT,
        nonce    INTEGER NOT NULL,
        data     BLOB    NOT NULL,
        value    TEXT    NOT NULL,
        block_id INTEGER NOT NULL REFERENCES block (id) ON DELETE CASCADE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS log (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        "index"        INTEGER NOT NULL,
        data           BLOB    NOT NULL,
        transaction_id INTEGER NOT NULL REFERENCES "transaction" (id) ON DELETE CASCADE,
        UNIQUE (transaction_id, "index")
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_block_hash ON block (block_hash)",
    r#"CREATE INDEX IF NOT EXISTS idx_transaction_block ON "transaction" (block_id)"#,
    "CREATE INDEX IF NOT EXISTS idx_log_transaction ON log (transaction_id)",
];

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainwatch.db"`) or a full
    /// SQLite URL (`"sqlite:./chainwatch.db"`).
    pub async fn open(path: &str) -> Result<Self, WatchError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(db_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. The pool holds a single
    /// connection, since every in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self, WatchError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(db_err)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), WatchError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    async fn block_id(&self, number: u64, hash: &str) -> Result<BlockId, WatchError> {
        let row = sqlx::query("SELECT id FROM block WHERE block_num = ? AND block_hash = ?")
            .bind(number as i64)
            .bind(hash)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get("id"))
    }
}

fn block_from_row(row: &SqliteRow) -> Result<StoredBlock, WatchError> {
    Ok(StoredBlock {
        id: row.get("id"),
        number: row.get::<i64, _>("block_num") as u64,
        hash: parse_b256("block_hash", row.get("block_hash"))?,
        parent_hash: parse_b256("parent_hash", row.get("parent_hash"))?,
        timestamp: row.get::<i64, _>("block_time") as u64,
        stability: Stability::from(row.get::<bool, _>("is_stable")),
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<StoredTransaction, WatchError> {
    let to: Option<String> = row.get("to");
    Ok(StoredTransaction {
        id: row.get("id"),
        block_id: row.get("block_id"),
        record: TransactionRecord {
            hash: parse_b256("tx_hash", row.get("tx_hash"))?,
            from: parse_address("from", row.get("from"))?,
            to: to.as_deref().map(|to| parse_address("to", to)).transpose()?,
            nonce: row.get::<i64, _>("nonce") as u64,
            data: row.get::<Vec<u8>, _>("data").into(),
            value: parse_u256("value", row.get("value"))?,
        },
    })
}

const BLOCK_COLUMNS: &str = "id, block_num, block_hash, block_time, parent_hash, is_stable";
const TRANSACTION_COLUMNS: &str =
    r#"id, tx_hash, "from", "to", nonce, data, value, block_id"#;

#[async_trait]
impl Store for SqliteStore {
    async fn insert_block(
        &self,
        header: &BlockHeader,
        stability: Stability,
    ) -> Result<BlockId, WatchError> {
        let hash = hex(header.hash);
        sqlx::query(
            "INSERT INTO block (block_num, block_hash, block_time, parent_hash, is_stable)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (block_num, block_hash) DO NOTHING",
        )
        .bind(header.number as i64)
        .bind(&hash)
        .bind(header.timestamp as i64)
        .bind(hex(header.parent_hash))
        .bind(stability.is_stable())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let id = self.block_id(header.number, &hash).await?;
        debug!(number = header.number, hash = %hash, id, "block stored");
        Ok(id)
    }

    async fn insert_transaction(
        &self,
        block_id: BlockId,
        tx: &TransactionRecord,
    ) -> Result<TransactionId, WatchError> {
        let hash = hex(tx.hash);
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        // A transaction moving to a competing block drops the logs of the old receipt.
        let previous = sqlx::query(r#"SELECT id, block_id FROM "transaction" WHERE tx_hash = ?"#)
            .bind(&hash)
            .fetch_optional(&mut *db_tx)
            .await
            .map_err(db_err)?;
        if let Some(row) = previous {
            if row.get::<BlockId, _>("block_id") != block_id {
                sqlx::query("DELETE FROM log WHERE transaction_id = ?")
                    .bind(row.get::<TransactionId, _>("id"))
                    .execute(&mut *db_tx)
                    .await
                    .map_err(db_err)?;
            }
        }

        sqlx::query(
            r#"INSERT INTO "transaction" (tx_hash, "from", "to", nonce, data, value, block_id)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (tx_hash) DO UPDATE SET block_id = excluded.block_id"#,
        )
        .bind(&hash)
        .bind(hex(tx.from))
        .bind(tx.to.map(hex))
        .bind(tx.nonce as i64)
        .bind(tx.data.to_vec())
        .bind(tx.value.to_string())
        .bind(block_id)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        let row = sqlx::query(r#"SELECT id FROM "transaction" WHERE tx_hash = ?"#)
            .bind(&hash)
            .fetch_one(&mut *db_tx)
            .await
            .map_err(db_err)?;
        db_tx.commit().await.map_err(db_err)?;
        Ok(row.get("id"))
    }

    async fn insert_logs(
        &self,
        transaction_id: TransactionId,
        logs: &[LogRecord],
    ) -> Result<u64, WatchError> {
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;
        let mut created = 0;
        for log in logs {
            let result = sqlx::query(
                r#"INSERT INTO log ("index", data, transaction_id) VALUES (?, ?, ?)
                   ON CONFLICT (transaction_id, "index") DO NOTHING"#,
            )
            .bind(log.index as i64)
            .bind(log.data.to_vec())
            .bind(transaction_id)
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;
            created += result.rows_affected();
        }
        db_tx.commit().await.map_err(db_err)?;
        Ok(created)
    }

    async fn set_stability(
        &self,
        hashes: &[B256],
        stability: Stability,
    ) -> Result<u64, WatchError> {
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;
        let mut changed = 0;
        for hash in hashes {
            let result =
                sqlx::query("UPDATE block SET is_stable = ? WHERE block_hash = ? AND is_stable <> ?")
                    .bind(stability.is_stable())
                    .bind(hex(*hash))
                    .bind(stability.is_stable())
                    .execute(&mut *db_tx)
                    .await
                    .map_err(db_err)?;
            changed += result.rows_affected();
        }
        db_tx.commit().await.map_err(db_err)?;
        Ok(changed)
    }

    async fn delete_blocks(&self, hashes: &[B256]) -> Result<u64, WatchError> {
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;
        let mut deleted = 0;
        for hash in hashes {
            let result = sqlx::query("DELETE FROM block WHERE block_hash = ?")
                .bind(hex(*hash))
                .execute(&mut *db_tx)
                .await
                .map_err(db_err)?;
            deleted += result.rows_affected();
        }
        db_tx.commit().await.map_err(db_err)?;
        debug!(requested = hashes.len(), deleted, "blocks deleted");
        Ok(deleted)
    }

    async fn latest_block(&self) -> Result<Option<StoredBlock>, WatchError> {
        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM block ORDER BY block_num DESC, id DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Option<StoredBlock>, WatchError> {
        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM block WHERE block_hash = ? ORDER BY id LIMIT 1"
        ))
        .bind(hex(hash))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn blocks_at(&self, number: u64) -> Result<Vec<StoredBlock>, WatchError> {
        let rows = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM block WHERE block_num = ? ORDER BY id"
        ))
        .bind(number as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(block_from_row).collect()
    }

    async fn transactions_for_block(
        &self,
        block_id: BlockId,
    ) -> Result<Vec<StoredTransaction>, WatchError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {TRANSACTION_COLUMNS} FROM "transaction" WHERE block_id = ? ORDER BY id"#
        ))
        .bind(block_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn transaction_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<StoredTransaction>, WatchError> {
        let row = sqlx::query(&format!(
            r#"SELECT {TRANSACTION_COLUMNS} FROM "transaction" WHERE tx_hash = ?"#
        ))
        .bind(hex(hash))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn logs_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<StoredLog>, WatchError> {
        let rows = sqlx::query(
            r#"SELECT id, "index", data, transaction_id FROM log
               WHERE transaction_id = ? ORDER BY "index""#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .iter()
            .map(|row| StoredLog {
                id: row.get("id"),
                transaction_id: row.get("transaction_id"),
                record: LogRecord {
                    index: row.get::<i64, _>("index") as u64,
                    data: row.get::<Vec<u8>, _>("data").into(),
                },
            })
            .collect())
    }

    async fn counts(&self) -> Result<StoreCounts, WatchError> {
        let row = sqlx::query(
            r#"SELECT
                 (SELECT COUNT(*) FROM block)         AS blocks,
                 (SELECT COUNT(*) FROM "transaction") AS transactions,
                 (SELECT COUNT(*) FROM log)           AS logs"#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(StoreCounts {
            blocks: row.get::<i64, _>("blocks") as u64,
            transactions: row.get::<i64, _>("transactions") as u64,
            logs: row.get::<i64, _>("logs") as u64,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};

    fn header(number: u64, hash: u8, parent: u8) -> BlockHeader {
        BlockHeader {
            number,
            hash: B256::repeat_byte(hash),
            parent_hash: B256::repeat_byte(parent),
            timestamp: 1_700_000_000 + number,
            fingerprint: None,
        }
    }

    fn tx(hash: u8, to: Option<Address>, value: U256) -> TransactionRecord {
        TransactionRecord {
            hash: B256::repeat_byte(hash),
            from: Address::repeat_byte(0x11),
            to,
            nonce: 42,
            data: Bytes::from(vec![0xca, 0xfe]),
            value,
        }
    }

    fn log(index: u64) -> LogRecord {
        LogRecord {
            index,
            data: Bytes::from(vec![index as u8; 4]),
        }
    }

    #[tokio::test]
    async fn block_insert_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store.insert_block(&header(100, 0xaa, 0x99), Stability::Provisional).await.unwrap();
        let b = store.insert_block(&header(100, 0xaa, 0x99), Stability::Stable).await.unwrap();
        assert_eq!(a, b);

        let stored = store.block_by_hash(B256::repeat_byte(0xaa)).await.unwrap().unwrap();
        assert_eq!(stored.number, 100);
        assert_eq!(stored.parent_hash, B256::repeat_byte(0x99));
        assert_eq!(stored.timestamp, 1_700_000_100);
        assert_eq!(stored.stability, Stability::Provisional);
    }

    #[tokio::test]
    async fn transaction_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let block = store.insert_block(&header(100, 0xaa, 0x99), Stability::Stable).await.unwrap();
        let to = Address::repeat_byte(0x22);
        let id = store.insert_transaction(block, &tx(0x01, Some(to), U256::MAX)).await.unwrap();
        assert_eq!(id, store.insert_transaction(block, &tx(0x01, Some(to), U256::MAX)).await.unwrap());

        let stored = store.transaction_by_hash(B256::repeat_byte(0x01)).await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.block_id, block);
        assert_eq!(stored.record, tx(0x01, Some(to), U256::MAX));
    }

    #[tokio::test]
    async fn contract_creation_stores_null_recipient() {
        let store = SqliteStore::in_memory().await.unwrap();
        let block = store.insert_block(&header(100, 0xaa, 0x99), Stability::Stable).await.unwrap();
        store.insert_transaction(block, &tx(0x02, None, U256::from(1u64))).await.unwrap();

        let row = sqlx::query(r#"SELECT "to" FROM "transaction" WHERE tx_hash = ?"#)
            .bind(hex(B256::repeat_byte(0x02)))
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert!(row.get::<Option<String>, _>("to").is_none());

        let txs = store.transactions_for_block(block).await.unwrap();
        assert_eq!(txs[0].record.to, None);
    }

    #[tokio::test]
    async fn logs_are_idempotent_per_index() {
        let store = SqliteStore::in_memory().await.unwrap();
        let block = store.insert_block(&header(100, 0xaa, 0x99), Stability::Stable).await.unwrap();
        let tx_id = store.insert_transaction(block, &tx(0x01, None, U256::ZERO)).await.unwrap();

        assert_eq!(store.insert_logs(tx_id, &[log(0), log(1)]).await.unwrap(), 2);
        assert_eq!(store.insert_logs(tx_id, &[log(1), log(2)]).await.unwrap(), 1);

        let logs = store.logs_for_transaction(tx_id).await.unwrap();
        assert_eq!(logs.iter().map(|l| l.record.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(logs[2].record.data, Bytes::from(vec![2u8; 4]));
    }

    #[tokio::test]
    async fn moved_transaction_drops_logs_of_previous_block() {
        let store = SqliteStore::in_memory().await.unwrap();
        let b = store.insert_block(&header(101, 0xbb, 0xaa), Stability::Provisional).await.unwrap();
        let c = store.insert_block(&header(101, 0xcc, 0xaa), Stability::Provisional).await.unwrap();
        let id = store.insert_transaction(b, &tx(0x07, None, U256::ZERO)).await.unwrap();
        store.insert_logs(id, &[log(5)]).await.unwrap();

        assert_eq!(id, store.insert_transaction(b, &tx(0x07, None, U256::ZERO)).await.unwrap());
        assert_eq!(store.logs_for_transaction(id).await.unwrap().len(), 1);

        assert_eq!(id, store.insert_transaction(c, &tx(0x07, None, U256::ZERO)).await.unwrap());
        assert!(store.logs_for_transaction(id).await.unwrap().is_empty());
        store.insert_logs(id, &[log(0)]).await.unwrap();

        store.delete_blocks(&[B256::repeat_byte(0xbb)]).await.unwrap();
        let stored = store.transaction_by_hash(B256::repeat_byte(0x07)).await.unwrap().unwrap();
        assert_eq!(stored.block_id, c);
        let logs = store.logs_for_transaction(id).await.unwrap();
        assert_eq!(logs.iter().map(|l| l.record.index).collect::<Vec<_>>(), vec![0]);
    }

    #[tokio::test]
    async fn delete_cascades() {
        let store = SqliteStore::in_memory().await.unwrap();
        let keep = store.insert_block(&header(100, 0xaa, 0x99), Stability::Stable).await.unwrap();
        let gone = store.insert_block(&header(101, 0xbb, 0xaa), Stability::Provisional).await.unwrap();
        let kept_tx = store.insert_transaction(keep, &tx(0x01, None, U256::ZERO)).await.unwrap();
        let gone_tx = store.insert_transaction(gone, &tx(0x02, None, U256::ZERO)).await.unwrap();
        store.insert_logs(kept_tx, &[log(0)]).await.unwrap();
        store.insert_logs(gone_tx, &[log(0), log(1)]).await.unwrap();

        assert_eq!(store.delete_blocks(&[B256::repeat_byte(0xbb)]).await.unwrap(), 1);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts, StoreCounts { blocks: 1, transactions: 1, logs: 1 });
    }

    #[tokio::test]
    async fn stability_updates_are_conditional() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_block(&header(100, 0xaa, 0x99), Stability::Stable).await.unwrap();
        store.insert_block(&header(101, 0xbb, 0xaa), Stability::Provisional).await.unwrap();
        store.insert_block(&header(101, 0xcc, 0xaa), Stability::Provisional).await.unwrap();

        let hashes = [B256::repeat_byte(0xaa), B256::repeat_byte(0xcc)];
        assert_eq!(store.set_stability(&hashes, Stability::Stable).await.unwrap(), 1);
        assert_eq!(store.blocks_at(101).await.unwrap().len(), 2);

        let latest = store.latest_block().await.unwrap().unwrap();
        assert_eq!(latest.hash, B256::repeat_byte(0xcc));
        assert_eq!(latest.stability, Stability::Stable);
    }

    #[tokio::test]
    async fn file_store_persists_across_reopen() {
        let path = std::env::temp_dir().join(format!("chainwatch-test-{}.db", std::process::id()));
        let path = path.to_string_lossy().to_string();
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.insert_block(&header(7, 0x07, 0x06), Stability::Stable).await.unwrap();
            store.pool.close().await;
        }
        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(store.latest_block().await.unwrap().unwrap().number, 7);
        store.pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{path}{suffix}"));
        }
    }
}
