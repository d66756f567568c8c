use chrono::Utc;
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};
use std::path::Path;
use std::str::FromStr;

use crate::alert::AlertSet;
use crate::error::StorageError;
use crate::model::Currency;
use crate::storage::{SubscriberRecord, SubscriberStore};

type SubscriberRow = (i64, String, String, String, String);

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Migration)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Migration)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Migration)
            .attach_with(|| format!("database path: {}", path.display()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;

        Ok(Self { pool })
    }
}

impl SubscriberStore for SqliteStorage {
    fn load_all(&self) -> BoxFuture<'_, Result<Vec<SubscriberRecord>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<SubscriberRow> = sqlx::query_as(
                "SELECT chat_id, btc, usd, eur, cny FROM subscribers ORDER BY chat_id ASC",
            )
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            rows.into_iter()
                .map(map_subscriber_row)
                .collect::<Result<Vec<_>, _>>()
        })
    }

    fn create(&self, record: &SubscriberRecord) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let record = record.clone();
        Box::pin(async move {
            let [btc, usd, eur, cny] = encode_lists(&record.alerts)?;
            let now = Utc::now().to_rfc3339();
            sqlx::query(
                "INSERT OR IGNORE INTO subscribers \
                 (chat_id, btc, usd, eur, cny, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.chat_id)
            .bind(btc)
            .bind(usd)
            .bind(eur)
            .bind(cny)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)
            .attach_with(|| format!("chat_id: {}", record.chat_id))?;
            Ok(())
        })
    }

    fn save(&self, record: &SubscriberRecord) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let record = record.clone();
        Box::pin(async move {
            let [btc, usd, eur, cny] = encode_lists(&record.alerts)?;
            let now = Utc::now().to_rfc3339();
            sqlx::query(
                "INSERT INTO subscribers \
                 (chat_id, btc, usd, eur, cny, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(chat_id) DO UPDATE SET \
                 btc = excluded.btc, usd = excluded.usd, eur = excluded.eur, \
                 cny = excluded.cny, updated_at = excluded.updated_at",
            )
            .bind(record.chat_id)
            .bind(btc)
            .bind(usd)
            .bind(eur)
            .bind(cny)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)
            .attach_with(|| format!("chat_id: {}", record.chat_id))?;
            Ok(())
        })
    }
}

fn encode_lists(alerts: &AlertSet) -> Result<[String; 4], Report<StorageError>> {
    let encode = |currency: Currency| {
        serde_json::to_string(alerts.thresholds(currency))
            .change_context(StorageError::Insert)
            .attach_with(|| format!("currency: {currency}"))
    };
    Ok([
        encode(Currency::Btc)?,
        encode(Currency::Usd)?,
        encode(Currency::Eur)?,
        encode(Currency::Cny)?,
    ])
}

fn map_subscriber_row(
    (chat_id, btc, usd, eur, cny): SubscriberRow,
) -> Result<SubscriberRecord, Report<StorageError>> {
    let decode = |raw: &str| -> Result<Vec<f64>, Report<StorageError>> {
        serde_json::from_str(raw)
            .change_context(StorageError::Decode)
            .attach_with(|| format!("chat_id: {chat_id}, value: {raw}"))
    };
    Ok(SubscriberRecord {
        chat_id,
        alerts: AlertSet::from_lists(decode(&btc)?, decode(&usd)?, decode(&eur)?, decode(&cny)?),
    })
}
