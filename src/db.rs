use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use deadpool::unmanaged::{Object, Pool};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{FieldUpdate, ProductKey, ProductRecord, Stage};

/// Persistence collaborator consumed by the ingestor. Every call is atomic.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert records, skipping any whose key already exists.
    async fn upsert_ignore(&self, records: &[ProductRecord]) -> Result<usize, StoreError>;

    /// Overwrite the fields each update owns. Stock updates address products by
    /// article, detail updates by URL.
    async fn update_fields(&self, updates: &[FieldUpdate]) -> Result<usize, StoreError>;

    async fn all_keys(&self) -> Result<HashSet<ProductKey>, StoreError>;

    async fn all_urls(&self) -> Result<HashSet<String>, StoreError>;

    async fn confirmed_keys(&self, stage: Stage) -> Result<HashSet<String>, StoreError>;

    async fn mark_confirmed(&self, stage: Stage, keys: &[String]) -> Result<usize, StoreError>;

    async fn clear_confirmed(&self, stage: Stage) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn stats(&self) -> Result<Stats, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub products: usize,
    pub stock_confirmed: usize,
    pub detail_confirmed: usize,
    pub units_in_stock: i64,
}

/// SQLite-backed store with a fixed-size connection pool.
pub struct SqliteStore {
    pool: Pool<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path, pool_size: usize, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let mut conns = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            let conn = Connection::open(path)?;
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
            if conns.is_empty() {
                init_schema(&conn)?;
            }
            conns.push(conn);
        }
        info!("Opened {:?} with {} connections", path, conns.len());
        Ok(SqliteStore {
            pool: Pool::from(conns),
        })
    }

    /// Single-connection store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(SqliteStore {
            pool: Pool::from(vec![conn]),
        })
    }

    /// Stop handing out connections. Connections already checked out are
    /// released when their holders finish.
    pub fn close(&self) {
        self.pool.close();
    }

    async fn conn(&self) -> Result<Object<Connection>, StoreError> {
        Ok(self.pool.get().await?)
    }
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS products (
            article      TEXT PRIMARY KEY,
            url          TEXT NOT NULL,
            name         TEXT NOT NULL DEFAULT '',
            price        TEXT NOT NULL DEFAULT '',
            breadcrumbs  TEXT NOT NULL DEFAULT '',
            count        INTEGER NOT NULL DEFAULT 0,
            images       TEXT NOT NULL DEFAULT '',
            description  TEXT NOT NULL DEFAULT '',
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_products_url ON products(url);

        CREATE TABLE IF NOT EXISTS confirmations (
            stage        TEXT NOT NULL CHECK(stage IN ('listing','stock','detail')),
            key          TEXT NOT NULL,
            confirmed_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (stage, key)
        );
        ",
    )
}

// ── Writes ──

fn insert_products(conn: &mut Connection, records: &[ProductRecord]) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO products
             (article, url, name, price, breadcrumbs, count, images, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for r in records {
            count += stmt.execute(rusqlite::params![
                r.key, r.url, r.name, r.price, r.breadcrumbs, r.count, r.images, r.description,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

fn apply_updates(conn: &mut Connection, updates: &[FieldUpdate]) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    let mut count = 0;
    {
        let mut stock_stmt = tx.prepare("UPDATE products SET count = ?2 WHERE article = ?1")?;
        let mut detail_stmt = tx.prepare(
            "UPDATE products SET description = ?2, images = ?3, breadcrumbs = ?4 WHERE url = ?1",
        )?;
        for update in updates {
            count += match update {
                FieldUpdate::Count(t) => {
                    let total = i64::try_from(t.total).unwrap_or(i64::MAX);
                    stock_stmt.execute(rusqlite::params![t.key, total])?
                }
                FieldUpdate::Detail(d) => detail_stmt.execute(rusqlite::params![
                    d.url, d.description, d.images, d.breadcrumbs,
                ])?,
            };
        }
    }
    tx.commit()?;
    Ok(count)
}

fn insert_confirmations(conn: &mut Connection, stage: Stage, keys: &[String]) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO confirmations (stage, key) VALUES (?1, ?2)
             ON CONFLICT(stage, key) DO UPDATE SET confirmed_at = datetime('now')",
        )?;
        for key in keys {
            count += stmt.execute(rusqlite::params![stage.as_str(), key])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Reads ──

fn string_set(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(rows)
}

#[async_trait]
impl ProductStore for SqliteStore {
    async fn upsert_ignore(&self, records: &[ProductRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let inserted = insert_products(&mut conn, records)?;
        debug!("Inserted {} of {} products", inserted, records.len());
        Ok(inserted)
    }

    async fn update_fields(&self, updates: &[FieldUpdate]) -> Result<usize, StoreError> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        Ok(apply_updates(&mut conn, updates)?)
    }

    async fn all_keys(&self) -> Result<HashSet<ProductKey>, StoreError> {
        let conn = self.conn().await?;
        Ok(string_set(&conn, "SELECT article FROM products", [])?)
    }

    async fn all_urls(&self) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn().await?;
        Ok(string_set(&conn, "SELECT DISTINCT url FROM products", [])?)
    }

    async fn confirmed_keys(&self, stage: Stage) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn().await?;
        Ok(string_set(
            &conn,
            "SELECT key FROM confirmations WHERE stage = ?1",
            [stage.as_str()],
        )?)
    }

    async fn mark_confirmed(&self, stage: Stage, keys: &[String]) -> Result<usize, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        Ok(insert_confirmations(&mut conn, stage, keys)?)
    }

    async fn clear_confirmed(&self, stage: Stage) -> Result<usize, StoreError> {
        let conn = self.conn().await?;
        Ok(conn.execute("DELETE FROM confirmations WHERE stage = ?1", [stage.as_str()])?)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn().await?;
        Ok(conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?)
    }

    async fn stats(&self) -> Result<Stats, StoreError> {
        let conn = self.conn().await?;
        let products: usize = conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?;
        let confirmed = |stage: Stage| -> rusqlite::Result<usize> {
            conn.query_row(
                "SELECT COUNT(*) FROM confirmations WHERE stage = ?1",
                [stage.as_str()],
                |r| r.get(0),
            )
        };
        let stock_confirmed = confirmed(Stage::Stock)?;
        let detail_confirmed = confirmed(Stage::Detail)?;
        let units_in_stock: i64 =
            conn.query_row("SELECT COALESCE(SUM(count), 0) FROM products", [], |r| r.get(0))?;
        Ok(Stats {
            products,
            stock_confirmed,
            detail_confirmed,
            units_in_stock,
        })
    }
}
