//! Cache entry reads and writes.

use super::connection::CacheDb;
use super::generations::GenerationPurpose;
use super::hash::compute_cache_key;
use crate::{Error, ResponseSnapshot};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};

/// A response stored under a request key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub method: String,
    pub url: String,
    pub response: ResponseSnapshot,
    pub stored_at: String,
}

impl StoredEntry {
    /// Build an entry keyed by method and URL, stamped now. The fragment
    /// is dropped so the key matches [`crate::InterceptedRequest::cache_key`].
    pub fn new(method: &str, url: &str, response: ResponseSnapshot) -> Self {
        let url = url.split_once('#').map_or(url, |(base, _)| base);
        Self {
            key: compute_cache_key(method, url),
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            response,
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Insert or replace one entry row. Shared by single writes and
/// whole-generation commits.
pub(crate) fn upsert_row(conn: &rusqlite::Connection, generation: &str, entry: &StoredEntry) -> Result<(), Error> {
    let headers_json = serde_json::to_string(&entry.response.headers)?;
    conn.execute(
        "INSERT INTO entries (generation, key, method, url, status, headers_json, body, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(generation, key) DO UPDATE SET
             method = excluded.method,
             url = excluded.url,
             status = excluded.status,
             headers_json = excluded.headers_json,
             body = excluded.body,
             stored_at = excluded.stored_at",
        params![
            generation,
            &entry.key,
            &entry.method,
            &entry.url,
            entry.response.status,
            headers_json,
            &entry.response.body,
            &entry.stored_at,
        ],
    )?;
    Ok(())
}

fn read_response(status: u16, headers_json: &str, body: Vec<u8>) -> Result<ResponseSnapshot, Error> {
    let headers: Vec<(String, String)> = serde_json::from_str(headers_json)?;
    Ok(ResponseSnapshot { status, headers, body })
}

impl CacheDb {
    /// Write an entry, creating the generation on first write.
    ///
    /// The generation row and the entry go in one transaction.
    pub async fn put_entry(
        &self, generation: &str, purpose: GenerationPurpose, entry: StoredEntry,
    ) -> Result<(), Error> {
        let generation = generation.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO generations (name, purpose, created_at) VALUES (?1, ?2, ?3)",
                    params![generation, purpose.as_str(), now],
                )?;
                upsert_row(&tx, &generation, &entry)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a response in one generation.
    pub async fn get_entry(&self, generation: &str, key: &str) -> Result<Option<ResponseSnapshot>, Error> {
        let generation = generation.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<ResponseSnapshot>, Error> {
                let row = conn
                    .query_row(
                        "SELECT status, headers_json, body FROM entries WHERE generation = ?1 AND key = ?2",
                        params![generation, key],
                        |row| Ok((row.get::<_, u16>(0)?, row.get::<_, String>(1)?, row.get::<_, Vec<u8>>(2)?)),
                    )
                    .optional()?;

                match row {
                    Some((status, headers_json, body)) => read_response(status, &headers_json, body).map(Some),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a response across several generations, in the given order.
    ///
    /// Returns the name of the generation that answered with the response.
    pub async fn match_entry(
        &self, generations: &[String], key: &str,
    ) -> Result<Option<(String, ResponseSnapshot)>, Error> {
        for generation in generations {
            if let Some(response) = self.get_entry(generation, key).await? {
                return Ok(Some((generation.clone(), response)));
            }
        }
        Ok(None)
    }

    /// Remove one entry. Returns false if it was not present.
    pub async fn delete_entry(&self, generation: &str, key: &str) -> Result<bool, Error> {
        let generation = generation.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted =
                    conn.execute("DELETE FROM entries WHERE generation = ?1 AND key = ?2", params![generation, key])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries in a generation.
    pub async fn count_entries(&self, generation: &str) -> Result<u64, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM entries WHERE generation = ?1", params![generation], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
