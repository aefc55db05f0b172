//! Persistent queue of mutating requests awaiting replay.
//!
//! Rows are replayed in id order, which is enqueue order. A row leaves the
//! queue only through [`CacheDb::remove_write`].

use super::connection::CacheDb;
use crate::{Error, InterceptedRequest};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;
use url::Url;

/// A deferred write as stored in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedWrite {
    pub id: i64,
    pub tag: String,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub enqueued_at: String,
}

impl QueuedWrite {
    /// Rebuild the original request for replay.
    pub fn to_request(&self) -> Result<InterceptedRequest, Error> {
        let url = Url::parse(&self.url).map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.url)))?;
        Ok(InterceptedRequest {
            method: self.method.clone(),
            url,
            headers: self.headers.clone(),
            body: self.body.clone(),
            destination: Default::default(),
        })
    }
}

type QueueRow = (i64, String, String, String, String, Option<Vec<u8>>, String);

fn decode(row: QueueRow) -> Result<QueuedWrite, Error> {
    let (id, tag, method, url, headers_json, body, enqueued_at) = row;
    Ok(QueuedWrite { id, tag, method, url, headers: serde_json::from_str(&headers_json)?, body, enqueued_at })
}

impl CacheDb {
    /// Persist a request snapshot under a sync tag and return its id.
    pub async fn enqueue_write(&self, tag: &str, request: &InterceptedRequest) -> Result<i64, Error> {
        let tag = tag.to_string();
        let method = request.method.clone();
        let url = request.url.to_string();
        let headers_json = serde_json::to_string(&request.headers)?;
        let body = request.body.clone();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute(
                    "INSERT INTO write_queue (tag, method, url, headers_json, body, enqueued_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![tag, method, url, headers_json, body, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Error::from)
    }

    /// Pending writes in enqueue order, optionally restricted to one tag.
    pub async fn list_pending_writes(&self, tag: Option<&str>) -> Result<Vec<QueuedWrite>, Error> {
        let tag = tag.map(str::to_string);
        self.conn
            .call(move |conn| -> Result<Vec<QueuedWrite>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, tag, method, url, headers_json, body, enqueued_at
                     FROM write_queue
                     WHERE ?1 IS NULL OR tag = ?1
                     ORDER BY id ASC",
                )?;

                let rows = stmt.query_map(params![tag], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?))
                })?;

                let mut writes = Vec::new();
                for row in rows {
                    writes.push(decode(row?)?);
                }
                Ok(writes)
            })
            .await
            .map_err(Error::from)
    }

    /// Fetch one queued write by id.
    pub async fn get_write(&self, id: i64) -> Result<Option<QueuedWrite>, Error> {
        self.conn
            .call(move |conn| -> Result<Option<QueuedWrite>, Error> {
                let row: Option<QueueRow> = conn
                    .query_row(
                        "SELECT id, tag, method, url, headers_json, body, enqueued_at
                         FROM write_queue WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?))
                        },
                    )
                    .optional()?;
                row.map(decode).transpose()
            })
            .await
            .map_err(Error::from)
    }

    /// Remove a queued write. Returns false if it was already gone.
    pub async fn remove_write(&self, id: i64) -> Result<bool, Error> {
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM write_queue WHERE id = ?1", params![id])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }
}
