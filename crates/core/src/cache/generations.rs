//! Cache generation bookkeeping.
//!
//! A generation is a named bucket of entries. Whole generations are
//! created and dropped here; deleting one cascades to its entries.

use super::connection::CacheDb;
use super::entries::StoredEntry;
use crate::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_rusqlite::params;

/// Logical purpose of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GenerationPurpose {
    /// Pre-populated on install, filled by Cache-First.
    Static,
    /// Filled lazily by Network-First and Stale-While-Revalidate.
    Dynamic,
}

impl GenerationPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationPurpose::Static => "static",
            GenerationPurpose::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for GenerationPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationPurpose {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(GenerationPurpose::Static),
            "dynamic" => Ok(GenerationPurpose::Dynamic),
            other => Err(Error::CorruptEntry(format!("unknown generation purpose: {other}"))),
        }
    }
}

/// Summary of one stored generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationInfo {
    pub name: String,
    pub purpose: GenerationPurpose,
    pub created_at: String,
    pub entry_count: u64,
}

impl CacheDb {
    /// Create a generation if it does not exist yet.
    ///
    /// Returns true when a new generation was created.
    pub async fn open_generation(&self, name: &str, purpose: GenerationPurpose) -> Result<bool, Error> {
        let name = name.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let created = conn.execute(
                    "INSERT OR IGNORE INTO generations (name, purpose, created_at) VALUES (?1, ?2, ?3)",
                    params![name, purpose.as_str(), now],
                )?;
                Ok(created == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// Whether a generation with this name exists.
    pub async fn has_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// List every generation in storage, including ones this engine does
    /// not own, oldest first.
    pub async fn list_generations(&self) -> Result<Vec<GenerationInfo>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<GenerationInfo>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT g.name, g.purpose, g.created_at, COUNT(e.key)
                     FROM generations g
                     LEFT JOIN entries e ON e.generation = g.name
                     GROUP BY g.name
                     ORDER BY g.created_at ASC, g.name ASC",
                )?;

                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })?;

                let mut generations = Vec::new();
                for row in rows {
                    let (name, purpose, created_at, count) = row?;
                    generations.push(GenerationInfo {
                        name,
                        purpose: purpose.parse()?,
                        created_at,
                        entry_count: count as u64,
                    });
                }
                Ok(generations)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a generation and all of its entries.
    ///
    /// Returns false if it did not exist.
    pub async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM generations WHERE name = ?1", params![name])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Create a generation and write all of its entries in one transaction.
    ///
    /// Either the generation exists afterwards with every entry, or nothing
    /// changed. Entries already present under the same key are replaced.
    pub async fn commit_generation(
        &self, name: &str, purpose: GenerationPurpose, entries: Vec<StoredEntry>,
    ) -> Result<(), Error> {
        let name = name.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO generations (name, purpose, created_at) VALUES (?1, ?2, ?3)",
                    params![name, purpose.as_str(), now],
                )?;
                for entry in &entries {
                    super::entries::upsert_row(&tx, &name, entry)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}
