//! libSQL-backed document index.
//!
//! The [`Storage`] struct wraps a local libSQL database holding indexed
//! documents, their FTS5 mirror, and the history of crawl runs.
//!
//! **Access rules:**
//! - `threadcrawl crawl`: read-write via [`Storage::open`]
//! - `threadcrawl search` / `runs`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use uuid::Uuid;

use threadcrawl_shared::{IndexableDocument, Result, ThreadCrawlError};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ThreadCrawlError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ThreadCrawlError::Storage(format!(
                "index not found at {} (run `threadcrawl crawl` first)",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ThreadCrawlError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ThreadCrawlError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    /// Insert `documents` in one transaction, in order.
    ///
    /// Nothing is deduplicated: indexing the same document twice stores two rows.
    #[instrument(skip_all, fields(count = documents.len()))]
    pub async fn index(&self, documents: &[IndexableDocument]) -> Result<()> {
        self.check_writable()?;
        if documents.is_empty() {
            return Ok(());
        }

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        for doc in documents {
            let id = Uuid::now_v7().to_string();
            let hash = content_hash(&doc.text);
            tx.execute(
                "INSERT INTO documents (id, url, name, text, content_hash, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.as_str(),
                    doc.url.as_str(),
                    doc.name.as_str(),
                    doc.text.as_str(),
                    hash.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;

        debug!("documents committed");
        Ok(())
    }

    /// Total number of stored documents.
    pub async fn count_documents(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM documents", params![])
            .await
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map(|n| n as u64)
                .map_err(|e| ThreadCrawlError::Storage(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(ThreadCrawlError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Crawl runs
    // -----------------------------------------------------------------------

    /// Record the start of a crawl. Returns the generated run ID.
    pub async fn insert_crawl_run(&self, channel: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO crawl_runs (id, channel, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), channel, now.as_str()],
            )
            .await
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Mark a crawl run finished with its statistics.
    pub async fn finish_crawl_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE crawl_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent crawl runs, newest first.
    pub async fn list_crawl_runs(&self, limit: u32) -> Result<Vec<CrawlRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, channel, started_at, finished_at, stats_json
                 FROM crawl_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;

        let mut runs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            runs.push(CrawlRun {
                id: row
                    .get::<String>(0)
                    .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?,
                channel: row
                    .get::<String>(1)
                    .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?,
                started_at: row
                    .get::<String>(2)
                    .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?,
                finished_at: row.get::<String>(3).ok(),
                stats_json: row.get::<String>(4).ok(),
            });
        }
        Ok(runs)
    }

    // -----------------------------------------------------------------------
    // FTS search
    // -----------------------------------------------------------------------

    /// Full-text search over document names and text.
    ///
    /// Each whitespace-separated term is quoted, so user input never needs
    /// FTS5 syntax.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let mut rows = self
            .conn
            .query(
                "SELECT d.url, d.name, snippet(documents_fts, 1, '[', ']', '...', 12), rank
                 FROM documents_fts fts
                 JOIN documents d ON d.rowid = fts.rowid
                 WHERE documents_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
                params![match_expr.as_str(), limit],
            )
            .await
            .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?;

        let mut hits = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            hits.push(SearchHit {
                url: row
                    .get::<String>(0)
                    .map_err(|e| ThreadCrawlError::Storage(e.to_string()))?,
                name: row.get::<String>(1).unwrap_or_default(),
                snippet: row.get::<String>(2).unwrap_or_default(),
                score: row.get::<f64>(3).unwrap_or(0.0),
            });
        }
        Ok(hits)
    }
}

/// A ranked full-text match.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub name: String,
    /// Excerpt of the matching text with hits wrapped in `[` `]`.
    pub snippet: String,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

/// A recorded crawl run.
#[derive(Debug, Clone)]
pub struct CrawlRun {
    pub id: String,
    pub channel: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stats_json: Option<String>,
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Quote each term of a free-text query as an FTS5 string.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("threadcrawl_test_{}.db", Uuid::now_v7()))
    }

    async fn test_storage() -> Storage {
        Storage::open(&temp_path()).await.expect("open test db")
    }

    fn doc(url: &str, name: &str, text: &str) -> IndexableDocument {
        IndexableDocument {
            url: url.into(),
            name: name.into(),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.schema_version().await, 1);
        assert_eq!(storage.count_documents().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = temp_path();
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.schema_version().await, 1);
    }

    #[tokio::test]
    async fn indexed_documents_are_searchable() {
        let storage = test_storage().await;
        storage
            .index(&[
                doc(
                    "https://example.com/deploy",
                    "Deploy guide",
                    "How we roll out the payments service on Fridays",
                ),
                doc(
                    "https://example.com/oncall",
                    "On-call",
                    "Pager rotation and escalation policy",
                ),
            ])
            .await
            .expect("index");

        assert_eq!(storage.count_documents().await.unwrap(), 2);

        let hits = storage.search("payments", 10).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://example.com/deploy");
        assert_eq!(hits[0].name, "Deploy guide");
        assert!(hits[0].snippet.contains("[payments]"));
    }

    #[tokio::test]
    async fn duplicates_are_kept() {
        let storage = test_storage().await;
        let d = doc("https://example.com/a", "A", "same text");
        storage.index(&[d.clone()]).await.unwrap();
        storage.index(&[d]).await.unwrap();
        assert_eq!(storage.count_documents().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let storage = test_storage().await;
        storage.index(&[]).await.unwrap();
        assert_eq!(storage.count_documents().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn query_syntax_is_neutralized() {
        let storage = test_storage().await;
        storage
            .index(&[doc("https://example.com/q", "Quotes", "she said \"hello\" AND left")])
            .await
            .unwrap();

        assert_eq!(storage.search("\"hello", 10).await.unwrap().len(), 1);
        assert!(storage.search("   ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn crawl_run_lifecycle() {
        let storage = test_storage().await;
        let run_id = storage.insert_crawl_run("C024BE91L").await.unwrap();
        assert!(!run_id.is_empty());

        storage
            .finish_crawl_run(&run_id, r#"{"documents_indexed": 4}"#)
            .await
            .unwrap();

        let runs = storage.list_crawl_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].channel, "C024BE91L");
        assert!(runs[0].finished_at.is_some());
        assert!(runs[0].stats_json.as_deref().unwrap().contains("documents_indexed"));
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = temp_path();
        let rw = Storage::open(&tmp).await.unwrap();
        rw.index(&[doc("https://example.com/a", "A", "alpha")])
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.search("alpha", 5).await.unwrap().len(), 1);

        let result = ro.index(&[doc("https://example.com/b", "B", "beta")]).await;
        assert!(result.unwrap_err().to_string().contains("read-only"));
        assert!(ro.insert_crawl_run("C1").await.is_err());
    }

    #[tokio::test]
    async fn readonly_requires_existing_index() {
        let err = Storage::open_readonly(&temp_path()).await.err().unwrap();
        assert!(matches!(err, ThreadCrawlError::Storage(_)));
    }

    #[test]
    fn content_hash_is_hex_sha256() {
        let h = content_hash("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
