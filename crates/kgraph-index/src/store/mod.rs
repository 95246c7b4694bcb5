//! `SQLite`-backed graph store: files, classes, functions, their edges and a
//! cosine vector index over embeddings.
//!
//! Files are keyed by `(workspace, path)`, classes and functions by
//! `(workspace, path, qualname)`: an upsert never moves a node to another file,
//! even when two files derive the same qualname. The global scope (no
//! workspace id) is stored as the empty workspace tag, so a `None` scope only
//! ever matches untagged nodes.

mod query;
pub mod vector;

use std::path::Path;
use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::{IndexError, Result};
use crate::extractor::{ClassRecord, FileRecord, FunctionRecord};

pub use query::{FunctionHit, GraphStats, StoredFunction};
use vector::{INDEXES, SIMILARITY, embedding_to_blob};

/// Embedding payload for one upserted node.
#[derive(Debug, Clone, PartialEq)]
pub enum Embedding {
    /// Freshly computed vector and the `blake3` hash of the text it encodes.
    Computed { vector: Vec<f32>, text_hash: String },
    /// The stored vector was computed from identical text; keep it.
    Reuse,
    /// Zero vector substituted after an embedding failure. Stored without a
    /// hash so the next sync recomputes it.
    Fallback(Vec<f32>),
}

impl Embedding {
    fn columns(&self) -> (Option<Vec<u8>>, Option<&str>, bool) {
        match self {
            Self::Computed { vector, text_hash } => {
                (Some(embedding_to_blob(vector)), Some(text_hash.as_str()), false)
            }
            Self::Reuse => (None, None, true),
            Self::Fallback(vector) => (Some(embedding_to_blob(vector)), None, false),
        }
    }

    fn len(&self) -> Option<usize> {
        match self {
            Self::Computed { vector, .. } | Self::Fallback(vector) => Some(vector.len()),
            Self::Reuse => None,
        }
    }
}

/// Storage tag for a workspace scope.
pub(crate) fn scope_tag(workspace: Option<&str>) -> &str {
    workspace.unwrap_or("")
}

fn to_i64(n: usize) -> Result<i64> {
    Ok(i64::try_from(n)?)
}

/// Graph store shared by the sync engine and the retriever.
#[derive(Debug, Clone)]
pub struct GraphStore {
    pool: SqlitePool,
    dimensions: usize,
}

impl GraphStore {
    /// Open (or create) the database at `database_path` and set up the schema.
    ///
    /// `":memory:"` opens a private in-memory database held by a single
    /// connection for the lifetime of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened, migrations fail, or
    /// the registered vector indices have a different dimensionality.
    pub async fn open(database_path: &str, dimensions: usize) -> Result<Self> {
        let in_memory = database_path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            if let Some(parent) = Path::new(database_path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            format!("sqlite:{database_path}?mode=rwc")
        };

        let mut opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            opts = opts.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_opts = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_opts.connect_with(opts).await?;

        let store = Self { pool, dimensions };
        store.ensure_schema().await?;
        tracing::info!(database_path, dimensions, "graph store ready");
        Ok(store)
    }

    /// Declared dimensionality of both vector indices.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Run migrations and register the vector indices. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] if an index already exists
    /// with a different dimensionality.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::migrate!().run(&self.pool).await?;

        let dims = to_i64(self.dimensions)?;
        for (name, label) in INDEXES {
            sqlx::query(
                "INSERT OR IGNORE INTO vector_indexes (name, label, dimensions, similarity) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(name)
            .bind(label)
            .bind(dims)
            .bind(SIMILARITY)
            .execute(&self.pool)
            .await?;

            let (registered,): (i64,) =
                sqlx::query_as("SELECT dimensions FROM vector_indexes WHERE name = ?")
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await?;
            if registered != dims {
                return Err(IndexError::DimensionMismatch {
                    index: name.to_string(),
                    expected: usize::try_from(registered)?,
                    actual: self.dimensions,
                });
            }
        }
        Ok(())
    }

    /// Find-or-create the File node and replace its imports.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn upsert_file(&self, workspace: Option<&str>, file: &FileRecord) -> Result<()> {
        let ws = scope_tag(workspace);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO files (workspace, path, language) VALUES (?, ?, ?) \
             ON CONFLICT(workspace, path) DO UPDATE SET \
             language = excluded.language, updated_at = datetime('now')",
        )
        .bind(ws)
        .bind(&file.path)
        .bind(file.language.map(crate::languages::Lang::id))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM file_imports WHERE workspace = ? AND path = ?")
            .bind(ws)
            .bind(&file.path)
            .execute(&mut *tx)
            .await?;

        for library in &file.imports {
            sqlx::query("INSERT OR IGNORE INTO libraries (name) VALUES (?)")
                .bind(library)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT OR IGNORE INTO file_imports (workspace, path, library) VALUES (?, ?, ?)",
            )
            .bind(ws)
            .bind(&file.path)
            .bind(library)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Find-or-create a Class node and overwrite its derived fields.
    ///
    /// # Errors
    ///
    /// Returns an error on a dimension mismatch or if the write fails.
    pub async fn upsert_class(
        &self,
        workspace: Option<&str>,
        path: &str,
        class: &ClassRecord,
        embedding: &Embedding,
    ) -> Result<()> {
        self.check_dimensions(vector::CLASS_INDEX, embedding)?;
        let (blob, hash, keep) = embedding.columns();

        sqlx::query(
            "INSERT INTO classes \
             (workspace, qualname, name, path, line_start, line_end, docstring, source, embedding, text_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(workspace, path, qualname) DO UPDATE SET \
             name = excluded.name, \
             line_start = excluded.line_start, line_end = excluded.line_end, \
             docstring = excluded.docstring, source = excluded.source, \
             embedding = CASE WHEN ?11 THEN classes.embedding ELSE excluded.embedding END, \
             text_hash = CASE WHEN ?11 THEN classes.text_hash ELSE excluded.text_hash END",
        )
        .bind(scope_tag(workspace))
        .bind(&class.qualname)
        .bind(&class.name)
        .bind(path)
        .bind(to_i64(class.line_start)?)
        .bind(to_i64(class.line_end)?)
        .bind(&class.docstring)
        .bind(&class.source)
        .bind(blob)
        .bind(hash)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Find-or-create a Function node, overwrite its derived fields and, for
    /// methods, (re)attach the DECLARES edge from its class.
    ///
    /// # Errors
    ///
    /// Returns an error on a dimension mismatch or if the transaction fails.
    pub async fn upsert_function(
        &self,
        workspace: Option<&str>,
        path: &str,
        function: &FunctionRecord,
        embedding: &Embedding,
    ) -> Result<()> {
        self.check_dimensions(vector::FUNCTION_INDEX, embedding)?;
        let (blob, hash, keep) = embedding.columns();
        let ws = scope_tag(workspace);
        let calls = serde_json::to_string(&function.calls)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO functions \
             (workspace, qualname, name, path, class_name, line_start, line_end, docstring, source, calls, embedding, text_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(workspace, path, qualname) DO UPDATE SET \
             name = excluded.name, class_name = excluded.class_name, \
             line_start = excluded.line_start, line_end = excluded.line_end, \
             docstring = excluded.docstring, source = excluded.source, calls = excluded.calls, \
             embedding = CASE WHEN ?13 THEN functions.embedding ELSE excluded.embedding END, \
             text_hash = CASE WHEN ?13 THEN functions.text_hash ELSE excluded.text_hash END",
        )
        .bind(ws)
        .bind(&function.qualname)
        .bind(&function.name)
        .bind(path)
        .bind(function.class_name.as_deref())
        .bind(to_i64(function.line_start)?)
        .bind(to_i64(function.line_end)?)
        .bind(&function.docstring)
        .bind(&function.source)
        .bind(calls)
        .bind(blob)
        .bind(hash)
        .bind(keep)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM declares WHERE function_id = \
             (SELECT id FROM functions WHERE workspace = ? AND path = ? AND qualname = ?)",
        )
        .bind(ws)
        .bind(path)
        .bind(&function.qualname)
        .execute(&mut *tx)
        .await?;

        if function.class_name.is_some()
            && let Some((class_qualname, _)) = function.qualname.rsplit_once('.')
        {
            sqlx::query(
                "INSERT OR IGNORE INTO declares (class_id, function_id) \
                 SELECT c.id, f.id FROM classes c JOIN functions f \
                 ON f.workspace = c.workspace AND f.path = c.path \
                 WHERE c.workspace = ?1 AND c.path = ?2 AND c.qualname = ?3 AND f.qualname = ?4",
            )
            .bind(ws)
            .bind(path)
            .bind(class_qualname)
            .bind(&function.qualname)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    fn check_dimensions(&self, index: &str, embedding: &Embedding) -> Result<()> {
        match embedding.len() {
            Some(actual) if actual != self.dimensions => Err(IndexError::DimensionMismatch {
                index: index.to_string(),
                expected: self.dimensions,
                actual,
            }),
            _ => Ok(()),
        }
    }

    /// Delete Class and Function nodes of `path` whose qualnames are not listed,
    /// so a re-parse fully replaces the file's entities.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn prune_file(
        &self,
        workspace: Option<&str>,
        path: &str,
        keep_classes: &[&str],
        keep_functions: &[&str],
    ) -> Result<u64> {
        let ws = scope_tag(workspace);
        let mut tx = self.pool.begin().await?;

        let functions = sqlx::query(
            "DELETE FROM functions WHERE workspace = ?1 AND path = ?2 \
             AND qualname NOT IN (SELECT value FROM json_each(?3))",
        )
        .bind(ws)
        .bind(path)
        .bind(serde_json::to_string(keep_functions)?)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let classes = sqlx::query(
            "DELETE FROM classes WHERE workspace = ?1 AND path = ?2 \
             AND qualname NOT IN (SELECT value FROM json_each(?3))",
        )
        .bind(ws)
        .bind(path)
        .bind(serde_json::to_string(keep_classes)?)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(functions + classes)
    }

    /// Delete the File node of `path` and, by cascade, everything it contains
    /// and every edge touching those nodes. Returns the number of File nodes removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear_file(&self, workspace: Option<&str>, path: &str) -> Result<u64> {
        let res = sqlx::query("DELETE FROM files WHERE workspace = ? AND path = ?")
            .bind(scope_tag(workspace))
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    /// Delete every node tagged with `workspace`. Returns the number of File nodes removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear_workspace(&self, workspace: Option<&str>) -> Result<u64> {
        let res = sqlx::query("DELETE FROM files WHERE workspace = ?")
            .bind(scope_tag(workspace))
            .execute(&self.pool)
            .await?;
        tracing::info!(workspace = scope_tag(workspace), files = res.rows_affected(), "workspace graph cleared");
        Ok(res.rows_affected())
    }

    /// Delete every node of every workspace, and all libraries.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM files").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM libraries").execute(&mut *tx).await?;
        tx.commit().await?;
        tracing::warn!("graph store reset");
        Ok(())
    }

    /// Rebuild CALLS edges for one workspace scope.
    ///
    /// Existing edges of the scope are dropped, then `caller → callee` is created
    /// for every ordered pair, the pair of a function with itself included,
    /// where the caller's source contains `"<callee name>("`. Name-based and
    /// therefore approximate: unrelated functions sharing a name all match, and
    /// a declaration such as `def foo(` links `foo` to itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn link_calls(&self, workspace: Option<&str>) -> Result<u64> {
        let ws = scope_tag(workspace);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM calls WHERE workspace = ?")
            .bind(ws)
            .execute(&mut *tx)
            .await?;

        let linked = sqlx::query(
            "INSERT OR IGNORE INTO calls (workspace, caller_id, callee_id) \
             SELECT a.workspace, a.id, b.id \
             FROM functions a JOIN functions b ON a.workspace = b.workspace \
             WHERE a.workspace = ?1 AND instr(a.source, b.name || '(') > 0",
        )
        .bind(ws)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        tracing::debug!(workspace = ws, linked, "call edges rebuilt");
        Ok(linked)
    }

    /// Close the pool. Subsequent operations fail with [`IndexError::Unavailable`].
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
