//! Read side of the graph store: vector search, counts and inspection.

use serde::{Deserialize, Serialize};

use super::vector::{blob_to_embedding, cosine_similarity};
use super::{GraphStore, scope_tag};
use crate::error::{IndexError, Result};

/// A Function node ranked by cosine similarity to a query vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionHit {
    pub qualname: String,
    pub name: String,
    pub path: String,
    pub class_name: Option<String>,
    pub docstring: String,
    pub source: String,
    pub score: f32,
}

/// Node and edge counts, for one workspace or the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub files: u64,
    pub classes: u64,
    pub functions: u64,
    pub calls: u64,
}

/// A Function node as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFunction {
    pub qualname: String,
    pub name: String,
    pub path: String,
    pub class_name: Option<String>,
    pub line_start: usize,
    pub line_end: usize,
    pub docstring: String,
    pub source: String,
    pub calls: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub text_hash: Option<String>,
}

type FunctionRow = (
    String,
    String,
    String,
    Option<String>,
    i64,
    i64,
    String,
    String,
    String,
    Option<Vec<u8>>,
    Option<String>,
);

type HitRow = (String, String, String, Option<String>, String, String, Vec<u8>);

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

impl GraphStore {
    /// Exact cosine top-`limit` over the embedded Function nodes of one scope.
    ///
    /// Only nodes carrying a computed embedding take part; zero-vector
    /// fallbacks are excluded until they are recomputed.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] if `query` does not match the
    /// index, or an error if the query fails.
    pub async fn search_functions(
        &self,
        workspace: Option<&str>,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<FunctionHit>> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                index: super::vector::FUNCTION_INDEX.to_string(),
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let rows: Vec<HitRow> = sqlx::query_as(
            "SELECT qualname, name, path, class_name, docstring, source, embedding \
             FROM functions \
             WHERE workspace = ? AND embedding IS NOT NULL AND text_hash IS NOT NULL",
        )
        .bind(scope_tag(workspace))
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<FunctionHit> = rows
            .into_iter()
            .filter_map(
                |(qualname, name, path, class_name, docstring, source, blob)| {
                    let embedding = blob_to_embedding(&blob);
                    if embedding.len() != self.dimensions {
                        tracing::warn!(%qualname, len = embedding.len(), "skipping malformed embedding");
                        return None;
                    }
                    Some(FunctionHit {
                        score: cosine_similarity(query, &embedding),
                        qualname,
                        name,
                        path,
                        class_name,
                        docstring,
                        source,
                    })
                },
            )
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.qualname.cmp(&b.qualname))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Number of Function nodes in scope that carry a computed embedding.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_embedded_functions(&self, workspace: Option<&str>) -> Result<u64> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM functions \
             WHERE workspace = ? AND embedding IS NOT NULL AND text_hash IS NOT NULL",
        )
        .bind(scope_tag(workspace))
        .fetch_one(&self.pool)
        .await?;
        Ok(count(n))
    }

    /// Node and edge counts. `None` counts the whole store across workspaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn stats(&self, workspace: Option<&str>) -> Result<GraphStats> {
        let (files, classes, functions, calls): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT \
             (SELECT COUNT(*) FROM files WHERE ?1 IS NULL OR workspace = ?1), \
             (SELECT COUNT(*) FROM classes WHERE ?1 IS NULL OR workspace = ?1), \
             (SELECT COUNT(*) FROM functions WHERE ?1 IS NULL OR workspace = ?1), \
             (SELECT COUNT(*) FROM calls WHERE ?1 IS NULL OR workspace = ?1)",
        )
        .bind(workspace)
        .fetch_one(&self.pool)
        .await?;

        Ok(GraphStats {
            files: count(files),
            classes: count(classes),
            functions: count(functions),
            calls: count(calls),
        })
    }

    /// Number of File, Class and Function nodes of `path` in one scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn nodes_for_path(&self, workspace: Option<&str>, path: &str) -> Result<u64> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT \
             (SELECT COUNT(*) FROM files WHERE workspace = ?1 AND path = ?2) + \
             (SELECT COUNT(*) FROM classes WHERE workspace = ?1 AND path = ?2) + \
             (SELECT COUNT(*) FROM functions WHERE workspace = ?1 AND path = ?2)",
        )
        .bind(scope_tag(workspace))
        .bind(path)
        .fetch_one(&self.pool)
        .await?;
        Ok(count(n))
    }

    /// CALLS edges of one scope as sorted `(caller, callee)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn call_edges(&self, workspace: Option<&str>) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT a.qualname, b.qualname FROM calls c \
             JOIN functions a ON a.id = c.caller_id \
             JOIN functions b ON b.id = c.callee_id \
             WHERE c.workspace = ? ORDER BY a.qualname, b.qualname",
        )
        .bind(scope_tag(workspace))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Qualnames of the methods a class DECLARES, across every file defining
    /// a class of that qualname.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn declared_methods(
        &self,
        workspace: Option<&str>,
        class_qualname: &str,
    ) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT f.qualname FROM declares d \
             JOIN classes c ON c.id = d.class_id \
             JOIN functions f ON f.id = d.function_id \
             WHERE c.workspace = ? AND c.qualname = ? ORDER BY f.qualname",
        )
        .bind(scope_tag(workspace))
        .bind(class_qualname)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(q,)| q).collect())
    }

    /// Libraries imported by `path`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn file_imports(&self, workspace: Option<&str>, path: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT library FROM file_imports WHERE workspace = ? AND path = ? ORDER BY library",
        )
        .bind(scope_tag(workspace))
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(l,)| l).collect())
    }

    /// `qualname → text hash` for every embedded node of `path`, used to skip
    /// re-embedding unchanged entities.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn embedding_hashes(
        &self,
        workspace: Option<&str>,
        path: &str,
    ) -> Result<std::collections::HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT qualname, text_hash FROM classes \
             WHERE workspace = ?1 AND path = ?2 AND text_hash IS NOT NULL AND embedding IS NOT NULL \
             UNION ALL \
             SELECT qualname, text_hash FROM functions \
             WHERE workspace = ?1 AND path = ?2 AND text_hash IS NOT NULL AND embedding IS NOT NULL",
        )
        .bind(scope_tag(workspace))
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Look up one Function node. When several files derive the same
    /// qualname, the one with the lowest path wins; see [`GraphStore::function_in`].
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is malformed.
    pub async fn function(
        &self,
        workspace: Option<&str>,
        qualname: &str,
    ) -> Result<Option<StoredFunction>> {
        self.lookup_function(workspace, None, qualname).await
    }

    /// Look up the Function node `qualname` declared in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is malformed.
    pub async fn function_in(
        &self,
        workspace: Option<&str>,
        path: &str,
        qualname: &str,
    ) -> Result<Option<StoredFunction>> {
        self.lookup_function(workspace, Some(path), qualname).await
    }

    async fn lookup_function(
        &self,
        workspace: Option<&str>,
        path: Option<&str>,
        qualname: &str,
    ) -> Result<Option<StoredFunction>> {
        let row: Option<FunctionRow> = sqlx::query_as(
            "SELECT qualname, name, path, class_name, line_start, line_end, docstring, source, \
             calls, embedding, text_hash \
             FROM functions WHERE workspace = ?1 AND qualname = ?2 AND (?3 IS NULL OR path = ?3) \
             ORDER BY path LIMIT 1",
        )
        .bind(scope_tag(workspace))
        .bind(qualname)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        let Some((
            qualname,
            name,
            path,
            class_name,
            line_start,
            line_end,
            docstring,
            source,
            calls,
            embedding,
            text_hash,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(StoredFunction {
            qualname,
            name,
            path,
            class_name,
            line_start: usize::try_from(line_start)?,
            line_end: usize::try_from(line_end)?,
            docstring,
            source,
            calls: serde_json::from_str(&calls)?,
            embedding: embedding.as_deref().map(blob_to_embedding),
            text_hash,
        }))
    }
}
