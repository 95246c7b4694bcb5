use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A backend able to generate text, embed text, or both.
///
/// Embedding backends declare their vector dimensionality up front so the graph
/// store can size its vector indices before the first call is made.
pub trait LlmProvider: Send + Sync {
    /// Send messages to the model and return the assistant response.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate, does not support chat,
    /// or the response is invalid.
    fn chat(&self, messages: &[Message]) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Embed a batch of texts. The output has the same length and order as `texts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable, does not support embeddings,
    /// or returns a malformed batch.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send;

    /// Dimensionality of the vectors returned by [`LlmProvider::embed`].
    fn embedding_dim(&self) -> usize;

    fn supports_embeddings(&self) -> bool;

    fn supports_chat(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// Validate a batch returned by a backend against the request size and declared dimension.
///
/// # Errors
///
/// Returns `BatchMismatch` or `DimensionMismatch` when the batch is malformed.
pub fn check_batch(
    vectors: &[Vec<f32>],
    expected_len: usize,
    dim: usize,
) -> Result<(), LlmError> {
    if vectors.len() != expected_len {
        return Err(LlmError::BatchMismatch {
            expected: expected_len,
            actual: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(LlmError::DimensionMismatch {
            expected: dim,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}
