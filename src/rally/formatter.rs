//! Raw-to-normalized record conversion in cooperative batches.

use tokio::task;
use tracing::trace;

use super::fields::RawRecord;
use super::types::Entity;

/// Records converted between two scheduler yields.
pub const DEFAULT_CHUNK_SIZE: usize = 25;

/// Converts raw records into normalized records without monopolizing the
/// scheduler.
///
/// Output order matches input order and every input produces exactly one
/// output. Between batches the formatter yields to the runtime so other
/// tasks on the same worker can run.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedFormatter {
  chunk_size: usize,
}

impl Default for ChunkedFormatter {
  fn default() -> Self {
    Self::new(DEFAULT_CHUNK_SIZE)
  }
}

impl ChunkedFormatter {
  /// A chunk size of zero is treated as one.
  pub fn new(chunk_size: usize) -> Self {
    Self {
      chunk_size: chunk_size.max(1),
    }
  }

  pub fn chunk_size(&self) -> usize {
    self.chunk_size
  }

  /// Normalize raw WSAPI records into `T`.
  pub async fn format<T: Entity>(&self, raw: Vec<RawRecord>) -> Vec<T> {
    self.format_with(&raw, T::from_raw).await
  }

  /// Apply `convert` to every input, yielding between batches.
  pub async fn format_with<R, T, F>(&self, input: &[R], mut convert: F) -> Vec<T>
  where
    F: FnMut(&R) -> T,
  {
    let mut output = Vec::with_capacity(input.len());

    for (batch, chunk) in input.chunks(self.chunk_size).enumerate() {
      if batch > 0 {
        task::yield_now().await;
      }
      output.extend(chunk.iter().map(&mut convert));
    }

    trace!(count = output.len(), chunk_size = self.chunk_size, "Formatted records");
    output
  }
}
