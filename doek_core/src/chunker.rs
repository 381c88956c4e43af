use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Error, Result};

/// A contiguous run of items together with its position in the source slice.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a, T> {
    /// Index of `items[0]` in the slice that was split.
    pub offset: usize,
    pub items: &'a [T],
}

/// Fans per-block transform work out over a bounded, long-lived worker pool.
///
/// The pool is built once per engine and reused for every block. Results are
/// always gathered in chunk order, whatever order the workers finish in, so
/// joining them reproduces the original item order.
pub struct ParallelChunker {
    pool: ThreadPool,
    workers: usize,
}

impl ParallelChunker {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config("worker count must be at least 1".into()));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("doek-worker-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("failed to build worker pool: {e}")))?;
        Ok(Self { pool, workers })
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Split `items` into exactly `n` chunks whose lengths differ by at most
    /// one; the first `len % n` chunks carry the extra item. With more chunks
    /// than items the trailing chunks are empty.
    pub fn split<T>(items: &[T], n: usize) -> Vec<Chunk<'_, T>> {
        let n = n.max(1);
        let base = items.len() / n;
        let extra = items.len() % n;
        let mut chunks = Vec::with_capacity(n);
        let mut offset = 0;
        for i in 0..n {
            let len = base + usize::from(i < extra);
            chunks.push(Chunk {
                offset,
                items: &items[offset..offset + len],
            });
            offset += len;
        }
        chunks
    }

    /// Run `f` on every chunk inside the pool and return the results in chunk order.
    pub fn map_concurrent<'a, T, R, F>(&self, chunks: &[Chunk<'a, T>], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&Chunk<'a, T>) -> R + Sync,
    {
        self.pool
            .install(|| chunks.par_iter().map(|chunk| f(chunk)).collect())
    }

    /// Like [`map_concurrent`](Self::map_concurrent), but the first failing chunk
    /// aborts the whole batch.
    pub fn try_map_concurrent<'a, T, R, E, F>(
        &self,
        chunks: &[Chunk<'a, T>],
        f: F,
    ) -> std::result::Result<Vec<R>, E>
    where
        T: Sync,
        R: Send,
        E: Send,
        F: Fn(&Chunk<'a, T>) -> std::result::Result<R, E> + Sync,
    {
        self.pool
            .install(|| chunks.par_iter().map(|chunk| f(chunk)).collect())
    }

    /// Concatenate per-chunk results back into one sequence.
    pub fn join<R>(results: Vec<Vec<R>>) -> Vec<R> {
        let total = results.iter().map(Vec::len).sum();
        let mut joined = Vec::with_capacity(total);
        for part in results {
            joined.extend(part);
        }
        joined
    }
}

impl std::fmt::Debug for ParallelChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelChunker")
            .field("workers", &self.workers)
            .finish()
    }
}
