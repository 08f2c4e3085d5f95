//! Chunked, coalescing byte source.
//!
//! [`ChunkedSource`] wraps any [`RangeReader`] and serves reads from a cache
//! of fixed-size chunks. Reads that arrive within the same scheduling tick are
//! gathered into one pending set; the set is then turned into as few range
//! requests as possible by [`get_byte_ranges`].
//!
//! # Guarantees
//!
//! - A chunk is written to the cache once and never replaced or evicted.
//! - A chunk that is already being fetched is never fetched a second time;
//!   later readers wait on the flush that owns it.
//! - A flush is all-or-nothing: if any range fails, every reader waiting on
//!   that flush receives the error and nothing from it is cached.
//! - Requesting more than `max_pending_chunks` chunks fails immediately,
//!   before any I/O is issued.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::debug;

use super::range_reader::clamp_read;
use super::RangeReader;
use crate::error::IoError;

// =============================================================================
// Constants
// =============================================================================

/// Default chunk size: 64KB
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default maximum number of chunks merged into one range request.
pub const DEFAULT_MAX_CHUNKS_PER_RANGE: usize = 10;

/// Default gap (in chunk ids) that is still bridged by fetching filler chunks.
pub const DEFAULT_BLANK_FILL_COUNT: u64 = 16;

/// Default limit on chunks waiting in the pending set.
pub const DEFAULT_MAX_PENDING_CHUNKS: usize = 50;

// =============================================================================
// Configuration
// =============================================================================

/// Tuning knobs for [`ChunkedSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Size of each cached chunk in bytes.
    pub chunk_size: usize,
    /// Maximum number of chunk ids in one range request.
    pub max_chunks_per_range: usize,
    /// Gaps smaller than this many ids are filled instead of split.
    pub blank_fill_count: u64,
    /// Maximum number of chunk ids waiting to be fetched.
    pub max_pending_chunks: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks_per_range: DEFAULT_MAX_CHUNKS_PER_RANGE,
            blank_fill_count: DEFAULT_BLANK_FILL_COUNT,
            max_pending_chunks: DEFAULT_MAX_PENDING_CHUNKS,
        }
    }
}

impl ChunkConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than 0".to_string());
        }
        if self.max_chunks_per_range == 0 {
            return Err("max_chunks_per_range must be greater than 0".to_string());
        }
        if self.max_pending_chunks == 0 {
            return Err("max_pending_chunks must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Range Coalescing
// =============================================================================

/// Result of [`get_byte_ranges`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteRanges {
    /// Each inner list is one contiguous run of chunk ids, fetched with a
    /// single request covering `[first * chunk_size, (last + 1) * chunk_size)`.
    pub chunks: Vec<Vec<u64>>,
    /// Ids that were not requested but are fetched to bridge small gaps.
    pub blank_fill: Vec<u64>,
}

/// Group chunk ids into as few contiguous ranges as possible.
///
/// Ids are sorted and deduplicated. A run is closed once it holds
/// `max_chunks_per_range` ids, or when the distance to the next id is
/// `blank_fill_count` or more. Smaller gaps are bridged with filler ids which
/// are reported in [`ByteRanges::blank_fill`].
pub fn get_byte_ranges(
    ids: impl IntoIterator<Item = u64>,
    max_chunks_per_range: usize,
    blank_fill_count: u64,
) -> ByteRanges {
    let sorted: BTreeSet<u64> = ids.into_iter().collect();
    let mut ranges = ByteRanges::default();
    let mut current: Vec<u64> = Vec::new();

    for id in sorted {
        let Some(&last) = current.last() else {
            current.push(id);
            continue;
        };

        let gap = id - last;
        if current.len() >= max_chunks_per_range {
            ranges.chunks.push(std::mem::take(&mut current));
        } else if gap == 1 {
            // contiguous
        } else if gap < blank_fill_count {
            for fill in last + 1..id {
                current.push(fill);
                ranges.blank_fill.push(fill);
            }
        } else {
            ranges.chunks.push(std::mem::take(&mut current));
        }
        current.push(id);
    }

    if !current.is_empty() {
        ranges.chunks.push(current);
    }
    ranges
}

// =============================================================================
// Chunked Source
// =============================================================================

/// Outcome of a flush, `None` until the flush completes.
type FlushResult = Option<Result<(), IoError>>;

/// Chunk ids gathered during the current tick, not yet dispatched.
struct PendingFlush {
    id: u64,
    ids: BTreeSet<u64>,
    done: watch::Sender<FlushResult>,
}

#[derive(Default)]
struct ChunkState {
    chunks: HashMap<u64, Bytes>,
    pending: Option<PendingFlush>,
    /// Chunk id to (flush id, completion receiver) for dispatched flushes.
    in_flight: HashMap<u64, (u64, watch::Receiver<FlushResult>)>,
}

/// Coalescing chunk cache that wraps any RangeReader.
///
/// TIFF parsing issues many small reads at scattered offsets. This layer
/// rounds every read out to whole chunks, batches the chunks requested
/// within one tick, and merges neighbouring chunks into a single request to
/// the underlying reader.
pub struct ChunkedSource<R> {
    inner: Arc<R>,
    config: ChunkConfig,
    state: Mutex<ChunkState>,
    next_flush_id: AtomicU64,
}

impl<R: RangeReader + 'static> ChunkedSource<R> {
    /// Create a ChunkedSource with the default configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, ChunkConfig::default())
    }

    /// Create a ChunkedSource with a custom configuration.
    ///
    /// A zero chunk size or range limit is raised to 1.
    pub fn with_config(inner: R, config: ChunkConfig) -> Self {
        let config = ChunkConfig {
            chunk_size: config.chunk_size.max(1),
            max_chunks_per_range: config.max_chunks_per_range.max(1),
            ..config
        };
        Self {
            inner: Arc::new(inner),
            config,
            state: Mutex::new(ChunkState::default()),
            next_flush_id: AtomicU64::new(0),
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// The wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Number of chunks currently resident.
    pub fn cached_chunks(&self) -> usize {
        self.state().chunks.len()
    }

    /// Whether the chunk with the given id is resident.
    pub fn is_cached(&self, chunk_id: u64) -> bool {
        self.state().chunks.contains_key(&chunk_id)
    }

    fn state(&self) -> MutexGuard<'_, ChunkState> {
        // The state is never left half-updated, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register interest in chunks `first..=last`.
    ///
    /// Returns one receiver per flush the caller has to wait on. Fails
    /// without touching the pending set if it would grow past the limit.
    fn request(
        &self,
        first: u64,
        last: u64,
    ) -> Result<Vec<(u64, watch::Receiver<FlushResult>)>, IoError> {
        let mut state = self.state();
        let mut waits: HashMap<u64, watch::Receiver<FlushResult>> = HashMap::new();
        let mut missing = Vec::new();

        for id in first..=last {
            if state.chunks.contains_key(&id) {
                continue;
            }
            if let Some((flush_id, rx)) = state.in_flight.get(&id) {
                waits.entry(*flush_id).or_insert_with(|| rx.clone());
                continue;
            }
            missing.push(id);
        }

        if !missing.is_empty() {
            let (already, added) = match &state.pending {
                Some(pending) => (
                    pending.ids.len(),
                    missing.iter().filter(|id| !pending.ids.contains(id)).count(),
                ),
                None => (0, missing.len()),
            };
            if already + added > self.config.max_pending_chunks {
                return Err(IoError::TooManyChunks {
                    pending: already + added,
                    limit: self.config.max_pending_chunks,
                });
            }

            let pending = state.pending.get_or_insert_with(|| PendingFlush {
                id: self.next_flush_id.fetch_add(1, Ordering::Relaxed),
                ids: BTreeSet::new(),
                done: watch::channel(None).0,
            });
            pending.ids.extend(missing);
            waits
                .entry(pending.id)
                .or_insert_with(|| pending.done.subscribe());
        }

        Ok(waits.into_iter().collect())
    }

    /// Dispatch the pending set if it is still the one identified by `flush_id`.
    ///
    /// Every reader that joined a pending set calls this after yielding; the
    /// first one takes the set and performs the fetch, the rest return
    /// immediately and wait on the completion channel instead.
    async fn flush(&self, flush_id: u64) {
        let (pending, ranges, claimed) = {
            let mut state = self.state();
            let pending = match state.pending.take() {
                Some(pending) if pending.id == flush_id => pending,
                other => {
                    state.pending = other;
                    return;
                }
            };

            // Another flush may have filled some of these in the meantime
            let ranges = get_byte_ranges(
                pending
                    .ids
                    .iter()
                    .copied()
                    .filter(|id| !state.chunks.contains_key(id)),
                self.config.max_chunks_per_range,
                self.config.blank_fill_count,
            );

            // Blank-fill ids are claimed too, unless another flush owns them
            let rx = pending.done.subscribe();
            let mut claimed = Vec::new();
            for id in ranges.chunks.iter().flatten() {
                if state.chunks.contains_key(id) || state.in_flight.contains_key(id) {
                    continue;
                }
                state.in_flight.insert(*id, (pending.id, rx.clone()));
                claimed.push(*id);
            }
            (pending, ranges, claimed)
        };

        debug!(
            source = self.inner.identifier(),
            chunks = pending.ids.len(),
            blank_fill = ranges.blank_fill.len(),
            requests = ranges.chunks.len(),
            "Flushing chunk requests"
        );

        let guard = InFlightGuard {
            state: &self.state,
            flush_id,
            ids: claimed,
        };

        let result = self.fetch_chunks(ranges.chunks).await;
        let outcome = match result {
            Ok(chunks) => {
                let mut state = self.state();
                for (id, data) in chunks {
                    // First write wins
                    state.chunks.entry(id).or_insert(data);
                }
                Ok(())
            }
            Err(e) => Err(e),
        };

        drop(guard);
        pending.done.send_replace(Some(outcome));
    }

    /// Fetch each run of chunk ids with one request, all runs concurrently.
    async fn fetch_chunks(&self, ranges: Vec<Vec<u64>>) -> Result<Vec<(u64, Bytes)>, IoError> {
        let chunk_size = self.config.chunk_size as u64;

        let mut tasks = JoinSet::new();
        for range in ranges {
            let (Some(&first), Some(&last)) = (range.first(), range.last()) else {
                continue;
            };
            let inner = Arc::clone(&self.inner);
            let offset = first * chunk_size;
            let len = ((last - first + 1) * chunk_size) as usize;
            tasks.spawn(async move {
                let data = inner.read_at(offset, len).await?;
                Ok::<_, IoError>((first, last, data))
            });
        }

        let mut chunks = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (first, last, data) = joined
                .map_err(|_| IoError::FetchAbandoned(self.inner.identifier().to_string()))??;

            for id in first..=last {
                let start = ((id - first) * chunk_size) as usize;
                let chunk = if start >= data.len() {
                    Bytes::new()
                } else {
                    let end = (start + self.config.chunk_size).min(data.len());
                    data.slice(start..end)
                };
                chunks.push((id, chunk));
            }
        }

        Ok(chunks)
    }

    /// Copy `[offset, offset + len)` out of resident chunks.
    ///
    /// Stops early at a short chunk, which marks the end of the resource.
    fn assemble(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let chunk_size = self.config.chunk_size as u64;
        let state = self.state();
        let missing = || IoError::FetchAbandoned(self.inner.identifier().to_string());

        let first = offset / chunk_size;
        let within = (offset - first * chunk_size) as usize;
        let chunk = state.chunks.get(&first).ok_or_else(missing)?;

        // Single chunk read (common case)
        if within + len <= chunk.len() {
            return Ok(chunk.slice(within..within + len));
        }

        let mut result = BytesMut::with_capacity(len);
        let end = offset + len as u64;
        let mut pos = offset;
        while pos < end {
            let id = pos / chunk_size;
            let chunk = state.chunks.get(&id).ok_or_else(missing)?;
            let within = (pos - id * chunk_size) as usize;
            if within >= chunk.len() {
                break;
            }
            let take = (chunk.len() - within).min((end - pos) as usize);
            result.extend_from_slice(&chunk[within..within + take]);
            pos += take as u64;

            if chunk.len() < self.config.chunk_size {
                break;
            }
        }

        Ok(result.freeze())
    }
}

/// Clears the in-flight markers of a flush when it finishes or is dropped.
struct InFlightGuard<'a> {
    state: &'a Mutex<ChunkState>,
    flush_id: u64,
    ids: Vec<u64>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for id in &self.ids {
            if matches!(state.in_flight.get(id), Some((owner, _)) if *owner == self.flush_id) {
                state.in_flight.remove(id);
            }
        }
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for ChunkedSource<R> {
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let len = match self.inner.size() {
            Some(size) => clamp_read(offset, len, size)?,
            None => len,
        };
        if len == 0 {
            return Ok(Bytes::new());
        }

        let chunk_size = self.config.chunk_size as u64;
        let first = offset / chunk_size;
        let last = (offset + len as u64 - 1) / chunk_size;

        let waits = self.request(first, last)?;
        if !waits.is_empty() {
            // Let other reads issued in this tick join the pending set
            tokio::task::yield_now().await;

            for (flush_id, _) in &waits {
                self.flush(*flush_id).await;
            }
            for (_, mut rx) in waits {
                let outcome: FlushResult = match rx.wait_for(Option::is_some).await {
                    Ok(result) => result.clone(),
                    Err(_) => None,
                };
                match outcome {
                    Some(Ok(())) => {}
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(IoError::FetchAbandoned(
                            self.inner.identifier().to_string(),
                        ))
                    }
                }
            }
        }

        self.assemble(offset, len)
    }

    fn size(&self) -> Option<u64> {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
