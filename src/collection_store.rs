//! Named, persistent collections of embedded chunks.
//!
//! Everything lives in one redb database:
//!
//! - `collections`: name -> [`CollectionInfo`] as JSON
//! - `chunks`: (collection, row id) -> encoded row
//! - `sources`: (collection, source) -> number of rows from that source
//!
//! Row format:
//! - 4 bytes: embedding dimension D (u32 LE)
//! - 4 bytes: text length in bytes (u32 LE)
//! - 4 bytes: metadata length in bytes (u32 LE)
//! - text (UTF-8), then metadata JSON, then D * 4 bytes of f32 LE values
//!
//! Every mutation happens in a single write transaction, so concurrent
//! readers only ever see the state before or after it.

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use rayon::prelude::*;
use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    TableDefinition,
    WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    chunking::Chunk,
    embedding::Embedder,
    error::{Error, Result},
};

const COLLECTIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("collections");
const CHUNKS: TableDefinition<(&str, u64), &[u8]> =
    TableDefinition::new("chunks");
const SOURCES: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("sources");

type ChunkTable<'txn> = redb::Table<'txn, (&'static str, u64), &'static [u8]>;
type SourceTable<'txn> = redb::Table<'txn, (&'static str, &'static str), u64>;

const HEADER_SIZE: usize = 12;

/// Label used for store-wide operations in error reports.
const ALL_COLLECTIONS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub distance_metric: DistanceMetric,
    /// Set by the first stored embedding.
    pub dimension: Option<usize>,
    /// Next free row id.
    pub next_row: u64,
}

impl CollectionInfo {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            distance_metric: DistanceMetric::Cosine,
            dimension: None,
            next_row: 0,
        }
    }

    fn check_dimension(&mut self, found: usize) -> Result<()> {
        match self.dimension {
            None => {
                self.dimension = Some(found);
                Ok(())
            }
            Some(expected) if expected == found => Ok(()),
            Some(expected) => {
                Err(Error::EmbeddingDimension { expected, found })
            }
        }
    }
}

/// Result of [`CollectionStore::append`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub added_chunks: usize,
    /// Sources written by this call, in first-seen order.
    pub added_sources: Vec<String>,
    /// Sources that were already present and left untouched.
    pub skipped_sources: Vec<String>,
}

/// A stored chunk with its similarity to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct RowMetadata {
    source: String,
    page: u32,
    sequence_index: u32,
}

/// Persistent vector store keyed by collection name.
pub struct CollectionStore {
    db: Database,
}

impl CollectionStore {
    /// Open or create the store at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use hydrag::CollectionStore;
    ///
    /// let store = CollectionStore::open(&tmp.path().join("c.redb")).unwrap();
    /// assert!(store.list_collections().unwrap().is_empty());
    /// assert!(!store.exists("KB1").unwrap());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let open = || -> Result<Database> {
            let db = Database::create(path)?;
            let txn = db.begin_write()?;
            txn.open_table(COLLECTIONS)?;
            txn.open_table(CHUNKS)?;
            txn.open_table(SOURCES)?;
            txn.commit()?;
            Ok(db)
        };
        let db = open().map_err(|e| e.in_store("open", ALL_COLLECTIONS))?;
        Ok(Self { db })
    }

    /// Whether a collection with this exact name exists.
    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.info(name)?.is_some())
    }

    pub fn info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let read = || -> Result<Option<CollectionInfo>> {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(COLLECTIONS)?;
            let Some(guard) = table.get(name)? else {
                return Ok(None);
            };
            Ok(Some(serde_json::from_slice(guard.value())?))
        };
        read().map_err(|e| e.in_store("info", name))
    }

    /// Create `name` and fill it with `chunks`.
    ///
    /// Fails with [`Error::DuplicateCollection`] if the name is taken.
    /// Embedding happens before anything is written, so a failed call
    /// leaves no trace.
    pub fn create_and_populate(
        &self,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        name: &str,
    ) -> Result<usize> {
        validate_name(name)?;
        if self.exists(name)? {
            return Err(Error::DuplicateCollection(name.to_string()));
        }

        let embeddings = embed_chunks(embedder, chunks.iter())?;

        let write = || -> Result<usize> {
            let txn = self.db.begin_write()?;
            {
                let mut collections = txn.open_table(COLLECTIONS)?;
                if collections.get(name)?.is_some() {
                    return Err(Error::DuplicateCollection(name.to_string()));
                }

                let mut info = CollectionInfo::new(name);
                let mut rows = txn.open_table(CHUNKS)?;
                let mut sources = txn.open_table(SOURCES)?;
                insert_rows(
                    &mut info,
                    &mut rows,
                    &mut sources,
                    chunks.iter().zip(&embeddings),
                )?;
                collections.insert(name, serde_json::to_vec(&info)?.as_slice())?;
            }
            txn.commit()?;
            Ok(chunks.len())
        };

        let count = write().map_err(|e| e.in_store("create", name))?;
        info!(collection = name, chunks = count, "created collection");
        Ok(count)
    }

    /// Add chunks to an existing collection.
    ///
    /// Deduplication works per source document: if any chunk of a source
    /// is already stored, every incoming chunk of that source is skipped.
    pub fn append(
        &self,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        name: &str,
    ) -> Result<AppendOutcome> {
        if !self.exists(name)? {
            return Err(Error::NotFound {
                kind: "collection",
                name: name.to_string(),
            });
        }

        let existing: HashSet<String> =
            self.list_sources(name)?.into_iter().collect();

        let mut outcome = AppendOutcome::default();
        let mut fresh = Vec::new();
        for chunk in chunks {
            if existing.contains(&chunk.source) {
                push_unique(&mut outcome.skipped_sources, &chunk.source);
            } else {
                push_unique(&mut outcome.added_sources, &chunk.source);
                fresh.push(chunk);
            }
        }

        if fresh.is_empty() {
            debug!(collection = name, "nothing new to append");
            return Ok(outcome);
        }

        let embeddings = embed_chunks(embedder, fresh.iter().copied())?;

        let write = || -> Result<Vec<String>> {
            let txn = self.db.begin_write()?;
            let raced = {
                let mut collections = txn.open_table(COLLECTIONS)?;
                let mut info: CollectionInfo = match collections.get(name)? {
                    Some(guard) => serde_json::from_slice(guard.value())?,
                    None => {
                        return Err(Error::NotFound {
                            kind: "collection",
                            name: name.to_string(),
                        });
                    }
                };
                let mut rows = txn.open_table(CHUNKS)?;
                let mut sources = txn.open_table(SOURCES)?;

                // A concurrent writer may have stored one of these sources
                // since the read above.
                let mut raced = Vec::new();
                for source in &outcome.added_sources {
                    if sources.get((name, source.as_str()))?.is_some() {
                        raced.push(source.clone());
                    }
                }

                insert_rows(
                    &mut info,
                    &mut rows,
                    &mut sources,
                    fresh
                        .iter()
                        .copied()
                        .zip(&embeddings)
                        .filter(|(chunk, _)| !raced.contains(&chunk.source)),
                )?;
                collections.insert(name, serde_json::to_vec(&info)?.as_slice())?;
                raced
            };
            txn.commit()?;
            Ok(raced)
        };

        let raced = write().map_err(|e| e.in_store("append", name))?;

        outcome.added_chunks = fresh
            .iter()
            .filter(|chunk| !raced.contains(&chunk.source))
            .count();
        outcome.added_sources.retain(|s| !raced.contains(s));
        for source in raced {
            push_unique(&mut outcome.skipped_sources, &source);
        }

        info!(
            collection = name,
            chunks = outcome.added_chunks,
            sources = outcome.added_sources.len(),
            skipped = outcome.skipped_sources.len(),
            "appended to collection"
        );
        Ok(outcome)
    }

    /// All collection names, ascending.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let read = || -> Result<Vec<String>> {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(COLLECTIONS)?;
            let mut names = Vec::new();
            for entry in table.iter()? {
                let (key, _) = entry?;
                names.push(key.value().to_string());
            }
            Ok(names)
        };
        read().map_err(|e| e.in_store("list_collections", ALL_COLLECTIONS))
    }

    /// Distinct source identifiers in a collection, ascending. A missing
    /// collection has no sources.
    pub fn list_sources(&self, name: &str) -> Result<Vec<String>> {
        let read = || -> Result<Vec<String>> {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(SOURCES)?;
            let mut sources = Vec::new();
            for entry in table.range((name, "")..)? {
                let (key, _) = entry?;
                let (collection, source) = key.value();
                if collection != name {
                    break;
                }
                sources.push(source.to_string());
            }
            Ok(sources)
        };
        read().map_err(|e| e.in_store("list_sources", name))
    }

    /// Number of stored chunks, optionally restricted to one source.
    pub fn chunk_count(&self, name: &str, source: Option<&str>) -> Result<usize> {
        let read = || -> Result<usize> {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(SOURCES)?;
            if let Some(source) = source {
                return Ok(table
                    .get((name, source))?
                    .map_or(0, |guard| guard.value() as usize));
            }

            let mut total = 0;
            for entry in table.range((name, "")..)? {
                let (key, value) = entry?;
                if key.value().0 != name {
                    break;
                }
                total += value.value() as usize;
            }
            Ok(total)
        };
        read().map_err(|e| e.in_store("chunk_count", name))
    }

    /// Delete every chunk whose source is in `sources`.
    ///
    /// All removals share one write transaction: either every listed source
    /// is gone afterwards or the collection is unchanged. Returns the number
    /// of chunks removed.
    pub fn delete_sources(&self, name: &str, sources: &[String]) -> Result<usize> {
        self.delete_sources_with(name, sources, |_| Ok(()))
    }

    /// [`Self::delete_sources`] with a hook called before each source is
    /// removed. An error from the hook aborts the whole deletion.
    fn delete_sources_with<F>(
        &self,
        name: &str,
        sources: &[String],
        mut before_remove: F,
    ) -> Result<usize>
    where
        F: FnMut(&str) -> Result<()>,
    {
        let mut write = || -> Result<usize> {
            let txn = self.db.begin_write()?;
            match remove_sources(&txn, name, sources, &mut before_remove) {
                Ok(removed) => {
                    txn.commit()?;
                    Ok(removed)
                }
                Err(e) => {
                    txn.abort()?;
                    Err(e)
                }
            }
        };

        let removed = write().map_err(|e| e.in_store("delete", name))?;
        info!(
            collection = name,
            sources = sources.len(),
            chunks = removed,
            "deleted documents"
        );
        Ok(removed)
    }

    /// Remove a collection and all of its rows. Returns `false` if it did
    /// not exist.
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        let write = || -> Result<bool> {
            let txn = self.db.begin_write()?;
            let existed = {
                let mut collections = txn.open_table(COLLECTIONS)?;
                let existed = collections.remove(name)?.is_some();

                let mut rows = txn.open_table(CHUNKS)?;
                for row in row_ids(&rows, name)? {
                    rows.remove((name, row))?;
                }

                let mut sources = txn.open_table(SOURCES)?;
                let mut names = Vec::new();
                for entry in sources.range((name, "")..)? {
                    let (key, _) = entry?;
                    let (collection, source) = key.value();
                    if collection != name {
                        break;
                    }
                    names.push(source.to_string());
                }
                for source in &names {
                    sources.remove((name, source.as_str()))?;
                }
                existed
            };
            txn.commit()?;
            Ok(existed)
        };

        let existed = write().map_err(|e| e.in_store("drop", name))?;
        if existed {
            info!(collection = name, "dropped collection");
        }
        Ok(existed)
    }

    /// The `top_k` stored chunks most similar to `query`, best first.
    /// Ties keep insertion order.
    pub fn nearest(
        &self,
        name: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let read = || -> Result<Vec<(u64, Vec<u8>)>> {
            let txn = self.db.begin_read()?;
            let collections = txn.open_table(COLLECTIONS)?;
            let info: CollectionInfo = match collections.get(name)? {
                Some(guard) => serde_json::from_slice(guard.value())?,
                None => {
                    return Err(Error::NotFound {
                        kind: "collection",
                        name: name.to_string(),
                    });
                }
            };
            if let Some(expected) = info.dimension
                && expected != query.len()
            {
                return Err(Error::EmbeddingDimension {
                    expected,
                    found: query.len(),
                });
            }

            let table = txn.open_table(CHUNKS)?;
            let mut raw = Vec::new();
            for entry in table.range((name, 0u64)..)? {
                let (key, value) = entry?;
                let (collection, row) = key.value();
                if collection != name {
                    break;
                }
                raw.push((row, value.value().to_vec()));
            }
            Ok(raw)
        };
        let raw = read().map_err(|e| e.in_store("nearest", name))?;

        let mut scored: Vec<(u64, ScoredChunk)> = raw
            .par_iter()
            .map(|(row, bytes)| -> Result<(u64, ScoredChunk)> {
                let (chunk, embedding) = decode_row(name, bytes)?;
                let score = cosine_similarity(query, &embedding);
                Ok((*row, ScoredChunk { chunk, score }))
            })
            .collect::<Result<_>>()
            .map_err(|e: Error| e.in_store("nearest", name))?;

        scored.sort_by(|(row_a, a), (row_b, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(row_a.cmp(row_b))
        });
        scored.truncate(top_k);

        Ok(scored.into_iter().map(|(_, chunk)| chunk).collect())
    }
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore").finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Config("collection name must not be empty".into()));
    }
    Ok(())
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn embed_chunks<'a>(
    embedder: &dyn Embedder,
    chunks: impl Iterator<Item = &'a Chunk>,
) -> Result<Vec<Vec<f32>>> {
    let texts: Vec<String> = chunks.map(|c| c.text.clone()).collect();
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let vectors = embedder.embed_documents(&texts)?;
    if vectors.len() != texts.len() {
        return Err(Error::Model(format!(
            "embedder returned {} vectors for {} chunks",
            vectors.len(),
            texts.len()
        )));
    }
    Ok(vectors)
}

fn insert_rows<'a>(
    info: &mut CollectionInfo,
    rows: &mut ChunkTable<'_>,
    sources: &mut SourceTable<'_>,
    entries: impl Iterator<Item = (&'a Chunk, &'a Vec<f32>)>,
) -> Result<()> {
    let name = info.name.clone();
    for (chunk, embedding) in entries {
        info.check_dimension(embedding.len())?;
        let row = encode_row(chunk, embedding)?;
        rows.insert((name.as_str(), info.next_row), row.as_slice())?;
        info.next_row += 1;

        let key = (name.as_str(), chunk.source.as_str());
        let count = sources.get(key)?.map_or(0, |guard| guard.value());
        sources.insert(key, count + 1)?;
    }
    Ok(())
}

fn row_ids(rows: &ChunkTable<'_>, name: &str) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in rows.range((name, 0u64)..)? {
        let (key, _) = entry?;
        let (collection, row) = key.value();
        if collection != name {
            break;
        }
        ids.push(row);
    }
    Ok(ids)
}

fn remove_sources<F>(
    txn: &WriteTransaction,
    name: &str,
    targets: &[String],
    before_remove: &mut F,
) -> Result<usize>
where
    F: FnMut(&str) -> Result<()>,
{
    let collections = txn.open_table(COLLECTIONS)?;
    if collections.get(name)?.is_none() {
        return Err(Error::NotFound {
            kind: "collection",
            name: name.to_string(),
        });
    }

    let mut rows = txn.open_table(CHUNKS)?;
    let mut sources = txn.open_table(SOURCES)?;

    // Match on the stored metadata rather than the source index.
    let mut by_source: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    for entry in rows.range((name, 0u64)..)? {
        let (key, value) = entry?;
        let (collection, row) = key.value();
        if collection != name {
            break;
        }
        let meta = decode_metadata(name, value.value())?;
        if targets.iter().any(|t| *t == meta.source) {
            by_source.entry(meta.source).or_default().push(row);
        }
    }

    let mut removed = 0;
    let mut seen = HashSet::new();
    for source in targets {
        if !seen.insert(source.as_str()) {
            continue;
        }
        before_remove(source)?;
        for row in by_source.get(source).into_iter().flatten() {
            rows.remove((name, *row))?;
            removed += 1;
        }
        sources.remove((name, source.as_str()))?;
    }
    Ok(removed)
}

fn encode_row(chunk: &Chunk, embedding: &[f32]) -> Result<Vec<u8>> {
    let meta = serde_json::to_vec(&RowMetadata {
        source: chunk.source.clone(),
        page: chunk.page,
        sequence_index: chunk.sequence_index,
    })?;
    let text = chunk.text.as_bytes();

    let mut buf = Vec::with_capacity(
        HEADER_SIZE + text.len() + meta.len() + std::mem::size_of_val(embedding),
    );
    buf.extend_from_slice(&(embedding.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(text.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    buf.extend_from_slice(text);
    buf.extend_from_slice(&meta);
    buf.extend_from_slice(bytemuck::cast_slice(embedding));
    Ok(buf)
}

struct RowLayout {
    dimension: usize,
    text: std::ops::Range<usize>,
    meta: std::ops::Range<usize>,
    embedding: std::ops::Range<usize>,
}

fn row_layout(collection: &str, bytes: &[u8]) -> Result<RowLayout> {
    let corrupt = |reason: &str| Error::CorruptRow {
        collection: collection.to_string(),
        reason: reason.to_string(),
    };
    let read_u32 = |at: usize| -> Option<usize> {
        let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
        Some(u32::from_le_bytes(raw) as usize)
    };

    let (Some(dimension), Some(text_len), Some(meta_len)) =
        (read_u32(0), read_u32(4), read_u32(8))
    else {
        return Err(corrupt("truncated header"));
    };

    let ends = HEADER_SIZE.checked_add(text_len).and_then(|text_end| {
        let meta_end = text_end.checked_add(meta_len)?;
        let embedding_len = dimension.checked_mul(4)?;
        let embedding_end = meta_end.checked_add(embedding_len)?;
        Some((text_end, meta_end, embedding_end))
    });
    let Some((text_end, meta_end, embedding_end)) = ends else {
        return Err(corrupt("header lengths overflow"));
    };
    if bytes.len() != embedding_end {
        return Err(corrupt("length does not match header"));
    }
    let text = HEADER_SIZE..text_end;
    let meta = text_end..meta_end;
    let embedding = meta_end..embedding_end;

    Ok(RowLayout {
        dimension,
        text,
        meta,
        embedding,
    })
}

fn decode_metadata(collection: &str, bytes: &[u8]) -> Result<RowMetadata> {
    let layout = row_layout(collection, bytes)?;
    Ok(serde_json::from_slice(&bytes[layout.meta])?)
}

fn decode_row(collection: &str, bytes: &[u8]) -> Result<(Chunk, Vec<f32>)> {
    let layout = row_layout(collection, bytes)?;
    let text = std::str::from_utf8(&bytes[layout.text]).map_err(|_| {
        Error::CorruptRow {
            collection: collection.to_string(),
            reason: "text is not UTF-8".into(),
        }
    })?;
    let meta: RowMetadata = serde_json::from_slice(&bytes[layout.meta])?;

    // Values inside the page are not guaranteed to be 4-byte aligned.
    let embedding: Vec<f32> = bytes[layout.embedding]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    debug_assert_eq!(embedding.len(), layout.dimension);

    let chunk = Chunk {
        text: text.to_string(),
        source: meta.source,
        page: meta.page,
        sequence_index: meta.sequence_index,
    };
    Ok((chunk, embedding))
}

/// Cosine similarity; zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
