use std::{collections::HashSet, path::Path};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    error::{Error, Result},
    record::{ChunkId, ChunkRecord},
    scorer::cosine_similarity,
    upstream::{Embedder, VectorIndex},
};

const VECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

/// A local semantic index: one embedding vector per chunk id.
///
/// Binary format per entry:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 LE values
///
/// Searches are a flat cosine scan over every stored vector.
pub struct VectorDb {
    db: Database,
}

impl VectorDb {
    /// Open or create a vector database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docrag::VectorDb;
    ///
    /// let db = VectorDb::open(&tmp.path().join("vectors.redb")).unwrap();
    /// assert!(db.list_ids().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store multiple vectors in a single transaction, replacing existing
    /// entries with the same id.
    pub fn batch_store(&self, entries: &[(ChunkId, Vec<f32>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            for (id, vector) in entries {
                let dimension = u32::try_from(vector.len()).map_err(|_| {
                    Error::validation(format!("vector for {id} is too large"))
                })?;
                let body: &[u8] = bytemuck::cast_slice(vector);
                let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
                bytes.extend_from_slice(&dimension.to_le_bytes());
                bytes.extend_from_slice(body);
                table.insert(id.as_str(), bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn load(&self, id: &ChunkId) -> Result<Option<Vec<f32>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let Some(guard) = table.get(id.as_str())? else {
            return Ok(None);
        };
        Ok(decode(guard.value()))
    }

    /// Remove multiple vectors in a single transaction.
    pub fn batch_remove(&self, ids: &[ChunkId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            for id in ids {
                table.remove(id.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn list_ids(&self) -> Result<Vec<ChunkId>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut ids = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            ids.push(ChunkId::from(k.value()));
        }
        Ok(ids)
    }

    /// Drop every vector whose chunk is no longer live. Returns how many
    /// were removed.
    pub fn prune(&self, live: &HashSet<ChunkId>) -> Result<usize> {
        let stale: Vec<ChunkId> = self
            .list_ids()?
            .into_iter()
            .filter(|id| !live.contains(id))
            .collect();
        self.batch_remove(&stale)?;
        if !stale.is_empty() {
            tracing::info!(removed = stale.len(), "pruned stale vectors");
        }
        Ok(stale.len())
    }
}

impl VectorIndex for VectorDb {
    fn similarity_search(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(ChunkId, f32)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;

        let mut hits = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let Some(stored) = decode(v.value()) else {
                tracing::warn!(id = k.value(), "skipping malformed vector");
                continue;
            };
            let score = cosine_similarity(vector, &stored).clamp(0.0, 1.0);
            hits.push((ChunkId::from(k.value()), score));
        }

        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

impl std::fmt::Debug for VectorDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorDb").finish_non_exhaustive()
    }
}

fn decode(bytes: &[u8]) -> Option<Vec<f32>> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != dimension * 4 {
        return None;
    }
    // redb values carry no alignment guarantee
    Some(bytemuck::pod_collect_to_vec(body))
}

/// Embed every chunk's text and store the vectors under the chunk ids.
///
/// Returns the number of vectors written.
pub fn index_chunks<'a>(
    embedder: &dyn Embedder,
    db: &VectorDb,
    chunks: impl IntoIterator<Item = &'a ChunkRecord>,
) -> Result<usize> {
    let chunks: Vec<&ChunkRecord> = chunks.into_iter().collect();
    if chunks.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed_batch(&texts)?;
    if vectors.len() != chunks.len() {
        return Err(Error::upstream(format!(
            "embedder returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        )));
    }

    let entries: Vec<(ChunkId, Vec<f32>)> = chunks
        .iter()
        .map(|c| c.id.clone())
        .zip(vectors)
        .collect();
    db.batch_store(&entries)?;

    tracing::info!(count = entries.len(), "indexed chunk vectors");
    Ok(entries.len())
}
