//! Exact inner-product vector index with aligned id and metadata sequences.
//!
//! # Lifecycle
//!
//! ```text
//! unbuilt ──build──▶ built ──save──▶ persisted ◀──load──▶ loaded
//! ```
//!
//! Vectors come from an [`Embedder`], which normalizes them to unit length,
//! so inner product equals cosine similarity.
//!
//! # Persisted Artifacts
//!
//! The three artifacts are one unit and are only ever loaded together:
//!
//! | Artifact | Format |
//! |----------|--------|
//! | index | `TIXF` magic, version `u32`, dims `u32`, count `u64`, then `count × dims` `f32` (all little-endian) |
//! | ids | JSON array of strings |
//! | metadata | JSON Lines, one object per id, same order |
//!
//! Load checks the header against the payload and both sequences, and
//! reports [`Error::IndexCorrupt`] instead of serving misaligned rows.

use std::cmp::Ordering;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::PathsConfig;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{Document, DocumentMetadata, SearchHit};

const MAGIC: &[u8; 4] = b"TIXF";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Label reported for a result slot with no vector behind it.
pub const NO_MATCH: i64 = -1;

/// Brute-force inner-product index over row-major `f32` storage.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIpIndex {
    dims: usize,
    data: Vec<f32>,
}

impl FlatIpIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                got: vector.len(),
            });
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    fn vector(&self, position: usize) -> &[f32] {
        &self.data[position * self.dims..(position + 1) * self.dims]
    }

    /// Top-`k` `(score, label)` pairs, best first.
    ///
    /// Always returns exactly `k` slots; when `k` exceeds the number of
    /// stored vectors the tail is padded with [`NO_MATCH`] labels, so `k`
    /// must be bounded by the caller.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, i64)>> {
        if query.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                got: query.len(),
            });
        }

        let mut scored: Vec<(f32, i64)> = (0..self.len())
            .map(|i| {
                let score = self
                    .vector(i)
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| a * b)
                    .sum::<f32>();
                (score, i as i64)
            })
            .collect();

        scored.sort_by(|a, b| descending(a.0, b.0));
        scored.truncate(k);
        scored.resize(k, (f32::NEG_INFINITY, NO_MATCH));
        Ok(scored)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.dims as u32).to_le_bytes())?;
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for v in &self.data {
            writer.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::corrupt("index header is truncated"));
        }
        if &bytes[..4] != MAGIC {
            return Err(Error::corrupt("index file has the wrong magic bytes"));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(Error::corrupt(format!(
                "unsupported index format version {}",
                version
            )));
        }
        let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[12..20]);
        let count = u64::from_le_bytes(count_bytes) as usize;

        let payload = &bytes[HEADER_LEN..];
        let expected = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| Error::corrupt("index header counts overflow"))?;
        if payload.len() != expected {
            return Err(Error::corrupt(format!(
                "index payload is {} bytes, header promises {} vectors of {} dims",
                payload.len(),
                count,
                dims
            )));
        }
        if dims == 0 && count > 0 {
            return Err(Error::corrupt("index header has zero dimensions"));
        }

        let data = payload
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let index = Self { dims, data };
        if index.len() != count {
            return Err(Error::corrupt("index vector count disagrees with header"));
        }
        Ok(index)
    }
}

/// Descending by score; NaN ranks below every number.
fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}

/// Locations of the three index artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub index: PathBuf,
    pub ids: PathBuf,
    pub metadata: PathBuf,
}

impl IndexPaths {
    pub fn from_config(paths: &PathsConfig) -> Self {
        Self {
            index: paths.index_path(),
            ids: paths.ids_path(),
            metadata: paths.metadata_path(),
        }
    }
}

/// The searchable unit: vectors plus the ids and metadata they resolve to.
///
/// Immutable once built or loaded; share it behind an `Arc` for concurrent
/// queries.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    index: FlatIpIndex,
    ids: Vec<String>,
    metadata: Vec<DocumentMetadata>,
}

impl VectorIndex {
    /// Embed every document with a non-empty id and text, in document order.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyDocumentSet`] when nothing survives filtering, or a
    /// provider failure from the embedder.
    pub async fn build(documents: &[Document], embedder: &Embedder) -> Result<Self> {
        let kept: Vec<&Document> = documents
            .iter()
            .filter(|d| !d.id.trim().is_empty() && !d.text.trim().is_empty())
            .collect();
        if kept.is_empty() {
            return Err(Error::EmptyDocumentSet);
        }
        let dropped = documents.len() - kept.len();
        if dropped > 0 {
            tracing::warn!(dropped, "skipping documents with empty id or text");
        }

        let texts: Vec<String> = kept.iter().map(|d| d.text.clone()).collect();
        let vectors = embedder.encode_batch(&texts).await?;

        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        if dims == 0 {
            return Err(Error::Provider(anyhow::anyhow!(
                "embedding provider '{}' returned empty vectors",
                embedder.model_name()
            )));
        }

        let mut index = FlatIpIndex::new(dims);
        for v in &vectors {
            index.add(v)?;
        }

        Ok(Self {
            index,
            ids: kept.iter().map(|d| d.id.clone()).collect(),
            metadata: kept.iter().map(|d| d.metadata.clone()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.index.dims()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn metadata(&self) -> &[DocumentMetadata] {
        &self.metadata
    }

    /// Write all three artifacts, replacing any previous build.
    ///
    /// The index file is renamed into place last so its presence implies
    /// the other two were written.
    pub fn save(&self, paths: &IndexPaths) -> Result<()> {
        write_atomic(&paths.ids, |w| {
            serde_json::to_writer(&mut *w, &self.ids)?;
            Ok(())
        })?;
        write_atomic(&paths.metadata, |w| {
            for meta in &self.metadata {
                serde_json::to_writer(&mut *w, meta)?;
                w.write_all(b"\n")?;
            }
            Ok(())
        })?;
        write_atomic(&paths.index, |w| {
            self.index.write_to(w)?;
            Ok(())
        })?;
        Ok(())
    }

    /// Read all three artifacts back and check their alignment.
    ///
    /// # Errors
    ///
    /// [`Error::IndexNotFound`] if the index artifact is absent, whatever
    /// the state of the other two; [`Error::IndexCorrupt`] for anything
    /// missing, malformed, or misaligned beyond that.
    pub fn load(paths: &IndexPaths) -> Result<Self> {
        if !paths.index.is_file() {
            return Err(Error::IndexNotFound {
                path: paths.index.clone(),
            });
        }
        let index = FlatIpIndex::from_bytes(&std::fs::read(&paths.index)?)?;

        let ids = read_ids(&paths.ids)?;
        let metadata = read_metadata(&paths.metadata)?;

        if ids.len() != index.len() {
            return Err(Error::corrupt(format!(
                "index holds {} vectors but {} ids",
                index.len(),
                ids.len()
            )));
        }
        if metadata.len() != ids.len() {
            return Err(Error::corrupt(format!(
                "{} ids but {} metadata rows",
                ids.len(),
                metadata.len()
            )));
        }

        tracing::debug!(documents = ids.len(), dims = index.dims(), "loaded index");
        Ok(Self {
            index,
            ids,
            metadata,
        })
    }

    /// Nearest neighbours of `query`, at most `k`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let k = k.min(self.index.len());
        let raw = self.index.search(query, k)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = raw
            .into_iter()
            .filter_map(|(score, label)| {
                let position = usize::try_from(label).ok()?;
                let id = self.ids.get(position)?;
                let metadata = self.metadata.get(position)?;
                Some(SearchHit {
                    id: id.clone(),
                    score,
                    metadata: metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| descending(a.score, b.score));
        Ok(hits)
    }

    /// Fails with [`Error::DimensionMismatch`] when `embedder` produces
    /// vectors of a different width than the stored ones. Providers that
    /// do not report a width are accepted.
    pub fn ensure_compatible(&self, embedder: &Embedder) -> Result<()> {
        let got = embedder.dims();
        if got != 0 && got != self.dims() {
            return Err(Error::DimensionMismatch {
                expected: self.dims(),
                got,
            });
        }
        Ok(())
    }

    /// Embed `text` with the same embedder used at build time, then search.
    pub async fn query(&self, text: &str, embedder: &Embedder, k: usize) -> Result<Vec<SearchHit>> {
        let vector = embedder.encode(text).await?;
        self.search(&vector, k)
    }
}

fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<std::fs::File>) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    {
        let mut writer = BufWriter::new(std::fs::File::create(&tmp)?);
        write(&mut writer)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_ids(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Err(Error::corrupt(format!(
            "id artifact missing at {}",
            path.display()
        )));
    }
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| Error::corrupt(format!("id artifact is not a JSON string array: {}", e)))
}

fn read_metadata(path: &Path) -> Result<Vec<DocumentMetadata>> {
    if !path.is_file() {
        return Err(Error::corrupt(format!(
            "metadata artifact missing at {}",
            path.display()
        )));
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut rows = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let meta = serde_json::from_str(&line)
            .map_err(|e| Error::corrupt(format!("metadata line {}: {}", n + 1, e)))?;
        rows.push(meta);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledProvider, HashingProvider};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            text: text.to_string(),
            metadata: DocumentMetadata {
                ticket_id: id.to_string(),
                problem: text.to_string(),
                ..DocumentMetadata::default()
            },
        }
    }

    fn hashing() -> Embedder {
        Embedder::new(Arc::new(HashingProvider::new(384)), 16)
    }

    fn paths(dir: &TempDir) -> IndexPaths {
        IndexPaths {
            index: dir.path().join("index.flat"),
            ids: dir.path().join("index_ids.json"),
            metadata: dir.path().join("index_meta.jsonl"),
        }
    }

    fn unit_index() -> VectorIndex {
        let mut index = FlatIpIndex::new(2);
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        index.add(&[0.6, 0.8]).unwrap();
        VectorIndex {
            index,
            ids: vec!["A".into(), "B".into(), "C".into()],
            metadata: vec![DocumentMetadata::default(); 3],
        }
    }

    #[test]
    fn flat_search_pads_with_sentinels() {
        let index = unit_index().index;
        let raw = index.search(&[1.0, 0.0], 5).unwrap();
        assert_eq!(raw.len(), 5);
        assert_eq!(raw[0].1, 0);
        assert_eq!(raw[1].1, 2);
        assert_eq!(raw[3].1, NO_MATCH);
        assert_eq!(raw[4].1, NO_MATCH);
    }

    #[test]
    fn search_drops_sentinels_and_sorts_descending() {
        let index = unit_index();
        let hits = index.search(&[0.0, 1.0], 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C", "A"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn search_respects_k() {
        let index = unit_index();
        assert_eq!(index.search(&[1.0, 0.0], 2).unwrap().len(), 2);
        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn embedder_width_must_match_index() {
        let index = unit_index();
        let err = index.ensure_compatible(&hashing()).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                got: 384
            }
        ));

        let matching = Embedder::new(Arc::new(HashingProvider::new(2)), 4);
        index.ensure_compatible(&matching).unwrap();
        let disabled = Embedder::new(Arc::new(DisabledProvider), 4);
        index.ensure_compatible(&disabled).unwrap();
    }

    #[test]
    fn oversized_k_returns_every_vector() {
        let index = unit_index();
        let hits = index.search(&[1.0, 0.0], usize::MAX).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "A");
    }

    #[test]
    fn wrong_query_width_is_rejected() {
        let err = unit_index().search(&[1.0, 0.0, 0.0], 1).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                got: 3
            }
        ));
    }

    #[test]
    fn nan_scores_rank_last() {
        let mut scores = vec![0.1, f32::NAN, 0.9, -0.5];
        scores.sort_by(|a, b| descending(*a, *b));
        assert_eq!(scores[0], 0.9);
        assert!(scores[3].is_nan());
    }

    #[tokio::test]
    async fn build_filters_empty_documents() {
        let docs = vec![doc("TCKT-1", "vpn"), doc("", "orphan"), doc("TCKT-3", "  ")];
        let index = VectorIndex::build(&docs, &hashing()).await.unwrap();
        assert_eq!(index.ids(), &["TCKT-1".to_string()]);
    }

    #[tokio::test]
    async fn build_with_nothing_indexable_fails() {
        let docs = vec![doc("", "text"), doc("TCKT-2", "")];
        let err = VectorIndex::build(&docs, &hashing()).await.unwrap_err();
        assert!(matches!(err, Error::EmptyDocumentSet));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let embedder = hashing();
        let docs = vec![
            doc("TCKT-1", "Issue: VPN drops - Description: disconnects"),
            doc("TCKT-2", "Issue: Printer offline - Description: no network"),
            doc("TCKT-3", "Issue: Password reset - Description: locked out"),
        ];
        let built = VectorIndex::build(&docs, &embedder).await.unwrap();
        built.save(&paths(&dir)).unwrap();

        let loaded = VectorIndex::load(&paths(&dir)).unwrap();
        assert_eq!(loaded.ids(), built.ids());
        assert_eq!(loaded.metadata(), built.metadata());

        let q = embedder.encode("printer network").await.unwrap();
        let a = built.search(&q, 3).unwrap();
        let b = loaded.search(&q, 3).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert!((x.score - y.score).abs() < 1e-6);
        }
    }

    #[test]
    fn missing_index_is_not_found_even_with_other_artifacts() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        std::fs::write(&p.ids, "[]").unwrap();
        std::fs::write(&p.metadata, "").unwrap();
        assert!(matches!(
            VectorIndex::load(&p),
            Err(Error::IndexNotFound { .. })
        ));
    }

    #[test]
    fn misaligned_artifacts_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        unit_index().save(&p).unwrap();
        std::fs::write(&p.ids, r#"["A","B"]"#).unwrap();
        assert!(matches!(
            VectorIndex::load(&p),
            Err(Error::IndexCorrupt { .. })
        ));

        unit_index().save(&p).unwrap();
        std::fs::remove_file(&p.metadata).unwrap();
        assert!(matches!(
            VectorIndex::load(&p),
            Err(Error::IndexCorrupt { .. })
        ));
    }

    #[test]
    fn truncated_index_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        unit_index().save(&p).unwrap();
        let bytes = std::fs::read(&p.index).unwrap();
        std::fs::write(&p.index, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(
            VectorIndex::load(&p),
            Err(Error::IndexCorrupt { .. })
        ));

        std::fs::write(&p.index, b"NOPE").unwrap();
        assert!(matches!(
            VectorIndex::load(&p),
            Err(Error::IndexCorrupt { .. })
        ));
    }

    #[tokio::test]
    async fn vpn_query_prefers_vpn_ticket() {
        let embedder = hashing();
        let docs = vec![
            doc("TCKT-1", "Issue: VPN drops - Description: disconnects"),
            doc("TCKT-2", "Issue: Printer offline - Description: no network"),
        ];
        let index = VectorIndex::build(&docs, &embedder).await.unwrap();

        let top = index.query("VPN keeps disconnecting", &embedder, 1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, "TCKT-1");

        let all = index.query("VPN keeps disconnecting", &embedder, 2).await.unwrap();
        assert_eq!(all[1].id, "TCKT-2");
        assert!(all[0].score > all[1].score);
    }
}
