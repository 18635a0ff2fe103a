//! # VectorIndex
//!
//! In-memory nearest-neighbour index over product embeddings.
//!
//! Every row is L2-normalised when the index is built and every query is
//! normalised the same way before scoring, so the inner product *is* the
//! cosine similarity and scores fall in `[-1, 1]`.
//!
//! ## Layout
//! Row `i` corresponds to catalog product `i + 1`. Rows live in one flat,
//! contiguous `Vec<f32>` (`len * dimension` floats).
//!
//! ## Search strategies
//! - [`IndexKind::Flat`]: exact brute-force scoring, parallelised with rayon.
//!   Deterministic; the right choice for hundreds to low thousands of rows.
//! - [`IndexKind::Hnsw`]: a `hora` HNSW graph proposes candidates which are then
//!   re-scored exactly, so reported scores are still true cosine similarities.
//!
//! ## Persistence
//! [`VectorIndex::save`] writes the rows together with the
//! [`EmbeddingSpace`] and catalog version they were built from (bincode).
//! The HNSW graph is not persisted; it is rebuilt from the rows on load.
//!
//! ```no_run
//! use vestra::config::IndexKind;
//! use vestra::vector_index::VectorIndex;
//!
//! # fn demo(query: Vec<f32>) -> vestra::error::Result<()> {
//! let index = VectorIndex::load("product_index.bin", IndexKind::Flat)?;
//! for (position, score) in index.search(&query, 5)? {
//!     println!("product {} scored {score:.3}", position + 1);
//! }
//! # Ok(()) }
//! ```

use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::catalog::ProductCatalog;
use crate::config::IndexKind;
use crate::embedding::{EmbeddingProvider, EmbeddingSpace};
use crate::error::{Error, Result};

const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct IndexFileRef<'a> {
    format_version: u32,
    space: &'a EmbeddingSpace,
    catalog_version: i32,
    len: usize,
    vectors: &'a [f32],
}

#[derive(Deserialize)]
struct IndexFile {
    format_version: u32,
    space: EmbeddingSpace,
    catalog_version: i32,
    len: usize,
    vectors: Vec<f32>,
}

/// Scale `v` to unit length in place. The zero vector is left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Descending score, ascending position on ties.
fn by_score_desc(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

pub struct VectorIndex {
    space: EmbeddingSpace,
    catalog_version: i32,
    len: usize,
    vectors: Vec<f32>,
    ann: Option<HNSWIndex<f32, usize>>,
}

impl VectorIndex {
    /// Build a flat index from raw rows. Rows are normalised here.
    ///
    /// # Errors
    /// - [`Error::DimensionMismatch`] if any row is not `space.dimension` long.
    /// - [`Error::InvalidCatalog`] if a row holds a non-finite value.
    pub fn from_vectors(
        space: EmbeddingSpace,
        catalog_version: i32,
        rows: Vec<Vec<f32>>,
    ) -> Result<Self> {
        let dimension = space.dimension;
        if dimension == 0 {
            return Err(Error::IndexUnavailable("index dimension is zero".into()));
        }

        let len = rows.len();
        let mut vectors = Vec::with_capacity(len * dimension);
        for (position, mut row) in rows.into_iter().enumerate() {
            if row.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: row.len(),
                });
            }
            if row.iter().any(|x| !x.is_finite()) {
                return Err(Error::InvalidCatalog(format!(
                    "embedding for row {position} contains non-finite values"
                )));
            }
            normalize(&mut row);
            vectors.extend_from_slice(&row);
        }

        Ok(Self {
            space,
            catalog_version,
            len,
            vectors,
            ann: None,
        })
    }

    /// Switch search strategy. `Hnsw` builds the graph now.
    pub fn with_kind(mut self, kind: IndexKind) -> Result<Self> {
        self.ann = match kind {
            IndexKind::Flat => None,
            IndexKind::Hnsw if self.len == 0 => None,
            IndexKind::Hnsw => Some(self.build_hnsw()?),
        };
        Ok(self)
    }

    fn build_hnsw(&self) -> Result<HNSWIndex<f32, usize>> {
        let mut ann = HNSWIndex::<f32, usize>::new(self.dimension(), &HNSWParams::<f32>::default());
        for position in 0..self.len {
            ann.add(self.row(position), position)
                .map_err(|e| Error::IndexUnavailable(format!("hnsw add failed: {e}")))?;
        }
        // Euclidean order on unit vectors equals cosine order.
        ann.build(Metric::Euclidean)
            .map_err(|e| Error::IndexUnavailable(format!("hnsw build failed: {e}")))?;
        debug!("Built HNSW graph over {} rows", self.len);
        Ok(ann)
    }

    pub fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    pub fn dimension(&self) -> usize {
        self.space.dimension
    }

    /// Catalog version the rows were embedded from.
    pub fn catalog_version(&self) -> i32 {
        self.catalog_version
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn kind(&self) -> IndexKind {
        if self.ann.is_some() {
            IndexKind::Hnsw
        } else {
            IndexKind::Flat
        }
    }

    fn row(&self, position: usize) -> &[f32] {
        let d = self.dimension();
        &self.vectors[position * d..(position + 1) * d]
    }

    /// Top-`k` rows by cosine similarity to `query`, best first.
    ///
    /// # Errors
    /// [`Error::DimensionMismatch`] when `query.len() != self.dimension()`.
    /// The query is never truncated or padded.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if k == 0 || self.len == 0 {
            return Ok(Vec::new());
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = match &self.ann {
            Some(ann) if k < self.len => ann
                .search(&q, k)
                .into_iter()
                .filter(|&p| p < self.len)
                .map(|p| (p, dot(&q, self.row(p))))
                .collect(),
            _ => self
                .vectors
                .par_chunks(self.dimension())
                .enumerate()
                .map(|(p, row)| (p, dot(&q, row)))
                .collect(),
        };

        scored.sort_unstable_by(by_score_desc);
        scored.truncate(k);
        Ok(scored)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = IndexFileRef {
            format_version: INDEX_FORMAT_VERSION,
            space: &self.space,
            catalog_version: self.catalog_version,
            len: self.len,
            vectors: &self.vectors,
        };
        let bytes = bincode::serde::encode_to_vec(&file, bincode::config::standard())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        info!(
            "Saved index ({} rows, {}) to {}",
            self.len,
            self.space,
            path.display()
        );
        Ok(())
    }

    /// Load a saved index.
    ///
    /// # Errors
    /// [`Error::IndexUnavailable`] if the file is missing, from another format
    /// version, or internally inconsistent.
    pub fn load(path: impl AsRef<Path>, kind: IndexKind) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            Error::IndexUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        let (file, _): (IndexFile, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;

        if file.format_version != INDEX_FORMAT_VERSION {
            return Err(Error::IndexUnavailable(format!(
                "unsupported index format {}",
                file.format_version
            )));
        }
        if file.space.dimension == 0 || file.vectors.len() != file.len * file.space.dimension {
            return Err(Error::IndexUnavailable(format!(
                "{} holds {} floats for {} rows of dimension {}",
                path.display(),
                file.vectors.len(),
                file.len,
                file.space.dimension
            )));
        }

        info!(
            "Loaded index ({} rows, {}, catalog v{}) from {}",
            file.len,
            file.space,
            file.catalog_version,
            path.display()
        );
        Self {
            space: file.space,
            catalog_version: file.catalog_version,
            len: file.len,
            vectors: file.vectors,
            ann: None,
        }
        .with_kind(kind)
    }
}

/// Embed every catalog product, in id order, into a new index.
///
/// Ids must run exactly `1..=n` so that row `i` is product `i + 1`.
pub async fn build_index(
    catalog: &ProductCatalog,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
    kind: IndexKind,
) -> Result<VectorIndex> {
    catalog.check_contiguous()?;
    let products = catalog.ordered();
    let batch_size = batch_size.max(1);

    let progress = ProgressBar::new(products.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} embedding [{bar:40}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut rows = Vec::with_capacity(products.len());
    for chunk in products.chunks(batch_size) {
        let texts: Vec<String> = chunk.iter().map(|p| p.embedding_text()).collect();
        let vectors = provider.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        rows.extend(vectors);
        progress.inc(chunk.len() as u64);
    }
    progress.finish_and_clear();

    info!(
        "Embedded {} products from catalog v{} with {}",
        rows.len(),
        catalog.version(),
        provider.space()
    );
    VectorIndex::from_vectors(provider.space().clone(), catalog.version(), rows)?.with_kind(kind)
}
