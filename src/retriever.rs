//! # Retrieval orchestrator
//!
//! [`Retriever::retrieve`] turns free text into a ranked, policy-compliant
//! candidate list:
//!
//! 1. detect gender intent from the query;
//! 2. embed the query with the configured provider;
//! 3. check the embedding dimension against the index (hard error);
//! 4. search the index for `over_fetch_factor * k` candidates;
//! 5. map index position `p` to catalog id `p + 1`, skipping ids the catalog
//!    does not know;
//! 6. run the filter chain;
//! 7. keep the first `k` survivors (and, if configured, run the repeat gate).
//!
//! A short or empty result is a normal outcome, never an error and never
//! padded. `k = 0` still embeds and checks the dimension before returning
//! nothing.
//!
//! The index and catalog are held together in a [`Snapshot`] that is
//! validated once and then shared read-only. A rebuilt snapshot replaces the
//! old one atomically with [`Retriever::swap_snapshot`]; in-flight calls keep
//! using the snapshot they started with.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::ProductCatalog;
use crate::config::{DEFAULT_OVER_FETCH_FACTOR, RetrievalConfig};
use crate::dedup::DedupGate;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::filter::{Budget, FilterChain, FilterContext, GenderIntent, detect_intent};
use crate::product::ScoredProduct;
use crate::vector_index::VectorIndex;

/// An index and the exact catalog version it was built from.
pub struct Snapshot {
    index: VectorIndex,
    catalog: ProductCatalog,
}

impl Snapshot {
    /// Pair an index with a catalog.
    ///
    /// # Errors
    /// [`Error::IndexOutOfSync`] when the row count differs from the product
    /// count or the index was built from another catalog version.
    /// [`Error::InvalidCatalog`] when catalog ids do not run `1..=n`, since
    /// row `p` is read as id `p + 1`.
    pub fn new(index: VectorIndex, catalog: ProductCatalog) -> Result<Self> {
        catalog.check_contiguous()?;
        if index.len() != catalog.len() {
            return Err(Error::IndexOutOfSync(format!(
                "index has {} rows but catalog v{} has {} products",
                index.len(),
                catalog.version(),
                catalog.len()
            )));
        }
        if index.catalog_version() != catalog.version() {
            return Err(Error::IndexOutOfSync(format!(
                "index was built from catalog v{} but v{} is loaded",
                index.catalog_version(),
                catalog.version()
            )));
        }
        Ok(Self { index, catalog })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }
}

/// Ranked output of one retrieval.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub intent: Option<GenderIntent>,
    pub hits: Vec<ScoredProduct>,
}

impl RetrievalResult {
    /// Scores parallel to `hits`.
    pub fn scores(&self) -> Vec<f32> {
        self.hits.iter().map(|h| h.score).collect()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.hits.iter().map(|h| h.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    snapshot: ArcSwap<Snapshot>,
    filters: FilterChain,
    over_fetch_factor: usize,
    dedup: Option<DedupGate>,
}

impl Retriever {
    /// # Errors
    /// [`Error::EmbeddingSpaceMismatch`] if the index was built by a different
    /// provider or model than `embedder`.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        snapshot: Snapshot,
        filters: FilterChain,
    ) -> Result<Self> {
        check_space(embedder.as_ref(), &snapshot)?;
        info!(
            "Retriever ready: {} products, {}, filters {:?}",
            snapshot.catalog.len(),
            snapshot.index.space(),
            filters.names()
        );
        Ok(Self {
            embedder,
            snapshot: ArcSwap::from_pointee(snapshot),
            filters,
            over_fetch_factor: DEFAULT_OVER_FETCH_FACTOR,
            dedup: None,
        })
    }

    /// Build from the `retrieval` config section.
    pub fn from_config(
        embedder: Arc<dyn EmbeddingProvider>,
        snapshot: Snapshot,
        config: &RetrievalConfig,
    ) -> Result<Self> {
        Ok(Self::new(embedder, snapshot, FilterChain::from_kinds(&config.filters))?
            .with_over_fetch_factor(config.over_fetch_factor))
    }

    pub fn with_over_fetch_factor(mut self, factor: usize) -> Self {
        self.over_fetch_factor = factor.max(1);
        self
    }

    /// Reverse result sets that were already returned once.
    pub fn with_dedup(mut self, gate: DedupGate) -> Self {
        self.dedup = Some(gate);
        self
    }

    pub fn over_fetch_factor(&self) -> usize {
        self.over_fetch_factor
    }

    /// Current snapshot. Cheap; holds it alive while the caller uses it.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Atomically replace the index and catalog.
    pub fn swap_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        check_space(self.embedder.as_ref(), &snapshot)?;
        info!(
            "Swapping in catalog v{} ({} products)",
            snapshot.catalog.version(),
            snapshot.catalog.len()
        );
        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }

    /// Ranked products for `query`, at most `k`, all within `budget`.
    pub async fn retrieve(&self, query: &str, k: usize, budget: Budget) -> Result<RetrievalResult> {
        let intent = detect_intent(query);
        let snapshot = self.snapshot.load_full();
        let embedding = self.embedder.embed_query(query).await?;
        if embedding.len() != snapshot.index.dimension() {
            return Err(Error::DimensionMismatch {
                expected: snapshot.index.dimension(),
                actual: embedding.len(),
            });
        }
        if k == 0 {
            return Ok(RetrievalResult {
                intent: Some(intent),
                hits: Vec::new(),
            });
        }

        let fetch = k.saturating_mul(self.over_fetch_factor);
        let raw = snapshot.index.search(&embedding, fetch)?;
        debug!(
            "query={:?} intent={:?} fetched {} of {} requested",
            query,
            intent,
            raw.len(),
            fetch
        );

        let mut candidates = Vec::with_capacity(raw.len());
        for (position, score) in raw {
            let id = position as u32 + 1;
            match snapshot.catalog.get(id) {
                Some(product) => candidates.push(ScoredProduct {
                    product: product.clone(),
                    score,
                }),
                None => warn!("{}; skipping", Error::ProductNotFound(id)),
            }
        }

        let ctx = FilterContext { intent, budget };
        let before = candidates.len();
        let mut hits = self.filters.apply(candidates, &ctx);
        debug!("filters kept {} of {} candidates", hits.len(), before);
        hits.truncate(k);

        if let Some(gate) = &self.dedup {
            gate.apply(&mut hits);
        }

        Ok(RetrievalResult {
            intent: Some(intent),
            hits,
        })
    }
}

fn check_space(embedder: &dyn EmbeddingProvider, snapshot: &Snapshot) -> Result<()> {
    let index_space = snapshot.index.space();
    let provider_space = embedder.space();
    if index_space.provider != provider_space.provider || index_space.model != provider_space.model
    {
        return Err(Error::EmbeddingSpaceMismatch {
            index: index_space.to_string(),
            provider: provider_space.to_string(),
        });
    }
    if index_space.dimension != provider_space.dimension {
        return Err(Error::DimensionMismatch {
            expected: index_space.dimension,
            actual: provider_space.dimension,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::IndexKind;
    use crate::dedup::SeenResults;
    use crate::embedding::EmbeddingSpace;
    use crate::embedding::testing::KeywordEmbedder;
    use crate::filter::FilterKind;
    use crate::product::{Attributes, Product};
    use crate::vector_index::build_index;
    use async_trait::async_trait;
    use std::time::Duration;

    pub(crate) const VOCAB: &[&str] = &[
        "suit", "suits", "blazer", "dress", "dresses", "scarf", "red", "coat", "shoes", "men",
        "women", "complementary", "accessories",
    ];

    pub(crate) fn product(
        id: u32,
        title: &str,
        category: &str,
        price: f64,
        attrs: &[(&str, &str)],
    ) -> Product {
        Product {
            id,
            title: title.into(),
            category: category.into(),
            description: String::new(),
            price,
            image_url: None,
            attributes: attrs.iter().copied().collect::<Attributes>(),
        }
    }

    pub(crate) fn three_products() -> Vec<Product> {
        vec![
            product(1, "Men's Blazer", "Men's Suits", 240.0, &[]),
            product(2, "Women's Dress", "Women's Dresses", 130.0, &[]),
            product(3, "Unisex Scarf", "Accessories", 35.0, &[]),
        ]
    }

    pub(crate) async fn retriever_for(products: Vec<Product>, kinds: &[FilterKind]) -> Retriever {
        let embedder = Arc::new(KeywordEmbedder::new(VOCAB));
        let catalog = ProductCatalog::from_products(1, products).unwrap();
        let index = build_index(&catalog, embedder.as_ref(), 16, IndexKind::Flat)
            .await
            .unwrap();
        Retriever::new(
            embedder,
            Snapshot::new(index, catalog).unwrap(),
            FilterChain::from_kinds(kinds),
        )
        .unwrap()
    }

    const DEFAULT_FILTERS: &[FilterKind] = &[FilterKind::Gender, FilterKind::Budget];

    #[tokio::test]
    async fn test_men_query_keeps_only_men_products() {
        let retriever = retriever_for(three_products(), DEFAULT_FILTERS).await;
        let result = retriever
            .retrieve("suit for men", 3, Budget::unbounded())
            .await
            .unwrap();
        assert_eq!(result.intent, Some(GenderIntent::Men));
        assert_eq!(result.ids(), vec![1]);
    }

    #[tokio::test]
    async fn test_unspecified_query_returns_everything_ranked() {
        let retriever = retriever_for(three_products(), DEFAULT_FILTERS).await;
        let result = retriever
            .retrieve("a scarf", 3, Budget::unbounded())
            .await
            .unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.ids()[0], 3);
        let scores = result.scores();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn test_budget_ceiling_scenario() {
        let products = vec![
            product(1, "Red Dress", "Dresses", 120.0, &[("color", "red")]),
            product(2, "Red Dress", "Dresses", 80.0, &[("color", "red")]),
            product(3, "Wool Coat", "Outerwear", 60.0, &[]),
        ];
        let retriever = retriever_for(products, DEFAULT_FILTERS).await;
        let result = retriever
            .retrieve("red dress under $100", 1, Budget::ceiling(100.0))
            .await
            .unwrap();
        assert_eq!(result.ids(), vec![2]);
    }

    #[tokio::test]
    async fn test_result_never_exceeds_k_and_is_never_padded() {
        let products: Vec<Product> = (1..=30)
            .map(|i| {
                let category = if i % 3 == 0 { "Men's Suits" } else { "Women's Dresses" };
                product(i, "item", category, 50.0 + i as f64, &[])
            })
            .collect();
        let retriever = retriever_for(products, DEFAULT_FILTERS).await;

        for k in [0, 1, 2, 5, 8, 40] {
            let result = retriever
                .retrieve("dress", k, Budget::unbounded())
                .await
                .unwrap();
            assert!(result.len() <= k);
        }

        // 40 * 4 = 160 requested, capped at 30; ten men's suits, few under 60
        let result = retriever
            .retrieve("suit for men", 40, Budget::ceiling(60.0))
            .await
            .unwrap();
        assert!(result.hits.iter().all(|h| h.product.price <= 60.0));
        assert!(result.hits.iter().all(|h| h.product.category == "Men's Suits"));
    }

    #[tokio::test]
    async fn test_over_fetch_factor_limits_candidate_pool() {
        let mut products: Vec<Product> = (1..=8)
            .map(|i| product(i, "Red Scarf", "Women's Accessories", 20.0, &[]))
            .collect();
        products.push(product(9, "Blazer", "Men's Suits", 200.0, &[]));
        let retriever = retriever_for(products.clone(), DEFAULT_FILTERS)
            .await
            .with_over_fetch_factor(1);
        // the only men's item ranks last; a factor of 1 never reaches it
        let starved = retriever
            .retrieve("red scarf for men", 1, Budget::unbounded())
            .await
            .unwrap();
        assert!(starved.is_empty());

        let retriever = retriever_for(products, DEFAULT_FILTERS)
            .await
            .with_over_fetch_factor(9);
        let found = retriever
            .retrieve("red scarf for men", 1, Budget::unbounded())
            .await
            .unwrap();
        assert_eq!(found.ids(), vec![9]);
    }

    #[tokio::test]
    async fn test_empty_catalog_returns_empty_list() {
        let retriever = retriever_for(Vec::new(), DEFAULT_FILTERS).await;
        let result = retriever
            .retrieve("anything", 5, Budget::unbounded())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_everything_filtered_returns_empty_list() {
        let retriever = retriever_for(three_products(), DEFAULT_FILTERS).await;
        let result = retriever
            .retrieve("suit for men", 3, Budget::ceiling(10.0))
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    struct WrongWidth {
        space: EmbeddingSpace,
        width: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for WrongWidth {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0; self.width]).collect())
        }

        fn space(&self) -> &EmbeddingSpace {
            &self.space
        }
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch_is_an_error() {
        let catalog = ProductCatalog::from_products(1, three_products()).unwrap();
        let keywords = KeywordEmbedder::new(VOCAB);
        let dimension = keywords.dimension();

        for width in [dimension - 1, dimension + 1] {
            let index = build_index(&catalog, &keywords, 8, IndexKind::Flat)
                .await
                .unwrap();
            let liar = Arc::new(WrongWidth {
                space: keywords.space().clone(),
                width,
            });
            let retriever = Retriever::new(
                liar,
                Snapshot::new(index, catalog.clone()).unwrap(),
                FilterChain::new(),
            )
            .unwrap();
            for k in [0, 3] {
                let err = retriever
                    .retrieve("suit", k, Budget::unbounded())
                    .await
                    .unwrap_err();
                assert!(matches!(
                    err,
                    Error::DimensionMismatch { expected, actual } if expected == dimension && actual == width
                ));
            }
        }
    }

    #[tokio::test]
    async fn test_provider_from_other_space_is_rejected() {
        let catalog = ProductCatalog::from_products(1, three_products()).unwrap();
        let keywords = KeywordEmbedder::new(VOCAB);
        let index = build_index(&catalog, &keywords, 8, IndexKind::Flat)
            .await
            .unwrap();
        let other = Arc::new(WrongWidth {
            space: EmbeddingSpace::new("remote", "text-embedding-3-small", index.dimension()),
            width: index.dimension(),
        });
        let result = Retriever::new(
            other,
            Snapshot::new(index, catalog).unwrap(),
            FilterChain::new(),
        );
        assert!(matches!(result, Err(Error::EmbeddingSpaceMismatch { .. })));
    }

    #[tokio::test]
    async fn test_snapshot_rejects_out_of_sync_pairs() {
        let keywords = KeywordEmbedder::new(VOCAB);
        let catalog = ProductCatalog::from_products(1, three_products()).unwrap();
        let index = build_index(&catalog, &keywords, 8, IndexKind::Flat)
            .await
            .unwrap();

        let mut fewer = three_products();
        fewer.pop();
        let smaller = ProductCatalog::from_products(1, fewer).unwrap();
        assert!(matches!(
            Snapshot::new(index, smaller),
            Err(Error::IndexOutOfSync(_))
        ));

        let index = build_index(&catalog, &keywords, 8, IndexKind::Flat)
            .await
            .unwrap();
        let newer = ProductCatalog::from_products(2, three_products()).unwrap();
        assert!(matches!(
            Snapshot::new(index, newer),
            Err(Error::IndexOutOfSync(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_rejects_gappy_catalog_ids() {
        let keywords = KeywordEmbedder::new(VOCAB);
        let mut gappy = three_products();
        gappy[2].id = 4;
        let catalog = ProductCatalog::from_products(1, gappy).unwrap();
        let rows = vec![keywords.vector("suit"); 3];
        let index = VectorIndex::from_vectors(keywords.space().clone(), 1, rows).unwrap();
        assert_eq!(index.len(), catalog.len());
        assert!(matches!(
            Snapshot::new(index, catalog),
            Err(Error::InvalidCatalog(_))
        ));
    }

    #[tokio::test]
    async fn test_swap_snapshot_serves_new_catalog() {
        let retriever = retriever_for(three_products(), DEFAULT_FILTERS).await;
        let keywords = KeywordEmbedder::new(VOCAB);

        let replacement = vec![product(1, "Red Coat", "Women's Outerwear", 90.0, &[])];
        let catalog = ProductCatalog::from_products(2, replacement).unwrap();
        let index = build_index(&catalog, &keywords, 8, IndexKind::Flat)
            .await
            .unwrap();
        retriever
            .swap_snapshot(Snapshot::new(index, catalog).unwrap())
            .unwrap();

        assert_eq!(retriever.snapshot().catalog().version(), 2);
        let result = retriever
            .retrieve("coat", 5, Budget::unbounded())
            .await
            .unwrap();
        assert_eq!(result.ids(), vec![1]);
        assert_eq!(result.hits[0].product.title, "Red Coat");
    }

    #[tokio::test]
    async fn test_dedup_reverses_repeated_results() {
        let retriever = retriever_for(three_products(), DEFAULT_FILTERS)
            .await
            .with_dedup(DedupGate::new(SeenResults::new(16, Duration::from_secs(60))));
        let first = retriever
            .retrieve("scarf", 3, Budget::unbounded())
            .await
            .unwrap();
        let second = retriever
            .retrieve("scarf", 3, Budget::unbounded())
            .await
            .unwrap();
        let mut reversed = first.ids();
        reversed.reverse();
        assert_eq!(second.ids(), reversed);
    }

    #[tokio::test]
    async fn test_from_config_applies_factor_and_filters() {
        let keywords = Arc::new(KeywordEmbedder::new(VOCAB));
        let catalog = ProductCatalog::from_products(1, three_products()).unwrap();
        let index = build_index(&catalog, keywords.as_ref(), 8, IndexKind::Flat)
            .await
            .unwrap();
        let config = RetrievalConfig {
            default_k: 3,
            over_fetch_factor: 0,
            filters: vec![FilterKind::Budget],
        };
        let retriever =
            Retriever::from_config(keywords, Snapshot::new(index, catalog).unwrap(), &config)
                .unwrap();
        assert_eq!(retriever.over_fetch_factor(), 1);
        // no gender gate configured: the women's dress comes back for a men query
        let result = retriever
            .retrieve("dress for men", 3, Budget::unbounded())
            .await
            .unwrap();
        assert!(result.ids().contains(&2));
    }
}
