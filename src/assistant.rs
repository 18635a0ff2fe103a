//! # Shopping assistant
//!
//! Glue between retrieval and composition. [`ShoppingAssistant::lookbook`]
//! retrieves filtered candidates, asks the composer for a lookbook and, when
//! the composer fails or is absent, substitutes the local fallback. Only
//! configuration-level retrieval errors reach the caller.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{ProductCatalog, establish_connection};
use crate::compose::{Composer, Lookbook, OpenAiComposer, fallback_lookbook};
use crate::config::{DEFAULT_K, VestraConfig};
use crate::dedup::{DedupGate, SeenResults};
use crate::embedding::build_provider;
use crate::error::Result;
use crate::filter::Budget;
use crate::history::Turn;
use crate::product::ScoredProduct;
use crate::retriever::{RetrievalResult, Retriever, Snapshot};
use crate::template::{FallbackCopy, resolve_template};
use crate::vector_index::VectorIndex;

/// Candidates fetched for post-purchase suggestions.
pub const POST_PURCHASE_K: usize = 8;

pub struct ShoppingAssistant {
    retriever: Retriever,
    composer: Option<Arc<dyn Composer>>,
    dedup: Option<DedupGate>,
    default_k: usize,
    fallback_items: usize,
    fallback_copy: FallbackCopy,
}

impl ShoppingAssistant {
    pub fn new(retriever: Retriever) -> Self {
        Self {
            retriever,
            composer: None,
            dedup: None,
            default_k: DEFAULT_K,
            fallback_items: 4,
            fallback_copy: FallbackCopy::default(),
        }
    }

    /// Wire everything from configuration: provider, catalog, index and,
    /// when enabled and credentialed, the composer.
    pub fn open(config: &VestraConfig) -> Result<Self> {
        let embedder = build_provider(&config.embedding)?;
        let mut conn = establish_connection(&config.catalog_db_url)?;
        let catalog = ProductCatalog::load_latest(&mut conn)?;
        let index = VectorIndex::load(&config.index.path, config.index.kind)?;
        let snapshot = Snapshot::new(index, catalog)?;
        let retriever = Retriever::from_config(embedder, snapshot, &config.retrieval)?;

        let template = resolve_template(config.composer.template.as_deref())?;
        let mut assistant = Self::new(retriever)
            .with_default_k(config.retrieval.default_k)
            .with_fallback(config.composer.fallback_items, template.fallback.clone());

        if config.composer.enabled {
            match OpenAiComposer::new(&config.composer, template) {
                Ok(composer) => assistant = assistant.with_composer(Arc::new(composer)),
                Err(e) => warn!("Composer disabled, using local lookbooks: {e}"),
            }
        }
        if config.dedup.enabled {
            assistant = assistant.with_dedup(DedupGate::new(SeenResults::from_config(&config.dedup)));
        }
        Ok(assistant)
    }

    pub fn with_composer(mut self, composer: Arc<dyn Composer>) -> Self {
        self.composer = Some(composer);
        self
    }

    /// Reverse a lookbook whose product set was already produced.
    pub fn with_dedup(mut self, gate: DedupGate) -> Self {
        self.dedup = Some(gate);
        self
    }

    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k;
        self
    }

    pub fn with_fallback(mut self, items: usize, copy: FallbackCopy) -> Self {
        self.fallback_items = items;
        self.fallback_copy = copy;
        self
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Ranked candidates without composition.
    pub async fn search(&self, query: &str, k: usize, budget: Budget) -> Result<RetrievalResult> {
        self.retriever.retrieve(query, k, budget).await
    }

    pub async fn lookbook(&self, query: &str, budget: Budget, history: &[Turn]) -> Result<Lookbook> {
        let candidates = self.retriever.retrieve(query, self.default_k, budget).await?.hits;

        let mut lookbook = match (&self.composer, candidates.is_empty()) {
            (Some(composer), false) => match composer.compose(query, &candidates, history).await {
                Ok(lookbook) => lookbook,
                Err(e) => {
                    warn!("Composition failed, using local lookbook: {e}");
                    self.fallback(&candidates)
                }
            },
            _ => self.fallback(&candidates),
        };

        if let Some(gate) = &self.dedup {
            gate.apply(&mut lookbook.items);
        }
        info!(
            "Lookbook for {:?}: {} items ({:?})",
            query,
            lookbook.items.len(),
            lookbook.source
        );
        Ok(lookbook)
    }

    fn fallback(&self, candidates: &[ScoredProduct]) -> Lookbook {
        fallback_lookbook(candidates, self.fallback_items, &self.fallback_copy)
    }

    /// Suggestions complementing what was just bought.
    ///
    /// The most frequent category among `purchased` (ties go to the one seen
    /// first) drives a retrieval for "complementary items for <category>";
    /// purchased ids are left out. Unknown ids are ignored.
    pub async fn post_purchase_recommendations(
        &self,
        purchased: &[u32],
        top_n: usize,
    ) -> Result<Vec<ScoredProduct>> {
        let snapshot = self.retriever.snapshot();
        let catalog = snapshot.catalog();

        let mut order: Vec<&str> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for id in purchased {
            let Some(product) = catalog.get(*id) else {
                debug!("Purchased id {id} is not in catalog v{}", catalog.version());
                continue;
            };
            let count = counts.entry(product.category.as_str()).or_insert(0);
            if *count == 0 {
                order.push(product.category.as_str());
            }
            *count += 1;
        }

        // first maximum in first-seen order
        let mut top: Option<(&str, usize)> = None;
        for category in order {
            let count = counts[category];
            if top.is_none_or(|(_, best)| count > best) {
                top = Some((category, count));
            }
        }
        let Some((category, _)) = top else {
            return Ok(Vec::new());
        };

        let query = format!("complementary items for {category}");
        let result = self
            .retriever
            .retrieve(&query, POST_PURCHASE_K, Budget::unbounded())
            .await?;
        Ok(result
            .hits
            .into_iter()
            .filter(|hit| !purchased.contains(&hit.id()))
            .take(top_n)
            .collect())
    }
}
