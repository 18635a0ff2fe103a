//! # Constraint filter chain
//!
//! Pure predicates applied to raw search hits before they are returned.
//!
//! ## Gender intent gate
//! 1. [`detect_intent`] classifies the query as [`GenderIntent::Men`],
//!    [`GenderIntent::Women`] or [`GenderIntent::Unspecified`] by whole-word,
//!    case-insensitive matching against two alias lists. Both or neither
//!    present resolves to `Unspecified`.
//! 2. [`matches`] checks a product's [`Product::searchable_text`] (category
//!    plus attributes, lowercased). For a specific intent the opposite
//!    gender's aliases veto first; only then must at least one own alias be
//!    present. A product mentioning both genders is therefore always rejected
//!    for a specific intent.
//!
//! Whole-word matching matters: `men` is a substring of `women`.
//!
//! ## Budget gate
//! [`Budget`] carries an optional ceiling (`price <= max`) and an optional
//! floor (`price >= min`).
//!
//! ## Composition
//! [`FilterChain`] runs its filters in construction order. The gender and
//! budget gates do not interact, so their order never changes the outcome.
//! The stateful repeat-result gate lives in [`crate::dedup`] and runs after
//! the full result set has been assembled.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::product::{Product, ScoredProduct};

pub const MEN_ALIASES: &[&str] = &[
    "men",
    "man",
    "mens",
    "men's",
    "male",
    "males",
    "gentleman",
    "gentlemen",
    "boy",
    "boys",
    "guy",
    "guys",
];

pub const WOMEN_ALIASES: &[&str] = &[
    "women",
    "woman",
    "womens",
    "women's",
    "female",
    "females",
    "lady",
    "ladies",
    "girl",
    "girls",
];

fn alias_regex(aliases: &[&str]) -> Regex {
    let alternation = aliases
        .iter()
        .map(|a| regex::escape(a))
        .collect::<Vec<_>>()
        .join("|");
    // An apostrophe continues a word ("o'man" is not "man"), except as a
    // trailing possessive: "girls'", "lady's", "man’s".
    Regex::new(&format!(
        r"(?i)(?:^|[^\w'’])(?:{alternation})(?:['’]s?)?(?:$|[^\w'’])"
    ))
        .unwrap_or_else(|e| panic!("alias pattern must compile: {e}"))
}

static MEN_PATTERN: Lazy<Regex> = Lazy::new(|| alias_regex(MEN_ALIASES));
static WOMEN_PATTERN: Lazy<Regex> = Lazy::new(|| alias_regex(WOMEN_ALIASES));

fn mentions_men(text: &str) -> bool {
    MEN_PATTERN.is_match(text)
}

fn mentions_women(text: &str) -> bool {
    WOMEN_PATTERN.is_match(text)
}

/// Coarse gender classification of a query. Used as a hard filter only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderIntent {
    Men,
    Women,
    Unspecified,
}

pub fn detect_intent(query: &str) -> GenderIntent {
    match (mentions_men(query), mentions_women(query)) {
        (true, false) => GenderIntent::Men,
        (false, true) => GenderIntent::Women,
        _ => GenderIntent::Unspecified,
    }
}

/// Does `product` satisfy `intent`? Veto before require.
pub fn matches(product: &Product, intent: GenderIntent) -> bool {
    let blob = product.searchable_text();
    match intent {
        GenderIntent::Unspecified => true,
        GenderIntent::Men => !mentions_women(&blob) && mentions_men(&blob),
        GenderIntent::Women => !mentions_men(&blob) && mentions_women(&blob),
    }
}

/// Price bounds supplied by the caller. Both ends inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Budget {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn ceiling(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn admits(&self, price: f64) -> bool {
        self.max.is_none_or(|max| price <= max) && self.min.is_none_or(|min| price >= min)
    }
}

/// Per-query inputs every filter may consult.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext {
    pub intent: GenderIntent,
    pub budget: Budget,
}

/// One predicate in the chain: keep the candidate or drop it.
pub trait CandidateFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn accept(&self, candidate: &ScoredProduct, ctx: &FilterContext) -> bool;
}

pub struct GenderGate;

impl CandidateFilter for GenderGate {
    fn name(&self) -> &'static str {
        "gender"
    }

    fn accept(&self, candidate: &ScoredProduct, ctx: &FilterContext) -> bool {
        matches(&candidate.product, ctx.intent)
    }
}

pub struct BudgetGate;

impl CandidateFilter for BudgetGate {
    fn name(&self) -> &'static str {
        "budget"
    }

    fn accept(&self, candidate: &ScoredProduct, ctx: &FilterContext) -> bool {
        ctx.budget.admits(candidate.product.price)
    }
}

/// Config-level names for the built-in filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Gender,
    Budget,
}

impl FilterKind {
    pub fn build(self) -> Box<dyn CandidateFilter> {
        match self {
            FilterKind::Gender => Box::new(GenderGate),
            FilterKind::Budget => Box::new(BudgetGate),
        }
    }
}

/// Ordered list of predicates.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn CandidateFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_kinds(kinds: &[FilterKind]) -> Self {
        Self {
            filters: kinds.iter().map(|k| k.build()).collect(),
        }
    }

    pub fn with(mut self, filter: Box<dyn CandidateFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn accept(&self, candidate: &ScoredProduct, ctx: &FilterContext) -> bool {
        self.filters.iter().all(|f| f.accept(candidate, ctx))
    }

    /// Keep passing candidates, preserving their order.
    pub fn apply(&self, candidates: Vec<ScoredProduct>, ctx: &FilterContext) -> Vec<ScoredProduct> {
        candidates
            .into_iter()
            .filter(|c| self.accept(c, ctx))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::Attributes;

    fn product(id: u32, category: &str, attrs: &[(&str, &str)], price: f64) -> Product {
        Product {
            id,
            title: format!("item {id}"),
            category: category.into(),
            description: String::new(),
            price,
            image_url: None,
            attributes: attrs.iter().copied().collect::<Attributes>(),
        }
    }

    fn scored(p: Product) -> ScoredProduct {
        ScoredProduct {
            product: p,
            score: 0.5,
        }
    }

    #[test]
    fn test_detect_intent() {
        assert_eq!(detect_intent("suit for men"), GenderIntent::Men);
        assert_eq!(detect_intent("Men's wedding blazer"), GenderIntent::Men);
        assert_eq!(detect_intent("dress for a WOMAN"), GenderIntent::Women);
        assert_eq!(detect_intent("women's heels"), GenderIntent::Women);
        assert_eq!(detect_intent("red dress under $100"), GenderIntent::Unspecified);
        assert_eq!(detect_intent("outfits for men and women"), GenderIntent::Unspecified);
    }

    #[test]
    fn test_men_is_not_matched_inside_women() {
        assert_eq!(detect_intent("womens boots"), GenderIntent::Women);
        assert_eq!(detect_intent("something for the ladies"), GenderIntent::Women);
        // not an alias even though it contains "man"
        assert_eq!(detect_intent("mandarin collar shirt"), GenderIntent::Unspecified);
    }

    #[test]
    fn test_no_leakage_for_every_alias_pair() {
        for own in MEN_ALIASES {
            for other in WOMEN_ALIASES {
                let mixed = product(1, own, &[("fit", other)], 10.0);
                assert!(!matches(&mixed, GenderIntent::Men), "{own} + {other}");
                assert!(!matches(&mixed, GenderIntent::Women), "{own} + {other}");
            }
        }
        for alias in WOMEN_ALIASES {
            let p = product(1, &format!("Evening {alias}"), &[], 10.0);
            assert!(!matches(&p, GenderIntent::Men), "{alias} leaked into men");
            assert!(matches(&p, GenderIntent::Women));
        }
        for alias in MEN_ALIASES {
            let p = product(1, "Outerwear", &[("department", alias)], 10.0);
            assert!(!matches(&p, GenderIntent::Women), "{alias} leaked into women");
            assert!(matches(&p, GenderIntent::Men));
        }
    }

    #[test]
    fn test_possessive_forms_veto_and_require() {
        for suffix in ["'", "'s", "’s", "’"] {
            for alias in WOMEN_ALIASES {
                let form = format!("{alias}{suffix}");
                let p = product(1, &format!("{form} Coats"), &[("fit", "men")], 10.0);
                assert!(!matches(&p, GenderIntent::Men), "{form} leaked into men");
                let own = product(2, &format!("{form} Coats"), &[], 10.0);
                assert!(matches(&own, GenderIntent::Women), "{form} not required side");
                assert_eq!(detect_intent(&format!("{form} coat")), GenderIntent::Women);
            }
            for alias in MEN_ALIASES {
                let form = format!("{alias}{suffix}");
                let p = product(1, &format!("{form} Shirts"), &[("fit", "women")], 10.0);
                assert!(!matches(&p, GenderIntent::Women), "{form} leaked into women");
                let own = product(2, &format!("{form} Shirts"), &[], 10.0);
                assert!(matches(&own, GenderIntent::Men), "{form} not required side");
                assert_eq!(detect_intent(&format!("{form} watch")), GenderIntent::Men);
            }
        }
    }

    #[test]
    fn test_retail_possessive_categories() {
        let girls = product(1, "Girls' Dresses", &[("department", "men")], 30.0);
        assert!(!matches(&girls, GenderIntent::Men));
        let ladies = product(2, "Ladies' Coats", &[], 90.0);
        assert!(matches(&ladies, GenderIntent::Women));
        assert!(!matches(&ladies, GenderIntent::Men));
        assert_eq!(detect_intent("ladies' coat"), GenderIntent::Women);
        assert_eq!(detect_intent("man's watch"), GenderIntent::Men);
        assert_eq!(detect_intent("o'man jacket"), GenderIntent::Unspecified);
    }

    #[test]
    fn test_specific_intent_requires_own_alias() {
        let neutral = product(3, "Accessories", &[("color", "ivory")], 20.0);
        assert!(!matches(&neutral, GenderIntent::Men));
        assert!(!matches(&neutral, GenderIntent::Women));
    }

    #[test]
    fn test_unspecified_passes_everything() {
        for p in [
            product(1, "Men's Suits", &[], 1.0),
            product(2, "Women's Dresses", &[], 1.0),
            product(3, "Accessories", &[("for", "men and women")], 1.0),
            product(4, "", &[], 1.0),
        ] {
            assert!(matches(&p, GenderIntent::Unspecified));
        }
    }

    #[test]
    fn test_three_product_scenario_keeps_only_blazer() {
        let catalog = [
            product(1, "Men's Suits", &[], 250.0),
            product(2, "Women's Dresses", &[], 120.0),
            product(3, "Accessories", &[], 30.0),
        ];
        let intent = detect_intent("suit for men");
        assert_eq!(intent, GenderIntent::Men);
        let kept: Vec<u32> = catalog
            .iter()
            .filter(|p| matches(p, intent))
            .map(|p| p.id)
            .collect();
        assert_eq!(kept, vec![1]);
    }

    #[test]
    fn test_budget_admits() {
        assert!(Budget::unbounded().admits(10_000.0));
        assert!(Budget::ceiling(100.0).admits(100.0));
        assert!(!Budget::ceiling(100.0).admits(100.01));
        assert!(Budget::range(50.0, 500.0).admits(50.0));
        assert!(!Budget::range(50.0, 500.0).admits(49.99));
    }

    #[test]
    fn test_budget_scenario_keeps_cheaper_dress() {
        let ctx = FilterContext {
            intent: detect_intent("red dress under $100"),
            budget: Budget::ceiling(100.0),
        };
        let candidates = vec![
            scored(product(1, "Dresses", &[("color", "red")], 120.0)),
            scored(product(2, "Dresses", &[("color", "red")], 80.0)),
        ];
        let kept = FilterChain::from_kinds(&[FilterKind::Gender, FilterKind::Budget])
            .apply(candidates, &ctx);
        assert_eq!(kept.iter().map(|c| c.id()).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_lower_ceiling_never_admits_more() {
        let candidates: Vec<ScoredProduct> = (1..=20)
            .map(|i| scored(product(i, "Men", &[], i as f64 * 25.0)))
            .collect();
        let chain = FilterChain::from_kinds(&[FilterKind::Budget]);
        let mut previous = usize::MAX;
        for ceiling in [600.0, 400.0, 250.0, 100.0, 25.0, 0.0] {
            let ctx = FilterContext {
                intent: GenderIntent::Unspecified,
                budget: Budget::ceiling(ceiling),
            };
            let kept = chain.apply(candidates.clone(), &ctx).len();
            assert!(kept <= previous);
            previous = kept;
        }
    }

    #[test]
    fn test_gender_and_budget_commute() {
        let candidates = vec![
            scored(product(1, "Men's Suits", &[], 90.0)),
            scored(product(2, "Men's Suits", &[], 300.0)),
            scored(product(3, "Women's Dresses", &[], 50.0)),
            scored(product(4, "Accessories", &[("fit", "unisex")], 10.0)),
            scored(product(5, "Shoes", &[("for", "men")], 99.0)),
        ];
        let ctx = FilterContext {
            intent: GenderIntent::Men,
            budget: Budget::ceiling(100.0),
        };
        let forward = FilterChain::from_kinds(&[FilterKind::Gender, FilterKind::Budget])
            .apply(candidates.clone(), &ctx);
        let reverse = FilterChain::from_kinds(&[FilterKind::Budget, FilterKind::Gender])
            .apply(candidates, &ctx);
        assert_eq!(forward, reverse);
        assert_eq!(forward.iter().map(|c| c.id()).collect::<Vec<_>>(), vec![1, 5]);
    }

    #[test]
    fn test_empty_chain_keeps_everything() {
        let ctx = FilterContext {
            intent: GenderIntent::Men,
            budget: Budget::ceiling(1.0),
        };
        let candidates = vec![scored(product(2, "Women's Dresses", &[], 500.0))];
        assert_eq!(FilterChain::new().apply(candidates, &ctx).len(), 1);
        assert_eq!(
            FilterChain::new().with(Box::new(BudgetGate)).names(),
            vec!["budget"]
        );
    }
}
