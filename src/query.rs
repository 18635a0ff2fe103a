//! Caller-side helpers that shape the query before it reaches the retriever.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Bare numbers below this are treated as sizes or counts, not prices.
pub const MIN_BARE_PRICE: f64 = 20.0;

static DOLLAR_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\s*(\d{1,3}(?:,\d{3})+|\d+)(\.\d+)?")
        .unwrap_or_else(|e| panic!("dollar pattern must compile: {e}"))
});

static BARE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}(?:,\d{3})+|\d+)(\.\d+)?\b")
        .unwrap_or_else(|e| panic!("number pattern must compile: {e}"))
});

fn amounts(pattern: &Regex, text: &str) -> Vec<f64> {
    pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(1)?.as_str().replace(',', "");
            let frac = caps.get(2).map_or("", |m| m.as_str());
            format!("{whole}{frac}").parse::<f64>().ok()
        })
        .collect()
}

/// Price ceiling mentioned in free text.
///
/// The largest `$` amount wins; without one, the largest bare number of at
/// least [`MIN_BARE_PRICE`]. `"size 8 dress under $120"` gives `120`,
/// `"2 shirts under 60"` gives `60`, `"size 10"` gives nothing.
pub fn extract_budget_ceiling(text: &str) -> Option<f64> {
    let dollars = amounts(&DOLLAR_AMOUNT, text);
    let candidates = if dollars.is_empty() {
        amounts(&BARE_NUMBER, text)
            .into_iter()
            .filter(|n| *n >= MIN_BARE_PRICE)
            .collect()
    } else {
        dollars
    };
    candidates.into_iter().reduce(f64::max)
}

/// Shopper context chosen outside the chat (occasion, weather, region).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShopperProfile {
    pub occasion: Option<String>,
    pub weather: Option<String>,
    pub region: Option<String>,
}

impl ShopperProfile {
    pub fn is_empty(&self) -> bool {
        [&self.occasion, &self.weather, &self.region]
            .iter()
            .all(|v| v.as_deref().is_none_or(|s| s.trim().is_empty()))
    }

    /// `query` with a trailing context sentence, e.g.
    /// `"linen shirt. Context: Wedding, Sunny weather, EU region."`
    pub fn contextualize(&self, query: &str) -> String {
        let clean = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let parts: Vec<String> = [
            clean(&self.occasion),
            clean(&self.weather).map(|w| format!("{w} weather")),
            clean(&self.region).map(|r| format!("{r} region")),
        ]
        .into_iter()
        .flatten()
        .collect();

        if parts.is_empty() {
            query.to_string()
        } else {
            format!("{}. Context: {}.", query.trim_end_matches('.'), parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dollar_amounts_win() {
        assert_eq!(extract_budget_ceiling("red dress under $100"), Some(100.0));
        assert_eq!(extract_budget_ceiling("size 8 dress under $120"), Some(120.0));
        assert_eq!(extract_budget_ceiling("between $50 and $ 75.50"), Some(75.5));
        assert_eq!(extract_budget_ceiling("a coat for $1,200 tops"), Some(1200.0));
    }

    #[test]
    fn test_bare_numbers_skip_sizes() {
        assert_eq!(extract_budget_ceiling("2 shirts under 60"), Some(60.0));
        assert_eq!(extract_budget_ceiling("size 10 sneakers"), None);
        assert_eq!(extract_budget_ceiling("budget 20"), Some(20.0));
        assert_eq!(extract_budget_ceiling("no numbers here"), None);
    }

    #[test]
    fn test_contextualize() {
        let profile = ShopperProfile {
            occasion: Some("Wedding".into()),
            weather: Some("Sunny".into()),
            region: Some("EU".into()),
        };
        assert_eq!(
            profile.contextualize("linen shirt"),
            "linen shirt. Context: Wedding, Sunny weather, EU region."
        );

        let partial = ShopperProfile {
            weather: Some("Rainy".into()),
            region: Some(" ".into()),
            ..ShopperProfile::default()
        };
        assert_eq!(partial.contextualize("boots."), "boots. Context: Rainy weather.");
    }

    #[test]
    fn test_empty_profile_leaves_query_alone() {
        let profile = ShopperProfile::default();
        assert!(profile.is_empty());
        assert_eq!(profile.contextualize("suit for men"), "suit for men");
    }
}
