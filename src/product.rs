//! # Product records
//!
//! A [`Product`] is one catalog row. Products are produced offline, imported
//! into the versioned catalog table, and are read-only while serving.
//!
//! Attributes are a typed string map ([`Attributes`]) rather than an opaque
//! blob: matching code works on [`Attributes::to_searchable_text`], a stable
//! `key: value` projection sorted by key.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Free-form product attributes (`color`, `material`, `occasion`, ...).
///
/// Scalar JSON values (numbers, booleans) are accepted on input and stored as
/// their string form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, RawAttribute>",
    into = "BTreeMap<String, String>"
)]
pub struct Attributes(BTreeMap<String, String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAttribute {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl From<BTreeMap<String, RawAttribute>> for Attributes {
    fn from(raw: BTreeMap<String, RawAttribute>) -> Self {
        Attributes(
            raw.into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        RawAttribute::Text(s) => s,
                        RawAttribute::Number(n) => n.to_string(),
                        RawAttribute::Flag(b) => b.to_string(),
                    };
                    (k, v)
                })
                .collect(),
        )
    }
}

impl From<Attributes> for BTreeMap<String, String> {
    fn from(attrs: Attributes) -> Self {
        attrs.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Attributes(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Attributes {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `key: value` pairs joined with `, `, in key order.
    pub fn to_searchable_text(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_searchable_text())
    }
}

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Stable 1-based id; index position `i` holds product `i + 1`.
    pub id: u32,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

fn blank_as_none<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

impl Product {
    /// Lowercased category plus attribute projection. This is the text the
    /// gender gate inspects; the title is deliberately not part of it.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.category, self.attributes.to_searchable_text()).to_lowercase()
    }

    /// Text fed to the embedding provider when the index is built.
    pub fn embedding_text(&self) -> String {
        let mut text = format!("{}. {}", self.title, self.description.trim());
        text.push_str(&format!(" Category: {}.", self.category));
        if !self.attributes.is_empty() {
            text.push_str(&format!(" Attributes: {}.", self.attributes));
        }
        text
    }

    /// Row-level checks applied before a product enters the catalog.
    pub fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(Error::InvalidCatalog(format!(
                "product '{}' has id 0; ids are 1-based",
                self.title
            )));
        }
        if self.title.trim().is_empty() {
            return Err(Error::InvalidCatalog(format!("product {} has no title", self.id)));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(Error::InvalidCatalog(format!(
                "product {} has invalid price {}",
                self.id, self.price
            )));
        }
        Ok(())
    }
}

/// A product paired with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredProduct {
    pub product: Product,
    pub score: f32,
}

impl ScoredProduct {
    pub fn id(&self) -> u32 {
        self.product.id
    }
}
