//! # Database models
//!
//! Row types for the catalog tables in `crate::schema`:
//!
//! - [`CatalogVersion`]: one row per import. Versions only ever grow.
//! - [`ProductRow`]: one product inside one catalog version.
//!
//! Both tables are append-only: an import writes a fresh version and every
//! row under it, and nothing rewrites an existing version. A rebuilt vector
//! index records the version it was built from.
use diesel::prelude::*;

use crate::error::Result;
use crate::product::{Attributes, Product};

/// One catalog import.
///
/// ### Table
/// - `catalog_versions`
#[derive(Queryable, Insertable, Selectable, Identifiable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::catalog_versions)]
#[diesel(primary_key(version))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CatalogVersion {
    pub version: i32,
    /// Number of product rows written under this version.
    pub product_count: i32,
    /// RFC 3339 timestamp of the import.
    pub imported_at: String,
}

/// A product as stored in SQLite.
///
/// ### Notes
/// - `attributes` holds the JSON form of [`Attributes`].
/// - `(catalog_version, id)` is the primary key.
#[derive(Queryable, Insertable, Selectable, Associations, Debug, Clone, PartialEq)]
#[diesel(belongs_to(CatalogVersion, foreign_key = catalog_version))]
#[diesel(table_name = crate::schema::products)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProductRow {
    pub catalog_version: i32,
    pub id: i32,
    pub title: String,
    pub category: String,
    pub description: String,
    pub price: f64,
    pub image_url: Option<String>,
    pub attributes: String,
}

impl ProductRow {
    pub fn from_product(catalog_version: i32, product: &Product) -> Result<Self> {
        Ok(Self {
            catalog_version,
            id: product.id as i32,
            title: product.title.clone(),
            category: product.category.clone(),
            description: product.description.clone(),
            price: product.price,
            image_url: product.image_url.clone(),
            attributes: serde_json::to_string(&product.attributes)?,
        })
    }

    pub fn into_product(self) -> Result<Product> {
        let attributes: Attributes = if self.attributes.trim().is_empty() {
            Attributes::default()
        } else {
            serde_json::from_str(&self.attributes)?
        };
        Ok(Product {
            id: self.id as u32,
            title: self.title,
            category: self.category,
            description: self.description,
            price: self.price,
            image_url: self.image_url,
            attributes,
        })
    }
}
