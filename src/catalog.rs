//! # Product catalog store
//!
//! The catalog is an append-only, versioned SQLite table (see
//! [`crate::models`]). Serving code never queries SQLite per request:
//! [`ProductCatalog::load_latest`] materialises one version into memory once
//! and lookups are a hash probe from then on.
//!
//! ## Id coupling
//! Product ids are 1-based. A vector index built from catalog version `v`
//! stores row `i` for product `i + 1`, so ids must be exactly `1..=n` when an
//! index is built ([`ProductCatalog::check_contiguous`]). Re-importing the
//! catalog creates a new version and invalidates every index built from an
//! older one.
//!
//! ```no_run
//! use vestra::catalog::{establish_connection, import_catalog, read_catalog_file, ProductCatalog};
//!
//! # fn demo() -> vestra::error::Result<()> {
//! let mut conn = establish_connection("vestra.db")?;
//! let products = read_catalog_file("products.json")?;
//! let version = import_catalog(&mut conn, &products)?;
//! let catalog = ProductCatalog::load_latest(&mut conn)?;
//! assert_eq!(catalog.version(), version.version);
//! # Ok(()) }
//! ```

use diesel::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{CatalogVersion, ProductRow};
use crate::product::Product;
use crate::schema::{catalog_versions, products};

/// Open the catalog database and make sure both tables exist.
pub fn establish_connection(db_url: &str) -> Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(db_url)?;
    ensure_schema(&mut conn)?;
    Ok(conn)
}

fn ensure_schema(conn: &mut SqliteConnection) -> Result<()> {
    diesel::sql_query(
        "CREATE TABLE IF NOT EXISTS catalog_versions (
            version INTEGER PRIMARY KEY NOT NULL,
            product_count INTEGER NOT NULL,
            imported_at TEXT NOT NULL
        )",
    )
    .execute(conn)?;
    diesel::sql_query(
        "CREATE TABLE IF NOT EXISTS products (
            catalog_version INTEGER NOT NULL REFERENCES catalog_versions(version),
            id INTEGER NOT NULL,
            title TEXT NOT NULL,
            category TEXT NOT NULL,
            description TEXT NOT NULL,
            price REAL NOT NULL,
            image_url TEXT,
            attributes TEXT NOT NULL,
            PRIMARY KEY (catalog_version, id)
        )",
    )
    .execute(conn)?;
    Ok(())
}

/// Read a JSON array of product records.
pub fn read_catalog_file(path: impl AsRef<Path>) -> Result<Vec<Product>> {
    let path = path.as_ref();
    info!("Reading catalog file: {}", path.display());
    let content = fs::read_to_string(path)?;
    let products: Vec<Product> = serde_json::from_str(&content)?;
    Ok(products)
}

/// Newest catalog version, if anything has been imported.
pub fn latest_version(conn: &mut SqliteConnection) -> Result<Option<CatalogVersion>> {
    let version = catalog_versions::table
        .order(catalog_versions::version.desc())
        .select(CatalogVersion::as_select())
        .first(conn)
        .optional()?;
    Ok(version)
}

/// Append `products` as a new catalog version.
///
/// The whole batch is validated first; nothing is written if any row is bad.
pub fn import_catalog(conn: &mut SqliteConnection, products: &[Product]) -> Result<CatalogVersion> {
    validate_products(products)?;

    conn.transaction::<_, Error, _>(|conn| {
        let next = latest_version(conn)?.map_or(1, |v| v.version + 1);
        let version = CatalogVersion {
            version: next,
            product_count: products.len() as i32,
            imported_at: chrono::Utc::now().to_rfc3339(),
        };
        diesel::insert_into(catalog_versions::table)
            .values(&version)
            .execute(conn)?;

        for product in products {
            let row = ProductRow::from_product(next, product)?;
            diesel::insert_into(products::table)
                .values(&row)
                .execute(conn)?;
        }

        info!(
            "Imported catalog version {} with {} products",
            version.version, version.product_count
        );
        Ok(version)
    })
}

fn validate_products(products: &[Product]) -> Result<()> {
    let mut seen = HashSet::with_capacity(products.len());
    for product in products {
        product.validate()?;
        if product.id > i32::MAX as u32 {
            return Err(Error::InvalidCatalog(format!(
                "product id {} is out of range",
                product.id
            )));
        }
        if !seen.insert(product.id) {
            return Err(Error::InvalidCatalog(format!(
                "duplicate product id {}",
                product.id
            )));
        }
    }
    Ok(())
}

/// An in-memory, read-only view of one catalog version.
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    version: i32,
    products: HashMap<u32, Product>,
}

impl ProductCatalog {
    /// Build a catalog directly from records (tests, tooling).
    pub fn from_products(version: i32, products: Vec<Product>) -> Result<Self> {
        validate_products(&products)?;
        Ok(Self {
            version,
            products: products.into_iter().map(|p| (p.id, p)).collect(),
        })
    }

    /// Load the newest imported version.
    pub fn load_latest(conn: &mut SqliteConnection) -> Result<Self> {
        let version = latest_version(conn)?
            .ok_or_else(|| Error::InvalidCatalog("no catalog has been imported".into()))?;
        Self::load_version(conn, version.version)
    }

    pub fn load_version(conn: &mut SqliteConnection, version: i32) -> Result<Self> {
        let rows: Vec<ProductRow> = products::table
            .filter(products::catalog_version.eq(version))
            .order(products::id.asc())
            .select(ProductRow::as_select())
            .load(conn)?;
        debug!("Loaded {} product rows for version {}", rows.len(), version);

        let products = rows
            .into_iter()
            .map(ProductRow::into_product)
            .collect::<Result<Vec<_>>>()?;
        Self::from_products(version, products)
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Product> {
        self.products.get(&id)
    }

    /// Like [`get`](Self::get) but reports a missing id as [`Error::ProductNotFound`].
    pub fn require(&self, id: u32) -> Result<&Product> {
        self.get(id).ok_or(Error::ProductNotFound(id))
    }

    /// All products ordered by id.
    pub fn ordered(&self) -> Vec<&Product> {
        let mut all: Vec<&Product> = self.products.values().collect();
        all.sort_by_key(|p| p.id);
        all
    }

    /// Ids must be exactly `1..=len` for index positions to line up.
    pub fn check_contiguous(&self) -> Result<()> {
        for id in 1..=self.products.len() as u32 {
            if !self.products.contains_key(&id) {
                return Err(Error::InvalidCatalog(format!(
                    "catalog version {} is missing id {id}; ids must run 1..={}",
                    self.version,
                    self.products.len()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn product(id: u32, title: &str, category: &str, price: f64) -> Product {
        Product {
            id,
            title: title.into(),
            category: category.into(),
            description: format!("{title} description"),
            price,
            image_url: Some(format!("https://img.example/{id}.jpg")),
            attributes: [("color", "navy")].into_iter().collect(),
        }
    }

    fn sample() -> Vec<Product> {
        vec![
            product(1, "Men's Blazer", "Men's Suits", 210.0),
            product(2, "Women's Dress", "Women's Dresses", 120.0),
            product(3, "Unisex Scarf", "Accessories", 35.0),
        ]
    }

    #[test]
    fn test_import_appends_versions() {
        let mut conn = establish_connection(":memory:").unwrap();
        assert!(latest_version(&mut conn).unwrap().is_none());

        let v1 = import_catalog(&mut conn, &sample()).unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v1.product_count, 3);

        let mut second = sample();
        second.truncate(2);
        let v2 = import_catalog(&mut conn, &second).unwrap();
        assert_eq!(v2.version, 2);

        let latest = ProductCatalog::load_latest(&mut conn).unwrap();
        assert_eq!(latest.version(), 2);
        assert_eq!(latest.len(), 2);

        // version 1 is untouched
        let old = ProductCatalog::load_version(&mut conn, 1).unwrap();
        assert_eq!(old.len(), 3);
        assert_eq!(old.get(3).unwrap().title, "Unisex Scarf");
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let mut conn = establish_connection(":memory:").unwrap();
        import_catalog(&mut conn, &sample()).unwrap();
        let catalog = ProductCatalog::load_latest(&mut conn).unwrap();
        assert_eq!(catalog.get(1), Some(&sample()[0]));
    }

    #[test]
    fn test_import_rejects_duplicate_ids_without_writing() {
        let mut conn = establish_connection(":memory:").unwrap();
        let mut bad = sample();
        bad[2].id = 1;
        assert!(matches!(
            import_catalog(&mut conn, &bad),
            Err(Error::InvalidCatalog(_))
        ));
        assert!(latest_version(&mut conn).unwrap().is_none());
    }

    #[test]
    fn test_load_latest_without_import_fails() {
        let mut conn = establish_connection(":memory:").unwrap();
        assert!(ProductCatalog::load_latest(&mut conn).is_err());
    }

    #[test]
    fn test_get_and_require() {
        let catalog = ProductCatalog::from_products(1, sample()).unwrap();
        assert_eq!(catalog.get(2).unwrap().category, "Women's Dresses");
        assert!(catalog.get(9).is_none());
        assert!(matches!(catalog.require(9), Err(Error::ProductNotFound(9))));
    }

    #[test]
    fn test_check_contiguous() {
        let catalog = ProductCatalog::from_products(1, sample()).unwrap();
        assert!(catalog.check_contiguous().is_ok());
        assert_eq!(
            catalog.ordered().iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let mut gappy = sample();
        gappy[1].id = 5;
        let catalog = ProductCatalog::from_products(1, gappy).unwrap();
        assert!(catalog.check_contiguous().is_err());
    }

    #[test]
    fn test_read_catalog_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&sample()).unwrap()).unwrap();
        let products = read_catalog_file(file.path()).unwrap();
        assert_eq!(products.len(), 3);

        let mut broken = NamedTempFile::new().unwrap();
        writeln!(broken, "not: json").unwrap();
        assert!(read_catalog_file(broken.path()).is_err());
    }
}
