//! Seam between the ingestion engine and the commerce platform that owns the
//! catalog. Everything the engine persists goes through [`CatalogStore`].

mod memory;

pub use memory::MemoryCatalog;

use crate::models::BackorderPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{collections::BTreeMap, fmt};
use thiserror::Error;
use uuid::Uuid;

pub const CATEGORY_TAXONOMY: &str = "product_cat";
pub const TAG_TAXONOMY: &str = "product_tag";
pub const SHIPPING_CLASS_TAXONOMY: &str = "product_shipping_class";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogId(pub u64);

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermId(pub u64);

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("catalog object {0} does not exist")]
    MissingObject(CatalogId),
    #[error("taxonomy `{0}` is not registered")]
    UnknownTaxonomy(String),
    #[error("platform rejected write: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct NewObject {
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub product_type: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct ContentPatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub excerpt: Option<String>,
}

impl ContentPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.excerpt.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pricing {
    pub regular: Decimal,
    pub sale: Option<Decimal>,
    /// Price shown by the storefront.
    pub effective: Decimal,
}

impl Pricing {
    pub fn new(regular: Decimal, sale: Option<Decimal>) -> Self {
        let sale = sale.filter(|value| *value > Decimal::ZERO);
        Self {
            regular,
            sale,
            effective: sale.unwrap_or(regular),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockStatus {
    #[serde(rename = "instock")]
    InStock,
    #[serde(rename = "outofstock")]
    OutOfStock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inventory {
    pub managed: bool,
    pub quantity: Option<i64>,
    pub status: StockStatus,
    pub backorders: BackorderPolicy,
}

impl Inventory {
    /// No quantity means stock is not tracked and the item is always in stock.
    pub fn from_stock(stock: Option<i64>, backorders: BackorderPolicy) -> Self {
        match stock {
            Some(quantity) => Self {
                managed: true,
                quantity: Some(quantity),
                status: if quantity > 0 {
                    StockStatus::InStock
                } else {
                    StockStatus::OutOfStock
                },
                backorders,
            },
            None => Self {
                managed: false,
                quantity: None,
                status: StockStatus::InStock,
                backorders,
            },
        }
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::from_stock(None, BackorderPolicy::No)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDescriptor {
    pub taxonomy: String,
    pub label: String,
    pub position: usize,
    pub visible: bool,
    pub variation: bool,
    pub is_taxonomy: bool,
}

#[derive(Clone)]
pub struct MediaUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentRef {
    pub id: Uuid,
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogObject {
    pub id: CatalogId,
    pub slug: String,
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub published: bool,
    pub product_type: &'static str,
    pub pricing: Option<Pricing>,
    pub inventory: Inventory,
    pub terms: BTreeMap<String, Vec<TermId>>,
    pub attributes: BTreeMap<String, AttributeDescriptor>,
    pub featured_image: Option<AttachmentRef>,
    pub meta: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// The derived, cacheable projection a storefront renders for one object.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorefrontView {
    pub id: CatalogId,
    pub title: String,
    pub permalink: String,
    pub price: Option<Decimal>,
    pub regular_price: Option<Decimal>,
    pub sale_price: Option<Decimal>,
    pub stock_status: StockStatus,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Term {
    pub id: TermId,
    pub taxonomy: String,
    pub value: String,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_object(&self, object: NewObject) -> Result<CatalogId, StoreError>;

    async fn object(&self, id: CatalogId) -> Result<Option<CatalogObject>, StoreError>;

    async fn update_content(&self, id: CatalogId, patch: ContentPatch) -> Result<(), StoreError>;

    async fn set_pricing(&self, id: CatalogId, pricing: Pricing) -> Result<(), StoreError>;

    async fn set_inventory(&self, id: CatalogId, inventory: Inventory) -> Result<(), StoreError>;

    /// Registers a classification dimension; returns `true` when it was new.
    async fn ensure_taxonomy(&self, key: &str, label: &str) -> Result<bool, StoreError>;

    async fn find_term(&self, taxonomy: &str, value: &str) -> Result<Option<TermId>, StoreError>;

    /// Creates a term. Stores that enforce a unique `(taxonomy, value)` index
    /// return the existing id instead of creating a duplicate.
    async fn insert_term(&self, taxonomy: &str, value: &str) -> Result<TermId, StoreError>;

    /// Replaces the object's terms within one taxonomy.
    async fn assign_terms(
        &self,
        id: CatalogId,
        taxonomy: &str,
        terms: &[TermId],
    ) -> Result<(), StoreError>;

    async fn upsert_attributes(
        &self,
        id: CatalogId,
        attributes: Vec<AttributeDescriptor>,
    ) -> Result<(), StoreError>;

    async fn set_meta(&self, id: CatalogId, key: &str, value: String) -> Result<(), StoreError>;

    /// Stores the media and makes it the object's primary image.
    async fn attach_image(
        &self,
        id: CatalogId,
        upload: MediaUpload,
    ) -> Result<AttachmentRef, StoreError>;

    async fn invalidate_caches(&self, id: CatalogId) -> Result<(), StoreError>;

    async fn storefront_view(&self, id: CatalogId) -> Result<Option<StorefrontView>, StoreError>;

    async fn permalink(&self, id: CatalogId) -> Result<String, StoreError>;
}

pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
