use crate::catalog::CatalogId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A product description that passed validation for creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub title: String,
    pub price: Decimal,
    pub details: ProductDetails,
}

/// A partial description used by updates: only the fields that are present
/// get written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductPatch {
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub details: ProductDetails,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductDetails {
    pub sale_price: Option<Decimal>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub stock: Option<i64>,
    pub backorders: Option<BackorderPolicy>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub attributes: Attributes,
    pub image: Option<ImageSource>,
    pub sku: Option<String>,
    pub weight: Option<String>,
    pub length: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub is_virtual: Option<bool>,
    pub downloadable: Option<bool>,
    pub shipping_class: Option<String>,
    pub submitter_email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    pub size: Vec<String>,
    pub color: Vec<String>,
    pub other: Vec<NamedAttribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedAttribute {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq)]
pub enum ImageSource {
    Upload { bytes: Vec<u8>, filename: String },
    Url(String),
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Upload { bytes, filename } => f
                .debug_struct("Upload")
                .field("filename", filename)
                .field("len", &bytes.len())
                .finish(),
            ImageSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackorderPolicy {
    #[default]
    No,
    Notify,
    Yes,
}

impl BackorderPolicy {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "no" | "false" | "0" => Some(BackorderPolicy::No),
            "notify" => Some(BackorderPolicy::Notify),
            "yes" | "true" | "1" => Some(BackorderPolicy::Yes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkRequest {
    #[serde(default)]
    pub products: Option<Value>,
    #[serde(default)]
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkResult {
    pub success: bool,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkResult {
    pub fn empty(total: usize) -> Self {
        Self {
            success: true,
            total,
            successful: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkFailure {
    pub index: usize,
    pub error: String,
    #[serde(alias = "product_data")]
    pub original_record: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductResponse {
    pub success: bool,
    pub product_id: CatalogId,
    pub permalink: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
