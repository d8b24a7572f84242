use crate::catalog::{
    CATEGORY_TAXONOMY, CatalogStore, SHIPPING_CLASS_TAXONOMY, StoreError, TAG_TAXONOMY, TermId,
    slugify,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix of taxonomies registered on demand for product attributes.
pub const ATTRIBUTE_PREFIX: &str = "pa_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermKind {
    Category,
    Tag,
    ShippingClass,
    Attribute { key: String, label: String },
}

impl TermKind {
    pub fn size() -> Self {
        TermKind::Attribute {
            key: format!("{ATTRIBUTE_PREFIX}size"),
            label: "Size".into(),
        }
    }

    pub fn color() -> Self {
        TermKind::Attribute {
            key: format!("{ATTRIBUTE_PREFIX}color"),
            label: "Color".into(),
        }
    }

    /// `None` when the name has no characters usable in a taxonomy key.
    pub fn attribute(name: &str) -> Option<Self> {
        let slug = slugify(name);
        if slug.is_empty() {
            return None;
        }
        Some(TermKind::Attribute {
            key: format!("{ATTRIBUTE_PREFIX}{slug}"),
            label: name.trim().to_string(),
        })
    }

    pub fn taxonomy(&self) -> &str {
        match self {
            TermKind::Category => CATEGORY_TAXONOMY,
            TermKind::Tag => TAG_TAXONOMY,
            TermKind::ShippingClass => SHIPPING_CLASS_TAXONOMY,
            TermKind::Attribute { key, .. } => key,
        }
    }
}

/// Maps human-readable classification values to platform term ids,
/// creating terms (and attribute taxonomies) on first sight.
#[derive(Clone)]
pub struct TaxonomyResolver {
    store: Arc<dyn CatalogStore>,
}

impl TaxonomyResolver {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, kind: &TermKind, value: &str) -> Result<TermId, StoreError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(StoreError::Rejected(format!(
                "empty value for taxonomy `{}`",
                kind.taxonomy()
            )));
        }

        if let TermKind::Attribute { key, label } = kind {
            if self.store.ensure_taxonomy(key, label).await? {
                info!(target = "catalog.taxonomy", taxonomy = %key, label = %label, "taxonomy_registered");
            }
        }

        let taxonomy = kind.taxonomy();
        if let Some(existing) = self.store.find_term(taxonomy, value).await? {
            return Ok(existing);
        }
        // A concurrent writer may insert between find and insert; stores with
        // a unique index hand back the winner's id.
        let id = self.store.insert_term(taxonomy, value).await?;
        debug!(target = "catalog.taxonomy", taxonomy, value, term_id = %id, "term_created");
        Ok(id)
    }

    pub async fn resolve_all(
        &self,
        kind: &TermKind,
        values: &[String],
    ) -> Result<Vec<TermId>, StoreError> {
        let mut ids = Vec::with_capacity(values.len());
        for value in values {
            let id = self.resolve(kind, value).await?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}
