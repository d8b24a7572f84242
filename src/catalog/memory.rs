use super::{
    AttachmentRef, AttributeDescriptor, CATEGORY_TAXONOMY, CatalogId, CatalogObject, CatalogStore,
    ContentPatch, Inventory, MediaUpload, NewObject, Pricing, SHIPPING_CLASS_TAXONOMY, StoreError,
    StorefrontView, TAG_TAXONOMY, Term, TermId, slugify,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// In-process commerce platform. All state sits behind one lock, so every
/// trait call is atomic with respect to the others.
pub struct MemoryCatalog {
    base_url: String,
    state: Mutex<CatalogState>,
}

#[derive(Default)]
struct CatalogState {
    next_object: u64,
    next_term: u64,
    objects: BTreeMap<CatalogId, CatalogObject>,
    slugs: HashSet<String>,
    taxonomies: BTreeMap<String, String>,
    terms: HashMap<(String, String), TermId>,
    term_rows: Vec<Term>,
    views: HashMap<CatalogId, StorefrontView>,
}

impl CatalogState {
    fn object_mut(&mut self, id: CatalogId) -> Result<&mut CatalogObject, StoreError> {
        self.objects
            .get_mut(&id)
            .ok_or(StoreError::MissingObject(id))
    }

    fn unique_slug(&mut self, title: &str) -> String {
        let base = match slugify(title) {
            slug if slug.is_empty() => "product".to_string(),
            slug => slug,
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while self.slugs.contains(&candidate) {
            candidate = format!("{base}-{n}");
            n += 1;
        }
        self.slugs.insert(candidate.clone());
        candidate
    }
}

impl MemoryCatalog {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut state = CatalogState::default();
        for (key, label) in [
            (CATEGORY_TAXONOMY, "Product categories"),
            (TAG_TAXONOMY, "Product tags"),
            (SHIPPING_CLASS_TAXONOMY, "Shipping classes"),
        ] {
            state.taxonomies.insert(key.to_string(), label.to_string());
        }
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state: Mutex::new(state),
        }
    }

    #[cfg(test)]
    pub async fn object_count(&self) -> usize {
        self.state.lock().await.objects.len()
    }

    #[cfg(test)]
    pub async fn terms_in(&self, taxonomy: &str) -> Vec<Term> {
        self.state
            .lock()
            .await
            .term_rows
            .iter()
            .filter(|term| term.taxonomy == taxonomy)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub async fn term_count(&self) -> usize {
        self.state.lock().await.term_rows.len()
    }

    #[cfg(test)]
    pub async fn has_taxonomy(&self, key: &str) -> bool {
        self.state.lock().await.taxonomies.contains_key(key)
    }

    fn permalink_for(&self, slug: &str) -> String {
        format!("{}/product/{}/", self.base_url, slug)
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn insert_object(&self, object: NewObject) -> Result<CatalogId, StoreError> {
        let mut state = self.state.lock().await;
        state.next_object += 1;
        let id = CatalogId(state.next_object);
        let slug = state.unique_slug(&object.title);
        state.objects.insert(
            id,
            CatalogObject {
                id,
                slug,
                title: object.title,
                body: object.body,
                excerpt: object.excerpt,
                published: true,
                product_type: object.product_type,
                pricing: None,
                inventory: Inventory::default(),
                terms: BTreeMap::new(),
                attributes: BTreeMap::new(),
                featured_image: None,
                meta: BTreeMap::new(),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn object(&self, id: CatalogId) -> Result<Option<CatalogObject>, StoreError> {
        Ok(self.state.lock().await.objects.get(&id).cloned())
    }

    async fn update_content(&self, id: CatalogId, patch: ContentPatch) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let object = state.object_mut(id)?;
        if let Some(title) = patch.title {
            object.title = title;
        }
        if let Some(body) = patch.body {
            object.body = body;
        }
        if let Some(excerpt) = patch.excerpt {
            object.excerpt = excerpt;
        }
        Ok(())
    }

    async fn set_pricing(&self, id: CatalogId, pricing: Pricing) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.object_mut(id)?.pricing = Some(pricing);
        Ok(())
    }

    async fn set_inventory(&self, id: CatalogId, inventory: Inventory) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.object_mut(id)?.inventory = inventory;
        Ok(())
    }

    async fn ensure_taxonomy(&self, key: &str, label: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.taxonomies.contains_key(key) {
            return Ok(false);
        }
        state.taxonomies.insert(key.to_string(), label.to_string());
        Ok(true)
    }

    async fn find_term(&self, taxonomy: &str, value: &str) -> Result<Option<TermId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .terms
            .get(&(taxonomy.to_string(), value.to_string()))
            .copied())
    }

    async fn insert_term(&self, taxonomy: &str, value: &str) -> Result<TermId, StoreError> {
        let mut state = self.state.lock().await;
        if !state.taxonomies.contains_key(taxonomy) {
            return Err(StoreError::UnknownTaxonomy(taxonomy.to_string()));
        }
        let key = (taxonomy.to_string(), value.to_string());
        if let Some(existing) = state.terms.get(&key) {
            debug!(target = "catalog.store", taxonomy, value, term_id = %existing, "term_insert_deduplicated");
            return Ok(*existing);
        }
        state.next_term += 1;
        let id = TermId(state.next_term);
        state.terms.insert(key, id);
        state.term_rows.push(Term {
            id,
            taxonomy: taxonomy.to_string(),
            value: value.to_string(),
        });
        Ok(id)
    }

    async fn assign_terms(
        &self,
        id: CatalogId,
        taxonomy: &str,
        terms: &[TermId],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.taxonomies.contains_key(taxonomy) {
            return Err(StoreError::UnknownTaxonomy(taxonomy.to_string()));
        }
        let object = state.object_mut(id)?;
        let mut seen = HashSet::new();
        let ids = terms
            .iter()
            .copied()
            .filter(|term| seen.insert(*term))
            .collect();
        object.terms.insert(taxonomy.to_string(), ids);
        Ok(())
    }

    async fn upsert_attributes(
        &self,
        id: CatalogId,
        attributes: Vec<AttributeDescriptor>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let object = state.object_mut(id)?;
        for attribute in attributes {
            object
                .attributes
                .insert(attribute.taxonomy.clone(), attribute);
        }
        Ok(())
    }

    async fn set_meta(&self, id: CatalogId, key: &str, value: String) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.object_mut(id)?.meta.insert(key.to_string(), value);
        Ok(())
    }

    async fn attach_image(
        &self,
        id: CatalogId,
        upload: MediaUpload,
    ) -> Result<AttachmentRef, StoreError> {
        if upload.bytes.is_empty() {
            return Err(StoreError::Rejected("empty media upload".into()));
        }
        let mut state = self.state.lock().await;
        let attachment_id = Uuid::new_v4();
        let attachment = AttachmentRef {
            id: attachment_id,
            filename: upload.filename.clone(),
            url: format!(
                "{}/media/{}/{}",
                self.base_url,
                attachment_id.simple(),
                upload.filename
            ),
        };
        state.object_mut(id)?.featured_image = Some(attachment.clone());
        debug!(
            target = "catalog.store",
            product_id = %id,
            content_type = %upload.content_type,
            bytes = upload.bytes.len(),
            "media_attached"
        );
        Ok(attachment)
    }

    async fn invalidate_caches(&self, id: CatalogId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.objects.contains_key(&id) {
            return Err(StoreError::MissingObject(id));
        }
        state.views.remove(&id);
        Ok(())
    }

    async fn storefront_view(&self, id: CatalogId) -> Result<Option<StorefrontView>, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.views.get(&id) {
            return Ok(Some(cached.clone()));
        }
        let Some(object) = state.objects.get(&id) else {
            return Ok(None);
        };
        let view = StorefrontView {
            id,
            title: object.title.clone(),
            permalink: self.permalink_for(&object.slug),
            price: object.pricing.as_ref().map(|p| p.effective),
            regular_price: object.pricing.as_ref().map(|p| p.regular),
            sale_price: object.pricing.as_ref().and_then(|p| p.sale),
            stock_status: object.inventory.status,
            image: object.featured_image.as_ref().map(|img| img.url.clone()),
        };
        state.views.insert(id, view.clone());
        Ok(Some(view))
    }

    async fn permalink(&self, id: CatalogId) -> Result<String, StoreError> {
        let state = self.state.lock().await;
        let object = state.objects.get(&id).ok_or(StoreError::MissingObject(id))?;
        Ok(self.permalink_for(&object.slug))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StockStatus;
    use crate::models::BackorderPolicy;
    use rust_decimal::Decimal;

    fn new_object(title: &str) -> NewObject {
        NewObject {
            title: title.into(),
            body: String::new(),
            excerpt: String::new(),
            product_type: "simple",
        }
    }

    #[tokio::test]
    async fn insert_term_is_compare_and_create() {
        let store = MemoryCatalog::new("https://shop.test");
        let first = store.insert_term(TAG_TAXONOMY, "summer").await.unwrap();
        let second = store.insert_term(TAG_TAXONOMY, "summer").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.terms_in(TAG_TAXONOMY).await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_taxonomy_is_rejected() {
        let store = MemoryCatalog::new("https://shop.test");
        let err = store.insert_term("pa_size", "M").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownTaxonomy(ref key) if key == "pa_size"));
        assert!(store.ensure_taxonomy("pa_size", "Size").await.unwrap());
        assert!(!store.ensure_taxonomy("pa_size", "Size").await.unwrap());
        assert!(store.insert_term("pa_size", "M").await.is_ok());
    }

    #[tokio::test]
    async fn slugs_are_unique_per_object() {
        let store = MemoryCatalog::new("https://shop.test/");
        let a = store.insert_object(new_object("Blue Hat")).await.unwrap();
        let b = store.insert_object(new_object("Blue Hat")).await.unwrap();
        assert_eq!(
            store.permalink(a).await.unwrap(),
            "https://shop.test/product/blue-hat/"
        );
        assert_eq!(
            store.permalink(b).await.unwrap(),
            "https://shop.test/product/blue-hat-2/"
        );
    }

    #[tokio::test]
    async fn storefront_view_is_cached_until_invalidated() {
        let store = MemoryCatalog::new("https://shop.test");
        let id = store.insert_object(new_object("Hat")).await.unwrap();
        store
            .set_pricing(id, Pricing::new(Decimal::from(10), None))
            .await
            .unwrap();
        let before = store.storefront_view(id).await.unwrap().unwrap();
        assert_eq!(before.price, Some(Decimal::from(10)));

        store
            .set_pricing(id, Pricing::new(Decimal::from(10), Some(Decimal::from(7))))
            .await
            .unwrap();
        store
            .set_inventory(id, Inventory::from_stock(Some(0), BackorderPolicy::No))
            .await
            .unwrap();
        let stale = store.storefront_view(id).await.unwrap().unwrap();
        assert_eq!(stale.price, Some(Decimal::from(10)));

        store.invalidate_caches(id).await.unwrap();
        let fresh = store.storefront_view(id).await.unwrap().unwrap();
        assert_eq!(fresh.price, Some(Decimal::from(7)));
        assert_eq!(fresh.stock_status, StockStatus::OutOfStock);
    }

    #[tokio::test]
    async fn writes_to_missing_objects_fail() {
        let store = MemoryCatalog::new("https://shop.test");
        let err = store
            .set_meta(CatalogId(99), "_sku", "X".into())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingObject(CatalogId(99))));
        assert!(store.storefront_view(CatalogId(99)).await.unwrap().is_none());
    }
}
