use super::{
    IngestError, MediaAcquirer, MediaOutcome, TaxonomyResolver, TermKind,
    validate::{parse_decimal, validate},
};
use crate::activity::{ActivityAction, ActivityLog, ActivityLogEntry};
use crate::catalog::{
    AttributeDescriptor, CATEGORY_TAXONOMY, CatalogId, CatalogStore, ContentPatch, Inventory,
    NewObject, Pricing, SHIPPING_CLASS_TAXONOMY, StoreError, TAG_TAXONOMY,
};
use crate::metrics;
use crate::models::{BulkFailure, BulkResult, ProductDetails, ProductPatch, ProductRecord};
use chrono::Utc;
use serde_json::Value;
use std::{collections::BTreeMap, future::Future, sync::Arc, time::Instant};
use tracing::{info, warn};

pub const META_SKU: &str = "_sku";
pub const META_WEIGHT: &str = "_weight";
pub const META_LENGTH: &str = "_length";
pub const META_WIDTH: &str = "_width";
pub const META_HEIGHT: &str = "_height";
pub const META_VIRTUAL: &str = "_virtual";
pub const META_DOWNLOADABLE: &str = "_downloadable";
pub const META_CREATOR: &str = "_ingest_creator";
pub const META_CREATED_AT: &str = "_ingest_created_at";
pub const META_UPDATED_AT: &str = "_ingest_updated_at";
pub const META_CREATED: &str = "_ingest_created";

const PRODUCT_TYPE: &str = "simple";

/// Who asked for a write and from where; copied into activity entries.
#[derive(Debug, Clone)]
pub struct IngestContext {
    pub actor: String,
    pub source_address: String,
}

impl IngestContext {
    pub fn new(actor: impl Into<String>, source_address: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            source_address: source_address.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub id: CatalogId,
    pub permalink: String,
    pub image: MediaOutcome,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Create,
    Update,
}

/// Writes validated product records into the catalog, one object at a time.
///
/// Steps run in a fixed order and stop at the first platform failure. There
/// is no rollback: an object inserted before a later step fails stays in the
/// catalog without an activity entry.
#[derive(Clone)]
pub struct IngestionEngine {
    store: Arc<dyn CatalogStore>,
    taxonomy: TaxonomyResolver,
    media: MediaAcquirer,
    log: ActivityLog,
}

impl IngestionEngine {
    pub fn new(store: Arc<dyn CatalogStore>, media: MediaAcquirer, log: ActivityLog) -> Self {
        Self {
            taxonomy: TaxonomyResolver::new(store.clone()),
            store,
            media,
            log,
        }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.log
    }

    pub async fn create_single(
        &self,
        record: ProductRecord,
        ctx: &IngestContext,
    ) -> Result<Ingested, IngestError> {
        self.create(record, ctx, ActivityAction::Create).await
    }

    /// Processes every element independently and in order. One element's
    /// failure never prevents the others from being attempted.
    pub async fn bulk_create(
        &self,
        records: Vec<Value>,
        default_email: Option<&str>,
        ctx: &IngestContext,
    ) -> BulkResult {
        let mut result = BulkResult::empty(records.len());
        for (index, raw) in records.into_iter().enumerate() {
            let outcome = match validate(&raw).into_result() {
                Ok(mut record) => {
                    if record.details.submitter_email.is_none() {
                        record.details.submitter_email = default_email.map(str::to_string);
                    }
                    self.create(record, ctx, ActivityAction::BulkCreate).await
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(_) => result.successful += 1,
                Err(err) => {
                    warn!(
                        target = "catalog.ingest",
                        index,
                        stage = err.stage(),
                        error = %err,
                        "bulk_item_failed"
                    );
                    result.failed += 1;
                    result.failures.push(BulkFailure {
                        index,
                        error: err.detail().to_string(),
                        original_record: raw,
                    });
                }
            }
        }
        result.success = result.failed == 0;
        metrics::bulk_outcome(result.total, result.successful, result.failed);
        info!(
            target = "catalog.ingest",
            total = result.total,
            successful = result.successful,
            failed = result.failed,
            actor = %ctx.actor,
            "bulk_completed"
        );
        result
    }

    /// Applies only the fields present in `patch` to an existing object.
    pub async fn update_product(
        &self,
        id: CatalogId,
        patch: ProductPatch,
        ctx: &IngestContext,
    ) -> Result<Ingested, IngestError> {
        let existing = self
            .stage("lookup", self.store.object(id))
            .await?
            .ok_or_else(|| IngestError::not_found("lookup", format!("product {id} not found")))?;
        let ProductPatch {
            title,
            price,
            details,
        } = patch;

        let content = ContentPatch {
            title,
            body: details.description.clone(),
            excerpt: details.short_description.clone(),
        };
        if !content.is_empty() {
            self.stage("update_object", self.store.update_content(id, content))
                .await?;
        }

        if price.is_some() || details.sale_price.is_some() {
            let current = existing.pricing.as_ref();
            if let Some(regular) = price.or(current.map(|p| p.regular)) {
                let sale = details.sale_price.or(current.and_then(|p| p.sale));
                self.stage("pricing", self.store.set_pricing(id, Pricing::new(regular, sale)))
                    .await?;
            }
        }

        if details.stock.is_some() || details.backorders.is_some() {
            let backorders = details
                .backorders
                .unwrap_or(existing.inventory.backorders);
            let inventory = match details.stock {
                Some(quantity) => Inventory::from_stock(Some(quantity), backorders),
                None => Inventory {
                    backorders,
                    ..existing.inventory.clone()
                },
            };
            self.stage("stock", self.store.set_inventory(id, inventory))
                .await?;
        }

        self.stage("taxonomies", self.apply_taxonomies(id, &details, &existing.attributes))
            .await?;
        let image = self.attach_media(id, &details).await;
        self.stage("meta", self.apply_meta(id, &details, WriteMode::Update))
            .await?;
        self.stage("invalidate", self.store.invalidate_caches(id))
            .await?;
        let permalink = self.stage("permalink", self.store.permalink(id)).await?;

        info!(target = "catalog.ingest", product_id = %id, actor = %ctx.actor, "product_updated");
        Ok(Ingested {
            id,
            permalink,
            image,
        })
    }

    async fn create(
        &self,
        record: ProductRecord,
        ctx: &IngestContext,
        action: ActivityAction,
    ) -> Result<Ingested, IngestError> {
        let ProductRecord {
            title,
            price,
            details,
        } = record;

        let id = self
            .stage(
                "create_object",
                self.store.insert_object(NewObject {
                    title,
                    body: details.description.clone().unwrap_or_default(),
                    excerpt: details.short_description.clone().unwrap_or_default(),
                    product_type: PRODUCT_TYPE,
                }),
            )
            .await?;

        self.stage(
            "pricing",
            self.store
                .set_pricing(id, Pricing::new(price, details.sale_price)),
        )
        .await?;

        let inventory = Inventory::from_stock(details.stock, details.backorders.unwrap_or_default());
        self.stage("stock", self.store.set_inventory(id, inventory))
            .await?;

        self.stage("taxonomies", self.apply_taxonomies(id, &details, &BTreeMap::new()))
            .await?;
        let image = self.attach_media(id, &details).await;
        self.stage("meta", self.apply_meta(id, &details, WriteMode::Create))
            .await?;
        self.stage("invalidate", self.store.invalidate_caches(id))
            .await?;
        let permalink = self.stage("permalink", self.store.permalink(id)).await?;

        self.log
            .append(ActivityLogEntry {
                timestamp: Utc::now(),
                actor: ctx.actor.clone(),
                action,
                subject_id: id,
                source_address: ctx.source_address.clone(),
            })
            .await;
        info!(
            target = "catalog.ingest",
            product_id = %id,
            actor = %ctx.actor,
            action = ?action,
            "product_created"
        );

        Ok(Ingested {
            id,
            permalink,
            image,
        })
    }

    async fn stage<T, Fut>(&self, name: &'static str, fut: Fut) -> Result<T, IngestError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let started = Instant::now();
        let value = fut
            .await
            .map_err(|err| IngestError::platform_write(name, err))?;
        metrics::stage_elapsed(name, started.elapsed().as_millis());
        Ok(value)
    }

    async fn attach_media(&self, id: CatalogId, details: &ProductDetails) -> MediaOutcome {
        let started = Instant::now();
        let outcome = self.media.acquire(details.image.as_ref(), id).await;
        if details.image.is_some() {
            metrics::stage_elapsed("media", started.elapsed().as_millis());
        }
        outcome
    }

    /// `current` holds the descriptors already on the object; new attributes
    /// are positioned after them and existing ones keep their slot.
    async fn apply_taxonomies(
        &self,
        id: CatalogId,
        details: &ProductDetails,
        current: &BTreeMap<String, AttributeDescriptor>,
    ) -> Result<(), StoreError> {
        if let Some(category) = &details.category {
            let term = self.taxonomy.resolve(&TermKind::Category, category).await?;
            self.store
                .assign_terms(id, CATEGORY_TAXONOMY, &[term])
                .await?;
        }

        if !details.tags.is_empty() {
            let terms = self.taxonomy.resolve_all(&TermKind::Tag, &details.tags).await?;
            self.store.assign_terms(id, TAG_TAXONOMY, &terms).await?;
        }

        let attributes = &details.attributes;
        let mut dimensions = vec![
            (TermKind::size(), &attributes.size),
            (TermKind::color(), &attributes.color),
        ];
        dimensions.extend(
            attributes
                .other
                .iter()
                .filter_map(|named| TermKind::attribute(&named.name).map(|kind| (kind, &named.values))),
        );

        let mut next_position = current
            .values()
            .map(|descriptor| descriptor.position + 1)
            .max()
            .unwrap_or(0);
        let mut descriptors = Vec::new();
        for (kind, values) in dimensions {
            if values.is_empty() {
                continue;
            }
            let terms = self.taxonomy.resolve_all(&kind, values).await?;
            self.store.assign_terms(id, kind.taxonomy(), &terms).await?;
            if let TermKind::Attribute { key, label } = kind {
                let position = match current.get(&key) {
                    Some(descriptor) => descriptor.position,
                    None => {
                        next_position += 1;
                        next_position - 1
                    }
                };
                descriptors.push(AttributeDescriptor {
                    taxonomy: key,
                    label,
                    position,
                    visible: true,
                    variation: false,
                    is_taxonomy: true,
                });
            }
        }
        if !descriptors.is_empty() {
            self.store.upsert_attributes(id, descriptors).await?;
        }
        Ok(())
    }

    async fn apply_meta(
        &self,
        id: CatalogId,
        details: &ProductDetails,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        if let Some(sku) = &details.sku {
            self.store.set_meta(id, META_SKU, sku.clone()).await?;
        }
        for (key, value) in [
            (META_WEIGHT, &details.weight),
            (META_LENGTH, &details.length),
            (META_WIDTH, &details.width),
            (META_HEIGHT, &details.height),
        ] {
            if let Some(value) = value {
                self.store.set_meta(id, key, format_measure(value)).await?;
            }
        }

        for (key, flag) in [
            (META_VIRTUAL, details.is_virtual),
            (META_DOWNLOADABLE, details.downloadable),
        ] {
            let value = match (flag, mode) {
                (Some(flag), _) => flag,
                (None, WriteMode::Create) => false,
                (None, WriteMode::Update) => continue,
            };
            self.store
                .set_meta(id, key, yes_no(value).to_string())
                .await?;
        }

        if let Some(class) = &details.shipping_class {
            let term = self.taxonomy.resolve(&TermKind::ShippingClass, class).await?;
            self.store
                .assign_terms(id, SHIPPING_CLASS_TAXONOMY, &[term])
                .await?;
        }

        if let Some(email) = &details.submitter_email {
            self.store.set_meta(id, META_CREATOR, email.clone()).await?;
        }
        let now = Utc::now().to_rfc3339();
        match mode {
            WriteMode::Create => {
                self.store.set_meta(id, META_CREATED_AT, now).await?;
                self.store
                    .set_meta(id, META_CREATED, yes_no(true).to_string())
                    .await?;
            }
            WriteMode::Update => {
                self.store.set_meta(id, META_UPDATED_AT, now).await?;
            }
        }
        Ok(())
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// Numeric measurements are stored without trailing zeros; anything else is
/// kept as given.
fn format_measure(raw: &str) -> String {
    parse_decimal(raw)
        .map(|value| value.normalize().to_string())
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        AttachmentRef, CatalogObject, MediaUpload, MemoryCatalog, StockStatus, StorefrontView,
        TermId,
    };
    use crate::config::{ActivityConfig, MediaConfig};
    use crate::ingest::IngestErrorKind;
    use crate::ingest::validate::{REQUIRED_FIELDS_MESSAGE, validate_patch};
    use crate::models::BackorderPolicy;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    fn engine_with(store: Arc<dyn CatalogStore>) -> IngestionEngine {
        let media = MediaAcquirer::new(store.clone(), reqwest::Client::new(), MediaConfig::default());
        IngestionEngine::new(store, media, ActivityLog::new(&ActivityConfig::default()))
    }

    fn engine() -> (Arc<MemoryCatalog>, IngestionEngine) {
        let store = Arc::new(MemoryCatalog::new("https://shop.test"));
        let engine = engine_with(store.clone());
        (store, engine)
    }

    fn ctx() -> IngestContext {
        IngestContext::new("ops@shop.test", "10.0.0.7")
    }

    fn record(raw: Value) -> ProductRecord {
        validate(&raw).into_result().unwrap()
    }

    async fn object(store: &MemoryCatalog, id: CatalogId) -> CatalogObject {
        store.object(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn creates_a_fully_classified_product() {
        let (store, engine) = engine();
        let created = engine
            .create_single(
                record(json!({
                    "title": "Linen Shirt",
                    "price": "29.90",
                    "sale_price": 24,
                    "description": "Breathable.",
                    "category": "Shirts",
                    "tags": "summer, linen",
                    "size": ["S", "M"],
                    "color": "White",
                    "attributes": [{"name": "Fit", "value": "Relaxed"}],
                    "stock": 5,
                    "sku": "LS-01",
                    "weight": "0.250",
                    "shipping_class": "Light",
                    "user_email": "ops@shop.test"
                })),
                &ctx(),
            )
            .await
            .unwrap();

        assert_eq!(created.permalink, "https://shop.test/product/linen-shirt/");
        assert_eq!(created.image, MediaOutcome::NoImage);

        let object = object(&store, created.id).await;
        assert!(object.published);
        assert_eq!(object.product_type, "simple");
        assert_eq!(object.body, "Breathable.");
        let pricing = object.pricing.unwrap();
        assert_eq!(pricing.regular, Decimal::from_str("29.90").unwrap());
        assert_eq!(pricing.effective, Decimal::from(24));
        assert!(object.inventory.managed);
        assert_eq!(object.inventory.quantity, Some(5));
        assert_eq!(object.inventory.backorders, BackorderPolicy::No);

        assert_eq!(object.terms[CATEGORY_TAXONOMY].len(), 1);
        assert_eq!(object.terms[TAG_TAXONOMY].len(), 2);
        assert_eq!(object.terms["pa_size"].len(), 2);
        assert_eq!(object.terms["pa_color"].len(), 1);
        assert_eq!(object.terms["pa_fit"].len(), 1);
        assert_eq!(object.terms[SHIPPING_CLASS_TAXONOMY].len(), 1);

        let positions: Vec<(String, usize)> = object
            .attributes
            .values()
            .map(|a| (a.taxonomy.clone(), a.position))
            .collect();
        assert!(positions.contains(&("pa_size".to_string(), 0)));
        assert!(positions.contains(&("pa_color".to_string(), 1)));
        assert!(positions.contains(&("pa_fit".to_string(), 2)));
        assert!(object.attributes.values().all(|a| a.visible && !a.variation && a.is_taxonomy));

        assert_eq!(object.meta[META_SKU], "LS-01");
        assert_eq!(object.meta[META_WEIGHT], "0.25");
        assert_eq!(object.meta[META_VIRTUAL], "no");
        assert_eq!(object.meta[META_DOWNLOADABLE], "no");
        assert_eq!(object.meta[META_CREATOR], "ops@shop.test");
        assert_eq!(object.meta[META_CREATED], "yes");
        assert!(object.meta.contains_key(META_CREATED_AT));

        let view = store.storefront_view(created.id).await.unwrap().unwrap();
        assert_eq!(view.price, Some(Decimal::from(24)));
        assert_eq!(view.stock_status, StockStatus::InStock);

        let entries = engine.activity().list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject_id, created.id);
        assert_eq!(entries[0].action, ActivityAction::Create);
        assert_eq!(entries[0].actor, "ops@shop.test");
        assert_eq!(entries[0].source_address, "10.0.0.7");
    }

    #[tokio::test]
    async fn minimal_product_is_unmanaged_and_in_stock() {
        let (store, engine) = engine();
        let created = engine
            .create_single(record(json!({"title": "Mug", "price": 8})), &ctx())
            .await
            .unwrap();
        let object = object(&store, created.id).await;
        assert!(!object.inventory.managed);
        assert_eq!(object.inventory.status, StockStatus::InStock);
        assert!(object.terms.is_empty());
        assert!(object.attributes.is_empty());
        assert!(!object.meta.contains_key(META_SKU));
    }

    #[tokio::test]
    async fn zero_stock_is_out_of_stock() {
        let (store, engine) = engine();
        let created = engine
            .create_single(
                record(json!({"title": "Mug", "price": 8, "stock": 0, "backorders": "notify"})),
                &ctx(),
            )
            .await
            .unwrap();
        let object = object(&store, created.id).await;
        assert_eq!(object.inventory.status, StockStatus::OutOfStock);
        assert_eq!(object.inventory.backorders, BackorderPolicy::Notify);
    }

    #[tokio::test]
    async fn terms_are_shared_between_products() {
        let (store, engine) = engine();
        for title in ["Cap", "Beanie"] {
            engine
                .create_single(
                    record(json!({"title": title, "price": 12, "category": "Hats", "tags": ["winter"]})),
                    &ctx(),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.terms_in(CATEGORY_TAXONOMY).await.len(), 1);
        assert_eq!(store.terms_in(TAG_TAXONOMY).await.len(), 1);
    }

    #[tokio::test]
    async fn bulk_isolates_invalid_records() {
        let (store, engine) = engine();
        let records = vec![
            json!({"title": "A", "price": 5}),
            json!({"title": "B"}),
            json!({"title": "C", "price": "7.5"}),
        ];
        let result = engine
            .bulk_create(records, Some("ops@shop.test"), &ctx())
            .await;

        assert!(!result.success);
        assert_eq!(result.total, 3);
        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].index, 1);
        assert_eq!(result.failures[0].error, REQUIRED_FIELDS_MESSAGE);
        assert_eq!(result.failures[0].original_record, json!({"title": "B"}));
        assert_eq!(store.object_count().await, 2);

        let entries = engine.activity().list().await;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.action == ActivityAction::BulkCreate));
    }

    #[tokio::test]
    async fn bulk_fills_in_the_request_submitter() {
        let (store, engine) = engine();
        let result = engine
            .bulk_create(
                vec![
                    json!({"title": "A", "price": 5}),
                    json!({"title": "B", "price": 5, "user_email": "b@shop.test"}),
                ],
                Some("ops@shop.test"),
                &ctx(),
            )
            .await;
        assert!(result.success);
        assert_eq!(object(&store, CatalogId(1)).await.meta[META_CREATOR], "ops@shop.test");
        assert_eq!(object(&store, CatalogId(2)).await.meta[META_CREATOR], "b@shop.test");
    }

    #[tokio::test]
    async fn invalid_record_has_no_side_effects() {
        let (store, engine) = engine();
        let err = validate(&json!({"title": "", "price": 3, "category": "Hats"}))
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), IngestErrorKind::MissingField);
        let result = engine
            .bulk_create(vec![json!({"price": 3, "category": "Hats"})], None, &ctx())
            .await;
        assert_eq!(result.failed, 1);
        assert_eq!(store.object_count().await, 0);
        assert_eq!(store.term_count().await, 0);
        assert!(engine.activity().list().await.is_empty());
    }

    #[tokio::test]
    async fn empty_bulk_is_a_trivial_success() {
        let (_, engine) = engine();
        let result = engine.bulk_create(Vec::new(), None, &ctx()).await;
        assert!(result.success);
        assert_eq!(result.total, 0);
    }

    /// Rejects object creation for titles starting with "boom".
    struct FailingCatalog {
        inner: MemoryCatalog,
    }

    #[async_trait]
    impl CatalogStore for FailingCatalog {
        async fn insert_object(&self, object: NewObject) -> Result<CatalogId, StoreError> {
            if object.title.starts_with("boom") {
                return Err(StoreError::Rejected("database is read-only".into()));
            }
            self.inner.insert_object(object).await
        }
        async fn object(&self, id: CatalogId) -> Result<Option<CatalogObject>, StoreError> {
            self.inner.object(id).await
        }
        async fn update_content(&self, id: CatalogId, patch: ContentPatch) -> Result<(), StoreError> {
            self.inner.update_content(id, patch).await
        }
        async fn set_pricing(&self, id: CatalogId, pricing: Pricing) -> Result<(), StoreError> {
            self.inner.set_pricing(id, pricing).await
        }
        async fn set_inventory(&self, id: CatalogId, inventory: Inventory) -> Result<(), StoreError> {
            self.inner.set_inventory(id, inventory).await
        }
        async fn ensure_taxonomy(&self, key: &str, label: &str) -> Result<bool, StoreError> {
            self.inner.ensure_taxonomy(key, label).await
        }
        async fn find_term(&self, taxonomy: &str, value: &str) -> Result<Option<TermId>, StoreError> {
            self.inner.find_term(taxonomy, value).await
        }
        async fn insert_term(&self, taxonomy: &str, value: &str) -> Result<TermId, StoreError> {
            self.inner.insert_term(taxonomy, value).await
        }
        async fn assign_terms(
            &self,
            id: CatalogId,
            taxonomy: &str,
            terms: &[TermId],
        ) -> Result<(), StoreError> {
            self.inner.assign_terms(id, taxonomy, terms).await
        }
        async fn upsert_attributes(
            &self,
            id: CatalogId,
            attributes: Vec<AttributeDescriptor>,
        ) -> Result<(), StoreError> {
            self.inner.upsert_attributes(id, attributes).await
        }
        async fn set_meta(&self, id: CatalogId, key: &str, value: String) -> Result<(), StoreError> {
            self.inner.set_meta(id, key, value).await
        }
        async fn attach_image(
            &self,
            id: CatalogId,
            upload: MediaUpload,
        ) -> Result<AttachmentRef, StoreError> {
            self.inner.attach_image(id, upload).await
        }
        async fn invalidate_caches(&self, id: CatalogId) -> Result<(), StoreError> {
            self.inner.invalidate_caches(id).await
        }
        async fn storefront_view(&self, id: CatalogId) -> Result<Option<StorefrontView>, StoreError> {
            self.inner.storefront_view(id).await
        }
        async fn permalink(&self, id: CatalogId) -> Result<String, StoreError> {
            self.inner.permalink(id).await
        }
    }

    #[tokio::test]
    async fn platform_failures_are_isolated_per_item() {
        let store: Arc<dyn CatalogStore> = Arc::new(FailingCatalog {
            inner: MemoryCatalog::new("https://shop.test"),
        });
        let engine = engine_with(store);
        let result = engine
            .bulk_create(
                vec![
                    json!({"title": "boom box", "price": 40}),
                    json!({"title": "Radio", "price": 25}),
                ],
                None,
                &ctx(),
            )
            .await;
        assert_eq!(result.successful, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].index, 0);
        assert!(result.failures[0].error.contains("read-only"));

        let err = engine
            .create_single(record(json!({"title": "boom", "price": 1})), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), IngestErrorKind::PlatformWrite);
        assert_eq!(err.stage(), "create_object");
        assert_eq!(engine.activity().len().await, 1);
    }

    #[tokio::test]
    async fn update_writes_only_present_fields() {
        let (store, engine) = engine();
        let created = engine
            .create_single(
                record(json!({
                    "title": "Hat", "price": 10, "sale_price": 8, "stock": 3,
                    "virtual": true, "category": "Hats"
                })),
                &ctx(),
            )
            .await
            .unwrap();

        let patch = validate_patch(&json!({"price": 12, "tags": ["felt"]})).unwrap();
        let updated = engine
            .update_product(created.id, patch, &ctx())
            .await
            .unwrap();
        assert_eq!(updated.permalink, created.permalink);

        let object = object(&store, created.id).await;
        assert_eq!(object.title, "Hat");
        let pricing = object.pricing.unwrap();
        assert_eq!(pricing.regular, Decimal::from(12));
        assert_eq!(pricing.sale, Some(Decimal::from(8)));
        assert_eq!(object.inventory.quantity, Some(3));
        assert_eq!(object.meta[META_VIRTUAL], "yes");
        assert_eq!(object.terms[CATEGORY_TAXONOMY].len(), 1);
        assert_eq!(object.terms[TAG_TAXONOMY].len(), 1);
        assert!(object.meta.contains_key(META_UPDATED_AT));

        let patch = validate_patch(&json!({"sale_price": 0, "stock": 0})).unwrap();
        engine
            .update_product(created.id, patch, &ctx())
            .await
            .unwrap();
        let view = store.storefront_view(created.id).await.unwrap().unwrap();
        assert_eq!(view.price, Some(Decimal::from(12)));
        assert_eq!(view.sale_price, None);
        assert_eq!(view.stock_status, StockStatus::OutOfStock);

        assert_eq!(engine.activity().len().await, 1);
    }

    #[tokio::test]
    async fn update_appends_new_attributes_after_existing_ones() {
        let (store, engine) = engine();
        let created = engine
            .create_single(
                record(json!({"title": "Scarf", "price": 15, "size": "L", "color": "Red"})),
                &ctx(),
            )
            .await
            .unwrap();

        let patch = validate_patch(&json!({
            "color": "Blue",
            "attributes": [{"name": "Material", "value": "Wool"}]
        }))
        .unwrap();
        engine
            .update_product(created.id, patch, &ctx())
            .await
            .unwrap();

        let object = object(&store, created.id).await;
        let position = |taxonomy: &str| object.attributes[taxonomy].position;
        assert_eq!(position("pa_size"), 0);
        assert_eq!(position("pa_color"), 1);
        assert_eq!(position("pa_material"), 2);
    }

    #[tokio::test]
    async fn update_of_unknown_product_is_not_found() {
        let (_, engine) = engine();
        let err = engine
            .update_product(CatalogId(404), ProductPatch::default(), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), IngestErrorKind::NotFound);
    }

    #[test]
    fn measures_drop_trailing_zeros() {
        assert_eq!(format_measure("2.50"), "2.5");
        assert_eq!(format_measure("10"), "10");
        assert_eq!(format_measure("large"), "large");
    }
}
