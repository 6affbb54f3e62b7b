use listing_hub::config::MediaConfig;
use listing_hub::workflows::listings::{
    FieldValidator, ItemFilter, ItemId, ItemLifecycleService, ItemRecord, ItemRepository,
    LocalMediaStore, MediaIngestor, MediaStore, RepositoryError, RoleAuthorizer,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) type ItemService = ItemLifecycleService<InMemoryItemRepository, RoleAuthorizer>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) media: Arc<dyn MediaStore>,
}

/// Process-local item store. Published slugs stay unique across every non-draft record.
#[derive(Default, Clone)]
pub(crate) struct InMemoryItemRepository {
    records: Arc<Mutex<HashMap<ItemId, ItemRecord>>>,
}

impl InMemoryItemRepository {
    fn records(&self) -> Result<MutexGuard<'_, HashMap<ItemId, ItemRecord>>, RepositoryError> {
        self.records
            .lock()
            .map_err(|_| RepositoryError::Unavailable("item store lock poisoned".to_string()))
    }
}

fn ensure_slug_free(
    records: &HashMap<ItemId, ItemRecord>,
    candidate: &ItemRecord,
) -> Result<(), RepositoryError> {
    if candidate.status.is_draft() {
        return Ok(());
    }
    let Some(slug) = candidate.slug.as_deref() else {
        return Ok(());
    };
    let taken = records.values().any(|record| {
        record.id != candidate.id
            && !record.status.is_draft()
            && record.slug.as_deref() == Some(slug)
    });
    if taken {
        Err(RepositoryError::SlugTaken(slug.to_string()))
    } else {
        Ok(())
    }
}

impl ItemRepository for InMemoryItemRepository {
    fn insert(&self, record: ItemRecord) -> Result<ItemRecord, RepositoryError> {
        let mut guard = self.records()?;
        if guard.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        ensure_slug_free(&guard, &record)?;
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update(&self, record: ItemRecord) -> Result<ItemRecord, RepositoryError> {
        let mut guard = self.records()?;
        if !guard.contains_key(&record.id) {
            return Err(RepositoryError::NotFound);
        }
        ensure_slug_free(&guard, &record)?;
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn fetch(&self, id: &ItemId) -> Result<Option<ItemRecord>, RepositoryError> {
        Ok(self.records()?.get(id).cloned())
    }

    fn delete(&self, id: &ItemId) -> Result<Option<ItemRecord>, RepositoryError> {
        Ok(self.records()?.remove(id))
    }

    fn list(&self, filter: &ItemFilter) -> Result<Vec<ItemRecord>, RepositoryError> {
        let guard = self.records()?;
        let mut records: Vec<ItemRecord> = guard
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }
}

/// Media store plus the ingestor writing into it, both rooted at the configured directories.
pub(crate) fn media_pipeline(config: &MediaConfig) -> (Arc<dyn MediaStore>, Arc<MediaIngestor>) {
    let store: Arc<dyn MediaStore> = Arc::new(LocalMediaStore::new(
        config.root.clone(),
        config.public_base.clone(),
    ));
    let ingestor = Arc::new(MediaIngestor::from_config(store.clone(), config));
    (store, ingestor)
}

pub(crate) fn item_service(
    repository: Arc<InMemoryItemRepository>,
    media: Arc<MediaIngestor>,
    validator: FieldValidator,
) -> Arc<ItemService> {
    Arc::new(
        ItemLifecycleService::new(repository, Arc::new(RoleAuthorizer), media)
            .with_validator(validator),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use listing_hub::workflows::listings::{ItemFields, ItemStatus, UserId};

    fn record(id: &str, slug: &str, status: ItemStatus) -> ItemRecord {
        let now = chrono::Utc::now();
        ItemRecord {
            id: ItemId(id.to_string()),
            slug: Some(slug.to_string()),
            explicit_slug: false,
            status,
            fields: ItemFields::default(),
            created_by: UserId::parse("publisher-1").expect("valid user"),
            created_at: now,
            updated_at: now,
            requires_review: false,
            review_notes: Vec::new(),
            moderation: None,
        }
    }

    #[test]
    fn published_slugs_are_unique_but_drafts_may_share() {
        let repository = InMemoryItemRepository::default();
        repository
            .insert(record("a", "loft", ItemStatus::Published))
            .expect("first published");
        repository
            .insert(record("b", "loft", ItemStatus::Draft))
            .expect("draft shares slug");

        match repository.insert(record("c", "loft", ItemStatus::Pending)) {
            Err(RepositoryError::SlugTaken(slug)) => assert_eq!(slug, "loft"),
            other => panic!("expected slug conflict, got {other:?}"),
        }
    }

    #[test]
    fn update_requires_existing_record() {
        let repository = InMemoryItemRepository::default();
        match repository.update(record("ghost", "ghost", ItemStatus::Draft)) {
            Err(RepositoryError::NotFound) => {}
            other => panic!("expected not found, got {other:?}"),
        }
    }
}
