use std::io::Cursor;
use std::sync::{Arc, Barrier, Mutex};

use axum::response::Response;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::workflows::listings::domain::{
    CallerIdentity, ItemField, ItemId, ItemPayload, ItemRecord, UserId,
};
use crate::workflows::listings::media::{LocalMediaStore, MediaIngestor};
use crate::workflows::listings::repository::{
    ItemFilter, ItemRepository, RepositoryError, RoleAuthorizer,
};
use crate::workflows::listings::validation::FieldValidator;
use crate::workflows::listings::{item_router, ItemApiState, ItemLifecycleService};

pub(super) const REFERENCE_YEAR: i32 = 2026;

pub(super) type Service<R = MemoryRepository> = ItemLifecycleService<R, RoleAuthorizer>;

pub(super) fn user(raw: &str) -> UserId {
    UserId::parse(raw).expect("valid user id")
}

pub(super) fn publisher() -> CallerIdentity {
    CallerIdentity::publisher(user("publisher-1"))
}

pub(super) fn other_publisher() -> CallerIdentity {
    CallerIdentity::publisher(user("publisher-2"))
}

pub(super) fn moderator() -> CallerIdentity {
    CallerIdentity::moderator(user("moderator-1"))
}

pub(super) fn payload(value: Value) -> ItemPayload {
    serde_json::from_value(value).expect("payload object")
}

/// Payload satisfying every field required outside of draft.
pub(super) fn complete_payload() -> ItemPayload {
    payload(json!({
        "title": "Harbor View Loft",
        "price": 450000,
        "location": "Old Town",
        "address": "12 Quay Street",
        "bedrooms": 2,
        "bathrooms": 1,
        "squareFootage": 980,
        "images": ["/media/a.jpg", "/media/b.jpg", "/media/c.jpg"],
        "propertyType": "apartment",
        "yearBuilt": 1998,
        "parkingAvailable": "yes",
        "transactionType": "sale",
        "description": "Bright loft above the harbor"
    }))
}

pub(super) fn without(mut payload: ItemPayload, fields: &[ItemField]) -> ItemPayload {
    for field in fields {
        payload.0.remove(field.key());
    }
    payload
}

pub(super) struct Harness<R = MemoryRepository> {
    pub(super) service: Arc<Service<R>>,
    pub(super) repository: Arc<R>,
    pub(super) media: Arc<MediaIngestor>,
    pub(super) _dir: TempDir,
}

pub(super) fn harness() -> Harness {
    harness_with(MemoryRepository::default())
}

pub(super) fn harness_with<R>(repository: R) -> Harness<R>
where
    R: ItemRepository + 'static,
{
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LocalMediaStore::new(dir.path().join("media"), "/media");
    let media = Arc::new(MediaIngestor::new(
        Arc::new(store),
        dir.path().join("staging"),
        320,
    ));
    let repository = Arc::new(repository);
    let service = ItemLifecycleService::new(
        repository.clone(),
        Arc::new(RoleAuthorizer),
        media.clone(),
    )
    .with_validator(FieldValidator::new(REFERENCE_YEAR));

    Harness {
        service: Arc::new(service),
        repository,
        media,
        _dir: dir,
    }
}

pub(super) fn router_for<R>(harness: &Harness<R>) -> axum::Router
where
    R: ItemRepository + 'static,
{
    item_router(ItemApiState::new(harness.service.clone()))
}

pub(super) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([180, 40, 40]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// In-memory repository enforcing slug uniqueness among non-draft records.
#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    pub(super) records: Arc<Mutex<Vec<ItemRecord>>>,
}

impl MemoryRepository {
    pub(super) fn len(&self) -> usize {
        self.records.lock().expect("repository mutex poisoned").len()
    }
}

fn slug_taken(records: &[ItemRecord], candidate: &ItemRecord) -> bool {
    if candidate.status.is_draft() {
        return false;
    }
    let Some(slug) = candidate.slug.as_deref() else {
        return false;
    };
    records.iter().any(|record| {
        record.id != candidate.id
            && !record.status.is_draft()
            && record.slug.as_deref() == Some(slug)
    })
}

impl ItemRepository for MemoryRepository {
    fn insert(&self, record: ItemRecord) -> Result<ItemRecord, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.iter().any(|existing| existing.id == record.id) {
            return Err(RepositoryError::Conflict);
        }
        if slug_taken(&guard, &record) {
            return Err(RepositoryError::SlugTaken(record.slug.clone().unwrap_or_default()));
        }
        guard.push(record.clone());
        Ok(record)
    }

    fn update(&self, record: ItemRecord) -> Result<ItemRecord, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if slug_taken(&guard, &record) {
            return Err(RepositoryError::SlugTaken(record.slug.clone().unwrap_or_default()));
        }
        let slot = guard
            .iter_mut()
            .find(|existing| existing.id == record.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = record.clone();
        Ok(record)
    }

    fn fetch(&self, id: &ItemId) -> Result<Option<ItemRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.iter().find(|record| &record.id == id).cloned())
    }

    fn delete(&self, id: &ItemId) -> Result<Option<ItemRecord>, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        let position = guard.iter().position(|record| &record.id == id);
        Ok(position.map(|index| guard.remove(index)))
    }

    fn list(&self, filter: &ItemFilter) -> Result<Vec<ItemRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }
}

pub(super) struct UnavailableRepository;

impl ItemRepository for UnavailableRepository {
    fn insert(&self, _record: ItemRecord) -> Result<ItemRecord, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update(&self, _record: ItemRecord) -> Result<ItemRecord, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &ItemId) -> Result<Option<ItemRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn delete(&self, _id: &ItemId) -> Result<Option<ItemRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list(&self, _filter: &ItemFilter) -> Result<Vec<ItemRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

/// Holds every `list` call at a barrier so concurrent writers all pass duplicate screening
/// before any of them inserts.
pub(super) struct BarrierRepository {
    pub(super) inner: MemoryRepository,
    barrier: Barrier,
}

impl BarrierRepository {
    pub(super) fn new(parties: usize) -> Self {
        Self {
            inner: MemoryRepository::default(),
            barrier: Barrier::new(parties),
        }
    }
}

impl ItemRepository for BarrierRepository {
    fn insert(&self, record: ItemRecord) -> Result<ItemRecord, RepositoryError> {
        self.inner.insert(record)
    }

    fn update(&self, record: ItemRecord) -> Result<ItemRecord, RepositoryError> {
        self.inner.update(record)
    }

    fn fetch(&self, id: &ItemId) -> Result<Option<ItemRecord>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn delete(&self, id: &ItemId) -> Result<Option<ItemRecord>, RepositoryError> {
        self.inner.delete(id)
    }

    fn list(&self, filter: &ItemFilter) -> Result<Vec<ItemRecord>, RepositoryError> {
        let listed = self.inner.list(filter);
        self.barrier.wait();
        listed
    }
}
