//! End-to-end listing scenarios driven through the public service facade: staged uploads
//! becoming stored media, draft screening, review, and moderation.

mod common {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use image::{ImageFormat, Rgb, RgbImage};
    use tempfile::TempDir;

    use listing_hub::workflows::listings::{
        CallerIdentity, FieldValidator, ItemFilter, ItemId, ItemLifecycleService, ItemRecord,
        ItemRepository, LocalMediaStore, MediaIngestor, RepositoryError, RoleAuthorizer,
        UserId,
    };

    #[derive(Default)]
    pub(super) struct VecRepository {
        records: Mutex<Vec<ItemRecord>>,
    }

    impl ItemRepository for VecRepository {
        fn insert(&self, record: ItemRecord) -> Result<ItemRecord, RepositoryError> {
            let mut guard = self.records.lock().expect("repository mutex poisoned");
            if guard.iter().any(|existing| existing.id == record.id) {
                return Err(RepositoryError::Conflict);
            }
            guard.push(record.clone());
            Ok(record)
        }

        fn update(&self, record: ItemRecord) -> Result<ItemRecord, RepositoryError> {
            let mut guard = self.records.lock().expect("repository mutex poisoned");
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

    pub(super) struct Fixture {
        pub(super) service: Arc<ItemLifecycleService<VecRepository, RoleAuthorizer>>,
        pub(super) media: Arc<MediaIngestor>,
        pub(super) dir: TempDir,
    }

    pub(super) fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(LocalMediaStore::new(dir.path().join("media"), "/media"));
        let media = Arc::new(MediaIngestor::new(store, dir.path().join("staging"), 400));
        let service = ItemLifecycleService::new(
            Arc::new(VecRepository::default()),
            Arc::new(RoleAuthorizer),
            media.clone(),
        )
        .with_validator(FieldValidator::new(2026));

        Fixture {
            service: Arc::new(service),
            media,
            dir,
        }
    }

    pub(super) fn publisher() -> CallerIdentity {
        CallerIdentity::publisher(UserId::parse("agent-7").expect("valid user"))
    }

    pub(super) fn moderator() -> CallerIdentity {
        CallerIdentity::moderator(UserId::parse("reviewer-2").expect("valid user"))
    }

    pub(super) fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        RgbImage::from_pixel(width, height, Rgb([20, 120, 200]))
            .write_to(&mut bytes, ImageFormat::Png)
            .expect("png encodes");
        bytes.into_inner()
    }
}

use std::collections::BTreeSet;
use std::fs;

use serde_json::json;

use common::*;
use listing_hub::workflows::listings::{
    ImageRef, ItemField, ItemPayload, ItemServiceError, ItemStatus, ModerationGateway,
};

fn listing_fields() -> ItemPayload {
    ItemPayload::new()
        .with(ItemField::Title, json!("Maple Court Townhouse"))
        .with(ItemField::Price, json!("1,250"))
        .with(ItemField::Location, json!("Riverside"))
        .with(ItemField::Address, json!("4 Maple Court"))
        .with(ItemField::Bedrooms, json!(3))
        .with(ItemField::Bathrooms, json!(2))
        .with(ItemField::SquareFootage, json!(1420))
        .with(ItemField::PropertyType, json!("townhouse"))
        .with(ItemField::YearBuilt, json!(2004))
        .with(ItemField::ParkingAvailable, json!(true))
        .with(ItemField::TransactionType, json!("rent"))
}

#[test]
fn staged_uploads_become_distinct_stored_images_on_publish() {
    let fixture = fixture();
    let staged: Vec<_> = ["Front Porch.PNG", "kitchen.png", "yard.png"]
        .iter()
        .map(|name| fixture.media.stage(name, &png(800, 600)).expect("staged"))
        .collect();
    let images: Vec<_> = staged
        .iter()
        .map(|raw| json!({ "staged": raw.staged_name, "originalName": raw.original_name }))
        .collect();

    let record = fixture
        .service
        .create(
            &moderator(),
            listing_fields().with(ItemField::Images, json!(images)),
            Some(ItemStatus::Published),
        )
        .expect("published");

    let urls: BTreeSet<_> = record
        .fields
        .images
        .iter()
        .map(|image| match image {
            ImageRef::Stored(url) => url.clone(),
            other => panic!("expected stored image, got {other:?}"),
        })
        .collect();
    assert_eq!(urls.len(), 3);
    assert!(urls.iter().all(|url| url.starts_with("/media/") && url.ends_with(".jpg")));
    assert!(urls.iter().any(|url| url.ends_with("-front-porch.jpg")));

    for raw in &staged {
        assert!(!raw.path.exists(), "staged file {} removed", raw.staged_name);
        assert!(!fixture.media.is_staged(&raw.staged_name));
    }
    let stored = fs::read_dir(fixture.dir.path().join("media"))
        .expect("media dir")
        .count();
    assert_eq!(stored, 3);

    let decoded = image::open(
        fixture
            .dir
            .path()
            .join("media")
            .join(urls.iter().next().expect("url").trim_start_matches("/media/")),
    )
    .expect("stored jpeg decodes");
    assert_eq!((decoded.width(), decoded.height()), (400, 300));
}

#[test]
fn drafts_keep_staged_images_until_submission() {
    let fixture = fixture();
    let staged: Vec<_> = (0..3)
        .map(|index| {
            fixture
                .media
                .stage(&format!("room-{index}.png"), &png(120, 90))
                .expect("staged")
        })
        .collect();
    let images: Vec<_> = staged
        .iter()
        .map(|raw| json!({ "staged": raw.staged_name, "originalName": raw.original_name }))
        .collect();

    let draft = fixture
        .service
        .save_as_draft(
            &publisher(),
            listing_fields().with(ItemField::Images, json!(images)),
            None,
        )
        .expect("draft saved");
    assert!(draft.fields.images.iter().all(ImageRef::is_staged));
    assert!(staged.iter().all(|raw| raw.path.exists()));

    let pending = fixture
        .service
        .submit_for_review(&publisher(), &draft.id, false)
        .expect("submitted");
    assert_eq!(pending.status, ItemStatus::Pending);
    assert!(!pending.fields.images.iter().any(ImageRef::is_staged));
    assert!(staged.iter().all(|raw| !raw.path.exists()));
}

#[test]
fn draft_to_approval_walkthrough() {
    let fixture = fixture();
    let gateway = ModerationGateway::new(fixture.service.clone());

    let draft = fixture
        .service
        .save_as_draft(
            &publisher(),
            ItemPayload::new().with(ItemField::Title, json!("Maple Court Townhouse")),
            None,
        )
        .expect("draft saved");
    assert_eq!(draft.status, ItemStatus::Draft);
    assert_eq!(draft.slug.as_deref(), Some("maple-court-townhouse"));

    match fixture.service.save_as_draft(
        &publisher(),
        ItemPayload::new().with(ItemField::Title, json!("Maple Court Townhouse")),
        None,
    ) {
        Err(ItemServiceError::DuplicateDraft { existing, .. }) => assert_eq!(existing, draft.id),
        other => panic!("expected duplicate draft, got {other:?}"),
    }

    match fixture
        .service
        .submit_for_review(&publisher(), &draft.id, false)
    {
        Err(ItemServiceError::ValidationFailed { errors }) => {
            assert!(errors.contains_key(&ItemField::Price));
            assert!(errors.contains_key(&ItemField::Images));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }

    let completed = fixture
        .service
        .update(
            &publisher(),
            &draft.id,
            listing_fields().with(
                ItemField::Images,
                json!(["/media/one.jpg", "/media/two.jpg", "/media/three.webp"]),
            ),
        )
        .expect("draft completed");
    assert_eq!(completed.fields.price, Some(1250.0));

    let pending = fixture
        .service
        .submit_for_review(&publisher(), &draft.id, false)
        .expect("submitted");
    assert_eq!(pending.status, ItemStatus::Pending);

    let approved = gateway.approve(&moderator(), &draft.id).expect("approved");
    assert_eq!(approved.status, ItemStatus::Approved);
    assert_eq!(
        approved.moderation.expect("decision").decided_by,
        moderator().user_id
    );
}
