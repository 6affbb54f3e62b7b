use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::domain::{
    CallerIdentity, ImageRef, ItemField, ItemFields, ItemId, ItemPayload, ItemRecord, ItemStatus,
    ModerationDecision, ModerationNote, UserId,
};
use super::duplicates::{DraftCandidate, DuplicateDraftDetector, DuplicateKey};
use super::media::{IngestionError, MediaIngestor};
use super::repository::{Authorizer, ItemFilter, ItemRepository, RepositoryError};
use super::slug::non_empty_slug;
use super::validation::{parse_text, FieldValidator, ValidationReport};

/// Fields that must pass validation before an item may hold `status`.
pub fn required_fields_for(status: ItemStatus) -> BTreeSet<ItemField> {
    if status.is_draft() {
        return BTreeSet::new();
    }

    BTreeSet::from([
        ItemField::Title,
        ItemField::Price,
        ItemField::Location,
        ItemField::Address,
        ItemField::Bedrooms,
        ItemField::Bathrooms,
        ItemField::SquareFootage,
        ItemField::Images,
        ItemField::PropertyType,
        ItemField::YearBuilt,
        ItemField::ParkingAvailable,
        ItemField::TransactionType,
    ])
}

/// Item lifecycle state machine.
///
/// Every write validates against the requirements of the status the item will hold, screens
/// drafts for same-owner duplicates, and ingests staged images before a record leaves draft.
/// Validation and duplicate screening always run before the repository is touched.
pub struct ItemLifecycleService<R, A> {
    repository: Arc<R>,
    authorizer: Arc<A>,
    validator: FieldValidator,
    detector: DuplicateDraftDetector<R>,
    media: Arc<MediaIngestor>,
}

impl<R, A> ItemLifecycleService<R, A>
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    pub fn new(repository: Arc<R>, authorizer: Arc<A>, media: Arc<MediaIngestor>) -> Self {
        Self {
            detector: DuplicateDraftDetector::new(repository.clone()),
            repository,
            authorizer,
            validator: FieldValidator::default(),
            media,
        }
    }

    pub fn with_validator(mut self, validator: FieldValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn validator(&self) -> &FieldValidator {
        &self.validator
    }

    pub fn media(&self) -> &Arc<MediaIngestor> {
        &self.media
    }

    /// Create an item. Only `draft`, `pending` and `published` are valid initial states, and
    /// `published` skips moderation so it is reserved for moderators.
    pub fn create(
        &self,
        caller: &CallerIdentity,
        payload: ItemPayload,
        status: Option<ItemStatus>,
    ) -> Result<ItemRecord, ItemServiceError> {
        let status = status.unwrap_or(ItemStatus::Draft);
        if !matches!(
            status,
            ItemStatus::Draft | ItemStatus::Pending | ItemStatus::Published
        ) {
            return Err(ItemServiceError::InvalidTransition {
                from: ItemStatus::Draft,
                to: status,
            });
        }
        if status == ItemStatus::Published && !self.authorizer.is_moderator(caller) {
            warn!(caller = %caller.user_id, "direct publish attempted without moderator role");
            return Err(ItemServiceError::Forbidden);
        }

        let prepared = self.prepare(&caller.user_id, &payload, status, None)?;
        let now = Utc::now();
        let record = ItemRecord {
            id: ItemId::generate(),
            slug: prepared.slug,
            explicit_slug: prepared.explicit_slug,
            status,
            fields: prepared.fields,
            created_by: caller.user_id.clone(),
            requires_review: prepared.report.requires_review(),
            review_notes: prepared.report.warnings,
            moderation: None,
            created_at: now,
            updated_at: now,
        };

        let stored = self.repository.insert(record)?;
        info!(
            item_id = %stored.id,
            owner = %stored.created_by,
            status = %stored.status,
            requires_review = stored.requires_review,
            "item created"
        );
        Ok(stored)
    }

    /// Save a draft, either as a new item or by replacing the fields of an existing draft.
    pub fn save_as_draft(
        &self,
        caller: &CallerIdentity,
        payload: ItemPayload,
        existing_id: Option<&ItemId>,
    ) -> Result<ItemRecord, ItemServiceError> {
        let Some(id) = existing_id else {
            return self.create(caller, payload, Some(ItemStatus::Draft));
        };

        let mut record = self.fetch_for_write(caller, id)?;
        if !record.status.is_draft() {
            return Err(ItemServiceError::InvalidTransition {
                from: record.status,
                to: ItemStatus::Draft,
            });
        }

        let prepared = self.prepare(&record.created_by, &payload, ItemStatus::Draft, Some(id))?;
        record.apply(prepared);
        self.persist(record, "draft saved")
    }

    /// Move a draft out of draft after strict validation. Staged images are ingested first.
    ///
    /// `trusted` publishes directly and is reserved for moderators.
    pub fn submit_for_review(
        &self,
        caller: &CallerIdentity,
        id: &ItemId,
        trusted: bool,
    ) -> Result<ItemRecord, ItemServiceError> {
        let target = if trusted {
            if !self.authorizer.is_moderator(caller) {
                return Err(ItemServiceError::Forbidden);
            }
            ItemStatus::Published
        } else {
            ItemStatus::Pending
        };

        let mut record = self.fetch_for_write(caller, id)?;
        if !record.status.is_draft() {
            return Err(ItemServiceError::InvalidTransition {
                from: record.status,
                to: target,
            });
        }

        let draft = record.clone();
        let payload = record.to_payload();
        let prepared = self.prepare(&record.created_by, &payload, target, Some(id))?;
        record.apply(prepared);
        record.status = target;

        let images = record.fields.images.clone();
        self.persist(record, "item submitted").map_err(|error| {
            self.retain_ingested(draft, images);
            error
        })
    }

    /// Merge `patch` into the stored fields. A `null` value clears a field; `status` and other
    /// unknown keys are ignored. Validation follows the item's current status.
    pub fn update(
        &self,
        caller: &CallerIdentity,
        id: &ItemId,
        patch: ItemPayload,
    ) -> Result<ItemRecord, ItemServiceError> {
        let ignored = patch.unknown_keys();
        if !ignored.is_empty() {
            debug!(item_id = %id, ?ignored, "ignoring non-field keys in update");
        }

        let mut record = self.fetch_for_write(caller, id)?;
        let merged = record.to_payload().merged_with(&patch);
        let prepared = self.prepare(&record.created_by, &merged, record.status, Some(id))?;
        record.apply(prepared);
        self.persist(record, "item updated")
    }

    /// Hard delete. Returns the removed record.
    pub fn delete(
        &self,
        caller: &CallerIdentity,
        id: &ItemId,
    ) -> Result<ItemRecord, ItemServiceError> {
        self.fetch_for_write(caller, id)?;
        let removed = self
            .repository
            .delete(id)?
            .ok_or(ItemServiceError::NotFound)?;

        info!(item_id = %removed.id, caller = %caller.user_id, "item deleted");
        Ok(removed)
    }

    pub fn archive(
        &self,
        caller: &CallerIdentity,
        id: &ItemId,
    ) -> Result<ItemRecord, ItemServiceError> {
        let mut record = self.fetch_for_write(caller, id)?;
        match record.status {
            ItemStatus::Archived => Ok(record),
            ItemStatus::Draft => Err(ItemServiceError::InvalidTransition {
                from: ItemStatus::Draft,
                to: ItemStatus::Archived,
            }),
            _ => {
                record.status = ItemStatus::Archived;
                record.updated_at = Utc::now();
                self.persist(record, "item archived")
            }
        }
    }

    pub fn get(&self, id: &ItemId) -> Result<ItemRecord, ItemServiceError> {
        self.repository
            .fetch(id)?
            .ok_or(ItemServiceError::NotFound)
    }

    pub fn list(&self, filter: &ItemFilter) -> Result<Vec<ItemRecord>, ItemServiceError> {
        Ok(self.repository.list(filter)?)
    }

    pub fn list_owned_in_status(
        &self,
        owner: &UserId,
        status: ItemStatus,
    ) -> Result<Vec<ItemRecord>, ItemServiceError> {
        self.list(&ItemFilter {
            status: Some(status),
            tag: None,
            owner: Some(owner.clone()),
        })
    }

    pub fn has_duplicate_draft(
        &self,
        owner: &UserId,
        candidate: &DraftCandidate,
        exclude: Option<&ItemId>,
    ) -> Result<bool, ItemServiceError> {
        Ok(self
            .detector
            .has_duplicate_draft(owner, candidate, exclude)?)
    }

    /// Moderation transition. Re-applying the current decision is a no-op.
    pub(crate) fn apply_moderation(
        &self,
        caller: &CallerIdentity,
        id: &ItemId,
        decision: ModerationDecision,
        reason: Option<String>,
    ) -> Result<ItemRecord, ItemServiceError> {
        if !self.authorizer.is_moderator(caller) {
            warn!(
                caller = %caller.user_id,
                item_id = %id,
                "moderation attempted without moderator role"
            );
            return Err(ItemServiceError::Forbidden);
        }

        let mut record = self.get(id)?;
        let target = decision.target_status();
        if record.status == target {
            debug!(item_id = %id, status = %target, "moderation decision already applied");
            return Ok(record);
        }
        if matches!(record.status, ItemStatus::Draft | ItemStatus::Archived) {
            return Err(ItemServiceError::InvalidTransition {
                from: record.status,
                to: target,
            });
        }

        let now = Utc::now();
        record.status = target;
        record.moderation = Some(ModerationNote {
            decision,
            decided_by: caller.user_id.clone(),
            reason: reason
                .map(|reason| reason.trim().to_string())
                .filter(|reason| !reason.is_empty()),
            decided_at: now,
        });
        record.updated_at = now;
        self.persist(record, "moderation decision recorded")
    }

    fn fetch_for_write(
        &self,
        caller: &CallerIdentity,
        id: &ItemId,
    ) -> Result<ItemRecord, ItemServiceError> {
        let record = self.get(id)?;
        if self.authorizer.classify(caller, &record).can_mutate() {
            Ok(record)
        } else {
            warn!(caller = %caller.user_id, item_id = %id, "write rejected for non-owner");
            Err(ItemServiceError::Forbidden)
        }
    }

    /// Point a draft whose submission failed after ingestion at the stored artifacts, since
    /// its staged uploads are gone.
    fn retain_ingested(&self, mut draft: ItemRecord, images: Vec<ImageRef>) {
        if draft.fields.images == images {
            return;
        }
        draft.fields.images = images;
        draft.updated_at = Utc::now();
        let item_id = draft.id.clone();
        match self.repository.update(draft) {
            Ok(_) => info!(item_id = %item_id, "draft kept ingested images after failed submit"),
            Err(error) => warn!(
                item_id = %item_id,
                error = %error,
                "ingested images could not be recorded on draft"
            ),
        }
    }

    fn persist(
        &self,
        record: ItemRecord,
        event: &'static str,
    ) -> Result<ItemRecord, ItemServiceError> {
        let stored = self.repository.update(record)?;
        info!(
            item_id = %stored.id,
            status = %stored.status,
            requires_review = stored.requires_review,
            "{event}"
        );
        Ok(stored)
    }

    /// Validate `payload` for `status`, screen drafts, and settle image references.
    fn prepare(
        &self,
        owner: &UserId,
        payload: &ItemPayload,
        status: ItemStatus,
        existing: Option<&ItemId>,
    ) -> Result<PreparedItem, ItemServiceError> {
        let report = self.validator.review(payload, status);
        if !report.is_valid() {
            return Err(ItemServiceError::ValidationFailed {
                errors: report.errors,
            });
        }

        let mut fields = ItemFields::from_payload(payload).map_err(|message| {
            ItemServiceError::ValidationFailed {
                errors: BTreeMap::from([(ItemField::Images, message)]),
            }
        })?;
        self.ensure_staged_present(&fields.images)?;

        let explicit = non_empty_slug(parse_text(payload.value(ItemField::Slug)).as_deref());
        let explicit_slug = explicit.is_some();
        let slug = explicit.or_else(|| non_empty_slug(fields.title.as_deref()));

        if status.is_draft() {
            if slug.is_none() {
                return Err(ItemServiceError::ValidationFailed {
                    errors: BTreeMap::from([(
                        ItemField::Title,
                        "A draft needs a title or slug".to_string(),
                    )]),
                });
            }

            let candidate = DraftCandidate::from_payload(payload);
            if let Some(found) = self
                .detector
                .find_duplicate_draft(owner, &candidate, existing)?
            {
                info!(
                    owner = %owner,
                    existing = %found.item_id,
                    key = found.key.label(),
                    "duplicate draft rejected"
                );
                return Err(ItemServiceError::DuplicateDraft {
                    existing: found.item_id,
                    key: found.key,
                });
            }
        } else {
            if let Some(slug) = slug.as_deref() {
                self.ensure_slug_free(slug, existing)?;
            }
            fields.images = self.ingest_staged(&fields.images)?;
        }

        Ok(PreparedItem {
            fields,
            slug,
            explicit_slug,
            report,
        })
    }

    /// Listed slugs are unique. Checked before ingestion consumes any staged upload; the
    /// repository still rejects a slug claimed in between.
    fn ensure_slug_free(
        &self,
        slug: &str,
        existing: Option<&ItemId>,
    ) -> Result<(), ItemServiceError> {
        let taken = self
            .repository
            .list(&ItemFilter::default())?
            .iter()
            .any(|record| {
                !record.status.is_draft()
                    && Some(&record.id) != existing
                    && record.slug.as_deref() == Some(slug)
            });
        if taken {
            return Err(ItemServiceError::PersistenceFailed(
                RepositoryError::SlugTaken(slug.to_string()),
            ));
        }
        Ok(())
    }

    fn ensure_staged_present(&self, images: &[ImageRef]) -> Result<(), ItemServiceError> {
        for image in images {
            if let ImageRef::Staged { staged, .. } = image {
                if !self.media.is_staged(staged) {
                    return Err(ItemServiceError::ValidationFailed {
                        errors: BTreeMap::from([(
                            ItemField::Images,
                            format!("Staged upload '{staged}' was not found"),
                        )]),
                    });
                }
            }
        }
        Ok(())
    }

    fn ingest_staged(&self, images: &[ImageRef]) -> Result<Vec<ImageRef>, ItemServiceError> {
        images
            .iter()
            .map(|image| match image {
                ImageRef::Stored(reference) => Ok(ImageRef::Stored(reference.clone())),
                ImageRef::Staged {
                    staged,
                    original_name,
                } => {
                    let raw = self.media.staged(staged, original_name)?;
                    let stored = self.media.ingest(&raw)?;
                    Ok(ImageRef::Stored(stored.url))
                }
            })
            .collect()
    }
}

struct PreparedItem {
    fields: ItemFields,
    slug: Option<String>,
    explicit_slug: bool,
    report: ValidationReport,
}

impl ItemRecord {
    fn apply(&mut self, prepared: PreparedItem) {
        self.fields = prepared.fields;
        self.slug = prepared.slug;
        self.explicit_slug = prepared.explicit_slug;
        self.requires_review = prepared.report.requires_review();
        self.review_notes = prepared.report.warnings;
        self.updated_at = Utc::now();
    }
}

/// Error raised by the lifecycle and moderation operations.
#[derive(Debug, thiserror::Error)]
pub enum ItemServiceError {
    #[error("validation failed for {} field(s)", .errors.len())]
    ValidationFailed { errors: BTreeMap<ItemField, String> },
    #[error("a draft with the same {} already exists", .key.label())]
    DuplicateDraft { existing: ItemId, key: DuplicateKey },
    #[error("item not found")]
    NotFound,
    #[error("caller identity is missing")]
    Unauthorized,
    #[error("caller may not modify this item")]
    Forbidden,
    #[error("cannot move item from {from} to {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },
    #[error("image ingestion failed: {0}")]
    IngestionFailed(#[from] IngestionError),
    #[error("persistence failed: {0}")]
    PersistenceFailed(#[source] RepositoryError),
}

impl ItemServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ItemServiceError::PersistenceFailed(RepositoryError::SlugTaken(_)) => "slug_taken",
            ItemServiceError::ValidationFailed { .. } => "validation_failed",
            ItemServiceError::DuplicateDraft { .. } => "duplicate_draft",
            ItemServiceError::NotFound => "not_found",
            ItemServiceError::Unauthorized => "unauthorized",
            ItemServiceError::Forbidden => "forbidden",
            ItemServiceError::InvalidTransition { .. } => "invalid_transition",
            ItemServiceError::IngestionFailed(_) => "ingestion_failed",
            ItemServiceError::PersistenceFailed(_) => "persistence_failed",
        }
    }
}

impl From<RepositoryError> for ItemServiceError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound => ItemServiceError::NotFound,
            other => ItemServiceError::PersistenceFailed(other),
        }
    }
}
