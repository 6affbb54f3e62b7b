//! Listing lifecycle: field validation, duplicate-draft screening, media ingestion, and
//! moderation for property catalog items.
//!
//! Publishers author drafts under relaxed field requirements, submit them for review under
//! strict requirements, and moderators approve or reject the result. Storage, media, and
//! authorization are reached through the traits in [`repository`] and [`media`] so the
//! lifecycle can be exercised against in-memory doubles.

pub mod domain;
pub mod duplicates;
pub mod lifecycle;
pub mod media;
pub mod moderation;
pub mod repository;
pub mod router;
pub mod seed;
pub mod slug;
pub mod validation;

#[cfg(test)]
mod tests;

pub use domain::{
    CallerIdentity, CallerRole, FieldWarning, ImageRef, ItemField, ItemFields, ItemId,
    ItemPayload, ItemRecord, ItemStatus, ModerationDecision, ModerationNote, PromotionTag,
    TransactionType, UserId, UserIdError,
};
pub use duplicates::{DraftCandidate, DuplicateDraftDetector, DuplicateKey, DuplicateMatch};
pub use lifecycle::{required_fields_for, ItemLifecycleService, ItemServiceError};
pub use media::{
    IngestionError, LocalMediaStore, MediaIngestor, MediaStore, MediaStoreError, RawUpload,
    StoredReference,
};
pub use moderation::ModerationGateway;
pub use repository::{
    Access, Authorizer, ItemFilter, ItemRepository, RepositoryError, RoleAuthorizer,
};
pub use router::{item_router, ItemApiState};
pub use seed::{SeedImportError, SeedImporter, SeedSummary};
pub use slug::normalize_slug;
pub use validation::{FieldCheck, FieldValidator, ValidationReport};
