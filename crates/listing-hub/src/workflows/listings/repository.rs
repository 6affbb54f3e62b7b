use serde::Deserialize;

use super::domain::{
    CallerIdentity, CallerRole, ItemId, ItemRecord, ItemStatus, PromotionTag, UserId,
};

/// Equality filters supported by [`ItemRepository::list`]. Unset members match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    pub tag: Option<PromotionTag>,
    pub owner: Option<UserId>,
}

impl ItemFilter {
    pub fn drafts_of(owner: &UserId) -> Self {
        Self {
            status: Some(ItemStatus::Draft),
            tag: None,
            owner: Some(owner.clone()),
        }
    }

    pub fn matches(&self, record: &ItemRecord) -> bool {
        self.status.map_or(true, |status| record.status == status)
            && self.tag.map_or(true, |tag| record.fields.tag == Some(tag))
            && self
                .owner
                .as_ref()
                .map_or(true, |owner| &record.created_by == owner)
    }
}

/// Storage abstraction so the lifecycle can be exercised in isolation.
///
/// Implementations must reject a non-draft record whose slug is already held by another
/// non-draft record with [`RepositoryError::SlugTaken`]. Writes are last-writer-wins; there is
/// no version check.
pub trait ItemRepository: Send + Sync {
    fn insert(&self, record: ItemRecord) -> Result<ItemRecord, RepositoryError>;
    fn update(&self, record: ItemRecord) -> Result<ItemRecord, RepositoryError>;
    fn fetch(&self, id: &ItemId) -> Result<Option<ItemRecord>, RepositoryError>;
    fn delete(&self, id: &ItemId) -> Result<Option<ItemRecord>, RepositoryError>;
    fn list(&self, filter: &ItemFilter) -> Result<Vec<ItemRecord>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("slug '{0}' is already used by a listed item")]
    SlugTaken(String),
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// How a caller relates to a particular item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Owner,
    Publisher,
    Moderator,
}

impl Access {
    pub fn can_mutate(self) -> bool {
        matches!(self, Access::Owner | Access::Moderator)
    }
}

/// Authorization hook classifying a caller relative to an item.
pub trait Authorizer: Send + Sync {
    fn classify(&self, caller: &CallerIdentity, item: &ItemRecord) -> Access;

    fn is_moderator(&self, caller: &CallerIdentity) -> bool;
}

/// Default authorizer that trusts the role attached by the authenticator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAuthorizer;

impl Authorizer for RoleAuthorizer {
    fn classify(&self, caller: &CallerIdentity, item: &ItemRecord) -> Access {
        if caller.role == CallerRole::Moderator {
            Access::Moderator
        } else if item.is_owned_by(&caller.user_id) {
            Access::Owner
        } else {
            Access::Publisher
        }
    }

    fn is_moderator(&self, caller: &CallerIdentity) -> bool {
        caller.role == CallerRole::Moderator
    }
}
