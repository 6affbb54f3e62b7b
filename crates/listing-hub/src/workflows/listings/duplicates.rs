use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::domain::{ItemField, ItemId, ItemPayload, ItemRecord, UserId};
use super::repository::{ItemFilter, ItemRepository, RepositoryError};
use super::slug::non_empty_slug;
use super::validation::parse_text;

/// Identifying keys of a draft being saved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DraftCandidate {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub address: Option<String>,
}

impl DraftCandidate {
    /// Extract the identifying keys from a raw payload. Only an explicit slug is carried;
    /// titles are compared verbatim instead.
    pub fn from_payload(payload: &ItemPayload) -> Self {
        Self {
            title: parse_text(payload.value(ItemField::Title)),
            slug: parse_text(payload.value(ItemField::Slug)),
            address: parse_text(payload.value(ItemField::Address)),
        }
    }

    fn title_key(&self) -> Option<&str> {
        trimmed(self.title.as_deref())
    }

    fn slug_key(&self) -> Option<String> {
        non_empty_slug(self.slug.as_deref())
    }

    fn address_key(&self) -> Option<&str> {
        trimmed(self.address.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.title_key().is_none() && self.slug_key().is_none() && self.address_key().is_none()
    }
}

/// Which identifying key collided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateKey {
    Title,
    Slug,
    Address,
}

impl DuplicateKey {
    pub const fn label(self) -> &'static str {
        match self {
            DuplicateKey::Title => "title",
            DuplicateKey::Slug => "slug",
            DuplicateKey::Address => "address",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateMatch {
    pub item_id: ItemId,
    pub key: DuplicateKey,
}

/// Screens a draft against the other drafts of the same owner.
///
/// A collision is an exact trimmed title match, an equal normalized slug, or an exact trimmed
/// address match. Empty keys never collide. The check and the subsequent write are not atomic.
pub struct DuplicateDraftDetector<R> {
    repository: Arc<R>,
}

impl<R> DuplicateDraftDetector<R>
where
    R: ItemRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn has_duplicate_draft(
        &self,
        owner: &UserId,
        candidate: &DraftCandidate,
        exclude: Option<&ItemId>,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .find_duplicate_draft(owner, candidate, exclude)?
            .is_some())
    }

    pub fn find_duplicate_draft(
        &self,
        owner: &UserId,
        candidate: &DraftCandidate,
        exclude: Option<&ItemId>,
    ) -> Result<Option<DuplicateMatch>, RepositoryError> {
        if candidate.is_empty() {
            return Ok(None);
        }

        let drafts = self.repository.list(&ItemFilter::drafts_of(owner))?;
        Ok(drafts
            .iter()
            .filter(|draft| exclude != Some(&draft.id))
            .find_map(|draft| {
                collision(candidate, draft).map(|key| DuplicateMatch {
                    item_id: draft.id.clone(),
                    key,
                })
            }))
    }
}

fn collision(candidate: &DraftCandidate, draft: &ItemRecord) -> Option<DuplicateKey> {
    if let Some(title) = candidate.title_key() {
        if trimmed(draft.fields.title.as_deref()) == Some(title) {
            return Some(DuplicateKey::Title);
        }
    }

    if let Some(slug) = candidate.slug_key() {
        if non_empty_slug(draft.slug.as_deref()).as_deref() == Some(slug.as_str()) {
            return Some(DuplicateKey::Slug);
        }
    }

    if let Some(address) = candidate.address_key() {
        if trimmed(draft.fields.address.as_deref()) == Some(address) {
            return Some(DuplicateKey::Address);
        }
    }

    None
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
