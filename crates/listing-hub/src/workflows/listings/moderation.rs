use std::sync::Arc;

use super::domain::{CallerIdentity, ItemId, ItemRecord, ModerationDecision};
use super::lifecycle::{ItemLifecycleService, ItemServiceError};
use super::repository::{Authorizer, ItemRepository};

/// Moderator-only approve/reject transitions.
///
/// Both decisions are idempotent and take no lock: when two moderators decide concurrently the
/// last write wins.
pub struct ModerationGateway<R, A> {
    lifecycle: Arc<ItemLifecycleService<R, A>>,
}

impl<R, A> ModerationGateway<R, A>
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    pub fn new(lifecycle: Arc<ItemLifecycleService<R, A>>) -> Self {
        Self { lifecycle }
    }

    pub fn approve(
        &self,
        caller: &CallerIdentity,
        id: &ItemId,
    ) -> Result<ItemRecord, ItemServiceError> {
        self.lifecycle
            .apply_moderation(caller, id, ModerationDecision::Approved, None)
    }

    pub fn reject(
        &self,
        caller: &CallerIdentity,
        id: &ItemId,
        reason: Option<String>,
    ) -> Result<ItemRecord, ItemServiceError> {
        self.lifecycle
            .apply_moderation(caller, id, ModerationDecision::Rejected, reason)
    }
}
