use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::ModerationUpdate;

/// Optimistic placeholder shown while a submission awaits its verdict.
/// Never persisted server-side.
#[derive(Clone, Debug)]
pub struct PendingPlaceholder {
    pub submission_id: Uuid,
    pub original_content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub enum FeedEntry {
    Pending(PendingPlaceholder),
    Decided(ModerationUpdate),
}

impl FeedEntry {
    pub fn submission_id(&self) -> Uuid {
        match self {
            FeedEntry::Pending(placeholder) => placeholder.submission_id,
            FeedEntry::Decided(update) => update.submission_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, FeedEntry::Pending(_))
    }
}

/// Observer-side feed, newest entries first.
///
/// Reconciliation is idempotent on the submission id, which is what lets the
/// pipeline get away with duplicate fan-out broadcasts: applying the same
/// verdict twice changes nothing.
pub struct ModerationFeed {
    entries: Vec<FeedEntry>,
    pending_lifetime: Duration,
}

impl ModerationFeed {
    pub fn new(pending_lifetime: Duration) -> Self {
        Self {
            entries: Vec::new(),
            pending_lifetime,
        }
    }

    /// Record an accepted submission optimistically, ahead of its verdict.
    pub fn submitted(&mut self, submission_id: Uuid, content: impl Into<String>) {
        self.entries.insert(
            0,
            FeedEntry::Pending(PendingPlaceholder {
                submission_id,
                original_content: content.into(),
                created_at: Utc::now(),
            }),
        );
    }

    /// Reconcile an incoming verdict event.
    ///
    /// A matching entry is replaced in place, keeping its feed position; an
    /// unknown submission id is prepended as a new entry (verdicts from
    /// other sessions).
    pub fn apply(&mut self, update: ModerationUpdate) {
        match self
            .entries
            .iter()
            .position(|entry| entry.submission_id() == update.submission_id)
        {
            Some(index) => self.entries[index] = FeedEntry::Decided(update),
            None => self.entries.insert(0, FeedEntry::Decided(update)),
        }
    }

    /// Drop pending placeholders that outlived their display lifetime.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        let lifetime = self.pending_lifetime;
        self.entries.retain(|entry| match entry {
            FeedEntry::Pending(placeholder) => {
                now.signed_duration_since(placeholder.created_at) <= lifetime
            }
            FeedEntry::Decided(_) => true,
        });
    }

    pub fn entries(&self) -> &[FeedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
