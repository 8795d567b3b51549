use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::address::{normalize_with, CanonicalAddress};
use crate::country::CountryRegistry;
use crate::equality::equals;
use crate::errors::{AppError, AppResult};
use crate::history::{Side, Snapshot, UndoStack, DEFAULT_UNDO_CAPACITY};
use crate::save::{SaveGuard, SaveOutcome, SavePayload, Saver};
use crate::suggestion::Suggestion;

/// Editing state for one order: pending corrections with undo history and
/// the last saved baseline.
pub struct EditSession {
    order_id: Option<String>,
    history: UndoStack<Snapshot>,
    saved: Snapshot,
    guard: SaveGuard,
    registry: CountryRegistry,
    last_saved_at: Option<DateTime<Utc>>,
}

impl EditSession {
    pub fn new(saver: Arc<dyn Saver>, undo_capacity: usize) -> Self {
        Self {
            order_id: None,
            history: UndoStack::new(Snapshot::default(), undo_capacity),
            saved: Snapshot::default(),
            guard: SaveGuard::new(saver),
            registry: CountryRegistry::default(),
            last_saved_at: None,
        }
    }

    /// Country rules used when applying accepted suggestions.
    pub fn with_registry(mut self, registry: CountryRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_default_capacity(saver: Arc<dyn Saver>) -> Self {
        Self::new(saver, DEFAULT_UNDO_CAPACITY)
    }

    /// Starts editing `order_id` from `snapshot`, dropping prior history.
    pub fn load(&mut self, order_id: impl Into<String>, snapshot: Snapshot) {
        let order_id = order_id.into();
        debug!(order_id = %order_id, "edit session loaded");
        self.history.init(snapshot.clone());
        self.saved = snapshot;
        self.order_id = Some(order_id);
        self.last_saved_at = None;
    }

    /// Applies a suggestion's components to `side`.
    pub fn accept(&mut self, side: Side, suggestion: &Suggestion) -> &Snapshot {
        let address = normalize_with(&suggestion.to_fragment(), &self.registry);
        self.edit(side, address)
    }

    pub fn edit(&mut self, side: Side, address: CanonicalAddress) -> &Snapshot {
        let next = self.history.current().with_side(side, address);
        self.history.push(next);
        self.history.current()
    }

    pub fn undo(&mut self) -> &Snapshot {
        self.history.undo()
    }

    pub fn redo(&mut self) -> &Snapshot {
        self.history.redo()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Current edited values, for autosave.
    pub fn snapshot(&self) -> Snapshot {
        self.history.current().clone()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.changed_side().is_some()
    }

    /// Saves the current values against the last saved baseline. A save of
    /// unchanged or already-saved values is skipped.
    pub async fn save(&mut self, resolution: &str) -> AppResult<SaveOutcome> {
        let order_id = self
            .order_id
            .clone()
            .ok_or_else(|| AppError::Config("no order loaded into the edit session".into()))?;
        let payload = SavePayload {
            order_id,
            side: self.changed_side().unwrap_or(Side::Both),
            resolution: resolution.to_string(),
            before: self.saved.clone(),
            after: self.snapshot(),
        };

        let outcome = self.guard.save_if_changed(&payload).await?;
        if let SaveOutcome::Saved(_) = &outcome {
            self.saved = payload.after;
            self.last_saved_at = Some(Utc::now());
        }
        Ok(outcome)
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    fn changed_side(&self) -> Option<Side> {
        let current = self.history.current();
        let pickup = !equals(&self.saved.pickup, &current.pickup);
        let delivery = !equals(&self.saved.delivery, &current.delivery);
        match (pickup, delivery) {
            (true, true) => Some(Side::Both),
            (true, false) => Some(Side::Pickup),
            (false, true) => Some(Side::Delivery),
            (false, false) => None,
        }
    }
}
