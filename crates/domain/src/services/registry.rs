//! In-memory widget registry.
//!
//! Definitions are stored behind `Arc` so lookups hand out cheap shared
//! handles. Readers take a shared lock; a registration takes the write lock
//! for the whole validate-then-insert step, which keeps it all-or-nothing.

use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::models::WidgetDefinition;

/// Registered definitions plus their registration order.
#[derive(Debug, Default)]
pub struct RegistryState {
    widgets: HashMap<String, Arc<WidgetDefinition>>,
    /// Ids in first-registration order. Overwrites keep their slot.
    order: Vec<String>,
    sequences: HashMap<String, usize>,
}

impl RegistryState {
    pub fn get(&self, widget_id: &str) -> Option<&Arc<WidgetDefinition>> {
        self.widgets.get(widget_id)
    }

    pub fn contains(&self, widget_id: &str) -> bool {
        self.widgets.contains_key(widget_id)
    }

    /// Registration index of a widget, used to break load-order ties.
    pub fn sequence(&self, widget_id: &str) -> Option<usize> {
        self.sequences.get(widget_id).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<WidgetDefinition>> {
        self.order.iter().filter_map(|id| self.widgets.get(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|id| id.as_str())
    }

    /// Inserts or replaces; returns true when an existing definition was replaced.
    fn insert(&mut self, definition: WidgetDefinition) -> bool {
        let id = definition.id.clone();
        let replaced = self
            .widgets
            .insert(id.clone(), Arc::new(definition))
            .is_some();
        if !replaced {
            self.sequences.insert(id.clone(), self.order.len());
            self.order.push(id);
        }
        replaced
    }
}

#[derive(Debug, Default)]
pub struct WidgetRegistry {
    state: RwLock<RegistryState>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent read of the whole registry for multi-step queries.
    pub fn snapshot(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read()
    }

    /// Registers a definition without further checks (last write wins).
    pub fn register(&self, definition: WidgetDefinition) -> bool {
        let mut state = self.state.write();
        Self::store(&mut state, definition)
    }

    /// Runs `check` against the current state and registers only if it passes.
    pub fn register_with<E, F>(&self, definition: WidgetDefinition, check: F) -> Result<bool, E>
    where
        F: FnOnce(&RegistryState, &WidgetDefinition) -> Result<(), E>,
    {
        let mut state = self.state.write();
        check(&state, &definition)?;
        Ok(Self::store(&mut state, definition))
    }

    fn store(state: &mut RegistryState, definition: WidgetDefinition) -> bool {
        let id = definition.id.clone();
        let version = definition.version.clone();
        let replaced = state.insert(definition);
        if replaced {
            tracing::warn!(widget_id = %id, version = %version, "Widget definition overwritten");
        } else {
            tracing::info!(widget_id = %id, version = %version, "Widget registered");
        }
        replaced
    }

    pub fn get(&self, widget_id: &str) -> Option<Arc<WidgetDefinition>> {
        self.state.read().get(widget_id).cloned()
    }

    pub fn contains(&self, widget_id: &str) -> bool {
        self.state.read().contains(widget_id)
    }

    /// All definitions in registration order, optionally filtered by category.
    pub fn all(&self, category: Option<&str>) -> Vec<Arc<WidgetDefinition>> {
        self.state
            .read()
            .iter()
            .filter(|w| category.map_or(true, |c| w.category == c))
            .cloned()
            .collect()
    }

    pub fn categories(&self) -> BTreeSet<String> {
        self.state.read().iter().map(|w| w.category.clone()).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.state.read().ids().map(str::to_string).collect()
    }

    pub fn sequence(&self, widget_id: &str) -> Option<usize> {
        self.state.read().sequence(widget_id)
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }
}
