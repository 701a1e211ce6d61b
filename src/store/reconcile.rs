use crate::models::{KnowledgeItem, Workspace, WorkspaceMember};

pub trait Identified {
    fn id(&self) -> &str;
}

impl Identified for Workspace {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for WorkspaceMember {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for KnowledgeItem {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Inserts at the front, dropping any older entry with the same id.
pub fn prepend<T: Identified>(items: &mut Vec<T>, item: T) {
    items.retain(|existing| existing.id() != item.id());
    items.insert(0, item);
}

/// Appends at the back, replacing in place when the id is already present.
pub fn append<T: Identified>(items: &mut Vec<T>, item: T) {
    if let Some(existing) = items.iter_mut().find(|existing| existing.id() == item.id()) {
        *existing = item;
    } else {
        items.push(item);
    }
}

/// Returns false when no entry matched.
pub fn replace_by_id<T: Identified>(items: &mut [T], item: T) -> bool {
    match items.iter_mut().find(|existing| existing.id() == item.id()) {
        Some(existing) => {
            *existing = item;
            true
        }
        None => false,
    }
}

pub fn remove_by_id<T: Identified>(items: &mut Vec<T>, id: &str) -> bool {
    let before = items.len();
    items.retain(|existing| existing.id() != id);
    items.len() != before
}

/// Prepends and truncates to `cap` entries, newest first.
pub fn push_bounded<T: Identified>(items: &mut Vec<T>, item: T, cap: usize) {
    prepend(items, item);
    items.truncate(cap);
}

/// Re-points a selection at the matching element of a fresh collection, or
/// clears it when that element is gone.
pub fn reconcile_selection<T: Identified + Clone>(selection: Option<&T>, items: &[T]) -> Option<T> {
    let selected = selection?;
    items
        .iter()
        .find(|candidate| candidate.id() == selected.id())
        .cloned()
}
