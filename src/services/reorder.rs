//! Ordered sibling lists (chapters in a book, sub-chapters in a chapter)
//! with optimistic reordering.
//!
//! A reorder cancels any refetch of the list, snapshots the cached list,
//! writes the reordered and renumbered list back immediately, then sends
//! the request. On failure the snapshot is restored exactly. Either way the
//! list is invalidated so the next load reconciles with the server.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ReorderError, Result};
use crate::models::{Chapter, SubChapter};
use crate::services::cache::{QueryCache, QueryKey};

/// An item with a 1-based position among its siblings.
pub trait OrderedItem: Clone + Send + Sync + 'static {
    /// Cache scope for lists of this item type.
    const SCOPE: &'static str;

    fn id(&self) -> Uuid;
    fn position(&self) -> u32;
    fn set_position(&mut self, position: u32);
}

impl OrderedItem for Chapter {
    const SCOPE: &'static str = "chapters";

    fn id(&self) -> Uuid {
        self.id
    }

    fn position(&self) -> u32 {
        self.chapter_number
    }

    fn set_position(&mut self, position: u32) {
        self.chapter_number = position;
    }
}

impl OrderedItem for SubChapter {
    const SCOPE: &'static str = "sub-chapters";

    fn id(&self) -> Uuid {
        self.id
    }

    fn position(&self) -> u32 {
        self.sub_chapter_number
    }

    fn set_position(&mut self, position: u32) {
        self.sub_chapter_number = position;
    }
}

/// Server side of an ordered list.
#[async_trait]
pub trait ListBackend<T: OrderedItem>: Send + Sync + 'static {
    async fn fetch_list(&self, parent_id: Uuid) -> Result<Vec<T>>;
    async fn reorder(&self, item_id: Uuid, new_position: u32) -> Result<()>;
}

/// Checks a move without changing anything.
pub fn validate_move<T: OrderedItem>(
    items: &[T],
    item_id: Uuid,
    new_position: u32,
) -> std::result::Result<usize, ReorderError> {
    let from = items
        .iter()
        .position(|item| item.id() == item_id)
        .ok_or(ReorderError::ItemNotFound(item_id))?;

    if new_position == 0 || new_position as usize > items.len() {
        return Err(ReorderError::OutOfRange {
            position: new_position,
            len: items.len(),
        });
    }
    if from + 1 == new_position as usize {
        return Err(ReorderError::NoOp);
    }

    Ok(from)
}

/// Moves `item_id` to `new_position` (1-based) and renumbers every item to
/// its new index.
pub fn reorder_items<T: OrderedItem>(
    items: &[T],
    item_id: Uuid,
    new_position: u32,
) -> std::result::Result<Vec<T>, ReorderError> {
    let from = validate_move(items, item_id, new_position)?;

    let mut reordered = items.to_vec();
    let moved = reordered.remove(from);
    reordered.insert(new_position as usize - 1, moved);
    renumber(&mut reordered);

    Ok(reordered)
}

fn renumber<T: OrderedItem>(items: &mut [T]) {
    for (index, item) in items.iter_mut().enumerate() {
        item.set_position(index as u32 + 1);
    }
}

/// Cached sibling list under one parent, reordered optimistically.
pub struct OrderedList<T: OrderedItem, B: ListBackend<T>> {
    parent_id: Uuid,
    cache: Arc<QueryCache<Vec<T>>>,
    backend: Arc<B>,
}

impl<T: OrderedItem, B: ListBackend<T>> OrderedList<T, B> {
    pub fn new(parent_id: Uuid, cache: Arc<QueryCache<Vec<T>>>, backend: Arc<B>) -> Self {
        Self {
            parent_id,
            cache,
            backend,
        }
    }

    pub fn key(&self) -> QueryKey {
        QueryKey::new(T::SCOPE, self.parent_id)
    }

    /// Cached list, if loaded.
    pub fn items(&self) -> Option<Vec<T>> {
        self.cache.get(&self.key())
    }

    /// Returns the cached list, fetching it when missing or stale.
    pub async fn load(&self) -> Result<Vec<T>> {
        let backend = self.backend.clone();
        let parent_id = self.parent_id;
        self.cache
            .fetch(self.key(), move || async move {
                let mut items = backend.fetch_list(parent_id).await?;
                items.sort_by_key(T::position);
                Ok(items)
            })
            .await
    }

    pub async fn reorder(&self, item_id: Uuid, new_position: u32) -> Result<()> {
        let key = self.key();

        // A refetch landing after this point would clobber the optimistic write
        self.cache.cancel(&key);

        let snapshot = self.cache.get(&key).ok_or(ReorderError::NotLoaded)?;
        let optimistic = reorder_items(&snapshot, item_id, new_position)?;
        self.cache.set(key, optimistic);
        debug!(%key, %item_id, new_position, "Optimistic reorder applied");

        let result = self.backend.reorder(item_id, new_position).await;
        if let Err(e) = &result {
            warn!(%key, %item_id, "Reorder failed, rolling back: {}", e);
            self.cache.set(key, snapshot);
        } else {
            info!(%key, %item_id, new_position, "Reordered");
        }

        self.cache.invalidate(&key);
        result
    }

    /// Position (1-based) a drop onto `target_id` moves the dragged item to.
    pub fn drop_position(&self, target_id: Uuid) -> Result<u32> {
        let items = self.cache.get(&self.key()).ok_or(ReorderError::NotLoaded)?;
        let index = items
            .iter()
            .position(|item| item.id() == target_id)
            .ok_or(ReorderError::ItemNotFound(target_id))?;
        Ok(index as u32 + 1)
    }

    /// Completes a drag gesture.
    pub async fn apply_drop(&self, intent: DropIntent) -> Result<()> {
        let position = self.drop_position(intent.target_id)?;
        self.reorder(intent.item_id, position).await
    }
}

/// Resolved drag gesture: move `item_id` to where `target_id` sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropIntent {
    pub item_id: Uuid,
    pub target_id: Uuid,
}

/// Follows one drag gesture.
///
/// A drop that lands outside every target falls back to the last target the
/// pointer passed over, so a pointer slipping off a narrow drop zone still
/// completes the move.
#[derive(Debug, Default)]
pub struct DragTracker {
    dragged: Option<Uuid>,
    last_over: Option<Uuid>,
}

impl DragTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, item_id: Uuid) {
        self.dragged = Some(item_id);
        self.last_over = None;
    }

    pub fn drag_over(&mut self, target_id: Option<Uuid>) {
        if let Some(target) = target_id {
            self.last_over = Some(target);
        }
    }

    pub fn cancel(&mut self) {
        self.dragged = None;
        self.last_over = None;
    }

    /// Ends the gesture. `None` when nothing should move.
    pub fn drop(&mut self, target_id: Option<Uuid>) -> Option<DropIntent> {
        let item_id = self.dragged.take()?;
        let target_id = target_id.or(self.last_over.take())?;
        self.last_over = None;

        if target_id == item_id {
            return None;
        }
        Some(DropIntent { item_id, target_id })
    }
}
