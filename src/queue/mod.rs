use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::QueueError;
use crate::models::{PlayableItem, TrackRef};

/// Source of the auto-advance target when a track ends naturally
pub trait NextItemProvider: Send + Sync {
    /// The next item to play after `current`, if any
    fn next_after(&self, current: &PlayableItem) -> Option<Arc<PlayableItem>>;
}

/// Ordered list of enqueued tracks.
///
/// Items are kept in ascending `sequence` order and are identified by that
/// sequence only. Sequences start at 1 and are never reused, not even
/// after [`PlaybackQueue::clear`].
pub struct PlaybackQueue {
    items: Vec<Arc<PlayableItem>>,
    next_sequence: u64,
    view: watch::Sender<Vec<Arc<PlayableItem>>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        let (view, _) = watch::channel(Vec::new());
        Self {
            items: Vec::new(),
            next_sequence: 1,
            view,
        }
    }

    /// Append a track and return its sequence number
    pub fn enqueue(&mut self, track: TrackRef) -> u64 {
        let sequence = self.push(track);
        self.publish();
        sequence
    }

    pub fn enqueue_many<I>(&mut self, tracks: I) -> Vec<u64>
    where
        I: IntoIterator<Item = TrackRef>,
    {
        let sequences: Vec<u64> = tracks.into_iter().map(|track| self.push(track)).collect();
        if !sequences.is_empty() {
            self.publish();
        }
        sequences
    }

    fn push(&mut self, track: TrackRef) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        log::debug!("Enqueued '{}' as item {}", track.display_name(), sequence);
        self.items.push(Arc::new(PlayableItem::new(sequence, track)));
        sequence
    }

    fn publish(&self) {
        self.view.send_replace(self.items.clone());
    }

    /// Lowest-sequence unplayed item after `current` (or from the start when
    /// nothing is current). The current item itself is never returned.
    pub fn next_after(&self, current: Option<&PlayableItem>) -> Option<Arc<PlayableItem>> {
        let after = current.map(PlayableItem::sequence).unwrap_or(0);
        self.items
            .iter()
            .find(|item| item.sequence() > after && !item.is_completed())
            .cloned()
    }

    pub fn has_next(&self, current: Option<&PlayableItem>) -> bool {
        self.next_after(current).is_some()
    }

    /// Item to switch to when skipping forward
    pub fn next(&self, current: Option<&PlayableItem>) -> Result<Arc<PlayableItem>, QueueError> {
        if self.items.is_empty() {
            return Err(QueueError::EmptyQueue);
        }
        self.next_after(current).ok_or(QueueError::EndOfQueue)
    }

    /// Step back to the item before `current` (the last item when nothing
    /// is current). That item and everything after it become unplayed
    /// again so forward playback resumes from there.
    pub fn previous(&self, current: Option<&PlayableItem>) -> Result<Arc<PlayableItem>, QueueError> {
        if self.items.is_empty() {
            return Err(QueueError::EmptyQueue);
        }

        let target = match current {
            Some(current) => self
                .items
                .iter()
                .rev()
                .find(|item| item.sequence() < current.sequence())
                .cloned()
                .ok_or(QueueError::StartOfQueue)?,
            None => self.items.last().cloned().ok_or(QueueError::EmptyQueue)?,
        };

        for item in self.items.iter().filter(|item| item.sequence() >= target.sequence()) {
            item.reopen();
        }
        self.publish();
        Ok(target)
    }

    pub fn get(&self, sequence: u64) -> Option<Arc<PlayableItem>> {
        self.items
            .binary_search_by_key(&sequence, |item| item.sequence())
            .ok()
            .map(|index| Arc::clone(&self.items[index]))
    }

    /// Ordered snapshot of the queue
    pub fn items(&self) -> Vec<Arc<PlayableItem>> {
        self.items.clone()
    }

    /// Observe the ordered queue contents. The receiver sees a new value
    /// after every change to the queue's membership.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Arc<PlayableItem>>> {
        self.view.subscribe()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.publish();
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl NextItemProvider for Mutex<PlaybackQueue> {
    fn next_after(&self, current: &PlayableItem) -> Option<Arc<PlayableItem>> {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_after(Some(current))
    }
}
