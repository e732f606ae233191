//! The reconciled in-memory snapshot of the memory collection.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::models::{ChangeEvent, FeedMessage, Memory};

/// Memories keyed for presentation order: date descending, then id
/// ascending within a date.
///
/// The collection also tracks the highest applied `seq` per record id so a
/// replayed or reordered feed converges on the same state. Sequence history
/// survives deletes, so a stale update cannot resurrect a deleted record.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    entries: BTreeMap<(Reverse<NaiveDate>, String), Memory>,
    dates: HashMap<String, NaiveDate>,
    applied_seq: HashMap<String, u64>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.dates.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Memory> {
        let date = self.dates.get(id)?;
        self.entries.get(&(Reverse(*date), id.to_string()))
    }

    /// Insert or replace a record, re-keying it if its date changed.
    /// Returns the previous record under that id, if any.
    pub fn upsert(&mut self, record: Memory) -> Option<Memory> {
        let prev = self.remove(&record.id);
        self.dates.insert(record.id.clone(), record.date);
        self.entries
            .insert((Reverse(record.date), record.id.clone()), record);
        prev
    }

    pub fn remove(&mut self, id: &str) -> Option<Memory> {
        let date = self.dates.remove(id)?;
        self.entries.remove(&(Reverse(date), id.to_string()))
    }

    /// The full collection in presentation order.
    pub fn snapshot(&self) -> Vec<Memory> {
        self.entries.values().cloned().collect()
    }

    /// Swap in a freshly listed collection, dropping all sequence history.
    pub fn replace_all(&mut self, records: Vec<Memory>) {
        self.entries.clear();
        self.dates.clear();
        self.applied_seq.clear();
        for record in records {
            self.upsert(record);
        }
    }

    /// Fold one feed event into the collection. Returns whether anything
    /// visible changed.
    ///
    /// Sequenced events strictly older than the highest seen for their id
    /// are discarded; equal or newer ones win. Unsequenced events fall back
    /// to last-received-wins. An update for an unknown id inserts it, since
    /// the payload is the latest known state of that record. An insert for
    /// an id already present is a redelivery and leaves the record alone.
    pub fn apply_event(&mut self, message: &FeedMessage) -> bool {
        let id = message.event.memory_id().to_string();
        if self.is_stale(&id, message.seq) {
            tracing::debug!(id = %id, seq = ?message.seq, "Discarding stale feed event");
            return false;
        }
        self.note_seq(&id, message.seq);

        match &message.event {
            ChangeEvent::Insert { new } => {
                if self.contains(&new.id) {
                    return false;
                }
                self.upsert(new.clone());
                true
            }
            ChangeEvent::Update { new } => {
                let prev = self.upsert(new.clone());
                prev.as_ref() != Some(new)
            }
            ChangeEvent::Delete { .. } => self.remove(&id).is_some(),
        }
    }

    fn is_stale(&self, id: &str, seq: Option<u64>) -> bool {
        match (seq, self.applied_seq.get(id)) {
            (Some(seq), Some(&applied)) => seq < applied,
            _ => false,
        }
    }

    fn note_seq(&mut self, id: &str, seq: Option<u64>) {
        if let Some(seq) = seq {
            let slot = self.applied_seq.entry(id.to_string()).or_insert(seq);
            *slot = (*slot).max(seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, date: NaiveDate, description: &str) -> Memory {
        Memory {
            id: id.to_string(),
            date,
            description: description.to_string(),
            journal_entry: None,
            intensity: 2,
            photo: None,
            frame_style: None,
            photo_effect: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn snapshot_is_date_descending_then_id_ascending() {
        let mut collection = MemoryCollection::new();
        collection.upsert(record("3", date(2024, 12, 31), "New Year's Eve party"));
        collection.upsert(record("2", date(2024, 12, 25), "Christmas morning"));
        collection.upsert(record("10", date(2024, 12, 31), "Quiet morning"));

        let ids: Vec<String> = collection.snapshot().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["10", "3", "2"]);
    }

    #[test]
    fn upsert_rekeys_on_date_change() {
        let mut collection = MemoryCollection::new();
        collection.upsert(record("1", date(2024, 11, 5), "Bonfire night"));

        let prev = collection.upsert(record("1", date(2024, 11, 6), "Bonfire night"));
        assert_eq!(prev.unwrap().date, date(2024, 11, 5));
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.snapshot()[0].date, date(2024, 11, 6));
    }

    #[test]
    fn replaying_events_changes_nothing() {
        let mut collection = MemoryCollection::new();
        let insert = FeedMessage::insert(record("1", date(2024, 11, 5), "Bonfire night"));
        let delete = FeedMessage::delete("1");

        assert!(collection.apply_event(&insert));
        assert!(!collection.apply_event(&insert));
        assert!(collection.apply_event(&delete));
        assert!(!collection.apply_event(&delete));
        assert!(collection.is_empty());
    }

    #[test]
    fn replaying_an_update_changes_nothing() {
        let mut collection = MemoryCollection::new();
        let update = FeedMessage::update(record("4", date(2025, 1, 1), "Brunch")).with_seq(2);

        assert!(collection.apply_event(&update));
        assert!(!collection.apply_event(&update));
        assert_eq!(collection.get("4").unwrap().description, "Brunch");
    }

    #[test]
    fn redelivered_insert_keeps_newer_state() {
        let mut collection = MemoryCollection::new();
        let insert = FeedMessage::insert(record("1", date(2024, 11, 5), "Bonfire night"));
        collection.apply_event(&insert);
        let edited = FeedMessage::update(record("1", date(2024, 11, 5), "Bonfire night, edited"));
        collection.apply_event(&edited);

        assert!(!collection.apply_event(&insert));
        assert_eq!(
            collection.get("1").unwrap().description,
            "Bonfire night, edited"
        );
    }

    #[test]
    fn stale_sequenced_update_is_discarded() {
        let mut collection = MemoryCollection::new();
        let newer = FeedMessage::update(record("1", date(2024, 11, 5), "Edited")).with_seq(5);
        let older = FeedMessage::update(record("1", date(2024, 11, 5), "Original")).with_seq(3);

        assert!(collection.apply_event(&newer));
        assert!(!collection.apply_event(&older));
        assert_eq!(collection.get("1").unwrap().description, "Edited");
    }

    #[test]
    fn equal_seq_last_received_wins() {
        let mut collection = MemoryCollection::new();
        let first = FeedMessage::update(record("1", date(2024, 11, 5), "First")).with_seq(4);
        let second = FeedMessage::update(record("1", date(2024, 11, 5), "Second")).with_seq(4);

        assert!(collection.apply_event(&first));
        assert!(collection.apply_event(&second));
        assert_eq!(collection.get("1").unwrap().description, "Second");
    }

    #[test]
    fn update_for_unknown_id_inserts() {
        let mut collection = MemoryCollection::new();
        let update = FeedMessage::update(record("7", date(2025, 1, 1), "Brunch"));

        assert!(collection.apply_event(&update));
        assert!(collection.contains("7"));
    }

    #[test]
    fn delete_for_unknown_id_is_a_noop() {
        let mut collection = MemoryCollection::new();
        assert!(!collection.apply_event(&FeedMessage::delete("missing")));
    }

    #[test]
    fn delete_tombstone_blocks_older_update() {
        let mut collection = MemoryCollection::new();
        collection.apply_event(&FeedMessage::insert(record("1", date(2024, 11, 5), "Bonfire")).with_seq(1));
        collection.apply_event(&FeedMessage::delete("1").with_seq(3));

        let stale = FeedMessage::update(record("1", date(2024, 11, 5), "Bonfire")).with_seq(2);
        assert!(!collection.apply_event(&stale));
        assert!(!collection.contains("1"));

        let fresh = FeedMessage::update(record("1", date(2024, 11, 5), "Bonfire again")).with_seq(4);
        assert!(collection.apply_event(&fresh));
        assert_eq!(collection.get("1").unwrap().description, "Bonfire again");
    }

    #[test]
    fn replace_all_resets_sequence_history() {
        let mut collection = MemoryCollection::new();
        collection.apply_event(&FeedMessage::update(record("1", date(2024, 11, 5), "Old")).with_seq(9));

        collection.replace_all(vec![record("1", date(2024, 11, 5), "Refreshed")]);

        let restarted = FeedMessage::update(record("1", date(2024, 11, 5), "After refresh")).with_seq(1);
        assert!(collection.apply_event(&restarted));
        assert_eq!(collection.get("1").unwrap().description, "After refresh");
    }

    #[test]
    fn unsequenced_events_are_last_received_wins() {
        let mut collection = MemoryCollection::new();
        collection.apply_event(&FeedMessage::insert(record("1", date(2024, 11, 5), "First")));
        collection.apply_event(&FeedMessage::update(record("1", date(2024, 11, 5), "Second")));

        assert_eq!(collection.get("1").unwrap().description, "Second");
    }
}
