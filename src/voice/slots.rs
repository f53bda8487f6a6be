use std::collections::BTreeSet;

/// One output lane: a whole instance, or one pitch class of an instance.
#[derive(Debug, Clone)]
struct Slot {
    instance: usize,
    pitch_class: Option<u8>,
    /// Deviation value last sent on this slot, per MIDI channel. Survives
    /// note-offs so a later note with the same value on the same channel can
    /// skip the controller message.
    values: [Option<u16>; 16],
    /// Arena indices of the note-ons currently sounding here.
    sounding: Vec<usize>,
    last_used: u64,
}

/// Slot state for one scheduling pass, with LRU ordering kept in a
/// `BTreeSet` keyed by (last use tick, slot index).
#[derive(Debug)]
pub(crate) struct SlotTable {
    slots: Vec<Slot>,
    lru: BTreeSet<(u64, usize)>,
    clock: u64,
}

impl SlotTable {
    /// One slot per instance.
    pub fn per_instance(instances: usize) -> Self {
        Self::build((0..instances).map(|instance| (instance, None)))
    }

    /// Twelve slots per instance, one per pitch class.
    pub fn per_pitch_class(instances: usize) -> Self {
        Self::build(
            (0..instances).flat_map(|instance| (0..12u8).map(move |pc| (instance, Some(pc)))),
        )
    }

    fn build(layout: impl Iterator<Item = (usize, Option<u8>)>) -> Self {
        let slots: Vec<Slot> = layout
            .map(|(instance, pitch_class)| Slot {
                instance,
                pitch_class,
                values: [None; 16],
                sounding: Vec::new(),
                last_used: 0,
            })
            .collect();
        let lru = (0..slots.len()).map(|i| (0, i)).collect();
        Self {
            slots,
            lru,
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn instance(&self, slot: usize) -> usize {
        self.slots[slot].instance
    }

    fn eligible(&self, slot: usize, key: u8) -> bool {
        self.slots[slot].pitch_class.is_none_or(|pc| pc == key % 12)
    }

    /// First eligible slot, in index order, already carrying `value` on
    /// `channel`.
    pub fn find_by_value(&self, key: u8, channel: u8, value: u16) -> Option<usize> {
        let lane = lane(channel);
        (0..self.slots.len())
            .find(|&i| self.eligible(i, key) && self.slots[i].values[lane] == Some(value))
    }

    /// Least recently used eligible slot with nothing sounding.
    pub fn least_recent_idle(&self, key: u8) -> Option<usize> {
        self.lru
            .iter()
            .map(|&(_, i)| i)
            .find(|&i| self.eligible(i, key) && self.slots[i].sounding.is_empty())
    }

    /// Least recently used eligible slot regardless of what it plays.
    pub fn least_recent(&self, key: u8) -> Option<usize> {
        self.lru
            .iter()
            .map(|&(_, i)| i)
            .find(|&i| self.eligible(i, key))
    }

    pub fn set_value(&mut self, slot: usize, channel: u8, value: u16) {
        self.slots[slot].values[lane(channel)] = Some(value);
    }

    /// Mark a claim: bump the slot to most recently used and record the note.
    pub fn occupy(&mut self, slot: usize, note_on: usize) {
        let entry = &mut self.slots[slot];
        self.lru.remove(&(entry.last_used, slot));
        self.clock += 1;
        entry.last_used = self.clock;
        self.lru.insert((self.clock, slot));
        entry.sounding.push(note_on);
    }

    pub fn release(&mut self, slot: usize, note_on: usize) {
        self.slots[slot].sounding.retain(|&n| n != note_on);
    }

    /// Empty the slot, returning what was sounding on it.
    pub fn take_sounding(&mut self, slot: usize) -> Vec<usize> {
        std::mem::take(&mut self.slots[slot].sounding)
    }

    #[cfg(test)]
    pub fn is_idle(&self, slot: usize) -> bool {
        self.slots[slot].sounding.is_empty()
    }

    /// Forget everything sounding, keeping values and use order.
    pub fn silence(&mut self) {
        for slot in &mut self.slots {
            slot.sounding.clear();
        }
    }
}

fn lane(channel: u8) -> usize {
    (channel.saturating_sub(1) & 0x0F) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_lookup_follows_use_order() {
        let mut table = SlotTable::per_instance(3);
        assert_eq!(table.least_recent_idle(60), Some(0));
        table.occupy(0, 0);
        table.release(0, 0);
        assert_eq!(table.least_recent_idle(60), Some(1));
        table.occupy(1, 1);
        table.release(1, 1);
        table.occupy(2, 2);
        table.release(2, 2);
        assert_eq!(table.least_recent_idle(60), Some(0));
    }

    #[test]
    fn busy_slots_are_skipped_for_idle_claims() {
        let mut table = SlotTable::per_instance(2);
        table.occupy(0, 0);
        assert_eq!(table.least_recent_idle(60), Some(1));
        table.occupy(1, 1);
        assert_eq!(table.least_recent_idle(60), None);
        assert_eq!(table.least_recent(60), Some(0));
    }

    #[test]
    fn value_survives_release() {
        let mut table = SlotTable::per_instance(2);
        table.set_value(1, 1, 77);
        table.occupy(1, 0);
        table.release(1, 0);
        assert!(table.is_idle(1));
        assert_eq!(table.find_by_value(60, 1, 77), Some(1));
        assert_eq!(table.find_by_value(60, 1, 78), None);
    }

    #[test]
    fn values_are_remembered_per_channel() {
        let mut table = SlotTable::per_instance(2);
        table.set_value(0, 1, 75);
        assert_eq!(table.find_by_value(64, 2, 75), None);
        table.set_value(1, 2, 75);
        assert_eq!(table.find_by_value(64, 2, 75), Some(1));
        assert_eq!(table.find_by_value(64, 1, 75), Some(0));
        table.silence();
        assert_eq!(table.find_by_value(64, 1, 75), Some(0));
    }

    #[test]
    fn pitch_class_slots_only_accept_their_class() {
        let mut table = SlotTable::per_pitch_class(2);
        assert_eq!(table.len(), 24);
        assert_eq!(table.least_recent_idle(61), Some(1));
        table.occupy(1, 0);
        assert_eq!(table.least_recent_idle(61), Some(13));
        assert_eq!(table.instance(13), 1);
        table.set_value(13, 1, 50);
        assert_eq!(table.find_by_value(62, 1, 50), None);
        assert_eq!(table.find_by_value(73, 1, 50), Some(13));
    }

    #[test]
    fn take_sounding_empties_slot() {
        let mut table = SlotTable::per_instance(1);
        table.occupy(0, 4);
        table.occupy(0, 6);
        assert_eq!(table.take_sounding(0), vec![4, 6]);
        assert!(table.is_idle(0));
    }
}
