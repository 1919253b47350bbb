//! Per-channel gain and solo coordination
//!
//! Volumes live here independently of whether a worker is running for the
//! channel. The solo operation ([`VolumeStore::mute_all_except`]) silences
//! every other live channel and remembers what it changed so that
//! [`VolumeStore::unmute_channels`] can put it back.

use chrono::{DateTime, Local};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::Channel;
use crate::constants::MAX_VOLUME;
use crate::error::WorkerError;

/// Check that a requested level is in `0..=100`
pub fn validate_volume(level: i32) -> Result<u8, WorkerError> {
    if (0..=MAX_VOLUME as i32).contains(&level) {
        Ok(level as u8)
    } else {
        Err(WorkerError::InvalidVolume(level))
    }
}

/// Stored gain of one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeRecord {
    pub channel_id: u32,
    pub volume_level: u8,
    pub channel_name: String,
    pub timestamp: DateTime<Local>,
}

impl VolumeRecord {
    pub fn new(channel_id: u32, volume_level: u8, channel_name: impl Into<String>) -> Self {
        Self {
            channel_id,
            volume_level,
            channel_name: channel_name.into(),
            timestamp: Local::now(),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.volume_level == 0
    }

    /// Level as a fraction in `0.0..=1.0`
    pub fn as_fraction(&self) -> f32 {
        self.volume_level as f32 / MAX_VOLUME as f32
    }

    pub fn description(&self) -> &'static str {
        match self.volume_level {
            0 => "Mute",
            1..=20 => "Very low",
            21..=40 => "Low",
            41..=60 => "Medium",
            61..=80 => "High",
            _ => "Very high",
        }
    }
}

/// What the solo operation needs to know about running workers
pub trait WorkerDirectory {
    /// A worker exists for the channel and reports itself running
    fn is_active(&self, channel_id: u32) -> bool;

    /// Apply a level to the live worker, if there is one
    fn push_volume(&self, channel_id: u32, level: u8);
}

/// Per-channel volume state shared by the control surface and the workers
pub struct VolumeStore {
    volumes: DashMap<u32, VolumeRecord>,
    /// Levels saved by the last solo, restored by `unmute_channels`
    previous_volumes: DashMap<u32, u8>,
    /// true for the current solo target only
    active_states: DashMap<u32, bool>,
    /// Serializes solo and restore
    solo_lock: Mutex<()>,
}

impl VolumeStore {
    pub fn new() -> Self {
        Self {
            volumes: DashMap::new(),
            previous_volumes: DashMap::new(),
            active_states: DashMap::new(),
            solo_lock: Mutex::new(()),
        }
    }

    /// One record per configured channel, every level starting at 0
    pub fn from_channels(channels: &[Channel]) -> Self {
        let store = Self::new();
        for channel in channels {
            store
                .volumes
                .insert(channel.id, VolumeRecord::new(channel.id, 0, channel.name.clone()));
            store.active_states.insert(channel.id, false);
        }
        tracing::info!("Volume store initialized with {} channels", channels.len());
        store
    }

    pub fn set_volume(&self, channel_id: u32, level: i32) -> Result<u8, WorkerError> {
        let level = validate_volume(level)?;
        self.store_level(channel_id, level);
        tracing::debug!("Channel {} volume set to {}", channel_id, level);
        Ok(level)
    }

    /// Current level, 0 for unknown channels
    pub fn get_volume(&self, channel_id: u32) -> u8 {
        self.volumes
            .get(&channel_id)
            .map(|r| r.volume_level)
            .unwrap_or(0)
    }

    pub fn get_record(&self, channel_id: u32) -> Option<VolumeRecord> {
        self.volumes.get(&channel_id).map(|r| r.clone())
    }

    /// Snapshot of every record, ordered by channel id
    pub fn get_all_volumes(&self) -> BTreeMap<u32, VolumeRecord> {
        self.volumes
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect()
    }

    pub fn has_channel(&self, channel_id: u32) -> bool {
        self.volumes.contains_key(&channel_id)
    }

    /// Track a new channel at level 0; existing records are left alone
    pub fn add_channel(&self, channel: &Channel) {
        self.volumes
            .entry(channel.id)
            .or_insert_with(|| VolumeRecord::new(channel.id, 0, channel.name.clone()));
        self.active_states.entry(channel.id).or_insert(false);
    }

    pub fn remove_channel(&self, channel_id: u32) {
        self.volumes.remove(&channel_id);
        self.previous_volumes.remove(&channel_id);
        self.active_states.remove(&channel_id);
    }

    pub fn reset_volume(&self, channel_id: u32) {
        self.store_level(channel_id, 0);
    }

    pub fn reset_all_volumes(&self) {
        for mut record in self.volumes.iter_mut() {
            record.volume_level = 0;
            record.timestamp = Local::now();
        }
        tracing::info!("All volumes reset to 0");
    }

    /// Whether the channel is the current solo target
    pub fn is_solo_active(&self, channel_id: u32) -> bool {
        self.active_states
            .get(&channel_id)
            .map(|s| *s)
            .unwrap_or(false)
    }

    pub fn active_states(&self) -> BTreeMap<u32, bool> {
        self.active_states
            .iter()
            .map(|s| (*s.key(), *s.value()))
            .collect()
    }

    /// Levels waiting to be restored by `unmute_channels`
    pub fn saved_volumes(&self) -> BTreeMap<u32, u8> {
        self.previous_volumes
            .iter()
            .map(|s| (*s.key(), *s.value()))
            .collect()
    }

    /// Silence every other active channel, remembering its level.
    ///
    /// Any snapshot left by an earlier call is discarded first. Returns
    /// whether at least one channel was actually muted.
    pub fn mute_all_except(&self, channel_id: u32, workers: &dyn WorkerDirectory) -> bool {
        let _solo = self.solo_lock.lock();
        self.previous_volumes.clear();

        let mut muted = false;
        for id in self.channel_ids() {
            if id == channel_id {
                self.active_states.insert(id, true);
                continue;
            }

            if workers.is_active(id) {
                let current = self.get_volume(id);
                if current != 0 {
                    self.previous_volumes.insert(id, current);
                    self.store_level(id, 0);
                    workers.push_volume(id, 0);
                    muted = true;
                    tracing::debug!("Channel {} muted for solo (was {})", id, current);
                }
            }
            self.active_states.insert(id, false);
        }

        if muted {
            tracing::info!("Muted all active channels except {}", channel_id);
        } else {
            tracing::info!("No other active channels to mute for solo on {}", channel_id);
        }
        muted
    }

    /// Restore the levels saved by the last solo for channels still active.
    ///
    /// Channels whose worker has gone away are dropped from the snapshot
    /// without being restored. Returns whether anything was restored.
    pub fn unmute_channels(&self, workers: &dyn WorkerDirectory) -> bool {
        let _solo = self.solo_lock.lock();

        let saved: Vec<(u32, u8)> = self
            .previous_volumes
            .iter()
            .map(|s| (*s.key(), *s.value()))
            .collect();

        let mut restored = false;
        for (id, level) in saved {
            if workers.is_active(id) {
                self.store_level(id, level);
                workers.push_volume(id, level);
                restored = true;
                tracing::debug!("Channel {} restored to {}", id, level);
            } else {
                tracing::debug!("Channel {} is no longer active, not restored", id);
            }
            self.active_states.insert(id, false);
            self.previous_volumes.remove(&id);
        }

        self.previous_volumes.clear();
        restored
    }

    fn channel_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.volumes.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    fn store_level(&self, channel_id: u32, level: u8) {
        self.volumes
            .entry(channel_id)
            .and_modify(|r| {
                r.volume_level = level;
                r.timestamp = Local::now();
            })
            .or_insert_with(|| VolumeRecord::new(channel_id, level, String::new()));
    }
}

impl Default for VolumeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};

    /// Directory with a fixed set of live channels that records pushes
    #[derive(Default)]
    struct FakeWorkers {
        active: Mutex<HashSet<u32>>,
        pushed: Mutex<HashMap<u32, u8>>,
    }

    impl FakeWorkers {
        fn with_active(ids: &[u32]) -> Self {
            let workers = Self::default();
            workers.active.lock().extend(ids.iter().copied());
            workers
        }

        fn deactivate(&self, id: u32) {
            self.active.lock().remove(&id);
        }

        fn pushed(&self, id: u32) -> Option<u8> {
            self.pushed.lock().get(&id).copied()
        }
    }

    impl WorkerDirectory for FakeWorkers {
        fn is_active(&self, channel_id: u32) -> bool {
            self.active.lock().contains(&channel_id)
        }

        fn push_volume(&self, channel_id: u32, level: u8) {
            self.pushed.lock().insert(channel_id, level);
        }
    }

    fn store() -> VolumeStore {
        VolumeStore::from_channels(&[
            Channel::new(1, "One", true),
            Channel::new(2, "Two", false),
            Channel::new(3, "Three", true),
            Channel::new(4, "Four", true),
        ])
    }

    #[test]
    fn test_initial_levels_are_zero() {
        let store = store();
        assert_eq!(store.get_volume(1), 0);
        assert_eq!(store.get_volume(99), 0);
        assert!(store.has_channel(4));
        assert!(!store.has_channel(99));
        assert_eq!(store.get_record(3).unwrap().channel_name, "Three");
    }

    #[test]
    fn test_invalid_volume_leaves_store_unchanged() {
        let store = store();
        store.set_volume(1, 35).unwrap();

        let err = store.set_volume(1, 101).unwrap_err();
        assert_eq!(err.kind(), "INVALID_VOLUME");
        assert!(store.set_volume(1, -1).is_err());
        assert_eq!(store.get_volume(1), 35);
    }

    #[test]
    fn test_record_helpers() {
        let record = VolumeRecord::new(1, 0, "x");
        assert!(record.is_muted());
        assert_eq!(record.description(), "Mute");
        assert_eq!(VolumeRecord::new(1, 55, "x").description(), "Medium");
        assert_eq!(VolumeRecord::new(1, 100, "x").description(), "Very high");
        assert_eq!(VolumeRecord::new(1, 50, "x").as_fraction(), 0.5);
    }

    #[test]
    fn test_solo_mutes_only_active_nonzero_channels() {
        let store = store();
        let workers = FakeWorkers::with_active(&[1, 3, 4]);
        store.set_volume(1, 0).unwrap();
        store.set_volume(2, 70).unwrap();
        store.set_volume(3, 40).unwrap();
        store.set_volume(4, 0).unwrap();

        assert!(store.mute_all_except(1, &workers));

        assert_eq!(store.get_volume(1), 0);
        assert_eq!(store.get_volume(2), 70); // no worker, untouched
        assert_eq!(store.get_volume(3), 0);
        assert_eq!(workers.pushed(3), Some(0));
        assert_eq!(workers.pushed(4), None); // already silent
        assert_eq!(store.saved_volumes(), BTreeMap::from([(3, 40)]));

        assert!(store.is_solo_active(1));
        assert!(!store.is_solo_active(2));
        assert!(!store.is_solo_active(3));

        assert!(store.unmute_channels(&workers));
        assert_eq!(store.get_volume(3), 40);
        assert_eq!(workers.pushed(3), Some(40));
        assert!(store.saved_volumes().is_empty());
    }

    #[test]
    fn test_solo_with_nothing_playing() {
        let store = store();
        let workers = FakeWorkers::with_active(&[1]);
        store.set_volume(3, 80).unwrap();

        assert!(!store.mute_all_except(1, &workers));
        assert_eq!(store.get_volume(3), 80);
        assert!(!store.unmute_channels(&workers));
    }

    #[test]
    fn test_unmute_skips_channels_that_stopped() {
        let store = store();
        let workers = FakeWorkers::with_active(&[1, 3, 4]);
        store.set_volume(3, 40).unwrap();
        store.set_volume(4, 60).unwrap();

        assert!(store.mute_all_except(1, &workers));
        workers.deactivate(4);

        assert!(store.unmute_channels(&workers));
        assert_eq!(store.get_volume(3), 40);
        assert_eq!(store.get_volume(4), 0);
        assert!(store.saved_volumes().is_empty());
    }

    #[test]
    fn test_second_solo_discards_first_snapshot() {
        let store = store();
        let workers = FakeWorkers::with_active(&[1, 3, 4]);
        store.set_volume(1, 90).unwrap();
        store.set_volume(3, 40).unwrap();
        store.set_volume(4, 60).unwrap();

        assert!(store.mute_all_except(1, &workers));
        // 3 and 4 are silent now; soloing 3 only captures channel 1
        assert!(store.mute_all_except(3, &workers));
        assert_eq!(store.saved_volumes(), BTreeMap::from([(1, 90)]));

        assert!(store.unmute_channels(&workers));
        assert_eq!(store.get_volume(1), 90);
        assert_eq!(store.get_volume(3), 0);
        assert_eq!(store.get_volume(4), 0);
    }

    #[test]
    fn test_remove_and_reset() {
        let store = store();
        store.set_volume(1, 20).unwrap();
        store.set_volume(3, 30).unwrap();

        store.reset_volume(1);
        assert_eq!(store.get_volume(1), 0);

        store.reset_all_volumes();
        assert!(store.get_all_volumes().values().all(|r| r.is_muted()));

        store.remove_channel(3);
        assert!(!store.has_channel(3));
        store.add_channel(&Channel::new(3, "Three again", true));
        assert_eq!(store.get_record(3).unwrap().channel_name, "Three again");
    }

    proptest! {
        #[test]
        fn prop_set_volume_in_range(level in -500i32..500) {
            let store = store();
            store.set_volume(1, 17).unwrap();
            let result = store.set_volume(1, level);
            if (0..=100).contains(&level) {
                prop_assert_eq!(result.unwrap() as i32, level);
                prop_assert_eq!(store.get_volume(1) as i32, level);
            } else {
                prop_assert!(result.is_err());
                prop_assert_eq!(store.get_volume(1), 17);
            }
        }
    }
}
