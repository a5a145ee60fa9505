//! Per-track mixer state under stable integer handles.

use std::collections::HashMap;

use crate::project::Track;

pub const MAX_TRACK_VOLUME: f64 = 4.0;

/// Stable index of an audio track. Never reused within one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackHandle(pub u32);

impl TrackHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackState {
    pub id: String,
    pub volume: f64,
    pub pan: f64,
    pub mute: bool,
    pub solo: bool,
}

impl TrackState {
    fn new(id: String) -> Self {
        Self {
            id,
            volume: 1.0,
            pan: 0.0,
            mute: false,
            solo: false,
        }
    }
}

/// Volume, pan, mute, and solo for every audio track.
///
/// Removed tracks leave a tombstone so handles held elsewhere never point at
/// a different track.
#[derive(Debug, Default)]
pub struct TrackStateManager {
    slots: Vec<Option<TrackState>>,
    index: HashMap<String, TrackHandle>,
}

impl TrackStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `id`, creating a default-state slot if needed.
    pub fn insert(&mut self, id: &str) -> TrackHandle {
        if let Some(&handle) = self.index.get(id) {
            return handle;
        }
        let handle = TrackHandle(self.slots.len() as u32);
        self.slots.push(Some(TrackState::new(id.to_string())));
        self.index.insert(id.to_string(), handle);
        handle
    }

    /// Insert or update from a full track description.
    pub fn upsert(&mut self, track: &Track) -> TrackHandle {
        let handle = self.insert(&track.id);
        self.set_volume(handle, track.volume);
        self.set_pan(handle, track.pan);
        self.set_mute(handle, track.mute);
        self.set_solo(handle, track.solo);
        handle
    }

    pub fn remove(&mut self, id: &str) -> Option<TrackHandle> {
        let handle = self.index.remove(id)?;
        self.slots[handle.index()] = None;
        Some(handle)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }

    pub fn handle(&self, id: &str) -> Option<TrackHandle> {
        self.index.get(id).copied()
    }

    pub fn get(&self, handle: TrackHandle) -> Option<&TrackState> {
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, handle: TrackHandle) -> Option<&mut TrackState> {
        self.slots.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Clamped to [0, 4]. Non-finite values are ignored; returns whether the
    /// value was applied.
    pub fn set_volume(&mut self, handle: TrackHandle, volume: f64) -> bool {
        if !volume.is_finite() {
            return false;
        }
        match self.get_mut(handle) {
            Some(state) => {
                state.volume = volume.clamp(0.0, MAX_TRACK_VOLUME);
                true
            }
            None => false,
        }
    }

    /// Clamped to [-1, 1]. Non-finite values are ignored.
    pub fn set_pan(&mut self, handle: TrackHandle, pan: f64) -> bool {
        if !pan.is_finite() {
            return false;
        }
        match self.get_mut(handle) {
            Some(state) => {
                state.pan = pan.clamp(-1.0, 1.0);
                true
            }
            None => false,
        }
    }

    pub fn set_mute(&mut self, handle: TrackHandle, mute: bool) -> bool {
        self.get_mut(handle).map(|s| s.mute = mute).is_some()
    }

    pub fn set_solo(&mut self, handle: TrackHandle, solo: bool) -> bool {
        self.get_mut(handle).map(|s| s.solo = solo).is_some()
    }

    pub fn has_any_soloed_track(&self) -> bool {
        self.slots.iter().flatten().any(|s| s.solo)
    }

    /// Live handles in creation order.
    pub fn handles(&self) -> impl Iterator<Item = TrackHandle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| TrackHandle(i as u32))
    }

    /// One past the highest handle ever issued.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
