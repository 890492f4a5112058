//! Registry of active tracks keyed by id.

use std::collections::BTreeMap;

use crate::sound::Track;
use crate::types::TrackSnapshot;

/// Occupancy change caused by a registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    /// The registry went from empty to non-empty.
    Activated,
    /// The registry became empty.
    Emptied,
    /// Occupancy did not cross the empty boundary.
    Unchanged,
}

/// Id → track map. Ids are unique; iteration is ordered by id.
#[derive(Debug, Default)]
pub struct TrackRegistry {
    tracks: BTreeMap<String, Track>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tracks.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Track> {
        self.tracks.get_mut(id)
    }

    /// Inserts a track under its id.
    ///
    /// # Errors
    ///
    /// Hands the track back if the id is already registered.
    pub fn insert(&mut self, track: Track) -> Result<Occupancy, Track> {
        if self.tracks.contains_key(track.id()) {
            return Err(track);
        }
        let was_empty = self.tracks.is_empty();
        self.tracks.insert(track.id().to_string(), track);
        Ok(if was_empty {
            Occupancy::Activated
        } else {
            Occupancy::Unchanged
        })
    }

    /// Removes a track, reporting whether the registry is now empty.
    pub fn remove(&mut self, id: &str) -> Option<(Track, Occupancy)> {
        let track = self.tracks.remove(id)?;
        let occupancy = if self.tracks.is_empty() {
            Occupancy::Emptied
        } else {
            Occupancy::Unchanged
        };
        Some((track, occupancy))
    }

    /// Removes every track, in id order.
    pub fn drain(&mut self) -> Vec<Track> {
        std::mem::take(&mut self.tracks).into_values().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    pub fn snapshots(&self) -> Vec<TrackSnapshot> {
        self.tracks.values().map(Track::snapshot).collect()
    }
}
