//! Current artifacts per channel and their revocable playable references
//!
//! Every recording session gets a new generation. Artifacts finalized for an
//! older generation are discarded on arrival, so a slow finalization from a
//! previous take can never replace the current one.

use crate::models::{Artifact, Channel};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Revocable handle to a finished artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayableRef(Uuid);

impl PlayableRef {
    pub fn id(&self) -> Uuid {
        self.0
    }
}

/// An artifact together with its live playable reference
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    pub artifact: Arc<Artifact>,
    pub playable: PlayableRef,
}

#[derive(Debug, Default)]
pub struct ArtifactStore {
    generation: u64,
    slots: [Option<ArtifactHandle>; 2],
    playables: HashMap<PlayableRef, Arc<Artifact>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Revoke all current references and open a new generation
    pub fn begin_session(&mut self) -> u64 {
        self.release_all();
        self.generation += 1;
        debug!("Artifact generation {}", self.generation);
        self.generation
    }

    /// Revoke every playable reference. Safe to call when empty.
    pub fn release_all(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(handle) = slot.take() {
                self.playables.remove(&handle.playable);
                debug!(
                    "Revoked playable reference {} for {}",
                    handle.playable.id(),
                    handle.artifact.channel
                );
            }
        }
        self.playables.clear();
    }

    /// Make an artifact current for its channel.
    ///
    /// Returns the new reference, or `None` when the artifact belongs to an
    /// older generation and was dropped.
    pub fn install(&mut self, generation: u64, artifact: Artifact) -> Option<PlayableRef> {
        if generation != self.generation {
            debug!(
                "Dropping stale artifact for {} (generation {} != {})",
                artifact.channel, generation, self.generation
            );
            return None;
        }

        let channel = artifact.channel;
        let artifact = Arc::new(artifact);
        let playable = PlayableRef(Uuid::new_v4());

        if let Some(previous) = self.slots[channel.index()].take() {
            self.playables.remove(&previous.playable);
        }
        self.playables.insert(playable, artifact.clone());
        info!(
            "{} artifact ready: {} bytes, {:.2}s",
            channel,
            artifact.bytes().len(),
            artifact.duration_seconds()
        );
        self.slots[channel.index()] = Some(ArtifactHandle { artifact, playable });

        Some(playable)
    }

    pub fn get(&self, channel: Channel) -> Option<ArtifactHandle> {
        self.slots[channel.index()].clone()
    }

    /// Dereference a playable reference; revoked references yield nothing
    pub fn resolve(&self, playable: &PlayableRef) -> Option<Arc<Artifact>> {
        self.playables.get(playable).cloned()
    }

    #[cfg(test)]
    pub fn live_references(&self) -> usize {
        self.playables.len()
    }
}
