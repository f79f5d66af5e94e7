//! Local mirror of remote participants

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::ws::protocol::{ParticipantId, ParticipantSnapshot, Profile, Rotation, Vec3};

/// One remote participant as the client sees it
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAvatarState {
    pub id: ParticipantId,
    pub profile: Profile,
    /// Latest position received from the network
    pub target_position: Vec3,
    pub target_rotation: Rotation,
    /// What gets drawn; only the interpolator moves it
    pub rendered_position: Vec3,
    pub rendered_rotation: Rotation,
}

impl RemoteAvatarState {
    /// First observation: rendered state starts on the target
    pub fn from_snapshot(snapshot: ParticipantSnapshot) -> Self {
        Self {
            id: snapshot.id,
            profile: snapshot.profile,
            target_position: snapshot.position,
            target_rotation: snapshot.rotation,
            rendered_position: snapshot.position,
            rendered_rotation: snapshot.rotation,
        }
    }
}

/// Remote participants keyed by id. The local participant is never stored.
#[derive(Debug, Default)]
pub struct RemoteMirror {
    local_id: Option<ParticipantId>,
    avatars: HashMap<ParticipantId, RemoteAvatarState>,
}

impl RemoteMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_id(&self) -> Option<ParticipantId> {
        self.local_id
    }

    /// Add a participant, or retarget it if already known.
    /// Returns true when a new avatar was created.
    pub fn upsert(&mut self, snapshot: ParticipantSnapshot) -> bool {
        if Some(snapshot.id) == self.local_id {
            return false;
        }

        match self.avatars.get_mut(&snapshot.id) {
            Some(avatar) => {
                avatar.target_position = snapshot.position;
                avatar.target_rotation = snapshot.rotation;
                avatar.profile = snapshot.profile;
                false
            }
            None => {
                debug!(participant_id = %snapshot.id, "Remote participant added");
                self.avatars
                    .insert(snapshot.id, RemoteAvatarState::from_snapshot(snapshot));
                true
            }
        }
    }

    /// Move the network target of a known participant. Unknown ids are ignored.
    pub fn set_target(&mut self, id: ParticipantId, position: Vec3, rotation: Rotation) -> bool {
        match self.avatars.get_mut(&id) {
            Some(avatar) => {
                avatar.target_position = position;
                avatar.target_rotation = rotation;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: ParticipantId) -> Option<RemoteAvatarState> {
        let removed = self.avatars.remove(&id);
        if removed.is_some() {
            debug!(participant_id = %id, "Remote participant removed");
        }
        removed
    }

    /// Make the mirror match a full snapshot: drop anyone missing from it,
    /// add or retarget everyone in it.
    pub fn reconcile<I>(&mut self, snapshots: I)
    where
        I: IntoIterator<Item = ParticipantSnapshot>,
    {
        let snapshots: Vec<_> = snapshots.into_iter().collect();
        let present: HashSet<ParticipantId> = snapshots.iter().map(|s| s.id).collect();

        self.avatars.retain(|id, _| present.contains(id));
        for snapshot in snapshots {
            self.upsert(snapshot);
        }
    }

    /// Authoritative reset after a join reply. Entries from before the
    /// join that the server did not list are discarded.
    pub fn replace_with<I>(&mut self, local_id: ParticipantId, snapshots: I)
    where
        I: IntoIterator<Item = ParticipantSnapshot>,
    {
        self.local_id = Some(local_id);
        self.reconcile(snapshots);
    }

    pub fn get(&self, id: ParticipantId) -> Option<&RemoteAvatarState> {
        self.avatars.get(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.avatars.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteAvatarState> {
        self.avatars.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RemoteAvatarState> {
        self.avatars.values_mut()
    }

    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }
}
