//! Tile list for group calls: the local participant plus every remote
//! publisher, laid out on the conference grid.

use std::collections::HashMap;

use crate::layout;
use crate::participants::RemoteParticipantInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub identity: String,
    pub display_name: String,
    pub is_local: bool,
    pub has_audio: bool,
    pub has_video: bool,
}

/// The local tile as the roster needs it.
#[derive(Debug, Clone)]
pub struct LocalTile {
    pub identity: String,
    pub display_name: String,
    pub has_audio: bool,
    pub has_video: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    tiles: Vec<Tile>,
}

impl Roster {
    /// Local tile first, then remotes in the order they first published.
    /// Remote names come from `directory` (identity to display name), falling
    /// back to the identity.
    pub fn build(
        local: LocalTile,
        remotes: &[RemoteParticipantInfo],
        directory: &HashMap<String, String>,
    ) -> Self {
        let mut tiles = Vec::with_capacity(remotes.len() + 1);
        tiles.push(Tile {
            identity: local.identity,
            display_name: local.display_name,
            is_local: true,
            has_audio: local.has_audio,
            has_video: local.has_video,
        });
        tiles.extend(remotes.iter().map(|p| Tile {
            display_name: directory
                .get(&p.identity)
                .cloned()
                .unwrap_or_else(|| p.identity.clone()),
            identity: p.identity.clone(),
            is_local: false,
            has_audio: p.has_audio,
            has_video: p.has_video,
        }));
        Self { tiles }
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn remote_count(&self) -> usize {
        self.tiles.iter().filter(|t| !t.is_local).count()
    }

    pub fn columns(&self) -> usize {
        layout::columns(self.len())
    }

    pub fn rows(&self) -> usize {
        layout::rows(self.len())
    }
}
