//! The on-disk disc library is an external collaborator: something that
//! rips, stores and indexes discs outside of the playback transport this
//! crate implements. This module only carries the narrow interface the
//! transport needs (resolving a disc's data file) and the content-addressed
//! layout constants, so a real implementation elsewhere can be swapped in.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::disc::{Disc, DiscId};

/// Name of the marker file identifying a directory as a library root.
pub const DB_ROOT_MARKER: &str = ".codplayerdb";

/// Name of the subdirectory holding all ripped discs.
pub const DISCS_DIR: &str = "discs";

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("disc {0} not found in library")]
    NotFound(DiscId),
    #[error("reading library at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A source of ripped discs and their metadata. The transport only ever
/// reads from this; ripping and indexing live entirely outside its scope.
pub trait Library: Send + Sync {
    /// Look up a disc's track layout by its id.
    fn lookup(&self, disc_id: &DiscId) -> Result<Disc, LibraryError>;

    /// Absolute path to a disc's PCM data file.
    fn data_file_path(&self, disc: &Disc) -> Result<PathBuf, LibraryError>;
}

/// A `Library` reading the content-addressed directory layout directly off
/// disk, with no caching and no rip/index support of its own.
pub struct DiscDirLibrary {
    root: PathBuf,
}

impl DiscDirLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiscDirLibrary { root: root.into() }
    }

    /// `discs/<first two hex chars>/<id40>`, sharding by the first byte of
    /// the internal id to keep any one directory from growing unbounded.
    fn disc_dir(&self, disc_id: &DiscId) -> PathBuf {
        let internal = disc_id.internal();
        self.root
            .join(DISCS_DIR)
            .join(&internal[..2])
            .join(internal)
    }
}

impl Library for DiscDirLibrary {
    fn lookup(&self, disc_id: &DiscId) -> Result<Disc, LibraryError> {
        let dir = self.disc_dir(disc_id);
        let meta_path = dir.join("disc.json");
        let bytes = std::fs::read(&meta_path).map_err(|source| LibraryError::Io {
            path: meta_path.clone(),
            source,
        })?;
        serde_json::from_slice::<OnDiskDisc>(&bytes)
            .map(|d| d.into_disc(disc_id.clone()))
            .map_err(|_| LibraryError::NotFound(disc_id.clone()))
    }

    fn data_file_path(&self, disc: &Disc) -> Result<PathBuf, LibraryError> {
        Ok(self.disc_dir(&disc.disc_id).join(&disc.data_file_name))
    }
}

#[derive(serde::Deserialize)]
struct OnDiskDisc {
    tracks: Vec<OnDiskTrack>,
    data_file_name: String,
    #[serde(default)]
    ripped_audio: bool,
    #[serde(default)]
    ripped_toc: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
}

#[derive(serde::Deserialize)]
struct OnDiskTrack {
    number: u32,
    file_offset: u64,
    file_length: u64,
    length: u64,
    #[serde(default)]
    pregap_offset: u64,
    #[serde(default)]
    pregap_silence: u64,
    #[serde(default)]
    index: Vec<u64>,
    #[serde(default)]
    pause_after: bool,
    #[serde(default)]
    skip: bool,
}

impl OnDiskDisc {
    fn into_disc(self, disc_id: DiscId) -> Disc {
        Disc {
            disc_id,
            tracks: self
                .tracks
                .into_iter()
                .map(|t| crate::disc::Track {
                    number: t.number,
                    file_offset: t.file_offset,
                    file_length: t.file_length,
                    length: t.length,
                    pregap_offset: t.pregap_offset,
                    pregap_silence: t.pregap_silence,
                    index: t.index,
                    pause_after: t.pause_after,
                    skip: t.skip,
                })
                .collect(),
            data_file_name: self.data_file_name,
            ripped_audio: self.ripped_audio,
            ripped_toc: self.ripped_toc,
            title: self.title,
            artist: self.artist,
        }
    }
}

pub fn is_library_root(path: &Path) -> bool {
    path.join(DB_ROOT_MARKER).is_file()
}
