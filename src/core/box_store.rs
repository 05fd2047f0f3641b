use std::path::{Path, PathBuf};

use log::warn;

use crate::core::archive::Archive;
use crate::core::bead::Bead;
use crate::core::box_index::{BoxIndex, IndexUpdate};
use crate::core::box_rawfs::FsResolver;
use crate::core::query::{BoxSearch, Predicate};
use crate::core::workspace::Workspace;
use crate::error::{BeadError, Result};

/// Fixed banner identifying an archive file as a bead.
pub const ARCHIVE_COMMENT: &str = "
This file is a BEAD zip archive.

It is a normal zip file that stores a discrete computation of the form

    output = code(*inputs)

The archive contains

- inputs as part of the metadata file: references (content_id) to other BEADs
- code   as files
- output as files
- extra metadata to support
  - linking different versions of the same computation
  - determining the newest version

----

";

#[derive(Debug)]
enum Resolver {
    Index(BoxIndex),
    Fs(FsResolver),
}

/// A named directory of bead archives.
///
/// Queries go through the side-index when it is usable and degrade to
/// directory scans otherwise; the archive files remain the durable truth
/// either way.
#[derive(Debug)]
pub struct Box {
    pub name: String,
    pub directory: PathBuf,
    resolver: Resolver,
}

impl Box {
    /// Open a box, preferring the index.
    pub fn new(name: impl Into<String>, directory: impl AsRef<Path>) -> Result<Self> {
        let name = name.into();
        let directory = Self::checked_directory(&name, directory)?;

        let index = BoxIndex::new(&directory);
        let resolver = match index.ensure_exists() {
            Ok(()) => Resolver::Index(index),
            Err(e) => {
                warn!(
                    "Box \"{}\": index unavailable ({}), falling back to directory scans",
                    name, e
                );
                Resolver::Fs(FsResolver::new(&directory))
            }
        };

        Ok(Box {
            name,
            directory,
            resolver,
        })
    }

    /// Open a box that deliberately bypasses the index.
    pub fn with_directory_scan(name: impl Into<String>, directory: impl AsRef<Path>) -> Result<Self> {
        let name = name.into();
        let directory = Self::checked_directory(&name, directory)?;
        let resolver = Resolver::Fs(FsResolver::new(&directory));
        Ok(Box {
            name,
            directory,
            resolver,
        })
    }

    fn checked_directory(name: &str, directory: impl AsRef<Path>) -> Result<PathBuf> {
        let directory = directory.as_ref().to_path_buf();
        if !directory.exists() {
            return Err(BeadError::Box(format!(
                "Box \"{}\": directory {} does not exist",
                name,
                directory.display()
            )));
        }
        if !directory.is_dir() {
            return Err(BeadError::Box(format!(
                "Box \"{}\": {} is not a directory",
                name,
                directory.display()
            )));
        }
        Ok(directory)
    }

    pub fn uses_index(&self) -> bool {
        matches!(self.resolver, Resolver::Index(_))
    }

    /// All beads in this box, ordered by ascending freeze time.
    pub fn all_beads(&self) -> Result<Vec<Bead>> {
        self.search().all()
    }

    /// Start a fluent search over this box.
    pub fn search(&self) -> BoxSearch<'_> {
        BoxSearch::new(self)
    }

    pub(crate) fn get_beads(&self, predicates: &[Predicate]) -> Result<Vec<Bead>> {
        match &self.resolver {
            Resolver::Index(index) => index.get_beads(predicates, &self.name),
            Resolver::Fs(resolver) => resolver.get_beads(predicates, &self.name),
        }
    }

    /// Freeze a workspace into this box as `<name>_<freeze_time>.zip`.
    ///
    /// The archive write is the durable step; updating the index afterwards
    /// is best-effort and a failure there never corrupts the stored archive.
    pub fn store(&self, workspace: &Workspace, freeze_time: &str) -> Result<PathBuf> {
        Self::checked_directory(&self.name, &self.directory)?;

        let bead_name = workspace.name()?;
        let zip_path = self
            .directory
            .join(format!("{}_{}.zip", bead_name, freeze_time));
        workspace.pack(&zip_path, freeze_time, ARCHIVE_COMMENT)?;

        match &self.resolver {
            Resolver::Index(index) => {
                if let Err(e) = index.index_one(&zip_path) {
                    warn!(
                        "Box \"{}\": stored {} but could not index it: {}",
                        self.name,
                        zip_path.display(),
                        e
                    );
                }
            }
            Resolver::Fs(resolver) => resolver.note_stored(&zip_path),
        }

        Ok(zip_path)
    }

    /// Open the archive backing a bead of this box.
    pub fn resolve(&self, bead: &Bead) -> Result<Archive> {
        if bead.box_name != self.name {
            return Err(BeadError::Value(format!(
                "Bead {} belongs to box \"{}\", not \"{}\"",
                bead.name, bead.box_name, self.name
            )));
        }

        let path = match &self.resolver {
            Resolver::Index(index) => {
                index.file_path_for(bead.name.as_str(), bead.content_id.as_str())?
            }
            Resolver::Fs(resolver) => {
                resolver.file_path_for(bead.name.as_str(), bead.content_id.as_str())?
            }
        };

        let archive = Archive::open(&path, &self.name)?;
        if archive.name() != &bead.name || archive.content_id()? != bead.content_id {
            return Err(BeadError::Value(format!(
                "Resolved archive {} does not match bead {} ({})",
                path.display(),
                bead.name,
                bead.content_id
            )));
        }
        Ok(archive)
    }

    /// Re-index every archive in the directory; returns a progress stream.
    pub fn rebuild_index(&self) -> Result<IndexUpdate> {
        BoxIndex::new(&self.directory).rebuild()
    }

    /// Reconcile the index with the directory; returns a progress stream.
    pub fn sync_index(&self) -> Result<IndexUpdate> {
        BoxIndex::new(&self.directory).sync()
    }
}
