use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use zip::ZipArchive;

use crate::core::bead::Bead;
use crate::core::meta::{BeadMeta, BeadName, ContentId, InputSpec};
use crate::error::{BeadError, Result};
use crate::tech::{persistence, securehash, timestamp};

/// Layout constants for archive structure
pub mod layout {
    pub const META_DIR: &str = "meta";
    pub const CODE_DIR: &str = "code";
    pub const DATA_DIR: &str = "data";

    pub const BEAD_META: &str = "meta/bead";
    pub const MANIFEST: &str = "meta/manifest";
}

/// Trailing `_<timestamp>` suffix of an archive file name.
static TIMESTAMP_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_[0-9]{8}(?:[tT][-+0-9]*)?$").unwrap());

/// Parse the bead name out of an archive file path: strip the extension,
/// then one trailing `_<timestamp>` suffix if present.
pub fn bead_name_from_path(path: &Path) -> Result<BeadName> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| BeadError::InvalidArchive(format!("Bad archive path: {}", path.display())))?;
    let name = TIMESTAMP_SUFFIX.replace(stem, "");
    BeadName::new(name.into_owned())
}

/// A frozen bead backed by a ZIP file on disk.
///
/// The zip handle and the metadata block are loaded lazily. Extraction
/// refuses to run until `validate` has succeeded on this instance; the
/// extractors run it themselves on first use.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    box_name: String,
    name: BeadName,
    zipfile: OnceCell<Mutex<ZipArchive<File>>>,
    meta: OnceCell<BeadMeta>,
    manifest: OnceCell<BTreeMap<String, String>>,
    validated: AtomicBool,
}

impl Archive {
    /// Open an existing archive
    pub fn open(path: impl AsRef<Path>, box_name: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(BeadError::InvalidArchive(format!(
                "Archive does not exist: {}",
                path.display()
            )));
        }

        let name = bead_name_from_path(&path)?;

        Ok(Archive {
            path,
            box_name: box_name.to_string(),
            name,
            zipfile: OnceCell::new(),
            meta: OnceCell::new(),
            manifest: OnceCell::new(),
            validated: AtomicBool::new(false),
        })
    }

    fn invalid(&self, what: impl std::fmt::Display) -> BeadError {
        BeadError::InvalidArchive(format!("{}: {}", self.path.display(), what))
    }

    fn zipfile(&self) -> Result<MutexGuard<'_, ZipArchive<File>>> {
        let zip = self.zipfile.get_or_try_init(|| -> Result<_> {
            let file = File::open(&self.path)?;
            let archive = ZipArchive::new(file).map_err(|e| self.invalid(e))?;
            Ok(Mutex::new(archive))
        })?;
        Ok(zip.lock().unwrap())
    }

    /// Get the archive's metadata
    pub fn meta(&self) -> Result<&BeadMeta> {
        self.meta.get_or_try_init(|| {
            let mut zip = self.zipfile()?;
            persistence::load_json_from_zip(&mut zip, layout::BEAD_META)
                .map_err(|e| self.invalid(format_args!("bad metadata: {}", e)))
        })
    }

    fn manifest(&self) -> Result<&BTreeMap<String, String>> {
        self.manifest.get_or_try_init(|| {
            let mut zip = self.zipfile()?;
            persistence::load_json_from_zip(&mut zip, layout::MANIFEST)
                .map_err(|e| self.invalid(format_args!("bad manifest: {}", e)))
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &BeadName {
        &self.name
    }

    pub fn box_name(&self) -> &str {
        &self.box_name
    }

    pub fn meta_version(&self) -> Result<&str> {
        Ok(&self.meta()?.meta_version)
    }

    pub fn kind(&self) -> Result<&str> {
        Ok(&self.meta()?.kind)
    }

    pub fn content_id(&self) -> Result<ContentId> {
        let meta = self.meta()?;
        meta.content_id
            .as_deref()
            .map(ContentId::new)
            .ok_or_else(|| self.invalid("metadata has no content id"))
    }

    pub fn freeze_time_str(&self) -> Result<&str> {
        self.meta()?
            .freeze_time
            .as_deref()
            .ok_or_else(|| self.invalid("metadata has no freeze time"))
    }

    pub fn freeze_time(&self) -> Result<DateTime<Utc>> {
        timestamp::parse_timestamp(self.freeze_time_str()?)
            .map_err(|e| self.invalid(format_args!("bad freeze time: {}", e)))
    }

    pub fn inputs(&self) -> Result<&[InputSpec]> {
        Ok(&self.meta()?.inputs)
    }

    /// Materialize the immutable metadata view of this archive.
    pub fn bead(&self) -> Result<Bead> {
        let meta = self.meta()?;
        let content_id = meta
            .content_id
            .as_deref()
            .map(ContentId::new)
            .ok_or_else(|| self.invalid("metadata has no content id"))?;
        let freeze_time_str = meta
            .freeze_time
            .clone()
            .ok_or_else(|| self.invalid("metadata has no freeze time"))?;
        Bead::new(
            self.name.clone(),
            meta.kind.clone(),
            content_id,
            freeze_time_str,
            meta.inputs.clone(),
            self.box_name.clone(),
        )
        .map_err(|e| self.invalid(e))
    }

    /// Validate the archive integrity.
    ///
    /// Checks that the manifest and the physical `code/` + `data/` entries
    /// agree, that every per-file digest matches, and that the declared
    /// content id equals the one recomputed from the manifest and the core
    /// metadata fields.
    pub fn validate(&self) -> Result<()> {
        let meta = self.meta()?;
        let declared_content_id = meta
            .content_id
            .as_deref()
            .ok_or_else(|| self.invalid("metadata has no content id"))?;
        let freeze_time = meta
            .freeze_time
            .as_deref()
            .ok_or_else(|| self.invalid("metadata has no freeze time"))?;
        let manifest = self.manifest()?;

        {
            let mut zip = self.zipfile()?;

            let physical: BTreeSet<String> = zip
                .file_names()
                .filter(|n| n.starts_with("code/") || n.starts_with("data/"))
                .filter(|n| !n.ends_with('/'))
                .map(String::from)
                .collect();
            let declared: BTreeSet<String> = manifest.keys().cloned().collect();
            if physical != declared {
                return Err(self.invalid("manifest does not match archive entries"));
            }

            for (entry_name, declared_digest) in manifest {
                let entry = zip
                    .by_name(entry_name)
                    .map_err(|e| self.invalid(format_args!("{}: {}", entry_name, e)))?;
                let size = entry.size();
                let digest = securehash::hash_reader(entry, size)?;
                if digest != *declared_digest {
                    return Err(self.invalid(format_args!("checksum mismatch for {}", entry_name)));
                }
            }
        }

        let computed =
            securehash::content_id(manifest, &meta.kind, freeze_time, &meta.inputs);
        if computed != declared_content_id {
            return Err(self.invalid("content id does not match archive content"));
        }

        self.validated.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn ensure_validated(&self) -> Result<()> {
        if !self.validated.load(Ordering::Relaxed) {
            self.validate()?;
        }
        Ok(())
    }

    /// Extract a whole logical subtree (e.g. `data/`) into a directory.
    pub fn extract_tree(&self, zip_dir: &str, fs_dir: impl AsRef<Path>) -> Result<()> {
        self.ensure_validated()?;
        let prefix = if zip_dir.ends_with('/') {
            zip_dir.to_string()
        } else {
            format!("{}/", zip_dir)
        };

        let mut zip = self.zipfile()?;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            let entry_name = entry.name().to_string();
            if !entry_name.starts_with(&prefix) || entry_name.ends_with('/') {
                continue;
            }
            let relative = &entry_name[prefix.len()..];
            if relative.split('/').any(|part| part == "..") {
                return Err(self.invalid(format_args!("unsafe entry path: {}", entry_name)));
            }
            let target_path = fs_dir.as_ref().join(relative);
            if let Some(parent) = target_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut target = File::create(&target_path)?;
            io::copy(&mut entry, &mut target)?;
        }
        Ok(())
    }

    /// Extract a single logical file to a filesystem path.
    pub fn extract_file(&self, zip_path: &str, fs_path: impl AsRef<Path>) -> Result<()> {
        self.ensure_validated()?;
        let mut zip = self.zipfile()?;
        let mut entry = zip
            .by_name(zip_path)
            .map_err(|_| BeadError::Lookup(format!("No archive entry: {}", zip_path)))?;
        if let Some(parent) = fs_path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let mut target = File::create(fs_path.as_ref())?;
        io::copy(&mut entry, &mut target)?;
        Ok(())
    }

    pub fn unpack_code_to(&self, fs_dir: impl AsRef<Path>) -> Result<()> {
        self.extract_tree(layout::CODE_DIR, fs_dir)
    }

    pub fn unpack_data_to(&self, fs_dir: impl AsRef<Path>) -> Result<()> {
        self.extract_tree(layout::DATA_DIR, fs_dir)
    }
}
