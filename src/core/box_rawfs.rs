use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use glob::glob;
use log::debug;

use crate::core::archive::Archive;
use crate::core::bead::Bead;
use crate::core::query::{self, Predicate};
use crate::error::{BeadError, Result};

/// Enumerate candidate archives of a box directory.
///
/// With a bead name the walk narrows to that name's timestamped files so
/// unrelated archives are never opened.
pub(crate) fn glob_zip_files(directory: &Path, bead_name: Option<&str>) -> Result<Vec<PathBuf>> {
    let file_pattern = match bead_name {
        Some(name) => format!("{}_????????T????????????[-+]????.zip", name),
        None => "*.zip".to_string(),
    };
    let pattern = directory.join(file_pattern);
    let pattern = pattern.to_str().ok_or_else(|| {
        BeadError::Value(format!("Non-UTF8 box directory: {}", directory.display()))
    })?;

    let mut files = Vec::new();
    for entry in glob(pattern).map_err(|e| BeadError::Value(e.to_string()))? {
        if let Ok(path) = entry {
            if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Fallback query path: walk the box directory and parse candidates on
/// demand. Same contract as the index; used when the index is unavailable,
/// read-only, or deliberately disabled.
#[derive(Debug, Default)]
pub struct FsResolver {
    directory: PathBuf,
    /// Amortizes repeated `(name, content_id)` lookups within one process.
    path_cache: Mutex<HashMap<(String, String), PathBuf>>,
}

impl FsResolver {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        FsResolver {
            directory: directory.as_ref().to_path_buf(),
            path_cache: Mutex::new(HashMap::new()),
        }
    }

    fn remember(&self, bead: &Bead, path: &Path) {
        self.path_cache.lock().unwrap().insert(
            (
                bead.name.as_str().to_string(),
                bead.content_id.as_str().to_string(),
            ),
            path.to_path_buf(),
        );
    }

    /// Retrieve matching beads, ordered by ascending freeze time like the
    /// index path. Non-bead files are skipped silently.
    pub fn get_beads(&self, predicates: &[Predicate], box_name: &str) -> Result<Vec<Bead>> {
        if query::names_contradict(predicates) {
            return Ok(Vec::new());
        }

        let paths = glob_zip_files(&self.directory, query::single_name(predicates))?;
        let mut beads = Vec::new();
        for path in paths {
            let bead = match load_bead(&path, box_name) {
                Ok(bead) => bead,
                Err(e) if e.is_skippable_during_scan() => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.remember(&bead, &path);
            if predicates.iter().all(|p| query::matches(p, &bead)) {
                beads.push(bead);
            }
        }

        beads.sort_by(|a, b| {
            a.freeze_time
                .cmp(&b.freeze_time)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        Ok(beads)
    }

    /// Resolve `(name, content_id)` to the archive's path.
    pub fn file_path_for(&self, name: &str, content_id: &str) -> Result<PathBuf> {
        let key = (name.to_string(), content_id.to_string());
        if let Some(path) = self.path_cache.lock().unwrap().get(&key) {
            return Ok(path.clone());
        }

        for path in glob_zip_files(&self.directory, Some(name))? {
            match load_bead(&path, "") {
                Ok(bead) => {
                    self.remember(&bead, &path);
                    if bead.name.as_str() == name && bead.content_id.as_str() == content_id {
                        return Ok(path);
                    }
                }
                Err(e) if e.is_skippable_during_scan() => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BeadError::Lookup(format!(
            "Bead not found: name='{}', content_id='{}'",
            name, content_id
        )))
    }

    /// Seed the cache with a freshly stored archive.
    pub fn note_stored(&self, path: &Path) {
        if let Ok(bead) = load_bead(path, "") {
            self.remember(&bead, path);
        }
    }
}

fn load_bead(path: &Path, box_name: &str) -> Result<Bead> {
    Archive::open(path, box_name)?.bead()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::write_bead_zip;
    use crate::core::query::Query;
    use std::fs;
    use tempfile::TempDir;

    const T1: &str = "20240115T120000000000+0000";
    const T2: &str = "20240116T120000000000+0000";

    #[test]
    fn test_get_beads_skips_junk_files() {
        let dir = TempDir::new().unwrap();
        write_bead_zip(dir.path(), "bead1", "kind-a", T1, &[], "one");
        write_bead_zip(dir.path(), "bead2", "kind-b", T2, &[], "two");
        fs::write(dir.path().join("some-non-bead-file"), b"junk").unwrap();
        fs::write(dir.path().join("junk.zip"), b"not a zip").unwrap();

        let resolver = FsResolver::new(dir.path());
        let beads = resolver.get_beads(&[], "test-box").unwrap();
        assert_eq!(beads.len(), 2);
        // ascending freeze time
        assert_eq!(beads[0].name.as_str(), "bead1");
        assert_eq!(beads[1].name.as_str(), "bead2");
        assert!(beads.iter().all(|b| b.box_name == "test-box"));
    }

    #[test]
    fn test_get_beads_glob_narrowed_by_name() {
        let dir = TempDir::new().unwrap();
        write_bead_zip(dir.path(), "wanted", "kind-a", T1, &[], "one");
        write_bead_zip(dir.path(), "wanted", "kind-a", T2, &[], "two");
        write_bead_zip(dir.path(), "other", "kind-a", T1, &[], "three");

        let resolver = FsResolver::new(dir.path());
        let query = Query::new().by_name("wanted").unwrap();
        let beads = resolver.get_beads(query.predicates(), "test-box").unwrap();
        assert_eq!(beads.len(), 2);
        assert!(beads.iter().all(|b| b.name.as_str() == "wanted"));
    }

    #[test]
    fn test_get_beads_contradictory_names_short_circuit() {
        let dir = TempDir::new().unwrap();
        write_bead_zip(dir.path(), "bead1", "kind-a", T1, &[], "one");

        let resolver = FsResolver::new(dir.path());
        let query = Query::new()
            .by_name("bead1")
            .unwrap()
            .by_name("bead2")
            .unwrap();
        let beads = resolver.get_beads(query.predicates(), "test-box").unwrap();
        assert!(beads.is_empty());
    }

    #[test]
    fn test_file_path_for_and_cache() {
        let dir = TempDir::new().unwrap();
        let (path, content_id) = write_bead_zip(dir.path(), "bead1", "kind-a", T1, &[], "one");

        let resolver = FsResolver::new(dir.path());
        assert_eq!(resolver.file_path_for("bead1", &content_id).unwrap(), path);
        // second lookup is served from the cache even if the file is gone
        fs::remove_file(&path).unwrap();
        assert_eq!(resolver.file_path_for("bead1", &content_id).unwrap(), path);

        assert!(matches!(
            resolver.file_path_for("missing", "whatever").unwrap_err(),
            BeadError::Lookup(_)
        ));
    }

    #[test]
    fn test_note_stored_seeds_cache() {
        let dir = TempDir::new().unwrap();
        let (path, content_id) = write_bead_zip(dir.path(), "bead1", "kind-a", T1, &[], "one");

        let resolver = FsResolver::new(dir.path());
        resolver.note_stored(&path);
        assert!(resolver
            .path_cache
            .lock()
            .unwrap()
            .contains_key(&("bead1".to_string(), content_id)));
    }
}
