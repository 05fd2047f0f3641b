use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::FileOptions;

use crate::core::archive::layout as archive_layout;
use crate::core::meta::{BeadMeta, BeadName, InputName, InputSpec};
use crate::error::{BeadError, Result};
use crate::tech::{persistence, securehash};

/// Layout constants for workspace directories
pub mod layout {
    pub const INPUT: &str = "input";
    pub const OUTPUT: &str = "output";
    pub const TEMP: &str = "temp";
    pub const META_DIR: &str = ".bead-meta";
    pub const BEAD_META: &str = ".bead-meta/bead";
}

/// An editable directory a bead can be frozen from.
///
/// Everything except `input/`, `output/`, `temp/` and `.bead-meta/` counts as
/// code; `output/` holds the computation's results.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub directory: PathBuf,
    pub meta: BeadMeta,
}

impl Workspace {
    /// Create a new workspace with a freshly generated kind.
    pub fn create(directory: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_kind(directory, Uuid::new_v4().to_string())
    }

    /// Create a new workspace for an already established kind.
    pub fn create_with_kind(directory: impl AsRef<Path>, kind: String) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();

        if directory.exists() {
            return Err(BeadError::InvalidWorkspace(format!(
                "Directory already exists: {}",
                directory.display()
            )));
        }

        fs::create_dir_all(&directory)?;
        fs::create_dir(directory.join(layout::INPUT))?;
        fs::create_dir(directory.join(layout::OUTPUT))?;
        fs::create_dir(directory.join(layout::TEMP))?;
        fs::create_dir(directory.join(layout::META_DIR))?;

        let meta = BeadMeta::new_workspace(kind);
        persistence::save_json(&meta, &directory.join(layout::BEAD_META))?;

        Ok(Workspace { directory, meta })
    }

    /// Open an existing workspace
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();

        if !Self::is_valid(&directory) {
            return Err(BeadError::InvalidWorkspace(format!(
                "Not a valid workspace: {}",
                directory.display()
            )));
        }

        let meta = persistence::load_json(&directory.join(layout::BEAD_META))?;
        Ok(Workspace { directory, meta })
    }

    /// Check if a directory is a valid workspace
    pub fn is_valid(directory: impl AsRef<Path>) -> bool {
        let dir = directory.as_ref();
        dir.join(layout::OUTPUT).is_dir() && dir.join(layout::BEAD_META).is_file()
    }

    /// The bead name of this workspace (its directory name).
    pub fn name(&self) -> Result<BeadName> {
        let name = self
            .directory
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                BeadError::InvalidWorkspace(format!(
                    "Cannot determine workspace name: {}",
                    self.directory.display()
                ))
            })?;
        BeadName::new(name)
    }

    pub fn kind(&self) -> &str {
        &self.meta.kind
    }

    pub fn inputs(&self) -> &[InputSpec] {
        &self.meta.inputs
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.meta.has_input(name)
    }

    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.meta.input(name)
    }

    /// Record a dependency on another bead under a local alias.
    pub fn add_input(&mut self, name: &str, spec: InputSpec) -> Result<()> {
        let name = InputName::new(name)?;
        if self.has_input(name.as_str()) {
            return Err(BeadError::Value(format!(
                "Input '{}' already exists",
                name
            )));
        }
        let mut spec = spec;
        spec.name = name.as_str().to_string();
        self.meta.add_input(spec);
        self.save_meta()
    }

    /// Forget a dependency.
    pub fn delete_input(&mut self, name: &str) -> Result<()> {
        if self.meta.remove_input(name).is_none() {
            return Err(BeadError::Value(format!(
                "Input '{}' does not exist",
                name
            )));
        }
        self.save_meta()
    }

    fn save_meta(&self) -> Result<()> {
        persistence::save_json(&self.meta, &self.directory.join(layout::BEAD_META))
    }

    /// Freeze this workspace into a bead archive.
    ///
    /// Code files land under `code/`, output files under `data/`; the
    /// per-file digests go to `meta/manifest` and the content id derived from
    /// them and the core metadata fields goes to `meta/bead`. Identical
    /// content frozen at the identical time yields the identical content id.
    pub fn pack(&self, zip_path: impl AsRef<Path>, freeze_time: &str, comment: &str) -> Result<PathBuf> {
        let zip_path = zip_path.as_ref().to_path_buf();
        if zip_path.exists() {
            return Err(BeadError::Box(format!(
                "Archive already exists: {}",
                zip_path.display()
            )));
        }

        let code_files = self.collect_code_files()?;
        let data_files = self.collect_data_files()?;

        let mut manifest = BTreeMap::new();
        for (zip_name, fs_path) in code_files.iter().chain(data_files.iter()) {
            manifest.insert(zip_name.clone(), securehash::hash_file(fs_path)?);
        }

        let content_id =
            securehash::content_id(&manifest, self.kind(), freeze_time, &self.meta.inputs);
        let meta = BeadMeta::new_frozen(
            self.kind().to_string(),
            self.name()?,
            freeze_time.to_string(),
            content_id,
            self.meta.inputs.clone(),
        );

        let file = File::create(&zip_path)?;
        let mut zip = zip::ZipWriter::new(file);
        zip.set_comment(comment);

        persistence::save_json_to_zip(&mut zip, &meta, archive_layout::BEAD_META)?;
        persistence::save_json_to_zip(&mut zip, &manifest, archive_layout::MANIFEST)?;

        for (zip_name, fs_path) in code_files.iter().chain(data_files.iter()) {
            zip.start_file(zip_name.as_str(), FileOptions::default())?;
            let mut source = File::open(fs_path)?;
            io::copy(&mut source, &mut zip)?;
        }

        zip.finish()?;
        Ok(zip_path)
    }

    fn collect_code_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let excluded = [layout::INPUT, layout::OUTPUT, layout::TEMP, layout::META_DIR];
        let mut files = Vec::new();

        let walk = WalkDir::new(&self.directory)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                // prune the special top-level directories
                !(entry.depth() == 1
                    && excluded.iter().any(|name| entry.file_name() == *name))
            });
        for entry in walk {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.directory)
                .expect("walked path is under the workspace");
            files.push((
                format!("{}/{}", archive_layout::CODE_DIR, zip_entry_name(relative)?),
                entry.path().to_path_buf(),
            ));
        }
        files.sort();
        Ok(files)
    }

    fn collect_data_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let output_dir = self.directory.join(layout::OUTPUT);
        let mut files = Vec::new();
        for entry in WalkDir::new(&output_dir).min_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&output_dir)
                .expect("walked path is under output");
            files.push((
                format!("{}/{}", archive_layout::DATA_DIR, zip_entry_name(relative)?),
                entry.path().to_path_buf(),
            ));
        }
        files.sort();
        Ok(files)
    }
}

/// Forward-slash archive entry name for a relative path.
fn zip_entry_name(relative: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| {
                        BeadError::Value(format!("Non-UTF8 file name: {}", relative.display()))
                    })?
                    .to_string(),
            ),
            _ => {
                return Err(BeadError::Value(format!(
                    "Unexpected path component in {}",
                    relative.display()
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archive::Archive;
    use tempfile::TempDir;

    const FREEZE_TIME: &str = "20240115T120000000000+0000";

    fn create_test_workspace() -> (TempDir, Workspace) {
        let temp_dir = TempDir::new().unwrap();
        let workspace_path = temp_dir.path().join("test-workspace");
        let workspace =
            Workspace::create_with_kind(&workspace_path, "test-kind".to_string()).unwrap();
        (temp_dir, workspace)
    }

    fn spec(name: &str) -> InputSpec {
        InputSpec::new(
            name.to_string(),
            "input-kind".to_string(),
            "content123".to_string(),
            FREEZE_TIME.to_string(),
        )
    }

    #[test]
    fn test_workspace_creation() {
        let temp_dir = TempDir::new().unwrap();
        let workspace_path = temp_dir.path().join("test-workspace");

        let workspace =
            Workspace::create_with_kind(&workspace_path, "test-kind".to_string()).unwrap();

        assert!(workspace_path.join(layout::INPUT).is_dir());
        assert!(workspace_path.join(layout::OUTPUT).is_dir());
        assert!(workspace_path.join(layout::TEMP).is_dir());
        assert!(workspace_path.join(layout::BEAD_META).is_file());
        assert_eq!(workspace.kind(), "test-kind");
        assert_eq!(workspace.name().unwrap().as_str(), "test-workspace");
    }

    #[test]
    fn test_workspace_create_generates_kind() {
        let temp_dir = TempDir::new().unwrap();
        let ws1 = Workspace::create(temp_dir.path().join("ws1")).unwrap();
        let ws2 = Workspace::create(temp_dir.path().join("ws2")).unwrap();
        assert!(!ws1.kind().is_empty());
        assert_ne!(ws1.kind(), ws2.kind());
    }

    #[test]
    fn test_workspace_already_exists() {
        let (_temp_dir, workspace) = create_test_workspace();
        let result = Workspace::create_with_kind(&workspace.directory, "other".to_string());
        assert!(matches!(
            result.unwrap_err(),
            BeadError::InvalidWorkspace(_)
        ));
    }

    #[test]
    fn test_workspace_open_and_validity() {
        let (_temp_dir, workspace) = create_test_workspace();
        let opened = Workspace::open(&workspace.directory).unwrap();
        assert_eq!(opened.kind(), "test-kind");

        let temp_dir = TempDir::new().unwrap();
        assert!(!Workspace::is_valid(temp_dir.path()));
        assert!(Workspace::open(temp_dir.path()).is_err());
    }

    #[test]
    fn test_workspace_input_metadata() {
        let (_temp_dir, mut workspace) = create_test_workspace();

        workspace.add_input("dep1", spec("dep1")).unwrap();
        assert!(workspace.has_input("dep1"));
        assert_eq!(workspace.input("dep1").unwrap().content_id, "content123");

        // duplicates and invalid names are rejected
        assert!(workspace.add_input("dep1", spec("dep1")).is_err());
        assert!(workspace.add_input("../parent", spec("x")).is_err());

        // inputs persist across reopen
        let reopened = Workspace::open(&workspace.directory).unwrap();
        assert!(reopened.has_input("dep1"));

        workspace.delete_input("dep1").unwrap();
        assert!(!workspace.has_input("dep1"));
        assert!(workspace.delete_input("dep1").is_err());
    }

    #[test]
    fn test_pack_layout() {
        let (_temp_dir, workspace) = create_test_workspace();
        fs::write(workspace.directory.join("run.py"), "print('hi')").unwrap();
        fs::create_dir(workspace.directory.join("lib")).unwrap();
        fs::write(workspace.directory.join("lib/helper.py"), "x = 1").unwrap();
        fs::write(workspace.directory.join("output/result.csv"), "a,b\n1,2\n").unwrap();
        fs::write(workspace.directory.join("temp/scratch"), "ignored").unwrap();

        let target = TempDir::new().unwrap();
        let zip_path = target.path().join(format!("test-workspace_{}.zip", FREEZE_TIME));
        workspace.pack(&zip_path, FREEZE_TIME, "a comment").unwrap();

        let archive = Archive::open(&zip_path, "test-box").unwrap();
        archive.validate().unwrap();

        let unpacked = TempDir::new().unwrap();
        archive.unpack_code_to(unpacked.path()).unwrap();
        assert!(unpacked.path().join("run.py").exists());
        assert!(unpacked.path().join("lib/helper.py").exists());
        assert!(!unpacked.path().join("scratch").exists());

        let data = TempDir::new().unwrap();
        archive.unpack_data_to(data.path()).unwrap();
        assert_eq!(
            fs::read_to_string(data.path().join("result.csv")).unwrap(),
            "a,b\n1,2\n"
        );
    }

    #[test]
    fn test_pack_content_id_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let workspace =
            Workspace::create_with_kind(temp_dir.path().join("stable"), "k1".to_string()).unwrap();
        fs::write(workspace.directory.join("output/out.txt"), "same output").unwrap();

        let target = TempDir::new().unwrap();
        let zip1 = target.path().join("first.zip");
        let zip2 = target.path().join("second.zip");
        workspace.pack(&zip1, FREEZE_TIME, "comment").unwrap();
        workspace.pack(&zip2, FREEZE_TIME, "comment").unwrap();

        let id1 = Archive::open(&zip1, "b").unwrap().content_id().unwrap();
        let id2 = Archive::open(&zip2, "b").unwrap().content_id().unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_pack_content_id_tracks_content_and_time() {
        let temp_dir = TempDir::new().unwrap();
        let workspace =
            Workspace::create_with_kind(temp_dir.path().join("w"), "k1".to_string()).unwrap();
        fs::write(workspace.directory.join("output/out.txt"), "v1").unwrap();

        let target = TempDir::new().unwrap();
        let zip1 = target.path().join("v1.zip");
        workspace.pack(&zip1, FREEZE_TIME, "comment").unwrap();

        // same content, later freeze time
        let zip2 = target.path().join("v1-later.zip");
        workspace
            .pack(&zip2, "20240116T120000000000+0000", "comment")
            .unwrap();

        // changed content, original freeze time
        fs::write(workspace.directory.join("output/out.txt"), "v2").unwrap();
        let zip3 = target.path().join("v2.zip");
        workspace.pack(&zip3, FREEZE_TIME, "comment").unwrap();

        let id1 = Archive::open(&zip1, "b").unwrap().content_id().unwrap();
        let id2 = Archive::open(&zip2, "b").unwrap().content_id().unwrap();
        let id3 = Archive::open(&zip3, "b").unwrap().content_id().unwrap();
        assert_ne!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_pack_refuses_overwrite() {
        let (_temp_dir, workspace) = create_test_workspace();
        let target = TempDir::new().unwrap();
        let zip_path = target.path().join("dup.zip");
        workspace.pack(&zip_path, FREEZE_TIME, "comment").unwrap();
        assert!(matches!(
            workspace.pack(&zip_path, FREEZE_TIME, "comment").unwrap_err(),
            BeadError::Box(_)
        ));
    }

    #[test]
    fn test_pack_records_inputs_in_meta() {
        let (_temp_dir, mut workspace) = create_test_workspace();
        workspace.add_input("dep1", spec("dep1")).unwrap();

        let target = TempDir::new().unwrap();
        let zip_path = target.path().join("with-inputs.zip");
        workspace.pack(&zip_path, FREEZE_TIME, "comment").unwrap();

        let archive = Archive::open(&zip_path, "b").unwrap();
        let inputs = archive.inputs().unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].name, "dep1");
        archive.validate().unwrap();
    }
}
