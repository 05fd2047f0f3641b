//! Test fixtures: hand-assembled bead archives with consistent digests.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::FileOptions;

use crate::core::archive::layout;
use crate::core::meta::{BeadMeta, BeadName, InputSpec};
use crate::tech::{persistence, securehash};

/// Write a valid bead archive into `dir` and return its path and content id.
pub(crate) fn write_bead_zip(
    dir: &Path,
    name: &str,
    kind: &str,
    freeze_time: &str,
    inputs: &[InputSpec],
    payload: &str,
) -> (PathBuf, String) {
    let entry_name = "data/output.txt";
    let mut manifest = BTreeMap::new();
    manifest.insert(
        entry_name.to_string(),
        securehash::hash_bytes(payload.as_bytes()),
    );

    let mut inputs = inputs.to_vec();
    inputs.sort_by(|a, b| a.name.cmp(&b.name));
    let content_id = securehash::content_id(&manifest, kind, freeze_time, &inputs);
    let meta = BeadMeta::new_frozen(
        kind.to_string(),
        BeadName::new(name).unwrap(),
        freeze_time.to_string(),
        content_id.clone(),
        inputs,
    );

    let path = dir.join(format!("{}_{}.zip", name, freeze_time));
    let file = File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    persistence::save_json_to_zip(&mut zip, &meta, layout::BEAD_META).unwrap();
    persistence::save_json_to_zip(&mut zip, &manifest, layout::MANIFEST).unwrap();
    zip.start_file(entry_name, FileOptions::default()).unwrap();
    zip.write_all(payload.as_bytes()).unwrap();
    zip.finish().unwrap();

    (path, content_id)
}

/// Write an archive whose declared content id disagrees with its content.
pub(crate) fn write_tampered_bead_zip(dir: &Path, name: &str, freeze_time: &str) -> PathBuf {
    let entry_name = "data/output.txt";
    let payload = b"tampered payload";
    let mut manifest = BTreeMap::new();
    manifest.insert(entry_name.to_string(), securehash::hash_bytes(payload));

    let meta = BeadMeta::new_frozen(
        "tampered-kind".to_string(),
        BeadName::new(name).unwrap(),
        freeze_time.to_string(),
        "declared-content-id-that-does-not-match".to_string(),
        vec![],
    );

    let path = dir.join(format!("{}_{}.zip", name, freeze_time));
    let file = File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    persistence::save_json_to_zip(&mut zip, &meta, layout::BEAD_META).unwrap();
    persistence::save_json_to_zip(&mut zip, &manifest, layout::MANIFEST).unwrap();
    zip.start_file(entry_name, FileOptions::default()).unwrap();
    zip.write_all(payload).unwrap();
    zip.finish().unwrap();

    path
}
