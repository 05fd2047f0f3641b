//! End-to-end scenarios over the public API: freeze workspaces into boxes,
//! query them back, reconcile out-of-band changes, color the web.

use std::fs;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

use bead::core::query::search_boxes;
use bead::core::{Box as BeadBox, InputSpec, Workspace};
use bead::tech::timestamp::parse_timestamp;
use bead::web::{Freshness, Ref, Sketch};

const T1: &str = "20240115T120000000000+0000";
const T2: &str = "20240116T120000000000+0000";
const T3: &str = "20240117T120000000000+0000";

fn workspace(root: &TempDir, name: &str, kind: &str, output: &str) -> Workspace {
    let workspace =
        Workspace::create_with_kind(root.path().join(name), kind.to_string()).unwrap();
    fs::write(workspace.directory.join("output/result.txt"), output).unwrap();
    workspace
}

#[test]
fn store_then_query_round_trip() {
    let box_dir = TempDir::new().unwrap();
    let ws_root = TempDir::new().unwrap();
    let bead_box = BeadBox::new("main", box_dir.path()).unwrap();

    for (name, time) in [("bead1", T1), ("bead2", T2), ("BEAD3", T3)] {
        let ws = workspace(&ws_root, name, &format!("kind-{}", name), name);
        bead_box.store(&ws, time).unwrap();
        box_dir
            .child(format!("{}_{}.zip", name, time))
            .assert(predicate::path::is_file());
    }
    box_dir
        .child(".index.sqlite")
        .assert(predicate::path::is_file());

    let all = bead_box.search().all().unwrap();
    assert_eq!(all.len(), 3);
    let names: Vec<&str> = all.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, ["bead1", "bead2", "BEAD3"]);

    let newest = bead_box
        .search()
        .by_name("BEAD3")
        .unwrap()
        .at_or_older(parse_timestamp(T3).unwrap())
        .newest()
        .unwrap();
    assert_eq!(newest.name.as_str(), "BEAD3");

    // the stored archive opens, validates and extracts
    let archive = bead_box.resolve(&newest).unwrap();
    archive.validate().unwrap();
    let extraction = TempDir::new().unwrap();
    archive.unpack_data_to(extraction.path()).unwrap();
    extraction
        .child("result.txt")
        .assert(predicate::str::contains("BEAD3"));
}

#[test]
fn junk_files_are_ignored() {
    let box_dir = TempDir::new().unwrap();
    let ws_root = TempDir::new().unwrap();
    let bead_box = BeadBox::new("main", box_dir.path()).unwrap();

    for (name, time) in [("bead1", T1), ("bead2", T2)] {
        let ws = workspace(&ws_root, name, name, name);
        bead_box.store(&ws, time).unwrap();
    }
    box_dir.child("some-non-bead-file").write_str("junk").unwrap();
    box_dir.child("broken.zip").write_str("not a zip").unwrap();
    bead_box.sync_index().unwrap().run().unwrap();

    assert_eq!(bead_box.all_beads().unwrap().len(), 2);
}

#[test]
fn sync_reconciles_out_of_band_changes() {
    let box_dir = TempDir::new().unwrap();
    let ws_root = TempDir::new().unwrap();
    let bead_box = BeadBox::new("main", box_dir.path()).unwrap();

    let ws1 = workspace(&ws_root, "keeper", "kind-keeper", "kept");
    let ws2 = workspace(&ws_root, "goner", "kind-goner", "gone");
    bead_box.store(&ws1, T1).unwrap();
    let stored = bead_box.store(&ws2, T2).unwrap();

    fs::remove_file(&stored).unwrap();
    bead_box.sync_index().unwrap().run().unwrap();

    let names: Vec<String> = bead_box
        .all_beads()
        .unwrap()
        .iter()
        .map(|b| b.name.to_string())
        .collect();
    assert_eq!(names, ["keeper"]);

    // a second sync changes nothing
    bead_box.sync_index().unwrap().run().unwrap();
    assert_eq!(bead_box.all_beads().unwrap().len(), 1);
}

#[test]
fn multi_box_failover_and_freshness_web() {
    let dir1 = TempDir::new().unwrap();
    let dir2 = TempDir::new().unwrap();
    let ws_root = TempDir::new().unwrap();

    let box1 = BeadBox::new("box1", dir1.path()).unwrap();
    let box2 = BeadBox::new("box2", dir2.path()).unwrap();

    // an upstream bead and its newer revision live in box1
    let upstream_v1 = workspace(&ws_root, "upstream", "upstream-kind", "v1");
    box1.store(&upstream_v1, T1).unwrap();
    let v1 = box1.search().first().unwrap();

    // same bead name, changed output, frozen later
    let later_root = TempDir::new().unwrap();
    let upstream_v2 = workspace(&later_root, "upstream", "upstream-kind", "v2 payload");
    box1.store(&upstream_v2, T3).unwrap();

    // the consumer (in box2) references the OLD upstream version
    let mut consumer = workspace(&ws_root, "consumer", "consumer-kind", "report");
    consumer
        .add_input(
            "upstream",
            InputSpec::new(
                "upstream".to_string(),
                v1.kind.clone(),
                v1.content_id.as_str().to_string(),
                v1.freeze_time_str.clone(),
            ),
        )
        .unwrap();
    box2.store(&consumer, T2).unwrap();

    // multi-box first(): box1 has no consumer-kind, box2 does
    let boxes = vec![box1, box2];
    let found = search_boxes(&boxes)
        .by_kind("consumer-kind")
        .unwrap()
        .first()
        .unwrap();
    assert_eq!(found.name.as_str(), "consumer");
    assert_eq!(found.box_name, "box2");

    // the web over both boxes: upstream head fresh, consumer out of date
    let mut beads = Vec::new();
    for b in &boxes {
        beads.extend(b.all_beads().unwrap());
    }
    let mut sketch = Sketch::from_beads(&beads).unwrap();
    let all_fresh = sketch.color_beads().unwrap();
    assert!(!all_fresh);

    assert_eq!(
        sketch.head_of("upstream").unwrap().freshness(),
        Freshness::UpToDate
    );
    assert_eq!(
        sketch.head_of("consumer").unwrap().freshness(),
        Freshness::OutOfDate
    );
    let old_upstream = sketch
        .get(&Ref::new("upstream", v1.content_id.as_str()))
        .unwrap();
    assert_eq!(old_upstream.freshness(), Freshness::Superseded);
}

#[test]
fn directory_scan_agrees_with_index() {
    let box_dir = TempDir::new().unwrap();
    let ws_root = TempDir::new().unwrap();
    let indexed = BeadBox::new("main", box_dir.path()).unwrap();

    for (name, time) in [("alpha", T1), ("beta", T2), ("alpha2", T3)] {
        let ws = workspace(&ws_root, name, "shared-kind", name);
        indexed.store(&ws, time).unwrap();
    }

    let scanning = BeadBox::with_directory_scan("main", box_dir.path()).unwrap();
    assert_eq!(
        indexed.search().all().unwrap(),
        scanning.search().all().unwrap()
    );
    assert_eq!(
        indexed
            .search()
            .by_kind("shared-kind")
            .unwrap()
            .newest()
            .unwrap(),
        scanning
            .search()
            .by_kind("shared-kind")
            .unwrap()
            .newest()
            .unwrap()
    );
}
