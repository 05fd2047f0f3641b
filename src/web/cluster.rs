use std::collections::BTreeMap;

use crate::web::bead::WebBead;

/// The beads sharing one name, with the head-of-cluster rule applied.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    /// Indices into the sketch's bead list.
    pub members: Vec<usize>,
    /// The member with the maximum freeze time, ties broken by
    /// lexicographic content id.
    pub head: usize,
}

/// Partition beads by name. Recomputed from the bead set on each use; the
/// sketch holds no derived mutable state.
pub fn cluster_index(beads: &[WebBead]) -> BTreeMap<String, Cluster> {
    let mut members_by_name: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (position, bead) in beads.iter().enumerate() {
        members_by_name
            .entry(bead.name.clone())
            .or_default()
            .push(position);
    }

    members_by_name
        .into_iter()
        .map(|(name, members)| {
            let head = *members
                .iter()
                .max_by(|&&a, &&b| {
                    (beads[a].freeze_time, &beads[a].content_id)
                        .cmp(&(beads[b].freeze_time, &beads[b].content_id))
                })
                .expect("clusters are built from at least one bead");
            (
                name.clone(),
                Cluster {
                    name,
                    members,
                    head,
                },
            )
        })
        .collect()
}
