use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::core::bead::Bead;
use crate::core::meta::InputSpec;
use crate::error::Result;
use crate::web::bead::WebBead;
use crate::web::cluster::cluster_index;
use crate::web::freshness::Freshness;
use crate::web::graph::{closure, group_by_dest, toposort, Edge, Ref};

/// The provenance web over a set of beads: nodes identified by `Ref`, one
/// edge per input, phantoms filling in referenced-but-missing endpoints.
///
/// Every operation producing a new graph returns a new `Sketch`; clusters
/// are recomputed from the bead set on each use.
#[derive(Debug, Clone)]
pub struct Sketch {
    beads: Vec<WebBead>,
    edges: Vec<Edge>,
    index: HashMap<Ref, usize>,
}

impl Sketch {
    fn assemble(beads: Vec<WebBead>, edges: Vec<Edge>) -> Self {
        let index: HashMap<Ref, usize> = beads
            .iter()
            .enumerate()
            .map(|(position, bead)| (bead.bead_ref(), position))
            .collect();
        debug_assert!(edges
            .iter()
            .all(|e| index.contains_key(&e.src) && index.contains_key(&e.dest)));
        Sketch {
            beads,
            edges,
            index,
        }
    }

    /// Build the web from a sequence of beads (from any source).
    ///
    /// Beads are deduplicated by `Ref`. An input is resolved against the
    /// bead set by `(kind, content_id)`; among several matches the one
    /// named like the input's alias wins. Unresolvable inputs synthesize
    /// phantoms.
    pub fn from_beads(beads: &[Bead]) -> Result<Self> {
        let mut web_beads: Vec<WebBead> = Vec::new();
        let mut index: HashMap<Ref, usize> = HashMap::new();
        for bead in beads {
            let web_bead = WebBead::from_bead(bead);
            let bead_ref = web_bead.bead_ref();
            if !index.contains_key(&bead_ref) {
                index.insert(bead_ref, web_beads.len());
                web_beads.push(web_bead);
            }
        }

        let mut by_kind_content: HashMap<(String, String), Vec<usize>> = HashMap::new();
        for (position, bead) in web_beads.iter().enumerate() {
            by_kind_content
                .entry((bead.kind.clone(), bead.content_id.clone()))
                .or_default()
                .push(position);
        }

        let destinations: Vec<(Ref, Vec<InputSpec>)> = web_beads
            .iter()
            .map(|bead| (bead.bead_ref(), bead.inputs.clone()))
            .collect();

        let mut edges = Vec::new();
        for (dest_ref, inputs) in destinations {
            for spec in inputs {
                let key = (spec.kind.clone(), spec.content_id.clone());
                let src_ref = match by_kind_content.get(&key) {
                    Some(candidates) => {
                        let chosen = candidates
                            .iter()
                            .find(|&&position| web_beads[position].name == spec.name)
                            .or_else(|| candidates.first())
                            .copied()
                            .expect("candidate lists are never empty");
                        web_beads[chosen].bead_ref()
                    }
                    None => {
                        let phantom_ref = Ref::new(&spec.name, &spec.content_id);
                        if !index.contains_key(&phantom_ref) {
                            index.insert(phantom_ref.clone(), web_beads.len());
                            web_beads.push(WebBead::phantom_from_input(&spec)?);
                        }
                        phantom_ref
                    }
                };
                edges.push(Edge::new(src_ref, dest_ref.clone(), spec.name.clone()));
            }
        }

        Ok(Self::assemble(web_beads, edges))
    }

    pub fn beads(&self) -> &[WebBead] {
        &self.beads
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn get(&self, bead_ref: &Ref) -> Option<&WebBead> {
        self.index.get(bead_ref).map(|&position| &self.beads[position])
    }

    /// The head of the named cluster, if the cluster exists.
    pub fn head_of(&self, name: &str) -> Option<&WebBead> {
        cluster_index(&self.beads)
            .get(name)
            .map(|cluster| &self.beads[cluster.head])
    }

    pub fn cluster_names(&self) -> BTreeSet<String> {
        self.beads.iter().map(|bead| bead.name.clone()).collect()
    }

    fn freshness_at(&self, bead_ref: &Ref) -> Freshness {
        self.beads[self.index[bead_ref]].freshness()
    }

    /// Cluster heads plus the sources of their input edges.
    fn heads_restriction(&self) -> (Vec<Ref>, Vec<Edge>) {
        let clusters = cluster_index(&self.beads);
        let head_refs: HashSet<Ref> = clusters
            .values()
            .map(|cluster| self.beads[cluster.head].bead_ref())
            .collect();
        let head_edges: Vec<Edge> = self
            .edges
            .iter()
            .filter(|edge| head_refs.contains(&edge.dest))
            .cloned()
            .collect();

        let mut nodes: BTreeSet<Ref> = head_refs.into_iter().collect();
        for edge in &head_edges {
            nodes.insert(edge.src.clone());
        }
        (nodes.into_iter().collect(), head_edges)
    }

    /// Assign freshness to every bead.
    ///
    /// Non-phantoms reset to `Superseded`, cluster heads to `UpToDate`;
    /// walking the heads-only graph (plus a synthetic sink) in topological
    /// order downgrades any up-to-date head with a stale input source to
    /// `OutOfDate`. Returns whether every cluster head ended up
    /// `UpToDate`, i.e. whether the sink stayed fresh. A cycle among
    /// cluster heads is a typed error.
    pub fn color_beads(&mut self) -> Result<bool> {
        for bead in &mut self.beads {
            bead.set_freshness(Freshness::Superseded);
        }
        let clusters = cluster_index(&self.beads);
        for cluster in clusters.values() {
            self.beads[cluster.head].set_freshness(Freshness::UpToDate);
        }

        let (mut nodes, head_edges) = self.heads_restriction();

        // a name longer than any bead name cannot collide
        let sink_name = "*".repeat(
            1 + self
                .beads
                .iter()
                .map(|bead| bead.name.len())
                .max()
                .unwrap_or(0),
        );
        let sink = Ref::new(sink_name.clone(), sink_name);
        let mut walk_edges = head_edges.clone();
        for node in &nodes {
            walk_edges.push(Edge::new(node.clone(), sink.clone(), ""));
        }
        nodes.push(sink.clone());

        let order = toposort(&nodes, &walk_edges)?;

        let edges_by_dest = group_by_dest(&head_edges);
        let mut sink_freshness = Freshness::UpToDate;
        for node in &order {
            if *node == sink {
                let any_stale = nodes
                    .iter()
                    .filter(|n| **n != sink)
                    .any(|n| self.freshness_at(n) != Freshness::UpToDate);
                if any_stale {
                    sink_freshness = Freshness::OutOfDate;
                }
                continue;
            }
            let position = self.index[node];
            if self.beads[position].freshness() != Freshness::UpToDate {
                continue;
            }
            let has_stale_input = edges_by_dest
                .get(node)
                .map(|incoming| {
                    incoming
                        .iter()
                        .any(|edge| self.freshness_at(&edge.src) != Freshness::UpToDate)
                })
                .unwrap_or(false);
            if has_stale_input {
                self.beads[position].set_freshness(Freshness::OutOfDate);
            }
        }

        Ok(sink_freshness == Freshness::UpToDate)
    }

    /// Cluster graph: names as nodes, an edge when any bead of the source
    /// cluster is referenced by any bead of the destination cluster.
    /// Reachability runs here so source/sink filters traverse stale links.
    fn cluster_edges(&self, reversed: bool) -> BTreeMap<String, BTreeSet<String>> {
        let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for edge in &self.edges {
            let (src, dest) = if reversed {
                (&edge.dest.name, &edge.src.name)
            } else {
                (&edge.src.name, &edge.dest.name)
            };
            graph.entry(src.clone()).or_default().insert(dest.clone());
        }
        graph
    }

    fn restrict_to_names(&self, keep: &BTreeSet<String>) -> Sketch {
        let beads: Vec<WebBead> = self
            .beads
            .iter()
            .filter(|bead| keep.contains(&bead.name))
            .cloned()
            .collect();
        let kept_refs: HashSet<Ref> = beads.iter().map(|bead| bead.bead_ref()).collect();
        let edges: Vec<Edge> = self
            .edges
            .iter()
            .filter(|edge| kept_refs.contains(&edge.src) && kept_refs.contains(&edge.dest))
            .cloned()
            .collect();
        Self::assemble(beads, edges)
    }

    fn filter_beads(&self, keep: impl Fn(&WebBead) -> bool) -> Sketch {
        let beads: Vec<WebBead> = self.beads.iter().filter(|bead| keep(*bead)).cloned().collect();
        let kept_refs: HashSet<Ref> = beads.iter().map(|bead| bead.bead_ref()).collect();
        let edges: Vec<Edge> = self
            .edges
            .iter()
            .filter(|edge| kept_refs.contains(&edge.src) && kept_refs.contains(&edge.dest))
            .cloned()
            .collect();
        Self::assemble(beads, edges)
    }

    /// Drop clusters not connected to any other cluster.
    pub fn simplify(&self) -> Sketch {
        let mut connected = BTreeSet::new();
        for edge in &self.edges {
            if edge.src.name != edge.dest.name {
                connected.insert(edge.src.name.clone());
                connected.insert(edge.dest.name.clone());
            }
        }
        self.restrict_to_names(&connected)
    }

    /// Restrict to cluster heads and their direct inputs.
    pub fn heads(&self) -> Sketch {
        let (nodes, head_edges) = self.heads_restriction();
        let beads = nodes
            .iter()
            .map(|node| self.beads[self.index[node]].clone())
            .collect();
        Self::assemble(beads, head_edges)
    }

    /// Keep only clusters reachable forward from the named ones.
    pub fn set_sources(&self, names: &[&str]) -> Sketch {
        let start: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        let keep = closure(&start, &self.cluster_edges(false));
        self.restrict_to_names(&keep)
    }

    /// Keep only clusters that can reach any of the named ones.
    pub fn set_sinks(&self, names: &[&str]) -> Sketch {
        let start: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        let keep = closure(&start, &self.cluster_edges(true));
        self.restrict_to_names(&keep)
    }

    /// Keep only beads frozen at or after the given instant.
    pub fn drop_before(&self, time: DateTime<Utc>) -> Sketch {
        self.filter_beads(|bead| bead.freeze_time >= time)
    }

    /// Keep only beads frozen at or before the given instant.
    pub fn drop_after(&self, time: DateTime<Utc>) -> Sketch {
        self.filter_beads(|bead| bead.freeze_time <= time)
    }
}
