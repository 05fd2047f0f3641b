use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::{BeadError, Result};

/// Unique identity of a bead within the web.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref {
    pub name: String,
    pub content_id: String,
}

impl Ref {
    pub fn new(name: impl Into<String>, content_id: impl Into<String>) -> Self {
        Ref {
            name: name.into(),
            content_id: content_id.into(),
        }
    }
}

/// A dependency edge: `src` was used as input by `dest`, under the alias
/// carried in `label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub src: Ref,
    pub dest: Ref,
    pub label: String,
}

impl Edge {
    pub fn new(src: Ref, dest: Ref, label: impl Into<String>) -> Self {
        Edge {
            src,
            dest,
            label: label.into(),
        }
    }
}

pub fn group_by_dest<'a>(edges: &'a [Edge]) -> HashMap<&'a Ref, Vec<&'a Edge>> {
    let mut groups: HashMap<&Ref, Vec<&Edge>> = HashMap::new();
    for edge in edges {
        groups.entry(&edge.dest).or_default().push(edge);
    }
    groups
}

/// Forward reachability over a name graph: every node reachable from the
/// start set by following edges src -> dest, the start set included.
pub fn closure(start: &[String], edges_by_src: &BTreeMap<String, BTreeSet<String>>) -> BTreeSet<String> {
    let mut reachable: BTreeSet<String> = start.iter().cloned().collect();
    let mut queue: VecDeque<String> = start.iter().cloned().collect();
    while let Some(node) = queue.pop_front() {
        if let Some(successors) = edges_by_src.get(&node) {
            for next in successors {
                if reachable.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }
    }
    reachable
}

/// Topological order of `nodes` under `edges` (sources before
/// destinations). Edges with an endpoint outside `nodes` are ignored.
/// A cycle is a typed error naming one node on it.
pub fn toposort(nodes: &[Ref], edges: &[Edge]) -> Result<Vec<Ref>> {
    let node_set: HashSet<&Ref> = nodes.iter().collect();
    let mut indegree: BTreeMap<&Ref, usize> = nodes.iter().map(|n| (n, 0)).collect();
    let mut successors: HashMap<&Ref, Vec<&Ref>> = HashMap::new();

    for edge in edges {
        if !node_set.contains(&edge.src) || !node_set.contains(&edge.dest) {
            continue;
        }
        *indegree.get_mut(&edge.dest).unwrap() += 1;
        successors.entry(&edge.src).or_default().push(&edge.dest);
    }

    // BTreeMap iteration keeps the initial frontier, and with it the whole
    // order, deterministic.
    let mut queue: VecDeque<&Ref> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(node) = queue.pop_front() {
        order.push(node.clone());
        if let Some(nexts) = successors.get(node) {
            for &next in nexts {
                let degree = indegree.get_mut(next).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = indegree
            .iter()
            .find(|(_, degree)| **degree > 0)
            .map(|(node, _)| node.name.clone())
            .unwrap_or_default();
        return Err(BeadError::Cycle(stuck));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(name: &str) -> Ref {
        Ref::new(name, format!("cid-{}", name))
    }

    fn e(src: &str, dest: &str) -> Edge {
        Edge::new(r(src), r(dest), "input")
    }

    #[test]
    fn test_toposort_linear_chain() {
        let nodes = vec![r("c"), r("a"), r("b")];
        let edges = vec![e("a", "b"), e("b", "c")];
        let order = toposort(&nodes, &edges).unwrap();
        assert_eq!(order, vec![r("a"), r("b"), r("c")]);
    }

    #[test]
    fn test_toposort_respects_all_edges() {
        let nodes = vec![r("sink"), r("a"), r("b"), r("c")];
        let edges = vec![e("a", "sink"), e("b", "sink"), e("c", "sink"), e("a", "b")];
        let order = toposort(&nodes, &edges).unwrap();
        let position = |name: &str| order.iter().position(|n| n.name == name).unwrap();
        assert!(position("a") < position("b"));
        assert_eq!(position("sink"), 3);
    }

    #[test]
    fn test_toposort_detects_cycle() {
        let nodes = vec![r("a"), r("b"), r("c")];
        let edges = vec![e("a", "b"), e("b", "c"), e("c", "a")];
        assert!(matches!(
            toposort(&nodes, &edges).unwrap_err(),
            BeadError::Cycle(_)
        ));
    }

    #[test]
    fn test_toposort_ignores_foreign_edges() {
        let nodes = vec![r("a"), r("b")];
        let edges = vec![e("a", "b"), e("outsider", "a")];
        let order = toposort(&nodes, &edges).unwrap();
        assert_eq!(order, vec![r("a"), r("b")]);
    }

    #[test]
    fn test_closure_one_path() {
        let mut edges_by_src: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (src, dest) in [("a", "b"), ("b", "c"), ("c", "d"), ("d", "e")] {
            edges_by_src
                .entry(src.to_string())
                .or_default()
                .insert(dest.to_string());
        }

        let reachable = closure(&["c".to_string()], &edges_by_src);
        let expected: BTreeSet<String> =
            ["c", "d", "e"].iter().map(|s| s.to_string()).collect();
        assert_eq!(reachable, expected);
    }

    #[test]
    fn test_closure_multiple_starts() {
        let mut edges_by_src: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (src, dest) in [("a1", "b1"), ("a2", "b2")] {
            edges_by_src
                .entry(src.to_string())
                .or_default()
                .insert(dest.to_string());
        }

        let reachable = closure(&["a1".to_string(), "a2".to_string()], &edges_by_src);
        assert_eq!(reachable.len(), 4);
    }

    #[test]
    fn test_closure_tolerates_loops() {
        let mut edges_by_src: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (src, dest) in [("a", "b"), ("b", "c"), ("c", "a")] {
            edges_by_src
                .entry(src.to_string())
                .or_default()
                .insert(dest.to_string());
        }

        let reachable = closure(&["b".to_string()], &edges_by_src);
        assert_eq!(reachable.len(), 3);
    }
}
