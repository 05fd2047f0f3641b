use chrono::{DateTime, Utc};
use log::debug;

use crate::core::bead::Bead;
use crate::core::box_store::Box;
use crate::error::{BeadError, Result};

/// The closed set of query predicates. String predicates compare for
/// equality; time predicates compare parsed instants, never strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    BeadName(String),
    Kind(String),
    ContentId(String),
    AtTime(DateTime<Utc>),
    NewerThan(DateTime<Utc>),
    OlderThan(DateTime<Utc>),
    AtOrNewer(DateTime<Utc>),
    AtOrOlder(DateTime<Utc>),
}

/// Evaluate one predicate against a bead.
pub fn matches(predicate: &Predicate, bead: &Bead) -> bool {
    match predicate {
        Predicate::BeadName(name) => bead.name.as_str() == name,
        Predicate::Kind(kind) => &bead.kind == kind,
        Predicate::ContentId(content_id) => bead.content_id.as_str() == content_id,
        Predicate::AtTime(time) => bead.freeze_time == *time,
        Predicate::NewerThan(time) => bead.freeze_time > *time,
        Predicate::OlderThan(time) => bead.freeze_time < *time,
        Predicate::AtOrNewer(time) => bead.freeze_time >= *time,
        Predicate::AtOrOlder(time) => bead.freeze_time <= *time,
    }
}

/// True when two name predicates can never agree; such a query is empty
/// without touching storage.
pub(crate) fn names_contradict(predicates: &[Predicate]) -> bool {
    let mut names = predicates.iter().filter_map(|p| match p {
        Predicate::BeadName(name) => Some(name.as_str()),
        _ => None,
    });
    match names.next() {
        None => false,
        Some(first) => names.any(|name| name != first),
    }
}

/// The single name all name predicates agree on, if any name predicate is
/// present. Directs the filesystem resolver's glob.
pub(crate) fn single_name(predicates: &[Predicate]) -> Option<&str> {
    if names_contradict(predicates) {
        return None;
    }
    predicates.iter().find_map(|p| match p {
        Predicate::BeadName(name) => Some(name.as_str()),
        _ => None,
    })
}

/// Immutable-by-append predicate accumulator with the two orthogonal query
/// flags: the uniqueness filter and (via the terminal methods of the search
/// drivers) the ordinal selector.
#[derive(Debug, Clone, Default)]
pub struct Query {
    predicates: Vec<Predicate>,
    unique: bool,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    fn nonempty(value: &str, what: &str) -> Result<()> {
        if value.is_empty() {
            return Err(BeadError::Value(format!("Empty {} in query", what)));
        }
        Ok(())
    }

    pub fn by_name(self, name: &str) -> Result<Self> {
        Self::nonempty(name, "bead name")?;
        Ok(self.with(Predicate::BeadName(name.to_string())))
    }

    pub fn by_kind(self, kind: &str) -> Result<Self> {
        Self::nonempty(kind, "kind")?;
        Ok(self.with(Predicate::Kind(kind.to_string())))
    }

    pub fn by_content_id(self, content_id: &str) -> Result<Self> {
        Self::nonempty(content_id, "content id")?;
        Ok(self.with(Predicate::ContentId(content_id.to_string())))
    }

    pub fn at_time(self, time: DateTime<Utc>) -> Self {
        self.with(Predicate::AtTime(time))
    }

    pub fn newer_than(self, time: DateTime<Utc>) -> Self {
        self.with(Predicate::NewerThan(time))
    }

    pub fn older_than(self, time: DateTime<Utc>) -> Self {
        self.with(Predicate::OlderThan(time))
    }

    pub fn at_or_newer(self, time: DateTime<Utc>) -> Self {
        self.with(Predicate::AtOrNewer(time))
    }

    pub fn at_or_older(self, time: DateTime<Utc>) -> Self {
        self.with(Predicate::AtOrOlder(time))
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Conjunction of all predicates.
    pub fn matches(&self, bead: &Bead) -> bool {
        self.predicates.iter().all(|p| matches(p, bead))
    }

    /// Keep the first occurrence per content id, preserving retrieval order.
    pub(crate) fn apply_unique(&self, beads: Vec<Bead>) -> Vec<Bead> {
        if !self.unique {
            return beads;
        }
        let mut seen = std::collections::HashSet::new();
        beads
            .into_iter()
            .filter(|bead| seen.insert(bead.content_id.clone()))
            .collect()
    }
}

fn no_beads() -> BeadError {
    BeadError::Lookup("No matching bead".to_string())
}

fn sort_ascending(beads: &mut [Bead]) {
    beads.sort_by(|a, b| {
        a.freeze_time
            .cmp(&b.freeze_time)
            .then_with(|| a.content_id.cmp(&b.content_id))
    });
}

pub(crate) fn select_first(beads: Vec<Bead>) -> Result<Bead> {
    beads.into_iter().next().ok_or_else(no_beads)
}

pub(crate) fn select_oldest(mut beads: Vec<Bead>) -> Result<Bead> {
    sort_ascending(&mut beads);
    beads.into_iter().next().ok_or_else(no_beads)
}

pub(crate) fn select_newest(mut beads: Vec<Bead>) -> Result<Bead> {
    sort_ascending(&mut beads);
    beads.into_iter().last().ok_or_else(no_beads)
}

/// `n`-th bead sorted ascending by freeze time (0 = oldest).
pub(crate) fn select_newer(mut beads: Vec<Bead>, n: usize) -> Result<Bead> {
    sort_ascending(&mut beads);
    let found = beads.len();
    beads.into_iter().nth(n).ok_or_else(|| {
        BeadError::Lookup(format!(
            "Not enough beads found (requested index {}, found {})",
            n, found
        ))
    })
}

/// `n`-th bead sorted descending by freeze time (0 = newest).
pub(crate) fn select_older(mut beads: Vec<Bead>, n: usize) -> Result<Bead> {
    sort_ascending(&mut beads);
    beads.reverse();
    let found = beads.len();
    beads.into_iter().nth(n).ok_or_else(|| {
        BeadError::Lookup(format!(
            "Not enough beads found (requested index {}, found {})",
            n, found
        ))
    })
}

/// Fluent search over a single box.
#[derive(Debug, Clone)]
pub struct BoxSearch<'a> {
    target: &'a Box,
    query: Query,
}

impl<'a> BoxSearch<'a> {
    pub(crate) fn new(target: &'a Box) -> Self {
        BoxSearch {
            target,
            query: Query::new(),
        }
    }

    pub fn by_name(mut self, name: &str) -> Result<Self> {
        self.query = self.query.by_name(name)?;
        Ok(self)
    }

    pub fn by_kind(mut self, kind: &str) -> Result<Self> {
        self.query = self.query.by_kind(kind)?;
        Ok(self)
    }

    pub fn by_content_id(mut self, content_id: &str) -> Result<Self> {
        self.query = self.query.by_content_id(content_id)?;
        Ok(self)
    }

    pub fn at_time(mut self, time: DateTime<Utc>) -> Self {
        self.query = self.query.at_time(time);
        self
    }

    pub fn newer_than(mut self, time: DateTime<Utc>) -> Self {
        self.query = self.query.newer_than(time);
        self
    }

    pub fn older_than(mut self, time: DateTime<Utc>) -> Self {
        self.query = self.query.older_than(time);
        self
    }

    pub fn at_or_newer(mut self, time: DateTime<Utc>) -> Self {
        self.query = self.query.at_or_newer(time);
        self
    }

    pub fn at_or_older(mut self, time: DateTime<Utc>) -> Self {
        self.query = self.query.at_or_older(time);
        self
    }

    pub fn unique(mut self) -> Self {
        self.query = self.query.unique();
        self
    }

    fn matching_beads(&self) -> Result<Vec<Bead>> {
        let beads = self.target.get_beads(self.query.predicates())?;
        Ok(self.query.apply_unique(beads))
    }

    pub fn all(&self) -> Result<Vec<Bead>> {
        self.matching_beads()
    }

    pub fn first(&self) -> Result<Bead> {
        select_first(self.matching_beads()?)
    }

    pub fn oldest(&self) -> Result<Bead> {
        select_oldest(self.matching_beads()?)
    }

    pub fn newest(&self) -> Result<Bead> {
        select_newest(self.matching_beads()?)
    }

    pub fn newer(&self, n: usize) -> Result<Bead> {
        select_newer(self.matching_beads()?, n)
    }

    pub fn older(&self, n: usize) -> Result<Bead> {
        select_older(self.matching_beads()?, n)
    }
}

/// Fluent search across several boxes.
#[derive(Debug, Clone)]
pub struct MultiBoxSearch<'a> {
    boxes: &'a [Box],
    query: Query,
}

/// Search a sequence of boxes with one predicate set.
pub fn search_boxes(boxes: &[Box]) -> MultiBoxSearch<'_> {
    MultiBoxSearch {
        boxes,
        query: Query::new(),
    }
}

impl<'a> MultiBoxSearch<'a> {
    pub fn by_name(mut self, name: &str) -> Result<Self> {
        self.query = self.query.by_name(name)?;
        Ok(self)
    }

    pub fn by_kind(mut self, kind: &str) -> Result<Self> {
        self.query = self.query.by_kind(kind)?;
        Ok(self)
    }

    pub fn by_content_id(mut self, content_id: &str) -> Result<Self> {
        self.query = self.query.by_content_id(content_id)?;
        Ok(self)
    }

    pub fn at_time(mut self, time: DateTime<Utc>) -> Self {
        self.query = self.query.at_time(time);
        self
    }

    pub fn newer_than(mut self, time: DateTime<Utc>) -> Self {
        self.query = self.query.newer_than(time);
        self
    }

    pub fn older_than(mut self, time: DateTime<Utc>) -> Self {
        self.query = self.query.older_than(time);
        self
    }

    pub fn at_or_newer(mut self, time: DateTime<Utc>) -> Self {
        self.query = self.query.at_or_newer(time);
        self
    }

    pub fn at_or_older(mut self, time: DateTime<Utc>) -> Self {
        self.query = self.query.at_or_older(time);
        self
    }

    pub fn unique(mut self) -> Self {
        self.query = self.query.unique();
        self
    }

    fn matching_beads(&self) -> Result<Vec<Bead>> {
        let mut all = Vec::new();
        for target in self.boxes {
            all.extend(target.get_beads(self.query.predicates())?);
        }
        Ok(self.query.apply_unique(all))
    }

    pub fn all(&self) -> Result<Vec<Bead>> {
        self.matching_beads()
    }

    /// Short-circuits on the first box yielding any matches; boxes failing
    /// their own scan with I/O or invalid-archive errors are skipped.
    pub fn first(&self) -> Result<Bead> {
        for target in self.boxes {
            match target.get_beads(self.query.predicates()) {
                Ok(beads) => {
                    let beads = self.query.apply_unique(beads);
                    if let Some(bead) = beads.into_iter().next() {
                        return Ok(bead);
                    }
                }
                Err(e) if e.is_skippable_during_scan() => {
                    debug!("Skipping box {} during search: {}", target.name, e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(no_beads())
    }

    pub fn oldest(&self) -> Result<Bead> {
        select_oldest(self.matching_beads()?)
    }

    pub fn newest(&self) -> Result<Bead> {
        select_newest(self.matching_beads()?)
    }

    pub fn newer(&self, n: usize) -> Result<Bead> {
        select_newer(self.matching_beads()?, n)
    }

    pub fn older(&self, n: usize) -> Result<Bead> {
        select_older(self.matching_beads()?, n)
    }
}
