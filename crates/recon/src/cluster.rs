//! Duplicate clustering: partitions records into candidate entities.
//!
//! Pairwise similarities above threshold become edges; edges are folded into a
//! disjoint-set forest. In `transitive` mode every edge merges (A~B, B~C puts
//! A, B, C together even when A~C falls short, which can chain dissimilar
//! records in dense neighborhoods). In `clique` mode an edge merges two
//! clusters only when every cross pair is itself an edge.
//!
//! The partition depends only on record content and keys, never on input
//! order, worker count or blocking buckets for records that share a key.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;

use crate::config::{ClusterMode, MatchingConfig};
use crate::matcher::{IdentityProfile, Matcher};
use crate::model::RecordKey;

// ---------------------------------------------------------------------------
// Disjoint set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            // Path halving
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets holding `a` and `b`. Returns false if already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }

    /// Sets as sorted index lists, ordered by their smallest member.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        groups.sort_by_key(|g| g[0]);
        groups
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub a: usize,
    pub b: usize,
    pub similarity: f64,
}

/// Index pairs (i < j) worth scoring. Without blocking that is every pair;
/// with blocking, pairs sharing a key plus every pair touching a keyless record.
fn blocked_pairs(profiles: &[IdentityProfile]) -> Vec<(usize, usize)> {
    let mut buckets: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    let mut loose = Vec::new();
    for (i, p) in profiles.iter().enumerate() {
        match p.block_key.as_deref() {
            Some(key) => buckets.entry(key).or_default().push(i),
            None => loose.push(i),
        }
    }

    let mut pairs = Vec::new();
    for members in buckets.values() {
        for (x, &i) in members.iter().enumerate() {
            for &j in &members[x + 1..] {
                pairs.push((i, j));
            }
        }
    }
    for &l in &loose {
        for j in 0..profiles.len() {
            if j != l {
                pairs.push((l.min(j), l.max(j)));
            }
        }
    }
    pairs.sort_unstable();
    pairs.dedup();
    pairs
}

/// Score candidate pairs and keep those at or above threshold, in (a, b) order.
/// With a pool the scoring is sharded across workers; the ordered collect makes
/// the edge list identical to the sequential one.
pub fn score_edges(
    matcher: &Matcher,
    profiles: &[IdentityProfile],
    config: &MatchingConfig,
    pool: Option<&rayon::ThreadPool>,
) -> Vec<Edge> {
    let threshold = config.threshold;
    let score = |i: usize, j: usize| -> Option<Edge> {
        let similarity = matcher.similarity(&profiles[i], &profiles[j]);
        (similarity >= threshold).then_some(Edge { a: i, b: j, similarity })
    };
    let n = profiles.len();

    match (config.blocking, pool) {
        (false, None) => (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .filter_map(|(i, j)| score(i, j))
            .collect(),
        (false, Some(pool)) => pool.install(|| {
            (0..n)
                .into_par_iter()
                .flat_map_iter(|i| (i + 1..n).filter_map(move |j| score(i, j)))
                .collect()
        }),
        (true, None) => blocked_pairs(profiles)
            .into_iter()
            .filter_map(|(i, j)| score(i, j))
            .collect(),
        (true, Some(pool)) => {
            let pairs = blocked_pairs(profiles);
            pool.install(|| pairs.par_iter().filter_map(|&(i, j)| score(i, j)).collect())
        }
    }
}

// ---------------------------------------------------------------------------
// Clustering
// ---------------------------------------------------------------------------

/// Partition record indices into candidate-entity clusters.
pub fn cluster_records(
    profiles: &[IdentityProfile],
    keys: &[RecordKey],
    matcher: &Matcher,
    config: &MatchingConfig,
    pool: Option<&rayon::ThreadPool>,
) -> Vec<Vec<usize>> {
    let edges = score_edges(matcher, profiles, config, pool);
    log::debug!(
        "cluster: {} records, {} edges at threshold {} ({})",
        profiles.len(),
        edges.len(),
        config.threshold,
        config.mode
    );

    let mut uf = UnionFind::new(profiles.len());
    // Equal keys mean the same record delivered twice.
    let mut first_seen: BTreeMap<&RecordKey, usize> = BTreeMap::new();
    for (i, key) in keys.iter().enumerate() {
        match first_seen.get(key) {
            Some(&j) => {
                uf.union(j, i);
            }
            None => {
                first_seen.insert(key, i);
            }
        }
    }

    match config.mode {
        ClusterMode::Transitive => {
            for e in &edges {
                uf.union(e.a, e.b);
            }
        }
        ClusterMode::Clique => merge_cliques(&mut uf, edges, keys),
    }
    uf.groups()
}

/// Greedy complete-linkage merge. Edges are visited strongest first, ties
/// broken by record keys, so the outcome does not depend on input order.
fn merge_cliques(uf: &mut UnionFind, mut edges: Vec<Edge>, keys: &[RecordKey]) {
    let ordered_keys = |e: &Edge| {
        let (ka, kb) = (&keys[e.a], &keys[e.b]);
        if ka <= kb {
            (ka, kb)
        } else {
            (kb, ka)
        }
    };
    edges.sort_by(|x, y| {
        y.similarity
            .total_cmp(&x.similarity)
            .then_with(|| ordered_keys(x).cmp(&ordered_keys(y)))
    });

    let linked: HashMap<(usize, usize), f64> = edges
        .iter()
        .map(|e| ((e.a.min(e.b), e.a.max(e.b)), e.similarity))
        .collect();
    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..keys.len() {
        members.entry(uf.find(i)).or_default().push(i);
    }

    for e in &edges {
        let ra = uf.find(e.a);
        let rb = uf.find(e.b);
        if ra == rb {
            continue;
        }
        let left = &members[&ra];
        let right = &members[&rb];
        let complete = left
            .iter()
            .all(|&i| right.iter().all(|&j| linked.contains_key(&(i.min(j), i.max(j)))));
        if !complete {
            continue;
        }
        uf.union(ra, rb);
        let root = uf.find(ra);
        let other = if root == ra { rb } else { ra };
        let moved = members.remove(&other).unwrap_or_default();
        members.entry(root).or_default().extend(moved);
    }
}
