//! Approximate nearest-neighbor graph over embedding vectors.
//!
//! Hierarchical navigable small-world index with cosine distance. Vectors
//! are normalized on insert, so `distance = 1 - dot`. Deleted slots stay in
//! the graph as navigable tombstones and are filtered from results; space is
//! reclaimed only by rebuilding.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SkillError};

/// Hard cap on layer count; levels above this are never sampled.
const MAX_LEVEL: usize = 16;

/// Seed for the level-sampling RNG of a fresh index. Building the same
/// vectors in the same order always yields the same graph.
const LEVEL_RNG_SEED: u64 = 0x736b_696c_6c73;

/// HNSW construction and search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswParams {
    /// Embedding dimension.
    pub dim: usize,
    /// Connections per node per layer; layer 0 allows 2*M.
    pub m: usize,
    /// Beam width while building.
    pub ef_construction: usize,
    /// Beam width while searching.
    pub ef_search: usize,
    /// Maximum slot count, live or tombstoned.
    pub max_elements: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            dim: 384,
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            max_elements: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    vector: Vec<f32>,
    level: usize,
    /// One adjacency list per layer, `0..=level`.
    neighbors: Vec<Vec<u32>>,
    deleted: bool,
}

/// Search candidate ordered by distance, then slot for total order.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist: f32,
    slot: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The graph itself. Serializable in full, RNG state included, so a
/// reloaded index keeps building exactly where it left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    params: HnswParams,
    nodes: Vec<Node>,
    entry: Option<u32>,
    rng_state: u64,
}

impl HnswIndex {
    pub fn new(params: HnswParams) -> Self {
        Self {
            params,
            nodes: Vec::new(),
            entry: None,
            rng_state: LEVEL_RNG_SEED,
        }
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Total slots, tombstones included.
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    /// Slots that are not tombstoned.
    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.deleted).count()
    }

    /// Insert a vector and return its slot.
    ///
    /// Fails with `CapacityExceeded` once `max_elements` slots exist;
    /// tombstones count, because only a rebuild reclaims them.
    pub fn insert(&mut self, vector: &[f32]) -> Result<u32> {
        if self.nodes.len() >= self.params.max_elements {
            return Err(SkillError::CapacityExceeded {
                max_elements: self.params.max_elements,
            });
        }

        let mut query = vector.to_vec();
        normalize(&mut query);

        let level = self.sample_level();
        let slot = self.nodes.len() as u32;
        self.nodes.push(Node {
            vector: query.clone(),
            level,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });

        let Some(entry) = self.entry else {
            self.entry = Some(slot);
            return Ok(slot);
        };

        let entry_level = self.nodes[entry as usize].level;
        let mut cur = entry;

        // Greedy descent through layers above the new node's level.
        let mut layer = entry_level;
        while layer > level {
            cur = self.greedy_closest(&query, cur, layer);
            layer -= 1;
        }

        // Link on every shared layer, nearest first.
        for layer in (0..=level.min(entry_level)).rev() {
            let found = self.search_layer(&query, &[cur], self.params.ef_construction, layer);
            let m_max = if layer == 0 { self.params.m * 2 } else { self.params.m };

            for candidate in found.iter().take(self.params.m) {
                let neighbor = candidate.slot;
                if neighbor == slot {
                    continue;
                }
                self.nodes[slot as usize].neighbors[layer].push(neighbor);
                if !self.nodes[neighbor as usize].neighbors[layer].contains(&slot) {
                    self.nodes[neighbor as usize].neighbors[layer].push(slot);
                    self.shrink_neighbors(neighbor, layer, m_max);
                }
            }

            if let Some(best) = found.first() {
                cur = best.slot;
            }
        }

        if level > entry_level {
            self.entry = Some(slot);
        }
        Ok(slot)
    }

    /// Tombstone a slot. Returns false when out of range or already deleted.
    pub fn mark_deleted(&mut self, slot: u32) -> bool {
        match self.nodes.get_mut(slot as usize) {
            Some(node) if !node.deleted => {
                node.deleted = true;
                true
            }
            _ => false,
        }
    }

    /// Top-`k` nearest live slots as `(slot, distance)`, nearest first.
    ///
    /// `ef` is raised to at least `k`.
    pub fn search(&self, vector: &[f32], k: usize, ef: usize) -> Vec<(u32, f32)> {
        if k == 0 || self.nodes.is_empty() {
            return Vec::new();
        }
        let Some(entry) = self.entry else {
            return Vec::new();
        };

        let mut query = vector.to_vec();
        normalize(&mut query);

        let mut cur = entry;
        let entry_level = self.nodes[entry as usize].level;
        for layer in (1..=entry_level).rev() {
            cur = self.greedy_closest(&query, cur, layer);
        }

        let ef = ef.max(k);
        self.search_layer(&query, &[cur], ef, 0)
            .into_iter()
            .filter(|c| !self.nodes[c.slot as usize].deleted)
            .take(k)
            .map(|c| (c.slot, c.dist))
            .collect()
    }

    /// Beam search over one layer; results ascend by distance. Tombstones
    /// participate in navigation and are filtered by the caller.
    fn search_layer(&self, query: &[f32], entries: &[u32], ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &slot in entries {
            if visited.insert(slot) {
                let cand = Candidate {
                    dist: self.distance(query, slot),
                    slot,
                };
                frontier.push(Reverse(cand));
                results.push(cand);
            }
        }

        while let Some(Reverse(nearest)) = frontier.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if nearest.dist > worst.dist {
                        break;
                    }
                }
            }

            for &neighbor in &self.nodes[nearest.slot as usize].neighbors[layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = self.distance(query, neighbor);
                let worst = results.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
                if results.len() < ef || dist < worst {
                    let cand = Candidate { dist, slot: neighbor };
                    frontier.push(Reverse(cand));
                    results.push(cand);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Single-step hill climb toward the query on one layer.
    fn greedy_closest(&self, query: &[f32], start: u32, layer: usize) -> u32 {
        let mut cur = start;
        let mut cur_dist = self.distance(query, cur);
        loop {
            let mut improved = false;
            for &neighbor in &self.nodes[cur as usize].neighbors[layer] {
                let dist = self.distance(query, neighbor);
                if dist < cur_dist {
                    cur = neighbor;
                    cur_dist = dist;
                    improved = true;
                }
            }
            if !improved {
                return cur;
            }
        }
    }

    /// Keep only the `m_max` closest links of `slot` on `layer`.
    fn shrink_neighbors(&mut self, slot: u32, layer: usize, m_max: usize) {
        if self.nodes[slot as usize].neighbors[layer].len() <= m_max {
            return;
        }
        let base = self.nodes[slot as usize].vector.clone();
        let mut links = std::mem::take(&mut self.nodes[slot as usize].neighbors[layer]);
        links.sort_by(|&a, &b| {
            self.distance(&base, a)
                .total_cmp(&self.distance(&base, b))
                .then_with(|| a.cmp(&b))
        });
        links.truncate(m_max);
        self.nodes[slot as usize].neighbors[layer] = links;
    }

    fn distance(&self, query: &[f32], slot: u32) -> f32 {
        let other = &self.nodes[slot as usize].vector;
        let dot: f32 = query.iter().zip(other.iter()).map(|(a, b)| a * b).sum();
        1.0 - dot
    }

    /// Geometric level sampling with the persisted RNG state.
    fn sample_level(&mut self) -> usize {
        let mut rng = StdRng::seed_from_u64(self.rng_state);
        self.rng_state = rng.gen();

        let u: f64 = 1.0 - rng.gen::<f64>();
        let mult = 1.0 / (self.params.m.max(2) as f64).ln();
        (((-u.ln()) * mult).floor() as usize).min(MAX_LEVEL)
    }
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for component in vector.iter_mut() {
            *component /= norm;
        }
    }
}
