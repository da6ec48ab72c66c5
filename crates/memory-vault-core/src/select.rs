//! Relevance-biased, diversity-constrained selection.
//!
//! Turns a preflight candidate pool into the ranked selection used as
//! evidence. Specialised sources get a small per-group bonus so they win
//! ties against large generic corpora, but the bonus is small compared with
//! the distance gap between a real match and a near miss, so relevance still
//! decides.
//!
//! # Algorithm
//!
//! 1. Fetch `total_k × preflight_multiplier` candidates (done by the caller,
//!    see [`SelectorParams::preflight_size`]).
//! 2. Drop candidates whose raw `distance` exceeds `distance_threshold`.
//!    The floor uses the raw distance, so no bonus can lift a candidate back.
//! 3. `adjusted_distance = distance - bonus[source_group]` (unknown groups: 0).
//! 4. Stable sort ascending by `adjusted_distance`; ties keep fetch order.
//! 5. Walk the list, accepting a candidate only while its source (file name)
//!    is below `max_per_source`; stop at `total_k`.
//!
//! Fewer than `total_k` survivors means a shorter selection, never padding.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::models::{Candidate, ScoringEntry};

/// Per-group priority bonus table.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBonus {
    table: BTreeMap<String, f64>,
}

impl GroupBonus {
    pub fn new(table: BTreeMap<String, f64>) -> Self {
        Self { table }
    }

    /// Bonus for `group`; `0.0` for groups not in the table.
    pub fn bonus(&self, group: &str) -> f64 {
        self.table.get(group).copied().unwrap_or(0.0)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, f64)> {
        self.table.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl Default for GroupBonus {
    fn default() -> Self {
        let table = [
            ("sql", 0.15),
            ("tdv", 0.15),
            ("elastic", 0.15),
            ("python", 0.10),
            ("docker", 0.10),
            ("git", 0.08),
            ("ai", 0.08),
            ("microsoft", 0.06),
            ("tools", 0.05),
            ("personal", 0.04),
            ("ebooks", 0.00),
            ("misc", 0.00),
        ]
        .into_iter()
        .map(|(g, b)| (g.to_string(), b))
        .collect();
        Self { table }
    }
}

/// Selector tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SelectorParams {
    /// Maximum chunks to select.
    pub total_k: usize,
    /// Maximum chunks from one source file.
    pub max_per_source: usize,
    /// Over-fetch factor for the preflight pool (treated as at least 1).
    pub preflight_multiplier: usize,
    /// Candidates with a raw distance above this are discarded.
    pub distance_threshold: f64,
    pub group_bonus: GroupBonus,
    /// Record a [`ScoringEntry`] per accepted candidate.
    pub verbose: bool,
}

impl SelectorParams {
    /// Size of the preflight pool to request from the index.
    pub fn preflight_size(&self) -> usize {
        self.total_k.saturating_mul(self.preflight_multiplier.max(1))
    }
}

impl Default for SelectorParams {
    fn default() -> Self {
        Self {
            total_k: 4,
            max_per_source: 3,
            preflight_multiplier: 5,
            distance_threshold: 1.5,
            group_bonus: GroupBonus::default(),
            verbose: false,
        }
    }
}

/// Output of [`select`].
#[derive(Debug, Default)]
pub struct Selection {
    /// Accepted candidates, best first.
    pub selected: Vec<Candidate>,
    /// Accepted chunks per source group.
    pub group_counts: BTreeMap<String, usize>,
    /// Dropped by the distance floor.
    pub below_floor: usize,
    /// Skipped because their source was already at the cap.
    pub source_limited: usize,
    /// Filled when `params.verbose` is set.
    pub scoring_log: Vec<ScoringEntry>,
}

/// Rank `candidates` and apply the floor and the diversity cap.
pub fn select(candidates: Vec<Candidate>, params: &SelectorParams) -> Selection {
    let total = candidates.len();
    let mut pool: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.distance <= params.distance_threshold)
        .map(|mut c| {
            c.bonus = params.group_bonus.bonus(c.chunk.source_group());
            c.adjusted_distance = c.distance - c.bonus;
            c
        })
        .collect();
    let below_floor = total - pool.len();

    pool.sort_by(|a, b| {
        a.adjusted_distance
            .total_cmp(&b.adjusted_distance)
            .then(a.fetch_order.cmp(&b.fetch_order))
    });

    let mut selection = Selection {
        below_floor,
        ..Selection::default()
    };
    let mut per_source: HashMap<String, usize> = HashMap::new();

    for cand in pool {
        if selection.selected.len() >= params.total_k {
            break;
        }
        let count = per_source
            .entry(cand.chunk.filename().to_string())
            .or_insert(0);
        if *count >= params.max_per_source {
            selection.source_limited += 1;
            continue;
        }
        *count += 1;

        *selection
            .group_counts
            .entry(cand.chunk.source_group().to_string())
            .or_insert(0) += 1;

        if params.verbose {
            selection.scoring_log.push(ScoringEntry {
                rank: selection.selected.len() + 1,
                filename: cand.chunk.filename().to_string(),
                source_group: cand.chunk.source_group().to_string(),
                distance: round4(cand.distance),
                bonus: cand.bonus,
                adjusted: round4(cand.adjusted_distance),
            });
        }
        selection.selected.push(cand);
    }

    debug!(
        pool = total,
        below_floor = selection.below_floor,
        source_limited = selection.source_limited,
        selected = selection.selected.len(),
        "selection complete"
    );

    selection
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
