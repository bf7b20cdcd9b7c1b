//! # Prefix matrix
//!
//! The probabilistic next-activity matrix: a sparse lookup table mapping
//! observed activity prefixes to likely next activities, with a support
//! count and one probability column per activity.
//!
//! ## Key components
//!
//! - **Row aggregation**: rows are grouped by prefix at load time. Support
//!   is summed, the first-seen target label is kept, and the first row's
//!   probability columns become authoritative. After loading there is
//!   exactly one row per prefix.
//! - **Derived caches**: direct-successor sets keyed by the last prefix
//!   element (or the start sentinel for empty prefixes), aggregate support
//!   per target, and the maximum support used for normalization. All caches
//!   are built once and are read-only afterwards, so one loaded matrix can
//!   be shared across concurrent metric computations without
//!   synchronization.
//! - **Conformance formulas**: replay fitness, simplicity, precision and
//!   generalization, plus variant and event-log coverage. Every formula
//!   defines an explicit fallback (typically 1.0) for empty denominators
//!   instead of faulting.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::engine::errors::EngineError;
use crate::engine::table::{parse_prefix, RawTable};

/// Activity label type. Labels are plain strings taken from the table header
/// and prefix cells.
pub type ActivityId = String;

/// Adjacency of confirmed graph nodes, keyed by activity label. The start
/// node appears under [`START_SENTINEL`]. Preview nodes never appear, as
/// source or target.
pub type LabelEdges = FxHashMap<ActivityId, Vec<ActivityId>>;

/// End-of-case marker used as a target label and probability column.
pub const END_OF_CASE: &str = "[EOC]";

/// Reserved source key for predictions made from the empty prefix. This is
/// also the wire id of the start node.
pub const START_SENTINEL: &str = "starting_with_key:0";

/// Default probability threshold applied when the caller supplies none.
pub const PROBABILITY_MIN_DEFAULT: f64 = 0.3;

/// Default support threshold for edge-driven prediction.
pub const SUPPORT_MIN_DEFAULT: u64 = 1;

/// Cost charged for an activity the model expects but the trace lacks.
const SKIP_COST: f64 = 2.0;

/// Cost charged for an activity the trace has but the model prefix lacks.
const INSERT_COST: f64 = 1.0;

/// One aggregated matrix row: an observed prefix, the activity that
/// historically followed it, the summed support, and the probability of
/// each candidate next activity.
#[derive(Debug, Clone)]
pub struct MatrixRow {
    /// Ordered activity prefix.
    pub prefix: Vec<ActivityId>,
    /// First-seen target label for this prefix.
    pub target: ActivityId,
    /// Summed support over all raw rows with this prefix.
    pub support: u64,
    /// Probability per candidate next activity, in column order.
    pub probabilities: Vec<(ActivityId, f64)>,
}

/// Accumulated prediction for one `(target, source)` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionStat {
    /// Total support backing this prediction.
    pub support: u64,
    /// Support-weighted mean probability.
    pub probability: f64,
}

/// A complete historical case: a prefix whose target is the end-of-case
/// marker.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Variant {
    /// The activities of the case, in order.
    pub variant: Vec<ActivityId>,
    /// Number of historical cases with exactly this shape.
    pub support: u64,
}

/// Coverage annotation for one variant against a concrete edge set.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VariantCoverage {
    /// The activities of the case, in order.
    pub variant: Vec<ActivityId>,
    /// Whether the supplied edges reproduce the whole case, including the
    /// final transition into the end-of-case marker.
    pub covered: bool,
    /// Number of historical cases with exactly this shape.
    pub support: u64,
}

/// The loaded prefix matrix with its derived lookup caches.
#[derive(Debug, Clone, Default)]
pub struct PrefixMatrix {
    rows: Vec<MatrixRow>,
    row_index: FxHashMap<Vec<ActivityId>, usize>,
    probability_columns: Vec<ActivityId>,
    outgoing_edges: FxHashMap<ActivityId, Vec<ActivityId>>,
    support_by_target: FxHashMap<ActivityId, u64>,
    max_support: u64,
    vocabulary: FxHashSet<ActivityId>,
}

impl PrefixMatrix {
    /// Loads a matrix from a parsed table.
    ///
    /// Requires the `prefixes`, `targets` and `Support` columns; every other
    /// column is a probability column. Rows are aggregated by prefix in one
    /// grouped pass (support summed, first target kept) and the derived
    /// caches are built from the aggregated rows.
    pub fn load(table: &RawTable) -> Result<Self, EngineError> {
        let col = |name: &str| -> Result<usize, EngineError> {
            table
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| EngineError::MalformedTable(format!("missing column '{name}'")))
        };
        let prefix_col = col("prefixes")?;
        let target_col = col("targets")?;
        let support_col = col("Support")?;

        let probability_columns: Vec<ActivityId> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != prefix_col && *i != target_col && *i != support_col)
            .map(|(_, c)| c.clone())
            .collect();
        let prob_indices: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != prefix_col && *i != target_col && *i != support_col)
            .map(|(i, _)| i)
            .collect();

        let mut rows: Vec<MatrixRow> = Vec::new();
        let mut row_index: FxHashMap<Vec<ActivityId>, usize> = FxHashMap::default();

        for (line, cells) in table.rows.iter().enumerate() {
            let prefix = parse_prefix(&cells[prefix_col])?;
            let target = cells[target_col].trim().to_string();
            let support: u64 = cells[support_col].parse().map_err(|_| {
                EngineError::MalformedTable(format!(
                    "row {}: support is not a non-negative integer: {:?}",
                    line + 2,
                    cells[support_col]
                ))
            })?;

            match row_index.get(&prefix) {
                Some(&i) => {
                    // Aggregation: sum support, first target and first
                    // probability columns win.
                    rows[i].support += support;
                }
                None => {
                    let mut probabilities = Vec::with_capacity(prob_indices.len());
                    for (&idx, name) in prob_indices.iter().zip(&probability_columns) {
                        let p: f64 = cells[idx].parse().map_err(|_| {
                            EngineError::MalformedTable(format!(
                                "row {}: probability cell {:?} is not a number",
                                line + 2,
                                cells[idx]
                            ))
                        })?;
                        probabilities.push((name.clone(), p));
                    }
                    row_index.insert(prefix.clone(), rows.len());
                    rows.push(MatrixRow {
                        prefix,
                        target,
                        support,
                        probabilities,
                    });
                }
            }
        }

        // Derived caches, one pass over the aggregated rows.
        let mut outgoing_edges: FxHashMap<ActivityId, Vec<ActivityId>> = FxHashMap::default();
        let mut support_by_target: FxHashMap<ActivityId, u64> = FxHashMap::default();
        let mut vocabulary: FxHashSet<ActivityId> = FxHashSet::default();

        for row in &rows {
            vocabulary.insert(row.target.clone());
            for a in &row.prefix {
                vocabulary.insert(a.clone());
            }
            *support_by_target.entry(row.target.clone()).or_insert(0) += row.support;
            let source = row
                .prefix
                .last()
                .cloned()
                .unwrap_or_else(|| START_SENTINEL.to_string());
            let succ = outgoing_edges.entry(source).or_default();
            if !succ.contains(&row.target) {
                succ.push(row.target.clone());
            }
        }

        let max_support = support_by_target.values().copied().max().unwrap_or(1).max(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            rows = rows.len(),
            probability_columns = probability_columns.len(),
            max_support,
            "prefix matrix loaded"
        );

        Ok(Self {
            rows,
            row_index,
            probability_columns,
            outgoing_edges,
            support_by_target,
            max_support,
            vocabulary,
        })
    }

    /// All unique prefixes, in first-seen order.
    pub fn prefixes(&self) -> impl Iterator<Item = &[ActivityId]> {
        self.rows.iter().map(|r| r.prefix.as_slice())
    }

    /// Number of unique prefixes.
    pub fn prefix_count(&self) -> usize {
        self.rows.len()
    }

    /// Probability column names, in table order.
    pub fn probability_columns(&self) -> &[ActivityId] {
        &self.probability_columns
    }

    /// Cached direct successors of an activity (or of [`START_SENTINEL`]).
    pub fn outgoing_edges(&self, activity: &str) -> Option<&[ActivityId]> {
        self.outgoing_edges.get(activity).map(|v| v.as_slice())
    }

    /// Aggregate support mass reaching an activity.
    pub fn support_of(&self, activity: &str) -> u64 {
        self.support_by_target.get(activity).copied().unwrap_or(0)
    }

    /// Normalization constant: the maximum aggregate support (at least 1).
    pub fn max_support(&self) -> u64 {
        self.max_support
    }

    /// Exact-prefix prediction: every probability-column entry of the
    /// matching row with probability `>= prob_min`. The end-of-case column
    /// participates like any other. Returns an empty list when the prefix is
    /// not in the matrix (a lookup miss is not an error).
    pub fn predict(&self, prefix: &[ActivityId], prob_min: f64) -> Vec<(ActivityId, f64)> {
        let Some(&i) = self.row_index.get(prefix) else {
            return Vec::new();
        };
        self.rows[i]
            .probabilities
            .iter()
            .filter(|(_, p)| *p >= prob_min)
            .cloned()
            .collect()
    }

    /// Edge-driven exhaustive prediction.
    ///
    /// A prefix is covered when every consecutive activity pair exists in
    /// `edges`. For covered prefixes the row's target contributes to the
    /// `(target, source)` key, where source is the prefix's last element or
    /// the start sentinel. Contributions accumulate support and
    /// support-weighted probability; the second pass normalizes to the
    /// support-weighted mean. Keys below `prob_min` or `support_min` are
    /// dropped.
    pub fn predict_using_edges(
        &self,
        edges: &LabelEdges,
        prob_min: f64,
        support_min: u64,
    ) -> FxHashMap<(ActivityId, ActivityId), PredictionStat> {
        let mut predictions: FxHashMap<(ActivityId, ActivityId), PredictionStat> =
            FxHashMap::default();

        for row in &self.rows {
            if !prefix_is_covered(&row.prefix, edges) {
                continue;
            }

            let source = row
                .prefix
                .last()
                .cloned()
                .unwrap_or_else(|| START_SENTINEL.to_string());
            let p = row
                .probabilities
                .iter()
                .find(|(name, _)| *name == row.target)
                .map(|(_, p)| *p)
                .unwrap_or(0.0);

            let entry = predictions
                .entry((row.target.clone(), source))
                .or_insert(PredictionStat {
                    support: 0,
                    probability: 0.0,
                });
            entry.support += row.support;
            entry.probability += p * row.support as f64;
        }

        // Normalize: multiple covered prefixes can predict the same target
        // from the same source, and the aggregate probability is the
        // support-weighted mean.
        for stat in predictions.values_mut() {
            if stat.support > 0 {
                stat.probability /= stat.support as f64;
            }
        }

        predictions.retain(|_, s| s.probability >= prob_min && s.support >= support_min);
        predictions
    }

    /// Cost-based alignment approximation of replay fitness.
    ///
    /// Traces containing the end-of-case marker contribute length to the
    /// denominator but no cost. A trace with no matching prefix row charges
    /// one insertion per activity; a matching trace charges skip cost for
    /// model-only activities and insertion cost for trace-only activities.
    /// Fitness is at most 1, may go negative when skip costs exceed the
    /// insertion budget, and is 1 by convention for an empty trace set.
    pub fn replay_fitness(&self, traces: &[Vec<ActivityId>]) -> f64 {
        let mut cost = 0.0;
        let mut denom = 0.0;

        for trace in traces {
            denom += trace.len() as f64;
            if trace.iter().any(|a| a == END_OF_CASE) {
                continue;
            }
            match self.row_index.get(trace) {
                None => cost += INSERT_COST * trace.len() as f64,
                Some(&i) => {
                    let model: FxHashSet<&ActivityId> = self.rows[i].prefix.iter().collect();
                    let seen: FxHashSet<&ActivityId> = trace.iter().collect();
                    let skipped = model.difference(&seen).count() as f64;
                    let inserted = seen.difference(&model).count() as f64;
                    cost += SKIP_COST * skipped + INSERT_COST * inserted;
                }
            }
        }

        if denom == 0.0 {
            1.0
        } else {
            1.0 - cost / denom
        }
    }

    /// Simplicity score for a set of traces against a model with
    /// `nodes_in_tree` nodes.
    ///
    /// Duplicates are activity occurrences beyond the first across all
    /// traces combined; missing activities are trace activities absent from
    /// the matrix vocabulary.
    pub fn simplicity(&self, traces: &[Vec<ActivityId>], nodes_in_tree: usize) -> f64 {
        let mut counts: FxHashMap<&ActivityId, usize> = FxHashMap::default();
        for trace in traces {
            for a in trace {
                *counts.entry(a).or_insert(0) += 1;
            }
        }

        let duplicates: usize = counts.values().map(|&c| c.saturating_sub(1)).sum();
        let missing = counts
            .keys()
            .filter(|a| !self.vocabulary.contains(**a))
            .count();
        let denom = (nodes_in_tree + counts.len()) as f64;

        if denom == 0.0 {
            1.0
        } else {
            1.0 - (duplicates + missing) as f64 / denom
        }
    }

    /// Precision: support-weighted average of how much of the model's known
    /// outgoing behavior each edge-set node reproduces.
    ///
    /// Only confirmed nodes participate; the end-of-case marker is skipped.
    /// A node with no cached outgoing edges counts as fully missed.
    pub fn precision(&self, edges: &LabelEdges) -> f64 {
        let mut weighted_missed = 0.0;
        let mut total_weight = 0.0;

        for (node, used) in edges {
            if node == END_OF_CASE {
                continue;
            }
            let missed_fraction = match self.outgoing_edges.get(node) {
                Some(outgoing) if !outgoing.is_empty() => {
                    let missed = outgoing.iter().filter(|t| !used.contains(t)).count();
                    missed as f64 / outgoing.len() as f64
                }
                _ => 1.0,
            };
            let weight = self.support_of(node) as f64;
            weighted_missed += missed_fraction * weight;
            total_weight += weight;
        }

        if total_weight == 0.0 {
            1.0
        } else {
            1.0 - weighted_missed / total_weight
        }
    }

    /// Generalization: nodes executed more often in the historical log
    /// contribute a smaller `1/sqrt(executions)` penalty.
    ///
    /// `labels` are the confirmed, non-start activity labels of the model;
    /// `num_nodes_in_tree` is the model's node count including the start
    /// node.
    pub fn generalization(&self, labels: &[ActivityId], num_nodes_in_tree: usize) -> f64 {
        if num_nodes_in_tree <= 1 {
            return 1.0;
        }
        let penalty: f64 = labels
            .iter()
            .map(|l| {
                let executions = self.support_of(l);
                if executions == 0 {
                    0.0
                } else {
                    1.0 / (executions as f64).sqrt()
                }
            })
            .sum();
        1.0 - penalty / (num_nodes_in_tree - 1) as f64
    }

    /// All variants: aggregated prefixes whose target is the end-of-case
    /// marker.
    pub fn get_variants(&self) -> Vec<Variant> {
        self.rows
            .iter()
            .filter(|r| r.target == END_OF_CASE)
            .map(|r| Variant {
                variant: r.prefix.clone(),
                support: r.support,
            })
            .collect()
    }

    /// Coverage annotation for every variant plus the covered ratio.
    ///
    /// A variant is covered when every consecutive pair is an edge *and* its
    /// final activity has an edge into the end-of-case marker. Ratio is 1
    /// when there are no variants.
    pub fn get_variant_coverage(&self, edges: &LabelEdges) -> (Vec<VariantCoverage>, f64) {
        let variants = self.get_variants();
        if variants.is_empty() {
            return (Vec::new(), 1.0);
        }

        let mut covered_count = 0usize;
        let mut list = Vec::with_capacity(variants.len());
        for v in variants {
            if v.variant.is_empty() {
                continue;
            }
            let covered = prefix_is_covered(&v.variant, edges)
                && edges
                    .get(v.variant.last().expect("non-empty variant"))
                    .is_some_and(|succ| succ.iter().any(|t| t == END_OF_CASE));
            if covered {
                covered_count += 1;
            }
            list.push(VariantCoverage {
                variant: v.variant,
                covered,
                support: v.support,
            });
        }

        let total = self.rows.iter().filter(|r| r.target == END_OF_CASE).count();
        let ratio = if total == 0 {
            1.0
        } else {
            covered_count as f64 / total as f64
        };
        (list, ratio)
    }

    /// Fraction of cached prefixes whose consecutive pairs all exist in
    /// `edges`. Returns 1 when the matrix has no prefixes.
    pub fn get_event_log_coverage(&self, edges: &LabelEdges) -> f64 {
        if self.rows.is_empty() {
            return 1.0;
        }
        let covered = self
            .rows
            .iter()
            .filter(|r| prefix_is_covered(&r.prefix, edges))
            .count();
        covered as f64 / self.rows.len() as f64
    }

    /// Per-activity fraction of historical complete cases containing it.
    pub fn sub_trace_coverage(&self) -> FxHashMap<ActivityId, f64> {
        let variants = self.get_variants();
        let mut counters: FxHashMap<ActivityId, usize> = FxHashMap::default();
        for v in &variants {
            let distinct: FxHashSet<&ActivityId> = v.variant.iter().collect();
            for a in distinct {
                *counters.entry(a.clone()).or_insert(0) += 1;
            }
        }
        let total = variants.len();
        counters
            .into_iter()
            .map(|(a, c)| (a, if total == 0 { 0.0 } else { c as f64 / total as f64 }))
            .collect()
    }
}

/// True when every consecutive activity pair of `prefix` exists in `edges`.
/// Empty and single-element prefixes are trivially covered.
fn prefix_is_covered(prefix: &[ActivityId], edges: &LabelEdges) -> bool {
    prefix.windows(2).all(|pair| {
        edges
            .get(&pair[0])
            .is_some_and(|succ| succ.contains(&pair[1]))
    })
}
