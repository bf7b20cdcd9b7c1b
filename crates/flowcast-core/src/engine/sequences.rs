//! Exhaustive path enumeration over the flow graph.
//!
//! Enumerates every finite directed path from the start node as an ordered
//! activity-label sequence, including the empty sequence. A node already on
//! the current path is not re-descended, so cycles terminate the branch
//! instead of erroring. Preview nodes are never expanded and never appear in
//! emitted sequences: unconfirmed predictions must not seed further
//! prediction or metric computation.
//!
//! The traversal is an explicit-stack DFS; membership in the current path is
//! computed from the path itself rather than a shared mutable visited set.
//! Successors are processed in insertion order, so the emitted order is
//! reproducible, but only the *set* of sequences is meaningful.
//!
//! Worst-case output is exponential in the branching factor of confirmed
//! edges; this bound is inherent to exhaustive path-based conformance
//! checking at the intended graph sizes.

use crate::engine::graph::{FlowGraph, NodeId};
use crate::engine::matrix::ActivityId;

struct Frame {
    node: NodeId,
    next_child: usize,
}

/// Enumerates all confirmed paths from the start node. Each prefix along the
/// traversal is emitted exactly once; the first element is always the empty
/// sequence.
pub fn enumerate_sequences(graph: &FlowGraph) -> Vec<Vec<ActivityId>> {
    let mut sequences: Vec<Vec<ActivityId>> = vec![Vec::new()];

    let mut stack = vec![Frame {
        node: NodeId::Start,
        next_child: 0,
    }];
    let mut path: Vec<NodeId> = vec![NodeId::Start];
    let mut labels: Vec<ActivityId> = Vec::new();

    while let Some(frame) = stack.last_mut() {
        let successors = graph.successors(&frame.node);
        let mut advanced = false;

        while frame.next_child < successors.len() {
            let child = successors[frame.next_child].clone();
            frame.next_child += 1;

            // Preview nodes are leaves and are excluded from output; a node
            // already on the path would start a cycle.
            if graph.is_preview(&child) || path.contains(&child) {
                continue;
            }

            let label = match graph.node(&child) {
                Some(n) => n.actual_key.clone(),
                None => continue,
            };

            path.push(child.clone());
            labels.push(label);
            sequences.push(labels.clone());
            stack.push(Frame {
                node: child,
                next_child: 0,
            });
            advanced = true;
            break;
        }

        if !advanced {
            stack.pop();
            path.pop();
            labels.pop();
        }
    }

    sequences
}
