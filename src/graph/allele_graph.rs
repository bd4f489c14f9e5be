
use serde::{Deserialize, Serialize};

use crate::data_types::alignment::Position;
use crate::data_types::allele_map::{AlleleIndex, AlleleSet};
use crate::graph::node::{Edge, EdgeId, GraphNode, NodeId};

/// The directed acyclic allele graph the aligner traverses. Construction is
/// handled by the builder; once built, everything here is read-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlleleGraph {
    /// the fixed allele enumeration the edge labels are expressed against
    allele_index: AlleleIndex,
    /// all nodes; index 0 is Start, index 1 is End
    nodes: Vec<GraphNode>,
    /// all edges, labeled with allele membership
    edges: Vec<Edge>,
    /// outgoing (edge, target) lists per node
    successors: Vec<Vec<(EdgeId, NodeId)>>,
    /// sorted, disjoint [start, end) intervals between global breakpoints
    segments: Vec<(Position, Position)>,
    /// per segment: the (edge, sequence-node) pairs serving anchors inside it
    segment_entries: Vec<Vec<(EdgeId, NodeId)>>
}

/// The seed frontier returned for one anchor position.
#[derive(Debug)]
pub struct Adjacents {
    /// (edge, node) pairs reachable at or after the anchor
    pub entries: Vec<(EdgeId, NodeId)>,
    /// union of the allele bits present in `entries`
    pub seen: AlleleSet,
    /// start of the breakpoint segment the anchor landed in, for diagnostics
    pub segment_start: Option<Position>
}

impl AlleleGraph {
    /// Assembles the graph from builder output. Callers use the builder, not this.
    pub(crate) fn new(
        allele_index: AlleleIndex,
        nodes: Vec<GraphNode>,
        edges: Vec<Edge>,
        segments: Vec<(Position, Position)>,
        segment_entries: Vec<Vec<(EdgeId, NodeId)>>
    ) -> AlleleGraph {
        let mut successors: Vec<Vec<(EdgeId, NodeId)>> = vec![vec![]; nodes.len()];
        for (edge_id, edge) in edges.iter().enumerate() {
            successors[edge.from()].push((edge_id, edge.to()));
        }
        AlleleGraph {
            allele_index,
            nodes,
            edges,
            successors,
            segments,
            segment_entries
        }
    }

    /// Restores the transient lookups that serialization skips.
    pub fn rebuild_lookups(&mut self) {
        self.allele_index.rebuild_lookup();
    }

    // getters
    pub fn allele_index(&self) -> &AlleleIndex {
        &self.allele_index
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Outgoing (edge, successor) pairs of a node.
    pub fn successors(&self, id: NodeId) -> &[(EdgeId, NodeId)] {
        &self.successors[id]
    }

    /// Folds over the successors of a node.
    pub fn fold_successors<B, F: FnMut(B, EdgeId, NodeId) -> B>(&self, id: NodeId, init: B, mut f: F) -> B {
        let mut acc = init;
        for &(edge_id, node_id) in self.successors[id].iter() {
            acc = f(acc, edge_id, node_id);
        }
        acc
    }

    /// Returns the seed frontier for an anchor position: every (edge, node)
    /// whose allele paths cross or resume at `pos`, plus the union of the
    /// allele bits those edges carry. Alleles absent from the union have no
    /// residues at the anchor.
    pub fn adjacents_at(&self, pos: Position) -> Adjacents {
        let mut entries: Vec<(EdgeId, NodeId)> = vec![];
        let mut segment_start: Option<Position> = None;

        let upper = self.segments.partition_point(|&(start, _)| start <= pos);
        if upper > 0 {
            let (start, end) = self.segments[upper - 1];
            if pos < end {
                segment_start = Some(start);
                entries.extend(self.segment_entries[upper - 1].iter().copied());
            }
        }

        let mut seen = AlleleSet::empty(self.allele_index.len());
        for &(edge_id, _) in entries.iter() {
            seen.union_with(self.edges[edge_id].alleles());
        }

        Adjacents {
            entries,
            seen,
            segment_start
        }
    }
}
