
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::data_types::alignment::Position;
use crate::data_types::allele_map::AlleleSet;

/// Dense node handle within one graph
pub type NodeId = usize;
/// Dense edge handle within one graph
pub type EdgeId = usize;

/// One node of the allele graph. Sequence content lives only in `Sequence`
/// nodes; the rest are structural markers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphNode {
    /// the unique entry sentinel
    Start,
    /// the unique exit sentinel
    End,
    /// a segment marker shared by every allele that crosses it
    Boundary {
        /// 0-based marker counter
        idx: usize,
        /// position of the last residue before the marker
        pos: Position
    },
    /// a run of residues shared by every allele whose edge chain threads it
    Sequence {
        /// reference position of the first residue
        start: Position,
        /// the residues themselves
        seq: String
    }
}

impl GraphNode {
    /// The position used for traversal ordering. Sentinels sort to the extremes.
    pub fn sort_position(&self) -> Position {
        match self {
            GraphNode::Start => Position::MIN,
            GraphNode::End => Position::MAX,
            GraphNode::Boundary { pos, .. } => *pos,
            GraphNode::Sequence { start, .. } => *start
        }
    }

    /// The exclusive end of the span this node occupies.
    pub fn end_position(&self) -> Position {
        match self {
            GraphNode::Start => Position::MIN,
            GraphNode::End => Position::MAX,
            GraphNode::Boundary { pos, .. } => pos + 1,
            GraphNode::Sequence { start, seq } => start + seq.len() as Position
        }
    }

    /// Secondary ordering rank so equal-position nodes still compare totally.
    pub fn tag_rank(&self) -> u8 {
        match self {
            GraphNode::Start => 0,
            GraphNode::Boundary { .. } => 1,
            GraphNode::Sequence { .. } => 2,
            GraphNode::End => 3
        }
    }

    /// The residues held by a sequence node, None for the structural kinds.
    pub fn sequence(&self) -> Option<&str> {
        match self {
            GraphNode::Sequence { seq, .. } => Some(seq),
            _ => None
        }
    }
}

impl PartialOrd for GraphNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GraphNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_position().cmp(&other.sort_position())
            .then_with(|| self.tag_rank().cmp(&other.tag_rank()))
            .then_with(|| match (self, other) {
                (GraphNode::Boundary { idx: i1, .. }, GraphNode::Boundary { idx: i2, .. }) => i1.cmp(i2),
                (GraphNode::Sequence { seq: s1, .. }, GraphNode::Sequence { seq: s2, .. }) => s1.cmp(s2),
                _ => Ordering::Equal
            })
    }
}

/// A directed edge; traversable exactly for the alleles whose bit is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// source node
    from: NodeId,
    /// target node
    to: NodeId,
    /// the membership label
    alleles: AlleleSet
}

impl Edge {
    pub fn new(from: NodeId, to: NodeId, alleles: AlleleSet) -> Edge {
        Edge {
            from,
            to,
            alleles
        }
    }

    // getters
    pub fn from(&self) -> NodeId {
        self.from
    }

    pub fn to(&self) -> NodeId {
        self.to
    }

    pub fn alleles(&self) -> &AlleleSet {
        &self.alleles
    }

    /// Adds one allele to the membership label.
    pub fn add_allele(&mut self, index: usize) {
        self.alleles.insert(index);
    }
}
