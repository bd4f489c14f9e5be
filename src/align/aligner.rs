
use std::collections::BTreeMap;

use crate::align::scoring::{EarlyStop, ScoringModel};
use crate::data_types::alignment::Position;
use crate::data_types::allele_map::{AlleleMap, AlleleSet};
use crate::graph::allele_graph::AlleleGraph;
use crate::graph::node::{GraphNode, NodeId};

/// Result of aligning one read from one anchor position.
#[derive(Clone, Debug, PartialEq)]
pub enum AlignmentOutcome<A> {
    /// the frontier drained, every allele is fully scored
    Finished(AlleleMap<A>),
    /// traversal gave up once every allele was past the threshold
    Stopped(AlleleMap<A>)
}

impl<A> AlignmentOutcome<A> {
    pub fn map(&self) -> &AlleleMap<A> {
        match self {
            AlignmentOutcome::Finished(map) => map,
            AlignmentOutcome::Stopped(map) => map
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, AlignmentOutcome::Finished(_))
    }

    pub fn into_map(self) -> AlleleMap<A> {
        match self {
            AlignmentOutcome::Finished(map) => map,
            AlignmentOutcome::Stopped(map) => map
        }
    }
}

/// Queue keys order the frontier by position, then node kind, then identity;
/// everything sharing the minimum position pops as one batch.
type QueueKey = (Position, u8, NodeId);
/// Each frontier entry tracks the read cursors a node is entered at, and the
/// alleles arriving with each cursor.
type FrontierEntry = Vec<(usize, AlleleSet)>;

/// Outcome of walking a read suffix against one node's residues.
enum LocalAlignment<A> {
    /// the read ran out (possibly together with the node)
    Finished(A),
    /// the node ran out with read left over; carries the new read cursor
    GoOn(A, usize)
}

/// Walks read and node residues in lockstep from the given offsets, charging
/// one penalty per mismatching base.
fn local_align<M: ScoringModel>(
    model: &M, read: &[u8], cursor: usize,
    node_start: Position, node_seq: &[u8], node_offset: usize,
    initial: M::Acc
) -> LocalAlignment<M::Acc> {
    let mut acc = initial;
    let mut i = cursor;
    let mut j = node_offset;
    while i < read.len() && j < node_seq.len() {
        if read[i] != node_seq[j] {
            acc = model.penalize(node_start + j as Position, i, 1, &acc);
        }
        i += 1;
        j += 1;
    }

    if i >= read.len() {
        LocalAlignment::Finished(acc)
    } else {
        LocalAlignment::GoOn(acc, i)
    }
}

/// Pushes (cursor, alleles) onto every successor whose edge label intersects
/// the traveling set, coalescing by cursor.
fn expand_successors(
    graph: &AlleleGraph, queue: &mut BTreeMap<QueueKey, FrontierEntry>,
    node_id: NodeId, cursor: usize, alleles: &AlleleSet
) {
    let current_position = graph.node(node_id).sort_position();
    for &(edge_id, successor) in graph.successors(node_id) {
        let arriving = alleles.intersection(graph.edge(edge_id).alleles());
        if arriving.is_empty() {
            continue;
        }

        let succ_node = graph.node(successor);
        assert!(
            succ_node.sort_position() >= current_position,
            "successor {succ_node:?} precedes node {:?}",
            graph.node(node_id)
        );

        let key = (succ_node.sort_position(), succ_node.tag_rank(), successor);
        let entry = queue.entry(key).or_default();
        match entry.iter_mut().find(|(c, _)| *c == cursor) {
            Some((_, set)) => set.union_with(&arriving),
            None => entry.push((cursor, arriving))
        }
    }
}

/// Aligns one read against the graph starting from one anchor position,
/// returning the per-allele accumulator map.
///
/// The read is never split: a single traversal advances the read cursor
/// through successive nodes, intersecting the traveling allele set with every
/// edge label so penalties land on exactly the alleles whose paths carry them.
/// Alleles with no presence near the anchor are charged a full-read-length
/// penalty up front.
/// # Arguments
/// * `graph` - the allele graph
/// * `model` - the scoring model instance
/// * `early_stop` - optional termination thresholds
/// * `read` - the read bases
/// * `anchor` - reference position the read's first base is anchored to
/// # Panics
/// * if the start sentinel ever reaches the traversal queue
pub fn align_read<M: ScoringModel>(
    graph: &AlleleGraph, model: &M, early_stop: Option<&EarlyStop>,
    read: &[u8], anchor: Position
) -> AlignmentOutcome<M::Acc> {
    let num_alleles = graph.allele_index().len();
    let mut map: AlleleMap<M::Acc> = AlleleMap::make(num_alleles, model.zero());
    let read_len = read.len();
    if read_len == 0 {
        return AlignmentOutcome::Finished(map);
    }

    let mut queue: BTreeMap<QueueKey, FrontierEntry> = BTreeMap::new();

    // seed the frontier; alleles with nothing near the anchor pay in full
    let adjacents = graph.adjacents_at(anchor);
    let unseen = adjacents.seen.complement();
    if !unseen.is_empty() {
        let full_penalty = model.penalize(anchor, 0, read_len, &model.zero());
        map.update_by_set(&unseen, |current| model.merge(current, &full_penalty));
    }

    for &(edge_id, node_id) in adjacents.entries.iter() {
        let alleles = graph.edge(edge_id).alleles().clone();
        let node = graph.node(node_id);
        let node_start = node.sort_position();
        let node_seq = node.sequence()
            .unwrap_or_else(|| panic!("non-sequence node {node:?} in seed frontier"))
            .as_bytes();

        let dist = node_start - anchor;
        if dist <= 0 {
            // anchor falls inside the node
            let local = local_align(model, read, 0, node_start, node_seq, (-dist) as usize, model.zero());
            commit_local(graph, model, &mut map, &mut queue, node_id, &alleles, local);
        } else if (dist as usize) < read_len {
            // the node starts inside the read span; the skipped prefix is all mismatch
            let prefix = model.penalize(anchor, 0, dist as usize, &model.zero());
            let local = local_align(model, read, dist as usize, node_start, node_seq, 0, prefix);
            commit_local(graph, model, &mut map, &mut queue, node_id, &alleles, local);
        } else {
            // the read ends before this path resumes
            let full_penalty = model.penalize(anchor, 0, read_len, &model.zero());
            map.update_by_set(&alleles, |current| model.merge(current, &full_penalty));
        }
    }

    if let Some(stop) = early_stop {
        if model.should_stop(stop, read_len, &map) {
            return AlignmentOutcome::Stopped(map);
        }
    }

    // min-position batches until the frontier drains
    while let Some((&(batch_position, _, _), _)) = queue.first_key_value() {
        loop {
            match queue.first_key_value() {
                Some((&(position, _, _), _)) if position == batch_position => {},
                _ => break
            }
            let ((_, _, node_id), items) = queue.pop_first().unwrap();
            process_node(graph, model, &mut map, &mut queue, node_id, items, read, read_len);
        }

        if let Some(stop) = early_stop {
            if model.should_stop(stop, read_len, &map) {
                return AlignmentOutcome::Stopped(map);
            }
        }
    }

    AlignmentOutcome::Finished(map)
}

/// Handles one popped frontier entry according to its node kind.
fn process_node<M: ScoringModel>(
    graph: &AlleleGraph, model: &M,
    map: &mut AlleleMap<M::Acc>, queue: &mut BTreeMap<QueueKey, FrontierEntry>,
    node_id: NodeId, items: FrontierEntry, read: &[u8], read_len: usize
) {
    match graph.node(node_id) {
        GraphNode::Start => {
            panic!(
                "start sentinel reached the traversal queue for read {:?}",
                String::from_utf8_lossy(read)
            );
        },
        GraphNode::Boundary { .. } => {
            // markers carry no residues, pass everything through
            for (cursor, alleles) in items {
                expand_successors(graph, queue, node_id, cursor, &alleles);
            }
        },
        GraphNode::End => {
            // the read extends past these alleles, the overhang is all mismatch
            for (cursor, alleles) in items {
                let remaining = read_len - cursor;
                if remaining > 0 {
                    let penalty = model.penalize(cursor as Position, cursor, remaining, &model.zero());
                    map.update_by_set(&alleles, |current| model.merge(current, &penalty));
                }
            }
        },
        GraphNode::Sequence { start, seq } => {
            let node_start = *start;
            let node_seq = seq.as_bytes();
            for (cursor, alleles) in items {
                let local = local_align(model, read, cursor, node_start, node_seq, 0, model.zero());
                commit_local(graph, model, map, queue, node_id, &alleles, local);
            }
        }
    }
}

/// Commits a local alignment outcome: the accumulator merges into the map for
/// the traveling alleles, and unfinished reads continue into the successors.
fn commit_local<M: ScoringModel>(
    graph: &AlleleGraph, model: &M,
    map: &mut AlleleMap<M::Acc>, queue: &mut BTreeMap<QueueKey, FrontierEntry>,
    node_id: NodeId, alleles: &AlleleSet, local: LocalAlignment<M::Acc>
) {
    match local {
        LocalAlignment::Finished(acc) => {
            map.update_by_set(alleles, |current| model.merge(current, &acc));
        },
        LocalAlignment::GoOn(acc, new_cursor) => {
            map.update_by_set(alleles, |current| model.merge(current, &acc));
            expand_successors(graph, queue, node_id, new_cursor, alleles);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    use crate::align::scoring::{MismatchCount, MismatchList, PhredLikelihood};
    use crate::graph::builder::{build_graph, GraphConfig};
    use crate::msa::parser::parse_msa;

    fn small_graph(body: &str) -> AlleleGraph {
        let text = format!("Test Alignment\n\n{body}");
        let alignment = parse_msa(std::io::Cursor::new(text)).unwrap();
        build_graph(&alignment, &GraphConfig::default()).unwrap()
    }

    fn counts_for(graph: &AlleleGraph, read: &[u8], anchor: Position) -> AlignmentOutcome<usize> {
        align_read(graph, &MismatchCount, None, read, anchor)
    }

    #[test]
    fn test_single_node_mismatch() {
        let graph = small_graph(" gDNA 0\n A*01 ACAT\n");
        let outcome = counts_for(&graph, b"ACGT", 0);
        assert!(outcome.is_finished());
        assert_eq!(outcome.map().values(), &[1]);
    }

    #[test]
    fn test_perfect_read_scores_zero() {
        let graph = small_graph(" gDNA 0\n A*01 ACGTACGTACGT\n A*02 --T---------\n");
        // a read lifted straight off the reference path
        let outcome = counts_for(&graph, b"GTACGT", 2);
        assert!(outcome.is_finished());
        let a1 = graph.allele_index().index_of("A*01").unwrap();
        let a2 = graph.allele_index().index_of("A*02").unwrap();
        assert_eq!(*outcome.map().get(a1), 0);
        assert_eq!(*outcome.map().get(a2), 1);
    }

    #[test]
    fn test_edge_filtering_parallel_alleles() {
        let graph = small_graph(" gDNA 0\n A*01 AAAA\n A*02 TTTT\n");
        let outcome = counts_for(&graph, b"AAAA", 0);
        assert!(outcome.is_finished());
        let a = graph.allele_index().index_of("A*01").unwrap();
        let b = graph.allele_index().index_of("A*02").unwrap();
        assert_eq!(*outcome.map().get(a), 0);
        assert_eq!(*outcome.map().get(b), 4);
    }

    #[test]
    fn test_read_past_allele_end() {
        // the second allele ends four columns early
        let graph = small_graph(" gDNA 0\n A*01 ACGTACGT\n A*02 ----****\n");
        let outcome = counts_for(&graph, b"ACGTACGT", 0);
        assert!(outcome.is_finished());
        let a1 = graph.allele_index().index_of("A*01").unwrap();
        let a2 = graph.allele_index().index_of("A*02").unwrap();
        assert_eq!(*outcome.map().get(a1), 0);
        assert_eq!(*outcome.map().get(a2), 4);
    }

    #[test]
    fn test_unseen_allele_full_penalty() {
        // the alternate's data starts after the read window entirely
        let graph = small_graph(" gDNA 0\n A*01 ACGTACGT\n A*02 ****--*-\n");
        let outcome = counts_for(&graph, b"ACG", 0);
        assert!(outcome.is_finished());
        let a2 = graph.allele_index().index_of("A*02").unwrap();
        assert_eq!(*outcome.map().get(a2), 3);
    }

    #[test]
    fn test_anchor_mid_node() {
        let graph = small_graph(" gDNA 0\n A*01 ACGTACGT\n");
        let outcome = counts_for(&graph, b"TACG", 3);
        assert!(outcome.is_finished());
        assert_eq!(outcome.map().values(), &[0]);
    }

    #[test]
    fn test_gapped_allele_prefix_charge() {
        // allele 2 is gapped over the anchor and resumes two columns later
        let graph = small_graph(" gDNA 0\n A*01 ACGTAC\n A*02 --..--\n");
        let outcome = counts_for(&graph, b"GTAC", 2);
        assert!(outcome.is_finished());
        let a1 = graph.allele_index().index_of("A*01").unwrap();
        let a2 = graph.allele_index().index_of("A*02").unwrap();
        assert_eq!(*outcome.map().get(a1), 0);
        // two skipped read bases, then AC aligns clean
        assert_eq!(*outcome.map().get(a2), 2);
    }

    #[test]
    fn test_traversal_crosses_boundary() {
        let graph = small_graph(" gDNA 0\n A*01 ACG|TACGT\n");
        let outcome = counts_for(&graph, b"ACGTACGT", 0);
        assert!(outcome.is_finished());
        assert_eq!(outcome.map().values(), &[0]);
    }

    #[test]
    fn test_mismatch_cap_is_read_length() {
        let graph = small_graph(" gDNA 0\n A*01 AAAA\n A*02 TTTT\n");
        let outcome = counts_for(&graph, b"GGGG", 0);
        for (_, &count) in outcome.map().iter() {
            assert!(count <= 4);
        }
    }

    #[test]
    fn test_early_stop_fires_on_first_mismatch() {
        let graph = small_graph(" gDNA 0\n A*01 ACAT\n");
        let stop = EarlyStop::new(0, 0.0);
        let outcome = align_read(&graph, &MismatchCount, Some(&stop), b"ACGT", 0);
        assert!(!outcome.is_finished());
        assert_eq!(outcome.map().values(), &[1]);

        // a clean read never trips it
        let clean = align_read(&graph, &MismatchCount, Some(&stop), b"ACAT", 0);
        assert!(clean.is_finished());
    }

    #[test]
    fn test_deterministic() {
        let body = " gDNA 0\n A*01 ACGTACGT\n A*02 --T--.--\n A*03 T------C\n";
        let graph = small_graph(body);
        let first = counts_for(&graph, b"CGTACG", 1);
        for _ in 0..3 {
            assert_eq!(counts_for(&graph, b"CGTACG", 1), first);
        }
    }

    #[test]
    fn test_mismatch_list_totals_match_counts() {
        let body = " gDNA 0\n A*01 ACGTACGT\n A*02 --T--.--\n A*03 T------C\n";
        let graph = small_graph(body);
        let read = b"ACTTACG";

        let counts = align_read(&graph, &MismatchCount, None, read, 0).into_map();
        let lists = align_read(&graph, &MismatchList, None, read, 0).into_map();
        for (allele, list) in lists.iter() {
            let total: usize = list.iter().map(|&(_, c)| c).sum();
            assert_eq!(total, *counts.get(allele), "allele {allele}");
        }
    }

    #[test]
    fn test_phred_matches_counts() {
        let graph = small_graph(" gDNA 0\n A*01 ACGT\n A*02 ---A\n");
        let read = b"ACGT";
        let error = 0.01;
        let model = PhredLikelihood::new(vec![error; read.len()], error);

        let outcome = align_read(&graph, &model, None, read, 0);
        let counts = align_read(&graph, &MismatchCount, None, read, 0).into_map();
        for (allele, acc) in outcome.map().iter() {
            let m = *counts.get(allele) as f64;
            let expected = crate::util::stats::log_likelihood(error, read.len(), m);
            assert_approx_eq!(model.finalize(*acc), expected);
        }
    }
}
