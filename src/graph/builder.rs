
use log::{debug, info, warn};
use regex::Regex;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use simple_error::bail;
use std::collections::BTreeSet;

use crate::data_types::alignment::{residue_at, AlignmentElement, Position};
use crate::data_types::allele_map::{AlleleIndex, AlleleSet};
use crate::graph::allele_graph::AlleleGraph;
use crate::graph::node::{Edge, EdgeId, GraphNode, NodeId};
use crate::msa::parser::MsaAlignment;

/// Controls for allele selection and node sharing at graph build time.
#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// keep alternates whose name matches any of these patterns
    pub allele_regexes: Vec<String>,
    /// keep alternates with exactly these names
    pub specific_alleles: Vec<String>,
    /// drop alternates with these names, applied after the keep filters
    pub excluded_alleles: Vec<String>,
    /// cap on the number of alternates threaded into the graph
    pub num_alt_alleles: Option<usize>,
    /// when true, alternates with identical fragments share one node;
    /// when false, alternates only share reference-identical fragments
    pub join_same_sequence: bool
}

impl Default for GraphConfig {
    fn default() -> GraphConfig {
        GraphConfig {
            allele_regexes: vec![],
            specific_alleles: vec![],
            excluded_alleles: vec![],
            num_alt_alleles: None,
            join_same_sequence: true
        }
    }
}

/// Applies the selection filters to the alternate list, preserving file order.
fn select_alternates<'a>(
    alignment: &'a MsaAlignment, config: &GraphConfig
) -> Result<Vec<(&'a str, &'a [AlignmentElement])>, Box<dyn std::error::Error>> {
    let mut regexes: Vec<Regex> = vec![];
    for pattern in config.allele_regexes.iter() {
        regexes.push(Regex::new(pattern)?);
    }
    let specific: HashSet<&str> = config.specific_alleles.iter().map(|s| s.as_str()).collect();
    let excluded: HashSet<&str> = config.excluded_alleles.iter().map(|s| s.as_str()).collect();

    let filtering = !specific.is_empty() || !regexes.is_empty();
    let mut found: HashSet<&str> = Default::default();
    let mut selected: Vec<(&str, &[AlignmentElement])> = vec![];
    for (name, elements) in alignment.alternates().iter() {
        if excluded.contains(name.as_str()) {
            continue;
        }
        if filtering {
            let name_match = specific.contains(name.as_str());
            if name_match {
                found.insert(name.as_str());
            }
            if !name_match && !regexes.iter().any(|r| r.is_match(name)) {
                continue;
            }
        }
        selected.push((name.as_str(), elements.as_slice()));
    }

    for wanted in specific.iter() {
        if !found.contains(wanted) {
            warn!("Requested allele was not found in the alignment: {wanted}");
        }
    }

    if let Some(cap) = config.num_alt_alleles {
        if selected.len() > cap {
            debug!("Truncating alternate selection from {} to {}", selected.len(), cap);
            selected.truncate(cap);
        }
    }
    Ok(selected)
}

/// Collects every position where some allele's content changes: run starts and
/// ends, gap edges, the column after each segment marker, and the edges of
/// every run of difference between an alternate and the reference. Nodes are
/// split at exactly these positions so identical stretches can share.
fn collect_breakpoints(
    reference: &[AlignmentElement],
    alleles: &[(&str, &[AlignmentElement])]
) -> BTreeSet<Position> {
    let mut breakpoints: BTreeSet<Position> = Default::default();
    for (_, elements) in alleles.iter() {
        for element in elements.iter() {
            match element {
                AlignmentElement::Start(pos) |
                AlignmentElement::End(pos) => {
                    breakpoints.insert(*pos);
                },
                AlignmentElement::Boundary { pos, .. } => {
                    breakpoints.insert(pos + 1);
                },
                AlignmentElement::Sequence { start, seq } => {
                    breakpoints.insert(*start);
                    breakpoints.insert(start + seq.len() as Position);

                    // split at the edges of each run differing from the reference
                    let mut in_diff = false;
                    for (offset, ch) in seq.chars().enumerate() {
                        let pos = start + offset as Position;
                        let differs = residue_at(reference, pos) != Some(ch);
                        if differs && !in_diff {
                            breakpoints.insert(pos);
                            in_diff = true;
                        } else if !differs && in_diff {
                            breakpoints.insert(pos);
                            in_diff = false;
                        }
                    }
                },
                AlignmentElement::Gap { start, length } => {
                    breakpoints.insert(*start);
                    breakpoints.insert(start + *length as Position);
                }
            }
        }
    }
    breakpoints
}

/// Working state while threading allele chains.
struct GraphAssembly {
    nodes: Vec<GraphNode>,
    edges: Vec<Edge>,
    edge_lookup: HashMap<(NodeId, NodeId), EdgeId>,
    boundary_nodes: HashMap<Position, NodeId>,
    /// (position, fragment) -> node, for shareable nodes
    shared_nodes: HashMap<(Position, String), NodeId>,
    /// position -> reference node, consulted when joining is disabled
    reference_nodes: HashMap<Position, NodeId>,
    num_alleles: usize
}

impl GraphAssembly {
    fn new(num_alleles: usize) -> GraphAssembly {
        GraphAssembly {
            nodes: vec![GraphNode::Start, GraphNode::End],
            edges: vec![],
            edge_lookup: Default::default(),
            boundary_nodes: Default::default(),
            shared_nodes: Default::default(),
            reference_nodes: Default::default(),
            num_alleles
        }
    }

    /// Adds `allele` to the (from, to) edge, creating it if needed.
    fn link(&mut self, from: NodeId, to: NodeId, allele: usize) {
        match self.edge_lookup.get(&(from, to)) {
            Some(&edge_id) => {
                self.edges[edge_id].add_allele(allele);
            },
            None => {
                let edge_id = self.edges.len();
                self.edges.push(Edge::new(from, to, AlleleSet::singleton(self.num_alleles, allele)));
                self.edge_lookup.insert((from, to), edge_id);
            }
        }
    }

    /// Fetches or creates the boundary node at a position.
    fn boundary_node(&mut self, idx: usize, pos: Position) -> NodeId {
        match self.boundary_nodes.get(&pos) {
            Some(&node_id) => node_id,
            None => {
                let node_id = self.nodes.len();
                self.nodes.push(GraphNode::Boundary { idx, pos });
                self.boundary_nodes.insert(pos, node_id);
                node_id
            }
        }
    }

    /// Fetches or creates the sequence node for one split fragment.
    /// # Arguments
    /// * `start` - reference position of the fragment
    /// * `fragment` - the residues
    /// * `is_reference` - true while threading the reference chain
    /// * `join` - whether alternates may share non-reference fragments
    fn sequence_node(&mut self, start: Position, fragment: &str, is_reference: bool, join: bool) -> NodeId {
        if is_reference || join {
            let key = (start, fragment.to_string());
            if let Some(&node_id) = self.shared_nodes.get(&key) {
                return node_id;
            }
            let node_id = self.nodes.len();
            self.nodes.push(GraphNode::Sequence { start, seq: fragment.to_string() });
            self.shared_nodes.insert(key, node_id);
            if is_reference {
                self.reference_nodes.insert(start, node_id);
            }
            return node_id;
        }

        // joining disabled: reuse only a reference-identical fragment
        if let Some(&ref_node) = self.reference_nodes.get(&start) {
            if self.nodes[ref_node].sequence() == Some(fragment) {
                return ref_node;
            }
        }
        let node_id = self.nodes.len();
        self.nodes.push(GraphNode::Sequence { start, seq: fragment.to_string() });
        node_id
    }
}

/// Splits a parsed sequence element at the global breakpoints.
fn split_fragments<'a>(
    start: Position, seq: &'a str, breakpoints: &[Position]
) -> Vec<(Position, &'a str)> {
    let end = start + seq.len() as Position;
    let lower = breakpoints.partition_point(|&b| b <= start);
    let mut pieces: Vec<(Position, &str)> = vec![];
    let mut piece_start = start;
    for &b in breakpoints[lower..].iter() {
        if b >= end {
            break;
        }
        pieces.push((piece_start, &seq[(piece_start - start) as usize..(b - start) as usize]));
        piece_start = b;
    }
    pieces.push((piece_start, &seq[(piece_start - start) as usize..]));
    pieces
}

/// Builds the allele graph from a parsed alignment.
/// The reference is threaded first so alternates can share its nodes; every
/// allele contributes one edge chain per Start/End run, with gaps expressed
/// as edges that skip the gapped columns entirely.
/// # Arguments
/// * `alignment` - the parsed MSA
/// * `config` - selection and sharing controls
/// # Errors
/// * if a selection regex fails to compile
/// * if selection leaves no alleles
pub fn build_graph(alignment: &MsaAlignment, config: &GraphConfig) -> Result<AlleleGraph, Box<dyn std::error::Error>> {
    let alternates = select_alternates(alignment, config)?;
    let mut alleles: Vec<(&str, &[AlignmentElement])> =
        vec![(alignment.reference_name(), alignment.reference_elements())];
    alleles.extend(alternates);

    let allele_index = AlleleIndex::new(alleles.iter().map(|(name, _)| name.to_string()).collect())?;
    info!("Building graph over {} alleles...", allele_index.len());

    let breakpoint_set = collect_breakpoints(alignment.reference_elements(), &alleles);
    if breakpoint_set.len() < 2 {
        bail!("Alignment produced no breakpoints, cannot build a graph");
    }
    let breakpoints: Vec<Position> = breakpoint_set.into_iter().collect();
    let segments: Vec<(Position, Position)> = breakpoints.windows(2)
        .map(|w| (w[0], w[1]))
        .collect();

    let mut assembly = GraphAssembly::new(allele_index.len());
    for (allele_idx, (name, elements)) in alleles.iter().enumerate() {
        let is_reference = allele_idx == 0;
        let mut previous: Option<NodeId> = None;
        for element in elements.iter() {
            match element {
                AlignmentElement::Start(_) => {
                    previous = Some(0);
                },
                AlignmentElement::End(_) => {
                    match previous.take() {
                        Some(prev) => assembly.link(prev, 1, allele_idx),
                        None => bail!("Allele {name} closed a run that was never opened")
                    }
                },
                AlignmentElement::Boundary { idx, pos } => {
                    // markers outside a data run exist only to keep indices aligned
                    if let Some(prev) = previous {
                        let boundary = assembly.boundary_node(*idx, *pos);
                        // consecutive markers share a position and collapse to one node
                        if boundary != prev {
                            assembly.link(prev, boundary, allele_idx);
                            previous = Some(boundary);
                        }
                    }
                },
                AlignmentElement::Gap { .. } => {},
                AlignmentElement::Sequence { start, seq } => {
                    let prev = match previous {
                        Some(p) => p,
                        None => bail!("Allele {name} has sequence data outside a run")
                    };
                    let mut chain_prev = prev;
                    for (piece_start, fragment) in split_fragments(*start, seq, &breakpoints) {
                        let node = assembly.sequence_node(
                            piece_start, fragment, is_reference, config.join_same_sequence
                        );
                        assembly.link(chain_prev, node, allele_idx);
                        chain_prev = node;
                    }
                    previous = Some(chain_prev);
                }
            }
        }
        if previous.is_some() {
            bail!("Allele {name} ended with an unclosed run");
        }
    }

    // positions never decrease along an edge, the traversal depends on it
    for edge in assembly.edges.iter() {
        let from = &assembly.nodes[edge.from()];
        let to = &assembly.nodes[edge.to()];
        assert!(
            from.sort_position() <= to.sort_position(),
            "edge goes backwards: {from:?} -> {to:?}"
        );
    }

    let segment_entries = build_segment_entries(&assembly.nodes, &assembly.edges, &segments);

    let graph = AlleleGraph::new(
        allele_index,
        assembly.nodes,
        assembly.edges,
        segments,
        segment_entries
    );
    info!("Graph complete: {} nodes, {} edges", graph.node_count(), graph.edge_count());
    Ok(graph)
}

/// Registers every edge into a sequence node on each breakpoint segment it
/// serves: the target's own segment, plus every gapped segment the edge jumps.
fn build_segment_entries(
    nodes: &[GraphNode], edges: &[Edge], segments: &[(Position, Position)]
) -> Vec<Vec<(EdgeId, NodeId)>> {
    let mut segment_entries: Vec<Vec<(EdgeId, NodeId)>> = vec![vec![]; segments.len()];
    for (edge_id, edge) in edges.iter().enumerate() {
        let target = &nodes[edge.to()];
        let (target_start, target_end) = match target {
            GraphNode::Sequence { start, seq } => (*start, start + seq.len() as Position),
            _ => continue
        };
        let serve_start = match &nodes[edge.from()] {
            GraphNode::Start => target_start,
            from_node => from_node.end_position()
        };

        let first = segments.partition_point(|&(s, _)| s < serve_start);
        for (segment_idx, &(seg_start, _)) in segments.iter().enumerate().skip(first) {
            if seg_start >= target_end {
                break;
            }
            segment_entries[segment_idx].push((edge_id, edge.to()));
        }
    }
    segment_entries
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::msa::parser::parse_msa;

    fn parse_str(body: &str) -> MsaAlignment {
        let text = format!("Test Alignment\n\n{body}");
        parse_msa(std::io::Cursor::new(text)).unwrap()
    }

    fn node_by_seq<'a>(graph: &'a AlleleGraph, seq: &str) -> Option<usize> {
        (0..graph.node_count()).find(|&i| graph.node(i).sequence() == Some(seq))
    }

    #[test]
    fn test_parallel_alleles() {
        // fully divergent alleles produce two parallel chains
        let alignment = parse_str(" gDNA 0\n A*01 AAAA\n A*02 TTTT\n");
        let graph = build_graph(&alignment, &GraphConfig::default()).unwrap();

        assert_eq!(graph.allele_index().len(), 2);
        let n1 = node_by_seq(&graph, "AAAA").unwrap();
        let n2 = node_by_seq(&graph, "TTTT").unwrap();

        // S -> AAAA -> E for allele 0, S -> TTTT -> E for allele 1
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
        let succ0: Vec<usize> = graph.successors(0).iter().map(|&(_, n)| n).collect();
        assert!(succ0.contains(&n1) && succ0.contains(&n2));

        for &(edge_id, node_id) in graph.successors(0) {
            let expected = if node_id == n1 { 0 } else { 1 };
            assert!(graph.edge(edge_id).alleles().contains(expected));
            assert_eq!(graph.edge(edge_id).alleles().cardinality(), 1);
        }
    }

    #[test]
    fn test_snp_splits_shared_prefix() {
        let alignment = parse_str(" gDNA 0\n A*01 ACGT\n A*02 ---A\n");
        let graph = build_graph(&alignment, &GraphConfig::default()).unwrap();

        // shared prefix ACG, then T for the reference and A for the alternate
        let prefix = node_by_seq(&graph, "ACG").unwrap();
        let ref_tail = node_by_seq(&graph, "T").unwrap();
        let alt_tail = node_by_seq(&graph, "A").unwrap();

        let entry_edge = graph.successors(0)[0].0;
        assert_eq!(graph.edge(entry_edge).alleles().cardinality(), 2);

        let succ: Vec<usize> = graph.successors(prefix).iter().map(|&(_, n)| n).collect();
        assert!(succ.contains(&ref_tail) && succ.contains(&alt_tail));
    }

    #[test]
    fn test_gap_creates_skip_edge() {
        let alignment = parse_str(" gDNA 0\n A*01 ACGTAC\n A*02 --..--\n");
        let graph = build_graph(&alignment, &GraphConfig::default()).unwrap();

        let prefix = node_by_seq(&graph, "AC").unwrap();
        let middle = node_by_seq(&graph, "GT").unwrap();
        let suffix = (0..graph.node_count())
            .find(|&i| graph.node(i) == &GraphNode::Sequence { start: 4, seq: "AC".to_string() })
            .unwrap();
        assert_ne!(prefix, suffix);

        // the alternate jumps from the prefix straight past the gapped columns
        let succ: Vec<usize> = graph.successors(prefix).iter().map(|&(_, n)| n).collect();
        assert!(succ.contains(&middle));
        assert_eq!(succ.len(), 2);

        // an anchor inside the gapped segment still serves the gapped allele
        let adjacents = graph.adjacents_at(2);
        assert_eq!(adjacents.seen.cardinality(), 2);
    }

    #[test]
    fn test_boundary_threaded() {
        let alignment = parse_str(" gDNA 0\n A*01 ACG|TAC\n A*02 ---|--T\n");
        let graph = build_graph(&alignment, &GraphConfig::default()).unwrap();

        let boundary = (0..graph.node_count())
            .find(|&i| matches!(graph.node(i), GraphNode::Boundary { pos: 2, .. }))
            .unwrap();
        // both alleles route through the single boundary node
        let incoming: Vec<&Edge> = (0..graph.edge_count())
            .map(|i| graph.edge(i))
            .filter(|e| e.to() == boundary)
            .collect();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].alleles().cardinality(), 2);
    }

    #[test]
    fn test_join_disabled_keeps_alt_nodes_apart() {
        let body = " gDNA 0\n A*01 ACGT\n A*02 ---A\n A*03 ---A\n";
        let alignment = parse_str(body);

        let joined = build_graph(&alignment, &GraphConfig::default()).unwrap();
        let disjoint = build_graph(&alignment, &GraphConfig {
            join_same_sequence: false,
            ..Default::default()
        }).unwrap();

        // with joining the two alternates share the A node; without it they do not
        assert_eq!(disjoint.node_count(), joined.node_count() + 1);
    }

    #[test]
    fn test_selection_filters() {
        let body = " gDNA 0\n A*01:01 ACGT\n A*02:01 ---A\n A*03:01 --T-\n B*01:01 T---\n";
        let alignment = parse_str(body);

        let specific = build_graph(&alignment, &GraphConfig {
            specific_alleles: vec!["A*02:01".to_string()],
            ..Default::default()
        }).unwrap();
        assert_eq!(specific.allele_index().names(), &["A*01:01".to_string(), "A*02:01".to_string()]);

        let regexed = build_graph(&alignment, &GraphConfig {
            allele_regexes: vec!["^A\\*".to_string()],
            ..Default::default()
        }).unwrap();
        assert_eq!(regexed.allele_index().len(), 3);

        let capped = build_graph(&alignment, &GraphConfig {
            num_alt_alleles: Some(1),
            ..Default::default()
        }).unwrap();
        assert_eq!(capped.allele_index().names(), &["A*01:01".to_string(), "A*02:01".to_string()]);

        let without = build_graph(&alignment, &GraphConfig {
            excluded_alleles: vec!["A*03:01".to_string()],
            ..Default::default()
        }).unwrap();
        assert_eq!(without.allele_index().len(), 3);
        assert!(without.allele_index().index_of("A*03:01").is_none());
    }

    #[test]
    fn test_bad_regex_is_error() {
        let alignment = parse_str(" gDNA 0\n A*01 ACGT\n");
        let result = build_graph(&alignment, &GraphConfig {
            allele_regexes: vec!["[unclosed".to_string()],
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_region_splits_runs() {
        let alignment = parse_str(" gDNA 0\n A*01 ACGTACGT\n A*02 --**--**\n");
        let graph = build_graph(&alignment, &GraphConfig::default()).unwrap();

        // the alternate has two runs, each wired to both sentinels
        let end_edges: Vec<&Edge> = (0..graph.edge_count())
            .map(|i| graph.edge(i))
            .filter(|e| e.to() == 1 && e.alleles().contains(1))
            .collect();
        assert_eq!(end_edges.len(), 2);
    }
}
