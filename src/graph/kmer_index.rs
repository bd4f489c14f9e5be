
use log::info;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use simple_error::{bail, SimpleError};

use crate::data_types::alignment::Position;
use crate::graph::allele_graph::AlleleGraph;
use crate::graph::node::{GraphNode, NodeId};

/// Maximum k that fits a 2-bit encoding in one u64
pub const MAX_KMER_SIZE: usize = 31;

/// K-mer lookup over the allele graph. Every k-length string realizable along
/// a graph path is indexed by the reference position of its first residue;
/// a read's leading k-mer then yields its candidate anchor positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KmerIndex {
    /// the indexed k-mer length
    k: usize,
    /// 2-bit encoded k-mer -> sorted, deduplicated anchor positions
    kmers: HashMap<u64, Vec<Position>>
}

/// Encodes one nucleotide into 2 bits, None for anything outside ACGT.
fn encode_base(base: u8) -> Option<u64> {
    match base {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None
    }
}

/// Encodes a full k-mer, None if any base is unencodable.
fn encode_kmer(seq: &[u8]) -> Option<u64> {
    let mut encoded: u64 = 0;
    for &base in seq.iter() {
        encoded = (encoded << 2) | encode_base(base)?;
    }
    Some(encoded)
}

impl KmerIndex {
    /// Builds the index by walking every k-length path suffix from every
    /// residue offset of every sequence node.
    /// # Arguments
    /// * `graph` - the finished allele graph
    /// * `k` - k-mer length, at most MAX_KMER_SIZE
    /// # Errors
    /// * if `k` is zero or too large for the encoding
    pub fn build(graph: &AlleleGraph, k: usize) -> Result<KmerIndex, SimpleError> {
        if k == 0 || k > MAX_KMER_SIZE {
            bail!("k-mer size must be between 1 and {MAX_KMER_SIZE}, got {k}");
        }

        let mut kmers: HashMap<u64, Vec<Position>> = Default::default();
        let mut buffer: Vec<u8> = Vec::with_capacity(k);
        for node_id in 0..graph.node_count() {
            let (start, seq) = match graph.node(node_id) {
                GraphNode::Sequence { start, seq } => (*start, seq.as_bytes()),
                _ => continue
            };
            for offset in 0..seq.len() {
                let anchor = start + offset as Position;
                buffer.clear();
                extend_kmers(graph, node_id, offset, k, &mut buffer, &mut |encoded| {
                    kmers.entry(encoded).or_default().push(anchor);
                });
            }
        }

        for positions in kmers.values_mut() {
            positions.sort_unstable();
            positions.dedup();
        }
        info!("Indexed {} distinct {k}-mers", kmers.len());

        Ok(KmerIndex {
            k,
            kmers
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn kmer_count(&self) -> usize {
        self.kmers.len()
    }

    /// Returns the anchor positions for a read, keyed on its leading k-mer.
    /// Reads shorter than k, or with an unencodable lead k-mer, anchor nowhere.
    pub fn lookup(&self, read: &[u8]) -> Vec<Position> {
        if read.len() < self.k {
            return vec![];
        }
        match encode_kmer(&read[..self.k]) {
            Some(encoded) => self.kmers.get(&encoded).cloned().unwrap_or_default(),
            None => vec![]
        }
    }
}

/// Depth-first k-mer extension: consumes residues from (node, offset), then
/// follows every outgoing edge until the buffer holds k residues. Boundary
/// nodes are passed through; paths that reach the end sentinel short are
/// abandoned.
fn extend_kmers<F: FnMut(u64)>(
    graph: &AlleleGraph, node_id: NodeId, offset: usize, k: usize,
    buffer: &mut Vec<u8>, emit: &mut F
) {
    let seq: &[u8] = match graph.node(node_id) {
        GraphNode::Sequence { seq, .. } => seq.as_bytes(),
        GraphNode::Boundary { .. } => &[],
        GraphNode::End => return,
        GraphNode::Start => return
    };

    let take = (k - buffer.len()).min(seq.len() - offset.min(seq.len()));
    let consumed_from = buffer.len();
    buffer.extend_from_slice(&seq[offset..offset + take]);

    if buffer.len() == k {
        if let Some(encoded) = encode_kmer(buffer) {
            emit(encoded);
        }
    } else {
        for &(_, successor) in graph.successors(node_id) {
            extend_kmers(graph, successor, 0, k, buffer, emit);
        }
    }
    buffer.truncate(consumed_from);
}
