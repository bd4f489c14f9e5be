/// Contains the graph structure the aligner traverses
pub mod allele_graph;
/// Contains graph construction from a parsed alignment
pub mod builder;
/// Contains the on-disk cache for built graphs and indices
pub mod cache;
/// Contains the k-mer index used to anchor reads
pub mod kmer_index;
/// Contains the node and edge definitions
pub mod node;
