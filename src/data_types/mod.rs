/// Contains the alignment element algebra shared by the parser and the graph
pub mod alignment;
/// Contains the allele enumeration, bitset, and dense per-allele map
pub mod allele_map;
