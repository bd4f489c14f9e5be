
/// Contains the read aligner, scoring models, and score aggregation
pub mod align;
/// Contains all the CLI related functionality
pub mod cli;
/// Contains any specialized data types that are shared across the tooling
pub mod data_types;
/// Contains the allele graph, its builder, the k-mer index, and the disk cache
pub mod graph;
/// Contains the parser for IMGT-style multiple-sequence alignment files
pub mod msa;
/// Contains the typing pipeline from validated settings to ranked alleles
pub mod typer;
/// Contains generic utilities that are handy wrappers
pub mod util;
