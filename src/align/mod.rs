/// Contains the multi-read fold over a FASTQ stream
pub mod aggregator;
/// Contains the priority-queue traversal aligning one read to the graph
pub mod aligner;
/// Contains the per-read error kinds
pub mod errors;
/// Contains the per-read reduction over anchor positions
pub mod reducer;
/// Contains the scoring-model abstraction and its instances
pub mod scoring;
