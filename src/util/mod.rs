/// Generic functionality for reading/writing serializable objects to file
pub mod file_io;
/// Contains generic statistical functions
pub mod stats;
