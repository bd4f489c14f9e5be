/// Contains the parser for IMGT-style multiple-sequence alignment files
pub mod parser;
