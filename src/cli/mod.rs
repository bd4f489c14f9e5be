/// the main CLI module
pub mod core;
/// the type CLI subcommand for ranking alleles against a read set
pub mod typing;
