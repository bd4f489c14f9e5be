/// Per-read failures; the aggregator collects these and keeps going, they
/// never abort a typing run
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ReadError {
    #[error("the index returned no anchor positions")]
    NoPositions,
    #[error("alignment stopped early at all {0} anchor positions")]
    AllStopped(usize),
    #[error("record could not be converted to aligner input: {0}")]
    Conversion(String),
    #[error("graph-side failure: {0}")]
    Graph(String)
}

/// A collected failure, tied back to the record it came from
#[derive(Debug, PartialEq)]
pub struct ReadFailure {
    /// the FASTQ record name
    pub read_name: String,
    /// what went wrong
    pub error: ReadError
}
