
use simple_error::{bail, SimpleError};

/// Number of distinct residues a read base can take
pub const ALPHABET_SIZE: usize = 4;
/// Default per-base sequencing error rate for the uniform likelihood models
pub const DEFAULT_ERROR_RATE: f64 = 0.025;
/// FASTQ quality strings encode Phred scores with this ASCII offset
const PHRED_OFFSET: u8 = 33;

/// Log-likelihood of observing a read of `read_len` bases with `mismatches`
/// of them disagreeing with the path it aligned to, under a uniform per-base
/// error rate. A mismatching base must also have hit one specific wrong
/// residue out of the alternatives, hence the alphabet division.
/// # Arguments
/// * `error_rate` - the per-base error probability
/// * `read_len` - total read length
/// * `mismatches` - observed mismatch count
pub fn log_likelihood(error_rate: f64, read_len: usize, mismatches: f64) -> f64 {
    let matches = read_len as f64 - mismatches;
    matches * (1.0 - error_rate).ln() + mismatches * (error_rate / (ALPHABET_SIZE - 1) as f64).ln()
}

/// The plain-space version of log_likelihood.
pub fn likelihood(error_rate: f64, read_len: usize, mismatches: f64) -> f64 {
    log_likelihood(error_rate, read_len, mismatches).exp()
}

/// Decodes one FASTQ quality character into a per-base error probability.
/// # Arguments
/// * `qual` - the raw quality byte from the FASTQ record
/// # Errors
/// * if the byte is below the Phred+33 range
pub fn phred_to_error_probability(qual: u8) -> Result<f64, SimpleError> {
    if qual < PHRED_OFFSET {
        bail!("Quality character below the Phred+33 range: {qual}");
    }
    let phred = (qual - PHRED_OFFSET) as f64;
    Ok(10.0_f64.powf(-phred / 10.0))
}
