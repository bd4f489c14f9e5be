
use bio::io::fastq;
use log::{debug, info, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::align::errors::{ReadError, ReadFailure};
use crate::align::reducer::reduce_read;
use crate::align::scoring::{EarlyStop, MismatchCount, MismatchList, PhredLikelihood};
use crate::data_types::alignment::Position;
use crate::data_types::allele_map::AlleleMap;
use crate::graph::allele_graph::AlleleGraph;
use crate::graph::kmer_index::KmerIndex;
use crate::util::stats::{likelihood, log_likelihood, phred_to_error_probability};

/// The statistical model folding per-read alignments into final scores
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoringStatistic {
    /// summed mismatch counts per allele
    Mismatches,
    /// concatenated per-position mismatch records per allele
    MismatchPositions,
    /// product of per-read likelihoods under a uniform error rate
    Likelihood,
    /// sum of per-read log-likelihoods under a uniform error rate
    LogLikelihood,
    /// sum of per-read log-likelihoods under per-base Phred qualities
    PhredLikelihood
}

/// Controls for one aggregation run.
#[derive(Clone, Debug)]
pub struct AggregationConfig {
    /// the statistic to fold reads under
    pub statistic: ScoringStatistic,
    /// uniform per-base error rate for the likelihood statistics
    pub error_rate: f64,
    /// optional early-stop thresholds, shared by every read
    pub early_stop: Option<EarlyStop>
}

/// Final per-allele values, shaped by the chosen statistic.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregateScores {
    /// total mismatch counts
    Counts(AlleleMap<usize>),
    /// every (position, count) record observed, unsorted
    Positions(AlleleMap<Vec<(Position, usize)>>),
    /// multiplied read likelihoods
    Likelihoods(AlleleMap<f64>),
    /// summed read log-likelihoods
    LogLikelihoods(AlleleMap<f64>)
}

/// Everything a typing run produces before reporting.
#[derive(Debug)]
pub struct TypingOutcome {
    /// the folded per-allele scores
    pub scores: AggregateScores,
    /// reads that aligned and contributed to the scores
    pub reads_aligned: usize,
    /// reads that did not, with the reason each was set aside
    pub failures: Vec<ReadFailure>
}

/// Opens a FASTQ file, transparently decompressing gzip by extension.
fn open_fastq(filename: &Path) -> Result<fastq::Records<BufReader<Box<dyn std::io::Read>>>, Box<dyn std::error::Error>> {
    let fp: Box<dyn std::io::Read> = if filename.extension().unwrap_or_default() == "gz" {
        Box::new(
            flate2::read::MultiGzDecoder::new(
                File::open(filename)?
            )
        )
    } else {
        Box::new(File::open(filename)?)
    };
    Ok(fastq::Reader::new(fp).records())
}

/// Streams a FASTQ file through the aligner and folds the per-read maps into
/// a final per-allele score map under the configured statistic. Per-read
/// failures are collected, never fatal; only I/O and record-level corruption
/// abort the run.
/// # Arguments
/// * `graph` - the allele graph
/// * `index` - the k-mer index anchoring each read
/// * `fastq_filename` - the read input
/// * `config` - statistic selection and thresholds
/// # Errors
/// * if the FASTQ cannot be opened or a record is malformed
pub fn aggregate_fastq(
    graph: &AlleleGraph, index: &KmerIndex, fastq_filename: &Path, config: &AggregationConfig
) -> Result<TypingOutcome, Box<dyn std::error::Error>> {
    info!("Aligning reads from {fastq_filename:?}...");
    let num_alleles = graph.allele_index().len();
    let early_stop = config.early_stop.as_ref();

    let mut failures: Vec<ReadFailure> = vec![];
    let mut reads_aligned: usize = 0;

    // each statistic keeps its own accumulator shape; only one is used per run
    let mut count_totals: AlleleMap<usize> = AlleleMap::make(num_alleles, 0);
    let mut position_totals: AlleleMap<Vec<(Position, usize)>> = AlleleMap::make(num_alleles, vec![]);
    let mut float_totals: AlleleMap<f64> = AlleleMap::make(
        num_alleles,
        if config.statistic == ScoringStatistic::Likelihood { 1.0 } else { 0.0 }
    );

    for record_result in open_fastq(fastq_filename)? {
        let record = record_result?;
        let read_name = record.id().to_string();
        let read: Vec<u8> = record.seq().to_ascii_uppercase();
        let anchors = index.lookup(&read);

        let read_result: Result<(), ReadError> = match config.statistic {
            ScoringStatistic::Mismatches => {
                reduce_read(graph, &MismatchCount, early_stop, &read, &anchors)
                    .map(|map| count_totals.update_from(&map, |total, v| total + v))
            },
            ScoringStatistic::MismatchPositions => {
                reduce_read(graph, &MismatchList, early_stop, &read, &anchors)
                    .map(|map| position_totals.update_from(&map, |total, v| {
                        let mut merged = total.clone();
                        merged.extend_from_slice(v);
                        merged
                    }))
            },
            ScoringStatistic::Likelihood => {
                reduce_read(graph, &MismatchCount, early_stop, &read, &anchors)
                    .map(|map| float_totals.update_from(
                        &map.map(|&m| likelihood(config.error_rate, read.len(), m as f64)),
                        |total, v| total * v
                    ))
            },
            ScoringStatistic::LogLikelihood => {
                reduce_read(graph, &MismatchCount, early_stop, &read, &anchors)
                    .map(|map| float_totals.update_from(
                        &map.map(|&m| log_likelihood(config.error_rate, read.len(), m as f64)),
                        |total, v| total + v
                    ))
            },
            ScoringStatistic::PhredLikelihood => {
                decode_qualities(record.qual())
                    .and_then(|probs| {
                        let model = PhredLikelihood::new(probs, config.error_rate);
                        reduce_read(graph, &model, early_stop, &read, &anchors)
                            .map(|map| float_totals.update_from(
                                &map.map(|&acc| model.finalize(acc)),
                                |total, v| total + v
                            ))
                    })
            }
        };

        match read_result {
            Ok(()) => {
                reads_aligned += 1;
            },
            Err(error) => {
                debug!("Read {read_name} set aside: {error}");
                failures.push(ReadFailure {
                    read_name,
                    error
                });
            }
        }
    }

    if !failures.is_empty() {
        warn!("{} reads were set aside during alignment", failures.len());
    }
    info!("Aligned {reads_aligned} reads");

    let scores = match config.statistic {
        ScoringStatistic::Mismatches => AggregateScores::Counts(count_totals),
        ScoringStatistic::MismatchPositions => AggregateScores::Positions(position_totals),
        ScoringStatistic::Likelihood => AggregateScores::Likelihoods(float_totals),
        ScoringStatistic::LogLikelihood |
        ScoringStatistic::PhredLikelihood => AggregateScores::LogLikelihoods(float_totals)
    };

    Ok(TypingOutcome {
        scores,
        reads_aligned,
        failures
    })
}

/// Decodes a FASTQ quality string into per-base error probabilities.
fn decode_qualities(qual: &[u8]) -> Result<Vec<f64>, ReadError> {
    qual.iter()
        .map(|&q| phred_to_error_probability(q).map_err(|e| ReadError::Conversion(e.to_string())))
        .collect()
}
