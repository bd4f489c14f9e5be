

use clap::Args;
use log::{debug, info, warn};
use simple_error::bail;
use std::path::PathBuf;

use crate::align::aggregator::{AggregationConfig, ScoringStatistic};
use crate::align::scoring::EarlyStop;
use crate::cli::core::{AFTER_HELP, check_required_filename};
use crate::graph::builder::GraphConfig;
use crate::graph::cache::DEFAULT_CACHE_DIR;
use crate::graph::kmer_index::MAX_KMER_SIZE;

#[derive(Args, Clone, Default)]
#[clap(author, about,
    after_help = &**AFTER_HELP)]
pub struct TypeSettings {
    /// Input allele alignment file from the IMGT database (TXT)
    #[clap(required = true)]
    #[clap(short = 'a')]
    #[clap(long = "alignment-file")]
    #[clap(value_name = "TXT")]
    #[clap(help_heading = Some("Input/Output"))]
    pub alignment_file: PathBuf,

    /// Input reads in FASTQ format, optionally gzipped
    #[clap(required = true)]
    #[clap(short = 'q')]
    #[clap(long = "fastq")]
    #[clap(value_name = "FASTQ")]
    #[clap(help_heading = Some("Input/Output"))]
    pub fastq_file: PathBuf,

    /// Optional output file with the full allele ranking (TSV)
    #[clap(long = "output-tsv")]
    #[clap(value_name = "TSV")]
    #[clap(help_heading = Some("Input/Output"))]
    pub output_tsv: Option<PathBuf>,

    /// Only build the graph over alleles matching this pattern, can be specified multiple times
    #[clap(long = "allele-regex")]
    #[clap(value_name = "REGEX")]
    #[clap(help_heading = Some("Graph construction"))]
    pub allele_regexes: Vec<String>,

    /// Only build the graph over this exact allele, can be specified multiple times
    #[clap(long = "specific-allele")]
    #[clap(value_name = "NAME")]
    #[clap(help_heading = Some("Graph construction"))]
    pub specific_alleles: Vec<String>,

    /// Leave this allele out of the graph, can be specified multiple times
    #[clap(long = "exclude-allele")]
    #[clap(value_name = "NAME")]
    #[clap(help_heading = Some("Graph construction"))]
    pub excluded_alleles: Vec<String>,

    /// The maximum number of alternate alleles threaded into the graph
    #[clap(long = "num-alt-alleles")]
    #[clap(value_name = "COUNT")]
    #[clap(help_heading = Some("Graph construction"))]
    pub num_alt_alleles: Option<usize>,

    /// The k-mer size for the read-anchoring index
    #[clap(short = 'k')]
    #[clap(long = "kmer-size")]
    #[clap(value_name = "SIZE")]
    #[clap(default_value = "10")]
    #[clap(help_heading = Some("Graph construction"))]
    pub kmer_size: usize,

    /// Disables node sharing between alternate alleles with identical fragments
    #[clap(long = "disable-node-joining")]
    #[clap(help_heading = Some("Graph construction"))]
    pub disable_node_joining: bool,

    /// Disables the on-disk cache of built graphs and indices
    #[clap(long = "disable-cache")]
    #[clap(help_heading = Some("Graph construction"))]
    pub disable_cache: bool,

    /// The cache directory for built graphs and indices
    #[clap(long = "cache-dir")]
    #[clap(value_name = "DIR")]
    #[clap(default_value = DEFAULT_CACHE_DIR)]
    #[clap(help_heading = Some("Graph construction"))]
    pub cache_dir: PathBuf,

    /// Rank alleles by total mismatch count (default statistic)
    #[clap(long = "mismatches")]
    #[clap(group = "statistic")]
    #[clap(help_heading = Some("Scoring"))]
    pub mismatches: bool,

    /// Rank alleles by per-position mismatch records
    #[clap(long = "mis-list")]
    #[clap(group = "statistic")]
    #[clap(help_heading = Some("Scoring"))]
    pub mis_list: bool,

    /// Rank alleles by the product of per-read likelihoods
    #[clap(long = "likelihood")]
    #[clap(group = "statistic")]
    #[clap(help_heading = Some("Scoring"))]
    pub likelihood: bool,

    /// Rank alleles by the sum of per-read log-likelihoods
    #[clap(long = "log-likelihood")]
    #[clap(group = "statistic")]
    #[clap(help_heading = Some("Scoring"))]
    pub log_likelihood: bool,

    /// Rank alleles by per-base quality-aware log-likelihoods
    #[clap(long = "phred-likelihood")]
    #[clap(group = "statistic")]
    #[clap(help_heading = Some("Scoring"))]
    pub phred_likelihood: bool,

    /// The per-base error rate assumed by the likelihood statistics
    #[clap(long = "likelihood-error")]
    #[clap(value_name = "FLOAT")]
    #[clap(default_value = "0.025")]
    #[clap(help_heading = Some("Scoring"))]
    pub likelihood_error: f64,

    /// Stop aligning a read once every allele exceeds this many mismatches
    #[clap(long = "filter-matches")]
    #[clap(value_name = "COUNT")]
    #[clap(help_heading = Some("Scoring"))]
    pub filter_matches: Option<usize>,

    /// Read-length fraction added to the early-stop threshold
    #[clap(long = "filter-fraction")]
    #[clap(value_name = "FLOAT")]
    #[clap(default_value = "0.0")]
    #[clap(help_heading = Some("Scoring"))]
    pub filter_fraction: f64,

    /// Print only the top COUNT ranking rows
    #[clap(long = "print-top")]
    #[clap(value_name = "COUNT")]
    #[clap(help_heading = Some("Reporting"))]
    pub print_top: Option<usize>,

    /// Report raw likelihood scores instead of normalized probabilities
    #[clap(long = "do-not-normalize")]
    #[clap(help_heading = Some("Reporting"))]
    pub do_not_normalize: bool,

    /// Report each allele on its own row instead of grouping equal scores
    #[clap(long = "do-not-bucket")]
    #[clap(help_heading = Some("Reporting"))]
    pub do_not_bucket: bool,

    /// Enable verbose output.
    #[clap(short = 'v')]
    #[clap(long = "verbose")]
    #[clap(action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl TypeSettings {
    /// The selected scoring statistic; mismatch counting when nothing is set.
    pub fn statistic(&self) -> ScoringStatistic {
        if self.mis_list {
            ScoringStatistic::MismatchPositions
        } else if self.likelihood {
            ScoringStatistic::Likelihood
        } else if self.log_likelihood {
            ScoringStatistic::LogLikelihood
        } else if self.phred_likelihood {
            ScoringStatistic::PhredLikelihood
        } else {
            ScoringStatistic::Mismatches
        }
    }

    /// The early-stop thresholds, None when filtering is off.
    pub fn early_stop(&self) -> Option<EarlyStop> {
        self.filter_matches
            .map(|max_value| EarlyStop::new(max_value, self.filter_fraction))
    }

    /// The graph-build configuration these settings describe.
    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            allele_regexes: self.allele_regexes.clone(),
            specific_alleles: self.specific_alleles.clone(),
            excluded_alleles: self.excluded_alleles.clone(),
            num_alt_alleles: self.num_alt_alleles,
            join_same_sequence: !self.disable_node_joining
        }
    }

    /// The aggregation configuration these settings describe.
    pub fn aggregation_config(&self) -> AggregationConfig {
        AggregationConfig {
            statistic: self.statistic(),
            error_rate: self.likelihood_error,
            early_stop: self.early_stop()
        }
    }
}

pub fn check_type_settings(settings: TypeSettings) -> Result<TypeSettings, Box<dyn std::error::Error>> {
    info!("Inputs:");

    // check for all the required input files
    check_required_filename(&settings.alignment_file, "Alignment file");
    check_required_filename(&settings.fastq_file, "FASTQ file");

    info!("\tAlignment file: {:?}", settings.alignment_file);
    info!("\tFASTQ: {:?}", settings.fastq_file);

    info!("Graph settings:");
    if !settings.allele_regexes.is_empty() {
        info!("\tAllele patterns: {:?}", settings.allele_regexes);
    }
    if !settings.specific_alleles.is_empty() {
        info!("\tSpecific alleles: {:?}", settings.specific_alleles);
    }
    if !settings.excluded_alleles.is_empty() {
        info!("\tExcluded alleles: {:?}", settings.excluded_alleles);
    }
    if let Some(cap) = settings.num_alt_alleles {
        if cap == 0 {
            warn!("\t--num-alt-alleles is 0, only the reference allele will be typed");
        }
        info!("\tAlternate allele cap: {cap}");
    }

    if settings.kmer_size == 0 || settings.kmer_size > MAX_KMER_SIZE {
        bail!("--kmer-size must be between 1 and {MAX_KMER_SIZE}");
    }
    info!("\tK-mer size: {}", settings.kmer_size);
    if settings.disable_node_joining {
        info!("\tNode joining: DISABLED");
    }
    if settings.disable_cache {
        info!("\tCache: DISABLED");
    } else {
        debug!("\tCache directory: {:?}", settings.cache_dir);
    }

    info!("Scoring settings:");
    info!("\tStatistic: {:?}", settings.statistic());
    if !(0.0..1.0).contains(&settings.likelihood_error) || settings.likelihood_error == 0.0 {
        bail!("--likelihood-error must be between 0.0 and 1.0, exclusive");
    }
    info!("\tLikelihood error rate: {}", settings.likelihood_error);

    if settings.filter_fraction < 0.0 {
        bail!("--filter-fraction must be non-negative");
    }
    match settings.early_stop() {
        Some(early_stop) => {
            info!("\tEarly stop: {} + {} * read_len", early_stop.max_value, early_stop.fraction);
        },
        None => {
            if settings.filter_fraction != 0.0 {
                warn!("\t--filter-fraction has no effect without --filter-matches");
            }
            info!("\tEarly stop: DISABLED");
        }
    }

    info!("Reporting settings:");
    if let Some(top) = settings.print_top {
        info!("\tPrint top: {top}");
    }
    if settings.do_not_normalize {
        info!("\tNormalization: DISABLED");
    }
    if settings.do_not_bucket {
        info!("\tBucketing: DISABLED");
    }

    Ok(settings)
}
