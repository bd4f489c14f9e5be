
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;
use std::path::Path;

use crate::align::aggregator::{aggregate_fastq, AggregateScores, AggregationConfig, TypingOutcome};
use crate::align::errors::{ReadError, ReadFailure};
use crate::cli::typing::TypeSettings;
use crate::data_types::allele_map::{AlleleIndex, AlleleMap};
use crate::graph::cache::GraphCache;

/// One reported row: every allele sharing a score, best first.
#[derive(Debug, PartialEq, Serialize)]
pub struct RankedRow {
    /// 1-based rank of this row
    pub rank: usize,
    /// the allele names sharing the score, semicolon separated
    pub alleles: String,
    /// the row's score under the chosen statistic
    pub score: f64,
    /// per-position mismatch detail, only for the positional statistic
    pub positions: Option<String>
}

/// Runs the whole typing pipeline for validated CLI settings: load or build
/// the graph and index, align the read stream, rank the alleles, report.
/// # Arguments
/// * `settings` - the validated `type` subcommand settings
/// # Errors
/// * on alignment-file parse errors, graph build errors, or FASTQ I/O errors
pub fn run_typing(settings: &TypeSettings) -> Result<Vec<RankedRow>, Box<dyn std::error::Error>> {
    let cache = GraphCache::new(&settings.cache_dir, !settings.disable_cache);
    let (graph, fingerprint) = cache.load_or_build_graph(&settings.alignment_file, &settings.graph_config())?;
    let index = cache.load_or_build_index(&graph, &fingerprint, settings.kmer_size)?;

    let aggregation: AggregationConfig = settings.aggregation_config();
    let outcome = aggregate_fastq(&graph, &index, &settings.fastq_file, &aggregation)?;
    summarize_failures(&outcome.failures);

    let rows = rank_alleles(
        graph.allele_index(),
        &outcome,
        !settings.do_not_normalize,
        !settings.do_not_bucket
    );

    let shown = settings.print_top.unwrap_or(rows.len()).min(rows.len());
    println!("rank\tscore\talleles");
    for row in rows[..shown].iter() {
        match row.positions.as_ref() {
            Some(positions) => println!("{}\t{}\t{}\t{}", row.rank, format_score(row.score), row.alleles, positions),
            None => println!("{}\t{}\t{}", row.rank, format_score(row.score), row.alleles)
        }
    }

    if let Some(tsv_fn) = settings.output_tsv.as_ref() {
        info!("Saving full ranking to {tsv_fn:?}");
        save_ranking_tsv(&rows, tsv_fn)?;
    }
    Ok(rows)
}

/// Integer-valued scores print without a fraction.
fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e15 {
        format!("{score}")
    } else {
        format!("{score:.6e}")
    }
}

/// Writes the complete ranking as TSV.
fn save_ranking_tsv(rows: &[RankedRow], filename: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut csv_writer: csv::Writer<std::fs::File> = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(filename)?;
    for row in rows.iter() {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Logs a compact tally of per-read failures.
fn summarize_failures(failures: &[ReadFailure]) {
    if failures.is_empty() {
        return;
    }
    let mut no_positions = 0;
    let mut all_stopped = 0;
    let mut conversion = 0;
    let mut graph_side = 0;
    for failure in failures.iter() {
        match failure.error {
            ReadError::NoPositions => no_positions += 1,
            ReadError::AllStopped(_) => all_stopped += 1,
            ReadError::Conversion(_) => conversion += 1,
            ReadError::Graph(_) => graph_side += 1
        }
        debug!("\t{}: {}", failure.read_name, failure.error);
    }
    warn!(
        "Set-aside reads: {no_positions} unanchored, {all_stopped} early-stopped, \
         {conversion} unconvertible, {graph_side} graph-side"
    );
}

/// Converts aggregate scores into ranked output rows: best score first,
/// optionally normalized into probabilities, optionally bucketing equal
/// scores onto one row.
pub fn rank_alleles(
    allele_index: &AlleleIndex, outcome: &TypingOutcome,
    normalize: bool, bucket: bool
) -> Vec<RankedRow> {
    let prefers_larger = !matches!(
        outcome.scores,
        AggregateScores::Counts(_) | AggregateScores::Positions(_)
    );

    // flatten into (name, score, positions)
    let mut scored: Vec<(String, f64, Option<String>)> = match &outcome.scores {
        AggregateScores::Counts(map) => map.iter()
            .map(|(allele, &count)| (allele_index.name(allele).to_string(), count as f64, None))
            .collect(),
        AggregateScores::Positions(map) => map.iter()
            .map(|(allele, records)| {
                let total: usize = records.iter().map(|&(_, count)| count).sum();
                let mut sorted = records.clone();
                sorted.sort_unstable();
                let rendered = sorted.iter()
                    .map(|(pos, count)| format!("{pos}:{count}"))
                    .join(",");
                (allele_index.name(allele).to_string(), total as f64, Some(rendered))
            })
            .collect(),
        AggregateScores::Likelihoods(map) => {
            let values = normalized_likelihoods(map, normalize);
            values.into_iter()
                .enumerate()
                .map(|(allele, value)| (allele_index.name(allele).to_string(), value, None))
                .collect()
        },
        AggregateScores::LogLikelihoods(map) => {
            let values = normalized_log_likelihoods(map, normalize);
            values.into_iter()
                .enumerate()
                .map(|(allele, value)| (allele_index.name(allele).to_string(), value, None))
                .collect()
        }
    };

    // best first, name as the deterministic tie-break
    scored.sort_by(|a, b| {
        let ordering = if prefers_larger {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        } else {
            a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
        };
        ordering.then_with(|| a.0.cmp(&b.0))
    });

    let mut rows: Vec<RankedRow> = vec![];
    for (name, score, positions) in scored {
        let joinable = bucket && rows.last()
            .map(|row: &RankedRow| row.score == score)
            .unwrap_or(false);
        if joinable {
            let last = rows.last_mut().unwrap();
            last.alleles.push(';');
            last.alleles.push_str(&name);
            if let (Some(existing), Some(incoming)) = (last.positions.as_mut(), positions.as_ref()) {
                if existing != incoming {
                    existing.push('|');
                    existing.push_str(incoming);
                }
            }
        } else {
            rows.push(RankedRow {
                rank: rows.len() + 1,
                alleles: name,
                score,
                positions
            });
        }
    }
    rows
}

/// Likelihood products, optionally scaled into probabilities.
fn normalized_likelihoods(map: &AlleleMap<f64>, normalize: bool) -> Vec<f64> {
    if !normalize {
        return map.values().to_vec();
    }
    let total: f64 = map.fold(0.0, |acc, &v| acc + v);
    if total <= 0.0 {
        warn!("Likelihoods sum to zero, skipping normalization");
        return map.values().to_vec();
    }
    map.values().iter().map(|&v| v / total).collect()
}

/// Log-likelihood sums, optionally converted to probabilities through a
/// numerically stable log-sum-exp.
fn normalized_log_likelihoods(map: &AlleleMap<f64>, normalize: bool) -> Vec<f64> {
    if !normalize {
        return map.values().to_vec();
    }
    let max = map.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    if !max.is_finite() {
        warn!("Log-likelihoods are not finite, skipping normalization");
        return map.values().to_vec();
    }
    let log_total = max + map.fold(0.0, |acc, &v| acc + (v - max).exp()).ln();
    map.values().iter().map(|&v| (v - log_total).exp()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    use crate::data_types::allele_map::AlleleMap;

    fn index() -> AlleleIndex {
        AlleleIndex::new(vec![
            "A*01:01".to_string(),
            "A*02:01".to_string(),
            "A*03:01".to_string()
        ]).unwrap()
    }

    fn count_outcome(counts: Vec<usize>) -> TypingOutcome {
        let mut map: AlleleMap<usize> = AlleleMap::make(counts.len(), 0);
        let full = crate::data_types::allele_map::AlleleSet::full(counts.len());
        let mut i = 0;
        map.update_by_set(&full, |_| {
            let v = counts[i];
            i += 1;
            v
        });
        TypingOutcome {
            scores: AggregateScores::Counts(map),
            reads_aligned: 10,
            failures: vec![]
        }
    }

    #[test]
    fn test_rank_counts_ascending() {
        let outcome = count_outcome(vec![5, 0, 2]);
        let rows = rank_alleles(&index(), &outcome, true, true);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].alleles, "A*02:01");
        assert_eq!(rows[0].score, 0.0);
        assert_eq!(rows[1].alleles, "A*03:01");
        assert_eq!(rows[2].alleles, "A*01:01");
        assert_eq!(rows[2].rank, 3);
    }

    #[test]
    fn test_bucketing_groups_ties() {
        let outcome = count_outcome(vec![2, 0, 2]);
        let bucketed = rank_alleles(&index(), &outcome, true, true);
        assert_eq!(bucketed.len(), 2);
        assert_eq!(bucketed[1].alleles, "A*01:01;A*03:01");

        let flat = rank_alleles(&index(), &outcome, true, false);
        assert_eq!(flat.len(), 3);
    }

    #[test]
    fn test_likelihood_normalization() {
        let mut map: AlleleMap<f64> = AlleleMap::make(2, 0.0);
        map.update_by_set(&crate::data_types::allele_map::AlleleSet::singleton(2, 0), |_| 0.3);
        map.update_by_set(&crate::data_types::allele_map::AlleleSet::singleton(2, 1), |_| 0.1);
        let outcome = TypingOutcome {
            scores: AggregateScores::Likelihoods(map),
            reads_aligned: 1,
            failures: vec![]
        };
        let small_index = AlleleIndex::new(vec!["a".to_string(), "b".to_string()]).unwrap();

        let rows = rank_alleles(&small_index, &outcome, true, true);
        assert_eq!(rows[0].alleles, "a");
        assert_approx_eq!(rows[0].score, 0.75);
        assert_approx_eq!(rows[1].score, 0.25);
    }

    #[test]
    fn test_log_likelihood_normalization() {
        let mut map: AlleleMap<f64> = AlleleMap::make(2, 0.0);
        map.update_by_set(&crate::data_types::allele_map::AlleleSet::singleton(2, 0), |_| -10.0);
        map.update_by_set(&crate::data_types::allele_map::AlleleSet::singleton(2, 1), |_| -10.0_f64 + 2.0_f64.ln());
        let outcome = TypingOutcome {
            scores: AggregateScores::LogLikelihoods(map),
            reads_aligned: 1,
            failures: vec![]
        };
        let small_index = AlleleIndex::new(vec!["a".to_string(), "b".to_string()]).unwrap();

        let rows = rank_alleles(&small_index, &outcome, true, true);
        // the second allele is exactly twice as likely
        assert_eq!(rows[0].alleles, "b");
        assert_approx_eq!(rows[0].score, 2.0 / 3.0);
        assert_approx_eq!(rows[1].score, 1.0 / 3.0);
    }

    #[test]
    fn test_positions_detail() {
        let mut map: AlleleMap<Vec<(i64, usize)>> = AlleleMap::make(1, vec![]);
        map.update_by_set(&crate::data_types::allele_map::AlleleSet::singleton(1, 0), |_| {
            vec![(12, 2), (5, 1)]
        });
        let outcome = TypingOutcome {
            scores: AggregateScores::Positions(map),
            reads_aligned: 1,
            failures: vec![]
        };
        let one_index = AlleleIndex::new(vec!["a".to_string()]).unwrap();

        let rows = rank_alleles(&one_index, &outcome, true, true);
        assert_eq!(rows[0].score, 3.0);
        assert_eq!(rows[0].positions.as_deref(), Some("5:1,12:2"));
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(3.0), "3");
        assert!(format_score(0.000123).contains('e'));
    }
}
