
use log::trace;

use crate::align::aligner::{align_read, AlignmentOutcome};
use crate::align::errors::ReadError;
use crate::align::scoring::{EarlyStop, ScoringModel};
use crate::data_types::alignment::Position;
use crate::data_types::allele_map::AlleleMap;
use crate::graph::allele_graph::AlleleGraph;

/// Aligns one read from every anchor position and collapses the results into
/// a single per-allele map. Finished alignments are always preferred over
/// stopped ones; among those, the model's selection score picks the winner.
/// # Arguments
/// * `graph` - the allele graph
/// * `model` - the scoring model instance
/// * `early_stop` - optional termination thresholds
/// * `read` - the read bases
/// * `anchors` - candidate anchor positions from the index lookup
/// # Errors
/// * `NoPositions` if the anchor list is empty
/// * `AllStopped(n)` if every anchor terminated early
pub fn reduce_read<M: ScoringModel>(
    graph: &AlleleGraph, model: &M, early_stop: Option<&EarlyStop>,
    read: &[u8], anchors: &[Position]
) -> Result<AlleleMap<M::Acc>, ReadError> {
    if anchors.is_empty() {
        return Err(ReadError::NoPositions);
    }

    let mut outcomes: Vec<AlignmentOutcome<M::Acc>> = Vec::with_capacity(anchors.len());
    for &anchor in anchors.iter() {
        let outcome = align_read(graph, model, early_stop, read, anchor);
        trace!("anchor {anchor}: finished={}", outcome.is_finished());
        outcomes.push(outcome);
    }

    let total = outcomes.len();
    let finished: Vec<AlignmentOutcome<M::Acc>> = {
        let mut kept: Vec<AlignmentOutcome<M::Acc>> = vec![];
        for outcome in outcomes {
            if outcome.is_finished() {
                kept.push(outcome);
            }
        }
        kept
    };
    if finished.is_empty() {
        return Err(ReadError::AllStopped(total));
    }

    let mut best: Option<(f64, AlleleMap<M::Acc>)> = None;
    for outcome in finished {
        let map = outcome.into_map();
        let score = model.selection_score(&map);
        let better = match best.as_ref() {
            None => true,
            Some((best_score, _)) => {
                if model.prefers_smaller() {
                    score < *best_score
                } else {
                    score > *best_score
                }
            }
        };
        if better {
            best = Some((score, map));
        }
    }
    Ok(best.unwrap().1)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::align::scoring::MismatchCount;
    use crate::graph::builder::{build_graph, GraphConfig};
    use crate::msa::parser::parse_msa;

    fn small_graph(body: &str) -> AlleleGraph {
        let text = format!("Test Alignment\n\n{body}");
        let alignment = parse_msa(std::io::Cursor::new(text)).unwrap();
        build_graph(&alignment, &GraphConfig::default()).unwrap()
    }

    #[test]
    fn test_no_positions() {
        let graph = small_graph(" gDNA 0\n A*01 ACGT\n");
        let result = reduce_read(&graph, &MismatchCount, None, b"ACGT", &[]);
        assert_eq!(result.unwrap_err(), ReadError::NoPositions);
    }

    #[test]
    fn test_best_anchor_wins() {
        // the repeated ACGT means a read can anchor at 0 or 4; position 4 is exact
        let graph = small_graph(" gDNA 0\n A*01 ACGTACGA\n");
        let reduced = reduce_read(&graph, &MismatchCount, None, b"ACGA", &[0, 4]).unwrap();
        assert_eq!(reduced.values(), &[0]);

        // anchored only at 0 it has to pay for the final base
        let reduced = reduce_read(&graph, &MismatchCount, None, b"ACGA", &[0]).unwrap();
        assert_eq!(reduced.values(), &[1]);
    }

    #[test]
    fn test_all_stopped() {
        let graph = small_graph(" gDNA 0\n A*01 AAAA\n");
        let stop = EarlyStop::new(0, 0.0);
        let result = reduce_read(&graph, &MismatchCount, Some(&stop), b"TTTT", &[0, 1]);
        assert_eq!(result.unwrap_err(), ReadError::AllStopped(2));
    }

    #[test]
    fn test_finished_preferred_over_stopped() {
        // anchor 0 aligns clean; anchor 5 accumulates mismatches and stops
        let graph = small_graph(" gDNA 0\n A*01 ACGTACGT\n");
        let stop = EarlyStop::new(2, 0.0);
        let reduced = reduce_read(&graph, &MismatchCount, Some(&stop), b"ACGTACGT", &[0, 5]).unwrap();
        assert_eq!(reduced.values(), &[0]);
    }
}
