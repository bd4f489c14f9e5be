
use itertools::Itertools;

use crate::data_types::alignment::Position;
use crate::data_types::allele_map::AlleleMap;
use crate::util::stats::ALPHABET_SIZE;

/// Caller-supplied early-termination thresholds. The effective per-read
/// threshold is `max_value + fraction * read_len`; traversal gives up once
/// every allele is already past it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EarlyStop {
    /// flat threshold component, in mismatch units
    pub max_value: usize,
    /// read-length-proportional component
    pub fraction: f64
}

impl EarlyStop {
    pub fn new(max_value: usize, fraction: f64) -> EarlyStop {
        EarlyStop {
            max_value,
            fraction
        }
    }

    /// The effective threshold for one read.
    pub fn threshold(&self, read_len: usize) -> f64 {
        self.max_value as f64 + self.fraction * read_len as f64
    }
}

/// The scoring abstraction the aligner is parameterized over: an accumulator
/// algebra (zero/penalize/merge) plus the early-stop summary. Instances are
/// monomorphized at each call site, there is no runtime dispatch.
pub trait ScoringModel {
    /// per-allele accumulator
    type Acc: Clone + std::fmt::Debug + PartialEq;

    /// The identity accumulator.
    fn zero(&self) -> Self::Acc;

    /// Folds `count` mismatching bases into an accumulator.
    /// # Arguments
    /// * `pos` - reference position the penalty is attributed to
    /// * `read_offset` - first read base covered by the penalty
    /// * `count` - number of mismatching bases, covering read offsets [read_offset, read_offset+count)
    /// * `acc` - the accumulator being extended
    fn penalize(&self, pos: Position, read_offset: usize, count: usize, acc: &Self::Acc) -> Self::Acc;

    /// Associative combination of two accumulators for the same allele.
    fn merge(&self, a: &Self::Acc, b: &Self::Acc) -> Self::Acc;

    /// Renders an accumulator for diagnostics.
    fn acc_string(&self, acc: &Self::Acc) -> String;

    /// True when no allele in the map can still beat the threshold; checked at
    /// frontier-batch granularity. Accumulators only worsen as traversal
    /// proceeds, so a true result is final.
    fn should_stop(&self, early_stop: &EarlyStop, read_len: usize, map: &AlleleMap<Self::Acc>) -> bool;

    /// Map summary used to choose among anchor positions for one read.
    fn selection_score(&self, map: &AlleleMap<Self::Acc>) -> f64;

    /// Whether smaller selection scores are better.
    fn prefers_smaller(&self) -> bool;
}

/// Counts mismatches per allele.
#[derive(Clone, Copy, Debug, Default)]
pub struct MismatchCount;

impl ScoringModel for MismatchCount {
    type Acc = usize;

    fn zero(&self) -> usize {
        0
    }

    fn penalize(&self, _pos: Position, _read_offset: usize, count: usize, acc: &usize) -> usize {
        acc + count
    }

    fn merge(&self, a: &usize, b: &usize) -> usize {
        a + b
    }

    fn acc_string(&self, acc: &usize) -> String {
        format!("{acc}")
    }

    fn should_stop(&self, early_stop: &EarlyStop, read_len: usize, map: &AlleleMap<usize>) -> bool {
        let best = map.fold(usize::MAX, |acc, &v| acc.min(v));
        (best as f64) > early_stop.threshold(read_len)
    }

    fn selection_score(&self, map: &AlleleMap<usize>) -> f64 {
        map.fold(usize::MAX, |acc, &v| acc.min(v)) as f64
    }

    fn prefers_smaller(&self) -> bool {
        true
    }
}

/// Records (position, count) pairs per allele, preserving where the
/// mismatches landed. Entry order is traversal order; consumers sort.
#[derive(Clone, Copy, Debug, Default)]
pub struct MismatchList;

impl ScoringModel for MismatchList {
    type Acc = Vec<(Position, usize)>;

    fn zero(&self) -> Vec<(Position, usize)> {
        vec![]
    }

    fn penalize(&self, pos: Position, _read_offset: usize, count: usize, acc: &Vec<(Position, usize)>) -> Vec<(Position, usize)> {
        let mut next = acc.clone();
        next.push((pos, count));
        next
    }

    fn merge(&self, a: &Vec<(Position, usize)>, b: &Vec<(Position, usize)>) -> Vec<(Position, usize)> {
        let mut merged = a.clone();
        merged.extend_from_slice(b);
        merged
    }

    fn acc_string(&self, acc: &Vec<(Position, usize)>) -> String {
        acc.iter()
            .map(|(pos, count)| format!("{pos}:{count}"))
            .join(",")
    }

    fn should_stop(&self, early_stop: &EarlyStop, read_len: usize, map: &AlleleMap<Self::Acc>) -> bool {
        let best = map.fold(usize::MAX, |acc, v| acc.min(v.len()));
        (best as f64) > early_stop.threshold(read_len)
    }

    fn selection_score(&self, map: &AlleleMap<Self::Acc>) -> f64 {
        map.fold(usize::MAX, |acc, v| {
            let total: usize = v.iter().map(|&(_, count)| count).sum();
            acc.min(total)
        }) as f64
    }

    fn prefers_smaller(&self) -> bool {
        true
    }
}

/// Per-base quality-aware log-likelihoods. The accumulator is the penalty
/// relative to a perfect match; `finalize` adds the all-match baseline so the
/// result is a true read log-likelihood.
#[derive(Clone, Debug)]
pub struct PhredLikelihood {
    /// per-base error probabilities for the current read, decoded from Phred
    error_probs: Vec<f64>,
    /// representative error rate used to translate mismatch-unit thresholds
    reference_error: f64,
    /// log-likelihood of the read matching everywhere
    all_match: f64
}

impl PhredLikelihood {
    /// # Arguments
    /// * `error_probs` - one error probability per read base
    /// * `reference_error` - typical per-base error rate, for early-stop conversion
    pub fn new(error_probs: Vec<f64>, reference_error: f64) -> PhredLikelihood {
        let all_match = error_probs.iter()
            .map(|&e| (1.0 - e).max(f64::MIN_POSITIVE).ln())
            .sum();
        PhredLikelihood {
            error_probs,
            reference_error,
            all_match
        }
    }

    /// Converts a penalty accumulator into the read's log-likelihood.
    pub fn finalize(&self, acc: f64) -> f64 {
        self.all_match + acc
    }

    /// The log-likelihood cost of one typical mismatch, used as the unit for
    /// early-stop thresholds.
    fn mismatch_unit(&self) -> f64 {
        (self.reference_error / (ALPHABET_SIZE - 1) as f64).ln()
            - (1.0 - self.reference_error).ln()
    }
}

impl ScoringModel for PhredLikelihood {
    type Acc = f64;

    fn zero(&self) -> f64 {
        0.0
    }

    fn penalize(&self, _pos: Position, read_offset: usize, count: usize, acc: &f64) -> f64 {
        let mut penalty = 0.0;
        for offset in read_offset..(read_offset + count) {
            let e = self.error_probs[offset];
            penalty += (e / (ALPHABET_SIZE - 1) as f64).max(f64::MIN_POSITIVE).ln()
                - (1.0 - e).max(f64::MIN_POSITIVE).ln();
        }
        acc + penalty
    }

    fn merge(&self, a: &f64, b: &f64) -> f64 {
        a + b
    }

    fn acc_string(&self, acc: &f64) -> String {
        format!("{acc:.4}")
    }

    fn should_stop(&self, early_stop: &EarlyStop, read_len: usize, map: &AlleleMap<f64>) -> bool {
        let best = map.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        let floor = early_stop.threshold(read_len) * self.mismatch_unit();
        best < floor
    }

    fn selection_score(&self, map: &AlleleMap<f64>) -> f64 {
        map.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v))
    }

    fn prefers_smaller(&self) -> bool {
        false
    }
}

/// Convenience constructor from uniform-error assumptions, for reads without
/// usable quality strings.
pub fn uniform_phred_model(read_len: usize, error_rate: f64) -> PhredLikelihood {
    PhredLikelihood::new(vec![error_rate; read_len], error_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    use crate::data_types::allele_map::AlleleSet;

    #[test]
    fn test_mismatch_count_algebra() {
        let model = MismatchCount;
        let acc = model.penalize(10, 0, 1, &model.zero());
        let acc = model.penalize(12, 2, 3, &acc);
        assert_eq!(acc, 4);
        assert_eq!(model.merge(&acc, &2), 6);
        assert_eq!(model.acc_string(&acc), "4");
    }

    #[test]
    fn test_mismatch_count_stop() {
        let model = MismatchCount;
        let stop = EarlyStop::new(2, 0.0);

        let all_bad: AlleleMap<usize> = AlleleMap::make(3, 5);
        assert!(model.should_stop(&stop, 100, &all_bad));

        // one allele under the threshold keeps the traversal alive
        let mut mixed: AlleleMap<usize> = AlleleMap::make(3, 5);
        mixed.update_by_set(&AlleleSet::singleton(3, 1), |_| 1);
        assert!(!model.should_stop(&stop, 100, &mixed));

        // the proportional component raises the threshold with read length
        let proportional = EarlyStop::new(0, 0.1);
        assert!(!model.should_stop(&proportional, 100, &all_bad));
    }

    #[test]
    fn test_mismatch_list_algebra() {
        let model = MismatchList;
        let acc = model.penalize(10, 0, 1, &model.zero());
        let acc = model.penalize(12, 5, 2, &acc);
        assert_eq!(acc, vec![(10, 1), (12, 2)]);

        let merged = model.merge(&acc, &vec![(20, 1)]);
        assert_eq!(merged.len(), 3);
        assert_eq!(model.acc_string(&merged), "10:1,12:2,20:1");

        // summed counts line up with the mismatch-count model
        let count_model = MismatchCount;
        let counted = count_model.penalize(12, 5, 2, &count_model.penalize(10, 0, 1, &0));
        let total: usize = merged.iter().map(|&(_, c)| c).sum();
        assert_eq!(total, counted + 1);
    }

    #[test]
    fn test_phred_penalty() {
        let probs = vec![0.1, 0.01, 0.001];
        let model = PhredLikelihood::new(probs.clone(), 0.025);

        // a mismatch on base 1 swaps its match term for the error term
        let acc = model.penalize(7, 1, 1, &model.zero());
        let expected = (0.01 / 3.0_f64).ln() - 0.99_f64.ln();
        assert_approx_eq!(acc, expected);

        let full: f64 = probs.iter().map(|&e| (1.0 - e).ln()).sum();
        assert_approx_eq!(model.finalize(0.0), full);
        assert_approx_eq!(model.finalize(acc), full + expected);
    }

    #[test]
    fn test_phred_stop() {
        let model = uniform_phred_model(10, 0.025);
        let stop = EarlyStop::new(1, 0.0);

        let fresh: AlleleMap<f64> = AlleleMap::make(2, 0.0);
        assert!(!model.should_stop(&stop, 10, &fresh));

        // both alleles worse than a two-mismatch penalty trips the floor
        let bad_acc = model.penalize(0, 0, 2, &0.0);
        let bad: AlleleMap<f64> = AlleleMap::make(2, bad_acc);
        assert!(model.should_stop(&stop, 10, &bad));
    }
}
