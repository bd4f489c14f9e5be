
use serde::{Deserialize, Serialize};
use simple_error::{bail, SimpleError};

/// Shared reference-frame coordinate for all alleles in one alignment file.
/// IMGT numbering can start below zero, so this is signed.
pub type Position = i64;

/// One element of an allele's parsed alignment, expressed in reference coordinates.
/// Each allele is a position-sorted list of these; data lives between Start/End pairs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignmentElement {
    /// Allele data begins at this position
    Start(Position),
    /// Allele data ends strictly before this position
    End(Position),
    /// The idx-th segment marker (UTR/exon/intron divider) for this allele
    Boundary {
        /// 0-based marker counter, incremented per allele
        idx: usize,
        /// position of the last residue before the marker
        pos: Position
    },
    /// A contiguous run of residues
    Sequence {
        /// position of the first residue in `seq`
        start: Position,
        /// the residues themselves; only alphabet characters, never meta-characters
        seq: String
    },
    /// A run of alignment gaps
    Gap {
        /// position of the first gapped column
        start: Position,
        /// number of consecutive gapped columns
        length: usize
    }
}

impl AlignmentElement {
    /// The position this element is anchored at, used for sorting and span checks.
    pub fn position(&self) -> Position {
        match self {
            AlignmentElement::Start(pos) => *pos,
            AlignmentElement::End(pos) => *pos,
            AlignmentElement::Boundary { pos, .. } => *pos,
            AlignmentElement::Sequence { start, .. } => *start,
            AlignmentElement::Gap { start, .. } => *start
        }
    }

    /// The exclusive end of the span this element covers.
    /// Zero-width elements (Start/End/Boundary) return their anchor position.
    pub fn end_position(&self) -> Position {
        match self {
            AlignmentElement::Start(pos) => *pos,
            AlignmentElement::End(pos) => *pos,
            AlignmentElement::Boundary { pos, .. } => *pos,
            AlignmentElement::Sequence { start, seq } => start + seq.len() as Position,
            AlignmentElement::Gap { start, length } => start + *length as Position
        }
    }

    /// True for the elements that carry alignment columns (Sequence/Gap).
    pub fn is_data(&self) -> bool {
        matches!(self, AlignmentElement::Sequence { .. } | AlignmentElement::Gap { .. })
    }
}

/// Verifies the structural rules for one allele's element list:
/// spans are sorted and non-overlapping, every Sequence/Gap is inside a Start/End pair,
/// and runs are properly opened/closed.
/// # Arguments
/// * `allele` - allele name, only used for error messages
/// * `elements` - the full, normalized element list for that allele
/// # Errors
/// * if any ordering or nesting rule is violated
pub fn validate_elements(allele: &str, elements: &[AlignmentElement]) -> Result<(), SimpleError> {
    let mut last_end: Option<Position> = None;
    let mut in_data = false;
    for element in elements.iter() {
        if let Some(le) = last_end {
            // boundaries share the position of the residue before them
            let allowed = match element {
                AlignmentElement::Boundary { pos, .. } => *pos >= le - 1,
                _ => element.position() >= le
            };
            if !allowed {
                bail!("{allele}: element {element:?} overlaps the previous span ending at {le}");
            }
        }

        match element {
            AlignmentElement::Start(pos) => {
                if in_data {
                    bail!("{allele}: Start({pos}) inside an open data run");
                }
                in_data = true;
            },
            AlignmentElement::End(pos) => {
                if !in_data {
                    bail!("{allele}: End({pos}) without an open data run");
                }
                in_data = false;
            },
            AlignmentElement::Sequence { start, .. } |
            AlignmentElement::Gap { start, .. } => {
                if !in_data {
                    bail!("{allele}: data element at {start} outside a Start/End run");
                }
            },
            AlignmentElement::Boundary { .. } => {}
        }
        last_end = Some(last_end.unwrap_or(Position::MIN).max(element.end_position()));
    }

    if in_data {
        bail!("{allele}: final data run was never closed with an End");
    }
    Ok(())
}

/// Finds the residue covering `pos` in a sorted element list, if there is one.
/// Gaps, unknown regions, and positions outside every span return None.
pub fn residue_at(elements: &[AlignmentElement], pos: Position) -> Option<char> {
    let upper = elements.partition_point(|e| e.position() <= pos);
    for element in elements[..upper].iter().rev() {
        if element.end_position() <= pos {
            continue;
        }
        return match element {
            AlignmentElement::Sequence { start, seq } => {
                seq.as_bytes().get((pos - start) as usize).map(|&b| b as char)
            },
            _ => None
        };
    }
    None
}

/// Renders the residue stream an element list stands for: residues verbatim,
/// `.` per gapped column, `|` per segment marker. Start/End are zero-width.
/// Feeding the result back through the parser reproduces the same elements.
pub fn residue_stream(elements: &[AlignmentElement]) -> String {
    let mut out = String::new();
    for element in elements.iter() {
        match element {
            AlignmentElement::Start(_) |
            AlignmentElement::End(_) => {},
            AlignmentElement::Boundary { .. } => out.push('|'),
            AlignmentElement::Sequence { seq, .. } => out.push_str(seq),
            AlignmentElement::Gap { length, .. } => {
                for _ in 0..*length {
                    out.push('.');
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions() {
        let seq = AlignmentElement::Sequence { start: 5, seq: "ACGT".to_string() };
        assert_eq!(seq.position(), 5);
        assert_eq!(seq.end_position(), 9);

        let gap = AlignmentElement::Gap { start: -1, length: 3 };
        assert_eq!(gap.position(), -1);
        assert_eq!(gap.end_position(), 2);

        let boundary = AlignmentElement::Boundary { idx: 0, pos: 10 };
        assert_eq!(boundary.position(), 10);
        assert_eq!(boundary.end_position(), 10);
    }

    #[test]
    fn test_validate_elements() {
        let good = vec![
            AlignmentElement::Start(0),
            AlignmentElement::Sequence { start: 0, seq: "ACG".to_string() },
            AlignmentElement::Boundary { idx: 0, pos: 2 },
            AlignmentElement::Gap { start: 3, length: 2 },
            AlignmentElement::Sequence { start: 5, seq: "T".to_string() },
            AlignmentElement::End(6)
        ];
        assert!(validate_elements("A*01:01", &good).is_ok());

        // two disjoint runs are fine
        let two_runs = vec![
            AlignmentElement::Start(0),
            AlignmentElement::Sequence { start: 0, seq: "AC".to_string() },
            AlignmentElement::End(2),
            AlignmentElement::Start(4),
            AlignmentElement::Sequence { start: 4, seq: "GT".to_string() },
            AlignmentElement::End(6)
        ];
        assert!(validate_elements("A*01:02", &two_runs).is_ok());
    }

    #[test]
    fn test_validate_rejects_unsorted() {
        let unsorted = vec![
            AlignmentElement::Start(0),
            AlignmentElement::Sequence { start: 0, seq: "ACG".to_string() },
            AlignmentElement::Sequence { start: 1, seq: "T".to_string() },
            AlignmentElement::End(4)
        ];
        assert!(validate_elements("A*01:01", &unsorted).is_err());
    }

    #[test]
    fn test_validate_rejects_data_outside_run() {
        let stray = vec![
            AlignmentElement::Sequence { start: 0, seq: "ACG".to_string() },
            AlignmentElement::End(3)
        ];
        assert!(validate_elements("A*01:01", &stray).is_err());
    }

    #[test]
    fn test_residue_stream() {
        let elements = vec![
            AlignmentElement::Start(0),
            AlignmentElement::Sequence { start: 0, seq: "ACG".to_string() },
            AlignmentElement::Boundary { idx: 0, pos: 2 },
            AlignmentElement::Gap { start: 3, length: 2 },
            AlignmentElement::Sequence { start: 5, seq: "T".to_string() },
            AlignmentElement::End(6)
        ];
        assert_eq!(residue_stream(&elements), "ACG|..T");
    }
}
