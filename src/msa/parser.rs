
use log::{debug, warn};
use rustc_hash::FxHashMap as HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::data_types::alignment::{residue_at, AlignmentElement, Position};

/// Nucleotide residues allowed in gDNA/cDNA alignment files
const DNA_RESIDUES: &str = "ACGT";
/// Amino-acid residues allowed in protein alignment files; `X` is the unknown marker, not a residue
const PROTEIN_RESIDUES: &str = "ACDEFGHIKLMNPQRSTVWY";

/// Errors raised while parsing an IMGT-style alignment file, these are fatal for the run
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum MsaParseError {
    #[error("{allele} at position {position}: invalid residue character {character:?}")]
    InvalidResidue { allele: String, position: Position, character: char },
    #[error("{allele} at position {position}: reference allele cannot copy from itself")]
    ReferenceCopy { allele: String, position: Position },
    #[error("{allele} at position {position}: no reference residue to copy from")]
    NoReferenceResidue { allele: String, position: Position },
    #[error("{allele} at position {position}: data element would overlap the closed run ending at {end}")]
    DataAfterEnd { allele: String, position: Position, end: Position },
    #[error("input ended before any position header line")]
    MissingPositionHeader,
    #[error("input ended before any sequence data line")]
    MissingReference,
    #[error("sequence data line has a name but no residues: {line:?}")]
    EmptySequenceLine { line: String },
    #[error("error reading alignment input: {0}")]
    Io(String)
}

/// Classification of one stripped input line
#[derive(Debug, PartialEq)]
enum MsaLine<'a> {
    /// blank line, separates blocks
    Empty,
    /// a coordinate header; `dna` is false for protein files
    Position { dna: bool, position: Position },
    /// ruler/codon annotation lines, ignored
    Dash,
    /// the trailing IMGT footer, ends the input
    Footer,
    /// an allele row: name plus its residue tokens
    SeqData { allele: &'a str, residues: &'a str }
}

/// Splits a stripped, non-empty line into its classification.
fn classify_line(line: &str) -> Result<MsaLine<'_>, MsaParseError> {
    if line.is_empty() {
        return Ok(MsaLine::Empty);
    }

    let mut tokens = line.split_whitespace();
    let first = tokens.next().unwrap();
    match first {
        "gDNA" | "cDNA" | "Prot" => {
            let dna = first != "Prot";
            match tokens.next().and_then(|t| t.parse::<Position>().ok()) {
                Some(position) => Ok(MsaLine::Position { dna, position }),
                // some files carry a stray annotation instead of a number, treat those as ruler lines
                None => Ok(MsaLine::Dash)
            }
        },
        "|" => Ok(MsaLine::Dash),
        "AA" if line.starts_with("AA codon") => Ok(MsaLine::Dash),
        "Please" => Ok(MsaLine::Footer),
        _ => {
            if line.starts_with('|') {
                Ok(MsaLine::Dash)
            } else {
                let rest = line[first.len()..].trim_start();
                if rest.is_empty() {
                    return Err(MsaParseError::EmptySequenceLine { line: line.to_string() });
                }
                Ok(MsaLine::SeqData { allele: first, residues: rest })
            }
        }
    }
}

/// Transient per-allele parse state; becomes an element list at the end of input.
#[derive(Debug)]
struct AlleleParseState {
    /// the allele name from the row label
    name: String,
    /// position of the most recently consumed column
    position: Position,
    /// running boundary marker counter
    boundary_count: usize,
    /// elements accumulated so far, in ascending order
    elements: Vec<AlignmentElement>,
    /// true while a Start has been emitted without a matching End
    in_data: bool
}

impl AlleleParseState {
    /// Fresh state positioned one column before `start_position`.
    fn new(name: String, start_position: Position) -> AlleleParseState {
        AlleleParseState {
            name,
            position: start_position - 1,
            boundary_count: 0,
            elements: vec![],
            in_data: false
        }
    }

    /// Opens a data run at the current position if one is not already open.
    /// A boundary emitted at position-1 gets pulled inside the run: the Start is
    /// inserted before it so the boundary keeps its own position.
    fn open_data(&mut self) -> Result<(), MsaParseError> {
        if self.in_data {
            return Ok(());
        }

        // a new run must not reach back into the previous one
        if let Some(AlignmentElement::End(end)) = self.elements.iter().rev().find(|e| matches!(e, AlignmentElement::End(_))) {
            if self.position <= *end - 1 {
                return Err(MsaParseError::DataAfterEnd {
                    allele: self.name.clone(),
                    position: self.position,
                    end: *end
                });
            }
        }

        match self.elements.last() {
            Some(AlignmentElement::Boundary { pos, .. }) if *pos == self.position - 1 => {
                let boundary = self.elements.pop().unwrap();
                let start = boundary.position();
                self.elements.push(AlignmentElement::Start(start));
                self.elements.push(boundary);
            },
            _ => {
                self.elements.push(AlignmentElement::Start(self.position));
            }
        }
        self.in_data = true;
        Ok(())
    }

    /// Appends one residue at the current position, extending the trailing
    /// Sequence when contiguous.
    fn push_residue(&mut self, ch: char) -> Result<(), MsaParseError> {
        self.open_data()?;
        match self.elements.last_mut() {
            Some(AlignmentElement::Sequence { start, seq }) if *start + seq.len() as Position == self.position => {
                seq.push(ch);
            },
            _ => {
                self.elements.push(AlignmentElement::Sequence {
                    start: self.position,
                    seq: ch.to_string()
                });
            }
        }
        Ok(())
    }

    /// Appends one gapped column, extending the trailing Gap when contiguous.
    /// Gaps outside a data run only advance the cursor.
    fn push_gap(&mut self) {
        if !self.in_data {
            return;
        }
        match self.elements.last_mut() {
            Some(AlignmentElement::Gap { start, length }) if *start + *length as Position == self.position => {
                *length += 1;
            },
            _ => {
                self.elements.push(AlignmentElement::Gap {
                    start: self.position,
                    length: 1
                });
            }
        }
    }

    /// Emits a segment marker at the current position. Markers do not consume a column.
    fn push_boundary(&mut self) {
        self.elements.push(AlignmentElement::Boundary {
            idx: self.boundary_count,
            pos: self.position
        });
        self.boundary_count += 1;
    }

    /// Closes the open data run, if any.
    fn close_data(&mut self) {
        if self.in_data {
            self.elements.push(AlignmentElement::End(self.position));
            self.in_data = false;
        }
    }

    /// Consumes one character of the residue stream.
    /// # Arguments
    /// * `ch` - the character
    /// * `dna` - true for nucleotide files; controls the alphabet and the `X` marker
    /// * `reference` - the reference element list for `-` copies; None while parsing the reference itself
    fn consume(&mut self, ch: char, dna: bool, reference: Option<&[AlignmentElement]>) -> Result<(), MsaParseError> {
        match ch {
            '|' => {
                self.push_boundary();
            },
            '*' => {
                self.position += 1;
                self.close_data();
            },
            'X' if !dna => {
                self.position += 1;
                self.close_data();
            },
            '.' => {
                self.position += 1;
                self.push_gap();
            },
            '-' => {
                self.position += 1;
                match reference {
                    Some(ref_elements) => {
                        let copied = residue_at(ref_elements, self.position)
                            .ok_or(MsaParseError::NoReferenceResidue {
                                allele: self.name.clone(),
                                position: self.position
                            })?;
                        self.push_residue(copied)?;
                    },
                    None => {
                        return Err(MsaParseError::ReferenceCopy {
                            allele: self.name.clone(),
                            position: self.position
                        });
                    }
                }
            },
            c => {
                let alphabet = if dna { DNA_RESIDUES } else { PROTEIN_RESIDUES };
                if !alphabet.contains(c) {
                    return Err(MsaParseError::InvalidResidue {
                        allele: self.name.clone(),
                        position: self.position + 1,
                        character: c
                    });
                }
                self.position += 1;
                self.push_residue(c)?;
            }
        }
        Ok(())
    }

    /// End-of-input normalization: close any open run.
    fn finish(&mut self) {
        if self.in_data {
            self.elements.push(AlignmentElement::End(self.position + 1));
            self.in_data = false;
        }
    }

    /// True if this allele never produced any sequence or gap data.
    fn is_data_free(&self) -> bool {
        !self.elements.iter().any(|e| e.is_data())
    }
}

/// The finished product of parsing one alignment file: a reference allele plus
/// alternates expressed in the reference coordinate frame, in file order.
#[derive(Clone, Debug)]
pub struct MsaAlignment {
    /// name of the reference allele (first data row)
    reference_name: String,
    /// the reference's normalized element list
    reference_elements: Vec<AlignmentElement>,
    /// (name, elements) for every alternate that carried data, in file order
    alternates: Vec<(String, Vec<AlignmentElement>)>,
    /// true for nucleotide files
    dna: bool
}

impl MsaAlignment {
    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    pub fn reference_elements(&self) -> &[AlignmentElement] {
        &self.reference_elements
    }

    pub fn alternates(&self) -> &[(String, Vec<AlignmentElement>)] {
        &self.alternates
    }

    pub fn is_dna(&self) -> bool {
        self.dna
    }

    /// Iterates all alleles, reference first.
    pub fn alleles(&self) -> impl Iterator<Item = (&str, &[AlignmentElement])> {
        std::iter::once((self.reference_name.as_str(), self.reference_elements.as_slice()))
            .chain(self.alternates.iter().map(|(name, elements)| (name.as_str(), elements.as_slice())))
    }
}

/// Parses an IMGT-style multiple-sequence alignment from a reader.
/// The header is skipped up to the first blank line; the first coordinate line
/// fixes the file type and start position; the first data row after it is the
/// reference allele.
/// # Arguments
/// * `reader` - the line source
/// # Errors
/// * on any malformed residue stream, see MsaParseError
pub fn parse_msa<R: BufRead>(reader: R) -> Result<MsaAlignment, MsaParseError> {
    let mut dna: bool = true;
    let mut pending_start: Option<Position> = None;
    let mut saw_position: bool = false;
    let mut header_done: bool = false;

    let mut reference: Option<AlleleParseState> = None;
    let mut alternates: Vec<AlleleParseState> = vec![];
    let mut alternate_lookup: HashMap<String, usize> = Default::default();

    for line_result in reader.lines() {
        let raw = line_result.map_err(|e| MsaParseError::Io(e.to_string()))?;
        let line = raw.trim();

        if !header_done {
            if line.is_empty() {
                header_done = true;
            }
            continue;
        }

        match classify_line(line)? {
            MsaLine::Empty | MsaLine::Dash => {},
            MsaLine::Footer => {
                break;
            },
            MsaLine::Position { dna: line_dna, position } => {
                if !saw_position {
                    dna = line_dna;
                    saw_position = true;
                    pending_start = Some(position);
                } else if let Some(ref_state) = reference.as_ref() {
                    // the printed counter drifts near runs of boundary markers; report, do not correct
                    let expected = ref_state.position + 1;
                    if position != expected {
                        warn!(
                            "Position header {} does not match computed reference position {} for {}",
                            position, expected, ref_state.name
                        );
                    }
                }
            },
            MsaLine::SeqData { allele, residues } => {
                if !saw_position {
                    // pre-coordinate annotation rows, nothing to anchor them to yet
                    continue;
                }

                if reference.is_none() {
                    let start = pending_start.take().ok_or(MsaParseError::MissingPositionHeader)?;
                    let mut state = AlleleParseState::new(allele.to_string(), start);
                    consume_residues(&mut state, residues, dna, None)?;
                    reference = Some(state);
                } else if reference.as_ref().unwrap().name == allele {
                    let ref_state = reference.as_mut().unwrap();
                    consume_residues(ref_state, residues, dna, None)?;
                } else {
                    let ref_state = reference.as_ref().unwrap();
                    let index = match alternate_lookup.get(allele) {
                        Some(&i) => i,
                        None => {
                            // new alleles enter at the start position of the whole alignment
                            let start = ref_state.elements.first()
                                .map(|e| e.position())
                                .unwrap_or(ref_state.position + 1);
                            alternates.push(AlleleParseState::new(allele.to_string(), start));
                            alternate_lookup.insert(allele.to_string(), alternates.len() - 1);
                            alternates.len() - 1
                        }
                    };
                    let state = &mut alternates[index];
                    consume_residues(state, residues, dna, Some(ref_state.elements.as_slice()))?;
                }
            }
        }
    }

    if !saw_position {
        return Err(MsaParseError::MissingPositionHeader);
    }
    let mut ref_state = reference.ok_or(MsaParseError::MissingReference)?;
    ref_state.finish();

    let reference_end = ref_state.elements.iter()
        .map(|e| e.end_position())
        .max()
        .unwrap_or(ref_state.position);

    let mut kept: Vec<(String, Vec<AlignmentElement>)> = vec![];
    for mut state in alternates {
        state.finish();
        if state.is_data_free() {
            debug!("Dropping allele with no sequence data: {}", state.name);
            continue;
        }
        let alternate_end = state.elements.iter().map(|e| e.end_position()).max().unwrap();
        if alternate_end > reference_end {
            debug!(
                "Allele {} extends past the reference end ({} > {})",
                state.name, alternate_end, reference_end
            );
        }
        kept.push((state.name, state.elements));
    }

    Ok(MsaAlignment {
        reference_name: ref_state.name,
        reference_elements: ref_state.elements,
        alternates: kept,
        dna
    })
}

/// Feeds a row's residue tokens through the reference state machine.
fn consume_residues(state: &mut AlleleParseState, residues: &str, dna: bool, reference: Option<&[AlignmentElement]>) -> Result<(), MsaParseError> {
    for token in residues.split_whitespace() {
        for ch in token.chars() {
            state.consume(ch, dna, reference)?;
        }
    }
    Ok(())
}

/// Opens and parses an alignment file from disk.
/// # Arguments
/// * `filename` - path to the IMGT-style alignment text file
/// # Errors
/// * if the file cannot be opened
/// * on any parse error
pub fn parse_msa_file(filename: &Path) -> Result<MsaAlignment, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(filename)?;
    let reader = std::io::BufReader::new(file);
    let result = parse_msa(reader)?;
    debug!(
        "Parsed {:?}: reference {} plus {} alternates",
        filename, result.reference_name(), result.alternates().len()
    );
    Ok(result)
}
