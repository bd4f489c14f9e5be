
use fixedbitset::FixedBitSet;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use simple_error::{bail, SimpleError};

/// A fixed enumeration of allele names, assigning each a dense index.
/// Built once per graph; sets and maps below are sized against it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlleleIndex {
    /// allele names in index order
    names: Vec<String>,
    /// reverse lookup from name to dense index
    #[serde(skip)]
    positions: HashMap<String, usize>
}

impl AlleleIndex {
    /// Builds the enumeration from an ordered name list.
    /// # Arguments
    /// * `names` - allele names in the order they should be indexed
    /// # Errors
    /// * if a name appears more than once
    pub fn new(names: Vec<String>) -> Result<AlleleIndex, SimpleError> {
        let mut positions: HashMap<String, usize> = Default::default();
        for (i, name) in names.iter().enumerate() {
            if positions.insert(name.clone(), i).is_some() {
                bail!("Duplicate allele name in index: {name}");
            }
        }
        Ok(AlleleIndex {
            names,
            positions
        })
    }

    /// Rebuilds the skipped reverse lookup after deserialization.
    pub fn rebuild_lookup(&mut self) {
        self.positions = self.names.iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

/// A set of alleles over a fixed AlleleIndex, represented as a bitset.
/// Set operations are word-parallel; this is what keeps edge filtering cheap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlleleSet {
    bits: FixedBitSet
}

impl AlleleSet {
    /// An empty set sized for `size` alleles.
    pub fn empty(size: usize) -> AlleleSet {
        AlleleSet {
            bits: FixedBitSet::with_capacity(size)
        }
    }

    /// The full set over `size` alleles.
    pub fn full(size: usize) -> AlleleSet {
        let mut bits = FixedBitSet::with_capacity(size);
        bits.insert_range(..);
        AlleleSet {
            bits
        }
    }

    /// A set containing exactly one allele.
    pub fn singleton(size: usize, index: usize) -> AlleleSet {
        let mut set = AlleleSet::empty(size);
        set.insert(index);
        set
    }

    pub fn insert(&mut self, index: usize) {
        self.bits.insert(index);
    }

    pub fn contains(&self, index: usize) -> bool {
        self.bits.contains(index)
    }

    /// In-place union with another set.
    pub fn union_with(&mut self, other: &AlleleSet) {
        self.bits.union_with(&other.bits);
    }

    /// Returns the intersection as a new set.
    pub fn intersection(&self, other: &AlleleSet) -> AlleleSet {
        let mut bits = self.bits.clone();
        bits.intersect_with(&other.bits);
        AlleleSet {
            bits
        }
    }

    /// Returns the complement over the full index as a new set.
    pub fn complement(&self) -> AlleleSet {
        let mut bits = self.bits.clone();
        bits.toggle_range(..);
        AlleleSet {
            bits
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_clear()
    }

    pub fn cardinality(&self) -> usize {
        self.bits.count_ones(..)
    }

    /// Iterates the indices of the member alleles in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.ones()
    }
}

/// A dense per-allele value table over a fixed AlleleIndex.
/// This is the accumulator container the aligner and aggregator mutate.
#[derive(Clone, Debug, PartialEq)]
pub struct AlleleMap<V> {
    values: Vec<V>
}

impl<V: Clone> AlleleMap<V> {
    /// Creates a map with every allele set to `zero`.
    pub fn make(size: usize, zero: V) -> AlleleMap<V> {
        AlleleMap {
            values: vec![zero; size]
        }
    }
}

impl<V> AlleleMap<V> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> &V {
        &self.values[index]
    }

    pub fn values(&self) -> &[V] {
        &self.values
    }

    /// Applies `f` to the value of every allele selected by `set`.
    /// # Arguments
    /// * `set` - the alleles to touch
    /// * `f` - the replacement function, given the current value
    pub fn update_by_set<F: FnMut(&V) -> V>(&mut self, set: &AlleleSet, mut f: F) {
        for index in set.iter() {
            self.values[index] = f(&self.values[index]);
        }
    }

    /// Merges another map into this one, position by position.
    /// # Arguments
    /// * `other` - the map supplying the right-hand values
    /// * `combiner` - combines (current, incoming) into the new value
    /// # Panics
    /// * if the two maps were built against different allele indices
    pub fn update_from<F: FnMut(&V, &V) -> V>(&mut self, other: &AlleleMap<V>, mut combiner: F) {
        assert_eq!(self.values.len(), other.values.len(), "allele map size mismatch");
        for (current, incoming) in self.values.iter_mut().zip(other.values.iter()) {
            *current = combiner(current, incoming);
        }
    }

    /// Folds over all per-allele values.
    pub fn fold<B, F: FnMut(B, &V) -> B>(&self, init: B, f: F) -> B {
        self.values.iter().fold(init, f)
    }

    /// Produces a same-shaped map with every value transformed.
    pub fn map<W, F: FnMut(&V) -> W>(&self, f: F) -> AlleleMap<W> {
        AlleleMap {
            values: self.values.iter().map(f).collect()
        }
    }

    /// Iterates (allele_index, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &V)> {
        self.values.iter().enumerate()
    }
}
