//! The per-region evidence table built by the CIGAR walker and rewritten by realignment.

use std::collections::BTreeMap;

use super::{Descriptor, SoftClipRecord, Variation};
use crate::reference::ReferenceWindow;

/// Alleles observed at one position.
pub type AlleleMap = BTreeMap<Descriptor, Variation>;

/// Candidate events noted during the walk, by position then descriptor.
pub type SeedMap = BTreeMap<i64, BTreeMap<Descriptor, i32>>;

/// One realignment candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    pub position: i64,
    pub descriptor: Descriptor,
    pub count: i32,
}

/// Everything a region walk produces.
#[derive(Debug, Clone, Default)]
pub struct VariationTable {
    /// Bases, MNPs and deletions keyed by their first reference position.
    pub variants: BTreeMap<i64, AlleleMap>,
    /// Insertions keyed by the reference position they follow.
    pub insertions: BTreeMap<i64, AlleleMap>,
    pub coverage: BTreeMap<i64, i32>,
    pub soft_clips_5: BTreeMap<i64, SoftClipRecord>,
    pub soft_clips_3: BTreeMap<i64, SoftClipRecord>,
    pub insertion_seeds: SeedMap,
    pub deletion_seeds: SeedMap,
    pub mnp_seeds: SeedMap,
    /// Longest read span seen (aligned plus inserted plus clipped bases).
    pub read_length: i32,
}

fn bump(seeds: &mut SeedMap, pos: i64, descriptor: &Descriptor) {
    *seeds.entry(pos).or_default().entry(descriptor.clone()).or_insert(0) += 1;
}

impl VariationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The variation for `descriptor` at `pos`, created empty when absent.
    pub fn variant_mut(&mut self, pos: i64, descriptor: &Descriptor) -> &mut Variation {
        self.variants.entry(pos).or_default().entry(descriptor.clone()).or_default()
    }

    /// The insertion variation for `descriptor` after `pos`, created empty when absent.
    pub fn insertion_mut(&mut self, pos: i64, descriptor: &Descriptor) -> &mut Variation {
        self.insertions.entry(pos).or_default().entry(descriptor.clone()).or_default()
    }

    #[must_use]
    pub fn variant(&self, pos: i64, descriptor: &Descriptor) -> Option<&Variation> {
        self.variants.get(&pos).and_then(|m| m.get(descriptor))
    }

    #[must_use]
    pub fn insertion(&self, pos: i64, descriptor: &Descriptor) -> Option<&Variation> {
        self.insertions.get(&pos).and_then(|m| m.get(descriptor))
    }

    /// The reference-allele variation at `pos`, if the window has a base there and reads
    /// supported it.
    #[must_use]
    pub fn reference_at(&self, pos: i64, window: &ReferenceWindow) -> Option<&Variation> {
        let base = window.get(pos)?;
        self.variant(pos, &Descriptor::Reference(base))
    }

    pub fn reference_at_mut(&mut self, pos: i64, window: &ReferenceWindow) -> Option<&mut Variation> {
        let base = window.get(pos)?;
        self.variants.get_mut(&pos).and_then(|m| m.get_mut(&Descriptor::Reference(base)))
    }

    /// Removes an allele, dropping the position once it holds none.
    pub fn remove_variant(&mut self, pos: i64, descriptor: &Descriptor) -> Option<Variation> {
        let alleles = self.variants.get_mut(&pos)?;
        let removed = alleles.remove(descriptor);
        if alleles.is_empty() {
            self.variants.remove(&pos);
        }
        removed
    }

    pub fn remove_insertion(&mut self, pos: i64, descriptor: &Descriptor) -> Option<Variation> {
        let alleles = self.insertions.get_mut(&pos)?;
        let removed = alleles.remove(descriptor);
        if alleles.is_empty() {
            self.insertions.remove(&pos);
        }
        removed
    }

    /// Credits `source` to a non-insertion allele, optionally releasing the same reads from the
    /// reference allele at `release_at`.
    pub fn credit_variant(
        &mut self,
        pos: i64,
        descriptor: &Descriptor,
        source: &Variation,
        release_at: Option<i64>,
        window: &ReferenceWindow,
    ) {
        self.variant_mut(pos, descriptor).merge_from(source, None);
        self.release_reference(release_at, source, window);
    }

    /// Credits `source` to an insertion allele, optionally releasing the same reads from the
    /// reference allele at `release_at`.
    pub fn credit_insertion(
        &mut self,
        pos: i64,
        descriptor: &Descriptor,
        source: &Variation,
        release_at: Option<i64>,
        window: &ReferenceWindow,
    ) {
        self.insertion_mut(pos, descriptor).merge_from(source, None);
        self.release_reference(release_at, source, window);
    }

    fn release_reference(&mut self, at: Option<i64>, source: &Variation, window: &ReferenceWindow) {
        if let Some(reference) = at.and_then(|p| self.reference_at_mut(p, window)) {
            reference.release(source);
        }
    }

    pub fn add_coverage(&mut self, pos: i64, n: i32) {
        *self.coverage.entry(pos).or_insert(0) += n;
    }

    #[must_use]
    pub fn coverage_at(&self, pos: i64) -> i32 {
        self.coverage.get(&pos).copied().unwrap_or(0)
    }

    pub fn note_insertion(&mut self, pos: i64, descriptor: &Descriptor) {
        bump(&mut self.insertion_seeds, pos, descriptor);
    }

    pub fn note_deletion(&mut self, pos: i64, descriptor: &Descriptor) {
        bump(&mut self.deletion_seeds, pos, descriptor);
    }

    pub fn note_mnp(&mut self, pos: i64, descriptor: &Descriptor) {
        bump(&mut self.mnp_seeds, pos, descriptor);
    }

    /// Flattens seeds, most frequent first, then by position.
    #[must_use]
    pub fn ranked_seeds(seeds: &SeedMap) -> Vec<Seed> {
        let mut out: Vec<Seed> = seeds
            .iter()
            .flat_map(|(&position, m)| {
                m.iter().map(move |(d, &count)| Seed { position, descriptor: d.clone(), count })
            })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then(a.position.cmp(&b.position)));
        out
    }

    /// Every position holding either kind of allele, ascending.
    #[must_use]
    pub fn positions(&self) -> Vec<i64> {
        let mut out: Vec<i64> = self.variants.keys().chain(self.insertions.keys()).copied().collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}
