//! The exception-set algebra.
//!
//! An [`ExceptionSet`] is the set of exception classes a handler edge can deliver.
//! It is stored as a union of [`TypeRange`]s, each a class together with all of its
//! subclasses minus the subtrees rooted at its holes. Holes model shadowing: in
//!
//! ```text
//! try { a(); } catch (E2 e) { ... } catch (E1 e) { ... }
//! ```
//!
//! with `E2 extends E1`, the first handler receives `E2` and the second receives
//! `E1 - {E2}`.
//!
//! Classes have a single superclass, so two class subtrees are either nested or
//! disjoint. Every operation relies on that and takes the [`ClassOracle`] it needs
//! for subclass queries. Results are always [`ExceptionSet::reduce`]d: ranges are
//! non-empty, pairwise disjoint, not mergeable, and sorted.

use std::{collections::BTreeSet, fmt};

use crate::bytecode::{ClassOracle, THROWABLE};

/// One class subtree with excluded sub-subtrees.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeRange {
    top: String,
    holes: BTreeSet<String>,
}

impl TypeRange {
    fn new(top: impl Into<String>) -> Self {
        TypeRange {
            top: top.into(),
            holes: BTreeSet::new(),
        }
    }

    /// The root of the subtree.
    #[must_use]
    pub fn top(&self) -> &str {
        &self.top
    }

    /// Roots of the excluded subtrees.
    #[must_use]
    pub fn holes(&self) -> &BTreeSet<String> {
        &self.holes
    }
}

impl fmt::Display for TypeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.top)?;
        if !self.holes.is_empty() {
            let holes: Vec<&str> = self.holes.iter().map(String::as_str).collect();
            write!(f, " - {{{}}}", holes.join(", "))?;
        }
        Ok(())
    }
}

/// `sub` is `sup` or a subclass of it. Every exception class is a `Throwable`, even
/// one the oracle has never heard of.
fn le(oracle: &dyn ClassOracle, sub: &str, sup: &str) -> bool {
    sub == sup || sup == THROWABLE || oracle.is_subclass(sub, sup)
}

/// A range with a hole at or above its top is empty.
fn is_empty_range(oracle: &dyn ClassOracle, range: &TypeRange) -> bool {
    range.holes.iter().any(|h| le(oracle, &range.top, h))
}

fn intersect_ranges(oracle: &dyn ClassOracle, a: &TypeRange, b: &TypeRange) -> Option<TypeRange> {
    let top = if le(oracle, &a.top, &b.top) {
        &a.top
    } else if le(oracle, &b.top, &a.top) {
        &b.top
    } else {
        return None;
    };
    let range = TypeRange {
        top: top.clone(),
        holes: a.holes.union(&b.holes).cloned().collect(),
    };
    (!is_empty_range(oracle, &range)).then_some(range)
}

/// `a - b` as a list of ranges, possibly overlapping with each other.
fn subtract_ranges(oracle: &dyn ClassOracle, a: &TypeRange, b: &TypeRange) -> Vec<TypeRange> {
    if intersect_ranges(oracle, a, b).is_none() {
        return vec![a.clone()];
    }
    // What b leaves out below a: the parts of a inside b's holes
    let mut result: Vec<TypeRange> = b
        .holes
        .iter()
        .filter_map(|h| intersect_ranges(oracle, a, &TypeRange::new(h.clone())))
        .collect();
    if !le(oracle, &a.top, &b.top) {
        // b sits strictly inside a
        let mut outside = a.clone();
        outside.holes.insert(b.top.clone());
        if !is_empty_range(oracle, &outside) {
            result.push(outside);
        }
    }
    result
}

/// The set of exception classes a handler edge delivers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExceptionSet {
    ranges: Vec<TypeRange>,
}

impl ExceptionSet {
    /// The empty set.
    #[must_use]
    pub fn empty() -> Self {
        ExceptionSet::default()
    }

    /// Every exception: `Throwable` and all its subclasses.
    #[must_use]
    pub fn all() -> Self {
        Self::of(THROWABLE)
    }

    /// `class` and all its subclasses.
    #[must_use]
    pub fn of(class: &str) -> Self {
        ExceptionSet {
            ranges: vec![TypeRange::new(class)],
        }
    }

    /// The set caught by an exception table entry; `None` catches everything.
    #[must_use]
    pub fn from_catch(catch_type: Option<&str>) -> Self {
        catch_type.map_or_else(Self::all, Self::of)
    }

    /// The ranges of this set.
    #[must_use]
    pub fn ranges(&self) -> &[TypeRange] {
        &self.ranges
    }

    /// Returns `true` if the set has no ranges. Sets produced by the operations
    /// below are reduced, so this is exact for them.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns `true` if `class` is in the set.
    #[must_use]
    pub fn contains(&self, oracle: &dyn ClassOracle, class: &str) -> bool {
        self.ranges.iter().any(|r| {
            le(oracle, class, &r.top) && !r.holes.iter().any(|h| le(oracle, class, h))
        })
    }

    /// `self ∪ other`
    #[must_use]
    pub fn union(&self, oracle: &dyn ClassOracle, other: &ExceptionSet) -> ExceptionSet {
        let mut ranges = self.ranges.clone();
        ranges.extend(other.ranges.iter().cloned());
        ExceptionSet { ranges }.reduce(oracle)
    }

    /// `self ∩ other`
    #[must_use]
    pub fn intersect(&self, oracle: &dyn ClassOracle, other: &ExceptionSet) -> ExceptionSet {
        let ranges = self
            .ranges
            .iter()
            .flat_map(|a| {
                other
                    .ranges
                    .iter()
                    .filter_map(move |b| intersect_ranges(oracle, a, b))
            })
            .collect();
        ExceptionSet { ranges }.reduce(oracle)
    }

    /// `self - other`
    #[must_use]
    pub fn difference(&self, oracle: &dyn ClassOracle, other: &ExceptionSet) -> ExceptionSet {
        let mut ranges = Vec::new();
        for a in &self.ranges {
            let mut remaining = vec![a.clone()];
            for b in &other.ranges {
                remaining = remaining
                    .iter()
                    .flat_map(|r| subtract_ranges(oracle, r, b))
                    .collect();
            }
            ranges.extend(remaining);
        }
        ExceptionSet { ranges }.reduce(oracle)
    }

    /// Returns `true` if every class of `self` is in `other`.
    #[must_use]
    pub fn is_subset(&self, oracle: &dyn ClassOracle, other: &ExceptionSet) -> bool {
        self.difference(oracle, other).is_empty()
    }

    /// Returns `true` if the two sets share a class.
    #[must_use]
    pub fn overlaps(&self, oracle: &dyn ClassOracle, other: &ExceptionSet) -> bool {
        !self.intersect(oracle, other).is_empty()
    }

    /// Brings the set into its minimal form:
    ///
    /// - empty ranges are dropped and each range keeps only its outermost holes
    ///   below its top
    /// - a range inside another range is dropped
    /// - a range filling another's hole is merged into it
    /// - overlapping ranges are split until they are disjoint
    ///
    /// Reducing a reduced set returns it unchanged.
    #[must_use]
    pub fn reduce(mut self, oracle: &dyn ClassOracle) -> ExceptionSet {
        loop {
            let before = self.ranges.clone();

            self.ranges.retain(|r| !is_empty_range(oracle, r));
            for range in &mut self.ranges {
                let below: Vec<String> = range
                    .holes
                    .iter()
                    .filter(|h| le(oracle, h, &range.top))
                    .cloned()
                    .collect();
                range.holes = below
                    .iter()
                    .filter(|h| !below.iter().any(|o| o != *h && le(oracle, h, o)))
                    .cloned()
                    .collect();
            }
            self.ranges.sort();
            self.ranges.dedup();

            self.drop_subsumed(oracle);
            self.fill_holes();
            self.split_overlaps(oracle);

            self.ranges.sort();
            if self.ranges == before {
                return self;
            }
        }
    }

    fn drop_subsumed(&mut self, oracle: &dyn ClassOracle) {
        let mut i = 0;
        while i < self.ranges.len() {
            let inner = &self.ranges[i];
            let subsumed = self.ranges.iter().enumerate().any(|(j, outer)| {
                j != i && subtract_ranges(oracle, inner, outer).is_empty()
            });
            if subsumed {
                self.ranges.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn fill_holes(&mut self) {
        let mut i = 0;
        while i < self.ranges.len() {
            let top = self.ranges[i].top.clone();
            let host = self
                .ranges
                .iter()
                .position(|r| r.holes.contains(&top));
            match host {
                Some(j) if j != i => {
                    let filler = self.ranges.remove(i);
                    let j = if j > i { j - 1 } else { j };
                    let host = &mut self.ranges[j];
                    host.holes.remove(&filler.top);
                    host.holes.extend(filler.holes);
                    i = 0;
                }
                _ => i += 1,
            }
        }
    }

    fn split_overlaps(&mut self, oracle: &dyn ClassOracle) {
        let mut i = 0;
        'outer: while i < self.ranges.len() {
            for j in 0..self.ranges.len() {
                if i == j {
                    continue;
                }
                let (a, b) = (&self.ranges[i], &self.ranges[j]);
                if intersect_ranges(oracle, a, b).is_none() || !le(oracle, &a.top, &b.top) {
                    continue;
                }
                // a is the narrower one; keep only its part outside b
                let rest = subtract_ranges(oracle, a, b);
                self.ranges.remove(i);
                self.ranges.extend(rest);
                i = 0;
                continue 'outer;
            }
            i += 1;
        }
    }
}

impl fmt::Display for ExceptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return write!(f, "{{}}");
        }
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ClassHierarchy;

    fn hierarchy() -> ClassHierarchy {
        let mut h = ClassHierarchy::with_java_lang();
        h.add_class("t/E1", "java/lang/Exception")
            .add_class("t/E2", "t/E1")
            .add_class("t/E3", "t/E2")
            .add_class("t/F", "java/lang/Exception");
        h
    }

    #[test]
    fn test_shadowed_handler_gets_hole() {
        let h = hierarchy();
        let e1 = ExceptionSet::of("t/E1");
        let e2 = ExceptionSet::of("t/E2");

        let first = ExceptionSet::all().intersect(&h, &e2);
        let second = ExceptionSet::all().difference(&h, &first).intersect(&h, &e1);
        assert_eq!(first, e2);
        assert_eq!(second.ranges().len(), 1);
        assert_eq!(second.ranges()[0].top(), "t/E1");
        assert!(second.ranges()[0].holes().contains("t/E2"));
        assert!(!second.overlaps(&h, &first));
        assert!(second.contains(&h, "t/E1"));
        assert!(!second.contains(&h, "t/E3"));
        assert_eq!(second.to_string(), "t/E1 - {t/E2}");
    }

    #[test]
    fn test_hole_filling_merges_back() {
        let h = hierarchy();
        let e1 = ExceptionSet::of("t/E1");
        let e2 = ExceptionSet::of("t/E2");
        let split = e1.difference(&h, &e2);
        assert_eq!(split.union(&h, &e2), e1);
    }

    #[test]
    fn test_incomparable_types_are_disjoint() {
        let h = hierarchy();
        let e1 = ExceptionSet::of("t/E1");
        let f = ExceptionSet::of("t/F");
        assert!(e1.intersect(&h, &f).is_empty());
        assert_eq!(e1.difference(&h, &f), e1);
        assert_eq!(e1.union(&h, &f).ranges().len(), 2);
    }

    #[test]
    fn test_difference_of_nested_ranges() {
        let h = hierarchy();
        let all = ExceptionSet::all();
        let e2_minus_e3 = ExceptionSet::of("t/E2").difference(&h, &ExceptionSet::of("t/E3"));
        let rest = all.difference(&h, &e2_minus_e3);
        assert!(rest.contains(&h, "t/E3"));
        assert!(rest.contains(&h, "t/E1"));
        assert!(!rest.contains(&h, "t/E2"));
        assert!(rest.union(&h, &e2_minus_e3).is_subset(&h, &all));
        assert!(all.is_subset(&h, &rest.union(&h, &e2_minus_e3)));
    }

    #[test]
    fn test_reduce_drops_redundant_pieces() {
        let h = hierarchy();
        let messy = ExceptionSet {
            ranges: vec![
                TypeRange::new("t/E2"),
                TypeRange {
                    top: "t/E1".to_string(),
                    holes: ["t/E3".to_string(), "t/F".to_string()].into_iter().collect(),
                },
                TypeRange {
                    top: "t/E3".to_string(),
                    holes: ["t/E1".to_string()].into_iter().collect(),
                },
            ],
        };
        // E2 covers the E3 hole of E1, the last range is empty
        let reduced = messy.reduce(&h);
        assert_eq!(reduced, ExceptionSet::of("t/E1"));
        assert_eq!(reduced.clone().reduce(&h), reduced);
    }
}
