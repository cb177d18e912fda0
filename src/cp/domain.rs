//! Domain representation for the black-box CP subsolver's integer variables.

use rangelist::{IntervalIterator, RangeList};

use crate::IntVal;

/// The set of values an integer variable may still take.
///
/// Represented as an interval list rather than a bitset: the constraints in
/// this engine only ever query or tighten bounds, so a sparse set of ranges is
/// both cheaper to trail and sufficient for the bound atoms (`[x >= v]` /
/// `[x <= v]`) the nogood builder needs to decode.
pub(crate) type IntDomain = RangeList<IntVal>;

/// Extension helpers used throughout the CP engine when working with
/// [`IntDomain`] values.
pub(crate) trait IntDomainExt {
    /// The current lower bound of the domain.
    fn lb(&self) -> IntVal;
    /// The current upper bound of the domain.
    fn ub(&self) -> IntVal;
    /// Whether the domain contains exactly one value.
    fn is_fixed(&self) -> bool;
    /// Tighten the lower bound to `lb`, returning `false` if the domain is
    /// left empty.
    fn tighten_lb(&mut self, lb: IntVal) -> bool;
    /// Tighten the upper bound to `ub`, returning `false` if the domain is
    /// left empty.
    fn tighten_ub(&mut self, ub: IntVal) -> bool;
    /// Remove a single value from the domain, returning `false` if the domain
    /// is left empty.
    fn remove(&mut self, v: IntVal) -> bool;
}

impl IntDomainExt for IntDomain {
    fn lb(&self) -> IntVal {
        *self.lower_bound().expect("domain must not be empty")
    }

    fn ub(&self) -> IntVal {
        *self.upper_bound().expect("domain must not be empty")
    }

    fn is_fixed(&self) -> bool {
        self.lb() == self.ub()
    }

    fn tighten_lb(&mut self, lb: IntVal) -> bool {
        if lb <= self.lb() {
            return true;
        }
        *self = self
            .iter()
            .filter_map(|r| {
                if *r.end() < lb {
                    None
                } else if *r.start() < lb {
                    Some(lb..=*r.end())
                } else {
                    Some(r)
                }
            })
            .collect();
        !self.is_empty()
    }

    fn tighten_ub(&mut self, ub: IntVal) -> bool {
        if ub >= self.ub() {
            return true;
        }
        *self = self
            .iter()
            .filter_map(|r| {
                if ub < *r.start() {
                    None
                } else if ub < *r.end() {
                    Some(*r.start()..=ub)
                } else {
                    Some(r)
                }
            })
            .collect();
        !self.is_empty()
    }

    fn remove(&mut self, v: IntVal) -> bool {
        if !self.contains(&v) {
            return true;
        }
        let single: IntDomain = (v..=v).into();
        *self = self.diff(&single);
        !self.is_empty()
    }
}
