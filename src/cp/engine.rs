//! The black-box CP subsolver (C3 adapter target).
//!
//! This is a small trail-based, bound-consistency constraint solver. It is
//! deliberately simple: the hybrid controller only ever asks it to check the
//! consistency of a (near-)complete assignment under an assumption frame, so
//! there is no need for clause learning or a sophisticated variable order —
//! chronological backtracking with a conflict/time budget is enough to
//! implement the `solve(limits)` contract described for C3.

use std::time::{Duration, Instant};

use index_vec::IndexVec;

use super::domain::{IntDomain, IntDomainExt};
use crate::IntVal;

index_vec::define_index_type! {
    /// Index of a Boolean variable inside the CP engine.
    pub struct CpBoolVar = u32;
}

index_vec::define_index_type! {
    /// Index of an integer variable inside the CP engine.
    pub struct CpIntVar = u32;
}

/// A Boolean literal: a variable together with the polarity being asserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Lit {
    pub(crate) var: CpBoolVar,
    pub(crate) polarity: bool,
}

impl Lit {
    /// Construct the positive literal of `var`.
    pub(crate) fn pos(var: CpBoolVar) -> Self {
        Lit {
            var,
            polarity: true,
        }
    }

    /// Construct the negated literal of `var`.
    pub(crate) fn neg(var: CpBoolVar) -> Self {
        Lit {
            var,
            polarity: false,
        }
    }

    /// Flip the polarity of the literal.
    pub(crate) fn negated(self) -> Self {
        Lit {
            var: self.var,
            polarity: !self.polarity,
        }
    }
}

/// A single CP conflict atom: a Boolean polarity or an integer bound.
///
/// This is the type the nogood builder (C5) lifts into MIP columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Atom {
    /// Assert that a Boolean variable takes the given polarity.
    Bool(Lit),
    /// Assert `x >= v`.
    GreaterEq(CpIntVar, IntVal),
    /// Assert `x <= v`.
    LessEq(CpIntVar, IntVal),
}

impl Atom {
    /// The logical negation of the atom.
    pub(crate) fn negate(self) -> Atom {
        match self {
            Atom::Bool(l) => Atom::Bool(l.negated()),
            Atom::GreaterEq(v, k) => Atom::LessEq(v, k - 1),
            Atom::LessEq(v, k) => Atom::GreaterEq(v, k + 1),
        }
    }
}

/// Outcome of a bounded [`CpEngine::solve`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SolveResult {
    /// The assumption frame is consistent with a full assignment.
    Sat,
    /// The assumption frame cannot be extended to a feasible assignment.
    Unsat,
    /// Neither could be established within the given limits.
    Unknown,
}

/// Resource limits for a single [`CpEngine::solve`] call.
#[derive(Clone, Copy)]
pub(crate) struct Limits {
    pub(crate) time: Duration,
    pub(crate) conflicts: Option<u32>,
}

/// A constraint propagator registered with the CP engine.
///
/// Mirrors the teacher's `Constraint::simplify` dispatch: each propagator is
/// re-run to a local fixpoint whenever the engine reaches a new assignment and
/// may tighten any variable it was given at construction time. Returning
/// `Err(())` signals a domain wipeout (the propagator's constraint is
/// violated under the current assignment).
pub(crate) trait CpPropagator: std::fmt::Debug {
    /// Attempt to tighten domains. Returns `Ok(true)` if any domain changed.
    fn propagate(&mut self, store: &mut VarStore) -> Result<bool, ()>;
}

/// Record of one trailed change, so it can be undone on backtrack.
#[derive(Debug)]
enum TrailEntry {
    /// A Boolean assignment, with the index into `bool_vals` and its former
    /// value.
    Bool(CpBoolVar, Option<bool>),
    /// An integer domain tightening, with the former domain.
    Int(CpIntVar, IntDomain),
}

/// One attempted branch during search, so failure can try the other side.
struct Choice {
    /// The untried alternative, if any.
    alternative: Option<Atom>,
}

/// Storage for variable domains, exposed to propagators.
#[derive(Debug, Default)]
pub(crate) struct VarStore {
    pub(crate) bool_vals: IndexVec<CpBoolVar, Option<bool>>,
    pub(crate) int_doms: IndexVec<CpIntVar, IntDomain>,
}

impl VarStore {
    /// Assert `lit`, failing if it contradicts the current assignment.
    pub(crate) fn assign_bool(&mut self, lit: Lit) -> Result<bool, ()> {
        match self.bool_vals[lit.var] {
            Some(v) if v == lit.polarity => Ok(false),
            Some(_) => Err(()),
            None => {
                self.bool_vals[lit.var] = Some(lit.polarity);
                Ok(true)
            }
        }
    }

    /// Tighten the lower bound of an integer variable. Leaves the domain
    /// untouched (not emptied) when the bound would wipe it out, so the
    /// caller can rely on it still being the pre-call domain after `Err`.
    pub(crate) fn set_lb(&mut self, var: CpIntVar, lb: IntVal) -> Result<bool, ()> {
        let before = self.int_doms[var].clone();
        let mut attempt = before.clone();
        if !attempt.tighten_lb(lb) {
            return Err(());
        }
        self.int_doms[var] = attempt;
        Ok(self.int_doms[var] != before)
    }

    /// Tighten the upper bound of an integer variable. See [`Self::set_lb`]
    /// for the empty-domain rollback guarantee.
    pub(crate) fn set_ub(&mut self, var: CpIntVar, ub: IntVal) -> Result<bool, ()> {
        let before = self.int_doms[var].clone();
        let mut attempt = before.clone();
        if !attempt.tighten_ub(ub) {
            return Err(());
        }
        self.int_doms[var] = attempt;
        Ok(self.int_doms[var] != before)
    }

    /// Remove a single value from an integer variable's domain. See
    /// [`Self::set_lb`] for the empty-domain rollback guarantee.
    pub(crate) fn remove_val(&mut self, var: CpIntVar, v: IntVal) -> Result<bool, ()> {
        let before = self.int_doms[var].clone();
        let mut attempt = before.clone();
        if !attempt.remove(v) {
            return Err(());
        }
        self.int_doms[var] = attempt;
        Ok(self.int_doms[var] != before)
    }
}

/// The CP subsolver engine (C3's implementation target).
#[derive(Debug, Default)]
pub(crate) struct CpEngine {
    store: VarStore,
    propagators: Vec<Box<dyn CpPropagator>>,
    trail: Vec<TrailEntry>,
    level_marks: Vec<usize>,
    assumptions: Vec<Atom>,
    conflict: Vec<Atom>,
    /// Indices (into `int_doms`) whose bound changed since the last
    /// `reset_monitors` call. Drives the PROPAGATE event's feedback to MIP.
    changed_ints: Vec<CpIntVar>,
}

impl CpEngine {
    /// Create a fresh Boolean variable.
    pub(crate) fn new_boolvar(&mut self) -> CpBoolVar {
        self.store.bool_vals.push(None)
    }

    /// Create a fresh integer variable with the given inclusive domain.
    pub(crate) fn new_intvar(&mut self, domain: IntDomain) -> CpIntVar {
        self.store.int_doms.push(domain)
    }

    /// Register a propagator, immediately enqueuing it to run at the next
    /// fixpoint computation.
    pub(crate) fn post(&mut self, prop: Box<dyn CpPropagator>) {
        self.propagators.push(prop);
    }

    /// Current domain of a Boolean variable.
    pub(crate) fn bool_val(&self, var: CpBoolVar) -> Option<bool> {
        self.store.bool_vals[var]
    }

    /// Current domain of an integer variable.
    pub(crate) fn int_domain(&self, var: CpIntVar) -> &IntDomain {
        &self.store.int_doms[var]
    }

    /// Drop the current assumption frame, backtracking to the root state.
    pub(crate) fn clear_assumptions(&mut self) {
        while !self.level_marks.is_empty() {
            self.backtrack();
        }
        self.assumptions.clear();
    }

    /// Push a new decision level and assert `atom`.
    ///
    /// Returns `false` if `atom` is already refuted by the current state.
    /// On failure the atoms responsible (the assumptions accepted so far,
    /// plus `atom` itself) are recorded for [`Self::get_conflict`].
    pub(crate) fn assume(&mut self, atom: Atom) -> bool {
        self.level_marks.push(self.trail.len());
        if self.apply(atom).is_err() || self.propagate_fixpoint().is_err() {
            self.conflict = self.assumptions.clone();
            self.conflict.push(atom);
            return false;
        }
        self.assumptions.push(atom);
        true
    }

    /// Run propagation only (no search); report whether the current state is
    /// consistent.
    pub(crate) fn is_consistent(&mut self) -> bool {
        self.propagate_fixpoint().is_ok()
    }

    /// Reset the bounds-change monitors used by the PROPAGATE event.
    pub(crate) fn reset_monitors(&mut self) {
        self.changed_ints.clear();
    }

    /// Integer variables whose bounds changed since the last
    /// [`Self::reset_monitors`] call.
    pub(crate) fn changed_ints(&self) -> &[CpIntVar] {
        &self.changed_ints
    }

    /// Solve under the current assumption frame within `limits`.
    pub(crate) fn solve(&mut self, limits: Limits) -> SolveResult {
        let start = Instant::now();
        let mut choices: Vec<Choice> = Vec::new();
        let mut conflicts = 0_u32;

        if self.propagate_fixpoint().is_err() {
            self.conflict = self.assumptions.clone();
            return SolveResult::Unsat;
        }

        loop {
            if start.elapsed() >= limits.time {
                self.unwind_choices(&mut choices, 0);
                return SolveResult::Unknown;
            }
            if let Some(max) = limits.conflicts {
                if conflicts >= max {
                    self.unwind_choices(&mut choices, 0);
                    return SolveResult::Unknown;
                }
            }

            match self.pick_branch() {
                None => {
                    // Every variable is fixed and all propagators are quiet: SAT.
                    return SolveResult::Sat;
                }
                Some((atom, alt)) => {
                    self.level_marks.push(self.trail.len());
                    choices.push(Choice {
                        alternative: Some(alt),
                    });
                    if self.apply(atom).is_ok() && self.propagate_fixpoint().is_ok() {
                        continue;
                    }
                    // Failed branch: try the alternative, backtracking as
                    // needed when no alternative remains.
                    loop {
                        conflicts += 1;
                        self.backtrack();
                        match choices.pop() {
                            None => {
                                self.conflict = self.assumptions.clone();
                                return SolveResult::Unsat;
                            }
                            Some(c) => match c.alternative {
                                Some(alt) => {
                                    self.level_marks.push(self.trail.len());
                                    choices.push(Choice { alternative: None });
                                    if self.apply(alt).is_ok() && self.propagate_fixpoint().is_ok()
                                    {
                                        break;
                                    }
                                }
                                None => continue,
                            },
                        }
                    }
                }
            }
        }
    }

    /// The conflict atoms recorded by the most recent failed `solve`.
    pub(crate) fn get_conflict(&self) -> Vec<Atom> {
        self.conflict.clone()
    }

    /// Apply a single atom to the store, trailing the change.
    fn apply(&mut self, atom: Atom) -> Result<(), ()> {
        match atom {
            Atom::Bool(lit) => {
                let before = self.store.bool_vals[lit.var];
                if self.store.assign_bool(lit)? {
                    self.trail.push(TrailEntry::Bool(lit.var, before));
                }
            }
            Atom::GreaterEq(var, v) => {
                let before = self.store.int_doms[var].clone();
                if self.store.set_lb(var, v)? {
                    self.trail.push(TrailEntry::Int(var, before));
                    if !self.changed_ints.contains(&var) {
                        self.changed_ints.push(var);
                    }
                }
            }
            Atom::LessEq(var, v) => {
                let before = self.store.int_doms[var].clone();
                if self.store.set_ub(var, v)? {
                    self.trail.push(TrailEntry::Int(var, before));
                    if !self.changed_ints.contains(&var) {
                        self.changed_ints.push(var);
                    }
                }
            }
        }
        Ok(())
    }

    /// Run every propagator until no further change occurs or one fails.
    fn propagate_fixpoint(&mut self) -> Result<(), ()> {
        loop {
            let mut changed = false;
            for i in 0..self.propagators.len() {
                // Detach/reattach to satisfy the borrow checker while passing
                // `&mut self.store` to the propagator.
                let mut prop = std::mem::replace(&mut self.propagators[i], Box::new(Dummy));
                let before_len = self.trail.len();
                let before_doms: Vec<IntDomain> = self.store.int_doms.iter().cloned().collect();
                let before_bools: Vec<Option<bool>> = self.store.bool_vals.iter().copied().collect();
                let res = prop.propagate(&mut self.store);
                self.propagators[i] = prop;
                match res {
                    Ok(did_change) => {
                        if did_change {
                            changed = true;
                            self.record_store_diff(before_doms, before_bools, before_len);
                        }
                    }
                    Err(()) => {
                        self.record_store_diff(before_doms, before_bools, before_len);
                        return Err(());
                    }
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    /// Diff the store against a snapshot taken before a propagator ran,
    /// trailing every change so it can be undone on backtrack.
    fn record_store_diff(
        &mut self,
        before_doms: Vec<IntDomain>,
        before_bools: Vec<Option<bool>>,
        _before_len: usize,
    ) {
        for (i, before) in before_doms.into_iter().enumerate() {
            let var = CpIntVar::from(i);
            if self.store.int_doms[var] != before {
                self.trail.push(TrailEntry::Int(var, before));
                if !self.changed_ints.contains(&var) {
                    self.changed_ints.push(var);
                }
            }
        }
        for (i, before) in before_bools.into_iter().enumerate() {
            let var = CpBoolVar::from(i);
            if self.store.bool_vals[var] != before {
                self.trail.push(TrailEntry::Bool(var, before));
            }
        }
    }

    /// Pop the most recent decision level, restoring the store.
    fn backtrack(&mut self) {
        let Some(mark) = self.level_marks.pop() else {
            return;
        };
        while self.trail.len() > mark {
            match self.trail.pop().expect("checked len above") {
                TrailEntry::Bool(var, old) => self.store.bool_vals[var] = old,
                TrailEntry::Int(var, old) => self.store.int_doms[var] = old,
            }
        }
    }

    /// Unwind `choices` down to `target_level` decision levels.
    fn unwind_choices(&mut self, choices: &mut Vec<Choice>, target_level: usize) {
        while choices.len() > target_level {
            self.backtrack();
            let _ = choices.pop();
        }
    }

    /// Pick the next branching atom: the first unfixed Boolean, else the
    /// first unfixed integer variable split at its lower bound.
    fn pick_branch(&self) -> Option<(Atom, Atom)> {
        for (var, val) in self.store.bool_vals.iter_enumerated() {
            if val.is_none() {
                return Some((Atom::Bool(Lit::pos(var)), Atom::Bool(Lit::neg(var))));
            }
        }
        for (var, dom) in self.store.int_doms.iter_enumerated() {
            if !dom.is_fixed() {
                let lb = dom.lb();
                return Some((Atom::LessEq(var, lb), Atom::GreaterEq(var, lb + 1)));
            }
        }
        None
    }
}

/// Placeholder propagator used only to satisfy the borrow checker while a
/// real propagator is detached from the vector during a `propagate` call.
#[derive(Debug)]
struct Dummy;
impl CpPropagator for Dummy {
    fn propagate(&mut self, _store: &mut VarStore) -> Result<bool, ()> {
        Ok(false)
    }
}

impl std::fmt::Debug for Limits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limits")
            .field("time", &self.time)
            .field("conflicts", &self.conflicts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assume_and_backtrack_restores_domain() {
        let mut e = CpEngine::default();
        let x = e.new_intvar((0..=5).into());
        assert!(e.assume(Atom::GreaterEq(x, 3)));
        assert_eq!(e.int_domain(x).lb(), 3);
        e.clear_assumptions();
        assert_eq!(e.int_domain(x).lb(), 0);
    }

    #[test]
    fn contradictory_assumption_is_refused() {
        let mut e = CpEngine::default();
        let x = e.new_intvar((0..=5).into());
        assert!(e.assume(Atom::LessEq(x, 2)));
        assert!(!e.assume(Atom::GreaterEq(x, 3)));
    }

    #[test]
    fn solve_finds_sat_with_free_variable() {
        let mut e = CpEngine::default();
        let x = e.new_intvar((0..=2).into());
        assert!(e.assume(Atom::GreaterEq(x, 1)));
        let limits = Limits {
            time: Duration::from_secs(1),
            conflicts: None,
        };
        assert_eq!(e.solve(limits), SolveResult::Sat);
    }
}
