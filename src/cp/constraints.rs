//! CP-side propagators for the constraint library (C2).
//!
//! Each propagator is a thin bound-consistency routine over [`VarStore`]. They
//! are intentionally simple: the engine falls back on search (branch +
//! fixpoint) to catch anything a propagator only partially prunes, so every
//! propagator only needs to be *sound* (never prune a feasible value) and
//! *eventually* detect a violated constraint once the relevant variables are
//! fixed, not necessarily achieve full bound-consistency.

use super::domain::IntDomainExt;
use super::engine::{CpIntVar, CpPropagator, Lit, VarStore};
use crate::IntVal;

/// Post a single literal as a permanent fact.
#[derive(Debug)]
pub(crate) struct FixBool {
    pub(crate) lit: Lit,
}

impl CpPropagator for FixBool {
    fn propagate(&mut self, store: &mut VarStore) -> Result<bool, ()> {
        store.assign_bool(self.lit)
    }
}

/// One term of a generic linear sum: either a Boolean literal (contributing 0
/// or 1) or an integer variable.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Term {
    Bool(Lit),
    Int(CpIntVar),
}

fn term_bounds(store: &VarStore, term: Term) -> (IntVal, IntVal) {
    match term {
        Term::Bool(lit) => match store.bool_vals[lit.var] {
            Some(v) if v == lit.polarity => (1, 1),
            Some(_) => (0, 0),
            None => (0, 1),
        },
        Term::Int(v) => (store.int_doms[v].lb(), store.int_doms[v].ub()),
    }
}

fn tighten_term_ub(store: &mut VarStore, term: Term, ub: IntVal) -> Result<bool, ()> {
    match term {
        Term::Bool(lit) => {
            if ub < 1 {
                store.assign_bool(lit.negated())
            } else {
                Ok(false)
            }
        }
        Term::Int(v) => store.set_ub(v, ub),
    }
}

fn tighten_term_lb(store: &mut VarStore, term: Term, lb: IntVal) -> Result<bool, ()> {
    match term {
        Term::Bool(lit) => {
            if lb > 0 {
                store.assign_bool(lit)
            } else {
                Ok(false)
            }
        }
        Term::Int(v) => store.set_lb(v, lb),
    }
}

/// The comparison a [`LinearInt`] propagator enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sign {
    Eq,
    Le,
    Ge,
    Ne,
}

/// `∑ coeff * term sign rhs`, bound-consistency propagation.
///
/// This single propagator implements several constraints from the library:
/// plain linear constraints, Boolean linear constraints (with an optional
/// integer right-hand term folded into `terms`), and set-partition (`Eq` with
/// unit Boolean coefficients summing to one).
#[derive(Debug)]
pub(crate) struct LinearInt {
    pub(crate) terms: Vec<(Term, IntVal)>,
    pub(crate) sign: Sign,
    pub(crate) rhs: IntVal,
}

impl LinearInt {
    fn propagate_le(&mut self, store: &mut VarStore, rhs: IntVal) -> Result<bool, ()> {
        let mins: Vec<IntVal> = self
            .terms
            .iter()
            .map(|&(t, c)| {
                let (lb, ub) = term_bounds(store, t);
                if c >= 0 {
                    c * lb
                } else {
                    c * ub
                }
            })
            .collect();
        let min_sum: IntVal = mins.iter().sum();
        if min_sum > rhs {
            return Err(());
        }
        let mut changed = false;
        for (i, &(t, c)) in self.terms.clone().iter().enumerate() {
            if c == 0 {
                continue;
            }
            let allowed = rhs - min_sum + mins[i];
            if c > 0 {
                let new_ub = allowed.div_euclid(c);
                changed |= tighten_term_ub(store, t, new_ub)?;
            } else {
                let new_lb = (-allowed).div_euclid(-c);
                changed |= tighten_term_lb(store, t, new_lb)?;
            }
        }
        Ok(changed)
    }

    fn negated_terms(&self) -> Vec<(Term, IntVal)> {
        self.terms.iter().map(|&(t, c)| (t, -c)).collect()
    }
}

impl CpPropagator for LinearInt {
    fn propagate(&mut self, store: &mut VarStore) -> Result<bool, ()> {
        match self.sign {
            Sign::Le => self.propagate_le(store, self.rhs),
            Sign::Ge => {
                let neg = self.negated_terms();
                let mut tmp = LinearInt {
                    terms: neg,
                    sign: Sign::Le,
                    rhs: -self.rhs,
                };
                tmp.propagate(store)
            }
            Sign::Eq => {
                let a = self.propagate_le(store, self.rhs)?;
                let neg = self.negated_terms();
                let mut tmp = LinearInt {
                    terms: neg,
                    sign: Sign::Le,
                    rhs: -self.rhs,
                };
                let b = tmp.propagate(store)?;
                Ok(a || b)
            }
            Sign::Ne => {
                let bounds: Vec<(IntVal, IntVal)> = self
                    .terms
                    .iter()
                    .map(|&(t, _)| term_bounds(store, t))
                    .collect();
                let free: Vec<usize> = bounds
                    .iter()
                    .enumerate()
                    .filter(|(_, &(lb, ub))| lb != ub)
                    .map(|(i, _)| i)
                    .collect();
                let fixed_sum: IntVal = self
                    .terms
                    .iter()
                    .zip(&bounds)
                    .enumerate()
                    .filter(|(i, _)| !free.contains(i))
                    .map(|(_, (&(_, c), &(lb, _)))| c * lb)
                    .sum();
                if free.is_empty() {
                    if fixed_sum == self.rhs {
                        return Err(());
                    }
                    return Ok(false);
                }
                if free.len() == 1 {
                    let idx = free[0];
                    let (t, c) = self.terms[idx];
                    if c != 0 {
                        let remainder = self.rhs - fixed_sum;
                        if remainder % c == 0 {
                            let forbidden = remainder / c;
                            if let Term::Int(v) = t {
                                return store.remove_val(v, forbidden);
                            }
                        }
                    }
                }
                Ok(false)
            }
        }
    }
}

/// `all_different(vars)`: remove fixed values from other domains and fail on
/// a duplicate fixed pair.
#[derive(Debug)]
pub(crate) struct AllDifferent {
    pub(crate) vars: Vec<CpIntVar>,
}

impl CpPropagator for AllDifferent {
    fn propagate(&mut self, store: &mut VarStore) -> Result<bool, ()> {
        let mut changed = false;
        let fixed: Vec<(usize, IntVal)> = self
            .vars
            .iter()
            .enumerate()
            .filter(|(_, &v)| store.int_doms[v].is_fixed())
            .map(|(i, &v)| (i, store.int_doms[v].lb()))
            .collect();
        for i in 0..fixed.len() {
            for j in (i + 1)..fixed.len() {
                if fixed[i].1 == fixed[j].1 {
                    return Err(());
                }
            }
        }
        for (i, &v) in self.vars.iter().enumerate() {
            if store.int_doms[v].is_fixed() {
                continue;
            }
            for &(j, val) in &fixed {
                if j != i {
                    changed |= store.remove_val(v, val)?;
                }
            }
        }
        Ok(changed)
    }
}

/// `val = array[idx]` for a constant `array`, indices 1-based.
#[derive(Debug)]
pub(crate) struct ElementConst {
    pub(crate) idx: CpIntVar,
    pub(crate) array: Vec<IntVal>,
    pub(crate) val: CpIntVar,
}

impl CpPropagator for ElementConst {
    fn propagate(&mut self, store: &mut VarStore) -> Result<bool, ()> {
        let mut changed = false;
        let idx_dom = store.int_doms[self.idx].clone();
        let candidates: Vec<(IntVal, IntVal)> = idx_dom
            .iter()
            .flat_map(|r| *r.start()..=*r.end())
            .filter(|&k| k >= 1 && (k as usize) <= self.array.len())
            .map(|k| (k, self.array[(k - 1) as usize]))
            .collect();
        if candidates.is_empty() {
            return Err(());
        }
        let min_val = candidates.iter().map(|&(_, v)| v).min().unwrap();
        let max_val = candidates.iter().map(|&(_, v)| v).max().unwrap();
        changed |= store.set_lb(self.val, min_val)?;
        changed |= store.set_ub(self.val, max_val)?;

        if store.int_doms[self.val].is_fixed() {
            let v = store.int_doms[self.val].lb();
            for &(k, av) in &candidates {
                if av != v {
                    changed |= store.remove_val(self.idx, k)?;
                }
            }
        }
        Ok(changed)
    }
}

/// `val = array[idx]` for an `array` of integer variables, indices 1-based.
#[derive(Debug)]
pub(crate) struct ElementVar {
    pub(crate) idx: CpIntVar,
    pub(crate) array: Vec<CpIntVar>,
    pub(crate) val: CpIntVar,
}

impl CpPropagator for ElementVar {
    fn propagate(&mut self, store: &mut VarStore) -> Result<bool, ()> {
        let mut changed = false;
        if store.int_doms[self.idx].is_fixed() {
            let k = store.int_doms[self.idx].lb();
            if k < 1 || (k as usize) > self.array.len() {
                return Err(());
            }
            let chosen = self.array[(k - 1) as usize];
            let (lb, ub) = (store.int_doms[chosen].lb(), store.int_doms[chosen].ub());
            changed |= store.set_lb(self.val, lb)?;
            changed |= store.set_ub(self.val, ub)?;
            let (vlb, vub) = (store.int_doms[self.val].lb(), store.int_doms[self.val].ub());
            changed |= store.set_lb(chosen, vlb)?;
            changed |= store.set_ub(chosen, vub)?;
        }
        Ok(changed)
    }
}

/// Ties an indicator set to the integer variable it was built from:
/// `inds[i] <-> (var = lb + i)`. Posted once per indicator set, alongside
/// the exactly-one `LinearInt` row, so the pair the variable registry hands
/// out is not just a name for each value but an actual bidirectional link.
#[derive(Debug)]
pub(crate) struct IndicatorLink {
    pub(crate) var: CpIntVar,
    pub(crate) lb: IntVal,
    pub(crate) inds: Vec<Lit>,
}

impl CpPropagator for IndicatorLink {
    fn propagate(&mut self, store: &mut VarStore) -> Result<bool, ()> {
        let mut changed = false;
        for (offset, &lit) in self.inds.iter().enumerate() {
            let k = self.lb + offset as IntVal;
            match store.bool_vals[lit.var] {
                Some(v) if v == lit.polarity => {
                    changed |= store.set_lb(self.var, k)?;
                    changed |= store.set_ub(self.var, k)?;
                }
                Some(_) => {
                    changed |= store.remove_val(self.var, k)?;
                }
                None => {
                    if !store.int_doms[self.var].contains(&k) {
                        changed |= store.assign_bool(lit.negated())?;
                    }
                }
            }
        }
        if store.int_doms[self.var].is_fixed() {
            let v = store.int_doms[self.var].lb();
            for (offset, &lit) in self.inds.iter().enumerate() {
                let k = self.lb + offset as IntVal;
                let want = k == v;
                changed |= store.assign_bool(if want { lit } else { lit.negated() })?;
            }
        }
        Ok(changed)
    }
}

/// `out = coeffs[var - lb]`: maps an integer variable's value to a
/// per-value coefficient table. Used by the value-indexed linear
/// constraint (`∑ⱼ cⱼₖ·[xⱼ=k]`) to fold each variable's contribution into a
/// single auxiliary CP integer variable before summing.
#[derive(Debug)]
pub(crate) struct IntCoeffElement {
    pub(crate) var: CpIntVar,
    pub(crate) lb: IntVal,
    pub(crate) coeffs: Vec<IntVal>,
    pub(crate) out: CpIntVar,
}

impl CpPropagator for IntCoeffElement {
    fn propagate(&mut self, store: &mut VarStore) -> Result<bool, ()> {
        let mut changed = false;
        let dom = store.int_doms[self.var].clone();
        let candidates: Vec<(IntVal, IntVal)> = dom
            .iter()
            .flat_map(|r| *r.start()..=*r.end())
            .filter_map(|k| {
                let offset = k - self.lb;
                (offset >= 0 && (offset as usize) < self.coeffs.len())
                    .then(|| (k, self.coeffs[offset as usize]))
            })
            .collect();
        if candidates.is_empty() {
            return Err(());
        }
        let min_val = candidates.iter().map(|&(_, v)| v).min().unwrap();
        let max_val = candidates.iter().map(|&(_, v)| v).max().unwrap();
        changed |= store.set_lb(self.out, min_val)?;
        changed |= store.set_ub(self.out, max_val)?;

        if store.int_doms[self.out].is_fixed() {
            let v = store.int_doms[self.out].lb();
            for &(k, cv) in &candidates {
                if cv != v {
                    changed |= store.remove_val(self.var, k)?;
                }
            }
        }
        Ok(changed)
    }
}

/// `cumulative(start, duration, resource, capacity)`: simple time-table
/// overload check over the mandatory part of each task.
#[derive(Debug)]
pub(crate) struct Cumulative {
    pub(crate) start: Vec<CpIntVar>,
    pub(crate) duration: Vec<IntVal>,
    pub(crate) resource: Vec<IntVal>,
    pub(crate) capacity: IntVal,
    /// `None` for every task always active; otherwise a per-task activity
    /// literal (the optional variant).
    pub(crate) active: Option<Vec<Lit>>,
}

impl CpPropagator for Cumulative {
    fn propagate(&mut self, store: &mut VarStore) -> Result<bool, ()> {
        let n = self.start.len();
        let lb: Vec<IntVal> = self.start.iter().map(|&s| store.int_doms[s].lb()).collect();
        let ub: Vec<IntVal> = self.start.iter().map(|&s| store.int_doms[s].ub()).collect();
        let is_active = |i: usize| -> bool {
            match &self.active {
                None => true,
                Some(lits) => matches!(store.bool_vals[lits[i].var], Some(v) if v == lits[i].polarity),
            }
        };
        let envelope_lo = *lb.iter().min().unwrap_or(&0);
        let envelope_hi = ub
            .iter()
            .zip(&self.duration)
            .map(|(&u, &d)| u + d)
            .max()
            .unwrap_or(0);
        for t in envelope_lo..envelope_hi {
            let mut load = 0;
            for i in 0..n {
                if !is_active(i) {
                    continue;
                }
                if ub[i] <= t && t < lb[i] + self.duration[i] {
                    load += self.resource[i];
                }
            }
            if load > self.capacity {
                return Err(());
            }
        }
        Ok(false)
    }
}

/// `r → x − y ≤ k`.
#[derive(Debug)]
pub(crate) struct ReifySubtractionLe {
    pub(crate) r: Lit,
    pub(crate) x: CpIntVar,
    pub(crate) y: CpIntVar,
    pub(crate) k: IntVal,
}

impl CpPropagator for ReifySubtractionLe {
    fn propagate(&mut self, store: &mut VarStore) -> Result<bool, ()> {
        let mut changed = false;
        match store.bool_vals[self.r.var] {
            Some(v) if v == self.r.polarity => {
                let ux = store.int_doms[self.x].ub();
                let ly = store.int_doms[self.y].lb();
                changed |= store.set_ub(self.x, ly + self.k)?;
                changed |= store.set_lb(self.y, ux - self.k)?;
            }
            _ => {
                let lx = store.int_doms[self.x].lb();
                let uy = store.int_doms[self.y].ub();
                if lx - uy > self.k {
                    changed |= store.assign_bool(self.r.negated())?;
                }
            }
        }
        Ok(changed)
    }
}

/// `(r == r_val) → (x sign x_val)`.
#[derive(Debug)]
pub(crate) struct Implication {
    pub(crate) r: Lit,
    pub(crate) x: CpIntVar,
    pub(crate) sign: Sign,
    pub(crate) x_val: IntVal,
}

impl CpPropagator for Implication {
    fn propagate(&mut self, store: &mut VarStore) -> Result<bool, ()> {
        let holds = matches!(store.bool_vals[self.r.var], Some(v) if v == self.r.polarity);
        if holds {
            return match self.sign {
                Sign::Le => store.set_ub(self.x, self.x_val),
                Sign::Ge => store.set_lb(self.x, self.x_val),
                Sign::Eq => {
                    let a = store.set_lb(self.x, self.x_val)?;
                    let b = store.set_ub(self.x, self.x_val)?;
                    Ok(a || b)
                }
                Sign::Ne => store.remove_val(self.x, self.x_val),
            };
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cp::engine::CpEngine;

    #[test]
    fn linear_eq_forces_last_free_bool() {
        let mut e = CpEngine::default();
        let a = e.new_boolvar();
        let b = e.new_boolvar();
        let c = e.new_boolvar();
        e.post(Box::new(LinearInt {
            terms: vec![
                (Term::Bool(Lit::pos(a)), 1),
                (Term::Bool(Lit::pos(b)), 1),
                (Term::Bool(Lit::pos(c)), 1),
            ],
            sign: Sign::Eq,
            rhs: 1,
        }));
        assert!(e.assume(crate::cp::engine::Atom::Bool(Lit::neg(a))));
        assert!(e.assume(crate::cp::engine::Atom::Bool(Lit::neg(b))));
        assert_eq!(e.bool_val(c), Some(true));
    }

    #[test]
    fn all_different_forces_third_value() {
        let mut e = CpEngine::default();
        let x = e.new_intvar((1..=3).into());
        let y = e.new_intvar((1..=3).into());
        let z = e.new_intvar((1..=3).into());
        e.post(Box::new(AllDifferent {
            vars: vec![x, y, z],
        }));
        assert!(e.assume(crate::cp::engine::Atom::LessEq(x, 1)));
        assert!(e.assume(crate::cp::engine::Atom::GreaterEq(y, 2)));
        assert!(e.assume(crate::cp::engine::Atom::LessEq(y, 2)));
        assert!(e.is_consistent());
        assert_eq!(e.int_domain(z).lb(), 3);
        assert_eq!(e.int_domain(z).ub(), 3);
    }

    #[test]
    fn cumulative_detects_overlap() {
        let mut e = CpEngine::default();
        let s0 = e.new_intvar((0..=2).into());
        let s1 = e.new_intvar((0..=2).into());
        e.post(Box::new(Cumulative {
            start: vec![s0, s1],
            duration: vec![2, 2],
            resource: vec![1, 1],
            capacity: 1,
            active: None,
        }));
        assert!(e.assume(crate::cp::engine::Atom::LessEq(s0, 0)));
        assert!(!e.assume(crate::cp::engine::Atom::LessEq(s1, 0)));
    }
}
