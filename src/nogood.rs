//! Nogood Builder (C5): lifts a CP conflict into a MIP cut forbidding the
//! exact combination of assumptions that proved infeasible.
//!
//! An atom's *relaxation* is the 0/1 condition under which that assumption
//! no longer holds: `1 - b` for a positively-asserted Boolean, `b` for a
//! negatively-asserted one, and for an integer bound atom either a single
//! reified column (when the variable already has a MIP column — the direct
//! column path) or a sum of indicator variables otherwise. The cut is
//! `∑ relaxation(atom) >= 1` — at
//! least one assumption must be given up. Expanding the Boolean case's
//! constant `1` into the right-hand side keeps every term a plain
//! (coefficient, variable) pair referencing a variable's own MIP column, with
//! no extra linking row required.

use crate::cp::engine::{Atom, CpEngine};
use crate::registry::{MipTerm, Registry};
use crate::IntVal;

/// Try dropping each atom of `atoms` in turn, keeping the drop only if the
/// remainder still reproduces the conflict under `cp`'s current variable
/// domains. Order does not affect soundness, only which interchangeable atom
/// of a redundant pair survives — `swap_remove` is used for that reason, not
/// because it matters which one is kept.
pub(crate) fn minimize(cp: &mut CpEngine, mut atoms: Vec<Atom>) -> Vec<Atom> {
    let mut i = 0;
    while i < atoms.len() {
        let dropped = atoms.swap_remove(i);
        cp.clear_assumptions();
        let still_conflicts = atoms.iter().any(|&a| !cp.assume(a));
        if still_conflicts {
            // `dropped` was not needed to reproduce the conflict; leave it out.
        } else {
            let last = atoms.len();
            atoms.push(dropped);
            atoms.swap(i, last);
            i += 1;
        }
    }
    cp.clear_assumptions();
    atoms
}

/// Lift `atoms` (as returned by [`CpEngine::get_conflict`]) into the terms of
/// a `∑ term >= rhs` MIP cut, promoting every variable it touches.
///
/// Each atom contributes the 0/1 condition under which it no longer holds —
/// its negation, via [`Atom::negate`] — so the cut reads "at least one
/// assumption must be given up".
pub(crate) fn lift_conflict(registry: &mut Registry, atoms: &[Atom]) -> (Vec<(MipTerm, f64)>, f64) {
    let mut terms = Vec::new();
    let mut rhs = 1.0;
    for &atom in atoms {
        match atom.negate() {
            Atom::Bool(lit) => {
                let bid = registry.bool_id_of(lit.var);
                registry.promote_bool_to_mip(bid);
                if lit.polarity {
                    terms.push((MipTerm::Bool(bid), 1.0));
                } else {
                    terms.push((MipTerm::Bool(bid), -1.0));
                    rhs -= 1.0;
                }
            }
            Atom::GreaterEq(cp_var, k) => {
                let id = registry.int_id_of(cp_var);
                if registry.int_mip(id).is_some() {
                    let b = registry.reify_bound(id, true, k);
                    terms.push((MipTerm::Bool(b), 1.0));
                } else {
                    let inds = registry.indicator_vars(id, None);
                    let (lb, _) = registry.int_bounds(id);
                    for (offset, &b) in inds.iter().enumerate() {
                        let v = lb + offset as IntVal;
                        if v >= k {
                            registry.promote_bool_to_mip(b);
                            terms.push((MipTerm::Bool(b), 1.0));
                        }
                    }
                }
            }
            Atom::LessEq(cp_var, k) => {
                let id = registry.int_id_of(cp_var);
                if registry.int_mip(id).is_some() {
                    let b = registry.reify_bound(id, false, k);
                    terms.push((MipTerm::Bool(b), 1.0));
                } else {
                    let inds = registry.indicator_vars(id, None);
                    let (lb, _) = registry.int_bounds(id);
                    for (offset, &b) in inds.iter().enumerate() {
                        let v = lb + offset as IntVal;
                        if v <= k {
                            registry.promote_bool_to_mip(b);
                            terms.push((MipTerm::Bool(b), 1.0));
                        }
                    }
                }
            }
        }
    }
    (terms, rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cp::engine::{Atom, CpEngine, Lit};

    #[test]
    fn minimize_drops_redundant_atom() {
        let mut cp = CpEngine::default();
        // A domain of `0..=2`, baked in at creation (not an assumption), so
        // `x >= 3` conflicts on its own; the extra `x >= 1` atom is
        // redundant and should be dropped.
        let x = cp.new_intvar((0..=2).into());
        let atoms = vec![Atom::GreaterEq(x, 3), Atom::GreaterEq(x, 1)];
        let minimized = minimize(&mut cp, atoms);
        assert_eq!(minimized, vec![Atom::GreaterEq(x, 3)]);
    }

    #[test]
    fn lift_conflict_builds_bool_terms() {
        let mut r = Registry::default();
        let b = r.new_bool("b");
        let cp = r.bool_cp(b);
        let atoms = vec![Atom::Bool(Lit::pos(cp))];
        let (terms, rhs) = lift_conflict(&mut r, &atoms);
        assert_eq!(terms.len(), 1);
        assert_eq!(rhs, 0.0);
        assert!(r.bool_is_promoted(b));
    }
}
