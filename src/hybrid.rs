//! Hybrid Constraint Handler and Search Controller (C4 + C6): the four
//! method-specific solve loops dispatched from [`crate::Model::minimize`].
//!
//! `Bc` (branch-and-check) and `Lbbd` (logic-based Benders) both iterate a
//! MIP candidate against the CP engine; they differ only in how tightly the
//! two subsolvers are interleaved. Since `microlp` exposes no per-node
//! callback or true incremental re-solve across a rebuilt row set, both are
//! implemented as an outer loop that re-materializes the whole relaxation
//! each round (§4.4.2's documented `ENFORCE_LP` granularity compromise):
//! solve the MIP to optimality, check the candidate wholesale against the CP
//! engine, and on conflict record a nogood cut row and resolve from scratch.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::cp::domain::IntDomainExt;
use crate::cp::engine::{Atom, Limits, SolveResult};
use crate::registry::IntVarId;
use crate::status::Status;
use crate::{mip, nogood, Model};

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// `Method::Mip`: solve the materialized relaxation once. Any constraint
/// that never got a MIP row (a CP-only constraint) is silently unchecked —
/// by construction `Model::minimize` only reaches this path when every
/// posted constraint had a linear encoding.
pub(crate) fn solve_mip(model: &mut Model, obj_var: IntVarId, _time_limit: Duration) -> Status {
    let problem = model.registry.materialize_mip(obj_var);
    match mip::solve(&problem) {
        Ok(outcome) => finish_mip_outcome(model, obj_var, outcome),
        Err(e) => {
            debug!(error = %e, "MIP subsolver failed");
            Status::Error
        }
    }
}

fn finish_mip_outcome(model: &mut Model, obj_var: IntVarId, outcome: mip::MipOutcome) -> Status {
    match (outcome.status, outcome.solution) {
        (mip::MipStatus::Optimal, Some(sol)) => {
            model.dual_bound = obj_value(model, obj_var, &sol);
            let decoded = model.registry.decode_solution(&sol);
            model.accept_solution(decoded, obj_var);
            Status::Optimal
        }
        (mip::MipStatus::Feasible, Some(sol)) => {
            model.dual_bound = obj_value(model, obj_var, &sol);
            let decoded = model.registry.decode_solution(&sol);
            model.accept_solution(decoded, obj_var);
            Status::Feasible
        }
        (mip::MipStatus::Infeasible, _) => Status::Infeasible,
        _ => {
            if model.get_primal_bound().is_some() {
                Status::Feasible
            } else {
                Status::Unknown
            }
        }
    }
}

fn obj_value(model: &Model, obj_var: IntVarId, sol: &microlp::Solution) -> crate::IntVal {
    let mip_var = model.registry.int_mip(obj_var).expect("objective always promoted");
    sol.var_value(mip_var).round() as crate::IntVal
}

/// `Method::Cp`: repeatedly tighten the objective's upper bound and re-solve
/// under the CP engine alone, the classic branch-and-bound-by-resolve
/// pattern for a search engine with no native optimization objective.
pub(crate) fn solve_cp(model: &mut Model, obj_var: IntVarId, time_limit: Duration) -> Status {
    let deadline = Instant::now() + time_limit;
    let mut best: Option<crate::IntVal> = None;
    loop {
        let budget = remaining(deadline);
        if budget.is_zero() {
            break;
        }
        model.registry.cp.clear_assumptions();
        if let Some(b) = best {
            let cp_var = model.registry.int_cp(obj_var);
            if !model.registry.cp.assume(Atom::LessEq(cp_var, b - 1)) {
                model.registry.cp.clear_assumptions();
                model.dual_bound = best.expect("checked some");
                return Status::Optimal;
            }
        }
        let limits = Limits {
            time: budget,
            conflicts: None,
        };
        match model.registry.cp.solve(limits) {
            SolveResult::Sat => {
                let val = model.registry.cp_int_domain(obj_var).lb();
                let sol = decode_cp_solution(model);
                model.accept_solution(sol, obj_var);
                best = Some(val);
                trace!(val, "CP found improving solution");
            }
            SolveResult::Unsat => {
                model.registry.cp.clear_assumptions();
                return if let Some(b) = best {
                    model.dual_bound = b;
                    Status::Optimal
                } else {
                    Status::Infeasible
                };
            }
            SolveResult::Unknown => break,
        }
    }
    model.registry.cp.clear_assumptions();
    if let Some(b) = best {
        model.dual_bound = b;
        Status::Feasible
    } else {
        Status::Unknown
    }
}

fn decode_cp_solution(model: &Model) -> crate::Solution {
    let mut bools = index_vec::IndexVec::new();
    for id in model.registry.bool_ids() {
        bools.push(model.registry.cp_bool_domain(id).unwrap_or(false));
    }
    let mut ints = index_vec::IndexVec::new();
    for id in model.registry.int_ids() {
        ints.push(model.registry.cp_int_domain(id).lb());
    }
    crate::Solution { bools, ints }
}

/// The outer loop shared by `Bc` and `Lbbd`.
fn solve_decomposition(model: &mut Model, obj_var: IntVarId, time_limit: Duration) -> Status {
    let deadline = Instant::now() + time_limit;

    loop {
        if remaining(deadline).is_zero() {
            return if model.get_primal_bound().is_some() {
                Status::Feasible
            } else {
                Status::Unknown
            };
        }
        let problem = model.registry.materialize_mip(obj_var);
        let outcome = match mip::solve(&problem) {
            Ok(o) => o,
            Err(e) => {
                debug!(error = %e, "MIP subsolver failed");
                return Status::Error;
            }
        };
        let sol = match (outcome.status, outcome.solution) {
            (mip::MipStatus::Infeasible, _) => return Status::Infeasible,
            (_, Some(sol)) => sol,
            (_, None) => {
                return if model.get_primal_bound().is_some() {
                    Status::Feasible
                } else {
                    Status::Unknown
                };
            }
        };
        model.dual_bound = obj_value(model, obj_var, &sol);

        match check_candidate(model, &sol) {
            Ok(()) => {
                let decoded = model.registry.decode_solution(&sol);
                model.accept_solution(decoded, obj_var);
                return Status::Optimal;
            }
            Err(atoms) => {
                let atoms = if model.options().minimize_nogoods {
                    nogood::minimize(&mut model.registry.cp, atoms)
                } else {
                    atoms
                };
                let (terms, rhs) = nogood::lift_conflict(&mut model.registry, &atoms);
                trace!(cut_len = terms.len(), rhs, "recording nogood cut");
                model.push_mip_row(terms, mip::Sign::Ge, rhs);
            }
        }
    }
}

/// Check the MIP candidate `sol` against the CP engine: fix every promoted
/// variable's value as an assumption and run a full CP solve. `Ok(())`
/// means the candidate is CP-feasible as-is; `Err` carries the conflict.
fn check_candidate(model: &mut Model, sol: &microlp::Solution) -> Result<(), Vec<Atom>> {
    model.registry.cp.clear_assumptions();
    model.registry.cp.reset_monitors();

    macro_rules! assume_or_fail {
        ($atom:expr) => {
            if !model.registry.cp.assume($atom) {
                let conflict = model.registry.cp.get_conflict();
                model.registry.cp.clear_assumptions();
                return Err(conflict);
            }
        };
    }

    for id in model.registry.bool_ids() {
        if let Some(mip_var) = model.registry.bool_mip(id) {
            let cp_var = model.registry.bool_cp(id);
            let polarity = sol.var_value(mip_var) != 0.0;
            let lit = if polarity {
                crate::cp::engine::Lit::pos(cp_var)
            } else {
                crate::cp::engine::Lit::neg(cp_var)
            };
            assume_or_fail!(Atom::Bool(lit));
        }
    }
    for id in model.registry.int_ids() {
        if let Some(mip_var) = model.registry.int_mip(id) {
            let cp_var = model.registry.int_cp(id);
            let value = sol.var_value(mip_var).round() as crate::IntVal;
            assume_or_fail!(Atom::GreaterEq(cp_var, value));
            assume_or_fail!(Atom::LessEq(cp_var, value));
        }
    }

    let limits = Limits {
        time: Duration::from_secs(5),
        conflicts: Some(10_000),
    };
    let outcome = match model.registry.cp.solve(limits) {
        SolveResult::Sat | SolveResult::Unknown => {
            feed_back_propagated_bounds(model);
            Ok(())
        }
        SolveResult::Unsat => Err(model.registry.cp.get_conflict()),
    };
    model.registry.cp.clear_assumptions();
    outcome
}

/// The PROPAGATE event: any integer domain the CP engine tightened beyond
/// what this check explicitly fixed is folded back into the registry's
/// bounds, so the next materialized MIP relaxation inherits it.
fn feed_back_propagated_bounds(model: &mut Model) {
    for cp_var in model.registry.cp.changed_ints().to_vec() {
        let id = model.registry.int_id_of(cp_var);
        if model.registry.int_is_promoted(id) {
            // Already pinned to an exact MIP value by this same check; no
            // looser feedback to contribute.
            continue;
        }
        let dom = model.registry.cp.int_domain(cp_var);
        let (lb, ub) = (dom.lb(), dom.ub());
        model.registry.tighten_registered_bounds(id, lb, ub);
    }
}

/// `Method::Bc`: branch-and-check. Identical loop structure to `Lbbd` given
/// `microlp`'s lack of a true incremental MIP interface; see §4.4.2.
pub(crate) fn solve_bc(model: &mut Model, obj_var: IntVarId, time_limit: Duration) -> Status {
    solve_decomposition(model, obj_var, time_limit)
}

/// `Method::Lbbd`: logic-based Benders decomposition outer loop.
pub(crate) fn solve_lbbd(model: &mut Model, obj_var: IntVarId, time_limit: Duration) -> Status {
    solve_decomposition(model, obj_var, time_limit)
}
