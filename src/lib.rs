//! A hybrid mixed-integer/constraint-programming optimization engine.
//!
//! A [`Model`] is built from Boolean and bounded-integer variables plus a
//! library of constraints (see the `constraints` module); each constraint is
//! replicated into both a MIP relaxation and a CP propagator. [`Model::minimize`]
//! then drives the search using one of four [`Method`]s, the two hybrid ones
//! running a *logic-based Benders decomposition* loop between the two
//! subsolvers, with CP conflicts lifted into MIP cuts by the `nogood` module.

pub mod error;
pub mod status;

pub(crate) mod constraints;
pub(crate) mod cp;
pub(crate) mod debug;
pub(crate) mod hybrid;
pub(crate) mod mip;
pub(crate) mod nogood;
pub(crate) mod registry;

use std::time::{Duration, Instant};

use index_vec::IndexVec;
use tracing::{debug, info};

pub use crate::constraints::Sign;
pub use crate::error::Error;
pub use crate::registry::{BoolVarId, IntVarId};
pub use crate::status::{Method, Status};

/// The integer type used throughout this crate for bounds, coefficients and
/// solution values.
pub type IntVal = i64;

/// A solution snapshot: Boolean and integer values indexed by registry id.
#[derive(Debug, Clone, Default)]
pub struct Solution {
    pub(crate) bools: IndexVec<BoolVarId, bool>,
    pub(crate) ints: IndexVec<IntVarId, IntVal>,
}

impl Solution {
    /// The value assigned to `var`.
    pub fn bool_val(&self, var: BoolVarId) -> bool {
        self.bools[var]
    }

    /// The value assigned to `var`.
    pub fn int_val(&self, var: IntVarId) -> IntVal {
        self.ints[var]
    }
}

/// Options controlling a [`Model`]'s hybrid search, beyond method selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelOptions {
    /// Enable the optional cut-minimization pass of the nogood builder
    /// (§4.5-equivalent). Off by default: minimization costs extra CP solves
    /// per conflict.
    pub minimize_nogoods: bool,
}

/// The hybrid MIP/CP model: variable registry, constraint library, and
/// search controller combined behind one handle.
#[derive(Debug)]
pub struct Model {
    method: Method,
    options: ModelOptions,
    pub(crate) registry: registry::Registry,
    status: Status,
    primal_bound: Option<IntVal>,
    pub(crate) dual_bound: IntVal,
    sol: Option<Solution>,
    start_time: Option<Instant>,
    run_time: Duration,
}

impl Model {
    /// Create a fresh model that will be solved with `method`.
    pub fn new(method: Method) -> Self {
        Model::with_options(method, ModelOptions::default())
    }

    /// Create a fresh model with explicit [`ModelOptions`].
    pub fn with_options(method: Method, options: ModelOptions) -> Self {
        Model {
            method,
            options,
            registry: registry::Registry::default(),
            status: Status::Unknown,
            primal_bound: None,
            dual_bound: IntVal::MIN,
            sol: None,
            start_time: None,
            run_time: Duration::ZERO,
        }
    }

    // -- Variable constructors (C1) ---------------------------------------

    /// `add_bool_var(name) → B`.
    pub fn add_bool_var(&mut self, name: impl Into<String>) -> BoolVarId {
        self.registry.new_bool(name)
    }

    /// `add_int_var(lb, ub, include_in_mip, name) → I`.
    pub fn add_int_var(
        &mut self,
        lb: IntVal,
        ub: IntVal,
        include_in_mip: bool,
        name: impl Into<String>,
    ) -> Result<IntVarId, Error> {
        let always_mip = matches!(self.method, Method::Mip);
        self.registry
            .new_int(lb, ub, include_in_mip || always_mip, name)
    }

    /// `add_indicator_vars(I, subdomain?) → [B]`.
    pub fn add_indicator_vars(
        &mut self,
        var: IntVarId,
        subdomain: Option<&[IntVal]>,
    ) -> Vec<BoolVarId> {
        self.registry.indicator_vars(var, subdomain)
    }

    /// `add_mip_var(I) → I`: promote an integer variable to also carry a MIP
    /// column, without otherwise changing its meaning.
    pub fn add_mip_var(&mut self, var: IntVarId) -> IntVarId {
        self.registry.promote_int_to_mip(var)
    }

    /// `get_neg(B) → B`.
    pub fn get_neg(&mut self, var: BoolVarId) -> BoolVarId {
        self.registry.negate(var)
    }

    /// The constant Boolean `false`.
    pub fn get_false(&self) -> BoolVarId {
        self.registry.false_var
    }

    /// The constant Boolean `true`.
    pub fn get_true(&self) -> BoolVarId {
        self.registry.true_var
    }

    /// The constant integer `0`.
    pub fn get_zero(&self) -> IntVarId {
        self.registry.zero_var
    }

    /// Transition the model to terminal `Infeasible` status. Idempotent.
    pub(crate) fn mark_infeasible(&mut self) {
        if self.status != Status::Infeasible {
            info!("model proven infeasible during build");
        }
        self.status = Status::Infeasible;
    }

    pub(crate) fn is_build_infeasible(&self) -> bool {
        self.status == Status::Infeasible
    }

    // -- Solve (C6) --------------------------------------------------------

    /// `satisfy(time_limit?, verbose?)`: minimize the constant zero.
    pub fn satisfy(&mut self, time_limit: Option<Duration>, verbose: bool) -> Status {
        let zero = self.get_zero();
        self.minimize(zero, time_limit, verbose)
    }

    /// `minimize(obj, time_limit?, verbose?) → Status`.
    pub fn minimize(
        &mut self,
        obj_var: IntVarId,
        time_limit: Option<Duration>,
        verbose: bool,
    ) -> Status {
        self.start_time = Some(Instant::now());
        let time_limit = time_limit.unwrap_or(Duration::from_secs(3600));

        if self.status == Status::Infeasible {
            self.run_time = self.elapsed();
            if verbose {
                self.print_status();
            }
            return self.status;
        }

        self.registry.promote_int_to_mip(obj_var);
        self.dual_bound = self.registry.int_bounds(obj_var).0;

        debug!(method = ?self.method, "starting search");
        self.status = match self.method {
            Method::Mip => hybrid::solve_mip(self, obj_var, time_limit),
            Method::Cp => hybrid::solve_cp(self, obj_var, time_limit),
            Method::Bc => hybrid::solve_bc(self, obj_var, time_limit),
            Method::Lbbd => hybrid::solve_lbbd(self, obj_var, time_limit),
        };
        self.run_time = self.elapsed();
        info!(status = ?self.status, primal = ?self.primal_bound, dual = self.dual_bound, "search finished");
        if verbose {
            self.print_status();
        }
        self.status
    }

    fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or_default()
    }

    fn print_status(&self) {
        println!("--------------------------------------------------");
        println!("Method: {:?}", self.method);
        println!("CPU time: {:.2?}", self.run_time);
        println!("Status: {:?}", self.status);
        if let Some(p) = self.primal_bound {
            println!("Objective value: {p}");
        }
        if self.status != Status::Infeasible {
            println!("Objective bound: {}", self.dual_bound);
        }
        println!("--------------------------------------------------");
    }

    pub(crate) fn accept_solution(&mut self, sol: Solution, obj_var: IntVarId) {
        let val = sol.int_val(obj_var);
        if self.primal_bound.is_none_or(|p| val < p) {
            self.primal_bound = Some(val);
        }
        self.sol = Some(sol);
    }

    pub(crate) fn options(&self) -> ModelOptions {
        self.options
    }

    // -- Solution accessors --------------------------------------------------

    /// Current terminal (or in-progress) [`Status`].
    pub fn get_status(&self) -> Status {
        self.status
    }

    /// Best known primal (objective) bound, if any incumbent was found.
    pub fn get_primal_bound(&self) -> Option<IntVal> {
        self.primal_bound
    }

    /// Best proven dual bound.
    pub fn get_dual_bound(&self) -> IntVal {
        self.dual_bound
    }

    /// Value of `var` in the best known solution.
    ///
    /// # Panics
    /// Panics if no solution has been found yet.
    pub fn get_sol_bool(&self, var: BoolVarId) -> bool {
        self.sol
            .as_ref()
            .expect("no solution available")
            .bool_val(var)
    }

    /// Value of `var` in the best known solution.
    ///
    /// # Panics
    /// Panics if no solution has been found yet.
    pub fn get_sol_int(&self, var: IntVarId) -> IntVal {
        self.sol
            .as_ref()
            .expect("no solution available")
            .int_val(var)
    }

    /// Wall-clock runtime of the most recent `minimize` call.
    pub fn get_runtime(&self) -> Duration {
        self.run_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cp::engine::Atom;
    use crate::nogood;

    #[test]
    fn trivial_fix() {
        let mut m = Model::new(Method::Bc);
        let b = m.add_bool_var("b");
        assert!(m.add_constr_fix(b));
        let zero = m.get_zero();
        let status = m.minimize(zero, Some(Duration::from_secs(5)), false);
        assert_eq!(status, Status::Optimal);
        assert_eq!(m.get_primal_bound(), Some(0));
        assert!(m.get_sol_bool(b));
    }

    #[test]
    fn immediate_infeasibility_at_build() {
        let mut m = Model::new(Method::Bc);
        let x = m.add_int_var(0, 3, true, "x").unwrap();
        assert!(m.add_constr_linear(&[x], &[1], Sign::Eq, 0).unwrap());
        assert!(!m.add_constr_linear_neq(&[x], &[1], 0).unwrap());
        let status = m.minimize(x, Some(Duration::from_secs(5)), false);
        assert_eq!(status, Status::Infeasible);
    }

    #[test]
    fn alldifferent_forces_a_value() {
        let mut m = Model::new(Method::Bc);
        let x = m.add_int_var(1, 3, true, "x").unwrap();
        let y = m.add_int_var(1, 3, true, "y").unwrap();
        let z = m.add_int_var(1, 3, true, "z").unwrap();
        assert!(m.add_constr_alldifferent(&[x, y, z]));
        assert!(m.add_constr_linear(&[x], &[1], Sign::Eq, 1).unwrap());
        assert!(m.add_constr_linear(&[y], &[1], Sign::Eq, 2).unwrap());
        let status = m.minimize(z, Some(Duration::from_secs(5)), false);
        assert_eq!(status, Status::Optimal);
        assert_eq!(m.get_sol_int(z), 3);
    }

    #[test]
    fn lbbd_converges_through_an_element_constraint() {
        let mut m = Model::new(Method::Lbbd);
        let x = m.add_int_var(1, 3, true, "x").unwrap();
        let y = m.add_int_var(10, 30, true, "y").unwrap();
        assert!(m.add_constr_element_const(x, &[10, 20, 30], y));
        let status = m.minimize(y, Some(Duration::from_secs(5)), false);
        assert_eq!(status, Status::Optimal);
        assert_eq!(m.get_sol_int(y), 10);
    }

    #[test]
    fn pure_mip_method_solves_a_linear_model() {
        let mut m = Model::new(Method::Mip);
        let x = m.add_int_var(0, 10, true, "x").unwrap();
        let y = m.add_int_var(0, 10, true, "y").unwrap();
        assert!(m.add_constr_linear(&[x, y], &[1, 1], Sign::Ge, 5).unwrap());
        let status = m.minimize(x, Some(Duration::from_secs(5)), false);
        assert_eq!(status, Status::Optimal);
        assert_eq!(m.get_primal_bound(), Some(0));
    }

    /// A 2-job, 2-machine cost model where scheduling and machine choice are
    /// deliberately separate decisions: an element constraint picks each
    /// job's cost from its machine assignment, while a shared unit-capacity
    /// cumulative over each job's *time slot* (not its machine) only forbids
    /// the two jobs from running at the same time — so both jobs are free
    /// to pick the cheapest machine independently, as long as they land in
    /// different slots.
    #[test]
    fn cumulative_and_element_model_an_assignment_problem() {
        let mut m = Model::new(Method::Bc);
        let costs = [[3, 5], [2, 6]];
        let machine: Vec<IntVarId> = (0..2)
            .map(|j| m.add_int_var(1, 2, true, format!("machine{j}")).unwrap())
            .collect();
        let cost: Vec<IntVarId> = (0..2)
            .map(|j| m.add_int_var(2, 6, true, format!("cost{j}")).unwrap())
            .collect();
        for j in 0..2 {
            assert!(m.add_constr_element_const(machine[j], &costs[j], cost[j]));
        }
        let slot: Vec<IntVarId> = (0..2)
            .map(|j| m.add_int_var(0, 1, true, format!("slot{j}")).unwrap())
            .collect();
        assert!(m.add_constr_cumulative(&slot, &[1, 1], &[1, 1], 1));
        let total = m.add_int_var(0, 12, true, "total").unwrap();
        assert!(m
            .add_constr_linear(&[cost[0], cost[1], total], &[1, 1, -1], Sign::Eq, 0)
            .unwrap());

        let status = m.minimize(total, Some(Duration::from_secs(5)), false);
        assert_eq!(status, Status::Optimal);
        // Cheapest is both jobs on machine 0 (costs 3 and 2), landing in
        // different slots to satisfy the cumulative.
        assert_eq!(m.get_primal_bound(), Some(5));
    }

    /// Two duration-2, unit-resource tasks both pinned to start at time 0
    /// overrun a unit-capacity cumulative outright. Fixing both starts
    /// through a constraint (rather than a bare assumption) lets the normal
    /// build-time feasibility check catch it immediately, matching every
    /// other constructor in this library.
    #[test]
    fn cumulative_overload_is_caught_at_build_time() {
        let mut m = Model::new(Method::Bc);
        let start: Vec<IntVarId> = (0..2)
            .map(|j| m.add_int_var(0, 2, true, format!("start{j}")).unwrap())
            .collect();
        assert!(m.add_constr_cumulative(&start, &[2, 2], &[1, 1], 1));
        assert!(m.add_constr_linear(&[start[0]], &[1], Sign::Eq, 0).unwrap());
        assert!(!m.add_constr_linear(&[start[1]], &[1], Sign::Eq, 0).unwrap());

        let zero = m.get_zero();
        let status = m.minimize(zero, Some(Duration::from_secs(5)), false);
        assert_eq!(status, Status::Infeasible);
    }

    /// The same overload, reproduced directly against the CP engine: once
    /// both starts are pinned to time 0, the two `LessEq` atoms alone (no
    /// `GreaterEq` needed, since both domains' lower bound is already 0)
    /// already conflict, and `lift_conflict` turns that pair into exactly
    /// two MIP terms.
    #[test]
    fn cumulative_overload_lifts_to_a_two_atom_nogood() {
        let mut registry = registry::Registry::default();
        let s0 = registry.new_int(0, 2, true, "s0").unwrap();
        let s1 = registry.new_int(0, 2, true, "s1").unwrap();
        let cp_s0 = registry.int_cp(s0);
        let cp_s1 = registry.int_cp(s1);
        registry.cp.post(Box::new(cp::constraints::Cumulative {
            start: vec![cp_s0, cp_s1],
            duration: vec![2, 2],
            resource: vec![1, 1],
            capacity: 1,
            active: None,
        }));
        // Give both variables a MIP column up front, same as the
        // decomposition loop does before checking a candidate, so
        // `lift_conflict` takes the direct-column path instead of expanding
        // through indicators.
        let zero = registry.zero_var;
        registry.materialize_mip(zero);
        assert!(registry.cp.assume(Atom::LessEq(cp_s0, 0)));
        assert!(!registry.cp.assume(Atom::LessEq(cp_s1, 0)));
        let conflict = registry.cp.get_conflict();
        assert_eq!(conflict.len(), 2);
        registry.cp.clear_assumptions();

        let (terms, rhs) = nogood::lift_conflict(&mut registry, &conflict);
        assert_eq!(terms.len(), 2);
        assert_eq!(rhs, 1.0);
    }
}
