//! Variable Registry: identity, bounds and names for Boolean/integer
//! variables, with paired MIP and CP handles.
//!
//! MIP columns are not created eagerly: a variable is only marked
//! `promoted`, and the concrete [`MipVar`] is assigned by
//! `crate::mip::materialize` immediately before a solve, once the objective
//! variable is known (so its objective coefficient can be set at creation,
//! which `microlp` requires — it has no "change objective" call after the
//! fact). This mirrors the teacher's own `Model::to_solver` reformulation
//! step, which defers backend materialization until the build phase ends.

use std::collections::HashMap;

use index_vec::IndexVec;
use microlp::Variable as MipVar;
use tracing::trace;

use crate::cp::domain::{IntDomain, IntDomainExt};
use crate::cp::engine::{CpBoolVar, CpEngine, CpIntVar};
use crate::error::Error;
use crate::IntVal;

index_vec::define_index_type! {
    /// Dense index of a Boolean variable in the registry.
    pub struct BoolVarId = u32;
}

index_vec::define_index_type! {
    /// Dense index of an integer variable in the registry.
    pub struct IntVarId = u32;
}

/// A registered Boolean variable: index 0 is the constant `false`, index 1 is
/// the constant `true`.
#[derive(Debug)]
struct BoolEntry {
    name: String,
    promoted: bool,
    mip: Option<MipVar>,
    cp: CpBoolVar,
    /// `Some(p)` when this entry is the negated alias of the positive
    /// variable `p`.
    neg_of: Option<BoolVarId>,
}

/// A registered integer variable: index 0 is the constant `0`.
#[derive(Debug)]
struct IntEntry {
    name: String,
    lb: IntVal,
    ub: IntVal,
    promoted: bool,
    mip: Option<MipVar>,
    cp: CpIntVar,
    indicators: Option<Vec<BoolVarId>>,
}

/// A MIP row recorded symbolically (by registry id) at constraint-build
/// time and replayed against concrete [`MipVar`] columns once
/// `crate::mip::materialize` has created them.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MipTerm {
    Bool(BoolVarId),
    Int(IntVarId),
}

#[derive(Debug, Clone)]
pub(crate) struct MipRow {
    pub(crate) terms: Vec<(MipTerm, f64)>,
    pub(crate) sign: crate::mip::Sign,
    pub(crate) rhs: f64,
}

/// The Variable Registry (C1): owns every Boolean and integer variable and
/// keeps their MIP and CP handles paired, as required by the data model's
/// "paired sizes" invariant.
#[derive(Debug)]
pub(crate) struct Registry {
    bools: IndexVec<BoolVarId, BoolEntry>,
    ints: IndexVec<IntVarId, IntEntry>,
    int_constants: HashMap<IntVal, IntVarId>,
    pub(crate) cp: CpEngine,
    pub(crate) false_var: BoolVarId,
    pub(crate) true_var: BoolVarId,
    pub(crate) zero_var: IntVarId,
    /// MIP rows recorded during the build phase, replayed at materialization.
    pub(crate) mip_rows: Vec<MipRow>,
    /// Reverse lookup from CP handles back to registry ids, used by the
    /// nogood builder (C5) to lift conflict atoms into MIP terms.
    bool_by_cp: HashMap<CpBoolVar, BoolVarId>,
    int_by_cp: HashMap<CpIntVar, IntVarId>,
    /// Binaries reifying a single bound atom (`x >= k` / `x <= k`) over a
    /// variable that already has its own MIP column, keyed so a repeated
    /// nogood atom reuses the same reification instead of growing the model.
    bound_reif_cache: HashMap<(IntVarId, bool, IntVal), BoolVarId>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut cp = CpEngine::default();
        let mut bools = IndexVec::new();
        let false_cp = cp.new_boolvar();
        let false_var = bools.push(BoolEntry {
            name: "false".to_owned(),
            promoted: false,
            mip: None,
            cp: false_cp,
            neg_of: None,
        });
        let true_cp = cp.new_boolvar();
        let true_var = bools.push(BoolEntry {
            name: "true".to_owned(),
            promoted: false,
            mip: None,
            cp: true_cp,
            neg_of: Some(false_var),
        });
        cp.post(Box::new(crate::cp::constraints::FixBool {
            lit: crate::cp::engine::Lit::neg(false_cp),
        }));
        cp.post(Box::new(crate::cp::constraints::FixBool {
            lit: crate::cp::engine::Lit::pos(true_cp),
        }));

        let mut ints = IndexVec::new();
        let zero_cp = cp.new_intvar((0..=0).into());
        let zero_var = ints.push(IntEntry {
            name: "zero".to_owned(),
            lb: 0,
            ub: 0,
            promoted: false,
            mip: None,
            cp: zero_cp,
            indicators: None,
        });
        let mut int_constants = HashMap::new();
        int_constants.insert(0, zero_var);

        let mut bool_by_cp = HashMap::new();
        bool_by_cp.insert(false_cp, false_var);
        bool_by_cp.insert(true_cp, true_var);
        let mut int_by_cp = HashMap::new();
        int_by_cp.insert(zero_cp, zero_var);

        Registry {
            bools,
            ints,
            int_constants,
            cp,
            false_var,
            true_var,
            zero_var,
            mip_rows: Vec::new(),
            bool_by_cp,
            int_by_cp,
            bound_reif_cache: HashMap::new(),
        }
    }
}

impl Registry {
    /// `add_bool_var`: append a fresh Boolean with a fresh CP literal. The
    /// MIP column is created lazily by [`Registry::promote_bool_to_mip`].
    pub(crate) fn new_bool(&mut self, name: impl Into<String>) -> BoolVarId {
        let cp = self.cp.new_boolvar();
        let id = self.bools.push(BoolEntry {
            name: name.into(),
            promoted: false,
            mip: None,
            cp,
            neg_of: None,
        });
        self.bool_by_cp.insert(cp, id);
        id
    }

    /// `new_int(lb, ub, include_in_mip, name)`. Returns the canonical id for
    /// constants (`lb == ub`).
    pub(crate) fn new_int(
        &mut self,
        lb: IntVal,
        ub: IntVal,
        include_in_mip: bool,
        name: impl Into<String>,
    ) -> Result<IntVarId, Error> {
        if lb > ub {
            return Err(Error::InvalidBounds { lb, ub });
        }
        if lb == ub {
            if let Some(&id) = self.int_constants.get(&lb) {
                return Ok(id);
            }
        }
        let cp = self.cp.new_intvar((lb..=ub).into());
        let id = self.ints.push(IntEntry {
            name: name.into(),
            lb,
            ub,
            promoted: include_in_mip,
            mip: None,
            cp,
            indicators: None,
        });
        self.int_by_cp.insert(cp, id);
        if lb == ub {
            self.int_constants.insert(lb, id);
        }
        Ok(id)
    }

    /// `negate`'s general case gives the alias the *same* underlying CP
    /// variable as its positive sibling (distinguished only by `Lit`
    /// polarity); the constant `true`/`false` pair instead gets two
    /// independently-fixed CP variables. Only the former shares a MIP
    /// column: `Some(pos)` when `var` is that kind of alias of `pos`.
    fn bool_shared_alias_of(&self, var: BoolVarId) -> Option<BoolVarId> {
        let pos = self.bools[var].neg_of?;
        (self.bools[pos].cp == self.bools[var].cp).then_some(pos)
    }

    /// `promote_to_mip`: mark that `var` needs a MIP column. Idempotent.
    ///
    /// A negated-alias id shares its positive sibling's underlying CP
    /// variable and is read back by inverting it, so it has no column of
    /// its own: promoting it promotes that positive sibling instead, and
    /// the sibling's id is returned.
    pub(crate) fn promote_bool_to_mip(&mut self, var: BoolVarId) -> BoolVarId {
        let canon = self.bool_shared_alias_of(var).unwrap_or(var);
        self.bools[canon].promoted = true;
        canon
    }

    /// Translate a (possibly negated-alias) Boolean `var` with nominal
    /// coefficient `coeff` into a MIP term over its canonical positive
    /// column, promoting that column. Since `term(not_b) = 1 - term(b)`,
    /// a negated `var` flips the coefficient's sign and returns the
    /// constant `coeff` as the second element, to be subtracted from the
    /// row's right-hand side by the caller.
    pub(crate) fn bool_mip_term(&mut self, var: BoolVarId, coeff: f64) -> ((MipTerm, f64), f64) {
        if self.bool_shared_alias_of(var).is_some() {
            let canon = self.promote_bool_to_mip(var);
            ((MipTerm::Bool(canon), -coeff), coeff)
        } else {
            let canon = self.promote_bool_to_mip(var);
            ((MipTerm::Bool(canon), coeff), 0.0)
        }
    }

    /// `promote_to_mip(I)`: mark that `var` needs a MIP column; if an
    /// indicator set already exists, every cached indicator is promoted
    /// first (so `materialize_mip` does not silently drop an unlinked
    /// `MipTerm::Bool` term) and the linking rows are recorded for replay at
    /// materialization.
    pub(crate) fn promote_int_to_mip(&mut self, var: IntVarId) -> IntVarId {
        if !self.ints[var].promoted {
            self.ints[var].promoted = true;
            if let Some(inds) = self.ints[var].indicators.clone() {
                for &b in &inds {
                    self.promote_bool_to_mip(b);
                }
                self.record_link_row(var, &inds);
            }
        }
        var
    }

    pub(crate) fn bool_is_promoted(&self, var: BoolVarId) -> bool {
        let canon = self.bool_shared_alias_of(var).unwrap_or(var);
        self.bools[canon].promoted
    }

    pub(crate) fn int_is_promoted(&self, var: IntVarId) -> bool {
        self.ints[var].promoted
    }

    /// Feed a CP-tightened bound back into the registered (and therefore
    /// future-materialized) bounds of `var`. Only ever tightens.
    pub(crate) fn tighten_registered_bounds(&mut self, var: IntVarId, lb: IntVal, ub: IntVal) {
        let entry = &mut self.ints[var];
        if lb > entry.lb {
            entry.lb = lb;
        }
        if ub < entry.ub {
            entry.ub = ub;
        }
    }

    /// Record both MIP sides of an indicator set's invariants: the linking
    /// equality `x = ∑k·I_x[k]` and the set-partition row `∑ I_x[k] = 1`
    /// (the MIP half of the exactly-one invariant the CP side enforces via
    /// `IndicatorLink` plus a `LinearInt` clause).
    fn record_link_row(&mut self, var: IntVarId, indicators: &[BoolVarId]) {
        let lb = self.ints[var].lb;
        let mut terms = vec![(MipTerm::Int(var), 1.0)];
        let mut partition = Vec::with_capacity(indicators.len());
        for (offset, &b) in indicators.iter().enumerate() {
            let k = lb + offset as IntVal;
            terms.push((MipTerm::Bool(b), -(k as f64)));
            partition.push((MipTerm::Bool(b), 1.0));
        }
        self.mip_rows.push(MipRow {
            terms,
            sign: crate::mip::Sign::Eq,
            rhs: 0.0,
        });
        self.mip_rows.push(MipRow {
            terms: partition,
            sign: crate::mip::Sign::Eq,
            rhs: 1.0,
        });
    }

    /// `indicator_vars(I, subdomain?)`: return the cached indicator set,
    /// building it lazily otherwise.
    pub(crate) fn indicator_vars(
        &mut self,
        var: IntVarId,
        subdomain: Option<&[IntVal]>,
    ) -> Vec<BoolVarId> {
        if let Some(existing) = &self.ints[var].indicators {
            return existing.clone();
        }
        let (lb, ub) = (self.ints[var].lb, self.ints[var].ub);
        let allowed: Option<std::collections::HashSet<IntVal>> =
            subdomain.map(|s| s.iter().copied().collect());
        let mut inds = Vec::new();
        for k in lb..=ub {
            let b = self.new_bool(format!("{}={}", self.ints[var].name, k));
            inds.push(b);
            let in_domain = allowed.as_ref().map(|s| s.contains(&k)).unwrap_or(true);
            if !in_domain {
                self.fix_bool_false(b);
            }
        }
        self.ints[var].indicators = Some(inds.clone());

        // Enforce the indicator-set invariants in CP by construction: the
        // linking propagator ties each `I_x[k]` to `x = k` bidirectionally,
        // and the exactly-one clause is just a unit-coefficient `LinearInt`.
        let cp_var = self.ints[var].cp;
        let lits: Vec<crate::cp::engine::Lit> =
            inds.iter().map(|&b| crate::cp::engine::Lit::pos(self.bools[b].cp)).collect();
        self.cp.post(Box::new(crate::cp::constraints::IndicatorLink {
            var: cp_var,
            lb,
            inds: lits.clone(),
        }));
        let one_hot_terms: Vec<(crate::cp::constraints::Term, IntVal)> =
            lits.iter().map(|&l| (crate::cp::constraints::Term::Bool(l), 1)).collect();
        self.cp.post(Box::new(crate::cp::constraints::LinearInt {
            terms: one_hot_terms,
            sign: crate::cp::constraints::Sign::Eq,
            rhs: 1,
        }));

        if self.ints[var].promoted {
            for &b in &inds {
                self.promote_bool_to_mip(b);
            }
            self.record_link_row(var, &inds);
        }
        trace!(int_var = ?var, count = inds.len(), "built indicator set");
        inds
    }

    /// Reify `x >= k` (`ge`) or `x <= k` (`!ge`) as a fresh MIP binary via
    /// the standard two-row big-M linking, used by the nogood builder's
    /// direct-column path so a bound atom over a variable that already has
    /// its own MIP column does not need a full one-hot indicator expansion.
    /// Cached by `(var, ge, k)` so a repeated atom does not grow the model.
    pub(crate) fn reify_bound(&mut self, var: IntVarId, ge: bool, k: IntVal) -> BoolVarId {
        let key = (var, ge, k);
        if let Some(&b) = self.bound_reif_cache.get(&key) {
            return b;
        }
        let (lb, ub) = (self.ints[var].lb, self.ints[var].ub);
        let m = (ub - lb + 1) as f64;
        let name = format!("{}_{}_{}", self.ints[var].name, if ge { "ge" } else { "le" }, k);
        let b = self.new_bool(name);
        self.promote_bool_to_mip(b);
        self.promote_int_to_mip(var);
        if ge {
            // z=1 => x>=k ; z=0 => x<=k-1.
            self.mip_rows.push(MipRow {
                terms: vec![(MipTerm::Int(var), 1.0), (MipTerm::Bool(b), -m)],
                sign: crate::mip::Sign::Ge,
                rhs: k as f64 - m,
            });
            self.mip_rows.push(MipRow {
                terms: vec![(MipTerm::Int(var), 1.0), (MipTerm::Bool(b), -m)],
                sign: crate::mip::Sign::Le,
                rhs: k as f64 - 1.0,
            });
        } else {
            // z=1 => x<=k ; z=0 => x>=k+1.
            self.mip_rows.push(MipRow {
                terms: vec![(MipTerm::Int(var), 1.0), (MipTerm::Bool(b), m)],
                sign: crate::mip::Sign::Le,
                rhs: k as f64 + m,
            });
            self.mip_rows.push(MipRow {
                terms: vec![(MipTerm::Int(var), 1.0), (MipTerm::Bool(b), -m)],
                sign: crate::mip::Sign::Ge,
                rhs: k as f64 + 1.0 - m,
            });
        }
        self.bound_reif_cache.insert(key, b);
        b
    }

    fn fix_bool_false(&mut self, b: BoolVarId) {
        let lit = crate::cp::engine::Lit::neg(self.bools[b].cp);
        self.cp.post(Box::new(crate::cp::constraints::FixBool { lit }));
    }

    /// `negate(B) → B'`.
    pub(crate) fn negate(&mut self, var: BoolVarId) -> BoolVarId {
        if let Some(pos) = self.bools[var].neg_of {
            return pos;
        }
        for (id, entry) in self.bools.iter_enumerated() {
            if entry.neg_of == Some(var) {
                return id;
            }
        }
        let cp = crate::cp::engine::Lit::pos(self.bools[var].cp).negated().var;
        self.bools.push(BoolEntry {
            name: format!("not_{}", self.bools[var].name),
            promoted: false,
            mip: None,
            cp,
            neg_of: Some(var),
        })
    }

    pub(crate) fn is_positive(&self, var: BoolVarId) -> bool {
        self.bools[var].neg_of.is_none()
    }

    pub(crate) fn bool_name(&self, var: BoolVarId) -> &str {
        &self.bools[var].name
    }

    pub(crate) fn int_name(&self, var: IntVarId) -> &str {
        &self.ints[var].name
    }

    pub(crate) fn bool_cp(&self, var: BoolVarId) -> CpBoolVar {
        self.bools[var].cp
    }

    pub(crate) fn int_cp(&self, var: IntVarId) -> CpIntVar {
        self.ints[var].cp
    }

    pub(crate) fn bool_mip(&self, var: BoolVarId) -> Option<MipVar> {
        self.bools[var].mip
    }

    pub(crate) fn int_mip(&self, var: IntVarId) -> Option<MipVar> {
        self.ints[var].mip
    }

    pub(crate) fn int_bounds(&self, var: IntVarId) -> (IntVal, IntVal) {
        (self.ints[var].lb, self.ints[var].ub)
    }

    pub(crate) fn int_indicators(&self, var: IntVarId) -> Option<&[BoolVarId]> {
        self.ints[var].indicators.as_deref()
    }

    pub(crate) fn nb_bool_vars(&self) -> usize {
        self.bools.len()
    }

    pub(crate) fn nb_int_vars(&self) -> usize {
        self.ints.len()
    }

    pub(crate) fn bool_ids(&self) -> impl Iterator<Item = BoolVarId> {
        (0..self.bools.len()).map(BoolVarId::from_usize)
    }

    pub(crate) fn int_ids(&self) -> impl Iterator<Item = IntVarId> {
        (0..self.ints.len()).map(IntVarId::from_usize)
    }

    pub(crate) fn cp_bool_domain(&self, var: BoolVarId) -> Option<bool> {
        self.cp.bool_val(self.bools[var].cp)
    }

    pub(crate) fn cp_int_domain(&self, var: IntVarId) -> &IntDomain {
        self.cp.int_domain(self.ints[var].cp)
    }

    /// The registry id of the (always-positive) Boolean variable backing a
    /// CP handle.
    pub(crate) fn bool_id_of(&self, cp: CpBoolVar) -> BoolVarId {
        self.bool_by_cp[&cp]
    }

    /// The registry id of the integer variable backing a CP handle.
    pub(crate) fn int_id_of(&self, cp: CpIntVar) -> IntVarId {
        self.int_by_cp[&cp]
    }

    /// Decode a solved MIP solution into a full [`crate::Solution`],
    /// falling back to the CP engine's current assignment for any variable
    /// that was never promoted to a MIP column.
    pub(crate) fn decode_solution(&self, sol: &microlp::Solution) -> crate::Solution {
        let mut bools = IndexVec::with_capacity(self.bools.len());
        for id in self.bool_ids() {
            let entry = &self.bools[id];
            let val = if let Some(mip) = entry.mip {
                sol.var_value(mip) != 0.0
            } else {
                let underlying = self.cp.bool_val(entry.cp).unwrap_or(false);
                if entry.neg_of.is_some() {
                    !underlying
                } else {
                    underlying
                }
            };
            bools.push(val);
        }
        let mut ints = IndexVec::with_capacity(self.ints.len());
        for id in self.int_ids() {
            let entry = &self.ints[id];
            let val = if let Some(mip) = entry.mip {
                sol.var_value(mip).round() as IntVal
            } else {
                self.cp.int_domain(entry.cp).lb()
            };
            ints.push(val);
        }
        crate::Solution { bools, ints }
    }

    /// Assign every promoted variable its concrete MIP column, giving
    /// `obj_var` objective coefficient `1.0` and everything else `0.0`, then
    /// replay every recorded row. Idempotent only in the sense that it is
    /// meant to run exactly once, immediately before a MIP-using solve.
    pub(crate) fn materialize_mip(&mut self, obj_var: IntVarId) -> microlp::Problem {
        let mut problem = crate::mip::new_problem();
        for id in self.bool_ids() {
            if self.bools[id].promoted {
                self.bools[id].mip = Some(problem.add_binary_var(0.0));
            }
        }
        for id in self.int_ids() {
            if self.ints[id].promoted {
                let (lb, ub) = (self.ints[id].lb, self.ints[id].ub);
                let coeff = if id == obj_var { 1.0 } else { 0.0 };
                self.ints[id].mip = Some(problem.add_integer_var(coeff, (lb as i32, ub as i32)));
            }
        }
        for row in self.mip_rows.clone() {
            let terms: Vec<(MipVar, f64)> = row
                .terms
                .iter()
                .filter_map(|(t, c)| {
                    let v = match *t {
                        MipTerm::Bool(b) => self.bools[b].mip,
                        MipTerm::Int(i) => self.ints[i].mip,
                    };
                    v.map(|v| (v, *c))
                })
                .collect();
            crate::mip::post_linear(&mut problem, &terms, row.sign, row.rhs);
        }
        problem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_deduplicated() {
        let mut r = Registry::default();
        let a = r.new_int(5, 5, false, "five").unwrap();
        let b = r.new_int(5, 5, false, "five-again").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn negation_is_involutive() {
        let mut r = Registry::default();
        let b = r.new_bool("b");
        let nb = r.negate(b);
        let nnb = r.negate(nb);
        assert_eq!(nnb, b);
        assert!(r.is_positive(b));
        assert!(!r.is_positive(nb));
    }

    #[test]
    fn invalid_bounds_rejected() {
        let mut r = Registry::default();
        assert!(matches!(
            r.new_int(5, 2, false, "bad"),
            Err(Error::InvalidBounds { lb: 5, ub: 2 })
        ));
    }
}
