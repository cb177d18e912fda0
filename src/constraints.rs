//! Constraint Library (C2): each constructor posts a CP propagator and,
//! where the constraint has a faithful linear encoding, a symbolic MIP row,
//! promoting every participating variable to a MIP column as it does so.
//!
//! Every constructor returns `true` unless posting the constraint proved the
//! model infeasible at build time (a quick, local check — not a full solve),
//! matching the "feasibility side-check during construction" convention.

use crate::cp::constraints::{
    self as cpc, AllDifferent, Cumulative, ElementConst, ElementVar, Implication,
    ReifySubtractionLe, Term,
};
use crate::cp::engine::Lit;
use crate::error::Error;
use crate::registry::{BoolVarId, IntVarId, MipTerm};
use crate::{IntVal, Model};

/// The comparison operator of a linear or implication constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// `= rhs`.
    Eq,
    /// `<= rhs`.
    Le,
    /// `>= rhs`.
    Ge,
}

impl From<Sign> for cpc::Sign {
    fn from(s: Sign) -> Self {
        match s {
            Sign::Eq => cpc::Sign::Eq,
            Sign::Le => cpc::Sign::Le,
            Sign::Ge => cpc::Sign::Ge,
        }
    }
}

impl From<Sign> for crate::mip::Sign {
    fn from(s: Sign) -> Self {
        match s {
            Sign::Eq => crate::mip::Sign::Eq,
            Sign::Le => crate::mip::Sign::Le,
            Sign::Ge => crate::mip::Sign::Ge,
        }
    }
}

impl Model {
    fn check_consistent(&mut self) -> bool {
        if self.registry.cp.is_consistent() {
            true
        } else {
            self.mark_infeasible();
            false
        }
    }

    /// `add_constr_fix(b)`: assert `b` permanently. The MIP fix row is
    /// posted unconditionally, not just when `b` already has a column.
    pub fn add_constr_fix(&mut self, var: BoolVarId) -> bool {
        self.registry.cp.post(Box::new(cpc::FixBool { lit: self.bool_lit(var) }));
        let ((term, coeff), delta) = self.registry.bool_mip_term(var, 1.0);
        self.push_mip_row(vec![(term, coeff)], crate::mip::Sign::Eq, 1.0 - delta);
        self.check_consistent()
    }

    /// `add_constr_linear(vars, coeffs, sign, rhs)` over integer variables.
    pub fn add_constr_linear(
        &mut self,
        vars: &[IntVarId],
        coeffs: &[IntVal],
        sign: Sign,
        rhs: IntVal,
    ) -> Result<bool, Error> {
        if vars.len() != coeffs.len() {
            return Err(Error::CoefficientLengthMismatch { coeffs: coeffs.len(), vars: vars.len() });
        }
        let terms: Vec<(Term, IntVal)> = vars
            .iter()
            .zip(coeffs)
            .map(|(&v, &c)| (Term::Int(self.registry.int_cp(v)), c))
            .collect();
        self.registry.cp.post(Box::new(cpc::LinearInt {
            terms,
            sign: sign.into(),
            rhs,
        }));
        for &v in vars {
            self.registry.promote_int_to_mip(v);
        }
        let row: Vec<(MipTerm, f64)> = vars
            .iter()
            .zip(coeffs)
            .map(|(&v, &c)| (MipTerm::Int(v), c as f64))
            .collect();
        self.push_mip_row(row, sign.into(), rhs as f64);
        Ok(self.check_consistent())
    }

    /// `add_constr_linear_bool(vars, coeffs, sign, rhs)` over Boolean
    /// variables (coefficients multiply the 0/1 truth value), with an
    /// optional `+ c·y` integer right-hand term: `∑ᵢ cᵢ·bᵢ sign rhs + c·y`.
    pub fn add_constr_linear_bool(
        &mut self,
        vars: &[BoolVarId],
        coeffs: &[IntVal],
        sign: Sign,
        rhs: IntVal,
        rhs_term: Option<(IntVal, IntVarId)>,
    ) -> Result<bool, Error> {
        if vars.len() != coeffs.len() {
            return Err(Error::CoefficientLengthMismatch { coeffs: coeffs.len(), vars: vars.len() });
        }
        let mut terms: Vec<(Term, IntVal)> = vars
            .iter()
            .zip(coeffs)
            .map(|(&v, &c)| (Term::Bool(self.bool_lit(v)), c))
            .collect();
        if let Some((c, y)) = rhs_term {
            terms.push((Term::Int(self.registry.int_cp(y)), -c));
        }
        self.registry.cp.post(Box::new(cpc::LinearInt {
            terms,
            sign: sign.into(),
            rhs,
        }));
        let mut mip_rhs = rhs as f64;
        let mut row = Vec::with_capacity(vars.len() + 1);
        for (&v, &c) in vars.iter().zip(coeffs) {
            let ((term, coeff), delta) = self.registry.bool_mip_term(v, c as f64);
            row.push((term, coeff));
            mip_rhs -= delta;
        }
        if let Some((c, y)) = rhs_term {
            self.registry.promote_int_to_mip(y);
            row.push((MipTerm::Int(y), -(c as f64)));
        }
        self.push_mip_row(row, sign.into(), mip_rhs);
        Ok(self.check_consistent())
    }

    /// `add_constr_set_partition(vars)`: exactly one of `vars` holds.
    pub fn add_constr_set_partition(&mut self, vars: &[BoolVarId]) -> bool {
        let coeffs = vec![1; vars.len()];
        self.add_constr_linear_bool(vars, &coeffs, Sign::Eq, 1, None)
            .expect("vars and coeffs are built with equal length")
    }

    /// `add_constr_linear_indexed(vars, coeff_tables, sign, rhs)`: `∑ⱼ
    /// coeff_tables[j][xⱼ − lbⱼ] sign rhs` — each integer variable
    /// contributes its own per-value coefficient rather than a single
    /// constant multiplier. CP: one `IntCoeffElement` per variable maps its
    /// value to the matching coefficient into a fresh auxiliary CP integer
    /// variable, summed by a single `LinearInt`. MIP: indicator sets per
    /// variable, folded into one linear row.
    pub fn add_constr_linear_indexed(
        &mut self,
        vars: &[IntVarId],
        coeff_tables: &[Vec<IntVal>],
        sign: Sign,
        rhs: IntVal,
    ) -> Result<bool, Error> {
        if vars.len() != coeff_tables.len() {
            return Err(Error::CoefficientLengthMismatch { coeffs: coeff_tables.len(), vars: vars.len() });
        }
        let mut cp_terms = Vec::with_capacity(vars.len());
        let mut mip_terms: Vec<(MipTerm, f64)> = Vec::new();
        let mut mip_rhs = rhs as f64;
        for (&v, table) in vars.iter().zip(coeff_tables) {
            let (lb, ub) = self.registry.int_bounds(v);
            assert_eq!(
                table.len(),
                (ub - lb + 1) as usize,
                "coefficient table length must match domain size"
            );
            let min_c = *table.iter().min().unwrap();
            let max_c = *table.iter().max().unwrap();
            let out = self.registry.cp.new_intvar((min_c..=max_c).into());
            self.registry.cp.post(Box::new(cpc::IntCoeffElement {
                var: self.registry.int_cp(v),
                lb,
                coeffs: table.clone(),
                out,
            }));
            cp_terms.push((Term::Int(out), 1));

            let inds = self.registry.indicator_vars(v, None);
            for (offset, &b) in inds.iter().enumerate() {
                let ((term, coeff), delta) = self.registry.bool_mip_term(b, table[offset] as f64);
                mip_terms.push((term, coeff));
                mip_rhs -= delta;
            }
        }
        self.registry.cp.post(Box::new(cpc::LinearInt {
            terms: cp_terms,
            sign: sign.into(),
            rhs,
        }));
        self.push_mip_row(mip_terms, sign.into(), mip_rhs);
        Ok(self.check_consistent())
    }

    /// `add_constr_linear_neq(vars, coeffs, rhs)`: CP-only disequality (no
    /// faithful MIP linearization without a big-M indicator per variable).
    pub fn add_constr_linear_neq(
        &mut self,
        vars: &[IntVarId],
        coeffs: &[IntVal],
        rhs: IntVal,
    ) -> Result<bool, Error> {
        if vars.len() != coeffs.len() {
            return Err(Error::CoefficientLengthMismatch { coeffs: coeffs.len(), vars: vars.len() });
        }
        let terms: Vec<(Term, IntVal)> = vars
            .iter()
            .zip(coeffs)
            .map(|(&v, &c)| (Term::Int(self.registry.int_cp(v)), c))
            .collect();
        self.registry.cp.post(Box::new(cpc::LinearInt {
            terms,
            sign: cpc::Sign::Ne,
            rhs,
        }));
        Ok(self.check_consistent())
    }

    /// `add_constr_alldifferent(vars)`. MIP side: a set-packing row `∑ᵢ
    /// [vᵢ=k] <= 1` for each value `k` in the envelope `[min lb, max ub]`.
    pub fn add_constr_alldifferent(&mut self, vars: &[IntVarId]) -> bool {
        let cp_vars = vars.iter().map(|&v| self.registry.int_cp(v)).collect();
        self.registry.cp.post(Box::new(AllDifferent { vars: cp_vars }));

        if !vars.is_empty() {
            let bounds: Vec<(IntVal, IntVal)> = vars.iter().map(|&v| self.registry.int_bounds(v)).collect();
            let envelope_lo = bounds.iter().map(|&(lb, _)| lb).min().unwrap();
            let envelope_hi = bounds.iter().map(|&(_, ub)| ub).max().unwrap();
            let per_var_inds: Vec<Vec<BoolVarId>> =
                vars.iter().map(|&v| self.registry.indicator_vars(v, None)).collect();
            for k in envelope_lo..=envelope_hi {
                let mut row = Vec::new();
                for (i, &(lb, ub)) in bounds.iter().enumerate() {
                    if k < lb || k > ub {
                        continue;
                    }
                    let b = per_var_inds[i][(k - lb) as usize];
                    let ((term, coeff), _delta) = self.registry.bool_mip_term(b, 1.0);
                    row.push((term, coeff));
                }
                if !row.is_empty() {
                    self.push_mip_row(row, crate::mip::Sign::Le, 1.0);
                }
            }
        }
        self.check_consistent()
    }

    /// `add_constr_element(idx, array, val)` for a constant `array`. The MIP
    /// side is only added when both `idx` and `val` already carry a MIP
    /// column — it is not forced, since an index/value pair used purely for
    /// CP-side lookups has no reason to grow the relaxation.
    pub fn add_constr_element_const(&mut self, idx: IntVarId, array: &[IntVal], val: IntVarId) -> bool {
        self.registry.cp.post(Box::new(ElementConst {
            idx: self.registry.int_cp(idx),
            array: array.to_vec(),
            val: self.registry.int_cp(val),
        }));

        if self.registry.int_mip(idx).is_some() && self.registry.int_mip(val).is_some() {
            self.push_mip_row(vec![(MipTerm::Int(idx), 1.0)], crate::mip::Sign::Ge, 1.0);
            self.push_mip_row(
                vec![(MipTerm::Int(idx), 1.0)],
                crate::mip::Sign::Le,
                array.len() as f64,
            );
            let (idx_lb, idx_ub) = self.registry.int_bounds(idx);
            let (val_lb, val_ub) = self.registry.int_bounds(val);
            let m = (val_ub - val_lb).max(1) as f64;
            let inds = self.registry.indicator_vars(idx, None);
            for k in 1..=(array.len() as IntVal) {
                if k < idx_lb || k > idx_ub {
                    continue;
                }
                let b = inds[(k - idx_lb) as usize];
                self.registry.promote_bool_to_mip(b);
                let av = array[(k - 1) as usize] as f64;
                // `idx = k` pins `val` to `array[k-1]`; outside that case
                // the pair of big-M rows is vacuous.
                self.push_mip_row(
                    vec![(MipTerm::Int(val), 1.0), (MipTerm::Bool(b), m)],
                    crate::mip::Sign::Le,
                    av + m,
                );
                self.push_mip_row(
                    vec![(MipTerm::Int(val), 1.0), (MipTerm::Bool(b), -m)],
                    crate::mip::Sign::Ge,
                    av - m,
                );
            }
        }
        self.check_consistent()
    }

    /// `add_constr_element(idx, array, val)` for a variable `array`.
    pub fn add_constr_element_var(&mut self, idx: IntVarId, array: &[IntVarId], val: IntVarId) -> bool {
        let cp_array = array.iter().map(|&v| self.registry.int_cp(v)).collect();
        self.registry.cp.post(Box::new(ElementVar {
            idx: self.registry.int_cp(idx),
            array: cp_array,
            val: self.registry.int_cp(val),
        }));
        self.check_consistent()
    }

    /// `add_constr_cumulative(start, duration, resource, capacity)`.
    pub fn add_constr_cumulative(
        &mut self,
        start: &[IntVarId],
        duration: &[IntVal],
        resource: &[IntVal],
        capacity: IntVal,
    ) -> bool {
        let cp_start = start.iter().map(|&v| self.registry.int_cp(v)).collect();
        self.registry.cp.post(Box::new(Cumulative {
            start: cp_start,
            duration: duration.to_vec(),
            resource: resource.to_vec(),
            capacity,
            active: None,
        }));
        self.post_cumulative_mip(start, duration, resource, capacity, None);
        self.check_consistent()
    }

    /// `add_constr_cumulative_optional(start, duration, resource, capacity, active)`:
    /// each task only consumes resource while its `active` literal holds.
    pub fn add_constr_cumulative_optional(
        &mut self,
        start: &[IntVarId],
        duration: &[IntVal],
        resource: &[IntVal],
        capacity: IntVal,
        active: &[BoolVarId],
    ) -> bool {
        let cp_start = start.iter().map(|&v| self.registry.int_cp(v)).collect();
        let lits = active.iter().map(|&b| self.bool_lit(b)).collect();
        self.registry.cp.post(Box::new(Cumulative {
            start: cp_start,
            duration: duration.to_vec(),
            resource: resource.to_vec(),
            capacity,
            active: Some(lits),
        }));
        self.post_cumulative_mip(start, duration, resource, capacity, Some(active));
        self.check_consistent()
    }

    /// MIP side of cumulative: time-indexed knapsack rows `∑ᵢ rᵢ·[task i
    /// occupies t] <= capacity` for every time `t` in the envelope. For the
    /// optional variant, each task's per-time occupancy indicator is
    /// AND-gated with its activity literal through a private auxiliary
    /// binary (`post_and_gate`), since neither big-M row alone can express a
    /// product of two Booleans.
    ///
    /// The capacity-makespan relaxation (`∑ rᵢdᵢ·activeᵢ <= capacity ·
    /// makespan`) from the value-indexed constraint family is not built
    /// here: this signature has no makespan variable to relate it to (see
    /// DESIGN.md).
    fn post_cumulative_mip(
        &mut self,
        start: &[IntVarId],
        duration: &[IntVal],
        resource: &[IntVal],
        capacity: IntVal,
        active: Option<&[BoolVarId]>,
    ) {
        if start.is_empty() {
            return;
        }
        for &s in start {
            self.registry.promote_int_to_mip(s);
        }
        let bounds: Vec<(IntVal, IntVal)> = start.iter().map(|&s| self.registry.int_bounds(s)).collect();
        let envelope_lo = bounds.iter().map(|&(lb, _)| lb).min().unwrap();
        let envelope_hi = bounds
            .iter()
            .zip(duration)
            .map(|(&(_, ub), &d)| ub + d)
            .max()
            .unwrap();

        // Per task, per start value `u`: the (possibly AND-gated) MIP term
        // contributing while the task occupies time `u..u+d`.
        let mut occupancy: Vec<Vec<(IntVal, (MipTerm, f64))>> = Vec::with_capacity(start.len());
        for (i, &s) in start.iter().enumerate() {
            let (lb, _) = bounds[i];
            let inds = self.registry.indicator_vars(s, None);
            let mut terms = Vec::with_capacity(inds.len());
            for (offset, &b) in inds.iter().enumerate() {
                let u = lb + offset as IntVal;
                let gated = match active {
                    None => {
                        let ((term, coeff), _) = self.registry.bool_mip_term(b, 1.0);
                        (term, coeff)
                    }
                    Some(acts) => {
                        let z = self.post_and_gate(acts[i], b);
                        let ((term, coeff), _) = self.registry.bool_mip_term(z, 1.0);
                        (term, coeff)
                    }
                };
                terms.push((u, gated));
            }
            occupancy.push(terms);
        }

        for t in envelope_lo..envelope_hi {
            let mut row = Vec::new();
            for (i, terms) in occupancy.iter().enumerate() {
                for &(u, (term, coeff)) in terms {
                    if u <= t && t < u + duration[i] {
                        row.push((term, coeff * resource[i] as f64));
                    }
                }
            }
            if !row.is_empty() {
                self.push_mip_row(row, crate::mip::Sign::Le, capacity as f64);
            }
        }
    }

    /// Standard AND-linearization of `active ∧ ind` as a fresh private
    /// binary `z` (`z <= active`, `z <= ind`, `z >= active + ind - 1`), used
    /// to gate an optional task's per-time knapsack contribution by its
    /// activity literal.
    fn post_and_gate(&mut self, active: BoolVarId, ind: BoolVarId) -> BoolVarId {
        let z = self.registry.new_bool("cumulative_and_gate");
        self.registry.promote_bool_to_mip(z);
        let ((z_term, z_coeff), _) = self.registry.bool_mip_term(z, 1.0);
        let ((a_term, a_coeff), a_delta) = self.registry.bool_mip_term(active, 1.0);
        let ((i_term, i_coeff), i_delta) = self.registry.bool_mip_term(ind, 1.0);
        self.push_mip_row(
            vec![(z_term, z_coeff), (a_term, -a_coeff)],
            crate::mip::Sign::Le,
            a_delta,
        );
        self.push_mip_row(
            vec![(z_term, z_coeff), (i_term, -i_coeff)],
            crate::mip::Sign::Le,
            i_delta,
        );
        self.push_mip_row(
            vec![(z_term, z_coeff), (a_term, -a_coeff), (i_term, -i_coeff)],
            crate::mip::Sign::Ge,
            a_delta + i_delta - 1.0,
        );
        z
    }

    /// `add_constr_subtraction_leq(x, y, k)`: unconditional `x - y <= k`.
    pub fn add_constr_subtraction_leq(&mut self, x: IntVarId, y: IntVarId, k: IntVal) -> bool {
        let t = self.get_true();
        self.add_constr_reify_subtraction_leq(t, x, y, k)
    }

    /// `add_constr_reify_subtraction_leq(r, x, y, k)`: `r → x - y <= k`. MIP
    /// side: a single indicator-conditional row via the standard big-M
    /// linking, `x - y + M*value(r) <= k + M`.
    pub fn add_constr_reify_subtraction_leq(
        &mut self,
        r: BoolVarId,
        x: IntVarId,
        y: IntVarId,
        k: IntVal,
    ) -> bool {
        let (r_lit, positive) = self.resolve_literal(r);
        self.registry.cp.post(Box::new(ReifySubtractionLe {
            r: if positive { r_lit } else { r_lit.negated() },
            x: self.registry.int_cp(x),
            y: self.registry.int_cp(y),
            k,
        }));

        self.registry.promote_int_to_mip(x);
        self.registry.promote_int_to_mip(y);
        let (x_ub, _) = self.registry.int_bounds(x);
        let (_, y_lb) = self.registry.int_bounds(y);
        let m = ((x_ub - y_lb) - k).max(0) as f64 + 1.0;
        let ((r_term, r_coeff), r_delta) = self.registry.bool_mip_term(r, 1.0);
        self.push_mip_row(
            vec![(MipTerm::Int(x), 1.0), (MipTerm::Int(y), -1.0), (r_term, m * r_coeff)],
            crate::mip::Sign::Le,
            k as f64 + m - m * r_delta,
        );
        self.check_consistent()
    }

    /// `add_constr_imply(r, x, sign, x_val)`: `r → (x sign x_val)`. MIP
    /// side: one indicator-conditional row (two for `Eq`) via the same
    /// big-M linking as the reified-subtraction case.
    pub fn add_constr_imply(&mut self, r: BoolVarId, x: IntVarId, sign: Sign, x_val: IntVal) -> bool {
        let (r_lit, positive) = self.resolve_literal(r);
        self.registry.cp.post(Box::new(Implication {
            r: if positive { r_lit } else { r_lit.negated() },
            x: self.registry.int_cp(x),
            sign: sign.into(),
            x_val,
        }));

        self.registry.promote_int_to_mip(x);
        let (lb, ub) = self.registry.int_bounds(x);
        let ((r_term, r_coeff), r_delta) = self.registry.bool_mip_term(r, 1.0);
        match sign {
            Sign::Le => {
                let m = (ub - x_val).max(0) as f64;
                self.push_mip_row(
                    vec![(MipTerm::Int(x), 1.0), (r_term, m * r_coeff)],
                    crate::mip::Sign::Le,
                    x_val as f64 + m - m * r_delta,
                );
            }
            Sign::Ge => {
                let m = (x_val - lb).max(0) as f64;
                self.push_mip_row(
                    vec![(MipTerm::Int(x), 1.0), (r_term, -m * r_coeff)],
                    crate::mip::Sign::Ge,
                    x_val as f64 - m + m * r_delta,
                );
            }
            Sign::Eq => {
                let m_le = (ub - x_val).max(0) as f64;
                let m_ge = (x_val - lb).max(0) as f64;
                self.push_mip_row(
                    vec![(MipTerm::Int(x), 1.0), (r_term, m_le * r_coeff)],
                    crate::mip::Sign::Le,
                    x_val as f64 + m_le - m_le * r_delta,
                );
                self.push_mip_row(
                    vec![(MipTerm::Int(x), 1.0), (r_term, -m_ge * r_coeff)],
                    crate::mip::Sign::Ge,
                    x_val as f64 - m_ge + m_ge * r_delta,
                );
            }
        }
        self.check_consistent()
    }

    /// Resolve a (possibly negated-alias) Boolean id to its underlying
    /// positive CP literal plus whether `var` itself is the positive side.
    fn resolve_literal(&self, var: BoolVarId) -> (Lit, bool) {
        (Lit::pos(self.registry.bool_cp(var)), self.registry.is_positive(var))
    }

    /// `var`'s own CP literal, polarity already resolved.
    fn bool_lit(&self, var: BoolVarId) -> Lit {
        let (lit, positive) = self.resolve_literal(var);
        if positive {
            lit
        } else {
            lit.negated()
        }
    }

    pub(crate) fn push_mip_row(&mut self, terms: Vec<(MipTerm, f64)>, sign: crate::mip::Sign, rhs: f64) {
        self.registry.mip_rows.push(crate::registry::MipRow { terms, sign, rhs });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Method;

    #[test]
    fn fixing_false_constant_is_infeasible() {
        let mut m = Model::new(Method::Bc);
        let f = m.get_false();
        assert!(!m.add_constr_fix(f));
        assert!(m.is_build_infeasible());
    }

    #[test]
    fn set_partition_forces_remaining_bool() {
        let mut m = Model::new(Method::Bc);
        let a = m.add_bool_var("a");
        let b = m.add_bool_var("b");
        let c = m.add_bool_var("c");
        assert!(m.add_constr_set_partition(&[a, b, c]));
        let not_a = m.get_neg(a);
        let not_b = m.get_neg(b);
        assert!(m.add_constr_fix(not_a));
        assert!(m.add_constr_fix(not_b));
        assert_eq!(m.registry.cp_bool_domain(c), Some(true));
    }

    #[test]
    fn alldifferent_over_two_values_is_infeasible() {
        let mut m = Model::new(Method::Bc);
        let x = m.add_int_var(1, 2, true, "x").unwrap();
        let y = m.add_int_var(1, 2, true, "y").unwrap();
        let z = m.add_int_var(1, 2, true, "z").unwrap();
        assert!(m.add_constr_alldifferent(&[x, y, z]));
        // Fixing x forces the other two down to the one remaining value,
        // which alldifferent's forward-checking catches as soon as both
        // collapse to the same singleton.
        assert!(!m.add_constr_linear(&[x], &[1], Sign::Eq, 1).unwrap());
    }
}
