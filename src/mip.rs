//! Thin wrapper around the black-box MIP engine (`microlp`'s `Problem` /
//! `Solution`). `microlp` has no incremental re-solve that accepts a rebuilt
//! row set, so every nogood cut is folded into the row list up front and the
//! whole relaxation is resolved from scratch each outer-loop round.

use microlp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem, Solution, Variable};

use crate::error::Error;

/// Comparison used by a MIP row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sign {
    Eq,
    Le,
    Ge,
}

impl From<Sign> for ComparisonOp {
    fn from(s: Sign) -> Self {
        match s {
            Sign::Eq => ComparisonOp::Eq,
            Sign::Le => ComparisonOp::Le,
            Sign::Ge => ComparisonOp::Ge,
        }
    }
}

/// Coarse status of a MIP solve, folded onto the engine-wide [`crate::status::Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MipStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unknown,
}

/// Outcome of a MIP solve or incremental re-solve.
#[derive(Debug)]
pub(crate) struct MipOutcome {
    pub(crate) status: MipStatus,
    pub(crate) solution: Option<Solution>,
}

/// Construct a fresh problem minimizing its objective (§6's convention).
pub(crate) fn new_problem() -> Problem {
    Problem::new(OptimizationDirection::Minimize)
}

/// Post `∑ coeff * var sign rhs` as a MIP row. `terms` may repeat a
/// variable (a nogood cut over shared indicator variables commonly does);
/// coefficients are summed before handing the row to `microlp`, which
/// panics on a repeated variable otherwise.
pub(crate) fn post_linear(problem: &mut Problem, terms: &[(Variable, f64)], sign: Sign, rhs: f64) {
    let mut merged: std::collections::HashMap<usize, f64> = std::collections::HashMap::new();
    let mut order = Vec::new();
    for &(var, coeff) in terms {
        let entry = merged.entry(var.idx()).or_insert_with(|| {
            order.push(var);
            0.0
        });
        *entry += coeff;
    }
    let expr: LinearExpr = order.into_iter().map(|var| (var, merged[&var.idx()])).collect();
    problem.add_constraint(expr, sign.into(), rhs);
}

fn classify(outcome: microlp::SolveOutcome) -> MipOutcome {
    match outcome {
        microlp::SolveOutcome::Solution(sol) => {
            let status = match sol.status() {
                microlp::SolutionStatus::Optimal => MipStatus::Optimal,
                microlp::SolutionStatus::Feasible => MipStatus::Feasible,
            };
            MipOutcome {
                status,
                solution: Some(sol),
            }
        }
        microlp::SolveOutcome::Interrupted(_) => MipOutcome {
            status: MipStatus::Unknown,
            solution: None,
        },
    }
}

/// Solve `problem` from scratch.
pub(crate) fn solve(problem: &Problem) -> Result<MipOutcome, Error> {
    match problem.solve() {
        Ok(outcome) => Ok(classify(outcome)),
        Err(microlp::Error::Infeasible) => Ok(MipOutcome {
            status: MipStatus::Infeasible,
            solution: None,
        }),
        Err(e) => Err(Error::Subsolver(e.to_string())),
    }
}
