//! Model dump (§10): writes the materialized MIP relaxation as a plain-text
//! LP listing, the Rust-side counterpart to the original's commented-out
//! `SCIPwriteOrigProblem` debugging hook.

use std::io::Write;
use std::path::Path;

use crate::registry::{IntVarId, MipTerm};
use crate::Model;

impl Model {
    /// `write_lp(path)`: dump the current MIP rows (constant objective, since
    /// no objective has necessarily been chosen yet) to `path` as an LP-format
    /// text listing. Intended for debugging a model under construction, not
    /// as a machine-readable interchange format.
    pub fn write_lp(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let mut f = std::fs::File::create(path)?;
        writeln!(f, "\\ bendercp model dump")?;
        writeln!(f, "\\ {} bool vars, {} int vars, {} rows", self.registry.nb_bool_vars(), self.registry.nb_int_vars(), self.registry.mip_rows.len())?;
        writeln!(f, "Subject To")?;
        for (i, row) in self.registry.mip_rows.iter().enumerate() {
            write!(f, " r{i}: ")?;
            for (term, coeff) in &row.terms {
                write!(f, "{:+} {} ", coeff, term_name(&self.registry, *term))?;
            }
            let op = match row.sign {
                crate::mip::Sign::Eq => "=",
                crate::mip::Sign::Le => "<=",
                crate::mip::Sign::Ge => ">=",
            };
            writeln!(f, "{op} {}", row.rhs)?;
        }
        writeln!(f, "Bounds")?;
        for id in self.registry.int_ids() {
            let (lb, ub) = self.registry.int_bounds(id);
            writeln!(f, " {lb} <= {} <= {ub}", self.registry.int_name(id))?;
            if let Some(inds) = self.registry.int_indicators(id) {
                let names: Vec<&str> = inds.iter().map(|&b| self.registry.bool_name(b)).collect();
                writeln!(f, "\\   indicators: {}", names.join(", "))?;
            }
        }
        writeln!(f, "End")?;
        Ok(())
    }
}

fn term_name(registry: &crate::registry::Registry, term: MipTerm) -> String {
    match term {
        MipTerm::Bool(b) => registry.bool_name(b).to_owned(),
        MipTerm::Int(i) => int_name(registry, i),
    }
}

fn int_name(registry: &crate::registry::Registry, id: IntVarId) -> String {
    registry.int_name(id).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Method;

    #[test]
    fn write_lp_produces_a_file() {
        let mut m = Model::new(Method::Bc);
        let x = m.add_int_var(0, 5, true, "x").unwrap();
        assert!(m.add_constr_linear(&[x], &[1], crate::constraints::Sign::Ge, 1).unwrap());
        let path = std::env::temp_dir().join("bendercp_write_lp_test.lp");
        m.write_lp(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Subject To"));
        let _ = std::fs::remove_file(&path);
    }
}
