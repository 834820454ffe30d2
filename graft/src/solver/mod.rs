//! The constraint solver.
//!
//! [`solve`] unifies a type against a pattern containing free type
//! variables, producing either a total substitution over the variables or a
//! set of contradictions. The algorithm:
//!
//! 1. **Seed**: walk both sides in lock-step. Wherever one side is a free
//!    variable, record a positional constraint (covariant position gives a
//!    lower bound, contravariant an upper bound, invariant an equality);
//!    wherever both sides are concrete, require subtyping and record a
//!    [`ConstraintError`] on failure.
//! 2. **Propagate**: a pair of constraints on one variable whose types
//!    mention other variables generates derived constraints on those
//!    variables, guarded against re-deriving through a variable already in
//!    the derivation set.
//! 3. **Fix** each variable in dependency order: a self-consistent equality
//!    wins; otherwise the join of the lower bounds or the meet of the upper
//!    bounds, whichever satisfies every recorded constraint; otherwise the
//!    universal top type plus a `NotEnoughInformation` error.

mod combine;

pub use combine::{common_super_type, intersect_types};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::types::{ClassifierId, ClassifierTable, Ty, TySubst, Variance};

/// How a constraint bounds its variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// The variable must be a supertype of the constraint type.
    Lower,
    /// The variable must be a subtype of the constraint type.
    Upper,
    /// The variable must equal the constraint type.
    Equal,
}

/// A single recorded bound on a free variable.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub ty: Ty,
    /// Variables this constraint was derived through; the cycle guard for
    /// propagation.
    pub derived_from: FxHashSet<ClassifierId>,
}

/// A contradiction found while solving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    /// Two concrete positions failed the subtype requirement.
    Mismatch { sub: Ty, sup: Ty },
    /// A variable could not be fixed from its constraints.
    NotEnoughInformation { param: ClassifierId },
}

impl ConstraintError {
    pub fn display(&self, table: &ClassifierTable) -> String {
        match self {
            ConstraintError::Mismatch { sub, sup } => format!(
                "`{}` is not a subtype of `{}`",
                sub.display(table),
                sup.display(table)
            ),
            ConstraintError::NotEnoughInformation { param } => format!(
                "not enough information to infer `{}`",
                table.names.resolve_fqn(table.classifier(*param).fqn)
            ),
        }
    }
}

/// Outcome of [`solve`]: a substitution total over the free variables plus
/// any contradictions found.
#[derive(Debug, Clone)]
pub struct TypeSolution {
    pub fixed: TySubst,
    pub errors: Vec<ConstraintError>,
}

impl TypeSolution {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Unify `sub <: pattern`, treating `free_vars` (minus `static_params`) as
/// free. Variables may occur on either side.
pub fn solve(
    table: &ClassifierTable,
    sub: &Ty,
    pattern: &Ty,
    free_vars: &[ClassifierId],
    static_params: &FxHashSet<ClassifierId>,
) -> TypeSolution {
    let free: FxHashSet<ClassifierId> = free_vars
        .iter()
        .copied()
        .filter(|v| !static_params.contains(v))
        .collect();
    let mut solver = Solver {
        table,
        free,
        constraints: FxHashMap::default(),
        errors: Vec::new(),
        derivation: FxHashSet::default(),
    };
    solver.require_subtype(sub, pattern);
    solver.propagate();
    let solution = solver.fix_all(free_vars, static_params);
    trace!(
        ok = solution.is_ok(),
        sub = %sub.display(table),
        pattern = %pattern.display(table),
        "solved constraint system"
    );
    solution
}

struct Solver<'t> {
    table: &'t ClassifierTable,
    free: FxHashSet<ClassifierId>,
    constraints: FxHashMap<ClassifierId, Vec<Constraint>>,
    errors: Vec<ConstraintError>,
    /// Derivation set for constraints currently being propagated.
    derivation: FxHashSet<ClassifierId>,
}

impl<'t> Solver<'t> {
    fn is_free(&self, ty: &Ty) -> bool {
        self.free.contains(&ty.classifier()) && !ty.is_star()
    }

    fn mentions_free(&self, ty: &Ty) -> bool {
        self.free.iter().any(|&v| ty.references(v))
    }

    fn add_constraint(&mut self, var: ClassifierId, kind: ConstraintKind, ty: Ty) {
        if self.derivation.contains(&var) {
            return;
        }
        let entry = self.constraints.entry(var).or_default();
        if entry.iter().any(|c| c.kind == kind && c.ty == ty) {
            return;
        }
        entry.push(Constraint {
            kind,
            ty,
            derived_from: self.derivation.clone(),
        });
    }

    /// Record everything needed for `left <: right` to hold.
    fn require_subtype(&mut self, left: &Ty, right: &Ty) {
        if left.is_star() || right.is_star() {
            return;
        }
        if self.is_free(right) {
            let ty = if right.nullable() && left.nullable() {
                left.with_nullable(false)
            } else {
                left.clone()
            };
            self.add_constraint(right.classifier(), ConstraintKind::Lower, ty);
            return;
        }
        if self.is_free(left) {
            if left.nullable() && !right.nullable() {
                self.errors.push(ConstraintError::Mismatch {
                    sub: left.clone(),
                    sup: right.clone(),
                });
                return;
            }
            self.add_constraint(left.classifier(), ConstraintKind::Upper, right.clone());
            return;
        }

        // Fully concrete subtree: plain subtype check.
        if !self.mentions_free(left) && !self.mentions_free(right) {
            if !left.is_sub_type_of(self.table, right) {
                self.errors.push(ConstraintError::Mismatch {
                    sub: left.clone(),
                    sup: right.clone(),
                });
            }
            return;
        }

        if left.classifier() == self.table.nothing {
            return;
        }
        if right.classifier() == self.table.any && right.tags().is_empty() {
            if left.nullable() && !right.nullable() {
                self.errors.push(ConstraintError::Mismatch {
                    sub: left.clone(),
                    sup: right.clone(),
                });
            }
            return;
        }

        // Expand aliases so variables inside expansions participate.
        if self.table.classifier(left.classifier()).is_type_alias() {
            let expanded = left.fully_expanded(self.table);
            self.require_subtype(&expanded, right);
            return;
        }
        if self.table.classifier(right.classifier()).is_type_alias() {
            let expanded = right.fully_expanded(self.table);
            self.require_subtype(left, &expanded);
            return;
        }

        let Some(view) = left.subtype_view(self.table, right.classifier()) else {
            self.errors.push(ConstraintError::Mismatch {
                sub: left.clone(),
                sup: right.clone(),
            });
            return;
        };
        if view.nullable() && !right.nullable() {
            self.errors.push(ConstraintError::Mismatch {
                sub: left.clone(),
                sup: right.clone(),
            });
            return;
        }
        let variances = &self.table.classifier(right.classifier()).variances;
        let pairs: Vec<(Ty, Ty, Variance)> = view
            .arguments()
            .iter()
            .zip(right.arguments())
            .zip(variances)
            .map(|((a, b), &declared)| {
                (a.clone(), b.clone(), effective(declared, b.variance()))
            })
            .collect();
        for (view_arg, right_arg, variance) in pairs {
            match variance {
                Variance::Out => self.require_subtype(&view_arg, &right_arg),
                Variance::In => self.require_subtype(&right_arg, &view_arg),
                Variance::Invariant => self.require_equal(&view_arg, &right_arg),
            }
        }
    }

    fn require_equal(&mut self, a: &Ty, b: &Ty) {
        if a.is_star() || b.is_star() {
            return;
        }
        if self.is_free(a) {
            let ty = if a.nullable() && b.nullable() {
                b.with_nullable(false)
            } else {
                b.clone()
            };
            self.add_constraint(a.classifier(), ConstraintKind::Equal, ty);
            return;
        }
        if self.is_free(b) {
            let ty = if b.nullable() && a.nullable() {
                a.with_nullable(false)
            } else {
                a.clone()
            };
            self.add_constraint(b.classifier(), ConstraintKind::Equal, ty);
            return;
        }
        if !self.mentions_free(a) && !self.mentions_free(b) {
            if a != b {
                self.errors.push(ConstraintError::Mismatch {
                    sub: a.clone(),
                    sup: b.clone(),
                });
            }
            return;
        }
        if a.classifier() == b.classifier() && a.nullable() == b.nullable() {
            let pairs: Vec<(Ty, Ty)> = a
                .arguments()
                .iter()
                .cloned()
                .zip(b.arguments().iter().cloned())
                .collect();
            for (arg_a, arg_b) in pairs {
                self.require_equal(&arg_a, &arg_b);
            }
            return;
        }
        self.errors.push(ConstraintError::Mismatch {
            sub: a.clone(),
            sup: b.clone(),
        });
    }

    /// Transitive closure: pairs of bounds on one variable whose types
    /// mention other variables derive constraints on those variables.
    fn propagate(&mut self) {
        const MAX_ROUNDS: usize = 8;
        for _ in 0..MAX_ROUNDS {
            let mut grew = false;
            let vars: Vec<ClassifierId> = self.constraints.keys().copied().collect();
            for var in vars {
                let snapshot = self.constraints.get(&var).cloned().unwrap_or_default();
                for (i, c1) in snapshot.iter().enumerate() {
                    for c2 in snapshot.iter().skip(i + 1) {
                        let (low, high) = match (c1.kind, c2.kind) {
                            (ConstraintKind::Lower, ConstraintKind::Upper)
                            | (ConstraintKind::Lower, ConstraintKind::Equal)
                            | (ConstraintKind::Equal, ConstraintKind::Upper)
                            | (ConstraintKind::Equal, ConstraintKind::Equal) => (c1, c2),
                            (ConstraintKind::Upper, ConstraintKind::Lower)
                            | (ConstraintKind::Equal, ConstraintKind::Lower)
                            | (ConstraintKind::Upper, ConstraintKind::Equal) => (c2, c1),
                            _ => continue,
                        };
                        let other_mentions_var = |c: &Constraint| {
                            self.free
                                .iter()
                                .any(|&v| v != var && c.ty.references(v))
                        };
                        if !other_mentions_var(low) && !other_mentions_var(high) {
                            continue;
                        }
                        let before = self.constraint_count();
                        self.derivation = low
                            .derived_from
                            .union(&high.derived_from)
                            .copied()
                            .chain(std::iter::once(var))
                            .collect();
                        let (low_ty, high_ty) = (low.ty.clone(), high.ty.clone());
                        self.require_subtype(&low_ty, &high_ty);
                        self.derivation.clear();
                        grew |= self.constraint_count() > before;
                    }
                }
            }
            if !grew {
                return;
            }
        }
    }

    fn constraint_count(&self) -> usize {
        self.constraints.values().map(Vec::len).sum()
    }

    fn fix_all(
        mut self,
        free_vars: &[ClassifierId],
        static_params: &FxHashSet<ClassifierId>,
    ) -> TypeSolution {
        let mut remaining: Vec<ClassifierId> = free_vars
            .iter()
            .copied()
            .filter(|v| !static_params.contains(v))
            .collect();
        let mut fixed = TySubst::default();

        while !remaining.is_empty() {
            // Variables depending only on already-fixed variables go first.
            let next_idx = remaining
                .iter()
                .position(|&var| {
                    self.constraints.get(&var).map_or(true, |cs| {
                        cs.iter().all(|c| {
                            remaining.iter().all(|&other| {
                                other == var || !c.ty.references(other)
                            })
                        })
                    })
                })
                .unwrap_or(0);
            let var = remaining.remove(next_idx);
            let ty = self.fix_var(var, &fixed, &remaining);
            fixed.insert(var, ty);
        }

        TypeSolution {
            fixed,
            errors: self.errors,
        }
    }

    fn fix_var(
        &mut self,
        var: ClassifierId,
        fixed: &TySubst,
        remaining: &[ClassifierId],
    ) -> Ty {
        let constraints: Vec<Constraint> = self
            .constraints
            .get(&var)
            .map(|cs| {
                cs.iter()
                    .map(|c| Constraint {
                        kind: c.kind,
                        ty: c.ty.substitute(fixed),
                        derived_from: c.derived_from.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let still_open =
            |ty: &Ty| remaining.iter().any(|&other| ty.references(other)) || ty.references(var);
        let usable: Vec<&Constraint> = constraints.iter().filter(|c| !still_open(&c.ty)).collect();

        let mut candidates: Vec<Ty> = Vec::new();
        for c in &usable {
            if c.kind == ConstraintKind::Equal {
                candidates.push(c.ty.clone());
            }
        }
        let lowers: Vec<Ty> = usable
            .iter()
            .filter(|c| c.kind == ConstraintKind::Lower)
            .map(|c| c.ty.clone())
            .collect();
        if !lowers.is_empty() {
            candidates.push(combine::common_super_type(self.table, &lowers));
        }
        let uppers: Vec<Ty> = usable
            .iter()
            .filter(|c| c.kind == ConstraintKind::Upper)
            .map(|c| c.ty.clone())
            .collect();
        if !uppers.is_empty() {
            candidates.push(combine::intersect_types(self.table, &uppers));
        }

        for candidate in candidates {
            let satisfies = usable.iter().all(|c| match c.kind {
                ConstraintKind::Lower => c.ty.is_sub_type_of(self.table, &candidate),
                ConstraintKind::Upper => candidate.is_sub_type_of(self.table, &c.ty),
                ConstraintKind::Equal => candidate == c.ty,
            });
            if satisfies {
                return candidate;
            }
        }

        self.errors
            .push(ConstraintError::NotEnoughInformation { param: var });
        self.table.nullable_any()
    }
}

fn effective(declared: Variance, use_site: Variance) -> Variance {
    if use_site != Variance::Invariant {
        use_site
    } else {
        declared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassifierDecl;

    struct World {
        table: ClassifierTable,
        animal: ClassifierId,
        cat: ClassifierId,
        string: ClassifierId,
        t: ClassifierId,
    }

    fn world() -> World {
        let mut table = ClassifierTable::new();
        let animal = table.add_classifier(ClassifierDecl::simple("zoo.Animal", "zoo"));
        let animal_ty = table.default_ty(animal);
        let cat = table.add_classifier(ClassifierDecl {
            supertypes: vec![animal_ty],
            ..ClassifierDecl::simple("zoo.Cat", "zoo")
        });
        let string = table.add_classifier(ClassifierDecl::simple("core.String", "core"));
        let any = table.nullable_any();
        let t = table.add_type_param("test.T", vec![any]);
        World { table, animal, cat, string, t }
    }

    fn no_statics() -> FxHashSet<ClassifierId> {
        FxHashSet::default()
    }

    // ============================================================
    // Seeding
    // ============================================================

    #[test]
    fn test_fix_from_invariant_position() {
        let w = world();
        // List is covariant, so use TypeKey for an invariant position.
        let sub = Ty::new(w.table.type_key, vec![w.table.default_ty(w.string)]);
        let pattern = Ty::new(w.table.type_key, vec![w.table.default_ty(w.t)]);
        let solution = solve(&w.table, &sub, &pattern, &[w.t], &no_statics());
        assert!(solution.is_ok());
        assert_eq!(solution.fixed[&w.t], w.table.default_ty(w.string));
    }

    #[test]
    fn test_fix_from_covariant_position() {
        let w = world();
        let sub = Ty::new(w.table.list, vec![w.table.default_ty(w.cat)]);
        let pattern = Ty::new(w.table.list, vec![w.table.default_ty(w.t)]);
        let solution = solve(&w.table, &sub, &pattern, &[w.t], &no_statics());
        assert!(solution.is_ok());
        assert_eq!(solution.fixed[&w.t], w.table.default_ty(w.cat));
    }

    #[test]
    fn test_top_level_variable() {
        let w = world();
        let sub = w.table.default_ty(w.cat);
        let pattern = w.table.default_ty(w.t);
        let solution = solve(&w.table, &sub, &pattern, &[w.t], &no_statics());
        assert!(solution.is_ok());
        assert_eq!(solution.fixed[&w.t], w.table.default_ty(w.cat));
    }

    #[test]
    fn test_variable_on_sub_side() {
        let w = world();
        // T <: Animal, fixed by the meet of its upper bounds.
        let sub = w.table.default_ty(w.t);
        let pattern = w.table.default_ty(w.animal);
        let solution = solve(&w.table, &sub, &pattern, &[w.t], &no_statics());
        assert!(solution.is_ok());
        assert_eq!(solution.fixed[&w.t], w.table.default_ty(w.animal));
    }

    #[test]
    fn test_concrete_mismatch_is_error() {
        let w = world();
        let sub = w.table.default_ty(w.string);
        let pattern = w.table.default_ty(w.cat);
        let solution = solve(&w.table, &sub, &pattern, &[], &no_statics());
        assert!(!solution.is_ok());
    }

    #[test]
    fn test_concrete_subtype_is_ok() {
        let w = world();
        let sub = w.table.default_ty(w.cat);
        let pattern = w.table.default_ty(w.animal);
        let solution = solve(&w.table, &sub, &pattern, &[], &no_statics());
        assert!(solution.is_ok());
    }

    // ============================================================
    // Fixing
    // ============================================================

    #[test]
    fn test_join_of_lower_bounds() {
        let mut w = world();
        let dog = w.table.add_classifier(ClassifierDecl {
            supertypes: vec![w.table.default_ty(w.animal)],
            ..ClassifierDecl::simple("zoo.Dog", "zoo")
        });
        // Function2 gives two contravariant positions for the same variable:
        // (T, T) <- (Cat, Dog) forces T to the join of Cat and Dog.
        let f2 = w.table.function(2);
        let unit = w.table.add_classifier(ClassifierDecl::simple("core.Unit", "core"));
        let unit_ty = w.table.default_ty(unit);
        let sub = Ty::new(
            f2,
            vec![
                w.table.default_ty(w.t),
                w.table.default_ty(w.t),
                unit_ty.clone(),
            ],
        );
        let pattern = Ty::new(
            f2,
            vec![
                w.table.default_ty(w.cat),
                w.table.default_ty(dog),
                unit_ty,
            ],
        );
        let solution = solve(&w.table, &sub, &pattern, &[w.t], &no_statics());
        assert!(solution.is_ok());
        assert_eq!(solution.fixed[&w.t], w.table.default_ty(w.animal));
    }

    #[test]
    fn test_unconstrained_variable_reports_error() {
        let w = world();
        let sub = w.table.default_ty(w.string);
        let pattern = w.table.default_ty(w.string);
        let solution = solve(&w.table, &sub, &pattern, &[w.t], &no_statics());
        assert!(!solution.is_ok());
        assert!(matches!(
            solution.errors[0],
            ConstraintError::NotEnoughInformation { param } if param == w.t
        ));
        // The substitution is still total over the free variables.
        assert!(solution.fixed.contains_key(&w.t));
    }

    #[test]
    fn test_static_params_are_opaque() {
        let w = world();
        let statics: FxHashSet<ClassifierId> = [w.t].into_iter().collect();
        let sub = w.table.default_ty(w.t);
        let pattern = w.table.default_ty(w.t);
        let solution = solve(&w.table, &sub, &pattern, &[w.t], &statics);
        assert!(solution.is_ok());
        assert!(solution.fixed.is_empty());
    }

    // ============================================================
    // Soundness: substituting the solution into the pattern yields a
    // supertype of the sub side.
    // ============================================================

    #[test]
    fn test_solution_soundness() {
        let w = world();
        let sub = Ty::new(w.table.list, vec![w.table.default_ty(w.cat)]);
        let pattern = Ty::new(w.table.list, vec![w.table.default_ty(w.t)]);
        let solution = solve(&w.table, &sub, &pattern, &[w.t], &no_statics());
        assert!(solution.is_ok());
        let instantiated = pattern.substitute(&solution.fixed);
        assert!(sub.is_sub_type_of(&w.table, &instantiated));
    }

    #[test]
    fn test_nullable_pattern_variable() {
        let w = world();
        let sub = w.table.default_ty(w.cat).with_nullable(true);
        let pattern = w.table.default_ty(w.t).with_nullable(true);
        let solution = solve(&w.table, &sub, &pattern, &[w.t], &no_statics());
        assert!(solution.is_ok());
        // T itself is fixed to the non-nullable form.
        assert_eq!(solution.fixed[&w.t], w.table.default_ty(w.cat));
        let instantiated = pattern.substitute(&solution.fixed);
        assert!(sub.is_sub_type_of(&w.table, &instantiated));
    }
}
