//! Structural subtyping with declared variance.
//!
//! Subtyping order:
//! 1. `Nothing` is a subtype of everything; nullable `Any` is a supertype
//!    of everything.
//! 2. Identical classifiers compare nullability, tags elementwise, then
//!    arguments per declared variance.
//! 3. Otherwise the subtype side is viewed through its supertype DAG
//!    ([`Ty::subtype_view`]), expanding type aliases and unwrapping tags
//!    first. Type aliases are transparent for assignability but distinct
//!    for identity.
//! 4. Type parameters with no matching classifier path fall back to their
//!    upper bounds.

use super::{ClassifierId, ClassifierTable, Ty, TySubst, Variance};

impl Ty {
    /// Variance-aware structural subtyping.
    pub fn is_sub_type_of(&self, table: &ClassifierTable, other: &Ty) -> bool {
        if self == other {
            return true;
        }
        if other.is_star() {
            return true;
        }
        // Bottom type.
        if self.classifier() == table.nothing {
            return true;
        }
        // Top type: Any? over everything, Any over non-nullable types.
        if other.classifier() == table.any && other.tags().is_empty() {
            return other.nullable() || !self.nullable();
        }

        if self.classifier() == other.classifier() {
            if self.nullable() && !other.nullable() {
                return false;
            }
            if !tags_match(self, other) {
                return false;
            }
            return arguments_conform(table, self, other);
        }

        // Transparent alias expansion, assignability only.
        if table.classifier(self.classifier()).is_type_alias() {
            return self.fully_expanded(table).is_sub_type_of(table, other);
        }
        if table.classifier(other.classifier()).is_type_alias() {
            return self.is_sub_type_of(table, &other.fully_expanded(table));
        }

        if let Some(view) = self.subtype_view(table, other.classifier()) {
            if view.nullable() && !other.nullable() {
                return false;
            }
            if !tags_match(&view, other) {
                return false;
            }
            return arguments_conform(table, &view, other);
        }

        // A type parameter is a subtype of whatever its upper bounds are.
        if table.classifier(self.classifier()).is_type_parameter() {
            return table
                .classifier(self.classifier())
                .supertypes
                .iter()
                .any(|bound| {
                    let bound = if self.nullable() {
                        bound.with_nullable(true)
                    } else {
                        bound.clone()
                    };
                    bound.is_sub_type_of(table, other)
                });
        }

        false
    }

    /// The instantiation of `classifier` this type is viewable as, following
    /// tag-unwrap and type-alias-expansion chains first, then the declared
    /// supertype DAG. Nullability of the receiver is carried into the view.
    pub fn subtype_view(&self, table: &ClassifierTable, classifier: ClassifierId) -> Option<Ty> {
        if self.classifier() == classifier {
            return Some(self.clone());
        }
        let own = table.classifier(self.classifier());
        if own.is_type_alias() {
            return self.fully_expanded(table).subtype_view(table, classifier);
        }
        let subst = self.own_substitution(table);
        for supertype in &own.supertypes {
            let instantiated = supertype.substitute(&subst);
            let instantiated = if self.nullable() {
                instantiated.with_nullable(true)
            } else {
                instantiated
            };
            if let Some(view) = instantiated.subtype_view(table, classifier) {
                return Some(view);
            }
        }
        None
    }

    /// Expand type-alias chains to the underlying type, preserving
    /// nullability and tags of the alias use.
    pub fn fully_expanded(&self, table: &ClassifierTable) -> Ty {
        let mut current = self.clone();
        while table.classifier(current.classifier()).is_type_alias() {
            let own = table.classifier(current.classifier());
            let Some(expansion) = own.supertypes.first() else {
                break;
            };
            let subst = current.own_substitution(table);
            let mut expanded = expansion.substitute(&subst);
            if current.nullable() {
                expanded = expanded.with_nullable(true);
            }
            if !current.tags().is_empty() {
                let mut tags = current.tags().to_vec();
                for tag in expanded.tags() {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
                expanded = expanded.with_tags(tags);
            }
            current = expanded;
        }
        current
    }

    /// Substitution mapping this type's declared parameters to its actual
    /// arguments.
    pub fn own_substitution(&self, table: &ClassifierTable) -> TySubst {
        let params = &table.classifier(self.classifier()).type_params;
        let mut subst = TySubst::default();
        for (&param, arg) in params.iter().zip(self.arguments()) {
            subst.insert(param, arg.clone());
        }
        subst
    }
}

fn tags_match(sub: &Ty, sup: &Ty) -> bool {
    sub.tags().len() == sup.tags().len()
        && sub.tags().iter().zip(sup.tags()).all(|(a, b)| a == b)
}

fn arguments_conform(table: &ClassifierTable, sub: &Ty, sup: &Ty) -> bool {
    let variances = &table.classifier(sup.classifier()).variances;
    sub.arguments()
        .iter()
        .zip(sup.arguments())
        .zip(variances)
        .all(|((sub_arg, sup_arg), &declared)| {
            if sup_arg.is_star() {
                return true;
            }
            match effective_variance(declared, sup_arg.variance()) {
                Variance::Out => sub_arg.is_sub_type_of(table, sup_arg),
                Variance::In => sup_arg.is_sub_type_of(table, sub_arg),
                Variance::Invariant => sub_arg == sup_arg,
            }
        })
}

/// Use-site projection wins over declaration-site variance.
pub(crate) fn effective_variance(declared: Variance, use_site: Variance) -> Variance {
    if use_site != Variance::Invariant {
        use_site
    } else {
        declared
    }
}
