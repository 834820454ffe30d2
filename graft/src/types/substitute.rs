//! Copy-on-substitute over type trees.
//!
//! Substitution never mutates a node: untouched substructure is shared and
//! a new node is built only along paths that actually change.

use rustc_hash::FxHashMap;

use super::{ClassifierId, Ty};

/// A substitution from type-parameter classifiers to types.
pub type TySubst = FxHashMap<ClassifierId, Ty>;

impl Ty {
    /// Apply a substitution, producing a new type sharing unchanged parts.
    ///
    /// When this node itself is a substituted type parameter, the
    /// replacement inherits this node's nullability (a nullable use of a
    /// parameter stays nullable) and accumulates this node's tags in front
    /// of its own.
    pub fn substitute(&self, subst: &TySubst) -> Ty {
        if subst.is_empty() {
            return self.clone();
        }
        if let Some(replacement) = subst.get(&self.classifier()) {
            let mut out = replacement.clone();
            if self.nullable() && !out.nullable() {
                out = out.with_nullable(true);
            }
            if !self.tags().is_empty() {
                let mut tags: Vec<Ty> = self.tags().to_vec();
                for tag in out.tags() {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
                out = out.with_tags(tags);
            }
            if self.variance() != super::Variance::Invariant
                && out.variance() == super::Variance::Invariant
            {
                out = out.with_variance(self.variance());
            }
            return out;
        }

        let mut changed = false;
        let arguments: Vec<Ty> = self
            .arguments()
            .iter()
            .map(|arg| {
                let new = arg.substitute(subst);
                changed |= !Ty::same_node(&new, arg);
                new
            })
            .collect();
        let tags: Vec<Ty> = self
            .tags()
            .iter()
            .map(|tag| {
                let new = tag.substitute(subst);
                changed |= !Ty::same_node(&new, tag);
                new
            })
            .collect();
        if !changed {
            return self.clone();
        }
        self.with_arguments(arguments).with_tags(tags)
    }

    fn same_node(a: &Ty, b: &Ty) -> bool {
        std::rc::Rc::ptr_eq(&a.0, &b.0)
    }
}
