//! Common-supertype (join) and intersection (meet) of type sets.
//!
//! Both are structural recursions over the classifier supertype DAG:
//! dedupe identical types, drop types covered by another candidate, then
//! combine per argument according to declared variance. Recursion is
//! bounded by a depth counter so recursive generic structures terminate.

use crate::types::{ClassifierId, ClassifierTable, Ty, Variance};

/// Bound on nested argument combination.
const MAX_DEPTH: u32 = 8;

/// The most specific common supertype of `types`.
pub fn common_super_type(table: &ClassifierTable, types: &[Ty]) -> Ty {
    join(table, types, 0)
}

/// The intersection (meet) of `types`; `Nothing` when they are disjoint.
pub fn intersect_types(table: &ClassifierTable, types: &[Ty]) -> Ty {
    meet(table, types, 0)
}

fn join(table: &ClassifierTable, types: &[Ty], depth: u32) -> Ty {
    let unique = dedupe(types);
    if unique.is_empty() {
        return table.nothing_ty();
    }
    if unique.len() == 1 {
        return unique[0].clone();
    }
    if depth > MAX_DEPTH {
        return table.nullable_any();
    }

    // A type already covered by another candidate contributes nothing.
    let kept: Vec<Ty> = unique
        .iter()
        .filter(|t| {
            !unique
                .iter()
                .any(|o| !std::ptr::eq(*t, o) && t.is_sub_type_of(table, o))
        })
        .cloned()
        .collect();
    if kept.len() == 1 {
        return kept[0].clone();
    }
    let kept = if kept.is_empty() { unique } else { kept };

    let nullable = kept.iter().any(Ty::nullable);

    let Some(ancestor) = best_shared_ancestor(table, &kept) else {
        return table.default_ty(table.any).with_nullable(nullable);
    };

    let views: Vec<Ty> = kept
        .iter()
        .filter_map(|t| t.subtype_view(table, ancestor))
        .collect();
    if views.len() != kept.len() {
        return table.default_ty(table.any).with_nullable(nullable);
    }

    let variances = table.classifier(ancestor).variances.clone();
    let arity = table.classifier(ancestor).type_params.len();
    let mut arguments = Vec::with_capacity(arity);
    for i in 0..arity {
        let position: Vec<Ty> = views.iter().map(|v| v.arguments()[i].clone()).collect();
        let combined = match variances[i] {
            Variance::Out => join(table, &position, depth + 1),
            Variance::In => meet(table, &position, depth + 1),
            Variance::Invariant => {
                if position.iter().all(|t| *t == position[0]) {
                    position[0].clone()
                } else {
                    table.star()
                }
            }
        };
        arguments.push(combined);
    }
    Ty::new(ancestor, arguments).with_nullable(nullable)
}

fn meet(table: &ClassifierTable, types: &[Ty], depth: u32) -> Ty {
    let unique = dedupe(types);
    if unique.is_empty() {
        return table.nullable_any();
    }
    if unique.len() == 1 {
        return unique[0].clone();
    }
    if depth > MAX_DEPTH {
        return table.nothing_ty();
    }

    // Supertypes of another candidate are redundant in a meet.
    let kept: Vec<Ty> = unique
        .iter()
        .filter(|t| {
            !unique
                .iter()
                .any(|o| !std::ptr::eq(*t, o) && o.is_sub_type_of(table, t))
        })
        .cloned()
        .collect();
    if kept.len() == 1 {
        return kept[0].clone();
    }
    let kept = if kept.is_empty() { unique } else { kept };

    let nullable = kept.iter().all(Ty::nullable);

    // Same classifier: combine arguments; otherwise the meet is empty.
    let classifier = kept[0].classifier();
    if !kept.iter().all(|t| t.classifier() == classifier) {
        return table.nothing_ty();
    }
    let variances = table.classifier(classifier).variances.clone();
    let arity = table.classifier(classifier).type_params.len();
    let mut arguments = Vec::with_capacity(arity);
    for i in 0..arity {
        let position: Vec<Ty> = kept.iter().map(|t| t.arguments()[i].clone()).collect();
        let combined = match variances[i] {
            Variance::Out => meet(table, &position, depth + 1),
            Variance::In => join(table, &position, depth + 1),
            Variance::Invariant => {
                if position.iter().all(|t| *t == position[0]) {
                    position[0].clone()
                } else {
                    table.star()
                }
            }
        };
        arguments.push(combined);
    }
    Ty::new(classifier, arguments).with_nullable(nullable)
}

fn dedupe(types: &[Ty]) -> Vec<Ty> {
    let mut out: Vec<Ty> = Vec::with_capacity(types.len());
    for t in types {
        if !out.contains(t) {
            out.push(t.clone());
        }
    }
    out
}

/// The most specific classifier every type is viewable as, preferring the
/// declaration order of the first type's ancestry for determinism.
fn best_shared_ancestor(table: &ClassifierTable, types: &[Ty]) -> Option<ClassifierId> {
    let first = ancestors(table, &types[0]);
    let shared: Vec<ClassifierId> = first
        .into_iter()
        .filter(|&c| c != table.any && c != table.nothing)
        .filter(|&c| !table.classifier(c).is_type_alias())
        .filter(|&c| types[1..].iter().all(|t| t.subtype_view(table, c).is_some()))
        .collect();
    // Keep only the most specific of the shared ancestors.
    shared
        .iter()
        .find(|&&c| {
            !shared.iter().any(|&other| {
                other != c && table.default_ty(other).subtype_view(table, c).is_some()
            })
        })
        .copied()
}

/// Classifiers reachable through the supertype DAG, starting from the
/// type's own classifier.
fn ancestors(table: &ClassifierTable, ty: &Ty) -> Vec<ClassifierId> {
    let mut out = Vec::new();
    let mut queue = vec![ty.fully_expanded(table).classifier()];
    while let Some(c) = queue.pop() {
        if out.contains(&c) {
            continue;
        }
        out.push(c);
        for supertype in &table.classifier(c).supertypes {
            queue.push(supertype.fully_expanded(table).classifier());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassifierDecl;

    struct World {
        table: ClassifierTable,
        animal: ClassifierId,
        cat: ClassifierId,
        dog: ClassifierId,
    }

    fn world() -> World {
        let mut table = ClassifierTable::new();
        let animal = table.add_classifier(ClassifierDecl::simple("zoo.Animal", "zoo"));
        let animal_ty = table.default_ty(animal);
        let cat = table.add_classifier(ClassifierDecl {
            supertypes: vec![animal_ty.clone()],
            ..ClassifierDecl::simple("zoo.Cat", "zoo")
        });
        let dog = table.add_classifier(ClassifierDecl {
            supertypes: vec![animal_ty],
            ..ClassifierDecl::simple("zoo.Dog", "zoo")
        });
        World { table, animal, cat, dog }
    }

    #[test]
    fn test_join_of_siblings_is_parent() {
        let w = world();
        let joined = common_super_type(
            &w.table,
            &[w.table.default_ty(w.cat), w.table.default_ty(w.dog)],
        );
        assert_eq!(joined, w.table.default_ty(w.animal));
    }

    #[test]
    fn test_join_absorbs_subtypes() {
        let w = world();
        let joined = common_super_type(
            &w.table,
            &[w.table.default_ty(w.cat), w.table.default_ty(w.animal)],
        );
        assert_eq!(joined, w.table.default_ty(w.animal));
    }

    #[test]
    fn test_join_of_unrelated_is_any() {
        let w = world();
        let other = {
            let mut table = w.table;
            let int = table.add_classifier(ClassifierDecl::simple("core.Int", "core"));
            let joined =
                common_super_type(&table, &[table.default_ty(w.cat), table.default_ty(int)]);
            (table, joined)
        };
        assert_eq!(other.1.classifier(), other.0.any);
    }

    #[test]
    fn test_join_recurses_into_covariant_arguments() {
        let w = world();
        let list_cat = Ty::new(w.table.list, vec![w.table.default_ty(w.cat)]);
        let list_dog = Ty::new(w.table.list, vec![w.table.default_ty(w.dog)]);
        let joined = common_super_type(&w.table, &[list_cat, list_dog]);
        assert_eq!(
            joined,
            Ty::new(w.table.list, vec![w.table.default_ty(w.animal)])
        );
    }

    #[test]
    fn test_join_nullability_unions() {
        let w = world();
        let joined = common_super_type(
            &w.table,
            &[
                w.table.default_ty(w.cat).with_nullable(true),
                w.table.default_ty(w.dog),
            ],
        );
        assert!(joined.nullable());
    }

    #[test]
    fn test_meet_picks_the_subtype() {
        let w = world();
        let met = intersect_types(
            &w.table,
            &[w.table.default_ty(w.animal), w.table.default_ty(w.cat)],
        );
        assert_eq!(met, w.table.default_ty(w.cat));
    }

    #[test]
    fn test_meet_of_disjoint_is_nothing() {
        let w = world();
        let met = intersect_types(
            &w.table,
            &[w.table.default_ty(w.cat), w.table.default_ty(w.dog)],
        );
        assert_eq!(met.classifier(), w.table.nothing);
    }

    #[test]
    fn test_invariant_conflict_falls_back_to_star() {
        let w = world();
        let key_cat = Ty::new(w.table.type_key, vec![w.table.default_ty(w.cat)]);
        let key_dog = Ty::new(w.table.type_key, vec![w.table.default_ty(w.dog)]);
        let joined = common_super_type(&w.table, &[key_cat, key_dog]);
        assert_eq!(joined.classifier(), w.table.type_key);
        assert!(joined.arguments()[0].is_star());
    }
}
