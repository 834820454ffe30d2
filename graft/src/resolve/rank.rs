//! Candidate ranking.
//!
//! When several candidates match a request they are ordered by a staged
//! comparator: singleton/object producers first, then (among user-declared
//! candidates) the nearer scope, then structural specificity of the
//! *declared* type, then user-declared over framework-synthesized.
//! Candidates the comparator cannot separate stay tied; the resolution
//! layer turns surviving ties into an ambiguity failure.

use std::cmp::Ordering;

use crate::resolve::result::{Candidate, CandidateSource};
use crate::types::{ClassifierTable, Ty};

/// Rank `a` against `b`; `Greater` means `a` is preferred.
pub fn compare(table: &ClassifierTable, a: &Candidate, b: &Candidate) -> Ordering {
    match (a.callable.is_object, b.callable.is_object) {
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }

    // Distance only separates user-declared candidates; framework
    // candidates are synthesized at the request site and carry no
    // meaningful nesting.
    if a.source == CandidateSource::User && b.source == CandidateSource::User {
        match a.distance.cmp(&b.distance) {
            Ordering::Less => return Ordering::Greater,
            Ordering::Greater => return Ordering::Less,
            Ordering::Equal => {}
        }
    }

    match specificity(table, &a.callable.original_ty, &b.callable.original_ty) {
        Ordering::Equal => {}
        unequal => return unequal,
    }

    match (a.source, b.source) {
        (CandidateSource::User, CandidateSource::Framework) => Ordering::Greater,
        (CandidateSource::Framework, CandidateSource::User) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// The candidates no other candidate strictly outranks.
pub fn find_maximal<'a>(table: &ClassifierTable, candidates: &'a [Candidate]) -> Vec<&'a Candidate> {
    candidates
        .iter()
        .filter(|c| {
            !candidates
                .iter()
                .any(|other| compare(table, other, c) == Ordering::Greater)
        })
        .collect()
}

/// Structural specificity of declared types: a concrete classifier beats a
/// type parameter, a non-alias beats an alias, fewer free variables beat
/// more, and same-classifier types recurse per argument (more specific in
/// some position and less in none wins).
fn specificity(table: &ClassifierTable, a: &Ty, b: &Ty) -> Ordering {
    if a.is_star() || b.is_star() {
        return match (a.is_star(), b.is_star()) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            _ => Ordering::Equal,
        };
    }
    let a_param = table.classifier(a.classifier()).is_type_parameter();
    let b_param = table.classifier(b.classifier()).is_type_parameter();
    match (a_param, b_param) {
        (false, true) => return Ordering::Greater,
        (true, false) => return Ordering::Less,
        (true, true) => return Ordering::Equal,
        (false, false) => {}
    }
    let a_alias = table.classifier(a.classifier()).is_type_alias();
    let b_alias = table.classifier(b.classifier()).is_type_alias();
    match (a_alias, b_alias) {
        (false, true) => return Ordering::Greater,
        (true, false) => return Ordering::Less,
        _ => {}
    }
    match free_vars(table, a).cmp(&free_vars(table, b)) {
        Ordering::Less => return Ordering::Greater,
        Ordering::Greater => return Ordering::Less,
        Ordering::Equal => {}
    }
    if a.classifier() == b.classifier() {
        let mut wins = 0usize;
        let mut losses = 0usize;
        for (arg_a, arg_b) in a.arguments().iter().zip(b.arguments()) {
            match specificity(table, arg_a, arg_b) {
                Ordering::Greater => wins += 1,
                Ordering::Less => losses += 1,
                Ordering::Equal => {}
            }
        }
        return match (wins, losses) {
            (0, 0) => Ordering::Equal,
            (_, 0) => Ordering::Greater,
            (0, _) => Ordering::Less,
            _ => Ordering::Equal,
        };
    }
    Ordering::Equal
}

fn free_vars(table: &ClassifierTable, ty: &Ty) -> usize {
    ty.classifier_set()
        .into_iter()
        .filter(|&c| table.classifier(c).is_type_parameter())
        .count()
}
