//! Import directives.
//!
//! Each file or declaration carries an ordered list of directives bringing
//! exported producers into scope. Resolution returns the seed candidates
//! plus per-directive signals (unresolved, duplicate) the surrounding
//! diagnostic layer turns into warnings; actual consultation during
//! resolution is tracked separately in the run context so unused directives
//! can be reported too.

use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::debug;

use crate::fqn::in_package;
use crate::injectables::Callable;
use crate::store::DeclarationStore;

/// One import directive, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImportDirective {
    /// `pkg.name`: one exported producer.
    Exact(String),
    /// `pkg.*`: every direct export of the package.
    PackageStar(String),
    /// `pkg.**`: every export of the package and its sub-packages.
    PackageDeep(String),
}

impl ImportDirective {
    fn path(&self) -> &str {
        match self {
            ImportDirective::Exact(p)
            | ImportDirective::PackageStar(p)
            | ImportDirective::PackageDeep(p) => p,
        }
    }
}

/// A problem with a directive. Not fatal; resolution proceeds with the
/// directives that did resolve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportIssue {
    #[error("unresolved import `{path}`")]
    Unresolved { directive: usize, path: String },
    #[error("duplicate import `{path}`")]
    Duplicate { directive: usize, path: String },
}

/// Seed candidates introduced by a directive list, plus issues found.
#[derive(Debug, Default)]
pub struct ResolvedImports {
    pub candidates: Vec<Callable>,
    pub issues: Vec<ImportIssue>,
}

/// Resolve a directive list against the store's module exports.
///
/// Every produced candidate carries the index of the directive that
/// introduced it, so the run context can report which directives were never
/// consulted.
pub fn resolve_imports(store: &DeclarationStore, directives: &[ImportDirective]) -> ResolvedImports {
    let mut out = ResolvedImports::default();
    let mut seen_directives: FxHashSet<&ImportDirective> = FxHashSet::default();
    let mut seen_exports: FxHashSet<crate::fqn::Fqn> = FxHashSet::default();

    for (index, directive) in directives.iter().enumerate() {
        if !seen_directives.insert(directive) {
            out.issues.push(ImportIssue::Duplicate {
                directive: index,
                path: directive.path().to_string(),
            });
            continue;
        }

        let mut matched: Vec<Callable> = Vec::new();
        match directive {
            ImportDirective::Exact(path) => {
                for pkg in store.packages().map(str::to_owned).collect::<Vec<_>>() {
                    for export in store.exports(&pkg) {
                        if export.chain_key.as_ref() == path.as_str() {
                            matched.push(export.clone());
                        }
                    }
                }
            }
            ImportDirective::PackageStar(pkg) => {
                matched.extend(store.exports(pkg).iter().cloned());
            }
            ImportDirective::PackageDeep(pkg) => {
                for candidate_pkg in store.packages().map(str::to_owned).collect::<Vec<_>>() {
                    // package_of(member path) == candidate_pkg, so test any
                    // member path shape against the deep pattern.
                    let probe = format!("{candidate_pkg}.x");
                    if in_package(&probe, pkg, true) {
                        matched.extend(store.exports(&candidate_pkg).iter().cloned());
                    }
                }
            }
        }

        if matched.is_empty() {
            out.issues.push(ImportIssue::Unresolved {
                directive: index,
                path: directive.path().to_string(),
            });
            continue;
        }
        debug!(directive = index, count = matched.len(), "resolved import");
        for mut callable in matched {
            if !seen_exports.insert(callable.fqn) {
                continue;
            }
            callable.source_import = Some(index);
            out.candidates.push(callable);
        }
    }
    out
}
