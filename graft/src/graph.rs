//! Resolution output.
//!
//! Code generation walks the success bindings; diagnostics walk the failure
//! map. Both maps keep insertion order so output is deterministic.

use indexmap::IndexMap;

use crate::resolve::result::{Failure, FailureKind, Success};
use crate::scope::ScopeId;
use crate::store::DeclarationStore;
use crate::types::ClassifierTable;

/// Outcome of one batch of top-level requests.
#[derive(Debug)]
pub enum ResolutionGraph {
    Success {
        root_scope: ScopeId,
        /// Chosen candidate tree per request key.
        bindings: IndexMap<String, Success>,
    },
    Error {
        /// All independent failures per request key.
        failures: IndexMap<String, Vec<Failure>>,
    },
}

impl ResolutionGraph {
    pub fn is_success(&self) -> bool {
        matches!(self, ResolutionGraph::Success { .. })
    }
}

/// Render one failure with its full dependency chain, decorated with any
/// custom error message registered for the requested classifier.
pub fn render_failure(
    table: &ClassifierTable,
    store: &DeclarationStore,
    failure: &Failure,
) -> String {
    let mut out = String::new();
    render_into(table, store, failure, 0, &mut out);
    out
}

fn render_into(
    table: &ClassifierTable,
    store: &DeclarationStore,
    failure: &Failure,
    indent: usize,
    out: &mut String,
) {
    use std::fmt::Write as _;
    let pad = "  ".repeat(indent);
    let ty = failure.request.ty.display(table);
    let origin = table.names.resolve_fqn(failure.request.origin);
    match &failure.kind {
        FailureKind::NoCandidates => {
            let _ = writeln!(out, "{pad}no candidates for `{ty}` requested by `{origin}`");
        }
        FailureKind::CandidateAmbiguity(candidates) => {
            let _ = writeln!(out, "{pad}ambiguous candidates for `{ty}`:");
            for candidate in candidates {
                let _ = writeln!(
                    out,
                    "{pad}  - `{}`",
                    table.names.resolve_fqn(candidate.callable.fqn)
                );
            }
        }
        FailureKind::CallContextMismatch { expected, found } => {
            let _ = writeln!(
                out,
                "{pad}`{ty}` candidate requires {found:?} context but was requested from {expected:?}"
            );
        }
        FailureKind::DivergentCandidate { chain } => {
            let _ = writeln!(out, "{pad}diverging resolution of `{ty}`:");
            for entry in chain {
                let _ = writeln!(
                    out,
                    "{pad}  -> `{}` resolving `{}`",
                    table.names.resolve_fqn(entry.origin),
                    entry.ty.display(table)
                );
            }
        }
        FailureKind::DependencyFailure { candidate, nested } => {
            let _ = writeln!(
                out,
                "{pad}`{}` cannot satisfy `{ty}`:",
                table.names.resolve_fqn(candidate.callable.fqn)
            );
            render_into(table, store, nested, indent + 1, out);
        }
    }
    if let Some(message) = store.error_message(failure.request.ty.classifier()) {
        let _ = writeln!(out, "{pad}note: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injectables::Request;
    use crate::types::ClassifierDecl;

    #[test]
    fn test_render_decorates_with_custom_message() {
        let mut table = ClassifierTable::new();
        let mut store = DeclarationStore::new();
        let db = table.add_classifier(ClassifierDecl::simple("m.Db", "m"));
        store.set_error_message(db, "bind a Db in the application scope");
        let origin = table.names.fqn("m.site");
        let failure = Failure {
            request: Request::new(&table, table.default_ty(db), origin),
            kind: FailureKind::NoCandidates,
        };
        let rendered = render_failure(&table, &store, &failure);
        assert!(rendered.contains("no candidates for `m.Db`"));
        assert!(rendered.contains("note: bind a Db in the application scope"));
    }
}
