//! Per-run resolution context.
//!
//! One [`ResolutionCtx`] owns everything a single resolution run touches:
//! the classifier table, the declaration store, the scope arena and every
//! memo map. There are no globals; the context is passed `&mut` through the
//! whole call graph. All caches are append-only within a run: a key is
//! written once and never invalidated, so re-entrant reads are always safe
//! and a cancelled run's caches can simply be dropped.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::fqn::Fqn;
use crate::injectables::CallableId;
use crate::resolve::result::{Candidate, ResolutionResult};
use crate::scope::{Scope, ScopeId};
use crate::store::DeclarationStore;
use crate::types::ClassifierTable;

/// Cooperative cancellation flag, shared with the embedding driver.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Raised out of the top-level entry points when the token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("resolution cancelled")]
pub struct Cancelled;

/// How many cancellation-poll ticks pass between actual flag loads.
const POLL_INTERVAL: u32 = 64;

/// Arenas, memo maps and counters for one resolution run.
pub struct ResolutionCtx {
    pub table: ClassifierTable,
    pub store: DeclarationStore,
    scopes: Vec<Scope>,

    /// Gathered candidates per (scope, request memo key).
    pub(crate) candidate_cache: FxHashMap<(ScopeId, String), Rc<Vec<Candidate>>>,
    /// Resolved result per (scope, request memo key).
    pub(crate) result_cache: FxHashMap<(ScopeId, String), ResolutionResult>,
    /// Resolved result per (requesting scope, fixed candidate); the scope
    /// is part of the key because the candidate's dependencies resolve
    /// against it and shadowing can change the outcome per scope.
    pub(crate) candidate_results: FxHashMap<(ScopeId, CallableId), ResolutionResult>,
    /// Synthesized type scope per canonical type key.
    pub(crate) type_scopes: FxHashMap<String, ScopeId>,
    /// Scope per syntactic position, keyed by (owner, parent).
    pub(crate) position_scopes: FxHashMap<(Fqn, ScopeId), ScopeId>,

    /// Indices of import directives actually consulted during resolution.
    used_imports: FxHashSet<usize>,

    next_framework_key: u64,
    next_callable_id: u32,

    token: CancellationToken,
    poll_tick: u32,
}

impl ResolutionCtx {
    pub fn new(table: ClassifierTable, store: DeclarationStore) -> Self {
        Self::with_token(table, store, CancellationToken::new())
    }

    pub fn with_token(
        table: ClassifierTable,
        store: DeclarationStore,
        token: CancellationToken,
    ) -> Self {
        Self {
            table,
            store,
            scopes: Vec::new(),
            candidate_cache: FxHashMap::default(),
            result_cache: FxHashMap::default(),
            candidate_results: FxHashMap::default(),
            type_scopes: FxHashMap::default(),
            position_scopes: FxHashMap::default(),
            used_imports: FxHashSet::default(),
            next_framework_key: 0,
            next_callable_id: 0,
            token,
            poll_tick: 0,
        }
    }

    pub(crate) fn alloc_scope(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(scope);
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    /// The chain from `id` up to the root, nearest first.
    pub fn chain(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut out = vec![id];
        let mut current = id;
        while let Some(parent) = self.scope(current).parent {
            out.push(parent);
            current = parent;
        }
        out
    }

    /// Fresh discriminator for a synthesized type instance.
    pub(crate) fn fresh_framework_key(&mut self) -> u64 {
        self.next_framework_key += 1;
        self.next_framework_key
    }

    /// Fresh id for a synthesized or substituted callable.
    pub(crate) fn fresh_callable_id(&mut self) -> CallableId {
        self.next_callable_id += 1;
        CallableId(self.next_callable_id)
    }

    /// Record that an import directive contributed a consulted candidate.
    pub(crate) fn mark_import_used(&mut self, directive: usize) {
        self.used_imports.insert(directive);
    }

    /// Directive indices consulted during resolution; the diagnostic layer
    /// warns about the rest.
    pub fn used_imports(&self) -> &FxHashSet<usize> {
        &self.used_imports
    }

    /// Poll the cancellation token at a bounded interval.
    pub(crate) fn check_cancelled(&mut self) -> Result<(), Cancelled> {
        self.poll_tick += 1;
        if self.poll_tick >= POLL_INTERVAL {
            self.poll_tick = 0;
            if self.token.is_cancelled() {
                return Err(Cancelled);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_polls_at_interval() {
        let token = CancellationToken::new();
        let mut ctx = ResolutionCtx::with_token(
            ClassifierTable::new(),
            DeclarationStore::new(),
            token.clone(),
        );
        token.cancel();
        // The flag is only loaded every POLL_INTERVAL ticks.
        let mut result = Ok(());
        for _ in 0..POLL_INTERVAL {
            result = ctx.check_cancelled();
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(Cancelled));
    }

    #[test]
    fn test_fresh_ids_never_repeat() {
        let mut ctx = ResolutionCtx::new(ClassifierTable::new(), DeclarationStore::new());
        let a = ctx.fresh_callable_id();
        let b = ctx.fresh_callable_id();
        assert_ne!(a, b);
        assert_ne!(ctx.fresh_framework_key(), ctx.fresh_framework_key());
    }
}
