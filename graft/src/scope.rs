//! The scope chain.
//!
//! Scopes form a parent-linked tree. Each scope owns the candidates seeded
//! into it at construction: plain producers directly, group producers
//! through recursive member expansion, spreading producers as rules applied
//! to every concrete candidate type visible in the chain.
//!
//! Candidate gathering per request walks the chain nearest-first, then the
//! requested type's own type scope, and is memoized per (scope, request
//! key). A scope's candidate set never shrinks once constructed, which is
//! what makes the memo maps append-only safe.

use std::rc::Rc;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::ctx::ResolutionCtx;
use crate::fqn::Fqn;
use crate::injectables::{CallContext, Callable, CandidateKind, Request};
use crate::resolve::result::{Candidate, CandidateSource};
use crate::solver::solve;
use crate::types::{ClassifierFlags, ClassifierId, Ty, TySubst};

/// Index of a scope in the run context's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// Requester-side filter over gathered candidates; hides declarations not
/// yet initialized at the requesting position.
pub type VisibilityPredicate = Rc<dyn Fn(&Callable) -> bool>;

/// One node of the scope chain.
pub struct Scope {
    pub name: String,
    pub parent: Option<ScopeId>,
    pub owner: Option<Fqn>,
    pub call_context: CallContext,
    /// Type parameters declared here; opaque to nested constraint solving.
    pub static_params: FxHashSet<ClassifierId>,
    pub visibility: Option<VisibilityPredicate>,
    /// Concrete candidates collected at construction plus spread outputs.
    pub candidates: Vec<Callable>,
    pub spread_rules: Vec<SpreadRule>,
    /// Canonical keys of types produced by this scope's spread rules; a
    /// rule never re-triggers on its own output.
    pub spread_result_keys: FxHashSet<String>,
    pub depth: usize,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("depth", &self.depth)
            .field("candidates", &self.candidates.len())
            .field("spread_rules", &self.spread_rules.len())
            .finish()
    }
}

/// A registered spreading producer: a generic candidate whose marked type
/// parameter matches any concrete type satisfying its constraint, producing
/// one new candidate per match.
#[derive(Debug, Clone)]
pub struct SpreadRule {
    pub callable: Callable,
    pub spread_param: ClassifierId,
    /// Canonical keys of types this rule already fired on.
    applied: FxHashSet<String>,
}

/// Construction parameters for [`build_scope`].
pub struct ScopeParams {
    pub name: String,
    pub parent: Option<ScopeId>,
    pub owner: Option<Fqn>,
    pub call_context: CallContext,
    pub static_params: Vec<ClassifierId>,
    pub visibility: Option<VisibilityPredicate>,
    pub seeds: Vec<Callable>,
}

impl ScopeParams {
    pub fn root(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            owner: None,
            call_context: CallContext::Default,
            static_params: Vec::new(),
            visibility: None,
            seeds: Vec::new(),
        }
    }

    pub fn child(name: &str, parent: ScopeId) -> Self {
        Self {
            parent: Some(parent),
            ..Self::root(name)
        }
    }

    pub fn with_seeds(mut self, seeds: Vec<Callable>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn with_call_context(mut self, call_context: CallContext) -> Self {
        self.call_context = call_context;
        self
    }

    pub fn with_owner(mut self, owner: Fqn) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_static_params(mut self, params: Vec<ClassifierId>) -> Self {
        self.static_params = params;
        self
    }

    fn is_noop(&self, ctx: &ResolutionCtx) -> bool {
        let Some(parent) = self.parent else {
            return false;
        };
        self.seeds.is_empty()
            && self.static_params.is_empty()
            && self.visibility.is_none()
            && self.call_context == ctx.scope(parent).call_context
    }
}

/// Build a scope and eagerly collect its seeds.
///
/// A no-op scope (no seeds, no type parameters, no visibility filter, same
/// call context) collapses to its parent. Scopes with an owner are cached
/// by (owner, parent) so repeated requests from the same syntactic position
/// reuse the same scope.
pub fn build_scope(ctx: &mut ResolutionCtx, params: ScopeParams) -> ScopeId {
    if params.is_noop(ctx) {
        return params.parent.expect("no-op scope always has a parent");
    }
    if let (Some(owner), Some(parent)) = (params.owner, params.parent) {
        if let Some(&cached) = ctx.position_scopes.get(&(owner, parent)) {
            return cached;
        }
    }

    let depth = params
        .parent
        .map(|p| ctx.scope(p).depth + 1)
        .unwrap_or(0);
    let id = ctx.alloc_scope(Scope {
        name: params.name,
        parent: params.parent,
        owner: params.owner,
        call_context: params.call_context,
        static_params: params.static_params.into_iter().collect(),
        visibility: params.visibility,
        candidates: Vec::new(),
        spread_rules: Vec::new(),
        spread_result_keys: FxHashSet::default(),
        depth,
    });
    if let (Some(owner), Some(parent)) = (params.owner, params.parent) {
        ctx.position_scopes.insert((owner, parent), id);
    }

    let mut guard = FxHashSet::default();
    for seed in params.seeds {
        collect(ctx, id, seed, &mut guard);
    }
    debug!(
        scope = %ctx.scope(id).name,
        candidates = ctx.scope(id).candidates.len(),
        rules = ctx.scope(id).spread_rules.len(),
        "built scope"
    );
    id
}

/// Recursively collect one seed into a scope. `guard` holds the chain keys
/// already expanded, breaking group self-reference.
fn collect(ctx: &mut ResolutionCtx, scope: ScopeId, callable: Callable, guard: &mut FxHashSet<String>) {
    if !guard.insert(callable.chain_key.to_string()) {
        return;
    }
    if callable.is_spread(&ctx.table) {
        register_spread_rule(ctx, scope, callable, guard);
        return;
    }
    match callable.kind {
        CandidateKind::Group => expand_group(ctx, scope, callable, guard),
        CandidateKind::Value | CandidateKind::SetElement => {
            add_concrete(ctx, scope, callable, guard)
        }
    }
}

/// Expand a module-like producer: its return type's member declarations are
/// candidates themselves, chained under the group's path key.
fn expand_group(ctx: &mut ResolutionCtx, scope: ScopeId, group: Callable, guard: &mut FxHashSet<String>) {
    let owner = group.ty.classifier();
    let subst = group.ty.own_substitution(&ctx.table);
    let members: Vec<Callable> = ctx.store.members(owner).to_vec();
    trace!(group = %ctx.table.names.resolve_fqn(group.fqn), members = members.len(), "expanding group");
    for member in members {
        let id = ctx.fresh_callable_id();
        let mut member = member.substituted(id, &subst);
        member.chain_key = format!("{}/{}", group.chain_key, member.chain_key).into();
        member.source_import = member.source_import.or(group.source_import);
        collect(ctx, scope, member, guard);
    }
}

/// Add a concrete candidate and run every spread rule visible in the chain
/// against its produced type.
fn add_concrete(ctx: &mut ResolutionCtx, scope: ScopeId, callable: Callable, guard: &mut FxHashSet<String>) {
    let ty = callable.ty.clone();
    ctx.scope_mut(scope).candidates.push(callable);
    for rule_scope in ctx.chain(scope) {
        apply_rules_to(ctx, rule_scope, &ty, guard);
    }
}

/// Register a spreading producer as a rule and immediately test it against
/// every concrete candidate type already visible in the chain.
fn register_spread_rule(
    ctx: &mut ResolutionCtx,
    scope: ScopeId,
    callable: Callable,
    guard: &mut FxHashSet<String>,
) {
    let spread_param = callable
        .type_params
        .iter()
        .copied()
        .find(|&p| ctx.table.classifier(p).flags.contains(ClassifierFlags::SPREAD))
        .expect("checked by is_spread");
    trace!(rule = %ctx.table.names.resolve_fqn(callable.fqn), "registered spread rule");
    ctx.scope_mut(scope).spread_rules.push(SpreadRule {
        callable,
        spread_param,
        applied: FxHashSet::default(),
    });
    let rule_index = ctx.scope(scope).spread_rules.len() - 1;

    let mut visible: Vec<Ty> = Vec::new();
    for chain_scope in ctx.chain(scope) {
        visible.extend(ctx.scope(chain_scope).candidates.iter().map(|c| c.ty.clone()));
    }
    for ty in visible {
        apply_rule(ctx, scope, rule_index, &ty, guard);
    }
}

/// Run every rule registered on `scope` against one candidate type.
fn apply_rules_to(ctx: &mut ResolutionCtx, scope: ScopeId, ty: &Ty, guard: &mut FxHashSet<String>) {
    for rule_index in 0..ctx.scope(scope).spread_rules.len() {
        apply_rule(ctx, scope, rule_index, ty, guard);
    }
}

/// Fire one spread rule on one concrete type if the constraint unifies.
/// The output is collected into the rule's own scope; its type key joins
/// `spread_result_keys` so the rule never re-triggers on what it produced.
fn apply_rule(
    ctx: &mut ResolutionCtx,
    scope: ScopeId,
    rule_index: usize,
    target: &Ty,
    guard: &mut FxHashSet<String>,
) {
    let key = target.canonical_key(&ctx.table);
    if ctx.scope(scope).spread_result_keys.contains(&key) {
        return;
    }
    if ctx.table.classifier(target.classifier()).is_type_parameter() {
        return;
    }
    {
        let rule = &mut ctx.scope_mut(scope).spread_rules[rule_index];
        if !rule.applied.insert(key) {
            return;
        }
    }

    let rule = ctx.scope(scope).spread_rules[rule_index].clone();
    let bounds = ctx.table.classifier(rule.spread_param).supertypes.clone();
    let mut probe = TySubst::default();
    probe.insert(rule.spread_param, target.clone());
    let satisfied = bounds
        .iter()
        .all(|bound| spread_bound_satisfied(ctx, target, &bound.substitute(&probe)));
    if !satisfied {
        return;
    }

    let id = ctx.fresh_callable_id();
    let mut output = rule.callable.substituted(id, &probe);
    output.chain_key = format!(
        "{}<{}>",
        rule.callable.chain_key,
        target.canonical_key(&ctx.table)
    )
    .into();
    let output_key = output.ty.canonical_key(&ctx.table);
    ctx.scope_mut(scope)
        .spread_result_keys
        .insert(output_key);
    trace!(
        rule = %ctx.table.names.resolve_fqn(rule.callable.fqn),
        target = %target.display(&ctx.table),
        "spread rule fired"
    );
    collect(ctx, scope, output, guard);
}

/// A spread bound holds when the target carries every tag the bound asks
/// for and the untagged target is a subtype of the untagged bound. Tags are
/// matched as constraints here, not as part of structural identity.
fn spread_bound_satisfied(ctx: &ResolutionCtx, target: &Ty, bound: &Ty) -> bool {
    if !bound.tags().iter().all(|t| target.tags().contains(t)) {
        return false;
    }
    target
        .with_tags(Vec::new())
        .is_sub_type_of(&ctx.table, &bound.with_tags(Vec::new()))
}

/// Static type parameters visible from a scope, its ancestors included.
pub fn static_params(ctx: &ResolutionCtx, scope: ScopeId) -> FxHashSet<ClassifierId> {
    let mut out = FxHashSet::default();
    for s in ctx.chain(scope) {
        out.extend(ctx.scope(s).static_params.iter().copied());
    }
    out
}

/// Gather every visible candidate matching a request, nearest scope first,
/// then the requested type's type scope. Memoized per (scope, request key).
pub fn gather_candidates(
    ctx: &mut ResolutionCtx,
    scope: ScopeId,
    request: &Request,
) -> Rc<Vec<Candidate>> {
    let statics = static_params(ctx, scope);
    let memo_key = (scope, request.memo_key(&statics));
    if let Some(cached) = ctx.candidate_cache.get(&memo_key) {
        return Rc::clone(cached);
    }

    let mut out: Vec<Candidate> = Vec::new();
    let mut seen_chain_keys: FxHashSet<Rc<str>> = FxHashSet::default();
    let predicate = ctx.scope(scope).visibility.clone();

    let chain = ctx.chain(scope);
    let chain_len = chain.len();
    for (distance, chain_scope) in chain.into_iter().enumerate() {
        gather_from(
            ctx,
            chain_scope,
            distance,
            request,
            &statics,
            predicate.as_ref(),
            &mut seen_chain_keys,
            false,
            &mut out,
        );
    }
    if let Some(type_scope) = type_scope(ctx, &request.ty) {
        for (offset, ts) in ctx.chain(type_scope).into_iter().enumerate() {
            gather_from(
                ctx,
                ts,
                chain_len + offset,
                request,
                &statics,
                predicate.as_ref(),
                &mut seen_chain_keys,
                false,
                &mut out,
            );
        }
    }

    trace!(
        requested = %request.ty.display(&ctx.table),
        found = out.len(),
        "gathered candidates"
    );
    let out = Rc::new(out);
    ctx.candidate_cache.insert(memo_key, Rc::clone(&out));
    out
}

/// Gather every independently matching collection element across the whole
/// chain, set elements included, deduplicated by chain key.
pub fn gather_list_elements(
    ctx: &mut ResolutionCtx,
    scope: ScopeId,
    element: &Request,
) -> Vec<Candidate> {
    let statics = static_params(ctx, scope);
    let mut out: Vec<Candidate> = Vec::new();
    let mut seen_chain_keys: FxHashSet<Rc<str>> = FxHashSet::default();
    let predicate = ctx.scope(scope).visibility.clone();

    let chain = ctx.chain(scope);
    let chain_len = chain.len();
    for (distance, chain_scope) in chain.into_iter().enumerate() {
        gather_from(
            ctx,
            chain_scope,
            distance,
            element,
            &statics,
            predicate.as_ref(),
            &mut seen_chain_keys,
            true,
            &mut out,
        );
    }
    if let Some(type_scope) = type_scope(ctx, &element.ty) {
        for (offset, ts) in ctx.chain(type_scope).into_iter().enumerate() {
            gather_from(
                ctx,
                ts,
                chain_len + offset,
                element,
                &statics,
                predicate.as_ref(),
                &mut seen_chain_keys,
                true,
                &mut out,
            );
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn gather_from(
    ctx: &mut ResolutionCtx,
    scope: ScopeId,
    distance: usize,
    request: &Request,
    statics: &FxHashSet<ClassifierId>,
    predicate: Option<&VisibilityPredicate>,
    seen_chain_keys: &mut FxHashSet<Rc<str>>,
    include_set_elements: bool,
    out: &mut Vec<Candidate>,
) {
    let candidates: Vec<Callable> = ctx.scope(scope).candidates.to_vec();
    for callable in candidates {
        if callable.kind == CandidateKind::SetElement && !include_set_elements {
            continue;
        }
        if let Some(pred) = predicate {
            if !pred(&callable) {
                continue;
            }
        }
        if let Some(requester) = ctx.store.current_module() {
            if !callable.visibility.visible_from(requester, callable.module) {
                continue;
            }
        }
        if seen_chain_keys.contains(&callable.chain_key) {
            continue;
        }
        let Some(fixed) = match_callable(ctx, &callable, &request.ty, statics) else {
            continue;
        };
        seen_chain_keys.insert(callable.chain_key.clone());
        if let Some(directive) = callable.source_import {
            ctx.mark_import_used(directive);
        }
        out.push(Candidate {
            callable: fixed,
            distance,
            source: CandidateSource::User,
            framework: None,
        });
    }
}

/// Whether (and how) one callable produces the requested type. Generic
/// callables go through the solver and come back with their type arguments
/// fixed.
fn match_callable(
    ctx: &mut ResolutionCtx,
    callable: &Callable,
    requested: &Ty,
    statics: &FxHashSet<ClassifierId>,
) -> Option<Callable> {
    // Framework-keyed requests are exact-match lookups: only the candidate
    // synthesized for exactly this instance may answer.
    if requested.framework_key().is_some() {
        let matches = callable.ty.framework_key() == requested.framework_key()
            && callable.ty == *requested;
        return matches.then(|| callable.clone());
    }

    let free = callable.free_type_params();
    if free.is_empty() {
        return callable
            .ty
            .is_sub_type_of(&ctx.table, requested)
            .then(|| callable.clone());
    }
    let solution = solve(&ctx.table, &callable.ty, requested, &free, statics);
    if !solution.is_ok() {
        return None;
    }
    let id = ctx.fresh_callable_id();
    Some(callable.substituted(id, &solution.fixed))
}

/// The synthesized scope holding a type's own associated candidates:
/// member producers of the type and its supertypes, stacked in three layers
/// by declaring module (external dependency, then the type's module, then
/// the current module) so nearer-module candidates shadow. Cached by type
/// identity.
pub fn type_scope(ctx: &mut ResolutionCtx, ty: &Ty) -> Option<ScopeId> {
    let key = ty.canonical_key(&ctx.table);
    if let Some(&cached) = ctx.type_scopes.get(&key) {
        return Some(cached);
    }

    let mut associated: Vec<Callable> = Vec::new();
    let mut visited: FxHashSet<ClassifierId> = FxHashSet::default();
    collect_associated(ctx, ty, &mut visited, &mut associated);
    if associated.is_empty() {
        return None;
    }

    let type_module = ctx.table.classifier(ty.classifier()).module;
    let current_module = ctx.store.current_module();

    let mut external: Vec<Callable> = Vec::new();
    let mut same_module: Vec<Callable> = Vec::new();
    let mut current: Vec<Callable> = Vec::new();
    for callable in associated {
        if Some(callable.module) == current_module {
            current.push(callable);
        } else if callable.module == type_module {
            same_module.push(callable);
        } else {
            external.push(callable);
        }
    }

    let name = ty.display(&ctx.table);
    let mut scope = build_scope(
        ctx,
        ScopeParams::root(&format!("type:{name}:external")).with_seeds(external),
    );
    scope = build_scope(
        ctx,
        ScopeParams::child(&format!("type:{name}:module"), scope).with_seeds(same_module),
    );
    scope = build_scope(
        ctx,
        ScopeParams::child(&format!("type:{name}:current"), scope).with_seeds(current),
    );
    ctx.type_scopes.insert(key, scope);
    Some(scope)
}

/// Members of the type's classifier and, recursively, of its supertypes,
/// instantiated with the type's own arguments.
fn collect_associated(
    ctx: &mut ResolutionCtx,
    ty: &Ty,
    visited: &mut FxHashSet<ClassifierId>,
    out: &mut Vec<Callable>,
) {
    if !visited.insert(ty.classifier()) {
        return;
    }
    let subst = ty.own_substitution(&ctx.table);
    let members: Vec<Callable> = ctx.store.members(ty.classifier()).to_vec();
    for member in members {
        let id = ctx.fresh_callable_id();
        out.push(member.substituted(id, &subst));
    }
    let supertypes: Vec<Ty> = ctx
        .table
        .classifier(ty.classifier())
        .supertypes
        .iter()
        .map(|s| s.substitute(&subst))
        .collect();
    for supertype in supertypes {
        collect_associated(ctx, &supertype, visited, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injectables::{CallableId, Visibility};
    use crate::store::DeclarationStore;
    use crate::types::{ClassifierDecl, ClassifierTable};

    fn producer(table: &mut ClassifierTable, name: &str, ty: Ty) -> Callable {
        Callable {
            id: CallableId(0),
            fqn: table.names.fqn(name),
            original_ty: ty.clone(),
            ty,
            type_params: Vec::new(),
            parameters: Vec::new(),
            type_args: TySubst::default(),
            call_context: CallContext::Default,
            kind: CandidateKind::Value,
            visibility: Visibility::Public,
            module: table.names.module("m"),
            chain_key: name.into(),
            is_object: false,
            source_import: None,
        }
    }

    fn ctx() -> ResolutionCtx {
        ResolutionCtx::new(ClassifierTable::new(), DeclarationStore::new())
    }

    // ============================================================
    // Construction
    // ============================================================

    #[test]
    fn test_noop_scope_collapses_to_parent() {
        let mut ctx = ctx();
        let root = build_scope(&mut ctx, ScopeParams::root("root"));
        let child = build_scope(&mut ctx, ScopeParams::child("noop", root));
        assert_eq!(child, root);
    }

    #[test]
    fn test_position_scope_is_cached() {
        let mut ctx = ctx();
        let int = ctx.table.add_classifier(ClassifierDecl::simple("m.Int", "m"));
        let int_ty = ctx.table.default_ty(int);
        let root = build_scope(&mut ctx, ScopeParams::root("root"));
        let owner = ctx.table.names.fqn("m.position");
        let seed = producer(&mut ctx.table, "m.int", int_ty);
        let a = build_scope(
            &mut ctx,
            ScopeParams::child("pos", root)
                .with_owner(owner)
                .with_seeds(vec![seed.clone()]),
        );
        let b = build_scope(
            &mut ctx,
            ScopeParams::child("pos", root)
                .with_owner(owner)
                .with_seeds(vec![seed]),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_group_expands_members() {
        let mut ctx = ctx();
        let module_cls = ctx
            .table
            .add_classifier(ClassifierDecl::simple("m.Module", "m"));
        let int = ctx.table.add_classifier(ClassifierDecl::simple("m.Int", "m"));
        let int_ty = ctx.table.default_ty(int);
        let member = producer(&mut ctx.table, "m.Module.int", int_ty.clone());
        ctx.store.add_member(module_cls, member);

        let module_ty = ctx.table.default_ty(module_cls);
        let mut group = producer(&mut ctx.table, "m.module", module_ty);
        group.kind = CandidateKind::Group;

        let scope = build_scope(
            &mut ctx,
            ScopeParams::root("root").with_seeds(vec![group]),
        );
        let origin = ctx.table.names.fqn("m.site");
        let request = Request::new(&ctx.table, int_ty, origin);
        let found = gather_candidates(&mut ctx, scope, &request);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_group_self_reference_terminates() {
        let mut ctx = ctx();
        let module_cls = ctx
            .table
            .add_classifier(ClassifierDecl::simple("m.Module", "m"));
        let module_ty = ctx.table.default_ty(module_cls);
        // The module exposes itself as a member.
        let mut member = producer(&mut ctx.table, "m.Module.itself", module_ty.clone());
        member.kind = CandidateKind::Group;
        ctx.store.add_member(module_cls, member);

        let mut group = producer(&mut ctx.table, "m.module", module_ty);
        group.kind = CandidateKind::Group;
        let scope = build_scope(
            &mut ctx,
            ScopeParams::root("root").with_seeds(vec![group]),
        );
        // Termination is the assertion; the scope just has no value
        // candidates.
        assert!(ctx.scope(scope).candidates.is_empty());
    }

    // ============================================================
    // Gathering
    // ============================================================

    #[test]
    fn test_inner_candidate_gathers_nearer() {
        let mut ctx = ctx();
        let int = ctx.table.add_classifier(ClassifierDecl::simple("m.Int", "m"));
        let int_ty = ctx.table.default_ty(int);
        let outer_seed = producer(&mut ctx.table, "m.outer", int_ty.clone());
        let inner_seed = producer(&mut ctx.table, "m.inner", int_ty.clone());

        let root = build_scope(
            &mut ctx,
            ScopeParams::root("root").with_seeds(vec![outer_seed]),
        );
        let inner = build_scope(
            &mut ctx,
            ScopeParams::child("inner", root).with_seeds(vec![inner_seed]),
        );
        let origin = ctx.table.names.fqn("m.site");
        let request = Request::new(&ctx.table, int_ty, origin);
        let found = gather_candidates(&mut ctx, inner, &request);
        assert_eq!(found.len(), 2);
        let inner_fqn = ctx.table.names.fqn("m.inner");
        let nearest = found.iter().min_by_key(|c| c.distance).unwrap();
        assert_eq!(nearest.callable.fqn, inner_fqn);
    }

    #[test]
    fn test_generic_candidate_is_fixed_on_match() {
        let mut ctx = ctx();
        let any = ctx.table.nullable_any();
        let t = ctx.table.add_type_param("m.make.T", vec![any]);
        let int = ctx.table.add_classifier(ClassifierDecl::simple("m.Int", "m"));
        let int_ty = ctx.table.default_ty(int);

        let generic_ty = Ty::new(ctx.table.list, vec![ctx.table.default_ty(t)]);
        let mut generic = producer(&mut ctx.table, "m.make", generic_ty);
        generic.type_params = vec![t];

        let scope = build_scope(
            &mut ctx,
            ScopeParams::root("root").with_seeds(vec![generic]),
        );
        let origin = ctx.table.names.fqn("m.site");
        let requested = Ty::new(ctx.table.list, vec![int_ty.clone()]);
        let request = Request::new(&ctx.table, requested.clone(), origin);
        let found = gather_candidates(&mut ctx, scope, &request);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].callable.ty, requested);
        assert!(found[0].callable.free_type_params().is_empty());
    }

    #[test]
    fn test_gathering_is_memoized() {
        let mut ctx = ctx();
        let int = ctx.table.add_classifier(ClassifierDecl::simple("m.Int", "m"));
        let int_ty = ctx.table.default_ty(int);
        let seed = producer(&mut ctx.table, "m.int", int_ty.clone());
        let scope = build_scope(&mut ctx, ScopeParams::root("root").with_seeds(vec![seed]));
        let origin = ctx.table.names.fqn("m.site");
        let request = Request::new(&ctx.table, int_ty, origin);
        let first = gather_candidates(&mut ctx, scope, &request);
        let second = gather_candidates(&mut ctx, scope, &request);
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_set_elements_hidden_from_plain_requests() {
        let mut ctx = ctx();
        let int = ctx.table.add_classifier(ClassifierDecl::simple("m.Int", "m"));
        let int_ty = ctx.table.default_ty(int);
        let mut element = producer(&mut ctx.table, "m.element", int_ty.clone());
        element.kind = CandidateKind::SetElement;
        let scope = build_scope(
            &mut ctx,
            ScopeParams::root("root").with_seeds(vec![element]),
        );
        let origin = ctx.table.names.fqn("m.site");
        let request = Request::new(&ctx.table, int_ty, origin);
        assert!(gather_candidates(&mut ctx, scope, &request).is_empty());
        assert_eq!(gather_list_elements(&mut ctx, scope, &request).len(), 1);
    }

    // ============================================================
    // Spreading
    // ============================================================

    /// World: tag `Tagged`, rule `wrap<spread T : @Tagged Any>(): Wrapper<T>`,
    /// two concrete candidates, one tagged, one not.
    #[test]
    fn test_spread_rule_fires_per_matching_type() {
        let mut ctx = ctx();
        let tag = ctx.table.add_classifier(ClassifierDecl {
            flags: ClassifierFlags::TAG,
            ..ClassifierDecl::simple("m.Tagged", "m")
        });
        let tag_ty = ctx.table.default_ty(tag);
        let any_tagged = ctx.table.nullable_any().with_tags(vec![tag_ty.clone()]);
        let spread_t = ctx.table.add_classifier(ClassifierDecl {
            supertypes: vec![any_tagged],
            flags: ClassifierFlags::TYPE_PARAMETER | ClassifierFlags::SPREAD,
            ..ClassifierDecl::simple("m.wrap.T", "m")
        });

        let any = ctx.table.nullable_any();
        let wrapper_p = ctx.table.add_type_param("m.Wrapper.P", vec![any]);
        let wrapper = ctx.table.add_classifier(ClassifierDecl {
            type_params: vec![wrapper_p],
            variances: vec![crate::types::Variance::Invariant],
            ..ClassifierDecl::simple("m.Wrapper", "m")
        });

        let rule_ty = Ty::new(wrapper, vec![ctx.table.default_ty(spread_t)]);
        let mut rule = producer(&mut ctx.table, "m.wrap", rule_ty);
        rule.type_params = vec![spread_t];

        let int = ctx.table.add_classifier(ClassifierDecl::simple("m.Int", "m"));
        let str_ = ctx.table.add_classifier(ClassifierDecl::simple("m.Str", "m"));
        let tagged_int = ctx.table.default_ty(int).with_tags(vec![tag_ty]);
        let plain_str = ctx.table.default_ty(str_);
        let tagged_seed = producer(&mut ctx.table, "m.taggedInt", tagged_int.clone());
        let plain_seed = producer(&mut ctx.table, "m.plainStr", plain_str);

        let scope = build_scope(
            &mut ctx,
            ScopeParams::root("root").with_seeds(vec![rule, tagged_seed, plain_seed]),
        );

        let origin = ctx.table.names.fqn("m.site");
        let wrapped = Ty::new(wrapper, vec![tagged_int]);
        let request = Request::new(&ctx.table, wrapped, origin);
        let found = gather_candidates(&mut ctx, scope, &request);
        assert_eq!(found.len(), 1, "rule fires exactly once for the tagged type");

        // The untagged type produced no wrapper.
        let str_ty = ctx.table.default_ty(str_);
        let unwanted = Ty::new(wrapper, vec![str_ty]);
        let request = Request::new(&ctx.table, unwanted, origin);
        assert!(gather_candidates(&mut ctx, scope, &request).is_empty());
    }

    /// A rule whose output satisfies its own constraint must not re-trigger
    /// on that output.
    #[test]
    fn test_spread_guard_stops_self_retrigger() {
        let mut ctx = ctx();
        let any = ctx.table.nullable_any();
        let spread_t = ctx.table.add_classifier(ClassifierDecl {
            supertypes: vec![any.clone()],
            flags: ClassifierFlags::TYPE_PARAMETER | ClassifierFlags::SPREAD,
            ..ClassifierDecl::simple("m.wrap.T", "m")
        });
        let wrapper_p = ctx.table.add_type_param("m.Wrapper.P", vec![any]);
        let wrapper = ctx.table.add_classifier(ClassifierDecl {
            type_params: vec![wrapper_p],
            variances: vec![crate::types::Variance::Invariant],
            ..ClassifierDecl::simple("m.Wrapper", "m")
        });
        let rule_ty = Ty::new(wrapper, vec![ctx.table.default_ty(spread_t)]);
        let mut rule = producer(&mut ctx.table, "m.wrap", rule_ty);
        rule.type_params = vec![spread_t];

        let int = ctx.table.add_classifier(ClassifierDecl::simple("m.Int", "m"));
        let int_ty = ctx.table.default_ty(int);
        let seed = producer(&mut ctx.table, "m.int", int_ty);

        // Unconstrained rule matches everything; without the result-key
        // guard this would wrap its own wrappers forever.
        let scope = build_scope(
            &mut ctx,
            ScopeParams::root("root").with_seeds(vec![rule, seed]),
        );
        let wrapper_count = ctx
            .scope(scope)
            .candidates
            .iter()
            .filter(|c| c.ty.classifier() == wrapper)
            .count();
        assert_eq!(wrapper_count, 1);
    }

    // ============================================================
    // Type scopes
    // ============================================================

    #[test]
    fn test_type_scope_exposes_companion_members() {
        let mut ctx = ctx();
        let db = ctx.table.add_classifier(ClassifierDecl::simple("ext.Db", "ext"));
        let db_ty = ctx.table.default_ty(db);
        let member = producer(&mut ctx.table, "ext.Db.default", db_ty.clone());
        ctx.store.add_member(db, member);

        let scope = build_scope(&mut ctx, ScopeParams::root("root"));
        let origin = ctx.table.names.fqn("m.site");
        let request = Request::new(&ctx.table, db_ty, origin);
        let found = gather_candidates(&mut ctx, scope, &request);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_type_scope_nearer_module_shadows() {
        let mut ctx = ctx();
        let current = ctx.table.names.module("app");
        ctx.store.set_current_module(current);

        let db = ctx.table.add_classifier(ClassifierDecl::simple("ext.Db", "ext"));
        let db_ty = ctx.table.default_ty(db);
        let mut ext_member = producer(&mut ctx.table, "ext.Db.default", db_ty.clone());
        ext_member.module = ctx.table.names.module("ext");
        let mut app_member = producer(&mut ctx.table, "app.Db.local", db_ty.clone());
        app_member.module = current;
        ctx.store.add_member(db, ext_member);
        ctx.store.add_member(db, app_member);

        let scope = build_scope(&mut ctx, ScopeParams::root("root"));
        let origin = ctx.table.names.fqn("app.site");
        let request = Request::new(&ctx.table, db_ty, origin);
        let found = gather_candidates(&mut ctx, scope, &request);
        assert_eq!(found.len(), 2);
        let app_fqn = ctx.table.names.fqn("app.Db.local");
        let nearest = found.iter().min_by_key(|c| c.distance).unwrap();
        assert_eq!(nearest.callable.fqn, app_fqn);
    }
}
