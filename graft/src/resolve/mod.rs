//! The resolution algorithm.
//!
//! [`Resolver::resolve_requests`] turns a list of top-level requests into a
//! [`ResolutionGraph`]: every request becomes either a fully-dependency-
//! resolved success or a structured failure. All independent failures are
//! collected; resolution never stops at the first.
//!
//! Termination rests on two mechanisms. The in-flight chain rejects a
//! candidate whose origin is already being resolved for a structurally
//! no-larger type (divergence), and exhaustive memoization makes shared
//! sub-graphs resolve once. A divergence match that sits behind a provider
//! boundary is not fatal: the value can be produced lazily at runtime, so
//! the request succeeds as deferred.

pub mod rank;
pub mod result;

use tracing::{debug, trace};

use crate::ctx::{Cancelled, ResolutionCtx};
use crate::fqn::Fqn;
use crate::graph::ResolutionGraph;
use crate::injectables::{
    CallContext, Callable, CandidateKind, Param, Request, Visibility,
};
use crate::scope::{build_scope, gather_candidates, gather_list_elements, static_params, ScopeId, ScopeParams};
use crate::types::{Ty, TySubst, BUILTIN_MODULE};

use result::{
    Candidate, CandidateSource, ChainEntry, Failure, FailureKind, FrameworkPayload,
    ResolutionResult, Success, SuccessKind,
};

/// Drives resolution for one batch of requests.
pub struct Resolver<'c> {
    ctx: &'c mut ResolutionCtx,
    /// In-flight candidate picks, outermost first.
    chain: Vec<ChainEntry>,
}

impl<'c> Resolver<'c> {
    pub fn new(ctx: &'c mut ResolutionCtx) -> Self {
        Self {
            ctx,
            chain: Vec::new(),
        }
    }

    /// Resolve every request against `scope`, collecting all independent
    /// failures into one graph.
    pub fn resolve_requests(
        &mut self,
        scope: ScopeId,
        requests: &[Request],
    ) -> Result<ResolutionGraph, Cancelled> {
        let mut bindings = indexmap::IndexMap::new();
        let mut failures: indexmap::IndexMap<String, Vec<Failure>> = indexmap::IndexMap::new();
        for request in requests {
            match self.resolve_request(scope, request)? {
                ResolutionResult::Success(success) => {
                    bindings.insert(request.key.clone(), success);
                }
                ResolutionResult::Failure(failure) => {
                    failures
                        .entry(request.key.clone())
                        .or_default()
                        .push(failure);
                }
            }
        }
        if failures.is_empty() {
            Ok(ResolutionGraph::Success {
                root_scope: scope,
                bindings,
            })
        } else {
            Ok(ResolutionGraph::Error { failures })
        }
    }

    /// Resolve one request: memo check, candidate gathering, ranking, then
    /// candidate resolution.
    pub fn resolve_request(
        &mut self,
        scope: ScopeId,
        request: &Request,
    ) -> Result<ResolutionResult, Cancelled> {
        self.ctx.check_cancelled()?;
        let statics = static_params(self.ctx, scope);
        let memo_key = (scope, request.memo_key(&statics));
        if let Some(cached) = self.ctx.result_cache.get(&memo_key) {
            trace!(requested = %request.ty.display(&self.ctx.table), "memoized result");
            return Ok(cached.clone());
        }

        let mut candidates: Vec<Candidate> =
            gather_candidates(self.ctx, scope, request).as_ref().clone();
        candidates.extend(self.framework_candidates(scope, request));
        debug!(
            requested = %request.ty.display(&self.ctx.table),
            candidates = candidates.len(),
            "resolving request"
        );

        let result = match candidates.len() {
            0 => ResolutionResult::Failure(Failure {
                request: request.clone(),
                kind: FailureKind::NoCandidates,
            }),
            1 => self.resolve_candidate(scope, request, &candidates[0])?,
            _ => {
                let maximal: Vec<Candidate> = rank::find_maximal(&self.ctx.table, &candidates)
                    .into_iter()
                    .cloned()
                    .collect();
                if maximal.len() == 1 {
                    self.resolve_candidate(scope, request, &maximal[0])?
                } else {
                    self.resolve_tied(scope, request, &maximal)?
                }
            }
        };

        if !result.chain_dependent() {
            self.ctx.result_cache.insert(memo_key, result.clone());
        }
        Ok(result)
    }

    /// Several candidates survived ranking: resolve each; exactly one
    /// success wins, more than one is an ambiguity, none propagates the
    /// first failure.
    fn resolve_tied(
        &mut self,
        scope: ScopeId,
        request: &Request,
        tied: &[Candidate],
    ) -> Result<ResolutionResult, Cancelled> {
        let mut successes: Vec<(Candidate, Success)> = Vec::new();
        let mut first_failure: Option<Failure> = None;
        for candidate in tied {
            match self.resolve_candidate(scope, request, candidate)? {
                ResolutionResult::Success(s) => successes.push((candidate.clone(), s)),
                ResolutionResult::Failure(f) => {
                    first_failure.get_or_insert(f);
                }
            }
        }
        Ok(match successes.len() {
            1 => ResolutionResult::Success(successes.pop().expect("len checked").1),
            0 => ResolutionResult::Failure(first_failure.unwrap_or(Failure {
                request: request.clone(),
                kind: FailureKind::NoCandidates,
            })),
            _ => ResolutionResult::Failure(Failure {
                request: request.clone(),
                kind: FailureKind::CandidateAmbiguity(
                    successes.into_iter().map(|(c, _)| c).collect(),
                ),
            }),
        })
    }

    /// Candidates synthesized structurally from the requested type rather
    /// than gathered from declarations.
    fn framework_candidates(&mut self, scope: ScopeId, request: &Request) -> Vec<Candidate> {
        let ty = &request.ty;
        if !ty.tags().is_empty() || ty.framework_key().is_some() {
            return Vec::new();
        }
        let classifier = ty.classifier();
        let mut out = Vec::new();

        if let Some(arity) = self.ctx.table.function_arity(classifier) {
            let params = &ty.arguments()[..arity];
            let return_ty = ty.arguments()[arity].clone();
            let seeds: Vec<Callable> = params
                .iter()
                .map(|param_ty| {
                    let key = self.ctx.fresh_framework_key();
                    self.synthesize(
                        "graft.provider.param",
                        param_ty.with_framework_key(key),
                        request.origin,
                    )
                })
                .collect();
            let inner = Request::new(&self.ctx.table, return_ty, request.origin);
            out.push(Candidate {
                callable: self.synthesize("graft.provider", ty.clone(), request.origin),
                distance: 0,
                source: CandidateSource::Framework,
                framework: Some(FrameworkPayload::Provider { inner, seeds }),
            });
        }

        if classifier == self.ctx.table.list && !ty.arguments().is_empty() {
            let element_ty = ty.arguments()[0].clone();
            let element_request = Request::new(&self.ctx.table, element_ty, request.origin);
            let elements = gather_list_elements(self.ctx, scope, &element_request);
            // An empty aggregation is no candidate at all.
            if !elements.is_empty() {
                out.push(Candidate {
                    callable: self.synthesize("graft.list", ty.clone(), request.origin),
                    distance: 0,
                    source: CandidateSource::Framework,
                    framework: Some(FrameworkPayload::List { elements }),
                });
            }
        }

        if classifier == self.ctx.table.type_key {
            out.push(Candidate {
                callable: self.synthesize("graft.typeKey", ty.clone(), request.origin),
                distance: 0,
                source: CandidateSource::Framework,
                framework: Some(FrameworkPayload::TypeKey),
            });
        }
        if classifier == self.ctx.table.source_key {
            out.push(Candidate {
                callable: self.synthesize("graft.sourceKey", ty.clone(), request.origin),
                distance: 0,
                source: CandidateSource::Framework,
                framework: Some(FrameworkPayload::SourceKey),
            });
        }
        out
    }

    fn synthesize(&mut self, name: &str, ty: Ty, _origin: Fqn) -> Callable {
        Callable {
            id: self.ctx.fresh_callable_id(),
            fqn: self.ctx.table.names.fqn(name),
            original_ty: ty.clone(),
            ty,
            type_params: Vec::new(),
            parameters: Vec::new(),
            type_args: TySubst::default(),
            call_context: CallContext::Default,
            kind: CandidateKind::Value,
            visibility: Visibility::Public,
            module: self.ctx.table.names.module(BUILTIN_MODULE),
            chain_key: name.into(),
            is_object: false,
            source_import: None,
        }
    }

    /// Resolve one picked candidate: call-context gate, divergence check,
    /// then recursive dependency resolution in the candidate's dependency
    /// scope.
    fn resolve_candidate(
        &mut self,
        scope: ScopeId,
        request: &Request,
        candidate: &Candidate,
    ) -> Result<ResolutionResult, Cancelled> {
        self.ctx.check_cancelled()?;

        let caller = self.ctx.scope(scope).call_context;
        if !caller.can_call(candidate.callable.call_context) {
            return Ok(ResolutionResult::Failure(Failure {
                request: request.clone(),
                kind: FailureKind::CallContextMismatch {
                    expected: caller,
                    found: candidate.callable.call_context,
                },
            }));
        }

        if let Some(index) = self.divergence_match(candidate, request) {
            // A provider boundary after the earlier entry makes the cycle
            // resolvable at runtime.
            let behind_lazy = self.chain[index + 1..].iter().any(|e| e.lazy);
            if behind_lazy {
                return Ok(ResolutionResult::Success(Success {
                    request: request.clone(),
                    candidate: Some(candidate.clone()),
                    dependencies: Vec::new(),
                    kind: SuccessKind::Deferred,
                }));
            }
            let mut chain = self.chain.clone();
            chain.push(ChainEntry {
                origin: candidate.callable.fqn,
                ty: request.ty.clone(),
                lazy: false,
            });
            return Ok(ResolutionResult::Failure(Failure {
                request: request.clone(),
                kind: FailureKind::DivergentCandidate { chain },
            }));
        }

        if let Some(cached) = self
            .ctx
            .candidate_results
            .get(&(scope, candidate.callable.id))
        {
            return Ok(cached.clone());
        }

        self.chain.push(ChainEntry {
            origin: candidate.callable.fqn,
            ty: request.ty.clone(),
            lazy: false,
        });
        let result = self.resolve_candidate_body(scope, request, candidate);
        self.chain.pop();
        let result = result?;

        if !result.chain_dependent() {
            self.ctx
                .candidate_results
                .insert((scope, candidate.callable.id), result.clone());
        }
        Ok(result)
    }

    fn resolve_candidate_body(
        &mut self,
        scope: ScopeId,
        request: &Request,
        candidate: &Candidate,
    ) -> Result<ResolutionResult, Cancelled> {
        match &candidate.framework {
            Some(FrameworkPayload::Provider { inner, seeds }) => {
                self.chain
                    .last_mut()
                    .expect("entry pushed by resolve_candidate")
                    .lazy = true;
                let child = build_scope(
                    self.ctx,
                    ScopeParams::child("provider", scope).with_seeds(seeds.clone()),
                );
                let dep = self.resolve_request(child, inner)?;
                Ok(self.close(request, candidate, vec![dep]))
            }
            Some(FrameworkPayload::List { elements }) => {
                let element_ty = request.ty.arguments()[0].clone();
                let element_request =
                    Request::new(&self.ctx.table, element_ty, request.origin);
                let mut deps = Vec::with_capacity(elements.len());
                for element in elements.clone() {
                    let dep = self.resolve_candidate(scope, &element_request, &element)?;
                    deps.push(dep);
                }
                Ok(self.close(request, candidate, deps))
            }
            Some(FrameworkPayload::TypeKey) | Some(FrameworkPayload::SourceKey) => {
                Ok(ResolutionResult::Success(Success {
                    request: request.clone(),
                    candidate: Some(candidate.clone()),
                    dependencies: Vec::new(),
                    kind: SuccessKind::Candidate,
                }))
            }
            None => {
                let sub_requests = candidate.callable.requests(&self.ctx.table);
                let child = self.dependency_scope(scope, &candidate.callable);
                let mut deps = Vec::with_capacity(sub_requests.len());
                for sub in sub_requests {
                    let resolved = self.resolve_request(child, &sub)?;
                    let resolved = match resolved {
                        ResolutionResult::Failure(_) if !sub.required => {
                            // Declared fallback recovers the failure in
                            // place.
                            ResolutionResult::Success(Success {
                                request: sub.clone(),
                                candidate: None,
                                dependencies: Vec::new(),
                                kind: SuccessKind::DefaultValue,
                            })
                        }
                        other => other,
                    };
                    deps.push(resolved);
                }
                Ok(self.close(request, candidate, deps))
            }
        }
    }

    /// Fold dependency results into the candidate's own result: the first
    /// failed dependency fails the candidate, preserving the nested chain.
    fn close(
        &self,
        request: &Request,
        candidate: &Candidate,
        dependencies: Vec<ResolutionResult>,
    ) -> ResolutionResult {
        if let Some(ResolutionResult::Failure(nested)) = dependencies
            .iter()
            .find(|d| matches!(d, ResolutionResult::Failure(_)))
        {
            return ResolutionResult::Failure(Failure {
                request: request.clone(),
                kind: FailureKind::DependencyFailure {
                    candidate: Box::new(candidate.clone()),
                    nested: Box::new(nested.clone()),
                },
            });
        }
        ResolutionResult::Success(Success {
            request: request.clone(),
            candidate: Some(candidate.clone()),
            dependencies,
            kind: SuccessKind::Candidate,
        })
    }

    /// The scope a candidate's sub-requests resolve in: a child seeded with
    /// the candidate's caller-supplied (non-request) parameters, or the
    /// enclosing scope when there are none.
    fn dependency_scope(&mut self, scope: ScopeId, callable: &Callable) -> ScopeId {
        let supplied: Vec<Param> = callable
            .parameters
            .iter()
            .filter(|p| !p.is_request)
            .cloned()
            .collect();
        if supplied.is_empty() {
            return scope;
        }
        // Each instantiation of a generic candidate seeds its own scope;
        // the produced-type key keeps the fixed type arguments apart.
        let owner_path = format!(
            "{}|{}",
            self.ctx.table.names.resolve_fqn(callable.fqn),
            callable.ty.canonical_key(&self.ctx.table)
        );
        let owner = self.ctx.table.names.fqn(&owner_path);
        let seeds: Vec<Callable> = supplied
            .into_iter()
            .map(|param| {
                let key = self.ctx.fresh_framework_key();
                let name = format!(
                    "{}.{}",
                    self.ctx.table.names.resolve_fqn(callable.fqn).to_owned(),
                    param.name
                );
                self.synthesize(&name, param.ty.with_framework_key(key), callable.fqn)
            })
            .collect();
        build_scope(
            self.ctx,
            ScopeParams::child("deps", scope)
                .with_owner(owner)
                .with_seeds(seeds),
        )
    }

    /// An earlier in-flight entry with the same origin whose requested type
    /// is structurally no larger: same covering classifier set and no more
    /// type-argument nodes.
    fn divergence_match(&self, candidate: &Candidate, request: &Request) -> Option<usize> {
        self.chain.iter().position(|entry| {
            entry.origin == candidate.callable.fqn
                && entry.ty.classifier_set() == request.ty.classifier_set()
                && entry.ty.argument_count() <= request.ty.argument_count()
        })
    }
}
