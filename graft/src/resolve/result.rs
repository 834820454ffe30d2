//! The resolution-result taxonomy.
//!
//! Every outcome is data. Failures carry enough structure to render a full
//! dependency-chain diagnostic without re-running resolution.

use crate::fqn::Fqn;
use crate::injectables::{CallContext, Callable, Request};
use crate::types::Ty;

/// Outcome of resolving one request.
#[derive(Debug, Clone)]
pub enum ResolutionResult {
    Success(Success),
    Failure(Failure),
}

impl ResolutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ResolutionResult::Success(_))
    }

    pub fn request(&self) -> &Request {
        match self {
            ResolutionResult::Success(s) => &s.request,
            ResolutionResult::Failure(f) => &f.request,
        }
    }

    /// Whether this result depends on the in-flight candidate chain it was
    /// computed under. Chain-dependent results must not be memoized: the
    /// same request resolved under a different chain can legitimately come
    /// out differently.
    pub fn chain_dependent(&self) -> bool {
        match self {
            ResolutionResult::Success(s) => {
                s.kind == SuccessKind::Deferred
                    || s.dependencies.iter().any(ResolutionResult::chain_dependent)
            }
            ResolutionResult::Failure(f) => f.chain_dependent(),
        }
    }
}

/// A fully-dependency-resolved pick.
#[derive(Debug, Clone)]
pub struct Success {
    pub request: Request,
    /// The chosen candidate; absent for synthetic successes.
    pub candidate: Option<Candidate>,
    /// One result per sub-request, in parameter order.
    pub dependencies: Vec<ResolutionResult>,
    pub kind: SuccessKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessKind {
    /// A candidate was picked and its dependencies resolved.
    Candidate,
    /// A non-required request failed and fell back to its declared default.
    DefaultValue,
    /// Resolution of the value is deferred behind a provider boundary; the
    /// cycle this request would otherwise form is broken at runtime.
    Deferred,
}

/// A candidate as seen by ranking and by diagnostics.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub callable: Callable,
    /// Scope hops from the requesting scope to the declaring one.
    pub distance: usize,
    pub source: CandidateSource,
    /// Structure of a framework-synthesized candidate.
    pub framework: Option<FrameworkPayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// Declared in user source.
    User,
    /// Synthesized structurally from the requested type.
    Framework,
}

/// What a framework candidate resolves to.
#[derive(Debug, Clone)]
pub enum FrameworkPayload {
    /// A function-type request: the single dependency is the return type,
    /// resolved in a child scope seeded with the parameter types.
    Provider {
        inner: Request,
        seeds: Vec<Callable>,
    },
    /// A collection request: one dependency per matching element.
    List { elements: Vec<Candidate> },
    /// Per-declared-type identity token; dependency-free.
    TypeKey,
    /// Source-location token; dependency-free.
    SourceKey,
}

/// A request that could not be resolved.
#[derive(Debug, Clone)]
pub struct Failure {
    pub request: Request,
    pub kind: FailureKind,
}

impl Failure {
    fn chain_dependent(&self) -> bool {
        match &self.kind {
            FailureKind::DivergentCandidate { .. } => true,
            FailureKind::DependencyFailure { nested, .. } => nested.chain_dependent(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FailureKind {
    /// No visible candidate produces the requested type.
    NoCandidates,
    /// Several equally-ranked candidates resolved; carries all of them.
    CandidateAmbiguity(Vec<Candidate>),
    /// The candidate's call context is incompatible with the requester's.
    CallContextMismatch {
        expected: CallContext,
        found: CallContext,
    },
    /// Picking the candidate would re-enter an in-flight resolution of the
    /// same origin with a no-larger type; carries the chain that formed the
    /// cycle.
    DivergentCandidate { chain: Vec<ChainEntry> },
    /// A dependency of an otherwise-viable candidate failed.
    DependencyFailure {
        candidate: Box<Candidate>,
        nested: Box<Failure>,
    },
}

/// One in-flight pick on the resolution chain.
#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub origin: Fqn,
    pub ty: Ty,
    /// Entered through a provider boundary; a later divergence match behind
    /// it is deferrable instead of fatal.
    pub lazy: bool,
}
