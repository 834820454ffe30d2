//! Type-directed declaration resolution.
//!
//! Given a requested type and a chain of lexical scopes, the engine finds
//! the best-matching producer declarations able to synthesize a value of
//! that type, recursively resolving their dependencies while honoring
//! visibility, call context, generic unification, and cycle and ambiguity
//! detection.
//!
//! The embedding compiler front end loads declarations into a
//! [`store::DeclarationStore`], registers classifiers in a
//! [`types::ClassifierTable`], builds the scope chain with
//! [`scope::build_scope`], and drives [`resolve::Resolver`] per batch of
//! requests:
//!
//! ```ignore
//! use graft::ctx::ResolutionCtx;
//! use graft::resolve::Resolver;
//! use graft::scope::{build_scope, ScopeParams};
//!
//! let mut ctx = ResolutionCtx::new(table, store);
//! let root = build_scope(&mut ctx, ScopeParams::root("file").with_seeds(seeds));
//! let graph = Resolver::new(&mut ctx).resolve_requests(root, &requests)?;
//! ```
//!
//! Everything is a library call per compiled position; there is no CLI or
//! wire surface. One [`ctx::ResolutionCtx`] is single-threaded and owns all
//! per-run state, so separate compilation units can run on separate
//! contexts concurrently.

pub mod ctx;
pub mod fqn;
pub mod graph;
pub mod imports;
pub mod injectables;
pub mod resolve;
pub mod scope;
pub mod solver;
pub mod store;
pub mod types;

pub use ctx::{CancellationToken, Cancelled, ResolutionCtx};
pub use fqn::{Fqn, ModuleName, NameTable};
pub use graph::{render_failure, ResolutionGraph};
pub use injectables::{CallContext, Callable, CandidateKind, Request, Visibility};
pub use resolve::result::{Failure, FailureKind, ResolutionResult, Success, SuccessKind};
pub use resolve::Resolver;
pub use scope::{build_scope, ScopeId, ScopeParams};
pub use store::DeclarationStore;
pub use types::{ClassifierDecl, ClassifierId, ClassifierTable, Ty, Variance};
