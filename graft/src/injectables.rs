//! Candidate declarations ("injectables") and requests.
//!
//! A [`Callable`] is a producer the resolver can pick: a function, property,
//! constructor or parameter able to synthesize a value of its produced type.
//! Callables are immutable; fixing type arguments builds a substituted copy.

use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::fqn::{Fqn, ModuleName};
use crate::types::{ClassifierFlags, ClassifierId, ClassifierTable, Ty, TySubst};

/// Unique id of a callable within one run. Substituted copies get fresh ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallableId(pub u32);

/// What a producer contributes when collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// Produces one value of its type.
    Value,
    /// Produces one element of a collection; only reachable through
    /// collection aggregation, never picked for a plain request.
    SetElement,
    /// A module-like producer whose return type's members are themselves
    /// candidates; expanded recursively at collection time.
    Group,
}

/// The calling environment a candidate requires, and a requester provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallContext {
    /// Unrestricted requester; accepts any candidate.
    #[default]
    Default,
    Sync,
    Suspend,
    Effectful,
}

impl CallContext {
    /// Whether a requester in `self` may invoke a candidate declared with
    /// `candidate`. `Sync` and `Default` candidates are callable anywhere;
    /// anything else must match exactly.
    pub fn can_call(self, candidate: CallContext) -> bool {
        if self == CallContext::Default {
            return true;
        }
        matches!(candidate, CallContext::Default | CallContext::Sync) || candidate == self
    }
}

/// Declared visibility of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    /// Visible only to requesters in the same module.
    Internal,
    /// Visible only to requesters inside the declaring scope.
    Private,
}

impl Visibility {
    pub fn visible_from(self, requester: ModuleName, declaring: ModuleName) -> bool {
        match self {
            Visibility::Public => true,
            Visibility::Internal | Visibility::Private => requester == declaring,
        }
    }
}

/// One declared parameter of a callable.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
    /// Whether this parameter is itself resolved as a sub-request.
    pub is_request: bool,
    /// Whether the declaration provides a fallback value.
    pub has_default: bool,
}

/// A producer declaration.
#[derive(Debug, Clone)]
pub struct Callable {
    pub id: CallableId,
    pub fqn: Fqn,
    /// Produced type after applying `type_args`.
    pub ty: Ty,
    /// Produced type as declared, before any substitution.
    pub original_ty: Ty,
    pub type_params: Vec<ClassifierId>,
    pub parameters: Vec<Param>,
    /// Fixed type arguments; total over `type_params` once fixed by the
    /// solver.
    pub type_args: TySubst,
    pub call_context: CallContext,
    pub kind: CandidateKind,
    pub visibility: Visibility,
    pub module: ModuleName,
    /// Identity of the path this callable was collected through; collection
    /// aggregation dedups by it so one producer seen through two import
    /// paths counts once.
    pub chain_key: Rc<str>,
    /// Singleton/object producer; wins ranking outright.
    pub is_object: bool,
    /// Index of the import directive that introduced this callable, when it
    /// arrived through one.
    pub source_import: Option<usize>,
}

impl Callable {
    /// Type parameters not yet fixed by `type_args`.
    pub fn free_type_params(&self) -> Vec<ClassifierId> {
        self.type_params
            .iter()
            .copied()
            .filter(|p| !self.type_args.contains_key(p))
            .collect()
    }

    /// A copy with `subst` folded into the fixed type arguments and applied
    /// to the produced and parameter types. `id` must be fresh.
    pub fn substituted(&self, id: CallableId, subst: &TySubst) -> Callable {
        let mut type_args = self.type_args.clone();
        for (&param, ty) in subst {
            type_args.entry(param).or_insert_with(|| ty.clone());
        }
        Callable {
            id,
            ty: self.ty.substitute(subst),
            parameters: self
                .parameters
                .iter()
                .map(|p| Param {
                    ty: p.ty.substitute(subst),
                    ..p.clone()
                })
                .collect(),
            type_args,
            ..self.clone()
        }
    }

    /// Whether any of this callable's type parameters is a spread marker.
    pub fn is_spread(&self, table: &ClassifierTable) -> bool {
        self.type_params
            .iter()
            .any(|&p| table.classifier(p).flags.contains(ClassifierFlags::SPREAD))
    }

    /// The sub-requests this callable needs resolved before it can produce.
    pub fn requests(&self, table: &ClassifierTable) -> Vec<Request> {
        self.parameters
            .iter()
            .filter(|p| p.is_request)
            .map(|p| Request {
                key: p.ty.canonical_key(table),
                ty: p.ty.clone(),
                origin: self.fqn,
                required: !p.has_default,
                inlineable: false,
            })
            .collect()
    }
}

/// One thing the resolver is asked to produce.
#[derive(Debug, Clone)]
pub struct Request {
    pub ty: Ty,
    /// Fully-qualified name of the requesting declaration or parameter.
    pub origin: Fqn,
    /// A non-required request downgrades failure to a default-value success.
    pub required: bool,
    pub inlineable: bool,
    /// Canonical form of `ty`; deduplication identity. Extended with the
    /// requester's static type parameters by the memo layer.
    pub key: String,
}

impl Request {
    pub fn new(table: &ClassifierTable, ty: Ty, origin: Fqn) -> Self {
        Self {
            key: ty.canonical_key(table),
            ty,
            origin,
            required: true,
            inlineable: false,
        }
    }

    pub fn optional(table: &ClassifierTable, ty: Ty, origin: Fqn) -> Self {
        Self {
            required: false,
            ..Self::new(table, ty, origin)
        }
    }

    /// Memoization key: canonical type plus the static type parameters
    /// ambient at the requesting scope.
    pub fn memo_key(&self, static_params: &FxHashSet<ClassifierId>) -> String {
        if static_params.is_empty() {
            return self.key.clone();
        }
        let mut params: Vec<u32> = static_params.iter().map(|p| p.0).collect();
        params.sort_unstable();
        let mut key = self.key.clone();
        key.push('|');
        for p in params {
            use std::fmt::Write as _;
            let _ = write!(key, "{p},");
        }
        key
    }
}
