//! The type model.
//!
//! Types are immutable value graphs: a [`Ty`] is a cheap-clone handle to a
//! classifier reference, ordered type arguments, nullability, a use-site
//! variance projection, tag wrappers, and an optional framework key used to
//! keep independently synthesized instances of an otherwise identical type
//! distinct.
//!
//! Classifiers (named types, type parameters, type aliases, tag wrappers)
//! live in an arena [`ClassifierTable`] and are referenced by id. Two
//! classifiers are the same iff their fully-qualified names are.

mod substitute;
mod subtype;

pub use substitute::TySubst;

use std::rc::Rc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::fqn::{Fqn, ModuleName, NameTable};

/// Index of a classifier in the [`ClassifierTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassifierId(pub u32);

/// Declaration-site variance of a type parameter, or the use-site
/// projection of a type argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variance {
    #[default]
    Invariant,
    /// Covariant (`out`).
    Out,
    /// Contravariant (`in`).
    In,
}

bitflags! {
    /// Kind flags of a classifier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassifierFlags: u8 {
        /// A type parameter rather than a named type.
        const TYPE_PARAMETER = 1 << 0;
        /// An object/singleton declaration.
        const OBJECT = 1 << 1;
        /// A transparent type alias; `supertypes[0]` is the expansion.
        const TYPE_ALIAS = 1 << 2;
        /// A tag wrapper used as a type-level marker.
        const TAG = 1 << 3;
        /// A type parameter marked to spread: it matches any type
        /// satisfying its tag constraint and triggers candidate expansion.
        const SPREAD = 1 << 4;
        /// A type parameter carrying an injectable/given constraint.
        const PROVIDE = 1 << 5;
    }
}

/// A named type, type parameter, type alias or tag wrapper.
#[derive(Debug, Clone)]
pub struct Classifier {
    pub id: ClassifierId,
    pub fqn: Fqn,
    pub module: ModuleName,
    /// Declared type parameters, themselves classifiers flagged
    /// `TYPE_PARAMETER`.
    pub type_params: Vec<ClassifierId>,
    /// Declared variance per type parameter; parallel to `type_params`.
    pub variances: Vec<Variance>,
    /// Direct supertypes. For a type parameter these are its upper bounds;
    /// for a type alias the single expansion.
    pub supertypes: Vec<Ty>,
    pub flags: ClassifierFlags,
}

impl Classifier {
    pub fn is_type_parameter(&self) -> bool {
        self.flags.contains(ClassifierFlags::TYPE_PARAMETER)
    }

    pub fn is_object(&self) -> bool {
        self.flags.contains(ClassifierFlags::OBJECT)
    }

    pub fn is_type_alias(&self) -> bool {
        self.flags.contains(ClassifierFlags::TYPE_ALIAS)
    }

    pub fn is_tag(&self) -> bool {
        self.flags.contains(ClassifierFlags::TAG)
    }

    pub fn is_spread(&self) -> bool {
        self.flags.contains(ClassifierFlags::SPREAD)
    }
}

/// Everything needed to register a classifier.
#[derive(Debug, Clone)]
pub struct ClassifierDecl {
    pub name: String,
    pub module: String,
    pub type_params: Vec<ClassifierId>,
    pub variances: Vec<Variance>,
    pub supertypes: Vec<Ty>,
    pub flags: ClassifierFlags,
}

impl ClassifierDecl {
    /// A plain classifier with no type parameters or supertypes.
    pub fn simple(name: &str, module: &str) -> Self {
        Self {
            name: name.to_string(),
            module: module.to_string(),
            type_params: Vec::new(),
            variances: Vec::new(),
            supertypes: Vec::new(),
            flags: ClassifierFlags::empty(),
        }
    }
}

/// Arena of all classifiers known to one engine run, plus the builtin
/// classifiers the resolver synthesizes candidates for.
#[derive(Debug)]
pub struct ClassifierTable {
    pub names: NameTable,
    classifiers: Vec<Classifier>,
    by_fqn: FxHashMap<Fqn, ClassifierId>,
    /// Function classifiers by arity, synthesized on demand.
    functions: FxHashMap<usize, ClassifierId>,

    /// Top type (`Any`); its nullable form is the supertype of everything.
    pub any: ClassifierId,
    /// Bottom type; subtype of everything.
    pub nothing: ClassifierId,
    /// Collection classifier subject to element aggregation.
    pub list: ClassifierId,
    /// Marker whose resolution produces a per-type identity token.
    pub type_key: ClassifierId,
    /// Marker whose resolution produces a source-location token.
    pub source_key: ClassifierId,
}

/// Module name used for everything the engine itself synthesizes.
pub const BUILTIN_MODULE: &str = "graft";

impl ClassifierTable {
    pub fn new() -> Self {
        let mut table = Self {
            names: NameTable::new(),
            classifiers: Vec::new(),
            by_fqn: FxHashMap::default(),
            functions: FxHashMap::default(),
            any: ClassifierId(0),
            nothing: ClassifierId(0),
            list: ClassifierId(0),
            type_key: ClassifierId(0),
            source_key: ClassifierId(0),
        };

        table.any = table.add_classifier(ClassifierDecl::simple("graft.Any", BUILTIN_MODULE));
        let any_ty = table.default_ty(table.any).with_nullable(true);
        table.nothing = table.add_classifier(ClassifierDecl {
            supertypes: vec![any_ty.clone()],
            ..ClassifierDecl::simple("graft.Nothing", BUILTIN_MODULE)
        });

        let list_e = table.add_type_param("graft.List.E", vec![any_ty.clone()]);
        table.list = table.add_classifier(ClassifierDecl {
            type_params: vec![list_e],
            variances: vec![Variance::Out],
            ..ClassifierDecl::simple("graft.List", BUILTIN_MODULE)
        });

        let key_t = table.add_type_param("graft.TypeKey.T", vec![any_ty]);
        table.type_key = table.add_classifier(ClassifierDecl {
            type_params: vec![key_t],
            variances: vec![Variance::Invariant],
            ..ClassifierDecl::simple("graft.TypeKey", BUILTIN_MODULE)
        });
        table.source_key =
            table.add_classifier(ClassifierDecl::simple("graft.SourceKey", BUILTIN_MODULE));

        table
    }

    /// Register a classifier. Re-registering the same fully-qualified name
    /// returns the existing id.
    pub fn add_classifier(&mut self, decl: ClassifierDecl) -> ClassifierId {
        let fqn = self.names.fqn(&decl.name);
        if let Some(&existing) = self.by_fqn.get(&fqn) {
            return existing;
        }
        debug_assert_eq!(decl.type_params.len(), decl.variances.len());
        let id = ClassifierId(self.classifiers.len() as u32);
        let module = self.names.module(&decl.module);
        self.classifiers.push(Classifier {
            id,
            fqn,
            module,
            type_params: decl.type_params,
            variances: decl.variances,
            supertypes: decl.supertypes,
            flags: decl.flags,
        });
        self.by_fqn.insert(fqn, id);
        id
    }

    /// Register a type parameter classifier with the given upper bounds.
    pub fn add_type_param(&mut self, name: &str, upper_bounds: Vec<Ty>) -> ClassifierId {
        self.add_classifier(ClassifierDecl {
            supertypes: upper_bounds,
            flags: ClassifierFlags::TYPE_PARAMETER,
            ..ClassifierDecl::simple(name, BUILTIN_MODULE)
        })
    }

    /// Late-bind supertypes, for mutually recursive hierarchies.
    pub fn set_supertypes(&mut self, id: ClassifierId, supertypes: Vec<Ty>) {
        self.classifiers[id.0 as usize].supertypes = supertypes;
    }

    pub fn classifier(&self, id: ClassifierId) -> &Classifier {
        &self.classifiers[id.0 as usize]
    }

    pub fn lookup(&self, fqn: Fqn) -> Option<ClassifierId> {
        self.by_fqn.get(&fqn).copied()
    }

    /// The classifier instantiated with its own type parameters as
    /// arguments (its declared form).
    pub fn default_ty(&self, id: ClassifierId) -> Ty {
        let args = self.classifier(id)
            .type_params
            .iter()
            .map(|&p| Ty::new(p, Vec::new()))
            .collect();
        Ty::new(id, args)
    }

    /// The function classifier of the given parameter arity. Its type
    /// arguments are the parameter types (contravariant) followed by the
    /// return type (covariant).
    pub fn function(&mut self, arity: usize) -> ClassifierId {
        if let Some(&id) = self.functions.get(&arity) {
            return id;
        }
        let any_ty = self.default_ty(self.any).with_nullable(true);
        let mut params = Vec::with_capacity(arity + 1);
        let mut variances = Vec::with_capacity(arity + 1);
        for i in 0..arity {
            params.push(self.add_type_param(
                &format!("graft.Function{arity}.P{i}"),
                vec![any_ty.clone()],
            ));
            variances.push(Variance::In);
        }
        params.push(self.add_type_param(
            &format!("graft.Function{arity}.R"),
            vec![any_ty],
        ));
        variances.push(Variance::Out);
        let id = self.add_classifier(ClassifierDecl {
            type_params: params,
            variances,
            ..ClassifierDecl::simple(&format!("graft.Function{arity}"), BUILTIN_MODULE)
        });
        self.functions.insert(arity, id);
        id
    }

    /// If `id` is a function classifier, its parameter arity.
    pub fn function_arity(&self, id: ClassifierId) -> Option<usize> {
        self.functions
            .iter()
            .find_map(|(&arity, &fid)| (fid == id).then_some(arity))
    }

    /// `Any?`, the universal top type.
    pub fn nullable_any(&self) -> Ty {
        self.default_ty(self.any).with_nullable(true)
    }

    /// `Nothing`, the bottom type.
    pub fn nothing_ty(&self) -> Ty {
        self.default_ty(self.nothing)
    }

    /// The unconstrained star projection.
    pub fn star(&self) -> Ty {
        Ty::new_star(self.any)
    }
}

impl Default for ClassifierTable {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable type node. Cloning is cheap; "mutation" always builds a new
/// node sharing unrelated substructure.
#[derive(Debug, Clone)]
pub struct Ty(Rc<TyData>);

#[derive(Debug)]
pub struct TyData {
    pub classifier: ClassifierId,
    pub arguments: Vec<Ty>,
    pub nullable: bool,
    /// Use-site projection of this node when it appears as an argument.
    pub variance: Variance,
    /// Tag wrappers applied to this type, outermost first. Tags are full
    /// types so their own (literal) arguments take part in comparison.
    pub tags: Vec<Ty>,
    /// Synthetic discriminator for independently synthesized instances of
    /// an otherwise identical type. Excluded from structural equality;
    /// consulted only by dedicated lookup keys.
    pub framework_key: Option<u64>,
    /// Star projection: matches any argument, compares equal only to
    /// another star.
    pub star: bool,
}

impl Ty {
    pub fn new(classifier: ClassifierId, arguments: Vec<Ty>) -> Self {
        Self(Rc::new(TyData {
            classifier,
            arguments,
            nullable: false,
            variance: Variance::Invariant,
            tags: Vec::new(),
            framework_key: None,
            star: false,
        }))
    }

    fn new_star(any: ClassifierId) -> Self {
        Self(Rc::new(TyData {
            classifier: any,
            arguments: Vec::new(),
            nullable: true,
            variance: Variance::Out,
            tags: Vec::new(),
            framework_key: None,
            star: true,
        }))
    }

    pub fn classifier(&self) -> ClassifierId {
        self.0.classifier
    }

    pub fn arguments(&self) -> &[Ty] {
        &self.0.arguments
    }

    pub fn nullable(&self) -> bool {
        self.0.nullable
    }

    pub fn variance(&self) -> Variance {
        self.0.variance
    }

    pub fn tags(&self) -> &[Ty] {
        &self.0.tags
    }

    pub fn framework_key(&self) -> Option<u64> {
        self.0.framework_key
    }

    pub fn is_star(&self) -> bool {
        self.0.star
    }

    fn rebuild(&self, f: impl FnOnce(&mut TyData)) -> Ty {
        let mut data = TyData {
            classifier: self.0.classifier,
            arguments: self.0.arguments.clone(),
            nullable: self.0.nullable,
            variance: self.0.variance,
            tags: self.0.tags.clone(),
            framework_key: self.0.framework_key,
            star: self.0.star,
        };
        f(&mut data);
        Ty(Rc::new(data))
    }

    pub fn with_nullable(&self, nullable: bool) -> Ty {
        if self.0.nullable == nullable {
            return self.clone();
        }
        self.rebuild(|d| d.nullable = nullable)
    }

    pub fn with_variance(&self, variance: Variance) -> Ty {
        if self.0.variance == variance {
            return self.clone();
        }
        self.rebuild(|d| d.variance = variance)
    }

    pub fn with_arguments(&self, arguments: Vec<Ty>) -> Ty {
        self.rebuild(|d| d.arguments = arguments)
    }

    pub fn with_tags(&self, tags: Vec<Ty>) -> Ty {
        self.rebuild(|d| d.tags = tags)
    }

    pub fn with_framework_key(&self, key: u64) -> Ty {
        self.rebuild(|d| d.framework_key = Some(key))
    }

    /// Whether this type mentions the given classifier anywhere.
    pub fn references(&self, classifier: ClassifierId) -> bool {
        self.0.classifier == classifier
            || self.0.arguments.iter().any(|a| a.references(classifier))
            || self.0.tags.iter().any(|t| t.references(classifier))
    }

    /// Every classifier mentioned in this type, in first-visit order.
    pub fn classifier_set(&self) -> Vec<ClassifierId> {
        let mut out = Vec::new();
        self.collect_classifiers(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_classifiers(&self, out: &mut Vec<ClassifierId>) {
        out.push(self.0.classifier);
        for arg in &self.0.arguments {
            arg.collect_classifiers(out);
        }
    }

    /// Total number of argument nodes in this type tree.
    pub fn argument_count(&self) -> usize {
        self.0.arguments.len()
            + self
                .0
                .arguments
                .iter()
                .map(Ty::argument_count)
                .sum::<usize>()
    }

    /// Stable rendered form used as a memoization/lookup key. Includes the
    /// framework key so independently synthesized instances stay distinct
    /// in scope candidate indices.
    pub fn canonical_key(&self, table: &ClassifierTable) -> String {
        let mut out = String::new();
        self.render(table, &mut out);
        out
    }

    fn render(&self, table: &ClassifierTable, out: &mut String) {
        use std::fmt::Write as _;
        if self.0.star {
            out.push('*');
            return;
        }
        for tag in &self.0.tags {
            out.push('@');
            tag.render(table, out);
            out.push(' ');
        }
        match self.0.variance {
            Variance::Out => out.push_str("out "),
            Variance::In => out.push_str("in "),
            Variance::Invariant => {}
        }
        out.push_str(table.names.resolve_fqn(table.classifier(self.0.classifier).fqn));
        if !self.0.arguments.is_empty() {
            out.push('<');
            for (i, arg) in self.0.arguments.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                arg.render(table, out);
            }
            out.push('>');
        }
        if self.0.nullable {
            out.push('?');
        }
        if let Some(key) = self.0.framework_key {
            let _ = write!(out, "#{key}");
        }
    }

    /// Human-readable form for diagnostics (framework keys omitted).
    pub fn display(&self, table: &ClassifierTable) -> String {
        let stripped = if self.0.framework_key.is_some() {
            self.rebuild(|d| d.framework_key = None)
        } else {
            self.clone()
        };
        let mut out = String::new();
        stripped.render(table, &mut out);
        out
    }
}

// Structural equality: classifier, arguments, nullability, tags and star
// projection. Framework keys and top-level variance projection are
// intentionally excluded.
impl PartialEq for Ty {
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.star == other.0.star
            && self.0.classifier == other.0.classifier
            && self.0.nullable == other.0.nullable
            && self.0.arguments == other.0.arguments
            && self.0.tags == other.0.tags
    }
}

impl Eq for Ty {}

impl std::hash::Hash for Ty {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.star.hash(state);
        self.0.classifier.hash(state);
        self.0.nullable.hash(state);
        self.0.arguments.hash(state);
        self.0.tags.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_framework_key() {
        let table = ClassifierTable::new();
        let a = table.default_ty(table.source_key);
        let b = a.with_framework_key(7);
        assert_eq!(a, b);
        assert_ne!(
            a.canonical_key(&table),
            b.canonical_key(&table),
            "lookup keys must keep synthesized instances distinct"
        );
    }

    #[test]
    fn test_equality_ignores_top_level_variance() {
        let table = ClassifierTable::new();
        let a = table.default_ty(table.any);
        assert_eq!(a, a.with_variance(Variance::Out));
    }

    #[test]
    fn test_nullability_distinguishes() {
        let table = ClassifierTable::new();
        let a = table.default_ty(table.any);
        assert_ne!(a, a.with_nullable(true));
    }

    #[test]
    fn test_function_classifier_shape() {
        let mut table = ClassifierTable::new();
        let f1 = table.function(1);
        let c = table.classifier(f1);
        assert_eq!(c.type_params.len(), 2);
        assert_eq!(c.variances, vec![Variance::In, Variance::Out]);
        assert_eq!(table.function_arity(f1), Some(1));
    }

    #[test]
    fn test_reregistering_returns_same_id() {
        let mut table = ClassifierTable::new();
        let a = table.add_classifier(ClassifierDecl::simple("m.Foo", "m"));
        let b = table.add_classifier(ClassifierDecl::simple("m.Foo", "m"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_classifier_set_and_argument_count() {
        let mut table = ClassifierTable::new();
        let foo = table.add_classifier(ClassifierDecl::simple("m.Foo", "m"));
        let list_of_foo = Ty::new(table.list, vec![table.default_ty(foo)]);
        let set = list_of_foo.classifier_set();
        assert!(set.contains(&table.list));
        assert!(set.contains(&foo));
        assert_eq!(list_of_foo.argument_count(), 1);
    }
}
