//! The declaration-discovery boundary.
//!
//! The front end (out of scope here) reads producer declarations off user
//! source and loads them into a [`DeclarationStore`] before resolution
//! starts. The store is append-only after that: the resolver only reads.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::fqn::{Fqn, ModuleName};
use crate::injectables::Callable;
use crate::types::ClassifierId;

/// Everything the resolver knows about declared producers.
#[derive(Debug, Default)]
pub struct DeclarationStore {
    /// Member producers per declaring classifier; consulted for `Group`
    /// expansion and type scopes.
    members: FxHashMap<ClassifierId, Vec<Callable>>,
    /// Exported producers per package path, in declaration order. Insertion
    /// order matters for deterministic import resolution.
    exports: IndexMap<String, Vec<Callable>>,
    /// Every export by its fully-qualified name.
    by_fqn: FxHashMap<Fqn, Callable>,
    /// Custom failure-rendering messages per requested classifier.
    error_messages: FxHashMap<ClassifierId, String>,
    /// The module resolution is running for; visibility checks compare
    /// against it.
    current_module: Option<ModuleName>,
}

impl DeclarationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current_module(&mut self, module: ModuleName) {
        self.current_module = Some(module);
    }

    pub fn current_module(&self) -> Option<ModuleName> {
        self.current_module
    }

    /// Register a member producer of a classifier.
    pub fn add_member(&mut self, owner: ClassifierId, callable: Callable) {
        self.members.entry(owner).or_default().push(callable);
    }

    pub fn members(&self, owner: ClassifierId) -> &[Callable] {
        self.members.get(&owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Register an exported producer under its package path.
    pub fn add_export(&mut self, package: &str, callable: Callable) {
        self.by_fqn.insert(callable.fqn, callable.clone());
        self.exports
            .entry(package.to_string())
            .or_default()
            .push(callable);
    }

    pub fn exports(&self, package: &str) -> &[Callable] {
        self.exports.get(package).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All packages with exports, in registration order.
    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    pub fn export_by_fqn(&self, fqn: Fqn) -> Option<&Callable> {
        self.by_fqn.get(&fqn)
    }

    /// Attach a custom message rendered when a request for this classifier
    /// fails.
    pub fn set_error_message(&mut self, classifier: ClassifierId, message: impl Into<String>) {
        self.error_messages.insert(classifier, message.into());
    }

    pub fn error_message(&self, classifier: ClassifierId) -> Option<&str> {
        self.error_messages.get(&classifier).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injectables::{CallContext, CallableId, CandidateKind, Visibility};
    use crate::types::{ClassifierDecl, ClassifierTable, TySubst};

    fn export(table: &mut ClassifierTable, name: &str) -> Callable {
        let classifier = table.add_classifier(ClassifierDecl::simple(name, "m"));
        let ty = table.default_ty(classifier);
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

    #[test]
    fn test_exports_keep_registration_order() {
        let mut table = ClassifierTable::new();
        let mut store = DeclarationStore::new();
        store.add_export("m", export(&mut table, "m.b"));
        store.add_export("m", export(&mut table, "m.a"));
        let names: Vec<Fqn> = store.exports("m").iter().map(|c| c.fqn).collect();
        assert_eq!(names, vec![table.names.fqn("m.b"), table.names.fqn("m.a")]);
    }

    #[test]
    fn test_error_message_lookup() {
        let mut table = ClassifierTable::new();
        let mut store = DeclarationStore::new();
        let c = table.add_classifier(ClassifierDecl::simple("m.Db", "m"));
        store.set_error_message(c, "no database configured for this target");
        assert_eq!(
            store.error_message(c),
            Some("no database configured for this target")
        );
        assert_eq!(store.error_message(table.any), None);
    }
}
