//! Interned fully-qualified names.
//!
//! Every declaration and classifier in the engine is identified by a
//! fully-qualified dotted path (`pkg.sub.Name`). Paths are interned once and
//! passed around as copyable symbols.

use string_interner::{DefaultStringInterner, DefaultSymbol};

/// An interned fully-qualified name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fqn(DefaultSymbol);

/// An interned module identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleName(DefaultSymbol);

/// Owns the string interner shared by all names in one engine instance.
#[derive(Debug)]
pub struct NameTable {
    interner: DefaultStringInterner,
}

impl NameTable {
    /// Create an empty name table.
    pub fn new() -> Self {
        Self {
            interner: DefaultStringInterner::new(),
        }
    }

    /// Intern a fully-qualified name.
    pub fn fqn(&mut self, path: &str) -> Fqn {
        Fqn(self.interner.get_or_intern(path))
    }

    /// Intern a module name.
    pub fn module(&mut self, name: &str) -> ModuleName {
        ModuleName(self.interner.get_or_intern(name))
    }

    /// Resolve a fully-qualified name back to its path.
    pub fn resolve_fqn(&self, fqn: Fqn) -> &str {
        self.interner.resolve(fqn.0).unwrap_or("<unknown>")
    }

    /// Resolve a module name back to its string.
    pub fn resolve_module(&self, module: ModuleName) -> &str {
        self.interner.resolve(module.0).unwrap_or("<unknown>")
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The package portion of a dotted path (everything before the last segment).
pub fn package_of(path: &str) -> &str {
    match path.rfind('.') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Whether `path` lives inside `pkg`.
///
/// With `deep` set, nested sub-packages match as well (`pkg.**`); otherwise
/// only direct members match (`pkg.*`).
pub fn in_package(path: &str, pkg: &str, deep: bool) -> bool {
    let owner = package_of(path);
    if deep {
        owner == pkg || owner.starts_with(pkg) && owner.as_bytes().get(pkg.len()) == Some(&b'.')
    } else {
        owner == pkg
    }
}
