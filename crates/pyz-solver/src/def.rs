//! Class and alias definition storage for the solver.
//!
//! The solver never sees syntax: a class is a [`ClassId`] pointing at a
//! [`ClassInfo`] record (type parameters, bases, linearized ancestry, member
//! table, protocol flags), and a type alias is an [`AliasId`] pointing at an
//! [`AliasInfo`] record whose body may refer back to itself. Storage is
//! concurrent so checker threads can share one store.

use crate::intern::TypeInterner;
use crate::types::{AliasId, ClassId, MemberFlags, TypeId, TypeKey};
use dashmap::DashMap;
use indexmap::IndexMap;
use pyz_common::interner::Atom;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::trace;

/// Instance classes whose single type argument describes their element type
/// for tuple-against-instance matching.
pub const TUPLE_LIKE_CLASS_NAMES: &[&str] = &[
    "builtins.tuple",
    "typing.Iterable",
    "typing.Container",
    "typing.Sequence",
    "typing.Reversible",
];

/// A class member as the solver sees it: a type plus matching-relevant flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberInfo {
    pub ty: TypeId,
    pub flags: MemberFlags,
}

/// A nominal class definition.
#[derive(Clone, Debug)]
pub struct ClassInfo {
    /// Fully qualified name, e.g. `builtins.list`.
    pub name: Atom,
    /// Declared type parameters, each a `TypeVar`/`ParamSpec`/`TypeVarTuple`
    /// type, in declaration order.
    pub type_params: Vec<TypeId>,
    /// Direct base instances, with arguments expressed in this class's own
    /// type parameters.
    pub bases: Vec<TypeId>,
    /// Linearized ancestry (self first). Filled in by `register_class`.
    pub mro: Vec<ClassId>,
    /// Structural protocol (`class P(Protocol): ...`).
    pub is_protocol: bool,
    /// Names that make up the protocol's interface.
    pub protocol_members: Vec<Atom>,
    /// Member table in declaration order.
    pub members: IndexMap<Atom, MemberInfo>,
    /// Class was produced by `NamedTuple`.
    pub is_named_tuple: bool,
    /// Index of the variable-arity parameter in `type_params`, if any.
    /// Filled in by `register_class`.
    pub type_var_tuple_index: Option<usize>,
}

impl ClassInfo {
    pub fn new(name: Atom) -> Self {
        ClassInfo {
            name,
            type_params: Vec::new(),
            bases: Vec::new(),
            mro: Vec::new(),
            is_protocol: false,
            protocol_members: Vec::new(),
            members: IndexMap::new(),
            is_named_tuple: false,
            type_var_tuple_index: None,
        }
    }

    pub fn with_type_params(mut self, params: Vec<TypeId>) -> Self {
        self.type_params = params;
        self
    }

    pub fn with_bases(mut self, bases: Vec<TypeId>) -> Self {
        self.bases = bases;
        self
    }

    pub fn with_member(mut self, name: Atom, ty: TypeId, flags: MemberFlags) -> Self {
        self.members.insert(name, MemberInfo { ty, flags });
        self
    }

    pub fn protocol(mut self, members: Vec<Atom>) -> Self {
        self.is_protocol = true;
        self.protocol_members = members;
        self
    }

    pub fn named_tuple(mut self) -> Self {
        self.is_named_tuple = true;
        self
    }
}

/// A type-alias definition. The body is set after registration so that
/// recursive aliases can mention their own id.
#[derive(Clone, Debug)]
pub struct AliasInfo {
    pub name: Atom,
    pub type_params: Vec<TypeId>,
    pub body: Option<TypeId>,
    /// Body mentions this alias (directly or through nested lists).
    pub is_recursive: bool,
}

/// Concurrent store of class and alias definitions.
pub struct ClassStore {
    classes: DashMap<ClassId, Arc<ClassInfo>>,
    by_name: DashMap<Atom, ClassId>,
    next_class: AtomicU32,
    aliases: DashMap<AliasId, Arc<AliasInfo>>,
    next_alias: AtomicU32,
}

impl Default for ClassStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassStore {
    pub fn new() -> Self {
        ClassStore {
            classes: DashMap::new(),
            by_name: DashMap::new(),
            next_class: AtomicU32::new(1),
            aliases: DashMap::new(),
            next_alias: AtomicU32::new(1),
        }
    }

    /// Register a class, computing its linearized ancestry from the already
    /// registered bases and locating its variable-arity parameter.
    pub fn register_class(&self, interner: &TypeInterner, mut info: ClassInfo) -> ClassId {
        let id = ClassId(self.next_class.fetch_add(1, Ordering::Relaxed));

        let mut mro = vec![id];
        for &base in &info.bases {
            let Some(TypeKey::Instance(base_id, _)) = interner.lookup(base) else {
                continue;
            };
            if let Some(base_info) = self.class(base_id) {
                for &ancestor in &base_info.mro {
                    if !mro.contains(&ancestor) {
                        mro.push(ancestor);
                    }
                }
            }
        }
        info.mro = mro;

        info.type_var_tuple_index = info.type_params.iter().position(|&p| {
            matches!(interner.lookup(p), Some(TypeKey::TypeVarTuple(_)))
        });

        trace!(class = ?id, name = ?info.name, params = info.type_params.len(), "register class");
        self.by_name.insert(info.name, id);
        self.classes.insert(id, Arc::new(info));
        id
    }

    pub fn class(&self, id: ClassId) -> Option<Arc<ClassInfo>> {
        self.classes.get(&id).map(|e| e.value().clone())
    }

    pub fn class_by_name(&self, name: Atom) -> Option<ClassId> {
        self.by_name.get(&name).map(|e| *e.value())
    }

    /// Whether `class` has `ancestor` anywhere in its linearized ancestry.
    pub fn has_base(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.class(class)
            .is_some_and(|info| info.mro.contains(&ancestor))
    }

    /// Whether the class is `builtins.tuple` or one of the abstract
    /// single-argument containers a tuple can match against elementwise.
    pub fn is_tuple_like(&self, interner: &TypeInterner, class: ClassId) -> bool {
        let Some(info) = self.class(class) else {
            return false;
        };
        let name = interner.resolve_atom(info.name);
        TUPLE_LIKE_CLASS_NAMES.contains(&name.as_ref())
    }

    /// Register an alias with no body yet. The body is attached with
    /// [`ClassStore::set_alias_body`], which also detects self-reference.
    pub fn register_alias(&self, name: Atom, type_params: Vec<TypeId>) -> AliasId {
        let id = AliasId(self.next_alias.fetch_add(1, Ordering::Relaxed));
        trace!(alias = ?id, name = ?name, "register alias");
        self.aliases.insert(
            id,
            Arc::new(AliasInfo {
                name,
                type_params,
                body: None,
                is_recursive: false,
            }),
        );
        id
    }

    /// Attach the expansion body to an alias, marking it recursive when the
    /// body mentions the alias itself.
    pub fn set_alias_body(&self, interner: &TypeInterner, id: AliasId, body: TypeId) {
        let is_recursive = mentions_alias(interner, body, id);
        if let Some(mut entry) = self.aliases.get_mut(&id) {
            let mut info = (**entry.value()).clone();
            info.body = Some(body);
            info.is_recursive = is_recursive;
            *entry.value_mut() = Arc::new(info);
        }
    }

    pub fn alias(&self, id: AliasId) -> Option<Arc<AliasInfo>> {
        self.aliases.get(&id).map(|e| e.value().clone())
    }

    pub fn alias_is_recursive(&self, id: AliasId) -> bool {
        self.alias(id).is_some_and(|a| a.is_recursive)
    }
}

/// Walk a type looking for a reference to `target`. Alias bodies are not
/// expanded, so the walk terminates on recursive aliases.
fn mentions_alias(interner: &TypeInterner, root: TypeId, target: AliasId) -> bool {
    let mut seen = rustc_hash::FxHashSet::default();
    let mut work = vec![root];
    while let Some(ty) = work.pop() {
        if !seen.insert(ty) {
            continue;
        }
        match interner.lookup(ty) {
            Some(TypeKey::Alias(id, args)) => {
                if id == target {
                    return true;
                }
                work.extend(interner.type_list(args).iter().copied());
            }
            Some(key) => crate::queries::for_each_child(interner, key, |child| work.push(child)),
            None => {}
        }
    }
    false
}

#[cfg(test)]
#[path = "../tests/def_tests.rs"]
mod tests;
