//! Read-only structural queries over interned types.

use crate::def::ClassStore;
use crate::intern::TypeInterner;
use crate::types::{TypeId, TypeKey};
use rustc_hash::FxHashSet;
use smallvec::{SmallVec, smallvec};

/// Invoke `f` on every immediate child type of `key`.
///
/// Alias bodies are not expanded; an alias's children are its arguments.
/// Variable-definition leaves (`TypeVar` etc.) have no children — their
/// bounds belong to the definition, not the type reference.
pub fn for_each_child(interner: &TypeInterner, key: TypeKey, mut f: impl FnMut(TypeId)) {
    match key {
        TypeKey::Any(_)
        | TypeKey::NoneType
        | TypeKey::Never
        | TypeKey::Erased
        | TypeKey::Deleted
        | TypeKey::Unbound
        | TypeKey::Partial
        | TypeKey::TypeVar(_)
        | TypeKey::ParamSpec(_)
        | TypeKey::TypeVarTuple(_) => {}
        TypeKey::Literal(id) => {
            f(interner.literal_shape(id).fallback);
        }
        TypeKey::Unpack(inner) | TypeKey::TypeOf(inner) => f(inner),
        TypeKey::Parameters(id) => {
            for p in &interner.params_shape(id).params {
                f(p.ty);
            }
        }
        TypeKey::Instance(_, args) | TypeKey::Union(args) | TypeKey::Alias(_, args) => {
            for &t in interner.type_list(args).iter() {
                f(t);
            }
        }
        TypeKey::Callable(id) => {
            let shape = interner.callable_shape(id);
            for p in &shape.params {
                f(p.ty);
            }
            f(shape.ret);
            if let Some(guard) = shape.type_guard {
                f(guard);
            }
        }
        TypeKey::Overloaded(items) => {
            for &item in interner.callable_list(items).iter() {
                let shape = interner.callable_shape(item);
                for p in &shape.params {
                    f(p.ty);
                }
                f(shape.ret);
            }
        }
        TypeKey::Tuple(id) => {
            let shape = interner.tuple_shape(id);
            for &t in &shape.items {
                f(t);
            }
            f(shape.fallback);
        }
        TypeKey::TypedDict(id) => {
            let shape = interner.typed_dict_shape(id);
            for field in &shape.fields {
                f(field.ty);
            }
            f(shape.fallback);
        }
    }
}

fn any_type_matches(
    interner: &TypeInterner,
    root: TypeId,
    mut pred: impl FnMut(TypeKey) -> bool,
) -> bool {
    let mut seen = FxHashSet::default();
    let mut work: SmallVec<[TypeId; 16]> = smallvec![root];
    while let Some(ty) = work.pop() {
        if !seen.insert(ty) {
            continue;
        }
        let Some(key) = interner.lookup(ty) else {
            continue;
        };
        if pred(key) {
            return true;
        }
        for_each_child(interner, key, |child| work.push(child));
    }
    false
}

/// Whether the type mentions any type variable (plain, parameter
/// specification, or variable-arity).
pub fn has_type_vars(interner: &TypeInterner, ty: TypeId) -> bool {
    any_type_matches(interner, ty, |key| {
        matches!(
            key,
            TypeKey::TypeVar(_) | TypeKey::ParamSpec(_) | TypeKey::TypeVarTuple(_)
        )
    })
}

/// Whether the type mentions a recursive alias anywhere.
pub fn has_recursive_types(interner: &TypeInterner, defs: &ClassStore, ty: TypeId) -> bool {
    any_type_matches(interner, ty, |key| {
        matches!(key, TypeKey::Alias(id, _) if defs.alias_is_recursive(id))
    })
}

/// A type is complete when none of its components is the uninhabited type.
/// Incomplete union alternatives are ignored when distributing a match over
/// the union.
pub fn is_complete_type(interner: &TypeInterner, ty: TypeId) -> bool {
    !any_type_matches(interner, ty, |key| matches!(key, TypeKey::Never))
}

/// Whether the type is a union with an `Any` alternative at the top level.
pub fn is_union_with_any(interner: &TypeInterner, ty: TypeId) -> bool {
    let Some(TypeKey::Union(items)) = interner.lookup(ty) else {
        return false;
    };
    interner
        .type_list(items)
        .iter()
        .any(|&item| matches!(interner.lookup(item), Some(TypeKey::Any(_))))
}

/// Position of the single `Unpack` item in a type list, if any.
pub fn find_unpack_in_list(interner: &TypeInterner, items: &[TypeId]) -> Option<usize> {
    items
        .iter()
        .position(|&t| matches!(interner.lookup(t), Some(TypeKey::Unpack(_))))
}

#[cfg(test)]
#[path = "../tests/queries_tests.rs"]
mod tests;
