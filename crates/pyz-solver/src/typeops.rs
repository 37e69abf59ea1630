//! Type operations: substitution, erasure, alias expansion, union
//! simplification, and instance/ancestor mapping.
//!
//! These are the pure structural transformations constraint inference leans
//! on. None of them allocate identity: every result goes back through the
//! interner, so transforming a type twice yields the same handle.

use crate::def::ClassStore;
use crate::intern::TypeInterner;
use crate::types::*;
use rustc_hash::FxHashMap;

/// A mapping from type-variable identities to replacement types.
#[derive(Default, Debug, Clone)]
pub struct TypeSubstitution {
    map: FxHashMap<TypeVarId, TypeId>,
}

impl TypeSubstitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, var: TypeVarId, ty: TypeId) {
        self.map.insert(var, ty);
    }

    pub fn get(&self, var: TypeVarId) -> Option<TypeId> {
        self.map.get(&var).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Build the substitution that maps a class's declared parameters to the
/// arguments of a particular instance.
///
/// For a class with a variable-arity parameter the argument list may be
/// longer than the parameter list; the middle slice is packed into a tuple
/// and bound to the variable-arity parameter.
pub fn instance_substitution(
    interner: &TypeInterner,
    info: &crate::def::ClassInfo,
    args: &[TypeId],
) -> TypeSubstitution {
    let mut subst = TypeSubstitution::new();
    match info.type_var_tuple_index {
        None => {
            for (&param, &arg) in info.type_params.iter().zip(args.iter()) {
                if let Some(var) = type_var_identity(interner, param) {
                    subst.insert(var, arg);
                }
            }
        }
        Some(idx) => {
            let suffix = info.type_params.len() - idx - 1;
            let Some((prefix_args, middle, suffix_args)) =
                split_prefix_middle_suffix(args, idx, suffix)
            else {
                return subst;
            };
            for (&param, &arg) in info.type_params[..idx].iter().zip(prefix_args) {
                if let Some(var) = type_var_identity(interner, param) {
                    subst.insert(var, arg);
                }
            }
            if let Some(var) = type_var_identity(interner, info.type_params[idx]) {
                subst.insert(var, interner.tuple(middle.to_vec(), TypeId::ANY));
            }
            for (&param, &arg) in info.type_params[idx + 1..].iter().zip(suffix_args) {
                if let Some(var) = type_var_identity(interner, param) {
                    subst.insert(var, arg);
                }
            }
        }
    }
    subst
}

/// The identity of a type-variable reference, for any of the three kinds.
pub fn type_var_identity(interner: &TypeInterner, ty: TypeId) -> Option<TypeVarId> {
    match interner.lookup(ty)? {
        TypeKey::TypeVar(k) => Some(interner.type_var_shape(k).id),
        TypeKey::ParamSpec(k) => Some(interner.param_spec_shape(k).id),
        TypeKey::TypeVarTuple(k) => Some(interner.type_var_tuple_shape(k).id),
        _ => None,
    }
}

/// Apply a substitution, rebuilding the type bottom-up.
///
/// Alias bodies are not expanded; arguments are substituted in place, which
/// keeps the walk terminating on recursive aliases.
pub fn instantiate(interner: &TypeInterner, ty: TypeId, subst: &TypeSubstitution) -> TypeId {
    if subst.is_empty() {
        return ty;
    }
    let Some(key) = interner.lookup(ty) else {
        return ty;
    };
    match key {
        TypeKey::Any(_)
        | TypeKey::NoneType
        | TypeKey::Never
        | TypeKey::Erased
        | TypeKey::Deleted
        | TypeKey::Unbound
        | TypeKey::Partial
        | TypeKey::Literal(_) => ty,
        TypeKey::TypeVar(k) => {
            let shape = interner.type_var_shape(k);
            subst.get(shape.id).unwrap_or(ty)
        }
        TypeKey::ParamSpec(k) => {
            let shape = interner.param_spec_shape(k);
            subst.get(shape.id).unwrap_or(ty)
        }
        TypeKey::TypeVarTuple(k) => {
            let shape = interner.type_var_tuple_shape(k);
            subst.get(shape.id).unwrap_or(ty)
        }
        TypeKey::Unpack(inner) => interner.unpack(instantiate(interner, inner, subst)),
        TypeKey::TypeOf(inner) => interner.type_of(instantiate(interner, inner, subst)),
        TypeKey::Parameters(id) => {
            let shape = interner.params_shape(id);
            interner.parameters(instantiate_params(interner, &shape.params, subst))
        }
        TypeKey::Instance(class, args) => {
            let args = instantiate_list(interner, &interner.type_list(args), subst);
            interner.instance(class, args)
        }
        TypeKey::Union(items) => {
            let items = instantiate_list(interner, &interner.type_list(items), subst);
            interner.union(items)
        }
        TypeKey::Alias(alias, args) => {
            let args = instantiate_list(interner, &interner.type_list(args), subst);
            interner.alias(alias, args)
        }
        TypeKey::Callable(id) => {
            let shape = interner.callable_shape(id);
            interner.callable(instantiate_callable(interner, &shape, subst))
        }
        TypeKey::Overloaded(items) => {
            let items = interner
                .callable_list(items)
                .iter()
                .map(|&item| {
                    let shape = interner.callable_shape(item);
                    interner.callable_id(instantiate_callable(interner, &shape, subst))
                })
                .collect();
            interner.overloaded(items)
        }
        TypeKey::Tuple(id) => {
            let shape = interner.tuple_shape(id);
            let items = instantiate_list(interner, &shape.items, subst);
            let fallback = instantiate(interner, shape.fallback, subst);
            interner.tuple(items, fallback)
        }
        TypeKey::TypedDict(id) => {
            let shape = interner.typed_dict_shape(id);
            let fields = shape
                .fields
                .iter()
                .map(|f| TypedDictField {
                    name: f.name,
                    ty: instantiate(interner, f.ty, subst),
                    required: f.required,
                })
                .collect();
            let fallback = instantiate(interner, shape.fallback, subst);
            interner.typed_dict(fields, fallback)
        }
    }
}

/// Substitute a type list, splicing a variable-arity variable that was bound
/// to a tuple into the surrounding list.
fn instantiate_list(
    interner: &TypeInterner,
    items: &[TypeId],
    subst: &TypeSubstitution,
) -> Vec<TypeId> {
    let mut out = Vec::with_capacity(items.len());
    for &item in items {
        if let Some(TypeKey::Unpack(inner)) = interner.lookup(item) {
            if let Some(TypeKey::TypeVarTuple(k)) = interner.lookup(inner) {
                let shape = interner.type_var_tuple_shape(k);
                if let Some(bound) = subst.get(shape.id) {
                    if let Some(TypeKey::Tuple(tid)) = interner.lookup(bound) {
                        out.extend(interner.tuple_shape(tid).items.iter().copied());
                    } else {
                        out.push(interner.unpack(bound));
                    }
                    continue;
                }
            }
        }
        out.push(instantiate(interner, item, subst));
    }
    out
}

fn instantiate_params(
    interner: &TypeInterner,
    params: &[Param],
    subst: &TypeSubstitution,
) -> Vec<Param> {
    params
        .iter()
        .map(|p| Param {
            name: p.name,
            kind: p.kind,
            ty: instantiate(interner, p.ty, subst),
        })
        .collect()
}

fn instantiate_callable(
    interner: &TypeInterner,
    shape: &CallableShape,
    subst: &TypeSubstitution,
) -> CallableShape {
    CallableShape {
        params: instantiate_params(interner, &shape.params, subst),
        ret: instantiate(interner, shape.ret, subst),
        is_ellipsis: shape.is_ellipsis,
        from_concatenate: shape.from_concatenate,
        type_guard: shape
            .type_guard
            .map(|g| instantiate(interner, g, subst)),
        is_type_obj: shape.is_type_obj,
        fallback: shape.fallback,
    }
}

/// Replace every type-variable reference with `Any`.
///
/// Used to pre-filter candidate matches: if the fully erased template is not
/// compatible with the actual, no assignment of the variables can be either.
pub fn erase_type_vars(interner: &TypeInterner, ty: TypeId) -> TypeId {
    // Deeply nested (but non-recursive) types would otherwise exhaust the
    // thread stack in one unchecked chain; guard every level like
    // `InferenceContext::infer_constraints` does.
    stacker::maybe_grow(128 * 1024, 4 * 1024 * 1024, || erase_type_vars_inner(interner, ty))
}

fn erase_type_vars_inner(interner: &TypeInterner, ty: TypeId) -> TypeId {
    let Some(key) = interner.lookup(ty) else {
        return ty;
    };
    match key {
        TypeKey::TypeVar(_) | TypeKey::ParamSpec(_) | TypeKey::TypeVarTuple(_) => TypeId::ANY,
        TypeKey::Unpack(inner) => {
            if matches!(interner.lookup(inner), Some(TypeKey::TypeVarTuple(_))) {
                TypeId::ANY
            } else {
                interner.unpack(erase_type_vars(interner, inner))
            }
        }
        TypeKey::Any(_)
        | TypeKey::NoneType
        | TypeKey::Never
        | TypeKey::Erased
        | TypeKey::Deleted
        | TypeKey::Unbound
        | TypeKey::Partial
        | TypeKey::Literal(_) => ty,
        TypeKey::TypeOf(inner) => interner.type_of(erase_type_vars(interner, inner)),
        TypeKey::Parameters(id) => {
            let shape = interner.params_shape(id);
            let params = shape
                .params
                .iter()
                .map(|p| Param {
                    name: p.name,
                    kind: p.kind,
                    ty: erase_type_vars(interner, p.ty),
                })
                .collect();
            interner.parameters(params)
        }
        TypeKey::Instance(class, args) => {
            let args = interner
                .type_list(args)
                .iter()
                .map(|&a| erase_type_vars(interner, a))
                .collect();
            interner.instance(class, args)
        }
        TypeKey::Union(items) => {
            let items = interner
                .type_list(items)
                .iter()
                .map(|&a| erase_type_vars(interner, a))
                .collect();
            interner.union(items)
        }
        TypeKey::Alias(alias, args) => {
            let args = interner
                .type_list(args)
                .iter()
                .map(|&a| erase_type_vars(interner, a))
                .collect();
            interner.alias(alias, args)
        }
        TypeKey::Callable(id) => {
            let shape = interner.callable_shape(id);
            interner.callable(erase_callable(interner, &shape))
        }
        TypeKey::Overloaded(items) => {
            let items = interner
                .callable_list(items)
                .iter()
                .map(|&item| {
                    let shape = interner.callable_shape(item);
                    interner.callable_id(erase_callable(interner, &shape))
                })
                .collect();
            interner.overloaded(items)
        }
        TypeKey::Tuple(id) => {
            let shape = interner.tuple_shape(id);
            let items = shape
                .items
                .iter()
                .map(|&t| erase_type_vars(interner, t))
                .collect();
            interner.tuple(items, erase_type_vars(interner, shape.fallback))
        }
        TypeKey::TypedDict(id) => {
            let shape = interner.typed_dict_shape(id);
            let fields = shape
                .fields
                .iter()
                .map(|f| TypedDictField {
                    name: f.name,
                    ty: erase_type_vars(interner, f.ty),
                    required: f.required,
                })
                .collect();
            interner.typed_dict(fields, erase_type_vars(interner, shape.fallback))
        }
    }
}

fn erase_callable(interner: &TypeInterner, shape: &CallableShape) -> CallableShape {
    CallableShape {
        params: shape
            .params
            .iter()
            .map(|p| Param {
                name: p.name,
                kind: p.kind,
                ty: erase_type_vars(interner, p.ty),
            })
            .collect(),
        ret: erase_type_vars(interner, shape.ret),
        is_ellipsis: shape.is_ellipsis,
        from_concatenate: shape.from_concatenate,
        type_guard: shape.type_guard.map(|g| erase_type_vars(interner, g)),
        is_type_obj: shape.is_type_obj,
        fallback: shape.fallback,
    }
}

// Alias chains are finite in well-formed programs; the cap only guards
// against malformed self-aliasing heads like `type A = A`.
const MAX_ALIAS_EXPANSIONS: u32 = 64;

/// Resolve a type to its canonical form by expanding top-level aliases.
pub fn proper_type(interner: &TypeInterner, defs: &ClassStore, mut ty: TypeId) -> TypeId {
    for _ in 0..MAX_ALIAS_EXPANSIONS {
        let Some(TypeKey::Alias(alias, args)) = interner.lookup(ty) else {
            return ty;
        };
        let Some(info) = defs.alias(alias) else {
            return ty;
        };
        let Some(body) = info.body else {
            return ty;
        };
        let args = interner.type_list(args);
        let mut subst = TypeSubstitution::new();
        for (&param, &arg) in info.type_params.iter().zip(args.iter()) {
            if let Some(var) = type_var_identity(interner, param) {
                subst.insert(var, arg);
            }
        }
        ty = instantiate(interner, body, &subst);
    }
    ty
}

/// Flatten and deduplicate a union, dropping uninhabited alternatives.
///
/// Erased placeholders are normally dropped with the rest; `keep_erased`
/// preserves them, which inference needs so that erased alternatives still
/// participate in matching.
pub fn make_simplified_union(
    interner: &TypeInterner,
    defs: &ClassStore,
    items: &[TypeId],
    keep_erased: bool,
) -> TypeId {
    let mut out: Vec<TypeId> = Vec::with_capacity(items.len());
    flatten_union_items(interner, defs, items, keep_erased, &mut out);
    interner.union(out)
}

fn flatten_union_items(
    interner: &TypeInterner,
    defs: &ClassStore,
    items: &[TypeId],
    keep_erased: bool,
    out: &mut Vec<TypeId>,
) {
    for &item in items {
        let item = proper_type(interner, defs, item);
        match interner.lookup(item) {
            Some(TypeKey::Union(nested)) => {
                let nested = interner.type_list(nested);
                flatten_union_items(interner, defs, &nested, keep_erased, out);
            }
            Some(TypeKey::Never) => {}
            Some(TypeKey::Erased) if !keep_erased => {}
            _ => {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
        }
    }
}

/// Map an instance of some class to an instance of one of its ancestors,
/// carrying the type arguments through the base-class declarations.
///
/// Falls back to `Any` arguments when the ancestry is malformed.
pub fn map_instance_to_ancestor(
    interner: &TypeInterner,
    defs: &ClassStore,
    instance: TypeId,
    ancestor: ClassId,
) -> TypeId {
    let Some(TypeKey::Instance(class, args)) = interner.lookup(instance) else {
        return instance;
    };
    if class == ancestor {
        return instance;
    }
    let Some(info) = defs.class(class) else {
        return any_instance_of(interner, defs, ancestor);
    };
    let args = interner.type_list(args);
    let subst = instance_substitution(interner, &info, &args);
    for &base in &info.bases {
        let Some(TypeKey::Instance(base_class, _)) = interner.lookup(base) else {
            continue;
        };
        if !defs.has_base(base_class, ancestor) {
            continue;
        }
        let mapped_base = instantiate(interner, base, &subst);
        return map_instance_to_ancestor(interner, defs, mapped_base, ancestor);
    }
    any_instance_of(interner, defs, ancestor)
}

fn any_instance_of(interner: &TypeInterner, defs: &ClassStore, class: ClassId) -> TypeId {
    let arity = defs.class(class).map_or(0, |info| info.type_params.len());
    interner.instance(class, vec![TypeId::ANY; arity])
}

/// Split a list into `prefix` leading items, `suffix` trailing items, and
/// whatever is left in the middle. `None` when the list is too short.
pub fn split_prefix_middle_suffix<'a>(
    items: &'a [TypeId],
    prefix: usize,
    suffix: usize,
) -> Option<(&'a [TypeId], &'a [TypeId], &'a [TypeId])> {
    if items.len() < prefix + suffix {
        return None;
    }
    let (head, rest) = items.split_at(prefix);
    let (middle, tail) = rest.split_at(rest.len() - suffix);
    Some((head, middle, tail))
}

/// Split an instance's arguments around its class's variable-arity
/// parameter. `None` when the class has no such parameter.
pub fn split_with_instance(
    defs: &ClassStore,
    class: ClassId,
    args: &[TypeId],
) -> Option<(Vec<TypeId>, Vec<TypeId>, Vec<TypeId>)> {
    let info = defs.class(class)?;
    let idx = info.type_var_tuple_index?;
    let suffix = info.type_params.len() - idx - 1;
    let (p, m, s) = split_prefix_middle_suffix(args, idx, suffix)?;
    Some((p.to_vec(), m.to_vec(), s.to_vec()))
}

/// When a middle slice is exactly one `Unpack` item, return its operand in
/// canonical form.
pub fn extract_unpack(
    interner: &TypeInterner,
    defs: &ClassStore,
    items: &[TypeId],
) -> Option<TypeId> {
    if items.len() != 1 {
        return None;
    }
    match interner.lookup(items[0]) {
        Some(TypeKey::Unpack(inner)) => Some(proper_type(interner, defs, inner)),
        _ => None,
    }
}

/// `Callable[..., ret]`: a signature that accepts any argument list.
pub fn ellipsis_callable(any: TypeId, ret: TypeId) -> CallableShape {
    CallableShape {
        params: vec![Param::star(any), Param::star2(any)],
        ret,
        is_ellipsis: true,
        from_concatenate: false,
        type_guard: None,
        is_type_obj: false,
        fallback: None,
    }
}

/// Expand a trailing `**kwargs: Unpack[SomeTypedDict]` into explicit
/// keyword-only parameters, so both sides of a match present the same
/// canonical parameter shape.
pub fn normalize_trailing_kwargs(
    interner: &TypeInterner,
    shape: &CallableShape,
) -> Option<CallableShape> {
    let last = shape.params.last()?;
    if last.kind != ArgKind::Star2 {
        return None;
    }
    let dict = match interner.lookup(last.ty) {
        Some(TypeKey::Unpack(inner)) => match interner.lookup(inner) {
            Some(TypeKey::TypedDict(id)) => id,
            _ => return None,
        },
        Some(TypeKey::TypedDict(id)) => id,
        _ => return None,
    };
    let dict = interner.typed_dict_shape(dict);
    let mut params = shape.params[..shape.params.len() - 1].to_vec();
    for field in &dict.fields {
        params.push(Param {
            name: Some(field.name),
            kind: if field.required {
                ArgKind::Named
            } else {
                ArgKind::NamedOpt
            },
            ty: field.ty,
        });
    }
    Some(CallableShape {
        params,
        ..shape.clone()
    })
}

/// Detect a `*args: P.args, **kwargs: P.kwargs` tail. Returns the parameter
/// specification type and the number of fixed parameters before the tail.
pub fn param_spec_tail(
    interner: &TypeInterner,
    shape: &CallableShape,
) -> Option<(TypeId, usize)> {
    if shape.params.len() < 2 {
        return None;
    }
    let star = &shape.params[shape.params.len() - 2];
    let star2 = &shape.params[shape.params.len() - 1];
    if star.kind != ArgKind::Star || star2.kind != ArgKind::Star2 {
        return None;
    }
    let (Some(TypeKey::ParamSpec(a)), Some(TypeKey::ParamSpec(b))) =
        (interner.lookup(star.ty), interner.lookup(star2.ty))
    else {
        return None;
    };
    let a_shape = interner.param_spec_shape(a);
    if a_shape.id != interner.param_spec_shape(b).id {
        return None;
    }
    Some((star.ty, shape.params.len() - 2))
}

#[cfg(test)]
#[path = "../tests/typeops_tests.rs"]
mod tests;
