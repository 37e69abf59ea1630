//! Subtyping and member-lookup oracle used by constraint inference.
//!
//! Inference does not own the full subtype relation; it consults one through
//! the [`TypeRelations`] trait so the checker can plug in its real
//! implementation. [`StructuralRelations`] is a self-contained implementation
//! covering the structural core: nominal instances with variance, tuples,
//! callables, protocols, and unions. It is what the solver's own tests run
//! against.

use crate::def::{ClassStore, MemberInfo};
use crate::intern::TypeInterner;
use crate::recursion::InferenceStack;
use crate::typeops;
use crate::types::*;
use pyz_common::interner::Atom;

/// The queries constraint inference needs from the surrounding checker.
pub trait TypeRelations {
    /// Is `left` a subtype of `right`?
    fn is_subtype(&self, left: TypeId, right: TypeId) -> bool;

    /// Are the two types the same (ignoring `Any` provenance)?
    fn is_same_type(&self, left: TypeId, right: TypeId) -> bool;

    /// Does `left` structurally implement the protocol instance `protocol`?
    fn is_protocol_implementation(&self, left: TypeId, protocol: TypeId) -> bool;

    /// Can a value of signature `left` be used where `right` is expected?
    fn is_callable_compatible(&self, left: TypeId, right: TypeId, ignore_return: bool) -> bool;

    /// Resolve a member on `owner`, substituting type arguments and binding
    /// the receiver. `class_obj` looks the member up unbound, as accessed on
    /// the class object itself.
    fn find_member(
        &self,
        name: Atom,
        owner: TypeId,
        self_binding: TypeId,
        is_operator: bool,
        class_obj: bool,
    ) -> Option<TypeId>;

    /// Matching-relevant flags of a member on `owner`.
    fn member_flags(&self, name: Atom, owner: TypeId) -> MemberFlags;
}

/// Structural implementation of [`TypeRelations`] over the solver's own
/// stores. Deliberately permissive where the full checker would be subtle
/// (literal math, descriptor protocols); precise enough for inference.
pub struct StructuralRelations<'a> {
    interner: &'a TypeInterner,
    defs: &'a ClassStore,
    visiting: InferenceStack<(TypeId, TypeId)>,
}

impl<'a> StructuralRelations<'a> {
    pub fn new(interner: &'a TypeInterner, defs: &'a ClassStore) -> Self {
        StructuralRelations {
            interner,
            defs,
            visiting: InferenceStack::new(),
        }
    }

    fn proper(&self, ty: TypeId) -> TypeId {
        typeops::proper_type(self.interner, self.defs, ty)
    }

    fn is_object(&self, ty: TypeId) -> bool {
        let Some(TypeKey::Instance(class, _)) = self.interner.lookup(ty) else {
            return false;
        };
        self.defs
            .class(class)
            .is_some_and(|info| self.interner.resolve_atom(info.name).as_ref() == "builtins.object")
    }

    fn instance_subtype(
        &self,
        left_class: ClassId,
        left_args: TypeListId,
        right_class: ClassId,
        right_args: TypeListId,
    ) -> bool {
        if !self.defs.has_base(left_class, right_class) {
            return false;
        }
        let left_inst = self.interner.intern(TypeKey::Instance(left_class, left_args));
        let mapped =
            typeops::map_instance_to_ancestor(self.interner, self.defs, left_inst, right_class);
        let Some(TypeKey::Instance(_, mapped_args)) = self.interner.lookup(mapped) else {
            return false;
        };
        let mapped_args = self.interner.type_list(mapped_args);
        let right_args = self.interner.type_list(right_args);
        if mapped_args.len() != right_args.len() {
            return false;
        }
        let params = self
            .defs
            .class(right_class)
            .map(|info| info.type_params.clone())
            .unwrap_or_default();
        for (i, (&l, &r)) in mapped_args.iter().zip(right_args.iter()).enumerate() {
            let variance = params
                .get(i)
                .and_then(|&p| match self.interner.lookup(p) {
                    Some(TypeKey::TypeVar(k)) => Some(self.interner.type_var_shape(k).variance),
                    _ => None,
                })
                .unwrap_or(Variance::Invariant);
            let ok = match variance {
                Variance::Covariant => self.is_subtype(l, r),
                Variance::Contravariant => self.is_subtype(r, l),
                Variance::Invariant => self.is_same_type(l, r),
            };
            if !ok {
                return false;
            }
        }
        true
    }

    fn callable_shape_of(&self, ty: TypeId) -> Option<std::sync::Arc<CallableShape>> {
        match self.interner.lookup(ty)? {
            TypeKey::Callable(id) => Some(self.interner.callable_shape(id)),
            _ => None,
        }
    }

    fn shapes_compatible(
        &self,
        left: &CallableShape,
        right: &CallableShape,
        ignore_return: bool,
    ) -> bool {
        if !ignore_return && !self.is_subtype(left.ret, right.ret) {
            return false;
        }
        if left.is_ellipsis || right.is_ellipsis {
            return true;
        }
        let right_pos = right.positional_prefix_len();
        if left.min_positional() > right_pos {
            return false;
        }
        if right_pos > left.positional_prefix_len() && !left.has_star() {
            return false;
        }
        for (lp, rp) in left.params.iter().zip(right.params.iter()) {
            if lp.kind.is_star() || rp.kind.is_star() {
                break;
            }
            // Parameters are contravariant.
            if !self.is_subtype(rp.ty, lp.ty) {
                return false;
            }
        }
        true
    }
}

impl TypeRelations for StructuralRelations<'_> {
    fn is_subtype(&self, left: TypeId, right: TypeId) -> bool {
        let left = self.proper(left);
        let right = self.proper(right);
        if left == right {
            return true;
        }
        let pair = (left, right);
        if self.visiting.contains(&pair) {
            // Coinductive: assume recursive occurrences hold.
            return true;
        }
        let _scope = self.visiting.enter(pair);

        let (Some(lk), Some(rk)) = (self.interner.lookup(left), self.interner.lookup(right))
        else {
            return false;
        };
        match (lk, rk) {
            (TypeKey::Any(_), _) | (_, TypeKey::Any(_)) => true,
            (TypeKey::Erased, _) | (_, TypeKey::Erased) => true,
            (TypeKey::Never, _) => true,
            _ if self.is_object(right) => true,
            (TypeKey::Union(items), _) => self
                .interner
                .type_list(items)
                .iter()
                .all(|&item| self.is_subtype(item, right)),
            (_, TypeKey::Union(items)) => self
                .interner
                .type_list(items)
                .iter()
                .any(|&item| self.is_subtype(left, item)),
            (TypeKey::TypeVar(k), _) => {
                self.is_subtype(self.interner.type_var_shape(k).upper_bound, right)
            }
            (TypeKey::ParamSpec(k), _) => {
                self.is_subtype(self.interner.param_spec_shape(k).upper_bound, right)
            }
            (TypeKey::TypeVarTuple(k), _) => {
                self.is_subtype(self.interner.type_var_tuple_shape(k).upper_bound, right)
            }
            // Distinct interned literals are distinct types.
            (TypeKey::Literal(_), TypeKey::Literal(_)) => false,
            (TypeKey::Literal(l), _) => {
                self.is_subtype(self.interner.literal_shape(l).fallback, right)
            }
            (TypeKey::Instance(..), TypeKey::Instance(rc, _))
                if self.defs.class(rc).is_some_and(|i| i.is_protocol) =>
            {
                self.is_protocol_implementation(left, right)
            }
            (TypeKey::Instance(lc, la), TypeKey::Instance(rc, ra)) => {
                self.instance_subtype(lc, la, rc, ra)
            }
            (TypeKey::Tuple(l), TypeKey::Tuple(r)) => {
                let l = self.interner.tuple_shape(l);
                let r = self.interner.tuple_shape(r);
                l.items.len() == r.items.len()
                    && l.items
                        .iter()
                        .zip(r.items.iter())
                        .all(|(&a, &b)| self.is_subtype(a, b))
            }
            (TypeKey::Tuple(l), _) => {
                self.is_subtype(self.interner.tuple_shape(l).fallback, right)
            }
            (TypeKey::Callable(..), TypeKey::Callable(..)) => {
                self.is_callable_compatible(left, right, false)
            }
            (TypeKey::Callable(..) | TypeKey::Overloaded(..), TypeKey::Instance(rc, _))
                if self.defs.class(rc).is_some_and(|i| i.is_protocol) =>
            {
                let Some(call) =
                    self.find_member(self.interner.intern_string("__call__"), right, right, true, false)
                else {
                    return false;
                };
                self.is_callable_compatible(left, call, false)
            }
            (TypeKey::Callable(id), TypeKey::Instance(..)) => {
                match self.interner.callable_shape(id).fallback {
                    Some(fb) => self.is_subtype(fb, right),
                    None => false,
                }
            }
            (TypeKey::Overloaded(items), TypeKey::Callable(..)) => self
                .interner
                .callable_list(items)
                .iter()
                .any(|&item| {
                    let item = self.interner.intern(TypeKey::Callable(item));
                    self.is_callable_compatible(item, right, false)
                }),
            (TypeKey::TypeOf(a), TypeKey::TypeOf(b)) => self.is_subtype(a, b),
            (TypeKey::TypedDict(l), TypeKey::TypedDict(r)) => {
                let l = self.interner.typed_dict_shape(l);
                let r = self.interner.typed_dict_shape(r);
                r.fields.iter().all(|rf| {
                    l.field(rf.name)
                        .is_some_and(|lf| self.is_same_type(lf.ty, rf.ty))
                })
            }
            (TypeKey::TypedDict(l), TypeKey::Instance(..)) => {
                self.is_subtype(self.interner.typed_dict_shape(l).fallback, right)
            }
            _ => false,
        }
    }

    fn is_same_type(&self, left: TypeId, right: TypeId) -> bool {
        let left = self.proper(left);
        let right = self.proper(right);
        if left == right {
            return true;
        }
        matches!(
            (self.interner.lookup(left), self.interner.lookup(right)),
            (Some(TypeKey::Any(_)), Some(TypeKey::Any(_)))
        )
    }

    fn is_protocol_implementation(&self, left: TypeId, protocol: TypeId) -> bool {
        let left = self.proper(left);
        let protocol = self.proper(protocol);
        let Some(TypeKey::Instance(proto_class, _)) = self.interner.lookup(protocol) else {
            return false;
        };
        let Some(proto_info) = self.defs.class(proto_class) else {
            return false;
        };
        if !proto_info.is_protocol {
            return false;
        }
        let pair = (left, protocol);
        if self.visiting.contains(&pair) {
            return true;
        }
        let _scope = self.visiting.enter(pair);

        for &member in &proto_info.protocol_members {
            let Some(wanted) = self.find_member(member, protocol, left, false, false) else {
                continue;
            };
            let Some(found) = self.find_member(member, left, left, false, false) else {
                return false;
            };
            if !self.is_subtype(found, wanted) {
                return false;
            }
            let flags = self.member_flags(member, protocol);
            if flags.contains(MemberFlags::SETTABLE) && !self.is_subtype(wanted, found) {
                return false;
            }
        }
        true
    }

    fn is_callable_compatible(&self, left: TypeId, right: TypeId, ignore_return: bool) -> bool {
        let left = self.proper(left);
        let right = self.proper(right);
        if let Some(TypeKey::Overloaded(items)) = self.interner.lookup(left) {
            return self.interner.callable_list(items).iter().any(|&item| {
                let item = self.interner.intern(TypeKey::Callable(item));
                self.is_callable_compatible(item, right, ignore_return)
            });
        }
        let (Some(l), Some(r)) = (self.callable_shape_of(left), self.callable_shape_of(right))
        else {
            return false;
        };
        self.shapes_compatible(&l, &r, ignore_return)
    }

    fn find_member(
        &self,
        name: Atom,
        owner: TypeId,
        self_binding: TypeId,
        is_operator: bool,
        class_obj: bool,
    ) -> Option<TypeId> {
        let owner = self.proper(owner);
        let key = self.interner.lookup(owner)?;
        let (class, args) = match key {
            TypeKey::Instance(class, args) => (class, args),
            TypeKey::Tuple(id) => {
                let fallback = self.interner.tuple_shape(id).fallback;
                return self.find_member(name, fallback, self_binding, is_operator, class_obj);
            }
            TypeKey::Literal(id) => {
                let fallback = self.interner.literal_shape(id).fallback;
                return self.find_member(name, fallback, self_binding, is_operator, class_obj);
            }
            TypeKey::TypedDict(id) => {
                let fallback = self.interner.typed_dict_shape(id).fallback;
                return self.find_member(name, fallback, self_binding, is_operator, class_obj);
            }
            TypeKey::Callable(id) => {
                let fallback = self.interner.callable_shape(id).fallback?;
                return self.find_member(name, fallback, self_binding, is_operator, class_obj);
            }
            _ => return None,
        };

        let info = self.defs.class(class)?;
        for &ancestor in &info.mro {
            let ancestor_info = self.defs.class(ancestor)?;
            let Some(MemberInfo { ty, flags }) = ancestor_info.members.get(&name).cloned() else {
                continue;
            };
            // Express the member in terms of the owner's type arguments.
            let mapped = typeops::map_instance_to_ancestor(
                self.interner,
                self.defs,
                self.interner.intern(TypeKey::Instance(class, args)),
                ancestor,
            );
            let member_ty = match self.interner.lookup(mapped) {
                Some(TypeKey::Instance(_, mapped_args)) => {
                    let mapped_args = self.interner.type_list(mapped_args);
                    let subst = typeops::instance_substitution(
                        self.interner,
                        &ancestor_info,
                        &mapped_args,
                    );
                    typeops::instantiate(self.interner, ty, &subst)
                }
                _ => ty,
            };
            if flags.contains(MemberFlags::METHOD) && !class_obj {
                if let Some(TypeKey::Callable(id)) = self.interner.lookup(member_ty) {
                    let shape = self.interner.callable_shape(id);
                    if !shape.params.is_empty() {
                        let bound = CallableShape {
                            params: shape.params[1..].to_vec(),
                            ..(*shape).clone()
                        };
                        return Some(self.interner.callable(bound));
                    }
                }
            }
            return Some(member_ty);
        }
        None
    }

    fn member_flags(&self, name: Atom, owner: TypeId) -> MemberFlags {
        let owner = self.proper(owner);
        let Some(TypeKey::Instance(class, _)) = self.interner.lookup(owner) else {
            return MemberFlags::empty();
        };
        let Some(info) = self.defs.class(class) else {
            return MemberFlags::empty();
        };
        for &ancestor in &info.mro {
            if let Some(ancestor_info) = self.defs.class(ancestor) {
                if let Some(member) = ancestor_info.members.get(&name) {
                    return member.flags;
                }
            }
        }
        MemberFlags::empty()
    }
}

#[cfg(test)]
#[path = "../tests/relate_tests.rs"]
mod tests;
