//! Call-site argument mapping for constraint inference.
//!
//! At a call, each actual argument type must be reshaped into what the formal
//! parameter it maps onto actually receives: a `*args` tuple is spread one
//! item per positional formal, an iterable `*args` contributes its element
//! type, a `**kwargs` typed dict contributes the field named by the formal.
//! [`infer_constraints_for_callable`] folds the per-argument constraint lists
//! into one flat list, always in the supertype-of direction.

use crate::constraints::{ConstraintError, ConstraintResult, Direction, InferenceContext};
use crate::def::ClassStore;
use crate::intern::TypeInterner;
use crate::relate::TypeRelations;
use crate::typeops;
use crate::types::{ArgKind, CallableShape, TypeId, TypeKey};
use pyz_common::interner::Atom;

/// Expands actual argument types to the shape the formal parameter expects.
///
/// Stateful: consecutive positional formals fed from one `*args` tuple each
/// receive the next tuple item.
pub struct ArgTypeExpander<'a> {
    interner: &'a TypeInterner,
    defs: &'a ClassStore,
    /// Next index into a `*args` tuple actual.
    tuple_index: usize,
}

impl<'a> ArgTypeExpander<'a> {
    pub fn new(interner: &'a TypeInterner, defs: &'a ClassStore) -> Self {
        ArgTypeExpander {
            interner,
            defs,
            tuple_index: 0,
        }
    }

    /// Expand a single actual argument type for one formal parameter.
    pub fn expand_actual_type(
        &mut self,
        actual_type: TypeId,
        actual_kind: ArgKind,
        formal_name: Option<Atom>,
        formal_kind: ArgKind,
    ) -> TypeId {
        let actual = typeops::proper_type(self.interner, self.defs, actual_type);
        match actual_kind {
            ArgKind::Star => match self.interner.lookup(actual) {
                Some(TypeKey::Tuple(id)) => {
                    let shape = self.interner.tuple_shape(id);
                    if formal_kind != ArgKind::Star {
                        // Spread one item per fixed formal.
                        let item = shape
                            .items
                            .get(self.tuple_index)
                            .copied()
                            .unwrap_or(TypeId::ANY);
                        self.tuple_index += 1;
                        item
                    } else {
                        actual
                    }
                }
                Some(TypeKey::Instance(..)) => self.iterable_item(actual),
                Some(TypeKey::Any(_)) => actual,
                _ => actual,
            },
            ArgKind::Star2 => match self.interner.lookup(actual) {
                Some(TypeKey::TypedDict(id)) => {
                    let shape = self.interner.typed_dict_shape(id);
                    formal_name
                        .and_then(|name| shape.field(name))
                        .map_or(TypeId::ANY, |f| f.ty)
                }
                Some(TypeKey::Instance(..)) => self.mapping_value(actual),
                _ => actual,
            },
            _ => actual,
        }
    }

    /// Element type of an iterable actual, `Any` when it cannot be derived.
    fn iterable_item(&self, actual: TypeId) -> TypeId {
        let iterable = self.interner.intern_string("typing.Iterable");
        let Some(iterable_class) = self.defs.class_by_name(iterable) else {
            return TypeId::ANY;
        };
        let Some(TypeKey::Instance(class, _)) = self.interner.lookup(actual) else {
            return TypeId::ANY;
        };
        if !self.defs.has_base(class, iterable_class) {
            return TypeId::ANY;
        }
        let mapped =
            typeops::map_instance_to_ancestor(self.interner, self.defs, actual, iterable_class);
        match self.interner.lookup(mapped) {
            Some(TypeKey::Instance(_, args)) => self
                .interner
                .type_list(args)
                .first()
                .copied()
                .unwrap_or(TypeId::ANY),
            _ => TypeId::ANY,
        }
    }

    /// Value type of a mapping actual, `Any` when it cannot be derived.
    fn mapping_value(&self, actual: TypeId) -> TypeId {
        let mapping = self.interner.intern_string("typing.Mapping");
        let Some(mapping_class) = self.defs.class_by_name(mapping) else {
            return TypeId::ANY;
        };
        let Some(TypeKey::Instance(class, _)) = self.interner.lookup(actual) else {
            return TypeId::ANY;
        };
        if !self.defs.has_base(class, mapping_class) {
            return TypeId::ANY;
        }
        let mapped =
            typeops::map_instance_to_ancestor(self.interner, self.defs, actual, mapping_class);
        match self.interner.lookup(mapped) {
            Some(TypeKey::Instance(_, args)) => self
                .interner
                .type_list(args)
                .get(1)
                .copied()
                .unwrap_or(TypeId::ANY),
            _ => TypeId::ANY,
        }
    }
}

/// Infer type-variable constraints for a call: match every actual argument,
/// expanded to its formal's shape, against the formal's declared type.
///
/// `formal_to_actual` maps each formal parameter index to the actual
/// argument indices feeding it. Arguments with no inferred type yet
/// (`None`) are skipped. All constraints are supertype-of: the formal must
/// accept the actual.
pub fn infer_constraints_for_callable<R: TypeRelations>(
    ctx: &InferenceContext<'_, R>,
    interner: &TypeInterner,
    defs: &ClassStore,
    callee: &CallableShape,
    arg_types: &[Option<TypeId>],
    arg_kinds: &[ArgKind],
    formal_to_actual: &[Vec<usize>],
) -> ConstraintResult {
    let mut constraints = Vec::new();
    let mut expander = ArgTypeExpander::new(interner, defs);

    for (i, actuals) in formal_to_actual.iter().enumerate() {
        let Some(formal) = callee.params.get(i) else {
            return Err(ConstraintError::UnexpectedTemplate {
                kind: "out-of-range formal parameter",
            });
        };
        for &actual in actuals {
            let Some(Some(actual_arg_type)) = arg_types.get(actual).copied() else {
                continue;
            };
            let actual_kind = arg_kinds.get(actual).copied().unwrap_or(ArgKind::Pos);
            let actual_type = expander.expand_actual_type(
                actual_arg_type,
                actual_kind,
                formal.name,
                formal.kind,
            );
            constraints.extend(ctx.infer_constraints(
                formal.ty,
                actual_type,
                Direction::SupertypeOf,
            )?);
        }
    }

    Ok(constraints)
}

#[cfg(test)]
#[path = "../tests/argmap_tests.rs"]
mod tests;
