//! Type-variable constraint inference.
//!
//! Matches a template type, which may contain type-variable references,
//! recursively against an actual type which does not contain (the same)
//! references. The result is an ordered list of [`Constraint`] values of the
//! form `T is a supertype/subtype of X`, where `T` is a variable present in
//! the template and `X` is a type with no reference to the template's
//! variables. Constraints are handed to an external solver; duplicates and
//! contradictions are preserved for it to resolve.
//!
//! Reading `(template, actual) --> result`:
//!
//! ```text
//! (T, X)            -->  T :> X
//! (X[T], X[Y])      -->  T <: Y and T :> Y
//! ((T, T), (X, Y))  -->  T :> X and T :> Y
//! ((T, S), (X, Y))  -->  T :> X and S :> Y
//! (X[T], Any)       -->  T <: Any and T :> Any
//! ```

use crate::def::ClassStore;
use crate::intern::TypeInterner;
use crate::queries;
use crate::recursion::{DepthCounter, InferenceStack};
use crate::relate::TypeRelations;
use crate::typeops;
use crate::types::*;
use serde::Serialize;
use std::fmt;
use tracing::{debug, trace};

/// Which relation orientation is being solved.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    SubtypeOf,
    SupertypeOf,
}

impl Direction {
    /// Map subtype-of to supertype-of and vice versa.
    #[inline]
    pub fn neg(self) -> Direction {
        match self {
            Direction::SubtypeOf => Direction::SupertypeOf,
            Direction::SupertypeOf => Direction::SubtypeOf,
        }
    }
}

/// One directed bound on one type variable, produced by one match step.
#[derive(Clone, Debug, Serialize)]
pub struct Constraint {
    /// The variable being bounded.
    pub type_var: TypeVarId,
    /// `SubtypeOf`: the variable must be a subtype of `target`.
    /// `SupertypeOf`: the variable must be a supertype of `target`.
    pub op: Direction,
    pub target: TypeId,
    /// The variable reference this constraint was derived from; carries the
    /// upper bound used for satisfiability filtering.
    pub origin: TypeId,
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        // Origin carries metadata only; identity is (var, op, target).
        self.type_var == other.type_var && self.op == other.op && self.target == other.target
    }
}

impl Eq for Constraint {}

/// Failures that abort an inference request.
///
/// Anything here is a caller-contract violation or known-unimplemented
/// matching, never an "actual doesn't fit" outcome; those produce an empty
/// constraint list instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConstraintError {
    /// A shape that the dispatcher must intercept reached the matcher.
    UnexpectedTemplate { kind: &'static str },
    /// A bare parameter list can only be matched against `Any`.
    ParametersAgainstNonAny,
    /// Matching this shape pair is explicitly unsupported.
    NotImplemented { what: &'static str },
    /// A single-call protocol without a resolvable call member.
    MissingCallMember,
    /// An unpack slot matched a variable-length tuple while the template
    /// carries additional fixed items.
    VariadicSlotMismatch,
}

impl fmt::Display for ConstraintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintError::UnexpectedTemplate { kind } => {
                write!(f, "unexpected {kind} template in constraint matcher")
            }
            ConstraintError::ParametersAgainstNonAny => {
                write!(f, "parameter list cannot be constrained to a non-Any type")
            }
            ConstraintError::NotImplemented { what } => {
                write!(f, "constraint inference for {what} is not implemented")
            }
            ConstraintError::MissingCallMember => {
                write!(f, "call protocol has no resolvable __call__ member")
            }
            ConstraintError::VariadicSlotMismatch => {
                write!(
                    f,
                    "variable-length tuple can only match a lone unpack slot"
                )
            }
        }
    }
}

impl std::error::Error for ConstraintError {}

pub type ConstraintResult = Result<Vec<Constraint>, ConstraintError>;

// Keep plenty of headroom; deeply nested generics recurse once per level
// across dispatcher and matcher.
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW: usize = 4 * 1024 * 1024;

/// Backstop for non-recursive but pathologically deep inputs; exceeding it
/// degrades to "no information" rather than erroring.
const MAX_INFER_DEPTH: u32 = 512;

/// One constraint-inference request.
///
/// Owns the recursion-guard stacks, so independent requests must each use
/// their own context; a context itself is single-threaded.
pub struct InferenceContext<'a, R: TypeRelations> {
    interner: &'a TypeInterner,
    defs: &'a ClassStore,
    relations: &'a R,
    /// (template, actual) pairs currently being inferred, in canonical form.
    inferring: InferenceStack<(TypeId, TypeId)>,
    /// Protocol instances currently being matched structurally.
    protocol_inferring: InferenceStack<TypeId>,
    depth: DepthCounter,
}

impl<'a, R: TypeRelations> InferenceContext<'a, R> {
    pub fn new(interner: &'a TypeInterner, defs: &'a ClassStore, relations: &'a R) -> Self {
        InferenceContext {
            interner,
            defs,
            relations,
            inferring: InferenceStack::new(),
            protocol_inferring: InferenceStack::new(),
            depth: DepthCounter::new(MAX_INFER_DEPTH),
        }
    }

    fn key(&self, ty: TypeId) -> Option<TypeKey> {
        self.interner.lookup(ty)
    }

    fn proper(&self, ty: TypeId) -> TypeId {
        typeops::proper_type(self.interner, self.defs, ty)
    }

    /// Infer constraints for `template` against `actual` in `direction`.
    ///
    /// This is the entry point and also the function every recursive step
    /// goes back through, so the cycle guard sees every pair.
    pub fn infer_constraints(
        &self,
        template: TypeId,
        actual: TypeId,
        direction: Direction,
    ) -> ConstraintResult {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW, || {
            self.infer_constraints_guarded(template, actual, direction)
        })
    }

    fn infer_constraints_guarded(
        &self,
        template: TypeId,
        actual: TypeId,
        direction: Direction,
    ) -> ConstraintResult {
        let canonical = (self.proper(template), self.proper(actual));
        if self.inferring.contains(&canonical) {
            return Ok(Vec::new());
        }
        if self.depth.is_exceeded() {
            debug!(?template, ?actual, "inference depth limit reached, giving up");
            return Ok(Vec::new());
        }
        let _depth = self.depth.enter();
        if queries::has_recursive_types(self.interner, self.defs, template) {
            // May recurse back into itself through the alias cycle.
            if !queries::has_type_vars(self.interner, template) {
                return Ok(Vec::new());
            }
            let _scope = self.inferring.enter(canonical);
            return self.dispatch(template, actual, direction);
        }
        self.dispatch(template, actual, direction)
    }

    /// Union/variable dispatcher: normalizes the operands, peels off the
    /// bare-variable base case and the four union-distribution cases, and
    /// hands everything else to the shape matcher.
    fn dispatch(&self, template: TypeId, actual: TypeId, direction: Direction) -> ConstraintResult {
        let orig_template = template;
        let mut template = self.proper(template);
        let mut actual = self.proper(actual);

        // Inference shouldn't be affected by whether unions have been
        // simplified. Erased items are kept so callers can still see them.
        if let Some(TypeKey::Union(items)) = self.key(template) {
            let items = self.interner.type_list(items);
            template =
                typeops::make_simplified_union(self.interner, self.defs, &items, true);
        }
        if let Some(TypeKey::Union(items)) = self.key(actual) {
            let items = self.interner.type_list(items);
            actual = typeops::make_simplified_union(self.interner, self.defs, &items, true);
        }

        // Any from the suggestion engine is a probe, not an unknown; letting
        // it through would make inference produce Any where a better answer
        // exists.
        if let Some(TypeKey::Any(AnySource::SuggestionEngine)) = self.key(actual) {
            return Ok(Vec::new());
        }

        // A bare variable binds directly. This must come before union
        // handling: "T <: Union[U1, U2]" is not the same as "T <: U1 or
        // T <: U2" because T may itself be that union, and "T :> Union[...]"
        // must stay one constraint because the solver never invents unions.
        if let Some(TypeKey::TypeVar(k)) = self.key(template) {
            let shape = self.interner.type_var_shape(k);
            trace!(var = ?shape.id, ?direction, ?actual, "bind bare variable");
            return Ok(vec![Constraint {
                type_var: shape.id,
                op: direction,
                target: actual,
                origin: template,
            }]);
        }

        // AND distribution: every union item must relate, so concatenate.
        if direction == Direction::SubtypeOf {
            if let Some(TypeKey::Union(items)) = self.key(template) {
                let mut res = Vec::new();
                for &item in self.interner.type_list(items).iter() {
                    res.extend(self.infer_constraints(item, actual, direction)?);
                }
                return Ok(res);
            }
        }
        if direction == Direction::SupertypeOf {
            if let Some(TypeKey::Union(items)) = self.key(actual) {
                let mut res = Vec::new();
                for &item in self.interner.type_list(items).iter() {
                    res.extend(self.infer_constraints(orig_template, item, direction)?);
                }
                return Ok(res);
            }
        }

        // OR distribution: some union item must relate; combine attempts.
        if direction == Direction::SubtypeOf {
            if let Some(TypeKey::Union(items)) = self.key(actual) {
                let items = self.interner.type_list(items);
                let items = simplify_away_incomplete_types(self.interner, &items);
                let mut options = Vec::with_capacity(items.len());
                for &item in &items {
                    options.push(self.infer_constraints_if_possible(template, item, direction)?);
                }
                // Eager: finding constraints for a variable when possible
                // helps real-world cases more than staying indeterminate.
                return Ok(self.any_constraints(&options, true));
            }
        }
        if direction == Direction::SupertypeOf {
            if let Some(TypeKey::Union(items)) = self.key(template) {
                let items = self.interner.type_list(items);
                let mut options = Vec::with_capacity(items.len());
                for &item in items.iter() {
                    options.push(self.infer_constraints_if_possible(item, actual, direction)?);
                }
                // Non-eager: a union template may leave variables
                // indeterminate.
                let result = self.any_constraints(&options, false);
                if !result.is_empty() {
                    return Ok(result);
                }
                if queries::has_recursive_types(self.interner, self.defs, template)
                    && !queries::has_recursive_types(self.interner, self.defs, actual)
                {
                    return self.handle_recursive_union(&items, actual, direction);
                }
                return Ok(Vec::new());
            }
        }

        self.match_template(template, actual, direction)
    }

    /// Like `infer_constraints`, but `None` when the relation is known
    /// unsatisfiable (e.g. template `list[T]` against actual `int`), as
    /// opposed to an empty list for a trivially satisfied relation.
    fn infer_constraints_if_possible(
        &self,
        template: TypeId,
        actual: TypeId,
        direction: Direction,
    ) -> Result<Option<Vec<Constraint>>, ConstraintError> {
        let erased = typeops::erase_type_vars(self.interner, template);
        if direction == Direction::SubtypeOf && !self.relations.is_subtype(erased, actual) {
            return Ok(None);
        }
        if direction == Direction::SupertypeOf && !self.relations.is_subtype(actual, erased) {
            return Ok(None);
        }
        if direction == Direction::SupertypeOf {
            // A bare variable erases to Any above, so its upper bound must be
            // checked separately.
            if let Some(TypeKey::TypeVar(k)) = self.key(self.proper(template)) {
                let bound = self.interner.type_var_shape(k).upper_bound;
                let bound = typeops::erase_type_vars(self.interner, bound);
                if !self.relations.is_subtype(actual, bound) {
                    return Ok(None);
                }
            }
        }
        Ok(Some(self.infer_constraints(template, actual, direction)?))
    }

    /// Recursive-union fallback: split the template union into its
    /// non-variable and bare-variable items and try the groups in turn,
    /// first non-empty result winning. Arbitrary, but it handles the common
    /// `Union[T, Inst[T]]` recursive idiom; the order is pinned by tests.
    fn handle_recursive_union(
        &self,
        items: &[TypeId],
        actual: TypeId,
        direction: Direction,
    ) -> ConstraintResult {
        let (var_items, non_var_items): (Vec<TypeId>, Vec<TypeId>) = items
            .iter()
            .copied()
            .partition(|&t| matches!(self.key(self.proper(t)), Some(TypeKey::TypeVar(_))));
        let first =
            self.infer_constraints(self.interner.union(non_var_items), actual, direction)?;
        if !first.is_empty() {
            return Ok(first);
        }
        self.infer_constraints(self.interner.union(var_items), actual, direction)
    }

    // -----------------------------------------------------------------------
    // Shape matcher
    // -----------------------------------------------------------------------

    /// One case per template shape. The dispatcher has already stripped
    /// aliases, bare variables, and unions; their arms here are contract
    /// violations.
    fn match_template(
        &self,
        template: TypeId,
        actual: TypeId,
        direction: Direction,
    ) -> ConstraintResult {
        let Some(key) = self.key(template) else {
            return Ok(Vec::new());
        };
        match key {
            TypeKey::Any(_)
            | TypeKey::NoneType
            | TypeKey::Never
            | TypeKey::Erased
            | TypeKey::Deleted
            | TypeKey::Unbound
            | TypeKey::Literal(_) => Ok(Vec::new()),
            TypeKey::Partial => Err(ConstraintError::UnexpectedTemplate { kind: "partial" }),
            TypeKey::TypeVar(_) => Err(ConstraintError::UnexpectedTemplate {
                kind: "type variable",
            }),
            TypeKey::Union(_) => Err(ConstraintError::UnexpectedTemplate { kind: "union" }),
            TypeKey::Alias(..) => Err(ConstraintError::UnexpectedTemplate { kind: "alias" }),
            // A parameter specification cannot be inferred from a component
            // value, only through a full callable match.
            TypeKey::ParamSpec(_) => Ok(Vec::new()),
            TypeKey::TypeVarTuple(_) => Err(ConstraintError::NotImplemented {
                what: "a bare variable-arity template",
            }),
            TypeKey::Unpack(_) => Err(ConstraintError::NotImplemented {
                what: "an unpack template",
            }),
            TypeKey::Parameters(id) => {
                // Constraining Any against C[P] arrives here; anything else
                // is a misuse worth failing loudly on.
                if matches!(self.key(actual), Some(TypeKey::Any(_))) {
                    let shape = self.interner.params_shape(id);
                    let types: Vec<TypeId> = shape.params.iter().map(|p| p.ty).collect();
                    self.infer_against_any(&types, actual, direction)
                } else {
                    Err(ConstraintError::ParametersAgainstNonAny)
                }
            }
            TypeKey::Instance(class, args) => {
                self.match_instance(template, class, args, actual, direction)
            }
            TypeKey::Callable(id) => self.match_callable(template, id, actual, direction),
            TypeKey::Overloaded(items) => self.match_overloaded(items, actual, direction),
            TypeKey::Tuple(id) => self.match_tuple(id, actual, direction),
            TypeKey::TypedDict(id) => self.match_typed_dict(id, actual, direction),
            TypeKey::TypeOf(item) => self.match_type_of(item, actual, direction),
        }
    }

    fn match_instance(
        &self,
        template: TypeId,
        template_class: ClassId,
        template_args: TypeListId,
        actual: TypeId,
        direction: Direction,
    ) -> ConstraintResult {
        let original_actual = actual;
        let mut actual = actual;
        let mut res: Vec<Constraint> = Vec::new();
        let Some(template_info) = self.defs.class(template_class) else {
            return Ok(res);
        };

        // Generic callback protocol: match the sole call member directly.
        if matches!(
            self.key(actual),
            Some(TypeKey::Callable(_) | TypeKey::Overloaded(_))
        ) && template_info.is_protocol
        {
            let call_name = self.interner.intern_string("__call__");
            if template_info.protocol_members.as_slice() == [call_name]
                && !self.protocol_inferring.contains(&template)
            {
                let _scope = self.protocol_inferring.enter(template);
                let call = self
                    .relations
                    .find_member(call_name, template, actual, true, false)
                    .ok_or(ConstraintError::MissingCallMember)?;
                let erased = typeops::erase_type_vars(self.interner, call);
                if self.relations.is_subtype(actual, erased) {
                    res.extend(self.infer_constraints(call, actual, direction)?);
                }
                return Ok(res);
            }
        }

        if let Some(TypeKey::Callable(id)) = self.key(actual) {
            let shape = self.interner.callable_shape(id);
            if let Some(fallback) = shape.fallback {
                if shape.is_type_obj && template_info.is_protocol {
                    let mut ret = self.proper(shape.ret);
                    if let Some(TypeKey::Tuple(tid)) = self.key(ret) {
                        ret = self.proper(self.interner.tuple_shape(tid).fallback);
                    }
                    if matches!(self.key(ret), Some(TypeKey::Instance(..))) {
                        let subtype = if direction == Direction::SubtypeOf {
                            template
                        } else {
                            ret
                        };
                        res.extend(self.protocol_constraints(
                            ret, template, subtype, template, true, direction,
                        )?);
                    }
                }
                actual = fallback;
            }
        }

        if let Some(TypeKey::TypeOf(item)) = self.key(actual) {
            if template_info.is_protocol {
                let item = self.proper(item);
                if matches!(self.key(item), Some(TypeKey::Instance(..))) {
                    let subtype = if direction == Direction::SubtypeOf {
                        template
                    } else {
                        item
                    };
                    res.extend(self.protocol_constraints(
                        item, template, subtype, template, true, direction,
                    )?);
                }
            }
        }

        // Unwrap the remaining structured actuals to their class fallbacks.
        if let Some(TypeKey::Overloaded(items)) = self.key(actual) {
            if let Some(&first) = self.interner.callable_list(items).first() {
                if let Some(fallback) = self.interner.callable_shape(first).fallback {
                    actual = fallback;
                }
            }
        }
        if let Some(TypeKey::TypedDict(id)) = self.key(actual) {
            actual = self.proper(self.interner.typed_dict_shape(id).fallback);
        }
        if let Some(TypeKey::Literal(id)) = self.key(actual) {
            actual = self.proper(self.interner.literal_shape(id).fallback);
        }

        if let Some(TypeKey::Instance(actual_class, actual_args)) = self.key(actual) {
            let erased = typeops::erase_type_vars(self.interner, template);
            // Nominal inference first; it is much faster than structural.
            if direction == Direction::SubtypeOf && self.defs.has_base(template_class, actual_class)
            {
                let mapped = typeops::map_instance_to_ancestor(
                    self.interner,
                    self.defs,
                    template,
                    actual_class,
                );
                let Some(TypeKey::Instance(_, mapped_args)) = self.key(mapped) else {
                    return Ok(res);
                };
                let mapped_args = self.interner.type_list(mapped_args);
                let instance_args = self.interner.type_list(actual_args);
                let tvars = self
                    .defs
                    .class(actual_class)
                    .map(|info| info.type_params.clone())
                    .unwrap_or_default();
                for ((&tvar, &mapped_arg), &instance_arg) in
                    tvars.iter().zip(mapped_args.iter()).zip(instance_args.iter())
                {
                    self.nominal_arg_constraints(
                        tvar,
                        mapped_arg,
                        instance_arg,
                        direction,
                        &mut res,
                    )?;
                }
                return Ok(res);
            } else if direction == Direction::SupertypeOf
                && self.defs.has_base(actual_class, template_class)
            {
                let mapped = typeops::map_instance_to_ancestor(
                    self.interner,
                    self.defs,
                    actual,
                    template_class,
                );
                let Some(TypeKey::Instance(_, mapped_args)) = self.key(mapped) else {
                    return Ok(res);
                };
                let mapped_args = self.interner.type_list(mapped_args).to_vec();
                let template_args = self.interner.type_list(template_args).to_vec();
                let mut tvars = template_info.type_params.clone();
                let (mapped_args, template_args) = if let Some(idx) =
                    template_info.type_var_tuple_index
                {
                    let Some((m_pre, m_mid, m_suf)) =
                        typeops::split_with_instance(self.defs, template_class, &mapped_args)
                    else {
                        return Ok(res);
                    };
                    let Some((t_pre, t_mid, t_suf)) =
                        typeops::split_with_instance(self.defs, template_class, &template_args)
                    else {
                        return Ok(res);
                    };

                    // Bind the variable-arity slot to the middle, then match
                    // the fixed prefix/suffix below without it.
                    if let Some(unpack) =
                        typeops::extract_unpack(self.interner, self.defs, &t_mid)
                    {
                        match self.key(unpack) {
                            Some(TypeKey::TypeVarTuple(k)) => {
                                let shape = self.interner.type_var_tuple_shape(k);
                                res.push(Constraint {
                                    type_var: shape.id,
                                    op: Direction::SupertypeOf,
                                    target: self.interner.tuple(m_mid.clone(), TypeId::ANY),
                                    origin: unpack,
                                });
                            }
                            Some(TypeKey::Instance(unpack_class, unpack_args))
                                if self.class_name_is(unpack_class, "builtins.tuple") =>
                            {
                                let unpack_args = self.interner.type_list(unpack_args);
                                if let Some(&elem) = unpack_args.first() {
                                    for &item in &m_mid {
                                        res.extend(
                                            self.infer_constraints(elem, item, direction)?,
                                        );
                                    }
                                }
                            }
                            Some(TypeKey::Tuple(utid)) => {
                                let unpacked = self.interner.tuple_shape(utid);
                                if unpacked.items.len() == m_mid.len() {
                                    for (&t, &a) in unpacked.items.iter().zip(m_mid.iter()) {
                                        res.extend(self.infer_constraints(t, a, direction)?);
                                    }
                                }
                            }
                            _ => {}
                        }
                    }

                    let mapped_args: Vec<TypeId> =
                        m_pre.iter().chain(m_suf.iter()).copied().collect();
                    let template_args: Vec<TypeId> =
                        t_pre.iter().chain(t_suf.iter()).copied().collect();
                    tvars.remove(idx);
                    (mapped_args, template_args)
                } else {
                    (mapped_args, template_args)
                };
                for ((&tvar, &mapped_arg), &template_arg) in
                    tvars.iter().zip(mapped_args.iter()).zip(template_args.iter())
                {
                    self.nominal_arg_constraints(
                        tvar,
                        template_arg,
                        mapped_arg,
                        direction,
                        &mut res,
                    )?;
                }
                return Ok(res);
            }

            // Structural inference, guarded against protocol reentry. This
            // never produces false constraints but gives up early on purely
            // structural cycles.
            if template_info.is_protocol
                && direction == Direction::SupertypeOf
                && !self.protocol_inferring.contains(&template)
                && self.relations.is_protocol_implementation(actual, erased)
            {
                let _scope = self.protocol_inferring.enter(template);
                res.extend(self.protocol_constraints(
                    actual,
                    template,
                    original_actual,
                    template,
                    false,
                    direction,
                )?);
                return Ok(res);
            }
            let actual_is_protocol = self
                .defs
                .class(actual_class)
                .is_some_and(|info| info.is_protocol);
            if actual_is_protocol
                && direction == Direction::SubtypeOf
                && !self.protocol_inferring.contains(&actual)
                && self.relations.is_protocol_implementation(erased, actual)
            {
                let _scope = self.protocol_inferring.enter(actual);
                res.extend(self.protocol_constraints(
                    actual, template, template, actual, false, direction,
                )?);
                return Ok(res);
            }
        }

        if !res.is_empty() {
            return Ok(res);
        }

        match self.key(actual) {
            Some(TypeKey::Any(_)) => {
                let args = self.interner.type_list(template_args).to_vec();
                self.infer_against_any(&args, actual, direction)
            }
            Some(TypeKey::Tuple(tid))
                if direction == Direction::SupertypeOf
                    && self.defs.is_tuple_like(self.interner, template_class) =>
            {
                let args = self.interner.type_list(template_args);
                let Some(&elem) = args.first() else {
                    return Ok(res);
                };
                for &item in &self.interner.tuple_shape(tid).items {
                    res.extend(self.infer_constraints(elem, item, Direction::SupertypeOf)?);
                }
                Ok(res)
            }
            Some(TypeKey::Tuple(tid)) if direction == Direction::SupertypeOf => {
                let fallback = self.interner.tuple_shape(tid).fallback;
                self.infer_constraints(template, fallback, direction)
            }
            Some(TypeKey::TypeVar(k)) => {
                let shape = self.interner.type_var_shape(k);
                if shape.values == TypeListId::EMPTY {
                    self.infer_constraints(template, shape.upper_bound, direction)
                } else {
                    Ok(res)
                }
            }
            Some(TypeKey::ParamSpec(k)) => {
                let bound = self.interner.param_spec_shape(k).upper_bound;
                self.infer_constraints(template, bound, direction)
            }
            Some(TypeKey::TypeVarTuple(_)) => Err(ConstraintError::NotImplemented {
                what: "a variable-arity actual against an instance",
            }),
            _ => Ok(res),
        }
    }

    /// Constraints for one aligned (declared parameter, template-side arg,
    /// actual-side arg) triple of a nominal instance match.
    fn nominal_arg_constraints(
        &self,
        tvar: TypeId,
        template_arg: TypeId,
        actual_arg: TypeId,
        direction: Direction,
        res: &mut Vec<Constraint>,
    ) -> Result<(), ConstraintError> {
        match self.key(tvar) {
            Some(TypeKey::TypeVar(k)) => {
                let variance = self.interner.type_var_shape(k).variance;
                // Invariant parameters constrain both directions.
                if variance != Variance::Contravariant {
                    res.extend(self.infer_constraints(template_arg, actual_arg, direction)?);
                }
                if variance != Variance::Covariant {
                    res.extend(self.infer_constraints(template_arg, actual_arg, direction.neg())?);
                }
                Ok(())
            }
            Some(TypeKey::ParamSpec(_))
                if matches!(self.key(template_arg), Some(TypeKey::ParamSpec(_))) =>
            {
                self.param_spec_arg_constraints(template_arg, actual_arg, direction, res)
            }
            Some(TypeKey::TypeVarTuple(_)) => Err(ConstraintError::NotImplemented {
                what: "a variable-arity parameter in this direction",
            }),
            _ => Ok(()),
        }
    }

    /// A parameter-specification-typed instance argument: split the operand
    /// at the formal's own prefix, bind the remainder (return type erased)
    /// with a fixed subtype-of direction, then match the aligned prefix
    /// contravariantly. A bare parameter-specification operand binds whole.
    fn param_spec_arg_constraints(
        &self,
        formal: TypeId,
        operand: TypeId,
        direction: Direction,
        res: &mut Vec<Constraint>,
    ) -> Result<(), ConstraintError> {
        let Some(TypeKey::ParamSpec(k)) = self.key(formal) else {
            return Ok(());
        };
        let shape = self.interner.param_spec_shape(k);
        let prefix = self.interner.params_shape(shape.prefix);
        let prefix_len = prefix.params.len();
        let operand = self.proper(operand);

        match self.key(operand) {
            Some(TypeKey::Callable(cid)) => {
                let cshape = self.interner.callable_shape(cid);
                let split = prefix_len.min(cshape.params.len());
                let remainder = CallableShape {
                    params: cshape.params[split..].to_vec(),
                    ret: TypeId::NONE,
                    from_concatenate: prefix_len > 0 || cshape.from_concatenate,
                    ..(*cshape).clone()
                };
                res.push(Constraint {
                    type_var: shape.id,
                    op: Direction::SubtypeOf,
                    target: self.interner.callable(remainder),
                    origin: formal,
                });
                for (t, a) in prefix.params.iter().zip(cshape.params.iter().take(split)) {
                    res.extend(self.infer_constraints(t.ty, a.ty, direction.neg())?);
                }
                Ok(())
            }
            Some(TypeKey::Parameters(pid)) => {
                let pshape = self.interner.params_shape(pid);
                let split = prefix_len.min(pshape.params.len());
                let remainder = pshape.params[split..].to_vec();
                res.push(Constraint {
                    type_var: shape.id,
                    op: Direction::SubtypeOf,
                    target: self.interner.parameters(remainder),
                    origin: formal,
                });
                for (t, a) in prefix.params.iter().zip(pshape.params.iter().take(split)) {
                    res.extend(self.infer_constraints(t.ty, a.ty, direction.neg())?);
                }
                Ok(())
            }
            Some(TypeKey::ParamSpec(_)) => {
                res.push(Constraint {
                    type_var: shape.id,
                    op: Direction::SubtypeOf,
                    target: operand,
                    origin: formal,
                });
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Protocol structural matcher: one constraint pair per declared member,
    /// both directions for settable members. `subtype` binds the receiver
    /// during lookup; `protocol` names which of the two sides declares the
    /// interface.
    fn protocol_constraints(
        &self,
        instance: TypeId,
        template: TypeId,
        subtype: TypeId,
        protocol: TypeId,
        class_obj: bool,
        direction: Direction,
    ) -> ConstraintResult {
        let Some(TypeKey::Instance(proto_class, _)) = self.key(protocol) else {
            return Ok(Vec::new());
        };
        let Some(proto_info) = self.defs.class(proto_class) else {
            return Ok(Vec::new());
        };
        let mut res = Vec::new();
        for &member in &proto_info.protocol_members {
            let inst = self
                .relations
                .find_member(member, instance, subtype, false, class_obj);
            let temp = self.relations.find_member(member, template, subtype, false, false);
            let (Some(inst), Some(temp)) = (inst, temp) else {
                // A missing member means the match attempt is void; partial
                // constraint sets would contradict the compatibility report
                // made elsewhere.
                return Ok(Vec::new());
            };
            res.extend(self.infer_constraints(temp, inst, direction)?);
            if self
                .relations
                .member_flags(member, protocol)
                .contains(MemberFlags::SETTABLE)
            {
                // Settable members are invariant.
                res.extend(self.infer_constraints(temp, inst, direction.neg())?);
            }
        }
        Ok(res)
    }

    fn match_callable(
        &self,
        template: TypeId,
        template_id: CallableId,
        actual: TypeId,
        direction: Direction,
    ) -> ConstraintResult {
        // Normalize before matching; annotations (e.g. callback protocols)
        // can carry non-normalized signatures.
        let tshape = self.interner.callable_shape(template_id);
        let tshape = typeops::normalize_trailing_kwargs(self.interner, &tshape)
            .unwrap_or_else(|| (*tshape).clone());

        match self.key(actual) {
            Some(TypeKey::Callable(actual_id)) => {
                let ashape = self.interner.callable_shape(actual_id);
                let ashape = typeops::normalize_trailing_kwargs(self.interner, &ashape)
                    .unwrap_or_else(|| (*ashape).clone());
                let mut res = Vec::new();

                match typeops::param_spec_tail(self.interner, &tshape) {
                    None => {
                        // No constraints from arguments when the template
                        // accepts anything.
                        if !tshape.is_ellipsis {
                            // Lengths should match; zip instead of indexing
                            // so a mismatch degrades instead of crashing.
                            for (t, a) in tshape.params.iter().zip(ashape.params.iter()) {
                                // Parameters are contravariant.
                                res.extend(
                                    self.infer_constraints(t.ty, a.ty, direction.neg())?,
                                );
                            }
                        }
                    }
                    Some((ps, tail_start)) => {
                        let Some(TypeKey::ParamSpec(psk)) = self.key(ps) else {
                            return Ok(res);
                        };
                        let ps_id = self.interner.param_spec_shape(psk).id;
                        let mut prefix_len = tail_start;
                        match typeops::param_spec_tail(self.interner, &ashape) {
                            None => {
                                let max_prefix = ashape
                                    .params
                                    .iter()
                                    .filter(|p| {
                                        matches!(p.kind, ArgKind::Pos | ArgKind::Opt)
                                    })
                                    .count();
                                prefix_len = prefix_len.min(max_prefix);
                                let remainder = CallableShape {
                                    params: ashape.params[prefix_len..].to_vec(),
                                    ret: TypeId::NONE,
                                    ..ashape.clone()
                                };
                                res.push(Constraint {
                                    type_var: ps_id,
                                    op: Direction::SubtypeOf,
                                    target: self.interner.callable(remainder),
                                    origin: ps,
                                });
                            }
                            Some((actual_ps, _)) => {
                                res.push(Constraint {
                                    type_var: ps_id,
                                    op: Direction::SubtypeOf,
                                    target: actual_ps,
                                    origin: ps,
                                });
                            }
                        }
                        for (t, a) in tshape.params[..tail_start]
                            .iter()
                            .zip(ashape.params.iter().take(prefix_len))
                        {
                            res.extend(self.infer_constraints(t.ty, a.ty, direction.neg())?);
                        }
                    }
                }

                // A narrowing predicate overrides the return type on either
                // side.
                let t_ret = tshape.inference_ret();
                let a_ret = ashape.inference_ret();
                res.extend(self.infer_constraints(t_ret, a_ret, direction)?);
                Ok(res)
            }
            Some(TypeKey::Any(_)) => {
                let any = TypeId::ANY_FROM_ANOTHER;
                let mut res = match typeops::param_spec_tail(self.interner, &tshape) {
                    None => {
                        let types: Vec<TypeId> = tshape.params.iter().map(|p| p.ty).collect();
                        self.infer_against_any(&types, actual, direction)?
                    }
                    Some((ps, _)) => {
                        let Some(TypeKey::ParamSpec(psk)) = self.key(ps) else {
                            return Ok(Vec::new());
                        };
                        vec![Constraint {
                            type_var: self.interner.param_spec_shape(psk).id,
                            op: Direction::SubtypeOf,
                            target: self.interner.callable(typeops::ellipsis_callable(any, any)),
                            origin: ps,
                        }]
                    }
                };
                res.extend(self.infer_constraints(tshape.ret, any, direction)?);
                Ok(res)
            }
            Some(TypeKey::Overloaded(items)) => {
                // Match only the first call-compatible item. A heuristic,
                // but a reliable general answer needs whole-program search.
                let Some(item) = self.find_matching_overload_item(items, template) else {
                    return Ok(Vec::new());
                };
                self.infer_constraints(template, item, direction)
            }
            Some(TypeKey::TypeOf(item)) => self.infer_constraints(tshape.ret, item, direction),
            Some(TypeKey::Instance(..)) => {
                // Instances with a call member are structural subtypes of
                // compatible callables.
                let call_name = self.interner.intern_string("__call__");
                match self
                    .relations
                    .find_member(call_name, actual, actual, true, false)
                {
                    Some(call) => self.infer_constraints(template, call, direction),
                    None => Ok(Vec::new()),
                }
            }
            _ => Ok(Vec::new()),
        }
    }

    /// First overload item call-compatible with the template, ignoring
    /// return types (the template's may be indeterminate); the declared
    /// first item when none is compatible.
    fn find_matching_overload_item(
        &self,
        items: CallableListId,
        template: TypeId,
    ) -> Option<TypeId> {
        let items = self.interner.callable_list(items);
        for &item in items.iter() {
            let item_ty = self.interner.intern(TypeKey::Callable(item));
            if self.relations.is_callable_compatible(item_ty, template, true) {
                return Some(item_ty);
            }
        }
        items
            .first()
            .map(|&item| self.interner.intern(TypeKey::Callable(item)))
    }

    /// Like `find_matching_overload_item`, but all matches; all items when
    /// none is compatible.
    fn find_matching_overload_items(
        &self,
        items: CallableListId,
        template: TypeId,
    ) -> Vec<TypeId> {
        let items = self.interner.callable_list(items);
        let mut res: Vec<TypeId> = items
            .iter()
            .map(|&item| self.interner.intern(TypeKey::Callable(item)))
            .filter(|&item| self.relations.is_callable_compatible(item, template, true))
            .collect();
        if res.is_empty() {
            res = items
                .iter()
                .map(|&item| self.interner.intern(TypeKey::Callable(item)))
                .collect();
        }
        res
    }

    fn match_overloaded(
        &self,
        template_items: CallableListId,
        actual: TypeId,
        direction: Direction,
    ) -> ConstraintResult {
        let items = if matches!(self.key(actual), Some(TypeKey::Callable(_))) {
            self.find_matching_overload_items(template_items, actual)
        } else {
            self.interner
                .callable_list(template_items)
                .iter()
                .map(|&item| self.interner.intern(TypeKey::Callable(item)))
                .collect()
        };
        let mut res = Vec::new();
        for item in items {
            res.extend(self.infer_constraints(item, actual, direction)?);
        }
        Ok(res)
    }

    fn match_tuple(
        &self,
        template_id: TupleId,
        actual: TypeId,
        direction: Direction,
    ) -> ConstraintResult {
        let tshape = self.interner.tuple_shape(template_id);
        let is_varlength_tuple = match self.key(actual) {
            Some(TypeKey::Instance(class, _)) => self.class_name_is(class, "builtins.tuple"),
            _ => false,
        };

        if let Some(unpack_index) = queries::find_unpack_in_list(self.interner, &tshape.items) {
            let Some(TypeKey::Unpack(inner)) = self.key(tshape.items[unpack_index]) else {
                return Ok(Vec::new());
            };
            let unpacked = self.proper(inner);
            if let Some(TypeKey::TypeVarTuple(k)) = self.key(unpacked) {
                if is_varlength_tuple && tshape.items.len() != 1 {
                    return Err(ConstraintError::VariadicSlotMismatch);
                }
                let actual_is_tuple = matches!(self.key(actual), Some(TypeKey::Tuple(_)));
                let actual_is_any = matches!(self.key(actual), Some(TypeKey::Any(_)));
                if actual_is_tuple || actual_is_any || is_varlength_tuple {
                    let target = if let Some(TypeKey::Tuple(aid)) = self.key(actual) {
                        let ashape = self.interner.tuple_shape(aid);
                        let suffix = tshape.items.len() - unpack_index - 1;
                        let Some((_, middle, _)) = typeops::split_prefix_middle_suffix(
                            &ashape.items,
                            unpack_index,
                            suffix,
                        ) else {
                            return Ok(Vec::new());
                        };
                        self.interner.tuple(middle.to_vec(), ashape.fallback)
                    } else {
                        actual
                    };
                    let shape = self.interner.type_var_tuple_shape(k);
                    return Ok(vec![Constraint {
                        type_var: shape.id,
                        op: direction,
                        target,
                        origin: unpacked,
                    }]);
                }
            }
            // A non-variable unpack slot falls through to the fixed-arity
            // comparison below.
        }

        match self.key(actual) {
            Some(TypeKey::Tuple(aid)) => {
                let ashape = self.interner.tuple_shape(aid);
                if ashape.items.len() != tshape.items.len() {
                    return Ok(Vec::new());
                }
                // For named tuples the fallbacks usually give better
                // results than per-element matching.
                if self.is_named_tuple_fallback(tshape.fallback)
                    && self.is_named_tuple_fallback(ashape.fallback)
                {
                    return self.infer_constraints(tshape.fallback, ashape.fallback, direction);
                }
                let mut res = Vec::new();
                for (&t, &a) in tshape.items.iter().zip(ashape.items.iter()) {
                    res.extend(self.infer_constraints(t, a, direction)?);
                }
                Ok(res)
            }
            Some(TypeKey::Any(_)) => self.infer_against_any(&tshape.items, actual, direction),
            _ => Ok(Vec::new()),
        }
    }

    fn match_typed_dict(
        &self,
        template_id: TypedDictId,
        actual: TypeId,
        direction: Direction,
    ) -> ConstraintResult {
        let tshape = self.interner.typed_dict_shape(template_id);
        match self.key(actual) {
            Some(TypeKey::TypedDict(aid)) => {
                let ashape = self.interner.typed_dict_shape(aid);
                let mut res = Vec::new();
                // Non-matching keys are ignored; compatibility is checked
                // elsewhere, so this is not unsafe.
                for field in &tshape.fields {
                    if let Some(actual_field) = ashape.field(field.name) {
                        res.extend(self.infer_constraints(
                            field.ty,
                            actual_field.ty,
                            direction,
                        )?);
                    }
                }
                Ok(res)
            }
            Some(TypeKey::Any(_)) => {
                let types: Vec<TypeId> = tshape.fields.iter().map(|f| f.ty).collect();
                self.infer_against_any(&types, actual, direction)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn match_type_of(
        &self,
        item: TypeId,
        actual: TypeId,
        direction: Direction,
    ) -> ConstraintResult {
        match self.key(actual) {
            Some(TypeKey::Callable(id)) => {
                let ret = self.interner.callable_shape(id).ret;
                self.infer_constraints(item, ret, direction)
            }
            Some(TypeKey::Overloaded(items)) => {
                let Some(&first) = self.interner.callable_list(items).first() else {
                    return Ok(Vec::new());
                };
                let ret = self.interner.callable_shape(first).ret;
                self.infer_constraints(item, ret, direction)
            }
            Some(TypeKey::TypeOf(actual_item)) => {
                self.infer_constraints(item, actual_item, direction)
            }
            Some(TypeKey::Any(_)) => self.infer_constraints(item, actual, direction),
            _ => Ok(Vec::new()),
        }
    }

    /// Match every component against `Any`, keeping the original direction:
    /// for `Any` targets direction is mostly irrelevant, and equality checks
    /// on such constraints ignore it.
    fn infer_against_any(
        &self,
        types: &[TypeId],
        any: TypeId,
        direction: Direction,
    ) -> ConstraintResult {
        let mut res = Vec::new();
        for &t in types {
            res.extend(self.infer_constraints(t, any, direction)?);
        }
        Ok(res)
    }

    // -----------------------------------------------------------------------
    // Ambiguity combinator
    // -----------------------------------------------------------------------

    /// Deduce what we can from alternative constraint lists, of which at
    /// least one must hold. `None` options are unsatisfiable and ignored;
    /// empty options are additionally ignored when `eager` (they are
    /// trivially satisfiable).
    pub fn any_constraints(
        &self,
        options: &[Option<Vec<Constraint>>],
        eager: bool,
    ) -> Vec<Constraint> {
        let valid: Vec<&Vec<Constraint>> = if eager {
            options
                .iter()
                .flatten()
                .filter(|o| !o.is_empty())
                .collect()
        } else {
            options.iter().flatten().collect()
        };

        if valid.is_empty() {
            return Vec::new();
        }
        if valid.len() == 1 {
            return valid[0].clone();
        }

        if valid[1..]
            .iter()
            .all(|c| self.is_same_constraints(valid[0], c))
        {
            // All the same; pick any one.
            return valid[0].clone();
        }

        if valid[1..]
            .iter()
            .all(|c| self.is_similar_constraints(valid[0], c))
        {
            // Same structure, different targets. Merge the trivial options
            // (those that only constrain against Any) into the rest and
            // retry.
            let trivial: Vec<bool> = valid
                .iter()
                .map(|option| option.iter().all(|c| self.target_is_any(c)))
                .collect();
            let trivial_count = trivial.iter().filter(|&&t| t).count();
            if trivial_count > 0 && trivial_count < valid.len() {
                let merged: Vec<Option<Vec<Constraint>>> = valid
                    .iter()
                    .zip(&trivial)
                    .filter(|&(_, &is_trivial)| !is_trivial)
                    .map(|(option, _)| {
                        Some(option.iter().map(|c| self.merge_with_any(c)).collect())
                    })
                    .collect();
                return self.any_constraints(&merged, eager);
            }
        }

        // Exclude constraints that are trivially unsatisfiable against their
        // variable's upper bound, and compare again.
        let filtered: Vec<Option<Vec<Constraint>>> = options
            .iter()
            .map(|o| self.filter_satisfiable(o.as_deref()))
            .collect();
        if filtered.as_slice() != options {
            return self.any_constraints(&filtered, eager);
        }

        // No valid options, or multiple inconsistent ones. Deduce nothing
        // rather than pick arbitrarily.
        Vec::new()
    }

    /// Keep only constraints whose target can possibly satisfy the
    /// variable's upper bound; an option emptied this way becomes
    /// unsatisfiable.
    fn filter_satisfiable(&self, option: Option<&[Constraint]>) -> Option<Vec<Constraint>> {
        let list = option?;
        if list.is_empty() {
            return Some(Vec::new());
        }
        let satisfiable: Vec<Constraint> = list
            .iter()
            .filter(|c| {
                self.relations
                    .is_subtype(c.target, self.upper_bound_of(c))
            })
            .cloned()
            .collect();
        if satisfiable.is_empty() {
            None
        } else {
            Some(satisfiable)
        }
    }

    fn upper_bound_of(&self, c: &Constraint) -> TypeId {
        match self.key(c.origin) {
            Some(TypeKey::TypeVar(k)) => self.interner.type_var_shape(k).upper_bound,
            Some(TypeKey::ParamSpec(k)) => self.interner.param_spec_shape(k).upper_bound,
            Some(TypeKey::TypeVarTuple(k)) => self.interner.type_var_tuple_shape(k).upper_bound,
            _ => TypeId::ANY,
        }
    }

    fn target_is_any(&self, c: &Constraint) -> bool {
        matches!(self.key(self.proper(c.target)), Some(TypeKey::Any(_)))
    }

    /// Widen a constraint's target into a union with a distinguished
    /// internal `Any`, so it can absorb a trivial alternative.
    fn merge_with_any(&self, c: &Constraint) -> Constraint {
        if queries::is_union_with_any(self.interner, c.target) {
            // Do not produce redundant unions.
            return c.clone();
        }
        Constraint {
            type_var: c.type_var,
            op: c.op,
            target: self
                .interner
                .union2(c.target, TypeId::ANY_IMPLEMENTATION),
            origin: c.origin,
        }
    }

    fn is_same_constraints(&self, x: &[Constraint], y: &[Constraint]) -> bool {
        x.iter()
            .all(|c1| y.iter().any(|c2| self.is_same_constraint(c1, c2)))
            && y.iter()
                .all(|c1| x.iter().any(|c2| self.is_same_constraint(c1, c2)))
    }

    fn is_same_constraint(&self, c1: &Constraint, c2: &Constraint) -> bool {
        // Direction is ignored when comparing constraints against Any.
        let skip_op_check = self.target_is_any(c1) && self.target_is_any(c2);
        c1.type_var == c2.type_var
            && (c1.op == c2.op || skip_op_check)
            && self.relations.is_same_type(c1.target, c2.target)
    }

    /// Same (variable, direction) pairs on both sides, ignoring targets;
    /// direction is ignored when either target is Any.
    fn is_similar_constraints(&self, x: &[Constraint], y: &[Constraint]) -> bool {
        self.is_similar_one_way(x, y) && self.is_similar_one_way(y, x)
    }

    fn is_similar_one_way(&self, x: &[Constraint], y: &[Constraint]) -> bool {
        x.iter().all(|c1| {
            y.iter().any(|c2| {
                let skip_op_check = self.target_is_any(c1) || self.target_is_any(c2);
                c1.type_var == c2.type_var && (c1.op == c2.op || skip_op_check)
            })
        })
    }

    fn class_name_is(&self, class: ClassId, name: &str) -> bool {
        self.defs
            .class(class)
            .is_some_and(|info| self.interner.resolve_atom(info.name).as_ref() == name)
    }

    fn is_named_tuple_fallback(&self, fallback: TypeId) -> bool {
        match self.key(self.proper(fallback)) {
            Some(TypeKey::Instance(class, _)) => self
                .defs
                .class(class)
                .is_some_and(|info| info.is_named_tuple),
            _ => false,
        }
    }
}

/// Drop union alternatives with uninhabited components, unless that would
/// drop everything.
fn simplify_away_incomplete_types(interner: &TypeInterner, items: &[TypeId]) -> Vec<TypeId> {
    let complete: Vec<TypeId> = items
        .iter()
        .copied()
        .filter(|&t| queries::is_complete_type(interner, t))
        .collect();
    if complete.is_empty() {
        items.to_vec()
    } else {
        complete
    }
}

#[cfg(test)]
#[path = "../tests/constraints_tests.rs"]
mod tests;
