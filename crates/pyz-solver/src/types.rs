//! Core type representation for the solver.
//!
//! Every type is interned into a lightweight [`TypeId`] handle; the structure
//! behind a handle is a [`TypeKey`]. Keys are small `Copy` values: composite
//! shapes (callables, tuples, typed dicts, variable definitions) live in side
//! tables inside the interner and are referenced through dedicated id newtypes.
//!
//! Benefits:
//! - O(1) type equality (just compare TypeId values)
//! - Memory efficient (each unique structure stored once)
//! - Cache-friendly (work with u32 handles instead of heap objects)

use bitflags::bitflags;
use pyz_common::interner::Atom;
use serde::Serialize;

/// Interned type handle.
///
/// Two `TypeId`s are equal iff they denote the structurally identical type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeId(pub u32);

impl TypeId {
    /// The dynamic type, `Any`, from an explicit annotation.
    pub const ANY: TypeId = TypeId(0);
    /// `None` (the singleton value's type).
    pub const NONE: TypeId = TypeId(1);
    /// The uninhabited bottom type (`Never`).
    pub const NEVER: TypeId = TypeId(2);
    /// Erased placeholder produced while solving; matches anything.
    pub const ERASED: TypeId = TypeId(3);
    /// Type of a name deleted by control flow (`del x`).
    pub const DELETED: TypeId = TypeId(4);
    /// Unresolved forward reference that never got bound.
    pub const UNBOUND: TypeId = TypeId(5);
    /// Partially-inferred type (e.g. `x = []` before first use).
    pub const PARTIAL: TypeId = TypeId(6);
    /// `Any` produced by the interactive suggestion engine.
    pub const ANY_SUGGESTION: TypeId = TypeId(7);
    /// `Any` that exists only as an implementation artifact of inference.
    pub const ANY_IMPLEMENTATION: TypeId = TypeId(8);
    /// `Any` propagated from another `Any`.
    pub const ANY_FROM_ANOTHER: TypeId = TypeId(9);

    /// Number of pre-interned types; fresh ids start here.
    pub(crate) const FIRST_DYNAMIC: u32 = 10;

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where an `Any` type came from.
///
/// The provenance matters to inference: suggestion-engine `Any`s suppress
/// constraint generation entirely, and implementation-artifact `Any`s are
/// used to repair polymorphic-application constraint sets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AnySource {
    /// Written in source (`x: Any`) or from a missing import.
    Explicit,
    /// Produced by the interactive suggestion engine while probing.
    SuggestionEngine,
    /// Derived from another `Any` (e.g. member access on `Any`).
    FromAnotherAny,
    /// Manufactured internally by the checker, never user-visible.
    ImplementationArtifact,
}

/// Interned class (nominal type definition) handle. Allocated by `ClassStore`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClassId(pub u32);

/// Interned type-alias definition handle. Allocated by `ClassStore`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct AliasId(pub u32);

/// Identity of a type-variable definition (plain, parameter-specification,
/// or variable-arity). Constraints are keyed by this id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeVarId(pub u32);

/// Interned `Vec<TypeId>` handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TypeListId(pub u32);

impl TypeListId {
    /// The empty list (pre-interned at index 0).
    pub const EMPTY: TypeListId = TypeListId(0);
}

/// Interned `Vec<CallableId>` handle (overload items).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CallableListId(pub u32);

/// Interned [`CallableShape`] handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CallableId(pub u32);

/// Interned [`ParamsShape`] handle (a bare parameter list).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ParamsId(pub u32);

/// Interned [`TupleShape`] handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TupleId(pub u32);

/// Interned [`TypedDictShape`] handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TypedDictId(pub u32);

/// Interned [`LiteralShape`] handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct LiteralId(pub u32);

/// Interned [`TypeVarShape`] handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TypeVarKey(pub u32);

/// Interned [`ParamSpecShape`] handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ParamSpecKey(pub u32);

/// Interned [`TypeVarTupleShape`] handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TypeVarTupleKey(pub u32);

/// The structural identity of a type.
///
/// This enum is closed: every type the solver can reason about is one of
/// these shapes. Composite payloads are referenced through side-table ids so
/// the key itself stays `Copy` and hashable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TypeKey {
    /// The dynamic type. Compatible with everything in both directions.
    Any(AnySource),
    /// The type of `None`.
    NoneType,
    /// The uninhabited bottom type.
    Never,
    /// Erased placeholder produced during solving.
    Erased,
    /// Type of a deleted name.
    Deleted,
    /// Unresolved reference.
    Unbound,
    /// Partially-inferred container type.
    Partial,
    /// Literal type (`Literal[3]`, `Literal["x"]`).
    Literal(LiteralId),
    /// Plain type variable (`T`).
    TypeVar(TypeVarKey),
    /// Parameter-specification variable (`P`).
    ParamSpec(ParamSpecKey),
    /// Variable-arity type variable (`Ts`).
    TypeVarTuple(TypeVarTupleKey),
    /// `Unpack[...]` marker wrapping a variable-arity operand.
    Unpack(TypeId),
    /// A bare parameter list, the value space of a `ParamSpec`.
    Parameters(ParamsId),
    /// Class instance with type arguments (`list[int]`).
    Instance(ClassId, TypeListId),
    /// Single-signature callable.
    Callable(CallableId),
    /// Overloaded callable (two or more signatures).
    Overloaded(CallableListId),
    /// Fixed-shape tuple (`tuple[int, str]`).
    Tuple(TupleId),
    /// Structural dict with per-key value types.
    TypedDict(TypedDictId),
    /// Untagged union of alternatives.
    Union(TypeListId),
    /// `type[X]`: the type object producing instances of `X`.
    TypeOf(TypeId),
    /// Reference to a (possibly recursive) type alias with arguments.
    Alias(AliasId, TypeListId),
}

/// Declared variance of a type parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Variance {
    Invariant,
    Covariant,
    Contravariant,
}

/// How a formal parameter (or an actual argument) is passed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ArgKind {
    /// Required positional parameter.
    Pos,
    /// Positional parameter with a default.
    Opt,
    /// `*args` variadic.
    Star,
    /// Required keyword-only parameter.
    Named,
    /// Keyword-only parameter with a default.
    NamedOpt,
    /// `**kwargs` variadic.
    Star2,
}

impl ArgKind {
    /// One of the two variadic kinds.
    #[inline]
    pub fn is_star(self) -> bool {
        matches!(self, ArgKind::Star | ArgKind::Star2)
    }
}

/// A single formal parameter of a callable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Param {
    /// Parameter name; `None` for anonymous positional-only slots.
    pub name: Option<Atom>,
    pub kind: ArgKind,
    pub ty: TypeId,
}

impl Param {
    pub fn pos(ty: TypeId) -> Self {
        Param {
            name: None,
            kind: ArgKind::Pos,
            ty,
        }
    }

    pub fn star(ty: TypeId) -> Self {
        Param {
            name: None,
            kind: ArgKind::Star,
            ty,
        }
    }

    pub fn star2(ty: TypeId) -> Self {
        Param {
            name: None,
            kind: ArgKind::Star2,
            ty,
        }
    }

    pub fn named(name: Atom, ty: TypeId) -> Self {
        Param {
            name: Some(name),
            kind: ArgKind::Named,
            ty,
        }
    }
}

/// A single-signature callable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CallableShape {
    /// Formal parameters in declaration order.
    pub params: Vec<Param>,
    /// Return type.
    pub ret: TypeId,
    /// `Callable[..., R]`: accepts any argument list.
    pub is_ellipsis: bool,
    /// Signature came from `Concatenate[..., P]`.
    pub from_concatenate: bool,
    /// Narrowing predicate (`TypeGuard[X]` / `TypeIs[X]`) overriding the
    /// return type for inference purposes.
    pub type_guard: Option<TypeId>,
    /// This callable is a type object (constructor); `ret` is the instance
    /// type it produces.
    pub is_type_obj: bool,
    /// The nominal fallback instance (`builtins.function`, or the metaclass
    /// instance for type objects).
    pub fallback: Option<TypeId>,
}

impl CallableShape {
    /// A plain positional signature with no special flags.
    pub fn positional(arg_types: Vec<TypeId>, ret: TypeId) -> Self {
        CallableShape {
            params: arg_types.into_iter().map(Param::pos).collect(),
            ret,
            is_ellipsis: false,
            from_concatenate: false,
            type_guard: None,
            is_type_obj: false,
            fallback: None,
        }
    }

    /// Number of leading parameters that can be filled positionally
    /// (`Pos` and `Opt`, stopping at the first variadic or keyword slot).
    pub fn positional_prefix_len(&self) -> usize {
        self.params
            .iter()
            .take_while(|p| matches!(p.kind, ArgKind::Pos | ArgKind::Opt))
            .count()
    }

    /// Number of required positional parameters.
    pub fn min_positional(&self) -> usize {
        self.params
            .iter()
            .take_while(|p| p.kind == ArgKind::Pos)
            .count()
    }

    /// Whether the signature has a `*args` slot.
    pub fn has_star(&self) -> bool {
        self.params.iter().any(|p| p.kind == ArgKind::Star)
    }

    /// The effective return type for constraint inference: the narrowing
    /// predicate when present, otherwise the declared return type.
    pub fn inference_ret(&self) -> TypeId {
        self.type_guard.unwrap_or(self.ret)
    }
}

/// A bare parameter list (the value bound to a `ParamSpec`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ParamsShape {
    pub params: Vec<Param>,
}

/// A fixed-shape tuple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TupleShape {
    /// Item types; at most one may be an `Unpack`.
    pub items: Vec<TypeId>,
    /// The nominal instance this tuple falls back to (`builtins.tuple[X]`,
    /// or the named-tuple class instance).
    pub fallback: TypeId,
}

/// One field of a typed dict.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TypedDictField {
    pub name: Atom,
    pub ty: TypeId,
    pub required: bool,
}

/// A structural dict type with a fixed set of string keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TypedDictShape {
    /// Fields in declaration order.
    pub fields: Vec<TypedDictField>,
    /// Nominal fallback instance (`typing.Mapping[str, object]` in practice).
    pub fallback: TypeId,
}

impl TypedDictShape {
    pub fn field(&self, name: Atom) -> Option<&TypedDictField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// The payload of a literal value.
///
/// Floats are deliberately absent: literal types only exist for hashable,
/// exactly-representable values.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum LiteralValue {
    Int(i64),
    Str(Atom),
    Bool(bool),
    Bytes(Atom),
}

/// A literal type: a value plus the instance type it falls back to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct LiteralShape {
    pub value: LiteralValue,
    pub fallback: TypeId,
}

/// Definition of a plain type variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TypeVarShape {
    pub id: TypeVarId,
    pub name: Atom,
    /// Declared variance when used as a class parameter.
    pub variance: Variance,
    /// Upper bound (`builtins.object` when unconstrained).
    pub upper_bound: TypeId,
    /// Value restriction (`TypeVar("T", int, str)`); empty when unrestricted.
    pub values: TypeListId,
}

/// Definition of a parameter-specification variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ParamSpecShape {
    pub id: TypeVarId,
    pub name: Atom,
    /// Fixed positional prefix from `Concatenate[X, Y, P]`.
    pub prefix: ParamsId,
    pub upper_bound: TypeId,
}

/// Definition of a variable-arity type variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TypeVarTupleShape {
    pub id: TypeVarId,
    pub name: Atom,
    pub upper_bound: TypeId,
}

bitflags! {
    /// Properties of a class member relevant to structural matching.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct MemberFlags: u8 {
        /// Member is writable (has a setter or is a plain attribute).
        const SETTABLE = 1 << 0;
        /// Declared as a `ClassVar`.
        const CLASSVAR = 1 << 1;
        /// `classmethod` or `staticmethod`.
        const CLASS_OR_STATIC = 1 << 2;
        /// A bound method (first parameter is the receiver).
        const METHOD = 1 << 3;
    }
}
