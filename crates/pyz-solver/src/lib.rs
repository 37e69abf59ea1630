//! Type-variable constraint inference for the pyz type checker.
//!
//! Given a template type containing type variables and an actual type that
//! does not, this crate derives the ordered list of directed bounds
//! (`T <: X`, `T :> X`) that must hold for the actual to fit the template.
//! The bounds are handed to an external solver; this crate never resolves
//! them itself, and deliberately preserves duplicates and contradictions.
//!
//! The main entry points:
//!
//! - [`InferenceContext::infer_constraints`]: match one template against one
//!   actual type in a given [`Direction`].
//! - [`argmap::infer_constraints_for_callable`]: the call-site driver that
//!   maps actual arguments onto formal parameters first.
//!
//! Types are interned ([`TypeInterner`]), class and alias definitions live in
//! a [`ClassStore`], and the subtyping questions inference needs to ask are
//! abstracted behind the [`TypeRelations`] trait so the surrounding checker
//! can plug in its full implementation.

pub mod argmap;
pub mod constraints;
pub mod def;
pub mod intern;
pub mod queries;
pub mod recursion;
pub mod relate;
pub mod typeops;
pub mod types;

pub use argmap::{ArgTypeExpander, infer_constraints_for_callable};
pub use constraints::{
    Constraint, ConstraintError, ConstraintResult, Direction, InferenceContext,
};
pub use def::{AliasInfo, ClassInfo, ClassStore, MemberInfo};
pub use intern::TypeInterner;
pub use relate::{StructuralRelations, TypeRelations};
pub use types::{
    AliasId, AnySource, ArgKind, CallableShape, ClassId, LiteralValue, MemberFlags, Param,
    TypeId, TypeKey, TypeVarId, TypeVarShape, Variance,
};
