use crate::def::{ClassInfo, ClassStore};
use crate::intern::TypeInterner;
use crate::relate::{StructuralRelations, TypeRelations};
use crate::types::{
    CallableShape, MemberFlags, TypeId, TypeListId, TypeVarShape, Variance,
};

struct Fixture {
    interner: TypeInterner,
    defs: ClassStore,
    object: TypeId,
    int: TypeId,
    str_: TypeId,
    bool_: TypeId,
    list_class: crate::types::ClassId,
    box_class: crate::types::ClassId,
}

impl Fixture {
    fn new() -> Self {
        let interner = TypeInterner::new();
        let defs = ClassStore::new();
        let object_class = defs.register_class(
            &interner,
            ClassInfo::new(interner.intern_string("builtins.object")),
        );
        let object = interner.instance(object_class, vec![]);
        let int_class = defs.register_class(
            &interner,
            ClassInfo::new(interner.intern_string("builtins.int")).with_bases(vec![object]),
        );
        let int = interner.instance(int_class, vec![]);
        let str_class = defs.register_class(
            &interner,
            ClassInfo::new(interner.intern_string("builtins.str")).with_bases(vec![object]),
        );
        let str_ = interner.instance(str_class, vec![]);
        let bool_class = defs.register_class(
            &interner,
            ClassInfo::new(interner.intern_string("builtins.bool")).with_bases(vec![int]),
        );
        let bool_ = interner.instance(bool_class, vec![]);

        let list_param = type_var(&interner, "T", object, Variance::Invariant);
        let list_class = defs.register_class(
            &interner,
            ClassInfo::new(interner.intern_string("builtins.list"))
                .with_type_params(vec![list_param])
                .with_bases(vec![object]),
        );
        let box_param = type_var(&interner, "T_co", object, Variance::Covariant);
        let box_class = defs.register_class(
            &interner,
            ClassInfo::new(interner.intern_string("m.Box"))
                .with_type_params(vec![box_param])
                .with_bases(vec![object]),
        );

        Fixture {
            interner,
            defs,
            object,
            int,
            str_,
            bool_,
            list_class,
            box_class,
        }
    }

    fn list_of(&self, item: TypeId) -> TypeId {
        self.interner.instance(self.list_class, vec![item])
    }

    fn box_of(&self, item: TypeId) -> TypeId {
        self.interner.instance(self.box_class, vec![item])
    }
}

fn type_var(
    interner: &TypeInterner,
    name: &str,
    upper_bound: TypeId,
    variance: Variance,
) -> TypeId {
    let name = interner.intern_string(name);
    interner.type_var(TypeVarShape {
        id: interner.fresh_type_var_id(),
        name,
        variance,
        upper_bound,
        values: TypeListId::EMPTY,
    })
}

#[test]
fn nominal_subtyping_follows_bases() {
    let fx = Fixture::new();
    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    assert!(rel.is_subtype(fx.bool_, fx.int));
    assert!(rel.is_subtype(fx.bool_, fx.object));
    assert!(rel.is_subtype(fx.int, fx.object));
    assert!(!rel.is_subtype(fx.int, fx.str_));
    assert!(!rel.is_subtype(fx.object, fx.int));
}

#[test]
fn any_and_erased_relate_both_ways() {
    let fx = Fixture::new();
    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    assert!(rel.is_subtype(TypeId::ANY, fx.int));
    assert!(rel.is_subtype(fx.int, TypeId::ANY));
    assert!(rel.is_subtype(TypeId::ERASED, fx.int));
    assert!(rel.is_subtype(fx.int, TypeId::ERASED));
    assert!(rel.is_subtype(TypeId::NEVER, fx.int));
}

#[test]
fn union_subtyping() {
    let fx = Fixture::new();
    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    let int_or_str = fx.interner.union2(fx.int, fx.str_);
    assert!(rel.is_subtype(fx.int, int_or_str));
    assert!(rel.is_subtype(int_or_str, fx.object));
    assert!(!rel.is_subtype(int_or_str, fx.int));
}

#[test]
fn invariant_arguments_require_identity() {
    let fx = Fixture::new();
    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    assert!(rel.is_subtype(fx.list_of(fx.int), fx.list_of(fx.int)));
    assert!(!rel.is_subtype(fx.list_of(fx.int), fx.list_of(fx.object)));
    assert!(!rel.is_subtype(fx.list_of(fx.object), fx.list_of(fx.int)));
}

#[test]
fn covariant_arguments_widen() {
    let fx = Fixture::new();
    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    assert!(rel.is_subtype(fx.box_of(fx.bool_), fx.box_of(fx.int)));
    assert!(!rel.is_subtype(fx.box_of(fx.int), fx.box_of(fx.bool_)));
}

#[test]
fn tuple_subtyping_is_elementwise() {
    let fx = Fixture::new();
    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    let left = fx.interner.tuple(vec![fx.bool_, fx.str_], fx.object);
    let right = fx.interner.tuple(vec![fx.int, fx.str_], fx.object);
    assert!(rel.is_subtype(left, right));
    assert!(!rel.is_subtype(right, left));

    let shorter = fx.interner.tuple(vec![fx.int], fx.object);
    assert!(!rel.is_subtype(shorter, right));

    // A tuple against a plain instance goes through its fallback.
    assert!(rel.is_subtype(left, fx.object));
}

#[test]
fn callable_compatibility_is_contravariant_in_params() {
    let fx = Fixture::new();
    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    let accepts_object = fx
        .interner
        .callable(CallableShape::positional(vec![fx.object], fx.bool_));
    let accepts_int = fx
        .interner
        .callable(CallableShape::positional(vec![fx.int], fx.int));
    // (object) -> bool fits where (int) -> int is expected.
    assert!(rel.is_subtype(accepts_object, accepts_int));
    assert!(!rel.is_subtype(accepts_int, accepts_object));
}

#[test]
fn callable_arity_mismatch_is_rejected() {
    let fx = Fixture::new();
    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    let two = fx
        .interner
        .callable(CallableShape::positional(vec![fx.int, fx.int], fx.int));
    let one = fx
        .interner
        .callable(CallableShape::positional(vec![fx.int], fx.int));
    assert!(!rel.is_callable_compatible(two, one, false));
    assert!(!rel.is_callable_compatible(one, two, false));
}

#[test]
fn same_type_ignores_any_provenance() {
    let fx = Fixture::new();
    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    assert!(rel.is_same_type(TypeId::ANY, TypeId::ANY_FROM_ANOTHER));
    assert!(rel.is_same_type(fx.int, fx.int));
    assert!(!rel.is_same_type(fx.int, fx.object));
}

#[test]
fn protocol_implementation_checks_members() {
    let fx = Fixture::new();
    let get = fx.interner.intern_string("get");
    let get_ty = fx
        .interner
        .callable(CallableShape::positional(vec![TypeId::ANY], fx.int));
    let proto_class = fx.defs.register_class(
        &fx.interner,
        ClassInfo::new(fx.interner.intern_string("m.HasGet"))
            .with_bases(vec![fx.object])
            .protocol(vec![get])
            .with_member(get, get_ty, MemberFlags::METHOD),
    );
    let proto = fx.interner.instance(proto_class, vec![]);

    let good = fx.defs.register_class(
        &fx.interner,
        ClassInfo::new(fx.interner.intern_string("m.Good"))
            .with_bases(vec![fx.object])
            .with_member(
                get,
                fx.interner
                    .callable(CallableShape::positional(vec![TypeId::ANY], fx.bool_)),
                MemberFlags::METHOD,
            ),
    );
    let bad = fx.defs.register_class(
        &fx.interner,
        ClassInfo::new(fx.interner.intern_string("m.Bad")).with_bases(vec![fx.object]),
    );

    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    let good_inst = fx.interner.instance(good, vec![]);
    let bad_inst = fx.interner.instance(bad, vec![]);
    assert!(rel.is_protocol_implementation(good_inst, proto));
    assert!(!rel.is_protocol_implementation(bad_inst, proto));
    // Instance-against-protocol subtyping routes through the same check.
    assert!(rel.is_subtype(good_inst, proto));
}

#[test]
fn settable_protocol_members_are_invariant() {
    let fx = Fixture::new();
    let value = fx.interner.intern_string("value");
    let proto_class = fx.defs.register_class(
        &fx.interner,
        ClassInfo::new(fx.interner.intern_string("m.HasValue"))
            .with_bases(vec![fx.object])
            .protocol(vec![value])
            .with_member(value, fx.int, MemberFlags::SETTABLE),
    );
    let proto = fx.interner.instance(proto_class, vec![]);

    let narrower = fx.defs.register_class(
        &fx.interner,
        ClassInfo::new(fx.interner.intern_string("m.Narrower"))
            .with_bases(vec![fx.object])
            .with_member(value, fx.bool_, MemberFlags::SETTABLE),
    );
    let exact = fx.defs.register_class(
        &fx.interner,
        ClassInfo::new(fx.interner.intern_string("m.Exact"))
            .with_bases(vec![fx.object])
            .with_member(value, fx.int, MemberFlags::SETTABLE),
    );

    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    // bool is a subtype of int, but a settable int member cannot accept it.
    assert!(!rel.is_protocol_implementation(fx.interner.instance(narrower, vec![]), proto));
    assert!(rel.is_protocol_implementation(fx.interner.instance(exact, vec![]), proto));
}

#[test]
fn find_member_binds_methods_and_substitutes_args() {
    let fx = Fixture::new();
    let item = fx.interner.intern_string("item");
    let box_param = fx.defs.class(fx.box_class).unwrap().type_params[0];
    let getter = fx
        .interner
        .callable(CallableShape::positional(vec![TypeId::ANY], box_param));
    let carton = fx.defs.register_class(
        &fx.interner,
        ClassInfo::new(fx.interner.intern_string("m.Carton"))
            .with_type_params(vec![box_param])
            .with_bases(vec![fx.object])
            .with_member(item, getter, MemberFlags::METHOD),
    );
    let carton_int = fx.interner.instance(carton, vec![fx.int]);

    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    let found = rel
        .find_member(item, carton_int, carton_int, false, false)
        .unwrap();
    // The receiver slot is dropped and the parameter var is substituted.
    let expected = fx
        .interner
        .callable(CallableShape::positional(vec![], fx.int));
    assert_eq!(found, expected);

    assert!(
        rel.find_member(fx.interner.intern_string("missing"), carton_int, carton_int, false, false)
            .is_none()
    );
    assert_eq!(rel.member_flags(item, carton_int), MemberFlags::METHOD);
}

#[test]
fn find_member_walks_ancestry() {
    let fx = Fixture::new();
    let tag = fx.interner.intern_string("tag");
    let base = fx.defs.register_class(
        &fx.interner,
        ClassInfo::new(fx.interner.intern_string("m.Base"))
            .with_bases(vec![fx.object])
            .with_member(tag, fx.str_, MemberFlags::SETTABLE),
    );
    let derived = fx.defs.register_class(
        &fx.interner,
        ClassInfo::new(fx.interner.intern_string("m.Derived"))
            .with_bases(vec![fx.interner.instance(base, vec![])]),
    );

    let rel = StructuralRelations::new(&fx.interner, &fx.defs);
    let derived_inst = fx.interner.instance(derived, vec![]);
    assert_eq!(
        rel.find_member(tag, derived_inst, derived_inst, false, false),
        Some(fx.str_)
    );
    assert_eq!(rel.member_flags(tag, derived_inst), MemberFlags::SETTABLE);
}
