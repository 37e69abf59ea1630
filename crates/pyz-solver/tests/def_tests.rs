use crate::def::{ClassInfo, ClassStore};
use crate::intern::TypeInterner;
use crate::types::{
    TypeId, TypeListId, TypeVarShape, TypeVarTupleShape, Variance,
};

fn type_var(interner: &TypeInterner, name: &str) -> TypeId {
    let name = interner.intern_string(name);
    interner.type_var(TypeVarShape {
        id: interner.fresh_type_var_id(),
        name,
        variance: Variance::Invariant,
        upper_bound: TypeId::ANY,
        values: TypeListId::EMPTY,
    })
}

#[test]
fn mro_linearizes_self_first() {
    let interner = TypeInterner::new();
    let defs = ClassStore::new();
    let object = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("builtins.object")),
    );
    let object_inst = interner.instance(object, vec![]);
    let a = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("m.A")).with_bases(vec![object_inst]),
    );
    let a_inst = interner.instance(a, vec![]);
    let b = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("m.B")).with_bases(vec![a_inst]),
    );

    let info = defs.class(b).unwrap();
    assert_eq!(info.mro, vec![b, a, object]);
    assert!(defs.has_base(b, a));
    assert!(defs.has_base(b, object));
    assert!(!defs.has_base(a, b));
}

#[test]
fn diamond_ancestry_dedupes() {
    let interner = TypeInterner::new();
    let defs = ClassStore::new();
    let object = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("builtins.object")),
    );
    let object_inst = interner.instance(object, vec![]);
    let left = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("m.Left")).with_bases(vec![object_inst]),
    );
    let right = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("m.Right")).with_bases(vec![object_inst]),
    );
    let bottom = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("m.Bottom")).with_bases(vec![
            interner.instance(left, vec![]),
            interner.instance(right, vec![]),
        ]),
    );

    let info = defs.class(bottom).unwrap();
    assert_eq!(info.mro, vec![bottom, left, object, right]);
}

#[test]
fn class_by_name_resolves() {
    let interner = TypeInterner::new();
    let defs = ClassStore::new();
    let name = interner.intern_string("builtins.int");
    let id = defs.register_class(&interner, ClassInfo::new(name));
    assert_eq!(defs.class_by_name(name), Some(id));
    assert_eq!(
        defs.class_by_name(interner.intern_string("builtins.str")),
        None
    );
}

#[test]
fn tuple_like_classes_are_recognized_by_name() {
    let interner = TypeInterner::new();
    let defs = ClassStore::new();
    let tuple = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("builtins.tuple")),
    );
    let iterable = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("typing.Iterable")),
    );
    let list = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("builtins.list")),
    );
    assert!(defs.is_tuple_like(&interner, tuple));
    assert!(defs.is_tuple_like(&interner, iterable));
    assert!(!defs.is_tuple_like(&interner, list));
}

#[test]
fn variable_arity_parameter_is_located() {
    let interner = TypeInterner::new();
    let defs = ClassStore::new();
    let t = type_var(&interner, "T");
    let ts = interner.type_var_tuple(TypeVarTupleShape {
        id: interner.fresh_type_var_id(),
        name: interner.intern_string("Ts"),
        upper_bound: TypeId::ANY,
    });
    let s = type_var(&interner, "S");
    let id = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("m.Variadic"))
            .with_type_params(vec![t, ts, s]),
    );
    assert_eq!(defs.class(id).unwrap().type_var_tuple_index, Some(1));

    let plain = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("m.Plain")).with_type_params(vec![t]),
    );
    assert_eq!(defs.class(plain).unwrap().type_var_tuple_index, None);
}

#[test]
fn alias_body_attachment_detects_self_reference() {
    let interner = TypeInterner::new();
    let defs = ClassStore::new();
    let json = defs.register_alias(interner.intern_string("m.Json"), vec![]);
    assert!(!defs.alias_is_recursive(json));

    let body = interner.union2(TypeId::NONE, interner.alias(json, vec![]));
    defs.set_alias_body(&interner, json, body);
    assert!(defs.alias_is_recursive(json));
    assert_eq!(defs.alias(json).unwrap().body, Some(body));

    let plain = defs.register_alias(interner.intern_string("m.MaybeNone"), vec![]);
    defs.set_alias_body(&interner, plain, TypeId::NONE);
    assert!(!defs.alias_is_recursive(plain));
}

#[test]
fn indirect_alias_self_reference_is_recursive() {
    let interner = TypeInterner::new();
    let defs = ClassStore::new();
    let object = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("builtins.object")),
    );
    let alias = defs.register_alias(interner.intern_string("m.Nested"), vec![]);
    // Self-reference buried inside an instance argument.
    let body = interner.instance(object, vec![interner.alias(alias, vec![])]);
    defs.set_alias_body(&interner, alias, body);
    assert!(defs.alias_is_recursive(alias));
}
