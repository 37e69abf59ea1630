use crate::def::{ClassInfo, ClassStore};
use crate::intern::TypeInterner;
use crate::queries::{
    find_unpack_in_list, has_recursive_types, has_type_vars, is_complete_type, is_union_with_any,
};
use crate::types::{
    CallableShape, ClassId, TypeId, TypeListId, TypeVarShape, TypeVarTupleShape, Variance,
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
fn type_vars_are_found_at_depth() {
    let interner = TypeInterner::new();
    let t = type_var(&interner, "T");
    let nested = interner.instance(
        ClassId(1),
        vec![interner.instance(ClassId(2), vec![t])],
    );
    assert!(has_type_vars(&interner, nested));
    assert!(has_type_vars(&interner, t));

    let concrete = interner.instance(ClassId(1), vec![TypeId::NONE]);
    assert!(!has_type_vars(&interner, concrete));
}

#[test]
fn type_vars_are_found_in_callable_returns() {
    let interner = TypeInterner::new();
    let t = type_var(&interner, "T");
    let callable = interner.callable(CallableShape::positional(vec![TypeId::NONE], t));
    assert!(has_type_vars(&interner, callable));
}

#[test]
fn variable_arity_references_count_as_type_vars() {
    let interner = TypeInterner::new();
    let ts = interner.type_var_tuple(TypeVarTupleShape {
        id: interner.fresh_type_var_id(),
        name: interner.intern_string("Ts"),
        upper_bound: TypeId::ANY,
    });
    let tup = interner.tuple(vec![interner.unpack(ts)], TypeId::ANY);
    assert!(has_type_vars(&interner, tup));
}

#[test]
fn recursive_alias_references_are_detected() {
    let interner = TypeInterner::new();
    let defs = ClassStore::new();
    let alias = defs.register_alias(interner.intern_string("m.Json"), vec![]);
    let body = interner.union2(TypeId::NONE, interner.alias(alias, vec![]));
    defs.set_alias_body(&interner, alias, body);

    let reference = interner.alias(alias, vec![]);
    assert!(has_recursive_types(&interner, &defs, reference));
    assert!(has_recursive_types(
        &interner,
        &defs,
        interner.instance(ClassId(1), vec![reference])
    ));
    assert!(!has_recursive_types(&interner, &defs, TypeId::NONE));
}

#[test]
fn completeness_rejects_uninhabited_components() {
    let interner = TypeInterner::new();
    assert!(is_complete_type(&interner, TypeId::NONE));
    assert!(!is_complete_type(&interner, TypeId::NEVER));

    let tup = interner.tuple(vec![TypeId::NONE, TypeId::NEVER], TypeId::ANY);
    assert!(!is_complete_type(&interner, tup));
}

#[test]
fn union_with_any_is_top_level_only() {
    let interner = TypeInterner::new();
    let with_any = interner.union2(TypeId::NONE, TypeId::ANY);
    assert!(is_union_with_any(&interner, with_any));

    let without = interner.union2(TypeId::NONE, TypeId::NEVER);
    assert!(!is_union_with_any(&interner, without));
    assert!(!is_union_with_any(&interner, TypeId::ANY));

    let nested = interner.union2(
        TypeId::NONE,
        interner.instance(ClassId(1), vec![TypeId::ANY]),
    );
    assert!(!is_union_with_any(&interner, nested));
}

#[test]
fn unpack_position_is_reported() {
    let interner = TypeInterner::new();
    let ts = interner.type_var_tuple(TypeVarTupleShape {
        id: interner.fresh_type_var_id(),
        name: interner.intern_string("Ts"),
        upper_bound: TypeId::ANY,
    });
    let items = vec![TypeId::NONE, interner.unpack(ts), TypeId::ANY];
    assert_eq!(find_unpack_in_list(&interner, &items), Some(1));
    assert_eq!(find_unpack_in_list(&interner, &[TypeId::NONE]), None);
}

#[test]
fn recursive_alias_walk_terminates() {
    let interner = TypeInterner::new();
    let defs = ClassStore::new();
    let object = defs.register_class(
        &interner,
        ClassInfo::new(interner.intern_string("builtins.object")),
    );
    let alias = defs.register_alias(interner.intern_string("m.Tree"), vec![]);
    let body = interner.instance(object, vec![interner.alias(alias, vec![])]);
    defs.set_alias_body(&interner, alias, body);

    // Both queries must terminate on the cyclic structure.
    assert!(has_recursive_types(&interner, &defs, body));
    assert!(!has_type_vars(&interner, body));
}
