//! Type interning engine.
//!
//! Converts [`TypeKey`] structures into lightweight [`TypeId`] handles.
//! Keys are stored in 64 hash-partitioned shards so concurrent checker
//! threads can intern without contending on a single lock; composite shapes
//! (callables, tuples, variable definitions) live in dedicated side tables.

use crate::types::*;
use pyz_common::interner::{Atom, ShardedInterner};
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

const SHARD_BITS: u32 = 6;
const SHARD_COUNT: usize = 1 << SHARD_BITS; // 64 shards
const SHARD_MASK: u32 = (SHARD_COUNT as u32) - 1;

struct TypeShard {
    key_to_index: RwLock<FxHashMap<TypeKey, u32>>,
    index_to_key: RwLock<Vec<TypeKey>>,
}

impl TypeShard {
    fn new() -> Self {
        TypeShard {
            key_to_index: RwLock::new(FxHashMap::default()),
            index_to_key: RwLock::new(Vec::new()),
        }
    }
}

struct SliceInterner<T> {
    items: Vec<Arc<[T]>>,
    map: FxHashMap<Arc<[T]>, u32>,
}

impl<T> SliceInterner<T>
where
    T: Eq + Hash,
{
    fn new() -> Self {
        let empty: Arc<[T]> = Arc::from(Vec::new());
        let mut map = FxHashMap::default();
        map.insert(empty.clone(), 0);
        SliceInterner {
            items: vec![empty],
            map,
        }
    }

    fn intern(&mut self, items: Vec<T>) -> u32 {
        if items.is_empty() {
            return 0;
        }
        if let Some(&id) = self.map.get(items.as_slice()) {
            return id;
        }
        let arc: Arc<[T]> = items.into();
        let id = self.items.len() as u32;
        self.items.push(arc.clone());
        self.map.insert(arc, id);
        id
    }

    fn get(&self, id: u32) -> Option<Arc<[T]>> {
        self.items.get(id as usize).cloned()
    }

    fn empty(&self) -> Arc<[T]> {
        self.items[0].clone()
    }
}

struct ValueInterner<T> {
    items: Vec<Arc<T>>,
    map: FxHashMap<Arc<T>, u32>,
}

impl<T> ValueInterner<T>
where
    T: Eq + Hash,
{
    fn new() -> Self {
        ValueInterner {
            items: Vec::new(),
            map: FxHashMap::default(),
        }
    }

    fn intern(&mut self, value: T) -> u32 {
        if let Some(&id) = self.map.get(&value) {
            return id;
        }
        let arc = Arc::new(value);
        let id = self.items.len() as u32;
        self.items.push(arc.clone());
        self.map.insert(arc, id);
        id
    }

    fn get(&self, id: u32) -> Option<Arc<T>> {
        self.items.get(id as usize).cloned()
    }
}

/// The central type table.
///
/// All solver structures reference types exclusively through [`TypeId`]
/// handles owned by one of these. Interning the same structure twice returns
/// the same handle, so type equality is id equality.
pub struct TypeInterner {
    shards: [TypeShard; SHARD_COUNT],
    string_interner: ShardedInterner,
    type_lists: RwLock<SliceInterner<TypeId>>,
    callable_lists: RwLock<SliceInterner<CallableId>>,
    callables: RwLock<ValueInterner<CallableShape>>,
    params: RwLock<ValueInterner<ParamsShape>>,
    tuples: RwLock<ValueInterner<TupleShape>>,
    typed_dicts: RwLock<ValueInterner<TypedDictShape>>,
    literals: RwLock<ValueInterner<LiteralShape>>,
    type_vars: RwLock<ValueInterner<TypeVarShape>>,
    param_specs: RwLock<ValueInterner<ParamSpecShape>>,
    type_var_tuples: RwLock<ValueInterner<TypeVarTupleShape>>,
    next_type_var: AtomicU32,
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeInterner {
    pub fn new() -> Self {
        let string_interner = ShardedInterner::new();
        string_interner.intern_common();
        TypeInterner {
            shards: std::array::from_fn(|_| TypeShard::new()),
            string_interner,
            type_lists: RwLock::new(SliceInterner::new()),
            callable_lists: RwLock::new(SliceInterner::new()),
            callables: RwLock::new(ValueInterner::new()),
            params: RwLock::new(ValueInterner::new()),
            tuples: RwLock::new(ValueInterner::new()),
            typed_dicts: RwLock::new(ValueInterner::new()),
            literals: RwLock::new(ValueInterner::new()),
            type_vars: RwLock::new(ValueInterner::new()),
            param_specs: RwLock::new(ValueInterner::new()),
            type_var_tuples: RwLock::new(ValueInterner::new()),
            next_type_var: AtomicU32::new(1),
        }
    }

    pub fn intern_string(&self, s: &str) -> Atom {
        self.string_interner.intern(s)
    }

    /// Resolve an Atom back to its string value.
    /// This is used when formatting types for diagnostics.
    pub fn resolve_atom(&self, atom: Atom) -> Arc<str> {
        self.string_interner.resolve(atom)
    }

    /// Allocate a fresh type-variable identity.
    pub fn fresh_type_var_id(&self) -> TypeVarId {
        TypeVarId(self.next_type_var.fetch_add(1, Ordering::Relaxed))
    }

    // -----------------------------------------------------------------------
    // Key interning and lookup
    // -----------------------------------------------------------------------

    /// Intern a type key and return its TypeId.
    /// If the key already exists, returns the existing TypeId.
    pub fn intern(&self, key: TypeKey) -> TypeId {
        if let Some(id) = intrinsic_id(&key) {
            return id;
        }

        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        let shard_idx = (hasher.finish() as usize) & (SHARD_COUNT - 1);
        let shard = &self.shards[shard_idx];

        {
            let map = shard
                .key_to_index
                .read()
                .expect("shard key_to_index lock poisoned");
            if let Some(&local_index) = map.get(&key) {
                return make_id(local_index, shard_idx as u32);
            }
        }

        let mut map = shard
            .key_to_index
            .write()
            .expect("shard key_to_index lock poisoned");
        let mut storage = shard
            .index_to_key
            .write()
            .expect("shard index_to_key lock poisoned");

        if let Some(&local_index) = map.get(&key) {
            return make_id(local_index, shard_idx as u32);
        }

        let local_index = storage.len() as u32;
        if local_index > (u32::MAX >> SHARD_BITS) {
            // Degrade to Any instead of panicking on table overflow.
            return TypeId::ANY;
        }

        storage.push(key);
        map.insert(key, local_index);

        make_id(local_index, shard_idx as u32)
    }

    /// Look up the TypeKey for a given TypeId.
    pub fn lookup(&self, id: TypeId) -> Option<TypeKey> {
        if id.0 < TypeId::FIRST_DYNAMIC {
            return intrinsic_key(id);
        }

        let raw_val = id.0 - TypeId::FIRST_DYNAMIC;
        let shard_idx = (raw_val & SHARD_MASK) as usize;
        let local_index = (raw_val >> SHARD_BITS) as usize;

        let shard = self.shards.get(shard_idx)?;
        let storage = shard
            .index_to_key
            .read()
            .expect("shard index_to_key lock poisoned");
        storage.get(local_index).copied()
    }

    // -----------------------------------------------------------------------
    // Side tables
    // -----------------------------------------------------------------------

    pub fn type_list(&self, id: TypeListId) -> Arc<[TypeId]> {
        let lists = self.type_lists.read().expect("type_lists lock poisoned");
        lists.get(id.0).unwrap_or_else(|| lists.empty())
    }

    pub fn intern_type_list(&self, members: Vec<TypeId>) -> TypeListId {
        let mut lists = self.type_lists.write().expect("type_lists lock poisoned");
        TypeListId(lists.intern(members))
    }

    pub fn callable_list(&self, id: CallableListId) -> Arc<[CallableId]> {
        let lists = self
            .callable_lists
            .read()
            .expect("callable_lists lock poisoned");
        lists.get(id.0).unwrap_or_else(|| lists.empty())
    }

    pub fn callable_shape(&self, id: CallableId) -> Arc<CallableShape> {
        self.callables
            .read()
            .expect("callables lock poisoned")
            .get(id.0)
            .unwrap_or_else(|| {
                Arc::new(CallableShape {
                    params: Vec::new(),
                    ret: TypeId::ANY,
                    is_ellipsis: true,
                    from_concatenate: false,
                    type_guard: None,
                    is_type_obj: false,
                    fallback: None,
                })
            })
    }

    pub fn params_shape(&self, id: ParamsId) -> Arc<ParamsShape> {
        self.params
            .read()
            .expect("params lock poisoned")
            .get(id.0)
            .unwrap_or_else(|| Arc::new(ParamsShape { params: Vec::new() }))
    }

    pub fn tuple_shape(&self, id: TupleId) -> Arc<TupleShape> {
        self.tuples
            .read()
            .expect("tuples lock poisoned")
            .get(id.0)
            .unwrap_or_else(|| {
                Arc::new(TupleShape {
                    items: Vec::new(),
                    fallback: TypeId::ANY,
                })
            })
    }

    pub fn typed_dict_shape(&self, id: TypedDictId) -> Arc<TypedDictShape> {
        self.typed_dicts
            .read()
            .expect("typed_dicts lock poisoned")
            .get(id.0)
            .unwrap_or_else(|| {
                Arc::new(TypedDictShape {
                    fields: Vec::new(),
                    fallback: TypeId::ANY,
                })
            })
    }

    pub fn literal_shape(&self, id: LiteralId) -> Arc<LiteralShape> {
        self.literals
            .read()
            .expect("literals lock poisoned")
            .get(id.0)
            .unwrap_or_else(|| {
                Arc::new(LiteralShape {
                    value: LiteralValue::Bool(false),
                    fallback: TypeId::ANY,
                })
            })
    }

    pub fn type_var_shape(&self, key: TypeVarKey) -> Arc<TypeVarShape> {
        self.type_vars
            .read()
            .expect("type_vars lock poisoned")
            .get(key.0)
            .unwrap_or_else(|| {
                Arc::new(TypeVarShape {
                    id: TypeVarId(0),
                    name: Atom::NONE,
                    variance: Variance::Invariant,
                    upper_bound: TypeId::ANY,
                    values: TypeListId::EMPTY,
                })
            })
    }

    pub fn param_spec_shape(&self, key: ParamSpecKey) -> Arc<ParamSpecShape> {
        self.param_specs
            .read()
            .expect("param_specs lock poisoned")
            .get(key.0)
            .unwrap_or_else(|| {
                Arc::new(ParamSpecShape {
                    id: TypeVarId(0),
                    name: Atom::NONE,
                    prefix: ParamsId(0),
                    upper_bound: TypeId::ANY,
                })
            })
    }

    pub fn type_var_tuple_shape(&self, key: TypeVarTupleKey) -> Arc<TypeVarTupleShape> {
        self.type_var_tuples
            .read()
            .expect("type_var_tuples lock poisoned")
            .get(key.0)
            .unwrap_or_else(|| {
                Arc::new(TypeVarTupleShape {
                    id: TypeVarId(0),
                    name: Atom::NONE,
                    upper_bound: TypeId::ANY,
                })
            })
    }

    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// The canonical `Any` for a given provenance.
    pub fn any(&self, source: AnySource) -> TypeId {
        match source {
            AnySource::Explicit => TypeId::ANY,
            AnySource::SuggestionEngine => TypeId::ANY_SUGGESTION,
            AnySource::FromAnotherAny => TypeId::ANY_FROM_ANOTHER,
            AnySource::ImplementationArtifact => TypeId::ANY_IMPLEMENTATION,
        }
    }

    pub fn instance(&self, class: ClassId, args: Vec<TypeId>) -> TypeId {
        let args = self.intern_type_list(args);
        self.intern(TypeKey::Instance(class, args))
    }

    pub fn callable(&self, shape: CallableShape) -> TypeId {
        self.intern(TypeKey::Callable(self.callable_id(shape)))
    }

    pub fn callable_id(&self, shape: CallableShape) -> CallableId {
        let mut shapes = self.callables.write().expect("callables lock poisoned");
        CallableId(shapes.intern(shape))
    }

    pub fn overloaded(&self, items: Vec<CallableId>) -> TypeId {
        let mut lists = self
            .callable_lists
            .write()
            .expect("callable_lists lock poisoned");
        let id = CallableListId(lists.intern(items));
        drop(lists);
        self.intern(TypeKey::Overloaded(id))
    }

    pub fn parameters(&self, params: Vec<Param>) -> TypeId {
        self.intern(TypeKey::Parameters(self.params_id(params)))
    }

    pub fn params_id(&self, params: Vec<Param>) -> ParamsId {
        let mut shapes = self.params.write().expect("params lock poisoned");
        ParamsId(shapes.intern(ParamsShape { params }))
    }

    pub fn tuple(&self, items: Vec<TypeId>, fallback: TypeId) -> TypeId {
        let mut shapes = self.tuples.write().expect("tuples lock poisoned");
        let id = TupleId(shapes.intern(TupleShape { items, fallback }));
        drop(shapes);
        self.intern(TypeKey::Tuple(id))
    }

    pub fn typed_dict(&self, fields: Vec<TypedDictField>, fallback: TypeId) -> TypeId {
        let mut shapes = self.typed_dicts.write().expect("typed_dicts lock poisoned");
        let id = TypedDictId(shapes.intern(TypedDictShape { fields, fallback }));
        drop(shapes);
        self.intern(TypeKey::TypedDict(id))
    }

    pub fn literal(&self, value: LiteralValue, fallback: TypeId) -> TypeId {
        let mut shapes = self.literals.write().expect("literals lock poisoned");
        let id = LiteralId(shapes.intern(LiteralShape { value, fallback }));
        drop(shapes);
        self.intern(TypeKey::Literal(id))
    }

    pub fn type_var(&self, shape: TypeVarShape) -> TypeId {
        let mut shapes = self.type_vars.write().expect("type_vars lock poisoned");
        let key = TypeVarKey(shapes.intern(shape));
        drop(shapes);
        self.intern(TypeKey::TypeVar(key))
    }

    pub fn param_spec(&self, shape: ParamSpecShape) -> TypeId {
        let mut shapes = self.param_specs.write().expect("param_specs lock poisoned");
        let key = ParamSpecKey(shapes.intern(shape));
        drop(shapes);
        self.intern(TypeKey::ParamSpec(key))
    }

    pub fn type_var_tuple(&self, shape: TypeVarTupleShape) -> TypeId {
        let mut shapes = self
            .type_var_tuples
            .write()
            .expect("type_var_tuples lock poisoned");
        let key = TypeVarTupleKey(shapes.intern(shape));
        drop(shapes);
        self.intern(TypeKey::TypeVarTuple(key))
    }

    pub fn unpack(&self, inner: TypeId) -> TypeId {
        self.intern(TypeKey::Unpack(inner))
    }

    pub fn type_of(&self, item: TypeId) -> TypeId {
        self.intern(TypeKey::TypeOf(item))
    }

    pub fn alias(&self, alias: AliasId, args: Vec<TypeId>) -> TypeId {
        let args = self.intern_type_list(args);
        self.intern(TypeKey::Alias(alias, args))
    }

    /// Raw union constructor: no simplification beyond the 0/1-member
    /// degenerate cases. Use `typeops::make_simplified_union` for the
    /// flattening, deduplicating form.
    pub fn union(&self, members: Vec<TypeId>) -> TypeId {
        match members.len() {
            0 => TypeId::NEVER,
            1 => members[0],
            _ => {
                let list = self.intern_type_list(members);
                self.intern(TypeKey::Union(list))
            }
        }
    }

    pub fn union2(&self, left: TypeId, right: TypeId) -> TypeId {
        self.union(vec![left, right])
    }
}

#[inline]
fn make_id(local_index: u32, shard_idx: u32) -> TypeId {
    TypeId(TypeId::FIRST_DYNAMIC + ((local_index << SHARD_BITS) | shard_idx))
}

fn intrinsic_id(key: &TypeKey) -> Option<TypeId> {
    match key {
        TypeKey::Any(AnySource::Explicit) => Some(TypeId::ANY),
        TypeKey::Any(AnySource::SuggestionEngine) => Some(TypeId::ANY_SUGGESTION),
        TypeKey::Any(AnySource::ImplementationArtifact) => Some(TypeId::ANY_IMPLEMENTATION),
        TypeKey::Any(AnySource::FromAnotherAny) => Some(TypeId::ANY_FROM_ANOTHER),
        TypeKey::NoneType => Some(TypeId::NONE),
        TypeKey::Never => Some(TypeId::NEVER),
        TypeKey::Erased => Some(TypeId::ERASED),
        TypeKey::Deleted => Some(TypeId::DELETED),
        TypeKey::Unbound => Some(TypeId::UNBOUND),
        TypeKey::Partial => Some(TypeId::PARTIAL),
        _ => None,
    }
}

fn intrinsic_key(id: TypeId) -> Option<TypeKey> {
    match id {
        TypeId::ANY => Some(TypeKey::Any(AnySource::Explicit)),
        TypeId::NONE => Some(TypeKey::NoneType),
        TypeId::NEVER => Some(TypeKey::Never),
        TypeId::ERASED => Some(TypeKey::Erased),
        TypeId::DELETED => Some(TypeKey::Deleted),
        TypeId::UNBOUND => Some(TypeKey::Unbound),
        TypeId::PARTIAL => Some(TypeKey::Partial),
        TypeId::ANY_SUGGESTION => Some(TypeKey::Any(AnySource::SuggestionEngine)),
        TypeId::ANY_IMPLEMENTATION => Some(TypeKey::Any(AnySource::ImplementationArtifact)),
        TypeId::ANY_FROM_ANOTHER => Some(TypeKey::Any(AnySource::FromAnotherAny)),
        _ => None,
    }
}

#[cfg(test)]
#[path = "../tests/intern_tests.rs"]
mod tests;
