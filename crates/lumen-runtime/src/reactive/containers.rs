#![forbid(unsafe_code)]

//! Reactive container views.
//!
//! A view borrows a [`Ref`] and edits the list, set, or map inside it in
//! place. Every mutating call goes through the same path as a plain write:
//!
//! 1. Element kinds are checked against the cell's `item_types` before the
//!    container is touched, so a rejected insert leaves no partial change.
//! 2. The structural change is applied under the cell's write lock.
//! 3. If the container actually changed, the cell's version is bumped and,
//!    when the cell is ready and no transaction is open, watchers are
//!    notified on the next loop turn.
//!
//! Which container a cell exposes is chosen by its payload type through the
//! [`ListPayload`], [`SetPayload`], and [`MapPayload`] projections. `Vec`,
//! the std sets, and the std maps project themselves; a [`Value`] projects
//! whatever container sits at the view's path. Views into nested containers
//! ([`ListView::list_at`], [`MapView::map_at`], ...) are only handed out for
//! cells built with `deep(true)`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use super::cell::Ref;
use super::payload::{render_path, PathSegment, Payload, Value, ValueKind};
use crate::error::RefError;

// ─── Projections ─────────────────────────────────────────────────────────────

/// Why a path did not lead to the requested container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    /// Nothing exists at the path.
    Missing,
    /// Something exists but it is a different kind of value.
    Shape { expected: ValueKind, found: ValueKind },
}

/// Set operations a view needs from the underlying set type.
pub trait SetContainer {
    type Item: Payload;

    fn len(&self) -> usize;
    fn contains(&self, item: &Self::Item) -> bool;
    fn insert(&mut self, item: Self::Item) -> bool;
    fn remove(&mut self, item: &Self::Item) -> bool;
    fn clear(&mut self);
    fn items(&self) -> Vec<Self::Item>;
}

impl<E: Payload + Ord> SetContainer for BTreeSet<E> {
    type Item = E;

    fn len(&self) -> usize {
        BTreeSet::len(self)
    }
    fn contains(&self, item: &E) -> bool {
        BTreeSet::contains(self, item)
    }
    fn insert(&mut self, item: E) -> bool {
        BTreeSet::insert(self, item)
    }
    fn remove(&mut self, item: &E) -> bool {
        BTreeSet::remove(self, item)
    }
    fn clear(&mut self) {
        BTreeSet::clear(self);
    }
    fn items(&self) -> Vec<E> {
        self.iter().cloned().collect()
    }
}

impl<E: Payload + Eq + Hash> SetContainer for HashSet<E> {
    type Item = E;

    fn len(&self) -> usize {
        HashSet::len(self)
    }
    fn contains(&self, item: &E) -> bool {
        HashSet::contains(self, item)
    }
    fn insert(&mut self, item: E) -> bool {
        HashSet::insert(self, item)
    }
    fn remove(&mut self, item: &E) -> bool {
        HashSet::remove(self, item)
    }
    fn clear(&mut self) {
        HashSet::clear(self);
    }
    fn items(&self) -> Vec<E> {
        self.iter().cloned().collect()
    }
}

/// Map operations a view needs from the underlying map type.
pub trait MapContainer {
    type Key: Payload;
    type Value: Payload;

    fn len(&self) -> usize;
    fn get(&self, key: &Self::Key) -> Option<&Self::Value>;
    fn insert(&mut self, key: Self::Key, value: Self::Value) -> Option<Self::Value>;
    fn remove(&mut self, key: &Self::Key) -> Option<Self::Value>;
    /// Remove and return one entry: the smallest key for ordered maps, an
    /// arbitrary one otherwise.
    fn pop_entry(&mut self) -> Option<(Self::Key, Self::Value)>;
    fn clear(&mut self);
    fn keys(&self) -> Vec<Self::Key>;
}

impl<K: Payload + Ord, V: Payload> MapContainer for BTreeMap<K, V> {
    type Key = K;
    type Value = V;

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
    fn get(&self, key: &K) -> Option<&V> {
        BTreeMap::get(self, key)
    }
    fn insert(&mut self, key: K, value: V) -> Option<V> {
        BTreeMap::insert(self, key, value)
    }
    fn remove(&mut self, key: &K) -> Option<V> {
        BTreeMap::remove(self, key)
    }
    fn pop_entry(&mut self) -> Option<(K, V)> {
        self.pop_first()
    }
    fn clear(&mut self) {
        BTreeMap::clear(self);
    }
    fn keys(&self) -> Vec<K> {
        BTreeMap::keys(self).cloned().collect()
    }
}

impl<K: Payload + Eq + Hash, V: Payload> MapContainer for HashMap<K, V> {
    type Key = K;
    type Value = V;

    fn len(&self) -> usize {
        HashMap::len(self)
    }
    fn get(&self, key: &K) -> Option<&V> {
        HashMap::get(self, key)
    }
    fn insert(&mut self, key: K, value: V) -> Option<V> {
        HashMap::insert(self, key, value)
    }
    fn remove(&mut self, key: &K) -> Option<V> {
        HashMap::remove(self, key)
    }
    fn pop_entry(&mut self) -> Option<(K, V)> {
        let key = HashMap::keys(self).next()?.clone();
        self.remove_entry(&key)
    }
    fn clear(&mut self) {
        HashMap::clear(self);
    }
    fn keys(&self) -> Vec<K> {
        HashMap::keys(self).cloned().collect()
    }
}

/// Payloads that expose a list.
pub trait ListPayload: Payload {
    type Item: Payload;

    fn list(&self, path: &[PathSegment]) -> Result<&Vec<Self::Item>, PathError>;
    fn list_mut(&mut self, path: &[PathSegment]) -> Result<&mut Vec<Self::Item>, PathError>;
}

/// Payloads that expose a set.
pub trait SetPayload: Payload {
    type Set: SetContainer;

    fn set(&self, path: &[PathSegment]) -> Result<&Self::Set, PathError>;
    fn set_mut(&mut self, path: &[PathSegment]) -> Result<&mut Self::Set, PathError>;
}

/// Payloads that expose a map.
pub trait MapPayload: Payload {
    type Map: MapContainer;

    fn map(&self, path: &[PathSegment]) -> Result<&Self::Map, PathError>;
    fn map_mut(&mut self, path: &[PathSegment]) -> Result<&mut Self::Map, PathError>;
}

fn root<T>(container: T, path: &[PathSegment]) -> Result<T, PathError> {
    if path.is_empty() {
        Ok(container)
    } else {
        Err(PathError::Missing)
    }
}

impl<E: Payload> ListPayload for Vec<E> {
    type Item = E;

    fn list(&self, path: &[PathSegment]) -> Result<&Vec<E>, PathError> {
        root(self, path)
    }
    fn list_mut(&mut self, path: &[PathSegment]) -> Result<&mut Vec<E>, PathError> {
        root(self, path)
    }
}

impl<E: Payload + Ord> SetPayload for BTreeSet<E> {
    type Set = Self;

    fn set(&self, path: &[PathSegment]) -> Result<&Self, PathError> {
        root(self, path)
    }
    fn set_mut(&mut self, path: &[PathSegment]) -> Result<&mut Self, PathError> {
        root(self, path)
    }
}

impl<E: Payload + Eq + Hash> SetPayload for HashSet<E> {
    type Set = Self;

    fn set(&self, path: &[PathSegment]) -> Result<&Self, PathError> {
        root(self, path)
    }
    fn set_mut(&mut self, path: &[PathSegment]) -> Result<&mut Self, PathError> {
        root(self, path)
    }
}

impl<K: Payload + Ord, V: Payload> MapPayload for BTreeMap<K, V> {
    type Map = Self;

    fn map(&self, path: &[PathSegment]) -> Result<&Self, PathError> {
        root(self, path)
    }
    fn map_mut(&mut self, path: &[PathSegment]) -> Result<&mut Self, PathError> {
        root(self, path)
    }
}

impl<K: Payload + Eq + Hash, V: Payload> MapPayload for HashMap<K, V> {
    type Map = Self;

    fn map(&self, path: &[PathSegment]) -> Result<&Self, PathError> {
        root(self, path)
    }
    fn map_mut(&mut self, path: &[PathSegment]) -> Result<&mut Self, PathError> {
        root(self, path)
    }
}

fn shape(expected: ValueKind, found: &Value) -> PathError {
    PathError::Shape {
        expected,
        found: found.kind(),
    }
}

impl ListPayload for Value {
    type Item = Value;

    fn list(&self, path: &[PathSegment]) -> Result<&Vec<Value>, PathError> {
        match self.at(path).ok_or(PathError::Missing)? {
            Value::List(items) => Ok(items),
            other => Err(shape(ValueKind::List, other)),
        }
    }
    fn list_mut(&mut self, path: &[PathSegment]) -> Result<&mut Vec<Value>, PathError> {
        match self.at_mut(path).ok_or(PathError::Missing)? {
            Value::List(items) => Ok(items),
            other => Err(shape(ValueKind::List, other)),
        }
    }
}

impl SetPayload for Value {
    type Set = BTreeSet<Value>;

    fn set(&self, path: &[PathSegment]) -> Result<&BTreeSet<Value>, PathError> {
        match self.at(path).ok_or(PathError::Missing)? {
            Value::Set(items) => Ok(items),
            other => Err(shape(ValueKind::Set, other)),
        }
    }
    fn set_mut(&mut self, path: &[PathSegment]) -> Result<&mut BTreeSet<Value>, PathError> {
        match self.at_mut(path).ok_or(PathError::Missing)? {
            Value::Set(items) => Ok(items),
            other => Err(shape(ValueKind::Set, other)),
        }
    }
}

impl MapPayload for Value {
    type Map = BTreeMap<String, Value>;

    fn map(&self, path: &[PathSegment]) -> Result<&BTreeMap<String, Value>, PathError> {
        match self.at(path).ok_or(PathError::Missing)? {
            Value::Map(entries) => Ok(entries),
            other => Err(shape(ValueKind::Map, other)),
        }
    }
    fn map_mut(&mut self, path: &[PathSegment]) -> Result<&mut BTreeMap<String, Value>, PathError> {
        match self.at_mut(path).ok_or(PathError::Missing)? {
            Value::Map(entries) => Ok(entries),
            other => Err(shape(ValueKind::Map, other)),
        }
    }
}

// ─── Shared view plumbing ────────────────────────────────────────────────────

fn locate_err<T>(cell: &Ref<T>, path: &[PathSegment], err: PathError) -> RefError {
    let name = cell.inner.name.clone();
    let path = render_path(path);
    match err {
        PathError::Missing => RefError::MissingPath { name, path },
        PathError::Shape { expected, found } => RefError::ShapeMismatch {
            name,
            path,
            expected,
            found,
        },
    }
}

fn nested<T: Payload>(
    cell: &Ref<T>,
    base: &[PathSegment],
    step: PathSegment,
) -> Result<Vec<PathSegment>, RefError> {
    let mut path = base.to_vec();
    path.push(step);
    if cell.inner.deep {
        Ok(path)
    } else {
        Err(RefError::NotDeep {
            name: cell.inner.name.clone(),
            path: render_path(&path),
        })
    }
}

// ─── ListView ────────────────────────────────────────────────────────────────

/// In-place list edits on a cell.
pub struct ListView<'a, T> {
    cell: &'a Ref<T>,
    path: Vec<PathSegment>,
}

impl<T: ListPayload> fmt::Debug for ListView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListView")
            .field("cell", &self.cell.inner.name)
            .field("path", &render_path(&self.path))
            .finish()
    }
}

impl<'a, T: ListPayload> ListView<'a, T> {
    fn read<R>(&self, f: impl FnOnce(&Vec<T::Item>) -> R) -> Result<R, RefError> {
        self.cell.inner.read(|value| {
            value
                .list(&self.path)
                .map(f)
                .map_err(|err| locate_err(self.cell, &self.path, err))
        })
    }

    fn write<R>(&self, f: impl FnOnce(&mut Vec<T::Item>) -> Result<(R, bool), RefError>) -> Result<R, RefError> {
        self.cell.inner.mutate(|value| {
            let list = value
                .list_mut(&self.path)
                .map_err(|err| locate_err(self.cell, &self.path, err))?;
            f(list)
        })
    }

    fn out_of_range(&self, index: usize, len: usize) -> RefError {
        RefError::IndexOutOfRange {
            name: self.cell.inner.name.clone(),
            index,
            len,
        }
    }

    pub fn len(&self) -> Result<usize, RefError> {
        self.read(Vec::len)
    }

    pub fn is_empty(&self) -> Result<bool, RefError> {
        self.read(Vec::is_empty)
    }

    pub fn get(&self, index: usize) -> Result<Option<T::Item>, RefError> {
        self.read(|list| list.get(index).cloned())
    }

    pub fn to_vec(&self) -> Result<Vec<T::Item>, RefError> {
        self.read(Vec::clone)
    }

    pub fn push(&self, item: T::Item) -> Result<(), RefError> {
        self.cell.inner.check_item(&item)?;
        self.write(|list| {
            list.push(item);
            Ok(((), true))
        })
    }

    /// Insert at `index`; `index == len` appends.
    pub fn insert(&self, index: usize, item: T::Item) -> Result<(), RefError> {
        self.cell.inner.check_item(&item)?;
        self.write(|list| {
            if index > list.len() {
                return Err(self.out_of_range(index, list.len()));
            }
            list.insert(index, item);
            Ok(((), true))
        })
    }

    /// Replace the element at `index`, returning the old one.
    pub fn set(&self, index: usize, item: T::Item) -> Result<T::Item, RefError> {
        self.cell.inner.check_item(&item)?;
        self.write(|list| {
            let len = list.len();
            let slot = list.get_mut(index).ok_or_else(|| self.out_of_range(index, len))?;
            let changed = *slot != item;
            let old = std::mem::replace(slot, item);
            Ok((old, changed))
        })
    }

    pub fn remove(&self, index: usize) -> Result<T::Item, RefError> {
        self.write(|list| {
            if index >= list.len() {
                return Err(self.out_of_range(index, list.len()));
            }
            Ok((list.remove(index), true))
        })
    }

    pub fn pop(&self) -> Result<Option<T::Item>, RefError> {
        self.write(|list| {
            let popped = list.pop();
            let changed = popped.is_some();
            Ok((popped, changed))
        })
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T::Item>) -> Result<(), RefError> {
        let items: Vec<T::Item> = items.into_iter().collect();
        for item in &items {
            self.cell.inner.check_item(item)?;
        }
        self.write(|list| {
            let changed = !items.is_empty();
            list.extend(items);
            Ok(((), changed))
        })
    }

    /// Keep only the elements `keep` accepts.
    pub fn retain(&self, mut keep: impl FnMut(&T::Item) -> bool) -> Result<(), RefError> {
        self.write(|list| {
            let before = list.len();
            list.retain(|item| keep(item));
            Ok(((), list.len() != before))
        })
    }

    pub fn clear(&self) -> Result<(), RefError> {
        self.write(|list| {
            let changed = !list.is_empty();
            list.clear();
            Ok(((), changed))
        })
    }
}

impl<'a> ListView<'a, Value> {
    /// View of the list stored at `index`. Requires a deep cell.
    pub fn list_at(&self, index: usize) -> Result<ListView<'a, Value>, RefError> {
        let path = nested(self.cell, &self.path, PathSegment::Index(index))?;
        Ok(ListView { cell: self.cell, path })
    }

    /// View of the set stored at `index`. Requires a deep cell.
    pub fn set_at(&self, index: usize) -> Result<SetView<'a, Value>, RefError> {
        let path = nested(self.cell, &self.path, PathSegment::Index(index))?;
        Ok(SetView { cell: self.cell, path })
    }

    /// View of the map stored at `index`. Requires a deep cell.
    pub fn map_at(&self, index: usize) -> Result<MapView<'a, Value>, RefError> {
        let path = nested(self.cell, &self.path, PathSegment::Index(index))?;
        Ok(MapView { cell: self.cell, path })
    }
}

// ─── SetView ─────────────────────────────────────────────────────────────────

type SetItem<T> = <<T as SetPayload>::Set as SetContainer>::Item;

/// In-place set edits on a cell.
pub struct SetView<'a, T> {
    cell: &'a Ref<T>,
    path: Vec<PathSegment>,
}

impl<T: SetPayload> fmt::Debug for SetView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetView")
            .field("cell", &self.cell.inner.name)
            .field("path", &render_path(&self.path))
            .finish()
    }
}

impl<T: SetPayload> SetView<'_, T> {
    fn read<R>(&self, f: impl FnOnce(&T::Set) -> R) -> Result<R, RefError> {
        self.cell.inner.read(|value| {
            value
                .set(&self.path)
                .map(f)
                .map_err(|err| locate_err(self.cell, &self.path, err))
        })
    }

    fn write<R>(&self, f: impl FnOnce(&mut T::Set) -> (R, bool)) -> Result<R, RefError> {
        self.cell.inner.mutate(|value| {
            let set = value
                .set_mut(&self.path)
                .map_err(|err| locate_err(self.cell, &self.path, err))?;
            Ok(f(set))
        })
    }

    pub fn len(&self) -> Result<usize, RefError> {
        self.read(|set| set.len())
    }

    pub fn is_empty(&self) -> Result<bool, RefError> {
        self.read(|set| set.len() == 0)
    }

    pub fn contains(&self, item: &SetItem<T>) -> Result<bool, RefError> {
        self.read(|set| set.contains(item))
    }

    pub fn to_vec(&self) -> Result<Vec<SetItem<T>>, RefError> {
        self.read(|set| set.items())
    }

    /// Add `item`. Returns whether it was new.
    pub fn insert(&self, item: SetItem<T>) -> Result<bool, RefError> {
        self.cell.inner.check_item(&item)?;
        self.write(|set| {
            let added = set.insert(item);
            (added, added)
        })
    }

    /// Discard `item`. Returns whether it was present.
    pub fn remove(&self, item: &SetItem<T>) -> Result<bool, RefError> {
        self.write(|set| {
            let removed = set.remove(item);
            (removed, removed)
        })
    }

    pub fn clear(&self) -> Result<(), RefError> {
        self.write(|set| {
            let changed = set.len() > 0;
            set.clear();
            ((), changed)
        })
    }
}

// ─── MapView ─────────────────────────────────────────────────────────────────

type MapKey<T> = <<T as MapPayload>::Map as MapContainer>::Key;
type MapValue<T> = <<T as MapPayload>::Map as MapContainer>::Value;

/// In-place map edits on a cell.
pub struct MapView<'a, T> {
    cell: &'a Ref<T>,
    path: Vec<PathSegment>,
}

impl<T: MapPayload> fmt::Debug for MapView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapView")
            .field("cell", &self.cell.inner.name)
            .field("path", &render_path(&self.path))
            .finish()
    }
}

impl<T: MapPayload> MapView<'_, T> {
    fn read<R>(&self, f: impl FnOnce(&T::Map) -> R) -> Result<R, RefError> {
        self.cell.inner.read(|value| {
            value
                .map(&self.path)
                .map(f)
                .map_err(|err| locate_err(self.cell, &self.path, err))
        })
    }

    fn write<R>(&self, f: impl FnOnce(&mut T::Map) -> (R, bool)) -> Result<R, RefError> {
        self.cell.inner.mutate(|value| {
            let map = value
                .map_mut(&self.path)
                .map_err(|err| locate_err(self.cell, &self.path, err))?;
            Ok(f(map))
        })
    }

    pub fn len(&self) -> Result<usize, RefError> {
        self.read(|map| map.len())
    }

    pub fn is_empty(&self) -> Result<bool, RefError> {
        self.read(|map| map.len() == 0)
    }

    pub fn get(&self, key: &MapKey<T>) -> Result<Option<MapValue<T>>, RefError> {
        self.read(|map| map.get(key).cloned())
    }

    pub fn contains_key(&self, key: &MapKey<T>) -> Result<bool, RefError> {
        self.read(|map| map.get(key).is_some())
    }

    pub fn keys(&self) -> Result<Vec<MapKey<T>>, RefError> {
        self.read(|map| map.keys())
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn insert(&self, key: MapKey<T>, value: MapValue<T>) -> Result<Option<MapValue<T>>, RefError> {
        self.cell.inner.check_item(&value)?;
        self.write(|map| {
            let changed = map.get(&key) != Some(&value);
            (map.insert(key, value), changed)
        })
    }

    /// Insert every entry; notifies once for the whole batch.
    pub fn extend(
        &self,
        entries: impl IntoIterator<Item = (MapKey<T>, MapValue<T>)>,
    ) -> Result<(), RefError> {
        let entries: Vec<_> = entries.into_iter().collect();
        for (_, value) in &entries {
            self.cell.inner.check_item(value)?;
        }
        self.write(|map| {
            let mut changed = false;
            for (key, value) in entries {
                changed |= map.get(&key) != Some(&value);
                map.insert(key, value);
            }
            ((), changed)
        })
    }

    pub fn remove(&self, key: &MapKey<T>) -> Result<Option<MapValue<T>>, RefError> {
        self.write(|map| {
            let removed = map.remove(key);
            let changed = removed.is_some();
            (removed, changed)
        })
    }

    /// Remove and return one entry.
    pub fn pop_entry(&self) -> Result<Option<(MapKey<T>, MapValue<T>)>, RefError> {
        self.write(|map| {
            let popped = map.pop_entry();
            let changed = popped.is_some();
            (popped, changed)
        })
    }

    pub fn clear(&self) -> Result<(), RefError> {
        self.write(|map| {
            let changed = map.len() > 0;
            map.clear();
            ((), changed)
        })
    }
}

impl<'a> MapView<'a, Value> {
    /// View of the list stored under `key`. Requires a deep cell.
    pub fn list_at(&self, key: &str) -> Result<ListView<'a, Value>, RefError> {
        let path = nested(self.cell, &self.path, PathSegment::Key(key.to_owned()))?;
        Ok(ListView { cell: self.cell, path })
    }

    /// View of the set stored under `key`. Requires a deep cell.
    pub fn set_at(&self, key: &str) -> Result<SetView<'a, Value>, RefError> {
        let path = nested(self.cell, &self.path, PathSegment::Key(key.to_owned()))?;
        Ok(SetView { cell: self.cell, path })
    }

    /// View of the map stored under `key`. Requires a deep cell.
    pub fn map_at(&self, key: &str) -> Result<MapView<'a, Value>, RefError> {
        let path = nested(self.cell, &self.path, PathSegment::Key(key.to_owned()))?;
        Ok(MapView { cell: self.cell, path })
    }
}

// ─── Entry points on Ref ─────────────────────────────────────────────────────

impl<T: ListPayload> Ref<T> {
    /// List view of the payload.
    pub fn as_list(&self) -> ListView<'_, T> {
        ListView {
            cell: self,
            path: Vec::new(),
        }
    }
}

impl<T: SetPayload> Ref<T> {
    /// Set view of the payload.
    pub fn as_set(&self) -> SetView<'_, T> {
        SetView {
            cell: self,
            path: Vec::new(),
        }
    }
}

impl<T: MapPayload> Ref<T> {
    /// Map view of the payload.
    pub fn as_map(&self) -> MapView<'_, T> {
        MapView {
            cell: self,
            path: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use lumen_core::event_loop::MainLoop;

    use super::*;

    fn deliveries<T: Payload>(cell: &Ref<T>) -> Arc<StdMutex<Vec<T>>> {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        cell.watch(move |v: &T| sink.lock().unwrap().push(v.clone()));
        log
    }

    #[test]
    fn push_notifies_once_with_updated_list() {
        let main_loop = MainLoop::new();
        let cell = Ref::builder(Vec::<i32>::new())
            .name("list")
            .build(main_loop.handle());
        let log = deliveries(&cell);

        cell.as_list().push(1).unwrap();
        main_loop.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec![vec![1]]);
    }

    #[test]
    fn push_then_pop_in_transaction_notifies_once() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(vec![1], main_loop.handle());
        let log = deliveries(&cell);

        {
            let tx = cell.transaction();
            tx.as_list().push(1).unwrap();
            assert_eq!(tx.as_list().pop().unwrap(), Some(1));
        }
        main_loop.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec![vec![1]]);
    }

    #[test]
    fn no_op_mutations_stay_silent() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(Vec::<i32>::new(), main_loop.handle());
        let log = deliveries(&cell);

        assert_eq!(cell.as_list().pop().unwrap(), None);
        cell.as_list().clear().unwrap();
        cell.as_list().extend(Vec::new()).unwrap();
        main_loop.run_until_idle();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(cell.version(), 0);
    }

    #[test]
    fn rejected_item_leaves_list_untouched() {
        let main_loop = MainLoop::new();
        let cell = Ref::builder(Value::List(vec![Value::Int(1)]))
            .item_types([ValueKind::Int])
            .build(main_loop.handle());

        let err = cell
            .as_list()
            .extend([Value::Int(2), Value::from("three")])
            .unwrap_err();
        assert!(matches!(err, RefError::TypeInvariantViolation { .. }));
        assert_eq!(cell.as_list().len().unwrap(), 1);
    }

    #[test]
    fn index_errors_are_reported() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(vec!['a'], main_loop.handle());
        let list = cell.as_list();
        assert!(matches!(
            list.insert(3, 'b'),
            Err(RefError::IndexOutOfRange { index: 3, len: 1, .. })
        ));
        assert!(list.remove(1).is_err());
        assert_eq!(list.set(0, 'z').unwrap(), 'a');
        assert_eq!(list.to_vec().unwrap(), vec!['z']);
    }

    #[test]
    fn set_view_add_and_discard() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(BTreeSet::from(["wifi".to_string()]), main_loop.handle());
        let log = deliveries(&cell);
        let set = cell.as_set();

        assert!(!set.insert("wifi".into()).unwrap());
        main_loop.run_until_idle();
        assert!(log.lock().unwrap().is_empty());

        assert!(set.insert("bluetooth".into()).unwrap());
        assert!(set.remove(&"wifi".to_string()).unwrap());
        main_loop.run_until_idle();
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(set.to_vec().unwrap(), vec!["bluetooth".to_string()]);
    }

    #[test]
    fn map_view_insert_update_and_pop() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(BTreeMap::<String, i64>::new(), main_loop.handle());
        let map = cell.as_map();

        assert_eq!(map.insert("a".into(), 1).unwrap(), None);
        assert_eq!(cell.version(), 1);
        assert_eq!(map.insert("a".into(), 1).unwrap(), Some(1));
        assert_eq!(cell.version(), 1);

        map.extend([("b".to_string(), 2), ("c".to_string(), 3)]).unwrap();
        assert_eq!(map.keys().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(map.pop_entry().unwrap(), Some(("a".to_string(), 1)));
        assert!(!map.contains_key(&"a".to_string()).unwrap());
    }

    fn nested_value() -> Value {
        let mut entries = BTreeMap::new();
        entries.insert("sinks".to_string(), Value::from(vec!["hdmi"]));
        entries.insert("volume".to_string(), Value::Int(30));
        Value::Map(entries)
    }

    #[test]
    fn deep_cell_exposes_nested_views() {
        let main_loop = MainLoop::new();
        let cell = Ref::builder(nested_value())
            .deep(true)
            .build(main_loop.handle());
        let log = deliveries(&cell);

        let sinks = cell.as_map().list_at("sinks").unwrap();
        sinks.push(Value::from("speakers")).unwrap();
        main_loop.run_until_idle();

        let delivered = log.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let path = [PathSegment::Key("sinks".into()), PathSegment::Index(1)];
        assert_eq!(delivered[0].at(&path), Some(&Value::from("speakers")));
    }

    #[test]
    fn shallow_cell_refuses_nested_views() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(nested_value(), main_loop.handle());
        let err = cell.as_map().list_at("sinks").unwrap_err();
        assert_eq!(
            err,
            RefError::NotDeep {
                name: "ref".into(),
                path: "$.sinks".into()
            }
        );
    }

    #[test]
    fn views_debug_as_cell_and_path() {
        let main_loop = MainLoop::new();
        let cell = Ref::builder(nested_value())
            .name("audio")
            .deep(true)
            .build(main_loop.handle());
        let sinks = cell.as_map().list_at("sinks").unwrap();
        assert_eq!(
            format!("{sinks:?}"),
            r#"ListView { cell: "audio", path: "$.sinks" }"#
        );
        assert_eq!(
            format!("{:?}", cell.as_map()),
            r#"MapView { cell: "audio", path: "$" }"#
        );
    }

    #[test]
    fn wrong_shape_at_path_is_an_error() {
        let main_loop = MainLoop::new();
        let cell = Ref::builder(nested_value())
            .deep(true)
            .build(main_loop.handle());
        let err = cell.as_map().list_at("volume").unwrap().len().unwrap_err();
        assert!(matches!(
            err,
            RefError::ShapeMismatch {
                expected: ValueKind::List,
                found: ValueKind::Int,
                ..
            }
        ));
        assert!(matches!(
            cell.as_map().map_at("missing").unwrap().len(),
            Err(RefError::MissingPath { .. })
        ));
    }
}
