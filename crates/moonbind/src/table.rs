//! Table handles

use moonbind_vm::{State, TableRef, Value};

use crate::error::{Error, Result};
use crate::reference::{impl_handle, Reference};
use crate::stack::{from_value, to_value, FromStack, ToStack};

/// A VM table held from Rust
///
/// `get`/`set` honour `__index`/`__newindex`; the `raw_*` variants do not.
#[derive(Debug, Clone)]
pub struct Table(Reference);

impl Table {
    pub(crate) fn from_reference(_: &State, reference: Reference) -> Self {
        Table(reference)
    }

    pub(crate) fn from_ref(state: &State, table: TableRef) -> Self {
        Table(Reference::new(state, Value::Table(table)))
    }

    /// The underlying reference
    pub fn reference(&self) -> &Reference {
        &self.0
    }

    fn parts(&self) -> Result<(State, TableRef)> {
        let state = self.0.state()?;
        match self.0.value()? {
            Value::Table(t) => Ok((state, t)),
            other => Err(Error::runtime(format!(
                "expected a table reference, found {}",
                other.type_name()
            ))),
        }
    }

    /// The table itself
    pub fn table_ref(&self) -> Result<TableRef> {
        Ok(self.parts()?.1)
    }

    /// `t[key]`
    pub fn get<K: ToStack, V: FromStack>(&self, key: K) -> Result<V> {
        let (state, t) = self.parts()?;
        let key = to_value(&state, key)?;
        let value = state.index_value(&Value::Table(t), &key)?;
        from_value(&state, value)
    }

    /// `t[key] = value`
    pub fn set<K: ToStack, V: ToStack>(&self, key: K, value: V) -> Result<()> {
        let (state, t) = self.parts()?;
        let key = to_value(&state, key)?;
        let value = to_value(&state, value)?;
        Ok(state.new_index_value(&Value::Table(t), key, value)?)
    }

    /// `t[key]` without metamethods
    pub fn raw_get<K: ToStack, V: FromStack>(&self, key: K) -> Result<V> {
        let (state, t) = self.parts()?;
        let key = to_value(&state, key)?;
        let value = t.get(&key);
        from_value(&state, value)
    }

    /// `t[key] = value` without metamethods
    pub fn raw_set<K: ToStack, V: ToStack>(&self, key: K, value: V) -> Result<()> {
        let (state, t) = self.parts()?;
        let key = to_value(&state, key)?;
        let value = to_value(&state, value)?;
        Ok(t.set(key, value)?)
    }

    /// Whether `t[key]` is non-nil
    pub fn contains_key<K: ToStack>(&self, key: K) -> Result<bool> {
        Ok(!self.get::<K, Value>(key)?.is_nil())
    }

    /// Follow a chain of string keys, `t.a.b.c`
    ///
    /// A missing link reads as `nil`, so `Option<V>` never fails on a
    /// partial path.
    pub fn traverse_get<V: FromStack>(&self, path: &[&str]) -> Result<V> {
        let (state, t) = self.parts()?;
        let mut current = Value::Table(t);
        for key in path {
            if current.is_nil() {
                break;
            }
            current = state.index_value(&current, &Value::from(*key))?;
        }
        from_value(&state, current)
    }

    /// Assign through a chain of string keys, creating missing tables
    pub fn traverse_set<V: ToStack>(&self, path: &[&str], value: V) -> Result<()> {
        let Some((last, parents)) = path.split_last() else {
            return Err(Error::runtime("empty key path"));
        };
        let (state, t) = self.parts()?;
        let mut current = Value::Table(t);
        for key in parents {
            let key = Value::from(*key);
            let mut next = state.index_value(&current, &key)?;
            if next.is_nil() {
                next = Value::Table(TableRef::new());
                state.new_index_value(&current, key, next.clone())?;
            }
            current = next;
        }
        let value = to_value(&state, value)?;
        Ok(state.new_index_value(&current, Value::from(*last), value)?)
    }

    /// Length, honouring `__len`
    pub fn len(&self) -> Result<i64> {
        let (state, t) = self.parts()?;
        let n = state.len_value(&Value::Table(t))?;
        n.to_integer()
            .ok_or_else(|| Error::runtime("object length is not an integer"))
    }

    /// Border length without metamethods
    pub fn raw_len(&self) -> Result<i64> {
        Ok(self.parts()?.1.borrow().len())
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.parts()?.1.borrow().is_empty())
    }

    /// Visit every entry
    ///
    /// Entries are snapshotted first, so `f` may modify the table.
    pub fn for_each<K, V, F>(&self, mut f: F) -> Result<()>
    where
        K: FromStack,
        V: FromStack,
        F: FnMut(K, V) -> Result<()>,
    {
        let (state, t) = self.parts()?;
        let entries: Vec<(Value, Value)> = t
            .borrow()
            .pairs()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in entries {
            f(from_value(&state, k)?, from_value(&state, v)?)?;
        }
        Ok(())
    }

    /// Every entry, converted
    pub fn pairs<K: FromStack, V: FromStack>(&self) -> Result<Vec<(K, V)>> {
        let mut out = Vec::new();
        self.for_each(|k, v| {
            out.push((k, v));
            Ok(())
        })?;
        Ok(out)
    }

    /// The sequence part `t[1..=#t]`, converted
    pub fn sequence<V: FromStack>(&self) -> Result<Vec<V>> {
        let (state, t) = self.parts()?;
        let n = t.borrow().len();
        (1..=n)
            .map(|i| {
                let v = t.borrow().get_int(i);
                from_value(&state, v)
            })
            .collect()
    }

    /// The table's metatable
    pub fn metatable(&self) -> Result<Option<Table>> {
        let (state, t) = self.parts()?;
        Ok(t.metatable().map(|mt| Table::from_ref(&state, mt)))
    }

    /// Replace the table's metatable
    pub fn set_metatable(&self, metatable: Option<&Table>) -> Result<()> {
        let (state, t) = self.parts()?;
        let mt = metatable.map(Table::table_ref).transpose()?;
        Ok(state.set_metatable_of(&Value::Table(t), mt)?)
    }
}

impl_handle!(Table, Table, "table", |v| matches!(v, Value::Table(_)));
