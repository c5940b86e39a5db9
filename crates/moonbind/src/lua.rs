//! State facade

use moonbind_vm::{State, Value, Vm, VmOptions};

use crate::call::{self, IntoFunction};
use crate::coroutine::Coroutine;
use crate::error::Result;
use crate::function::Function;
use crate::options::{self, Options};
use crate::stack::{to_value, FromStack, ToStack};
use crate::table::Table;
use crate::usertype::{Usertype, UsertypeBuilder};

/// An owned VM instance with the binding layer attached
///
/// Dropping the `Lua` closes the VM: pending finalizers run and every
/// handle still held from Rust becomes invalid.
pub struct Lua {
    vm: Vm,
}

impl Lua {
    /// New instance with default options
    pub fn new() -> Self {
        Self::with_vm_options(Options::default(), VmOptions::default())
    }

    /// New instance with the given safety options
    pub fn with_options(options: Options) -> Self {
        Self::with_vm_options(options, VmOptions::default())
    }

    /// New instance with safety options and VM limits
    pub fn with_vm_options(options: Options, vm_options: VmOptions) -> Self {
        let vm = Vm::with_options(vm_options);
        options::install(&vm, options);
        Lua { vm }
    }

    /// The main thread
    pub fn state(&self) -> &State {
        self.vm.state()
    }

    /// Safety options in effect
    pub fn options(&self) -> Options {
        options::current(self.state())
    }

    /// Replace the safety options
    ///
    /// Takes effect for every call made afterwards, including calls into
    /// functions bound earlier.
    pub fn set_options(&self, options: Options) {
        options::install(self.state(), options);
    }

    // ========================================================================
    // Tables and globals
    // ========================================================================

    /// The global table
    pub fn globals(&self) -> Table {
        Table::from_ref(self.state(), self.state().globals())
    }

    /// The registry table
    pub fn registry(&self) -> Table {
        Table::from_ref(self.state(), self.state().registry())
    }

    /// A new empty table
    pub fn create_table(&self) -> Table {
        Table::from_ref(self.state(), self.state().new_table())
    }

    /// A new table filled from key/value pairs
    pub fn create_table_from<K, V, I>(&self, entries: I) -> Result<Table>
    where
        K: ToStack,
        V: ToStack,
        I: IntoIterator<Item = (K, V)>,
    {
        let table = self.state().new_table();
        for (k, v) in entries {
            let key = to_value(self.state(), k)?;
            let value = to_value(self.state(), v)?;
            table.set(key, value)?;
        }
        Ok(Table::from_ref(self.state(), table))
    }

    /// Assign a global
    pub fn set<V: ToStack>(&self, name: &str, value: V) -> Result<()> {
        self.globals().set(name, value)
    }

    /// Read a global
    pub fn get<V: FromStack>(&self, name: &str) -> Result<V> {
        self.globals().get(name)
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Bind `f` (a closure, function or [`Overload`](crate::Overload) set)
    pub fn create_function<M, F: IntoFunction<M>>(&self, name: &str, f: F) -> Function {
        Function::from_ref(self.state(), call::function(name, f))
    }

    /// Bind `f` as the global `name`
    pub fn set_function<M, F: IntoFunction<M>>(&self, name: &str, f: F) -> Result<()> {
        let func = call::function(name, f);
        self.globals().set(name, Value::Function(func))
    }

    /// A coroutine whose body is `f`
    pub fn create_coroutine<M, F: IntoFunction<M>>(&self, f: F) -> Result<Coroutine> {
        Coroutine::new(&self.create_function("coroutine", f))
    }

    /// Replace the handler building error objects for caught native failures
    pub fn set_exception_handler<F>(&self, handler: F)
    where
        F: Fn(&State, Option<&crate::Error>, &str) -> Value + 'static,
    {
        call::set_exception_handler(self.state(), handler);
    }

    /// Restore the default exception handler
    pub fn clear_exception_handler(&self) {
        call::clear_exception_handler(self.state());
    }

    // ========================================================================
    // Usertypes
    // ========================================================================

    /// Start binding `T` under `name`
    ///
    /// The builder starts from the members of [`Usertype::bind_fields`];
    /// nothing is visible to scripts until [`UsertypeBuilder::register`].
    pub fn new_usertype<T: Usertype>(&self, name: &str) -> UsertypeBuilder<'_, T> {
        T::bind_fields(UsertypeBuilder::new(self.state(), name))
    }

    /// Finalize unreachable objects; returns how many were finalized
    pub fn collect_garbage(&self) -> usize {
        self.state().collect_garbage()
    }
}

impl Default for Lua {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lua {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lua")
            .field("state", self.state())
            .field("options", &self.options())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_globals_round_trip() {
        let lua = Lua::new();
        lua.set("answer", 42).unwrap();
        assert_eq!(lua.get::<i32>("answer").unwrap(), 42);
        assert_eq!(lua.get::<Option<String>>("missing").unwrap(), None);
    }

    #[test]
    fn test_create_table_from() {
        let lua = Lua::new();
        let t = lua.create_table_from([("a", 1), ("b", 2)]).unwrap();
        assert_eq!(t.get::<_, i32>("b").unwrap(), 2);
        assert_eq!(lua.create_table().len().unwrap(), 0);
    }

    #[test]
    fn test_set_function() {
        let lua = Lua::new();
        lua.set_function("double", |x: i64| x * 2).unwrap();
        let f: Function = lua.get("double").unwrap();
        assert_eq!(f.call::<_, i64>(21).unwrap(), 42);
    }

    #[test]
    fn test_options_per_instance() {
        let lua = Lua::with_options(Options::unchecked());
        assert_eq!(lua.options(), Options::unchecked());
        lua.set_options(Options::checked());
        assert_eq!(lua.options(), Options::checked());
        assert_eq!(Lua::new().options(), Options::default());
    }

    #[test]
    fn test_handles_invalid_after_drop() {
        let lua = Lua::new();
        let t = lua.create_table();
        drop(lua);
        assert!(t.get::<_, Option<i32>>("x").is_err());
    }
}
