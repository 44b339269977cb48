use mlua::prelude::*;

/// Trait for host modules exposed to task scripts.
///
/// Each module provides functionality to Lua scripts running in the sandbox.
/// Modules must have a unique identifier and register their functions as a
/// global table named after that identifier.
///
/// The identifiers double as worker capabilities: a bundle lists the module
/// ids it needs in its manifest `dependencies`.
///
/// # Example
///
/// ```rust
/// use crawlmesh_lua::CrawlModule;
/// use mlua::prelude::*;
///
/// struct ClockModule;
///
/// impl CrawlModule for ClockModule {
///     fn id(&self) -> &'static str {
///         "clock"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         let table = lua.create_table()?;
///         table.set("epoch", lua.create_function(|_, ()| Ok(0))?)?;
///         lua.globals().set(self.id(), table)?;
///         Ok(())
///     }
/// }
/// ```
pub trait CrawlModule: Send + Sync {
    /// Returns the unique identifier for this module.
    ///
    /// This identifier is used as the global variable name in Lua.
    ///
    /// # Requirements
    /// - Must be a valid Lua identifier
    /// - Must be unique across all modules
    fn id(&self) -> &'static str;

    /// Registers this module's functions and values into the Lua context.
    ///
    /// # Errors
    /// Returns `LuaError` if registration fails
    fn register(&self, lua: &Lua) -> LuaResult<()>;

    /// Short human-readable description
    fn description(&self) -> &'static str {
        ""
    }
}

/// Registry of host modules
///
/// Used by the worker to build every task VM and to report which
/// dependencies it can satisfy.
pub struct ModuleRegistry {
    modules: Vec<Box<dyn CrawlModule>>,
}

impl ModuleRegistry {
    /// Creates a new empty module registry
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Registers a module
    ///
    /// # Panics
    /// Panics if a module with the same ID is already registered
    pub fn register<M: CrawlModule + 'static>(&mut self, module: M) {
        let id = module.id();
        if self.modules.iter().any(|m| m.id() == id) {
            panic!("Module with id '{}' is already registered", id);
        }
        self.modules.push(Box::new(module));
    }

    /// Gets a module by its ID
    pub fn get(&self, id: &str) -> Option<&dyn CrawlModule> {
        self.modules
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.as_ref())
    }

    /// Identifiers of every registered module, in registration order
    pub fn ids(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.id()).collect()
    }

    /// Registers all modules into a Lua context
    ///
    /// # Errors
    /// Returns the first error encountered during registration
    pub fn register_all(&self, lua: &Lua) -> LuaResult<()> {
        for module in &self.modules {
            module.register(lua)?;
        }
        Ok(())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
