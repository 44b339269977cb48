//! Lua sandbox creation
//!
//! This module provides a restricted Lua sandbox that prevents access to
//! dangerous operations like filesystem I/O and process execution.
//!
//! The `task` module is always injected as it's needed for task definitions.
//! Host modules (log, json, http) are registered on top of it by the caller,
//! typically the worker, through a [`ModuleRegistry`].

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table};

use crate::module::ModuleRegistry;

/// Create a restricted Lua sandbox
///
/// This sandbox includes only basic Lua functionality (tables, strings, math, coroutines)
/// and does NOT include any I/O capabilities or the ability to load external code.
///
/// # Use Cases
/// - Crawler: read task sources to discover task names and concurrency limits
/// - Worker: base of every task instance VM
///
/// # Example
/// ```no_run
/// use crawlmesh_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
///
/// let source = r#"
///     return task.define {
///         name = "echo",
///         max_threads = 2,
///         request = function(meta) return meta.url end,
///     }
/// "#;
/// let task: mlua::Table = lua.load(source).eval()?;
/// let name: String = task.get("name")?;
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    // Only allow: TABLE, STRING, MATH, COROUTINE
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE,
            LuaOptions::default(),
        )
    };

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;

    register_task_module(&lua)?;

    Ok(lua)
}

/// Create a sandbox with every module of `registry` registered as a global
pub fn create_execution_sandbox(registry: &ModuleRegistry) -> LuaResult<Lua> {
    let lua = create_sandbox()?;
    registry.register_all(&lua)?;
    Ok(lua)
}

/// Register the task module
///
/// `task.define(def)` returns the definition table as-is. It exists so task
/// scripts read declaratively.
fn register_task_module(lua: &Lua) -> LuaResult<()> {
    let task = lua.create_table()?;

    let define_fn = lua.create_function(|_, definition: Table| Ok(definition))?;
    task.set("define", define_fn)?;

    lua.globals().set("task", task)?;

    Ok(())
}
