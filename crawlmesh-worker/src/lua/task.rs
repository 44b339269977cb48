//! Lua task instances
//!
//! Each instance owns its own sandboxed VM with the host modules registered
//! and the task's stage functions loaded from the bundle source.

use anyhow::{Context, Result};
use crawlmesh_core::TaskMeta;
use crawlmesh_lua::{ModuleRegistry, TaskDefinition, create_execution_sandbox, parse_task_definitions};
use mlua::{Lua, LuaSerdeExt};
use serde_json::Value;
use std::path::Path;

use crate::lua::modules::HttpModule;
use crate::lua::task_modules;
use crate::task::{CrawlTask, TaskError, TaskFactory, default_parse};

/// A task implemented by a Lua script
pub struct LuaTask {
    lua: Lua,
    definition: TaskDefinition,
}

fn to_lua<E>(lua: &Lua, value: &Value, stage: fn(String) -> E) -> Result<mlua::Value, E> {
    lua.to_value(value).map_err(|e| stage(e.to_string()))
}

fn from_lua<E>(lua: &Lua, value: mlua::Value, stage: fn(String) -> E) -> Result<Value, E> {
    lua.from_value(value).map_err(|e| stage(e.to_string()))
}

impl CrawlTask for LuaTask {
    fn init(&mut self) -> Result<(), TaskError> {
        if let Some(init) = &self.definition.init {
            init.call::<()>(())
                .map_err(|e| TaskError::Init(e.to_string()))?;
        }
        Ok(())
    }

    fn request(&mut self, meta: &TaskMeta) -> Result<Value, TaskError> {
        let arg = to_lua(&self.lua, &Value::Object(meta.to_map()), TaskError::Request)?;
        let raw: mlua::Value = self
            .definition
            .request
            .call(arg)
            .map_err(|e| TaskError::Request(e.to_string()))?;
        from_lua(&self.lua, raw, TaskError::Request)
    }

    fn parse(&mut self, raw: Value) -> Result<Value, TaskError> {
        let Some(parse) = &self.definition.parse else {
            return Ok(default_parse(raw));
        };

        let arg = to_lua(&self.lua, &raw, TaskError::Parse)?;
        let parsed: mlua::Value = parse
            .call(arg)
            .map_err(|e| TaskError::Parse(e.to_string()))?;
        from_lua(&self.lua, parsed, TaskError::Parse)
    }

    fn build(&mut self, item: Value) -> Result<Option<Value>, TaskError> {
        let Some(build) = &self.definition.build else {
            return Ok(Some(item));
        };

        let arg = to_lua(&self.lua, &item, TaskError::Build)?;
        let built: mlua::Value = build
            .call(arg)
            .map_err(|e| TaskError::Build(e.to_string()))?;
        if built.is_nil() {
            return Ok(None);
        }
        from_lua(&self.lua, built, TaskError::Build).map(Some)
    }

    fn stop(&mut self) {
        if let Some(stop) = &self.definition.stop {
            if let Err(e) = stop.call::<()>(()) {
                tracing::warn!("Task '{}' stop hook failed: {}", self.definition.name, e);
            }
        }
    }
}

/// Builds [`LuaTask`] instances of one task from its bundle source
pub struct LuaTaskFactory {
    task_name: String,
    chunk_name: String,
    source: String,
    modules: ModuleRegistry,
}

impl LuaTaskFactory {
    /// Read the task's module from an unpacked bundle
    pub fn load(
        bundle_dir: &Path,
        client_id: &str,
        task_name: &str,
        module: &str,
        http: &HttpModule,
    ) -> Result<Self> {
        let path = bundle_dir.join(module);
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read task module {}", path.display()))?;

        let task_key = format!("{}_{}", client_id, task_name);
        let modules = task_modules(&task_key, http);
        Ok(Self::from_source(task_key, task_name, module, source, modules))
    }

    pub fn from_source(
        task_key: String,
        task_name: &str,
        module: &str,
        source: String,
        modules: ModuleRegistry,
    ) -> Self {
        Self {
            task_name: task_name.to_string(),
            chunk_name: format!("{}:{}", task_key, module),
            source,
            modules,
        }
    }
}

impl TaskFactory for LuaTaskFactory {
    fn create(&self) -> Result<Box<dyn CrawlTask>> {
        let lua = create_execution_sandbox(&self.modules)
            .map_err(|e| anyhow::anyhow!("Failed to create execution sandbox: {}", e))?;

        let definition = parse_task_definitions(&lua, &self.source, &self.chunk_name)?
            .into_iter()
            .find(|definition| definition.name == self.task_name)
            .with_context(|| {
                format!(
                    "Module {} does not define task '{}'",
                    self.chunk_name, self.task_name
                )
            })?;

        Ok(Box::new(LuaTask { lua, definition }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::run_stages;
    use crawlmesh_lua::JsonModule;
    use serde_json::{Map, json};

    fn factory(source: &str, task_name: &str) -> LuaTaskFactory {
        let mut modules = ModuleRegistry::new();
        modules.register(JsonModule);
        LuaTaskFactory::from_source(
            format!("t1_{}", task_name),
            task_name,
            "site.lua",
            source.to_string(),
            modules,
        )
    }

    fn meta(url: &str) -> TaskMeta {
        let mut params = Map::new();
        params.insert("url".to_string(), json!(url));
        TaskMeta::new("t1", "echo", params)
    }

    #[test]
    fn test_echo_with_default_stages() {
        let source = r#"
            return task.define {
                name = "echo",
                max_threads = 2,
                request = function(meta) return json.encode({ url = meta.url }) end,
            }
        "#;

        let mut task = factory(source, "echo").create().unwrap();
        let items = run_stages(task.as_mut(), &meta("a")).unwrap();
        assert_eq!(items, vec![json!({"url": "a"})]);
    }

    #[test]
    fn test_custom_stages_and_dropped_items() {
        let source = r#"
            return task.define {
                name = "links",
                max_threads = 1,
                request = function(meta) return "a,b,skip,c" end,
                parse = function(raw)
                    local out = {}
                    for part in string.gmatch(raw, "[^,]+") do
                        table.insert(out, { link = part })
                    end
                    return out
                end,
                build = function(item)
                    if item.link == "skip" then return nil end
                    item.link = string.upper(item.link)
                    return item
                end,
            }
        "#;

        let mut task = factory(source, "links").create().unwrap();
        let items = run_stages(task.as_mut(), &meta("a")).unwrap();
        assert_eq!(
            items,
            vec![json!({"link": "A"}), json!({"link": "B"}), json!({"link": "C"})]
        );
    }

    #[test]
    fn test_stage_failures_are_tagged() {
        let source = r#"
            return task.define {
                name = "broken",
                max_threads = 1,
                request = function(meta) error("connection refused") end,
            }
        "#;

        let mut task = factory(source, "broken").create().unwrap();
        let err = run_stages(task.as_mut(), &meta("a")).unwrap_err();
        assert_eq!(err.stage(), "request");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_init_keeps_state_between_runs() {
        let source = r#"
            local calls = 0
            return task.define {
                name = "counter",
                max_threads = 1,
                init = function() calls = 100 end,
                request = function(meta)
                    calls = calls + 1
                    return { calls = calls }
                end,
            }
        "#;

        let mut task = factory(source, "counter").create().unwrap();
        task.init().unwrap();
        run_stages(task.as_mut(), &meta("a")).unwrap();
        let items = run_stages(task.as_mut(), &meta("b")).unwrap();
        assert_eq!(items, vec![json!({"calls": 102})]);
    }

    #[test]
    fn test_unknown_task_name_fails() {
        let source = r#"return { name = "echo", max_threads = 1, request = function() end }"#;
        assert!(factory(source, "other").create().is_err());
    }
}
