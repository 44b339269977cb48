//! Task definitions for runtime execution
//!
//! A task script returns one definition table, usually wrapped in
//! `task.define { ... }`, or a list of them. Unlike [`TaskMetadata`], a
//! [`TaskDefinition`] holds the Lua functions of each stage and only lives
//! inside the VM that evaluated it.
//!
//! [`TaskMetadata`]: crate::parser::TaskMetadata

use anyhow::{Context, Result, bail};
use mlua::{Function, Lua, Table, Value};
use std::collections::HashSet;

/// Task definition with executable Lua functions
pub struct TaskDefinition {
    pub name: String,
    pub max_threads: usize,
    /// `request(meta) -> raw`
    pub request: Function,
    /// `parse(raw) -> item | list<item>`, defaults to JSON decoding
    pub parse: Option<Function>,
    /// `build(item) -> item | nil`, defaults to identity
    pub build: Option<Function>,
    pub init: Option<Function>,
    pub stop: Option<Function>,
}

/// Evaluates `source` in `lua` and extracts every task it defines
///
/// # Errors
/// Returns an error if:
/// - The Lua source is invalid
/// - A definition lacks `name`, `max_threads` or `request`
/// - `max_threads` is not a positive integer
/// - Two definitions share a name
pub fn parse_task_definitions(
    lua: &Lua,
    source: &str,
    chunk_name: &str,
) -> Result<Vec<TaskDefinition>> {
    let root: Value = lua
        .load(source)
        .set_name(chunk_name)
        .eval()
        .map_err(|e| anyhow::anyhow!("Failed to evaluate task source: {}", e))?;

    let mut definitions = Vec::new();
    for table in definition_tables(root)? {
        let (name, max_threads) = read_header(&table)?;

        let request: Function = table
            .get("request")
            .map_err(|e| anyhow::anyhow!("Task '{}' must have a 'request' function: {}", name, e))?;

        definitions.push(TaskDefinition {
            parse: optional_function(&table, &name, "parse")?,
            build: optional_function(&table, &name, "build")?,
            init: optional_function(&table, &name, "init")?,
            stop: optional_function(&table, &name, "stop")?,
            name,
            max_threads,
            request,
        });
    }

    Ok(definitions)
}

/// Flattens a script's return value into its definition tables
///
/// A table with a `name` field is a single definition, any other table is
/// read as a list of definitions.
pub(crate) fn definition_tables(root: Value) -> Result<Vec<Table>> {
    let table = match root {
        Value::Table(table) => table,
        _ => bail!("Task source must return a task definition table"),
    };

    let tables = if table.contains_key("name")? {
        vec![table]
    } else {
        let mut tables = Vec::new();
        for entry in table.sequence_values::<Table>() {
            tables.push(entry.context("Task list entries must be definition tables")?);
        }
        tables
    };

    if tables.is_empty() {
        bail!("Task source must define at least one task");
    }

    let mut seen = HashSet::new();
    for table in &tables {
        let name: String = table.get("name").context("Task must have a 'name' field")?;
        if !seen.insert(name.clone()) {
            bail!("Task '{}' is defined more than once", name);
        }
    }

    Ok(tables)
}

/// Reads the `name` and `max_threads` fields shared by both parsers
pub(crate) fn read_header(table: &Table) -> Result<(String, usize)> {
    let name: String = table.get("name").context("Task must have a 'name' field")?;

    let max_threads: i64 = table
        .get("max_threads")
        .with_context(|| format!("Task '{}' must have an integer 'max_threads' field", name))?;
    if max_threads <= 0 {
        bail!(
            "Task '{}' max_threads must be a positive integer, got {}",
            name,
            max_threads
        );
    }

    Ok((name, max_threads as usize))
}

fn optional_function(table: &Table, task: &str, field: &str) -> Result<Option<Function>> {
    match table.get::<Value>(field)? {
        Value::Nil => Ok(None),
        Value::Function(f) => Ok(Some(f)),
        other => bail!(
            "Task '{}' field '{}' must be a function, got {}",
            task,
            field,
            other.type_name()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::create_sandbox;

    #[test]
    fn test_single_definition() {
        let lua = create_sandbox().unwrap();
        let source = r#"
            return task.define {
                name = "echo",
                max_threads = 2,
                request = function(meta) return meta.url end,
                build = function(item) return item end,
            }
        "#;

        let defs = parse_task_definitions(&lua, source, "echo.lua").unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].max_threads, 2);
        assert!(defs[0].parse.is_none());
        assert!(defs[0].build.is_some());

        let raw: String = defs[0]
            .request
            .call(lua.load(r#"return { url = "a" }"#).eval::<Table>().unwrap())
            .unwrap();
        assert_eq!(raw, "a");
    }

    #[test]
    fn test_definition_list() {
        let lua = create_sandbox().unwrap();
        let source = r#"
            local function request(meta) return "" end
            return {
                task.define { name = "list", max_threads = 1, request = request },
                task.define { name = "detail", max_threads = 4, request = request },
            }
        "#;

        let defs = parse_task_definitions(&lua, source, "site.lua").unwrap();
        let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["list", "detail"]);
    }

    #[test]
    fn test_missing_request_fails() {
        let lua = create_sandbox().unwrap();
        let source = r#"return { name = "echo", max_threads = 1 }"#;
        assert!(parse_task_definitions(&lua, source, "echo.lua").is_err());
    }

    #[test]
    fn test_non_function_stage_fails() {
        let lua = create_sandbox().unwrap();
        let source = r#"
            return { name = "echo", max_threads = 1, request = function() end, parse = 5 }
        "#;
        let err = parse_task_definitions(&lua, source, "echo.lua")
            .err()
            .unwrap();
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_duplicate_names_fail() {
        let lua = create_sandbox().unwrap();
        let source = r#"
            local f = function() end
            return {
                { name = "a", max_threads = 1, request = f },
                { name = "a", max_threads = 1, request = f },
            }
        "#;
        assert!(parse_task_definitions(&lua, source, "dup.lua").is_err());
    }
}
