//! Task metadata parser
//!
//! Extracts the name and concurrency limit of every task a script defines,
//! without running any stage. The crawler uses it to build the bundle
//! manifest.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::definition::{definition_tables, read_header};
use crate::sandbox::create_sandbox;

/// Static description of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub name: String,
    pub max_threads: usize,
}

/// Parse task metadata from Lua source code
///
/// The script is evaluated in a bare sandbox, so host modules are not
/// available at the top level of a task script.
///
/// # Example
/// ```no_run
/// use crawlmesh_lua::parser::parse_task_metadata;
///
/// let source = r#"
///     return task.define {
///         name = "echo",
///         max_threads = 2,
///         request = function(meta) return meta.url end,
///     }
/// "#;
///
/// let tasks = parse_task_metadata(source)?;
/// assert_eq!(tasks[0].name, "echo");
/// assert_eq!(tasks[0].max_threads, 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_task_metadata(source: &str) -> Result<Vec<TaskMetadata>> {
    let lua = create_sandbox().context("Failed to create metadata sandbox")?;

    let root: mlua::Value = lua
        .load(source)
        .eval()
        .map_err(|e| anyhow::anyhow!("Failed to evaluate task source: {}", e))?;

    definition_tables(root)?
        .iter()
        .map(|table| {
            let (name, max_threads) = read_header(table)?;
            Ok(TaskMetadata { name, max_threads })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_task() {
        let source = r#"
            return task.define {
                name = "echo",
                max_threads = 2,
                request = function(meta) return meta.url end,
            }
        "#;

        let tasks = parse_task_metadata(source).unwrap();
        assert_eq!(
            tasks,
            vec![TaskMetadata {
                name: "echo".to_string(),
                max_threads: 2
            }]
        );
    }

    #[test]
    fn test_stages_are_not_executed() {
        let source = r#"
            return task.define {
                name = "boom",
                max_threads = 1,
                request = function(meta) error("must not run") end,
                init = function() error("must not run") end,
            }
        "#;
        assert_eq!(parse_task_metadata(source).unwrap()[0].name, "boom");
    }

    #[test]
    fn test_rejects_non_positive_max_threads() {
        let source = r#"return { name = "echo", max_threads = 0, request = function() end }"#;
        let err = parse_task_metadata(source).unwrap_err();
        assert!(err.to_string().contains("positive"));

        let source = r#"return { name = "echo", request = function() end }"#;
        assert!(parse_task_metadata(source).is_err());
    }

    #[test]
    fn test_rejects_non_table_source() {
        assert!(parse_task_metadata("return 42").is_err());
        assert!(parse_task_metadata("return {}").is_err());
        assert!(parse_task_metadata("this is not lua").is_err());
    }
}
