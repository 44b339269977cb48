//! Task meta domain type

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::task_id;

/// Keys owned by the framework. User parameters never carry them.
pub const RESERVED_KEYS: [&str; 4] = ["id", "client_id", "task_name", "worker_id"];

/// Parameter record describing one unit of work.
///
/// On the wire a meta is a flat JSON object: the reserved fields sit next to
/// the user parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Content hash of the user parameters
    pub id: String,
    pub client_id: String,
    pub task_name: String,
    /// Set by the coordinator when the meta is dispatched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl TaskMeta {
    /// Builds a meta for `task_name`, deriving its id from `params`.
    ///
    /// Reserved keys found in `params` are discarded so the identity depends
    /// on user data only.
    pub fn new(
        client_id: impl Into<String>,
        task_name: impl Into<String>,
        mut params: Map<String, Value>,
    ) -> Self {
        for key in RESERVED_KEYS {
            params.remove(key);
        }

        Self {
            id: task_id(&params),
            client_id: client_id.into(),
            task_name: task_name.into(),
            worker_id: None,
            params,
        }
    }

    /// Key under which workers register the task implementation
    pub fn task_key(&self) -> String {
        format!("{}_{}", self.client_id, self.task_name)
    }

    /// Full flat view of the meta, reserved fields included
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.params.clone();
        map.insert("id".to_string(), Value::String(self.id.clone()));
        map.insert(
            "client_id".to_string(),
            Value::String(self.client_id.clone()),
        );
        map.insert(
            "task_name".to_string(),
            Value::String(self.task_name.clone()),
        );
        if let Some(worker_id) = &self.worker_id {
            map.insert("worker_id".to_string(), Value::String(worker_id.clone()));
        }
        map
    }
}
