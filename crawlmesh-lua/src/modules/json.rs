//! JSON module for task scripts
//!
//! `json.encode(value)` and `json.decode(text)` convert between Lua values
//! and JSON text through serde.

use crate::module::CrawlModule;
use mlua::prelude::*;

pub struct JsonModule;

impl CrawlModule for JsonModule {
    fn id(&self) -> &'static str {
        "json"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let json_table = lua.create_table()?;

        json_table.set(
            "encode",
            lua.create_function(|lua, value: LuaValue| {
                let value: serde_json::Value = lua.from_value(value)?;
                serde_json::to_string(&value).map_err(LuaError::external)
            })?,
        )?;

        json_table.set(
            "decode",
            lua.create_function(|lua, text: String| {
                let value: serde_json::Value =
                    serde_json::from_str(&text).map_err(LuaError::external)?;
                lua.to_value(&value)
            })?,
        )?;

        lua.globals().set(self.id(), json_table)?;
        Ok(())
    }

    fn description(&self) -> &'static str {
        "JSON encoding and decoding"
    }
}
