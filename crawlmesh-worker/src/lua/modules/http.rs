//! HTTP module for task scripts
//!
//! Exposes `http.get(url, opts)` and `http.post(url, body, opts)`. Both
//! return `{ status, ok, body, headers }`.
//!
//! `opts` may carry `headers` and `query` tables. A table `body` is sent as
//! JSON, a string body as-is.
//!
//! Requests are driven with [`Handle::block_on`], so scripts must run on a
//! blocking thread (`spawn_blocking`), never on a runtime worker thread.

use crawlmesh_lua::CrawlModule;
use mlua::prelude::*;
use reqwest::RequestBuilder;
use tokio::runtime::Handle;

/// HTTP client module sharing the worker's connection pool
#[derive(Clone)]
pub struct HttpModule {
    client: reqwest::Client,
    handle: Handle,
}

impl HttpModule {
    pub fn new(client: reqwest::Client, handle: Handle) -> Self {
        Self { client, handle }
    }

    fn send(&self, lua: &Lua, request: RequestBuilder) -> LuaResult<LuaTable> {
        let (status, headers, body) = self
            .handle
            .block_on(async move {
                let response = request.send().await?;
                let status = response.status().as_u16();
                let headers: Vec<(String, String)> = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|value| (name.to_string(), value.to_string()))
                    })
                    .collect();
                let body = response.text().await?;
                Ok::<_, reqwest::Error>((status, headers, body))
            })
            .map_err(LuaError::external)?;

        let header_table = lua.create_table()?;
        for (name, value) in headers {
            header_table.set(name, value)?;
        }

        let response = lua.create_table()?;
        response.set("status", status)?;
        response.set("ok", (200..300).contains(&status))?;
        response.set("body", body)?;
        response.set("headers", header_table)?;
        Ok(response)
    }
}

/// Apply the `headers` and `query` tables of `opts`
fn apply_options(mut request: RequestBuilder, opts: Option<LuaTable>) -> LuaResult<RequestBuilder> {
    let Some(opts) = opts else {
        return Ok(request);
    };

    if let Some(headers) = opts.get::<Option<LuaTable>>("headers")? {
        for pair in headers.pairs::<String, String>() {
            let (name, value) = pair?;
            request = request.header(name, value);
        }
    }

    if let Some(query) = opts.get::<Option<LuaTable>>("query")? {
        let mut params = Vec::new();
        for pair in query.pairs::<String, String>() {
            params.push(pair?);
        }
        request = request.query(&params);
    }

    Ok(request)
}

impl CrawlModule for HttpModule {
    fn id(&self) -> &'static str {
        "http"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let http_table = lua.create_table()?;

        // http.get(url, opts)
        {
            let module = self.clone();
            http_table.set(
                "get",
                lua.create_function(move |lua, (url, opts): (String, Option<LuaTable>)| {
                    let request = apply_options(module.client.get(&url), opts)?;
                    module.send(lua, request)
                })?,
            )?;
        }

        // http.post(url, body, opts)
        {
            let module = self.clone();
            http_table.set(
                "post",
                lua.create_function(
                    move |lua, (url, body, opts): (String, LuaValue, Option<LuaTable>)| {
                        let mut request = module.client.post(&url);
                        request = match body {
                            LuaValue::Nil => request,
                            LuaValue::String(text) => request.body(text.to_str()?.to_string()),
                            other => {
                                let json: serde_json::Value = lua.from_value(other)?;
                                request.json(&json)
                            }
                        };
                        let request = apply_options(request, opts)?;
                        module.send(lua, request)
                    },
                )?,
            )?;
        }

        lua.globals().set(self.id(), http_table)?;
        Ok(())
    }

    fn description(&self) -> &'static str {
        "HTTP requests from task scripts"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_exposes_functions() {
        let module = HttpModule::new(reqwest::Client::new(), Handle::current());
        let lua = Lua::new();
        module.register(&lua).unwrap();

        let has_get: bool = lua
            .load("return type(http.get) == 'function'")
            .eval()
            .unwrap();
        let has_post: bool = lua
            .load("return type(http.post) == 'function'")
            .eval()
            .unwrap();
        assert!(has_get);
        assert!(has_post);
    }

    #[tokio::test]
    async fn test_options_shape_the_request() {
        let lua = Lua::new();
        let opts: LuaTable = lua
            .load(r#"return { headers = { ["x-token"] = "abc" }, query = { page = "2" } }"#)
            .eval()
            .unwrap();

        let request = apply_options(
            reqwest::Client::new().get("http://localhost/items"),
            Some(opts),
        )
        .unwrap()
        .build()
        .unwrap();

        assert_eq!(request.url().query(), Some("page=2"));
        assert_eq!(request.headers()["x-token"], "abc");
    }
}
