//! MCP tool targets (fan-out producer for C8)
//!
//! Models the interface the fan-out coordinator consumes for the "MCP
//! tools" target kind (spec §1, §4.4): a named, schema-described async
//! operation. The core never speaks the MCP wire protocol itself — a
//! host registers [`Tool`] values built from whatever MCP client it
//! uses, and the coordinator calls `execute` the same way regardless of
//! target kind.

use crate::Result;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A tool handler: takes JSON arguments, returns a pinned boxed future of
/// the result. Boxed so tools of different concrete handler types can
/// live in one registry; `Send` so the coordinator can run tools
/// concurrently across tasks.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// One MCP tool definition: name, description, input schema, and the
/// handler that executes it. Immutable once built; cheap to clone (an
/// `Arc` clone for the handler, string/Value clones for the rest).
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

impl Tool {
    /// Build a tool, normalizing `input_schema` to JSON Schema if it
    /// arrived as simple type notation (`{"query": "string"}`) or an
    /// extended per-property schema; a schema that already looks like
    /// JSON Schema (`type` + `properties`) passes through unchanged.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: normalize_schema(input_schema),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub async fn execute(&self, arguments: Value) -> Result<Value> {
        (self.handler)(arguments).await
    }

    /// Per spec §4.4's MCP content-parsing rules, applied to the raw
    /// response this tool's handler would see from an actual MCP server:
    /// a single text item whose body parses as JSON becomes that parsed
    /// value; otherwise the text body is the string result; image items
    /// become `{type: "image", data, mime_type}`; resource items pass
    /// through as-is; a single-item response unwraps to that item rather
    /// than staying wrapped in a list.
    pub fn parse_mcp_content(items: &[Value]) -> Value {
        let parsed: Vec<Value> = items.iter().map(parse_one_content_item).collect();
        match parsed.len() {
            1 => parsed.into_iter().next().unwrap(),
            _ => Value::Array(parsed),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn to_openai_format(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

fn parse_one_content_item(item: &Value) -> Value {
    match item.get("type").and_then(Value::as_str) {
        Some("text") => {
            let text = item.get("text").and_then(Value::as_str).unwrap_or_default();
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        }
        Some("image") => serde_json::json!({
            "type": "image",
            "data": item.get("data").cloned().unwrap_or(Value::Null),
            "mime_type": item.get("mimeType").or_else(|| item.get("mime_type")).cloned().unwrap_or(Value::Null),
        }),
        Some("resource") => item.clone(),
        _ => item.clone(),
    }
}

fn normalize_schema(schema: Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return serde_json::json!({"type": "object", "properties": {}, "required": []});
    };
    if obj.contains_key("type") && obj.contains_key("properties") {
        return schema;
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for (name, value) in obj {
        if let Some(type_str) = value.as_str() {
            properties.insert(name.clone(), type_to_json_schema(type_str));
            required.push(name.clone());
        } else if value.is_object() {
            let mut prop = value.clone();
            let prop_obj = prop.as_object_mut().unwrap();
            let is_optional = prop_obj.remove("optional").and_then(|v| v.as_bool()).unwrap_or(false);
            let is_required = prop_obj.remove("required").and_then(|v| v.as_bool());
            let has_default = prop_obj.contains_key("default");
            properties.insert(name.clone(), prop);
            match is_required {
                Some(true) => required.push(name.clone()),
                Some(false) => {}
                None if is_optional || has_default => {}
                None => required.push(name.clone()),
            }
        }
    }
    serde_json::json!({"type": "object", "properties": properties, "required": required})
}

fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    };
    serde_json::json!({"type": json_type})
}

/// Fluent builder for [`Tool`].
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), schema: serde_json::json!({}) }
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn param(mut self, name: &str, type_str: &str) -> Self {
        if !self.schema.is_object() {
            self.schema = serde_json::json!({});
        }
        self.schema
            .as_object_mut()
            .unwrap()
            .insert(name.to_string(), Value::String(type_str.to_string()));
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Tool::new(self.name, self.description, self.schema, handler)
    }
}

pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}
