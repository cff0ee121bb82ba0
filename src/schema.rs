//! Schema registry.
//!
//! Each route is registered with a [`RouteShape`] describing its request
//! body, response body and the error codes it can produce. The
//! [`SchemaRegistry`] is computed once from the frozen route table and is
//! never consulted during dispatch.
//!
//! # Example
//!
//! ```
//! use aonbas_server::codec::{ErrorCode, Response};
//! use aonbas_server::handler::RegistryBuilder;
//! use aonbas_server::schema::{RouteShape, SchemaRegistry};
//!
//! let mut builder = RegistryBuilder::new();
//! builder
//!     .route(
//!         "otp.get",
//!         RouteShape::object(&["id"]).with_error(ErrorCode::NotFound),
//!         |_request, _ctx| async { Ok(Response::ok(serde_json::Value::Null)) },
//!     )
//!     .unwrap();
//!
//! let schema = SchemaRegistry::from_registry(&builder.build());
//! assert_eq!(schema.describe()[0].route, "otp.get");
//! assert!(schema.export_json()["routes"][0]["statuses"].is_array());
//! ```

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::codec::ErrorCode;
use crate::handler::ServiceRegistry;
use crate::protocol::HEADER_SIZE;

/// Error codes any dispatched route can produce.
const DISPATCH_ERRORS: [ErrorCode; 3] = [
    ErrorCode::HandlerFailure,
    ErrorCode::ShuttingDown,
    ErrorCode::Timeout,
];

/// Declared request/response shape of a route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteShape {
    /// Accepted request body (JSON-schema style).
    pub request: Value,
    /// Successful response body (JSON-schema style).
    pub response: Value,
    /// Route-specific error codes.
    pub errors: Vec<ErrorCode>,
}

impl RouteShape {
    /// Shape with explicit request and response descriptions.
    pub fn new(request: Value, response: Value) -> Self {
        Self {
            request,
            response,
            errors: Vec::new(),
        }
    }

    /// Accepts and returns anything.
    pub fn any() -> Self {
        Self::new(json!({}), json!({}))
    }

    /// Object body with the given required string fields.
    pub fn object(fields: &[&str]) -> Self {
        let properties: Map<String, Value> = fields
            .iter()
            .map(|field| (field.to_string(), json!({ "type": "string" })))
            .collect();

        let request = json!({
            "type": "object",
            "properties": properties,
            "required": fields,
        });

        let mut shape = Self::new(request, json!({}));
        shape.errors.push(ErrorCode::BadRequest);
        shape
    }

    /// Replace the response description.
    pub fn returns(mut self, response: Value) -> Self {
        self.response = response;
        self
    }

    /// Add a route-specific error code.
    pub fn with_error(mut self, code: ErrorCode) -> Self {
        if !self.errors.contains(&code) {
            self.errors.push(code);
        }
        self
    }
}

/// One documented status of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSchema {
    /// Status code.
    pub status: u16,
    /// Error code carried in the body, `None` for success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

/// Machine-readable description of one route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSchema {
    /// Route key.
    pub route: String,
    /// Accepted request body.
    pub request: Value,
    /// Successful response body.
    pub response: Value,
    /// Every status this route can answer with, sorted.
    pub statuses: Vec<StatusSchema>,
}

/// Read-only route descriptions, in registration order.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    routes: Vec<RouteSchema>,
}

impl SchemaRegistry {
    /// Compute descriptions from a frozen route table.
    pub fn from_registry(registry: &ServiceRegistry) -> Self {
        let routes = registry
            .shapes()
            .map(|(route, shape)| RouteSchema {
                route: route.to_string(),
                request: shape.request.clone(),
                response: shape.response.clone(),
                statuses: statuses_for(shape),
            })
            .collect();

        Self { routes }
    }

    /// Ordered route descriptions.
    pub fn describe(&self) -> &[RouteSchema] {
        &self.routes
    }

    /// Look up one route.
    pub fn get(&self, route: &str) -> Option<&RouteSchema> {
        self.routes.iter().find(|schema| schema.route == route)
    }

    /// Build the export document.
    pub fn export_json(&self) -> Value {
        let errors: Vec<Value> = ErrorCode::ALL
            .iter()
            .map(|code| json!({ "status": code.status(), "error": code.as_str() }))
            .collect();

        json!({
            "protocol": {
                "framing": "length-prefixed",
                "header_bytes": HEADER_SIZE,
                "header": ["flags:u8", "correlation_id:u32be", "payload_length:u32be"],
                "payload": "json",
                "request": { "route": "string", "headers": "map<string,string>", "body": "any" },
                "response": { "status": "u16", "headers": "map<string,string>", "body": "any" },
            },
            "routes": self.routes,
            "errors": errors,
        })
    }

    /// Export document as pretty-printed JSON.
    pub fn export_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.export_json())
    }
}

fn statuses_for(shape: &RouteShape) -> Vec<StatusSchema> {
    let mut statuses = vec![StatusSchema {
        status: 200,
        error: None,
    }];

    for code in shape.errors.iter().chain(DISPATCH_ERRORS.iter()) {
        let entry = StatusSchema {
            status: code.status(),
            error: Some(code.as_str()),
        };
        if !statuses.contains(&entry) {
            statuses.push(entry);
        }
    }

    statuses.sort_by_key(|s| (s.status, s.error));
    statuses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Response;
    use crate::handler::RegistryBuilder;

    fn registry() -> ServiceRegistry {
        let mut builder = RegistryBuilder::new();
        builder
            .route("status", RouteShape::any().returns(json!({"type": "string"})), |_r, _c| async {
                Ok(Response::ok(json!("Server is running")))
            })
            .unwrap()
            .route(
                "otp.get",
                RouteShape::object(&["id"]).with_error(ErrorCode::NotFound),
                |_r, _c| async { Ok(Response::ok(Value::Null)) },
            )
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_describe_order() {
        let schema = SchemaRegistry::from_registry(&registry());
        let routes: Vec<&str> = schema.describe().iter().map(|r| r.route.as_str()).collect();
        assert_eq!(routes, vec!["status", "otp.get"]);
    }

    #[test]
    fn test_object_shape() {
        let shape = RouteShape::object(&["line", "station"]);
        assert_eq!(shape.request["required"], json!(["line", "station"]));
        assert_eq!(shape.request["properties"]["line"]["type"], "string");
        assert_eq!(shape.errors, vec![ErrorCode::BadRequest]);
    }

    #[test]
    fn test_statuses_sorted_and_unique() {
        let schema = SchemaRegistry::from_registry(&registry());
        let otp = schema.get("otp.get").unwrap();

        let statuses: Vec<(u16, Option<&str>)> =
            otp.statuses.iter().map(|s| (s.status, s.error)).collect();
        assert_eq!(
            statuses,
            vec![
                (200, None),
                (400, Some("BAD_REQUEST")),
                (404, Some("NOT_FOUND")),
                (500, Some("HANDLER_FAILURE")),
                (503, Some("SHUTTING_DOWN")),
                (504, Some("TIMEOUT")),
            ]
        );
    }

    #[test]
    fn test_export_document() {
        let doc = SchemaRegistry::from_registry(&registry()).export_json();

        assert_eq!(doc["protocol"]["header_bytes"], 9);
        assert_eq!(doc["routes"][0]["route"], "status");
        assert_eq!(doc["routes"][0]["response"]["type"], "string");
        assert_eq!(doc["routes"][0]["statuses"][0], json!({"status": 200}));
        assert_eq!(doc["errors"].as_array().unwrap().len(), ErrorCode::ALL.len());
    }

    #[test]
    fn test_export_is_deterministic() {
        let first = SchemaRegistry::from_registry(&registry()).export_string().unwrap();
        let second = SchemaRegistry::from_registry(&registry()).export_string().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_registry() {
        let schema = SchemaRegistry::from_registry(&RegistryBuilder::new().build());
        assert!(schema.describe().is_empty());
        assert!(schema.get("status").is_none());
    }
}
