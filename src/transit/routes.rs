//! Default route set: status, metro and tram lookups, one-time payloads
//! and echo.
//!
//! Handlers find their services in the request context, so the binary only
//! has to provide [`MetroService`], [`TramService`] and [`OtpService`] in
//! the container. Metro routes answer with [`MetroDto`] projections when
//! the request carries `x-client-type: app`.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::dto::MetroDto;
use super::metro::MetroService;
use super::otp::{Otp, OtpService};
use super::tram::TramService;
use crate::codec::{ErrorCode, Request, Response};
use crate::error::Result;
use crate::handler::{HandlerError, HandlerResult, RegistryBuilder, RequestContext};
use crate::schema::RouteShape;

/// Body of `status`.
pub const STATUS_MESSAGE: &str = "Server is running";

/// Request header selecting the response view, matched case-insensitively.
pub const CLIENT_TYPE_HEADER: &str = "x-client-type";

/// [`CLIENT_TYPE_HEADER`] value that selects the compact app view.
pub const APP_CLIENT: &str = "app";

#[derive(Debug, Deserialize)]
struct LineQuery {
    line: String,
}

#[derive(Debug, Deserialize)]
struct StationQuery {
    station: String,
}

#[derive(Debug, Deserialize)]
struct InterchangeQuery {
    line: String,
    station: String,
}

#[derive(Debug, Deserialize)]
struct OtpCreate {
    #[serde(rename = "type")]
    kind: String,
    payload: String,
}

#[derive(Debug, Deserialize)]
struct OtpId {
    id: String,
}

/// Register every transit route on `builder`.
///
/// # Errors
///
/// [`ServerError::DuplicateRoute`](crate::ServerError::DuplicateRoute) if
/// one of the keys is already taken.
pub fn install(builder: &mut RegistryBuilder) -> Result<()> {
    let upstream = |shape: RouteShape| shape.with_error(ErrorCode::UpstreamError);

    builder
        .route(
            "status",
            RouteShape::any().returns(json!({ "type": "string" })),
            status,
        )?
        .route("echo", RouteShape::any(), echo)?
        .route("metro.lines", upstream(RouteShape::any()), metro_lines)?
        .route("metro.stations", upstream(RouteShape::object(&["line"])), metro_stations)?
        .route("metro.trains", upstream(RouteShape::object(&["station"])), metro_trains)?
        .route(
            "metro.interchanges",
            upstream(RouteShape::object(&["line", "station"])),
            metro_interchanges,
        )?
        .typed("tram.lines", upstream(RouteShape::any()), tram_lines)?
        .typed("tram.stops", upstream(RouteShape::object(&["line"])), tram_stops)?
        .typed(
            "otp.create",
            RouteShape::object(&["type", "payload"]).returns(otp_shape()),
            otp_create,
        )?
        .typed(
            "otp.get",
            RouteShape::object(&["id"])
                .returns(otp_shape())
                .with_error(ErrorCode::NotFound),
            otp_get,
        )?
        .typed(
            "otp.remove",
            RouteShape::object(&["id"]).returns(json!({ "type": "boolean" })),
            otp_remove,
        )?;

    Ok(())
}

fn otp_shape() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "type": { "type": "string" },
            "payload": { "type": "string" },
            "ts": { "type": "integer" },
        },
    })
}

async fn status(_request: Request, _ctx: RequestContext) -> HandlerResult {
    Ok(Response::ok(json!(STATUS_MESSAGE)))
}

async fn echo(request: Request, _ctx: RequestContext) -> HandlerResult {
    Ok(Response::ok(request.body))
}

/// Response view requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Upstream,
    App,
}

impl View {
    fn of(request: &Request) -> Self {
        let app = request.headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case(CLIENT_TYPE_HEADER) && value == APP_CLIENT
        });
        if app {
            Self::App
        } else {
            Self::Upstream
        }
    }

    fn respond(self, document: Value) -> HandlerResult {
        let body = match self {
            Self::Upstream => document,
            Self::App => MetroDto::project(document)?,
        };
        Ok(Response::ok(body))
    }
}

fn query<T: DeserializeOwned>(request: &Request) -> std::result::Result<T, HandlerError> {
    serde_json::from_value(request.body.clone()).map_err(|e| HandlerError::BadRequest(e.to_string()))
}

async fn metro_lines(request: Request, ctx: RequestContext) -> HandlerResult {
    let metro = ctx.service::<MetroService>()?;
    let lines = metro.lines(ctx.cancellation().clone()).await?;
    View::of(&request).respond(lines)
}

async fn metro_stations(request: Request, ctx: RequestContext) -> HandlerResult {
    let LineQuery { line } = query(&request)?;
    let metro = ctx.service::<MetroService>()?;
    let stations = metro.stations(&line, ctx.cancellation().clone()).await?;
    View::of(&request).respond(stations)
}

async fn metro_trains(request: Request, ctx: RequestContext) -> HandlerResult {
    let StationQuery { station } = query(&request)?;
    let metro = ctx.service::<MetroService>()?;
    let trains = metro.trains(&station, ctx.cancellation().clone()).await?;
    View::of(&request).respond(trains)
}

async fn metro_interchanges(request: Request, ctx: RequestContext) -> HandlerResult {
    let InterchangeQuery { line, station } = query(&request)?;
    let metro = ctx.service::<MetroService>()?;
    let interchanges = metro
        .interchanges(&line, &station, ctx.cancellation().clone())
        .await?;
    View::of(&request).respond(interchanges)
}

async fn tram_lines(_input: Value, ctx: RequestContext) -> std::result::Result<Value, HandlerError> {
    let tram = ctx.service::<TramService>()?;
    Ok(tram.lines(ctx.cancellation().clone()).await?)
}

async fn tram_stops(query: LineQuery, ctx: RequestContext) -> std::result::Result<Value, HandlerError> {
    let tram = ctx.service::<TramService>()?;
    Ok(tram.stops(&query.line, ctx.cancellation().clone()).await?)
}

async fn otp_create(input: OtpCreate, ctx: RequestContext) -> std::result::Result<Otp, HandlerError> {
    let otp = ctx.service::<OtpService>()?;
    Ok(otp.create(&input.kind, &input.payload)?)
}

async fn otp_get(input: OtpId, ctx: RequestContext) -> std::result::Result<Otp, HandlerError> {
    let otp = ctx.service::<OtpService>()?;
    otp.get(&input.id)
        .ok_or_else(|| HandlerError::NotFound(format!("otp '{}'", input.id)))
}

async fn otp_remove(input: OtpId, ctx: RequestContext) -> std::result::Result<bool, HandlerError> {
    let otp = ctx.service::<OtpService>()?;
    Ok(otp.remove(&input.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceContainer;
    use crate::transit::CacheService;
    use std::sync::Arc;

    fn registry() -> crate::handler::ServiceRegistry {
        let mut builder = RegistryBuilder::new();
        install(&mut builder).unwrap();
        builder.build()
    }

    fn ctx(route: &str) -> RequestContext {
        let cache = Arc::new(CacheService::default());
        let services = ServiceContainer::builder()
            .provide(OtpService::new(cache))
            .unwrap()
            .build();
        RequestContext::new(route, 1).with_services(services)
    }

    async fn call(registry: &crate::handler::ServiceRegistry, ctx: RequestContext, body: Value) -> Response {
        let route = ctx.route().to_string();
        let handler = registry.resolve(&route).unwrap();
        match handler.call(Request::new(route).with_body(body), ctx).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }

    #[test]
    fn test_installs_all_routes_in_order() {
        let registry = registry();
        let routes: Vec<&str> = registry.shapes().map(|(route, _)| route).collect();
        assert_eq!(
            routes,
            [
                "status",
                "echo",
                "metro.lines",
                "metro.stations",
                "metro.trains",
                "metro.interchanges",
                "tram.lines",
                "tram.stops",
                "otp.create",
                "otp.get",
                "otp.remove",
            ]
        );
    }

    #[test]
    fn test_install_twice_is_duplicate() {
        let mut builder = RegistryBuilder::new();
        install(&mut builder).unwrap();
        assert!(install(&mut builder).is_err());
    }

    #[tokio::test]
    async fn test_status() {
        let response = call(&registry(), ctx("status"), Value::Null).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!(STATUS_MESSAGE));
    }

    #[tokio::test]
    async fn test_otp_get_unknown_is_not_found() {
        let response = call(&registry(), ctx("otp.get"), json!({ "id": "nope" })).await;
        assert_eq!(response.status, 404);
        assert_eq!(response.error_code(), Some("NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_otp_create_missing_field_is_bad_request() {
        let response = call(&registry(), ctx("otp.create"), json!({ "type": "x" })).await;
        assert_eq!(response.status, 400);
        assert_eq!(response.error_code(), Some("BAD_REQUEST"));
    }

    #[test]
    fn test_view_from_header() {
        assert_eq!(View::of(&Request::new("metro.lines")), View::Upstream);
        assert_eq!(
            View::of(&Request::new("metro.lines").with_header("X-Client-Type", "app")),
            View::App
        );
        assert_eq!(
            View::of(&Request::new("metro.lines").with_header("x-client-type", "web")),
            View::Upstream
        );
    }

    #[tokio::test]
    async fn test_metro_stations_missing_line_is_bad_request() {
        let response = call(&registry(), ctx("metro.stations"), json!({})).await;
        assert_eq!(response.status, 400);
        assert_eq!(response.error_code(), Some("BAD_REQUEST"));
    }

    #[tokio::test]
    async fn test_metro_without_service_is_handler_failure() {
        let response = call(&registry(), ctx("metro.lines"), Value::Null).await;
        assert_eq!(response.status, 500);
    }
}
