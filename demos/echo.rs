//! Echo server - smallest useful server plus a client talking to it.
//!
//! This example demonstrates:
//! - Registering a typed route with the registry builder
//! - Binding a server on an ephemeral port
//! - Calling it with `WireClient` and shutting down cleanly
//!
//! ```text
//! cargo run --example echo
//! ```

use aonbas_server::{HandlerError, RegistryBuilder, RouteShape, Server, WireClient};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Input structure for the echo route.
#[derive(Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo route.
#[derive(Serialize, Debug)]
struct EchoOutput {
    echo: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut routes = RegistryBuilder::new();
    routes.typed(
        "echo",
        RouteShape::object(&["message"]),
        |input: EchoInput, _ctx| async move {
            Ok::<_, HandlerError>(EchoOutput {
                echo: input.message,
            })
        },
    )?;

    let server = Server::builder().registry(routes.build()).bind().await?;
    println!("listening on {}", server.local_addr());

    let client = WireClient::connect(server.local_addr()).await?;
    let response = client.call("echo", json!({ "message": "hello" })).await?;
    println!("{} {}", response.status, response.body);

    drop(client);
    let report = server.shutdown().await;
    println!("shutdown: {report:?}");
    Ok(())
}
