//! Transit client - calls a running `aonbas-server`.
//!
//! ```text
//! cargo run --example transit_client -- 127.0.0.1:8080 metro.stations '{"line":"1"}'
//! ```
//!
//! Arguments: server address (default `127.0.0.1:8080`), route (default
//! `status`) and a JSON body (default `null`).

use aonbas_server::WireClient;
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let route = args.next().unwrap_or_else(|| "status".to_string());
    let body: Value = match args.next() {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Value::Null,
    };

    let client = WireClient::connect(addr.as_str()).await?;
    let response = client.call(&route, body).await?;

    println!("status: {}", response.status);
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    Ok(())
}
