//! Barcelona transit routes served by the binary.
//!
//! - [`CacheService`] - bounded TTL cache shared by the services below
//! - [`TmbClient`] - TMB API calls over the upstream client
//! - [`MetroService`] - metro lookups with cache-aside
//! - [`MetroDto`] - compact metro view for app clients
//! - [`TramClient`] / [`TramService`] - tram lines and merged stop lists
//! - [`OtpService`] - one-time payload storage
//! - [`routes::install`] - registers the route set

pub mod cache;
pub mod dto;
pub mod metro;
pub mod otp;
pub mod routes;
pub mod stop;
pub mod tmb;
pub mod tram;

pub use cache::CacheService;
pub use dto::MetroDto;
pub use metro::MetroService;
pub use otp::{Otp, OtpService};
pub use stop::Stop;
pub use tmb::{TmbClient, TMB_TARGET};
pub use tram::{TramClient, TramService, TRAM_TARGET};
