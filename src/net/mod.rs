//! Network boundary of the worker: request/response snapshots and the fetch function.

mod client;
mod error;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use error::FetchError;
pub use types::{Request, Response, ResponseType};
