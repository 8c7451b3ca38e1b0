//! disk-rest: HTTP adapter for the disk client
//!
//! This crate provides the reqwest implementation of the `Transport` trait
//! from `disk-core` and the [`RestClient`] that turns API paths into
//! transfer links. It is the only crate that depends on reqwest.

pub mod client;
pub mod credentials;
pub mod transport;

pub use client::RestClient;
pub use credentials::{Authenticated, Credentials};
pub use transport::ReqwestTransport;
