//! Nuage VSD REST API Client
//!
//! A Rust client for the subset of the VSD API the SDN agent relies on:
//! enterprises, domains, zones, subnets, containers, network macros and
//! domain ACL templates.
//!
//! # Example
//!
//! ```no_run
//! use vsd_client::{VsdClient, VsdClientTrait, VsdCredentials};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = VsdClient::new(
//!     "https://vsd:8443".to_string(),
//!     "v5_0",
//!     VsdCredentials::password("csproot", "csproot", "csp"),
//! )?;
//!
//! // Obtain an API key
//! client.start_session().await?;
//!
//! // Look up an enterprise by name
//! let enterprise = client.find_enterprise("k8s").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod vsd_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{VsdClient, VsdCredentials};
pub use error::VsdError;
pub use models::*;
pub use vsd_trait::VsdClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockFailure, MockVsdClient};
