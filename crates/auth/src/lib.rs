//! `jobboard-auth`: company credentials and their country-based shard placement.
//!
//! This crate is decoupled from HTTP and storage backends. It owns:
//!
//! - the credential record and the [`CredentialStore`] boundary
//! - the [`ShardMap`] deciding which shard a country lives on
//! - [`AuthService`]: registration (publishes `company.registered`), login stub, activation
//! - [`CountryChangeHandler`]: consumes `company.country.changed` and migrates the record

pub mod country_change;
pub mod credential;
pub mod password;
pub mod service;
pub mod shard;

pub use country_change::CountryChangeHandler;
pub use credential::{CredentialRecord, CredentialStore, InMemoryCredentialStore};
pub use service::{AuthError, AuthService, RegisterCompany, TokenResponse};
pub use shard::{Shard, ShardMap};
