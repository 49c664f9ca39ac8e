//! `jobboard-company`: company profiles.
//!
//! Profiles are materialized from `company.registered` by [`RegistrationHandler`];
//! [`CompanyService`] owns the country and announces changes with
//! `company.country.changed`.

pub mod profile;
pub mod registration;
pub mod service;

pub use profile::{CompanyProfile, CompanyProfileStore, CountryUpdate, InMemoryCompanyProfileStore};
pub use registration::RegistrationHandler;
pub use service::{CompanyError, CompanyService};
