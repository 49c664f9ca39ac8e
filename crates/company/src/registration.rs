//! Consumer of `company.registered`: materializes the company profile.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use jobboard_core::Clock;
use jobboard_events::{
    ApplyError, ApplyOutcome, ApplyResult, CompanyRegisteredEvent, EventEnvelope, EventHandler,
};

use crate::profile::{CompanyProfile, CompanyProfileStore};

pub struct RegistrationHandler {
    store: Arc<dyn CompanyProfileStore>,
    clock: Arc<dyn Clock>,
}

impl RegistrationHandler {
    pub fn new(store: Arc<dyn CompanyProfileStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait::async_trait]
impl EventHandler for RegistrationHandler {
    type Event = CompanyRegisteredEvent;

    fn name(&self) -> &'static str {
        "company.registration"
    }

    #[instrument(
        skip(self, envelope),
        fields(company_id = %envelope.payload().company_id, event_id = %envelope.event_id())
    )]
    async fn apply(&self, envelope: &EventEnvelope<Self::Event>) -> ApplyResult {
        let event = envelope.payload();
        let profile = CompanyProfile {
            company_id: event.company_id,
            email: event.email.clone(),
            country_code: event.country_code.clone(),
            registered_at: event.registered_at,
            created_at: self.clock.now(),
            country_changed_at: None,
        };

        match self.store.insert_if_absent(profile).await {
            Ok(true) => {
                info!(country_code = %event.country_code, "company profile created");
                Ok(ApplyOutcome::Applied)
            }
            Ok(false) => {
                debug!("profile already exists");
                Ok(ApplyOutcome::AlreadyApplied)
            }
            Err(e) if e.is_transient() => Err(ApplyError::Transient(e.to_string())),
            Err(e) => Err(ApplyError::Permanent(e.to_string())),
        }
    }
}
