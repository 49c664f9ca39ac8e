use std::sync::Arc;

use chrono::Months;
use thiserror::Error;
use tracing::{info, instrument};

use jobboard_core::{Clock, CompanyId, DomainError, StoreError, SubscriptionId};

use crate::payment::{ChargeRequest, PaymentError, PaymentGateway};
use crate::store::SubscriptionStore;
use crate::subscription::{Plan, Subscription, SubscriptionStatus};

const MAX_MONTHS: u32 = 120;
const DEFAULT_MONTHLY_PRICE_CENTS: i64 = 4_900;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("company {0} has no subscription")]
    NotFound(CompanyId),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("subscription store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    monthly_price_cents: i64,
    currency: String,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn SubscriptionStore>, gateway: Arc<dyn PaymentGateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            gateway,
            clock,
            monthly_price_cents: DEFAULT_MONTHLY_PRICE_CENTS,
            currency: "usd".to_string(),
        }
    }

    pub fn with_pricing(mut self, monthly_price_cents: i64, currency: impl Into<String>) -> Self {
        self.monthly_price_cents = monthly_price_cents;
        self.currency = currency.into();
        self
    }

    pub async fn find_by_company(&self, company_id: CompanyId) -> Result<Subscription, SubscriptionError> {
        self.store
            .find_by_company(company_id)
            .await?
            .ok_or(SubscriptionError::NotFound(company_id))
    }

    /// Evaluated against the stored record on every call.
    pub async fn is_premium(&self, company_id: CompanyId) -> Result<bool, SubscriptionError> {
        let now = self.clock.now();
        Ok(self
            .store
            .find_by_company(company_id)
            .await?
            .is_some_and(|sub| sub.is_premium_at(now)))
    }

    /// Charge for `months` and make the subscription active. `months == 0` is
    /// open-ended and billed as one month. `payment_method` is handed to the
    /// gateway as-is.
    #[instrument(skip(self, payment_method))]
    pub async fn activate(
        &self,
        company_id: CompanyId,
        plan: &str,
        months: u32,
        payment_method: Option<&str>,
    ) -> Result<Subscription, SubscriptionError> {
        let plan = Plan::parse(plan)?;
        if months > MAX_MONTHS {
            return Err(DomainError::validation(format!("months must be at most {MAX_MONTHS}")).into());
        }

        let now = self.clock.now();
        let end_at = match months {
            0 => None,
            n => Some(
                now.checked_add_months(Months::new(n))
                    .ok_or_else(|| DomainError::validation("subscription end date out of range"))?,
            ),
        };

        let receipt = self
            .gateway
            .charge(&ChargeRequest {
                company_id,
                plan: plan.clone(),
                amount_cents: self.monthly_price_cents * i64::from(months.max(1)),
                currency: self.currency.clone(),
                payment_method: payment_method.map(str::to_string),
            })
            .await?;

        let subscription_id = self
            .store
            .find_by_company(company_id)
            .await?
            .map(|existing| existing.subscription_id)
            .unwrap_or_else(SubscriptionId::new);

        let subscription = Subscription {
            subscription_id,
            company_id,
            plan,
            status: SubscriptionStatus::Active,
            start_at: now,
            end_at,
            payment_reference: Some(receipt.reference),
        };
        self.store.upsert(subscription.clone()).await?;
        info!(%company_id, plan = %subscription.plan, ?end_at, "subscription activated");
        Ok(subscription)
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, company_id: CompanyId) -> Result<Subscription, SubscriptionError> {
        let cancelled = self
            .store
            .set_status(company_id, SubscriptionStatus::Cancelled)
            .await?
            .ok_or(SubscriptionError::NotFound(company_id))?;
        info!(%company_id, "subscription cancelled");
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use jobboard_core::{Entity, FixedClock};

    use super::*;
    use crate::payment::FakePaymentGateway;
    use crate::store::InMemorySubscriptionStore;

    struct Fixture {
        gateway: Arc<FakePaymentGateway>,
        clock: Arc<FixedClock>,
        service: SubscriptionService,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(FakePaymentGateway::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let service = SubscriptionService::new(
            Arc::new(InMemorySubscriptionStore::new()),
            gateway.clone(),
            clock.clone(),
        );
        Fixture { gateway, clock, service }
    }

    #[tokio::test]
    async fn no_subscription_is_not_premium() {
        let f = fixture();
        assert!(!f.service.is_premium(CompanyId::new()).await.unwrap());
        assert!(matches!(
            f.service.find_by_company(CompanyId::new()).await.unwrap_err(),
            SubscriptionError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn activation_charges_and_grants_premium_until_the_end_date() {
        let f = fixture();
        let company_id = CompanyId::new();

        let sub = f.service.activate(company_id, "pro", 3, Some("pm_card_visa")).await.unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.payment_reference.is_some());
        assert_eq!(f.gateway.charges()[0].amount_cents, 3 * 4_900);
        assert_eq!(f.gateway.charges()[0].payment_method.as_deref(), Some("pm_card_visa"));
        assert!(f.service.is_premium(company_id).await.unwrap());

        f.clock.advance(Duration::days(93));
        assert!(!f.service.is_premium(company_id).await.unwrap());
    }

    #[tokio::test]
    async fn open_ended_subscription_never_expires() {
        let f = fixture();
        let company_id = CompanyId::new();

        let sub = f.service.activate(company_id, "pro", 0, Some("pm_card_visa")).await.unwrap();
        assert_eq!(sub.end_at, None);

        f.clock.advance(Duration::days(3650));
        assert!(f.service.is_premium(company_id).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_revokes_premium() {
        let f = fixture();
        let company_id = CompanyId::new();
        f.service.activate(company_id, "pro", 0, Some("pm_card_visa")).await.unwrap();

        let cancelled = f.service.cancel(company_id).await.unwrap();

        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert!(!f.service.is_premium(company_id).await.unwrap());
        assert!(matches!(
            f.service.cancel(CompanyId::new()).await.unwrap_err(),
            SubscriptionError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn declined_payment_stores_nothing() {
        let f = fixture();
        let company_id = CompanyId::new();
        f.gateway.decline_next();

        let err = f.service.activate(company_id, "pro", 1, Some("pm_card_visa")).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::Payment(PaymentError::Declined(_))));
        assert!(!f.service.is_premium(company_id).await.unwrap());
    }

    #[tokio::test]
    async fn reactivation_keeps_the_subscription_id() {
        let f = fixture();
        let company_id = CompanyId::new();
        let first = f.service.activate(company_id, "basic", 1, Some("pm_card_visa")).await.unwrap();
        f.service.cancel(company_id).await.unwrap();

        let second = f.service.activate(company_id, "pro", 1, Some("pm_card_visa")).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(second.plan.as_str(), "pro");
        assert!(f.service.is_premium(company_id).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_charging() {
        let f = fixture();
        assert!(matches!(
            f.service.activate(CompanyId::new(), "  ", 1, None).await.unwrap_err(),
            SubscriptionError::Validation(_)
        ));
        assert!(matches!(
            f.service.activate(CompanyId::new(), "pro", 500, None).await.unwrap_err(),
            SubscriptionError::Validation(_)
        ));
        assert!(f.gateway.charges().is_empty());
    }
}
