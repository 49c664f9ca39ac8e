use std::collections::HashMap;
use std::sync::RwLock;

use jobboard_core::{CompanyId, StoreError, StoreResult};

use crate::subscription::{Subscription, SubscriptionStatus};

/// One subscription per company.
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find_by_company(&self, company_id: CompanyId) -> StoreResult<Option<Subscription>>;

    /// Insert or replace the company's subscription.
    async fn upsert(&self, subscription: Subscription) -> StoreResult<()>;

    /// Returns the updated subscription, or `None` when the company has none.
    async fn set_status(&self, company_id: CompanyId, status: SubscriptionStatus) -> StoreResult<Option<Subscription>>;
}

#[async_trait::async_trait]
impl<S> SubscriptionStore for std::sync::Arc<S>
where
    S: SubscriptionStore + ?Sized,
{
    async fn find_by_company(&self, company_id: CompanyId) -> StoreResult<Option<Subscription>> {
        (**self).find_by_company(company_id).await
    }

    async fn upsert(&self, subscription: Subscription) -> StoreResult<()> {
        (**self).upsert(subscription).await
    }

    async fn set_status(&self, company_id: CompanyId, status: SubscriptionStatus) -> StoreResult<Option<Subscription>> {
        (**self).set_status(company_id, status).await
    }
}

#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    inner: RwLock<HashMap<CompanyId, Subscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn find_by_company(&self, company_id: CompanyId) -> StoreResult<Option<Subscription>> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::unavailable("subscription store lock poisoned"))?;
        Ok(map.get(&company_id).cloned())
    }

    async fn upsert(&self, subscription: Subscription) -> StoreResult<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::unavailable("subscription store lock poisoned"))?;
        map.insert(subscription.company_id, subscription);
        Ok(())
    }

    async fn set_status(&self, company_id: CompanyId, status: SubscriptionStatus) -> StoreResult<Option<Subscription>> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::unavailable("subscription store lock poisoned"))?;
        Ok(map.get_mut(&company_id).map(|sub| {
            sub.status = status;
            sub.clone()
        }))
    }
}
