//! Records with a stable identity.

/// Credential records and company profiles are keyed by the company id;
/// subscriptions carry their own id.
pub trait Entity {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
