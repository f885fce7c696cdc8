pub mod entitlements;
pub mod webhooks;
