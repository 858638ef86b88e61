pub mod calls;
pub mod webhooks;
