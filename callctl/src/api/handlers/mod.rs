pub mod calls;
pub mod campaigns;
pub mod webhooks;
