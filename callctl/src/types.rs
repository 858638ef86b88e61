//! Common type definitions.
//!
//! Entity IDs are UUIDs wrapped in type aliases for readability at call
//! sites; [`abbrev_uuid`] shortens them for log fields.

use uuid::Uuid;

// Type aliases for IDs
pub type CallId = Uuid;
pub type ContactId = Uuid;
pub type CampaignId = Uuid;
pub type WebhookLogId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}
