//! Platform snowflake identifiers and the acting member.
//!
//! Snowflakes fit in 63 bits, so they are stored as SQLite `INTEGER`
//! (`i64`) and cast at the repository boundary.

pub type UserId = u64;
pub type GuildId = u64;
pub type ChannelId = u64;
pub type RoleId = u64;

/// Engine-assigned review ticket identifier.
pub type TicketId = u64;

/// Convert a snowflake to its SQLite representation.
#[inline]
pub fn to_db(id: u64) -> i64 {
    id as i64
}

/// Convert a stored SQLite id back to a snowflake.
#[inline]
pub fn from_db(id: i64) -> u64 {
    id as u64
}

/// The member behind an inbound event, as reported by the gateway bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    /// Holds the platform's administrator permission.
    #[serde(default)]
    pub is_admin: bool,
}

impl Actor {
    /// Admins, or holders of any of `staff_roles`.
    pub fn is_staff(&self, staff_roles: &[RoleId]) -> bool {
        self.is_admin || self.roles.iter().any(|r| staff_roles.contains(r))
    }
}

/// Render a user mention.
pub fn mention(user_id: UserId) -> String {
    format!("<@{}>", user_id)
}

/// Render a role mention.
pub fn role_mention(role_id: RoleId) -> String {
    format!("<@&{}>", role_id)
}
