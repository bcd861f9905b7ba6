//! Cached platform entities and datastore records.

use crate::identity::{GuildId, MemberId, RoleId, RoleSlug};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// PLATFORM ENTITIES
// ============================================================================

/// A guild member as seen by the platform.
///
/// The cache keeps the last version it was told about; it is a snapshot, not
/// an event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    /// Username shown in logs and account checks.
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
}

impl Member {
    pub fn new(id: impl Into<MemberId>, roles: Vec<RoleId>) -> Self {
        Self {
            id: id.into(),
            roles,
            username: String::new(),
            nick: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn has_role(&self, role: &RoleId) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Online status reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Idle => "idle",
            PresenceStatus::Dnd => "dnd",
            PresenceStatus::Invisible => "invisible",
            PresenceStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence of one user. May reference a member the Membership Set does not
/// know about yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub member_id: MemberId,
    pub status: PresenceStatus,
    /// Game/activity label, if the user is playing something.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
}

impl Presence {
    pub fn new(member_id: impl Into<MemberId>, status: PresenceStatus) -> Self {
        Self {
            member_id: member_id.into(),
            status,
            activity: None,
        }
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }
}

/// Role metadata from the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub id: RoleId,
    pub name: String,
}

/// Point-in-time view of a guild taken from the live platform state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSnapshot {
    pub name: String,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub presences: Vec<Presence>,
    #[serde(default)]
    pub roles: Vec<RoleInfo>,
}

impl GuildSnapshot {
    pub fn role(&self, id: &RoleId) -> Option<&RoleInfo> {
        self.roles.iter().find(|r| &r.id == id)
    }

    /// Presence entries keyed by user, later entries winning.
    pub fn presence_map(&self) -> HashMap<MemberId, Presence> {
        self.presences
            .iter()
            .map(|p| (p.member_id.clone(), p.clone()))
            .collect()
    }
}

/// Name and id of a guild the process serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildInfo {
    pub id: GuildId,
    pub name: String,
}

// ============================================================================
// DATASTORE RECORDS
// ============================================================================

/// One row of the linked-account listing: a platform identity and its
/// comma-joined role slugs as the datastore aggregates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub identity: MemberId,
    /// `None` when the account holds no roles at all.
    pub slug_list: Option<String>,
}

impl LinkedAccount {
    pub fn new(identity: impl Into<MemberId>, slug_list: Option<&str>) -> Self {
        Self {
            identity: identity.into(),
            slug_list: slug_list.map(str::to_string),
        }
    }

    pub fn slugs(&self) -> Vec<RoleSlug> {
        self.slug_list
            .as_deref()
            .map(decode_slug_list)
            .unwrap_or_default()
    }
}

/// Split a comma-joined slug list, dropping blanks.
pub fn decode_slug_list(raw: &str) -> Vec<RoleSlug> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(RoleSlug::from)
        .collect()
}

/// A role row in the datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreRole {
    pub id: i64,
    pub title: String,
    pub slug: RoleSlug,
}

/// Website account details shown by the account check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: i64,
    pub username: String,
    pub discord_id: Option<MemberId>,
    pub discord_name: Option<String>,
    pub roles: Vec<RoleSlug>,
}

/// Game statistics of one hero, folded from the datastore's key/value rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroStats {
    pub hero_name: String,
    /// Team name, or the raw code when it is not a known team.
    pub team: Option<String>,
    /// Kit name, or the raw code when it is not a known kit.
    pub class: Option<String>,
    pub level: u64,
    pub xp: u64,
    pub games: u64,
    pub wins: u64,
}

impl HeroStats {
    /// Fold `(stats key, stats value)` rows. Unknown keys are ignored and
    /// missing counters stay at zero.
    pub fn from_rows<'a>(
        hero_name: impl Into<String>,
        rows: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut stats = Self {
            hero_name: hero_name.into(),
            ..Self::default()
        };
        for (key, value) in rows {
            match key {
                "level" => stats.level = stat_count(value),
                "xp" => stats.xp = stat_count(value),
                "games" => stats.games = stat_count(value),
                "win" => stats.wins = stat_count(value),
                "c_team" => stats.team = Some(team_name(value)),
                "c_kit" => stats.class = Some(kit_name(value)),
                _ => {}
            }
        }
        stats
    }
}

/// Counters are stored as decimals; only the whole part is shown.
fn stat_count(raw: &str) -> u64 {
    let whole = raw.trim().split('.').next().unwrap_or_default();
    whole.parse().unwrap_or(0)
}

fn team_name(code: &str) -> String {
    match code {
        "1" => "National".to_string(),
        "2" => "Royal".to_string(),
        other => other.to_string(),
    }
}

fn kit_name(code: &str) -> String {
    match code {
        "0" => "Commando".to_string(),
        "1" => "Soldier".to_string(),
        "2" => "Gunner".to_string(),
        other => other.to_string(),
    }
}
