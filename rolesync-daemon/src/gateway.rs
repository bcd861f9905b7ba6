//! Gateway bridge plumbing.
//!
//! The websocket session lives in a separate bridge process. It posts
//! [`PlatformEvent`]s to `/api/events`; in the other direction, gateway
//! commands are queued here and forwarded to the bridge over HTTP.
//!
//! [`LiveState`] is the slice of live platform state the engine asks for:
//! guild names, role metadata and presences, kept current from the same
//! events.

use rolesync_core::{
    GuildId, GuildSnapshot, MemberId, PlatformEvent, Presence, RoleId, RoleInfo,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::{mpsc, watch};

use crate::telemetry::metrics::with_metrics;

// ============================================================================
// LIVE STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct LiveGuild {
    name: String,
    roles: HashMap<RoleId, RoleInfo>,
    presences: HashMap<MemberId, Presence>,
}

/// Live view of every guild the bridge reported as available.
#[derive(Debug, Default)]
pub struct LiveState {
    guilds: RwLock<HashMap<GuildId, LiveGuild>>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the live view. Member events carry nothing the
    /// live view keeps except departures, which drop the presence.
    pub fn apply(&self, event: &PlatformEvent) {
        let mut guilds = self.guilds.write().unwrap_or_else(PoisonError::into_inner);
        match event {
            PlatformEvent::GuildCreate {
                guild_id,
                name,
                unavailable,
                roles,
                presences,
            } => {
                if *unavailable {
                    return;
                }
                guilds.insert(
                    guild_id.clone(),
                    LiveGuild {
                        name: name.clone(),
                        roles: roles.iter().map(|r| (r.id.clone(), r.clone())).collect(),
                        presences: presences
                            .iter()
                            .map(|p| (p.member_id.clone(), p.clone()))
                            .collect(),
                    },
                );
            }
            PlatformEvent::GuildDelete { guild_id } => {
                guilds.remove(guild_id);
            }
            PlatformEvent::PresenceUpdate { guild_id, presence } => {
                if let Some(guild) = guilds.get_mut(guild_id) {
                    guild
                        .presences
                        .insert(presence.member_id.clone(), presence.clone());
                }
            }
            PlatformEvent::RoleUpsert { guild_id, role } => {
                if let Some(guild) = guilds.get_mut(guild_id) {
                    guild.roles.insert(role.id.clone(), role.clone());
                }
            }
            PlatformEvent::RoleDelete { guild_id, role_id } => {
                if let Some(guild) = guilds.get_mut(guild_id) {
                    guild.roles.remove(role_id);
                }
            }
            PlatformEvent::MemberRemove {
                guild_id,
                member_id,
            } => {
                if let Some(guild) = guilds.get_mut(guild_id) {
                    guild.presences.remove(member_id);
                }
            }
            PlatformEvent::MemberAdd { .. }
            | PlatformEvent::MemberUpdate { .. }
            | PlatformEvent::MembersChunk { .. } => {}
        }
    }

    /// Snapshot without members; membership is owned by the Cache Store.
    pub fn snapshot(&self, guild: &GuildId) -> Option<GuildSnapshot> {
        let guilds = self.guilds.read().unwrap_or_else(PoisonError::into_inner);
        let live = guilds.get(guild)?;

        let mut roles: Vec<RoleInfo> = live.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.id.cmp(&b.id));
        Some(GuildSnapshot {
            name: live.name.clone(),
            members: Vec::new(),
            presences: live.presences.values().cloned().collect(),
            roles,
        })
    }

    /// `None` when the guild is unknown, `Some(None)` when the role is.
    pub fn role(&self, guild: &GuildId, role: &RoleId) -> Option<Option<RoleInfo>> {
        let guilds = self.guilds.read().unwrap_or_else(PoisonError::into_inner);
        guilds.get(guild).map(|g| g.roles.get(role).cloned())
    }

    pub fn guild_name(&self, guild: &GuildId) -> Option<String> {
        let guilds = self.guilds.read().unwrap_or_else(PoisonError::into_inner);
        guilds.get(guild).map(|g| g.name.clone())
    }

    pub fn guild_count(&self) -> usize {
        self.guilds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ============================================================================
// GATEWAY COMMANDS
// ============================================================================

/// Commands only the gateway session can issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Request a chunked enumeration. Empty query with limit 0 means "all".
    RequestGuildMembers {
        guild_id: GuildId,
        query: String,
        limit: u32,
    },
}

impl GatewayCommand {
    pub fn request_all_members(guild_id: GuildId) -> Self {
        GatewayCommand::RequestGuildMembers {
            guild_id,
            query: String::new(),
            limit: 0,
        }
    }
}

pub fn gateway_channel(
    capacity: usize,
) -> (mpsc::Sender<GatewayCommand>, mpsc::Receiver<GatewayCommand>) {
    mpsc::channel(capacity)
}

/// Drains queued gateway commands and POSTs each one to the bridge.
pub struct GatewayForwarder {
    http: reqwest::Client,
    bridge_url: Option<String>,
    commands: mpsc::Receiver<GatewayCommand>,
}

impl GatewayForwarder {
    pub fn new(
        http: reqwest::Client,
        bridge_url: Option<String>,
        commands: mpsc::Receiver<GatewayCommand>,
    ) -> Self {
        Self {
            http,
            bridge_url,
            commands,
        }
    }

    /// Forward one command. Failures are logged only; the next resync tick
    /// asks for membership again.
    pub async fn forward(&self, command: &GatewayCommand) -> bool {
        let Some(url) = &self.bridge_url else {
            tracing::warn!(?command, "No gateway bridge configured, dropping command");
            with_metrics(|m| m.record_gateway_command("dropped"));
            return false;
        };

        let result = self
            .http
            .post(url)
            .json(command)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => {
                tracing::debug!(?command, "Gateway command forwarded");
                with_metrics(|m| m.record_gateway_command("sent"));
                true
            }
            Err(e) => {
                tracing::error!(?command, error = %e, "Failed to forward gateway command");
                with_metrics(|m| m.record_gateway_command("failed"));
                false
            }
        }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(
            bridge_url = ?self.bridge_url,
            "Gateway forwarder started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Gateway forwarder shutting down");
                        break;
                    }
                }

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::info!("Gateway command channel closed");
                        break;
                    };
                    self.forward(&command).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolesync_core::PresenceStatus;

    fn guild_create() -> PlatformEvent {
        PlatformEvent::GuildCreate {
            guild_id: "g1".into(),
            name: "Heroes Awaken".to_string(),
            unavailable: false,
            roles: vec![RoleInfo {
                id: "R1".into(),
                name: "Testers".to_string(),
            }],
            presences: vec![Presence::new("1", PresenceStatus::Online)],
        }
    }

    #[test]
    fn test_guild_create_populates_live_view() {
        let live = LiveState::new();
        live.apply(&guild_create());

        let snapshot = live.snapshot(&"g1".into()).expect("snapshot");
        assert_eq!(snapshot.name, "Heroes Awaken");
        assert_eq!(snapshot.roles.len(), 1);
        assert_eq!(snapshot.presences.len(), 1);
        assert!(snapshot.members.is_empty());
    }

    #[test]
    fn test_unavailable_guild_is_not_tracked() {
        let live = LiveState::new();
        live.apply(&PlatformEvent::GuildCreate {
            guild_id: "g1".into(),
            name: String::new(),
            unavailable: true,
            roles: vec![],
            presences: vec![],
        });
        assert_eq!(live.guild_count(), 0);
    }

    #[test]
    fn test_incremental_updates() {
        let live = LiveState::new();
        let guild = GuildId::from("g1");
        live.apply(&guild_create());

        live.apply(&PlatformEvent::PresenceUpdate {
            guild_id: guild.clone(),
            presence: Presence::new("2", PresenceStatus::Idle),
        });
        live.apply(&PlatformEvent::RoleUpsert {
            guild_id: guild.clone(),
            role: RoleInfo {
                id: "R1".into(),
                name: "Veterans".to_string(),
            },
        });
        live.apply(&PlatformEvent::MemberRemove {
            guild_id: guild.clone(),
            member_id: "1".into(),
        });

        let snapshot = live.snapshot(&guild).expect("snapshot");
        assert_eq!(snapshot.presences, vec![Presence::new("2", PresenceStatus::Idle)]);
        assert_eq!(
            live.role(&guild, &"R1".into()).flatten().map(|r| r.name),
            Some("Veterans".to_string())
        );

        live.apply(&PlatformEvent::RoleDelete {
            guild_id: guild.clone(),
            role_id: "R1".into(),
        });
        assert_eq!(live.role(&guild, &"R1".into()), Some(None));

        live.apply(&PlatformEvent::GuildDelete {
            guild_id: guild.clone(),
        });
        assert_eq!(live.role(&guild, &"R1".into()), None);
        assert!(live.guild_name(&guild).is_none());
    }

    #[test]
    fn test_command_wire_format() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(GatewayCommand::request_all_members("g1".into()))?;
        assert_eq!(
            json,
            serde_json::json!({
                "op": "request_guild_members",
                "guild_id": "g1",
                "query": "",
                "limit": 0
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_forwarder_drops_without_bridge() {
        let (_tx, rx) = gateway_channel(4);
        let forwarder = GatewayForwarder::new(reqwest::Client::new(), None, rx);
        assert!(
            !forwarder
                .forward(&GatewayCommand::request_all_members("g1".into()))
                .await
        );
    }

    #[tokio::test]
    async fn test_forwarder_stops_when_channel_closes() {
        let (tx, rx) = gateway_channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let forwarder = GatewayForwarder::new(reqwest::Client::new(), None, rx);
        tx.send(GatewayCommand::request_all_members("g1".into()))
            .await
            .expect("send");
        drop(tx);

        tokio::time::timeout(std::time::Duration::from_secs(5), forwarder.run(shutdown_rx))
            .await
            .expect("forwarder exits");
    }
}
