//! Postgres-backed datastore of linked website accounts.
//!
//! Tables (see `sql/schema.sql`):
//! - `users (id, username)`
//! - `user_discords (id, user_id, discord_id, discord_name)`
//! - `roles (id, title, slug)`
//! - `role_user (user_id, role_id)` unique on the pair
//! - `game_heroes (user_id, hero_name)`
//! - `game_stats (hero_id, stats_key, stats_value)`

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use rolesync_core::{
    AccountSummary, Datastore, DatastoreError, DatastoreResult, DatastoreRole, HeroStats,
    LinkedAccount, LookupKind, MemberId, RoleSlug,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_postgres::{NoTls, Row};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONFIG
// ============================================================================

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection and checkout timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "heroesawaken".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout_secs: 30,
        }
    }
}

impl DbConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout());
        pool_cfg.timeouts.create = Some(self.timeout());
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// QUERIES
// ============================================================================

mod sql {
    pub const PING: &str = "SELECT 1";

    pub const LINKED_ACCOUNTS: &str = "\
        SELECT ud.discord_id, string_agg(r.slug, ',') AS slugs \
        FROM user_discords ud \
        LEFT JOIN role_user ru ON ru.user_id = ud.user_id \
        LEFT JOIN roles r ON r.id = ru.role_id \
        GROUP BY ud.id, ud.discord_id";

    /// One row per held role; a single row with a NULL slug for a linked
    /// account without roles; no rows when nothing is linked.
    pub const ROLES_FOR_IDENTITY: &str = "\
        SELECT r.slug \
        FROM user_discords ud \
        LEFT JOIN role_user ru ON ru.user_id = ud.user_id \
        LEFT JOIN roles r ON r.id = ru.role_id \
        WHERE ud.discord_id = $1";

    pub const ROLE_BY_SLUG: &str = "SELECT id, title, slug FROM roles WHERE slug = $1";

    pub const USER_ID_BY_DISCORD: &str = "SELECT user_id FROM user_discords WHERE discord_id = $1";

    pub const GRANT_ROLE: &str = "\
        INSERT INTO role_user (user_id, role_id) VALUES ($1, $2) \
        ON CONFLICT DO NOTHING";

    /// Counts every linked identity in `$2`, whether or not it already held
    /// the role.
    pub const GRANT_ROLE_MANY: &str = "\
        WITH linked AS ( \
            SELECT user_id FROM user_discords WHERE discord_id = ANY($2) \
        ), granted AS ( \
            INSERT INTO role_user (user_id, role_id) \
            SELECT user_id, $1 FROM linked \
            ON CONFLICT DO NOTHING \
        ) \
        SELECT count(*) FROM linked";

    pub const REVOKE_ROLE: &str = "DELETE FROM role_user WHERE role_id = $1 AND user_id = $2";

    pub const DISCORD_BY_DISCORD: &str =
        "SELECT discord_id FROM user_discords WHERE discord_id = $1";

    pub const DISCORD_BY_HERO: &str = "\
        SELECT ud.discord_id \
        FROM game_heroes gh \
        JOIN user_discords ud ON ud.user_id = gh.user_id \
        WHERE lower(gh.hero_name) = lower($1) \
        LIMIT 1";

    pub const DISCORD_BY_USERNAME: &str = "\
        SELECT ud.discord_id \
        FROM users u \
        JOIN user_discords ud ON ud.user_id = u.id \
        WHERE lower(u.username) = lower($1) \
        LIMIT 1";

    pub const ACCOUNT_SUMMARY: &str = "\
        SELECT u.id, u.username, ud.discord_id, ud.discord_name, \
            (SELECT string_agg(r.slug, ',') \
             FROM role_user ru JOIN roles r ON r.id = ru.role_id \
             WHERE ru.user_id = u.id) AS slugs \
        FROM user_discords ud \
        JOIN users u ON u.id = ud.user_id \
        WHERE ud.discord_id = $1";

    /// One row per (hero, stat); a hero without stats yields one row with
    /// NULL stat columns, a linked account without heroes one all-NULL row.
    pub const HERO_STATS: &str = "\
        SELECT gh.id, gh.hero_name, gs.stats_key, gs.stats_value \
        FROM user_discords ud \
        LEFT JOIN game_heroes gh ON gh.user_id = ud.user_id \
        LEFT JOIN game_stats gs ON gs.hero_id = gh.id \
        WHERE ud.discord_id = $1 \
        ORDER BY gh.id";

    pub const ALL: &[(&str, &str)] = &[
        ("ping", PING),
        ("linked_accounts", LINKED_ACCOUNTS),
        ("roles_for_identity", ROLES_FOR_IDENTITY),
        ("role_by_slug", ROLE_BY_SLUG),
        ("user_id_by_discord", USER_ID_BY_DISCORD),
        ("grant_role", GRANT_ROLE),
        ("grant_role_many", GRANT_ROLE_MANY),
        ("revoke_role", REVOKE_ROLE),
        ("discord_by_discord", DISCORD_BY_DISCORD),
        ("discord_by_hero", DISCORD_BY_HERO),
        ("discord_by_username", DISCORD_BY_USERNAME),
        ("account_summary", ACCOUNT_SUMMARY),
        ("hero_stats", HERO_STATS),
    ];
}

fn transport(err: impl std::fmt::Display) -> DatastoreError {
    DatastoreError::transport(err)
}

fn decode<T>(query: &str, row: &Row, idx: usize) -> DatastoreResult<T>
where
    T: for<'a> tokio_postgres::types::FromSql<'a>,
{
    row.try_get(idx).map_err(|e| DatastoreError::Decode {
        query: query.to_string(),
        reason: e.to_string(),
    })
}

/// `(hero id, hero name, stats key, stats value)` as read from `HERO_STATS`.
type HeroStatRow = (Option<i64>, Option<String>, Option<String>, Option<String>);

/// Group stat rows by hero, keeping the query's hero order.
fn fold_hero_rows(rows: &[HeroStatRow]) -> Vec<HeroStats> {
    let mut heroes: Vec<(i64, &str, Vec<(&str, &str)>)> = Vec::new();
    for (hero_id, hero_name, key, value) in rows {
        let (Some(hero_id), Some(hero_name)) = (hero_id, hero_name) else {
            continue;
        };
        let index = match heroes.iter().position(|(id, _, _)| id == hero_id) {
            Some(index) => index,
            None => {
                heroes.push((*hero_id, hero_name.as_str(), Vec::new()));
                heroes.len() - 1
            }
        };
        if let (Some(key), Some(value)) = (key, value) {
            heroes[index].2.push((key.as_str(), value.as_str()));
        }
    }
    heroes
        .into_iter()
        .map(|(_, name, stats)| HeroStats::from_rows(name, stats))
        .collect()
}

// ============================================================================
// DATASTORE
// ============================================================================

/// [`Datastore`] over a deadpool-managed Postgres pool.
#[derive(Clone)]
pub struct PgDatastore {
    pool: Pool,
}

impl PgDatastore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> DatastoreResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(transport)
    }

    /// Prepare every statement once. Run at startup; a failure means the
    /// schema does not match and the process must not start.
    pub async fn verify_statements(&self) -> DatastoreResult<()> {
        let conn = self.get_conn().await?;
        for (name, query) in sql::ALL {
            conn.prepare_cached(query).await.map_err(|e| {
                DatastoreError::transport(format!("Failed to prepare {}: {}", name, e))
            })?;
        }
        tracing::info!(statements = sql::ALL.len(), "Datastore statements prepared");
        Ok(())
    }

    async fn user_id(
        &self,
        conn: &deadpool_postgres::Object,
        identity: &MemberId,
    ) -> DatastoreResult<i64> {
        let stmt = conn
            .prepare_cached(sql::USER_ID_BY_DISCORD)
            .await
            .map_err(transport)?;
        let row = conn
            .query_opt(&stmt, &[&identity.as_str()])
            .await
            .map_err(transport)?
            .ok_or_else(|| DatastoreError::not_found(format!("linked account {}", identity)))?;
        decode(sql::USER_ID_BY_DISCORD, &row, 0)
    }
}

impl std::fmt::Debug for PgDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDatastore")
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn ping(&self) -> DatastoreResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(sql::PING, &[]).await.map_err(transport)?;
        Ok(())
    }

    async fn linked_accounts(&self) -> DatastoreResult<Vec<LinkedAccount>> {
        let conn = self.get_conn().await?;
        let stmt = conn
            .prepare_cached(sql::LINKED_ACCOUNTS)
            .await
            .map_err(transport)?;
        let rows = conn.query(&stmt, &[]).await.map_err(transport)?;

        rows.iter()
            .map(|row| {
                let identity: String = decode(sql::LINKED_ACCOUNTS, row, 0)?;
                let slugs: Option<String> = decode(sql::LINKED_ACCOUNTS, row, 1)?;
                Ok(LinkedAccount {
                    identity: MemberId::from(identity),
                    slug_list: slugs,
                })
            })
            .collect()
    }

    async fn roles_for_identity(&self, identity: &MemberId) -> DatastoreResult<Vec<RoleSlug>> {
        let conn = self.get_conn().await?;
        let stmt = conn
            .prepare_cached(sql::ROLES_FOR_IDENTITY)
            .await
            .map_err(transport)?;
        let rows = conn
            .query(&stmt, &[&identity.as_str()])
            .await
            .map_err(transport)?;

        if rows.is_empty() {
            return Err(DatastoreError::not_found(format!(
                "linked account {}",
                identity
            )));
        }

        let mut slugs = Vec::with_capacity(rows.len());
        for row in &rows {
            let slug: Option<String> = decode(sql::ROLES_FOR_IDENTITY, row, 0)?;
            if let Some(slug) = slug {
                slugs.push(RoleSlug::from(slug));
            }
        }
        Ok(slugs)
    }

    async fn role_by_slug(&self, slug: &RoleSlug) -> DatastoreResult<DatastoreRole> {
        let conn = self.get_conn().await?;
        let stmt = conn
            .prepare_cached(sql::ROLE_BY_SLUG)
            .await
            .map_err(transport)?;
        let row = conn
            .query_opt(&stmt, &[&slug.as_str()])
            .await
            .map_err(transport)?
            .ok_or_else(|| DatastoreError::not_found(format!("role {}", slug)))?;

        Ok(DatastoreRole {
            id: decode(sql::ROLE_BY_SLUG, &row, 0)?,
            title: decode(sql::ROLE_BY_SLUG, &row, 1)?,
            slug: RoleSlug::from(decode::<String>(sql::ROLE_BY_SLUG, &row, 2)?),
        })
    }

    async fn grant_role(&self, identity: &MemberId, role_id: i64) -> DatastoreResult<()> {
        let conn = self.get_conn().await?;
        let user_id = self.user_id(&conn, identity).await?;
        let stmt = conn
            .prepare_cached(sql::GRANT_ROLE)
            .await
            .map_err(transport)?;
        conn.execute(&stmt, &[&user_id, &role_id])
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn grant_role_many(&self, identities: &[MemberId], role_id: i64) -> DatastoreResult<u64> {
        if identities.is_empty() {
            return Ok(0);
        }
        let ids: Vec<&str> = identities.iter().map(MemberId::as_str).collect();

        let conn = self.get_conn().await?;
        let stmt = conn
            .prepare_cached(sql::GRANT_ROLE_MANY)
            .await
            .map_err(transport)?;
        let row = conn
            .query_one(&stmt, &[&role_id, &ids])
            .await
            .map_err(transport)?;
        let count: i64 = decode(sql::GRANT_ROLE_MANY, &row, 0)?;
        Ok(count.max(0) as u64)
    }

    async fn revoke_role(&self, identity: &MemberId, role_id: i64) -> DatastoreResult<()> {
        let conn = self.get_conn().await?;
        let user_id = self.user_id(&conn, identity).await?;
        let stmt = conn
            .prepare_cached(sql::REVOKE_ROLE)
            .await
            .map_err(transport)?;
        conn.execute(&stmt, &[&role_id, &user_id])
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn lookup_identity(&self, kind: LookupKind, key: &str) -> DatastoreResult<MemberId> {
        let query = match kind {
            LookupKind::Discord => sql::DISCORD_BY_DISCORD,
            LookupKind::Hero => sql::DISCORD_BY_HERO,
            LookupKind::Website => sql::DISCORD_BY_USERNAME,
        };

        let conn = self.get_conn().await?;
        let stmt = conn.prepare_cached(query).await.map_err(transport)?;
        let row = conn
            .query_opt(&stmt, &[&key])
            .await
            .map_err(transport)?
            .ok_or_else(|| DatastoreError::not_found(format!("{}:{}", kind, key)))?;
        let identity: String = decode(query, &row, 0)?;
        Ok(MemberId::from(identity))
    }

    async fn account_summary(&self, identity: &MemberId) -> DatastoreResult<AccountSummary> {
        let conn = self.get_conn().await?;
        let stmt = conn
            .prepare_cached(sql::ACCOUNT_SUMMARY)
            .await
            .map_err(transport)?;
        let row = conn
            .query_opt(&stmt, &[&identity.as_str()])
            .await
            .map_err(transport)?
            .ok_or_else(|| DatastoreError::not_found(format!("linked account {}", identity)))?;

        let discord_id: Option<String> = decode(sql::ACCOUNT_SUMMARY, &row, 2)?;
        let slugs: Option<String> = decode(sql::ACCOUNT_SUMMARY, &row, 4)?;
        Ok(AccountSummary {
            account_id: decode(sql::ACCOUNT_SUMMARY, &row, 0)?,
            username: decode(sql::ACCOUNT_SUMMARY, &row, 1)?,
            discord_id: discord_id.map(MemberId::from),
            discord_name: decode(sql::ACCOUNT_SUMMARY, &row, 3)?,
            roles: slugs
                .as_deref()
                .map(rolesync_core::decode_slug_list)
                .unwrap_or_default(),
        })
    }

    async fn hero_stats(&self, identity: &MemberId) -> DatastoreResult<Vec<HeroStats>> {
        let conn = self.get_conn().await?;
        let stmt = conn
            .prepare_cached(sql::HERO_STATS)
            .await
            .map_err(transport)?;
        let rows = conn
            .query(&stmt, &[&identity.as_str()])
            .await
            .map_err(transport)?;
        if rows.is_empty() {
            return Err(DatastoreError::not_found(format!("linked account {}", identity)));
        }

        let mut decoded: Vec<HeroStatRow> = Vec::with_capacity(rows.len());
        for row in &rows {
            decoded.push((
                decode(sql::HERO_STATS, row, 0)?,
                decode(sql::HERO_STATS, row, 1)?,
                decode(sql::HERO_STATS, row, 2)?,
                decode(sql::HERO_STATS, row, 3)?,
            ));
        }
        Ok(fold_hero_rows(&decoded))
    }
}
