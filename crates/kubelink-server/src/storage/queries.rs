//! Database queries for the kubelink control plane.

use kubelink_core::db::unix_timestamp;

use super::db::ServerDatabase;
use super::models::{Cluster, ClusterConnectionType, ClusterStatus, RegistrationToken};
use kubelink_core::db::DatabaseError;

/// Parameters for inserting a registration token.
pub struct NewRegistrationToken<'a> {
    pub id: &'a str,
    pub token_hash: &'a str,
    pub cluster_name: &'a str,
    pub created_by: &'a str,
    pub permission_preset: &'a str,
    pub expires_at: i64,
}

/// Parameters for inserting a cluster row.
pub struct NewCluster<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub connection_type: ClusterConnectionType,
    pub permission_preset: &'a str,
    pub agent_id: Option<&'a str>,
    pub created_by: &'a str,
}

/// Result of an atomic attempt to claim a registration token.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The token was unused and unexpired and now carries `used = 1`.
    Claimed(RegistrationToken),
    NotFound,
    AlreadyUsed,
    Expired,
}

impl ServerDatabase {
    // =========================================================================
    // Registration token queries
    // =========================================================================

    /// Store a registration token hash and its metadata.
    pub async fn create_registration_token(
        &self,
        params: &NewRegistrationToken<'_>,
    ) -> Result<RegistrationToken, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO registration_tokens (id, token_hash, cluster_name, created_by, permission_preset, expires_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id)
        .bind(params.token_hash)
        .bind(params.cluster_name)
        .bind(params.created_by)
        .bind(params.permission_preset)
        .bind(params.expires_at)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_registration_token(params.id).await
    }

    /// Get a registration token by ID.
    pub async fn get_registration_token(
        &self,
        id: &str,
    ) -> Result<RegistrationToken, DatabaseError> {
        sqlx::query_as::<_, RegistrationToken>("SELECT * FROM registration_tokens WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Registration token {id}")))
    }

    /// Find a registration token by hash, regardless of state.
    pub async fn get_registration_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RegistrationToken>, DatabaseError> {
        let token = sqlx::query_as::<_, RegistrationToken>(
            "SELECT * FROM registration_tokens WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(self.pool())
        .await?;

        Ok(token)
    }

    /// Atomically flip `used` from 0 to 1 for an unexpired token.
    ///
    /// The condition and the write are one statement, so two concurrent
    /// redemptions of the same token cannot both observe `used = 0`.
    pub async fn claim_registration_token(
        &self,
        token_hash: &str,
        now: i64,
    ) -> Result<ClaimOutcome, DatabaseError> {
        let claimed = sqlx::query_as::<_, RegistrationToken>(
            "UPDATE registration_tokens SET used = 1, used_at = ? WHERE token_hash = ? AND used = 0 AND expires_at > ? RETURNING *",
        )
        .bind(now)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        if let Some(token) = claimed {
            return Ok(ClaimOutcome::Claimed(token));
        }

        Ok(match self.get_registration_token_by_hash(token_hash).await? {
            None => ClaimOutcome::NotFound,
            Some(token) if token.is_used() => ClaimOutcome::AlreadyUsed,
            Some(_) => ClaimOutcome::Expired,
        })
    }

    /// Undo a claim that did not result in a cluster.
    ///
    /// Only applies while no cluster has been recorded against the token.
    pub async fn release_registration_token(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE registration_tokens SET used = 0, used_at = NULL WHERE id = ? AND cluster_id IS NULL",
        )
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the cluster a redeemed token produced.
    pub async fn mark_token_used(&self, id: &str, cluster_id: &str) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE registration_tokens SET used = 1, cluster_id = ?, used_at = COALESCE(used_at, ?) WHERE id = ?",
        )
        .bind(cluster_id)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List registration tokens, newest first.
    pub async fn list_registration_tokens(
        &self,
        include_used: bool,
    ) -> Result<Vec<RegistrationToken>, DatabaseError> {
        let tokens = if include_used {
            sqlx::query_as::<_, RegistrationToken>(
                "SELECT * FROM registration_tokens ORDER BY created_at DESC",
            )
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as::<_, RegistrationToken>(
                "SELECT * FROM registration_tokens WHERE used = 0 ORDER BY created_at DESC",
            )
            .fetch_all(self.pool())
            .await?
        };

        Ok(tokens)
    }

    /// Delete a token that has not been redeemed yet.
    pub async fn delete_unused_registration_token(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM registration_tokens WHERE id = ? AND used = 0")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete unused tokens whose expiry has passed.
    pub async fn delete_expired_registration_tokens(&self, now: i64) -> Result<u64, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM registration_tokens WHERE used = 0 AND expires_at <= ?")
                .bind(now)
                .execute(self.pool())
                .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Cluster queries
    // =========================================================================

    /// Create a cluster row.
    pub async fn create_cluster(&self, params: &NewCluster<'_>) -> Result<Cluster, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO clusters (id, name, connection_type, permission_preset, agent_id, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id)
        .bind(params.name)
        .bind(params.connection_type.as_str())
        .bind(params.permission_preset)
        .bind(params.agent_id)
        .bind(params.created_by)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_cluster(params.id).await
    }

    /// Get a cluster by ID.
    pub async fn get_cluster(&self, id: &str) -> Result<Cluster, DatabaseError> {
        sqlx::query_as::<_, Cluster>("SELECT * FROM clusters WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Cluster {id}")))
    }

    /// List all clusters ordered by name.
    pub async fn list_clusters(&self) -> Result<Vec<Cluster>, DatabaseError> {
        let clusters = sqlx::query_as::<_, Cluster>("SELECT * FROM clusters ORDER BY name, id")
            .fetch_all(self.pool())
            .await?;

        Ok(clusters)
    }

    /// List clusters reached through the given connection type.
    pub async fn list_clusters_by_type(
        &self,
        connection_type: ClusterConnectionType,
    ) -> Result<Vec<Cluster>, DatabaseError> {
        let clusters = sqlx::query_as::<_, Cluster>(
            "SELECT * FROM clusters WHERE connection_type = ? ORDER BY name, id",
        )
        .bind(connection_type.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(clusters)
    }

    /// Update cluster connectivity status. `connected` also refreshes `last_seen`.
    ///
    /// Returns `false` when no such cluster exists.
    pub async fn update_cluster_status(
        &self,
        id: &str,
        status: ClusterStatus,
    ) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = match status {
            ClusterStatus::Connected => {
                sqlx::query(
                    "UPDATE clusters SET status = ?, updated_at = ?, last_seen = ? WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(now)
                .bind(now)
                .bind(id)
                .execute(self.pool())
                .await?
            }
            ClusterStatus::Disconnected => {
                sqlx::query("UPDATE clusters SET status = ?, updated_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(now)
                    .bind(id)
                    .execute(self.pool())
                    .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    /// Store the version and size an agent reported for its cluster.
    pub async fn update_cluster_info(
        &self,
        id: &str,
        k8s_version: &str,
        node_count: u32,
    ) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE clusters SET k8s_version = ?, node_count = ?, updated_at = ? WHERE id = ?",
        )
        .bind(k8s_version)
        .bind(i64::from(node_count))
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove a cluster.
    pub async fn delete_cluster(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM clusters WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
