// [libs/infra/repository/src/sqlstore.rs]
//! `libsql`-backed `RepositoryPort`. Grounded on the teacher's
//! `TursoClient`: supports a local file, an in-process `:memory:` database
//! (kept alive for the process's lifetime via an anchor connection so
//! SQLite does not reclaim it between pool checkouts), or a remote Turso
//! replica authenticated with a bearer token. Every lab-state mutation is
//! a single `UPDATE ... WHERE id = ?1 AND status = ?2`, and the CAS check
//! is the affected-row count, not a separate read.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Builder, Connection, Database, Row};
use octolab_domain_models::cause::{Cause, ErrorClass};
use octolab_domain_models::evidence::EvidenceBundle;
use octolab_domain_models::lab::{Lab, LabStatus, RuntimeKind};
use octolab_domain_models::recipe::Recipe;
use tracing::{info, instrument, warn};

use crate::error::RepositoryError;
use crate::port::{BuildCacheEntry, RepositoryPort, StatusUpdate};

pub struct LibsqlRepository {
    database: Arc<Database>,
    /// Kept alive only for `:memory:` URLs; dropping it would let SQLite
    /// garbage-collect the in-memory schema out from under later
    /// connections.
    _memory_anchor: Option<Connection>,
}

impl LibsqlRepository {
    #[instrument(skip(auth_token))]
    pub async fn connect(url: &str, auth_token: Option<String>) -> Result<Self, RepositoryError> {
        if url.is_empty() {
            return Err(RepositoryError::Database("DATABASE_URL is empty".into()));
        }

        let is_remote = url.starts_with("libsql://") || url.starts_with("https://");
        let is_memory = url.contains(":memory:");

        let database = if is_remote {
            let token = auth_token
                .ok_or_else(|| RepositoryError::Database("remote database requires an auth token".into()))?;
            Builder::new_remote(url.to_string(), token)
                .build()
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?
        } else {
            Builder::new_local(url).build().await.map_err(|e| RepositoryError::Database(e.to_string()))?
        };
        let database = Arc::new(database);

        let mut anchor = None;
        if is_memory {
            let conn = database.connect().map_err(|e| RepositoryError::Database(e.to_string()))?;
            apply_schema(&conn).await?;
            anchor = Some(conn);
            info!("in-memory repository schema applied and anchored");
        } else {
            let conn = database.connect().map_err(|e| RepositoryError::Database(e.to_string()))?;
            apply_schema(&conn).await?;
        }

        Ok(Self { database, _memory_anchor: anchor })
    }

    fn conn(&self) -> Result<Connection, RepositoryError> {
        self.database.connect().map_err(|e| RepositoryError::Database(e.to_string()))
    }
}

async fn apply_schema(conn: &Connection) -> Result<(), RepositoryError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS labs (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            recipe_id TEXT NOT NULL,
            status TEXT NOT NULL,
            runtime_kind TEXT NOT NULL,
            backend_handle TEXT,
            connection_url TEXT,
            expires_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            build_id TEXT,
            cause_class TEXT,
            cause_tag TEXT,
            cause_detail TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_labs_owner ON labs(owner_id, status);
        CREATE INDEX IF NOT EXISTS idx_labs_status ON labs(status);

        CREATE TABLE IF NOT EXISTS recipes (
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS build_cache (
            fingerprint TEXT PRIMARY KEY,
            image_tag TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS evidence_bundles (
            lab_id TEXT PRIMARY KEY,
            generated_at TEXT NOT NULL,
            payload TEXT NOT NULL
        );
        ",
    )
    .await
    .map_err(|e| RepositoryError::Database(e.to_string()))?;
    Ok(())
}

fn status_to_str(status: LabStatus) -> &'static str {
    match status {
        LabStatus::Requested => "requested",
        LabStatus::Provisioning => "provisioning",
        LabStatus::Ready => "ready",
        LabStatus::Degraded => "degraded",
        LabStatus::Ending => "ending",
        LabStatus::Finished => "finished",
        LabStatus::Failed => "failed",
    }
}

fn str_to_status(s: &str) -> Result<LabStatus, RepositoryError> {
    Ok(match s {
        "requested" => LabStatus::Requested,
        "provisioning" => LabStatus::Provisioning,
        "ready" => LabStatus::Ready,
        "degraded" => LabStatus::Degraded,
        "ending" => LabStatus::Ending,
        "finished" => LabStatus::Finished,
        "failed" => LabStatus::Failed,
        other => return Err(RepositoryError::Mapping(format!("unknown lab status {other}"))),
    })
}

fn runtime_kind_to_str(kind: RuntimeKind) -> &'static str {
    match kind {
        RuntimeKind::Compose => "compose",
        RuntimeKind::MicroVm => "microvm",
        RuntimeKind::Noop => "noop",
    }
}

fn str_to_runtime_kind(s: &str) -> Result<RuntimeKind, RepositoryError> {
    Ok(match s {
        "compose" => RuntimeKind::Compose,
        "microvm" => RuntimeKind::MicroVm,
        "noop" => RuntimeKind::Noop,
        other => return Err(RepositoryError::Mapping(format!("unknown runtime kind {other}"))),
    })
}

fn class_to_str(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::PolicyDenied => "policy_denied",
        ErrorClass::Transient => "transient",
        ErrorClass::Fatal => "fatal",
        ErrorClass::TeardownTimeout => "teardown_timeout",
        ErrorClass::Orphaned => "orphaned",
        ErrorClass::StaleState => "stale_state",
        ErrorClass::Expected => "expected",
    }
}

fn str_to_class(s: &str) -> Result<ErrorClass, RepositoryError> {
    Ok(match s {
        "policy_denied" => ErrorClass::PolicyDenied,
        "transient" => ErrorClass::Transient,
        "fatal" => ErrorClass::Fatal,
        "teardown_timeout" => ErrorClass::TeardownTimeout,
        "orphaned" => ErrorClass::Orphaned,
        "stale_state" => ErrorClass::StaleState,
        "expected" => ErrorClass::Expected,
        other => return Err(RepositoryError::Mapping(format!("unknown error class {other}"))),
    })
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Mapping(e.to_string()))
}

fn row_to_lab(row: &Row) -> Result<Lab, RepositoryError> {
    let get_opt_str = |idx: i32| -> Result<Option<String>, RepositoryError> {
        row.get::<Option<String>>(idx).map_err(|e| RepositoryError::Mapping(e.to_string()))
    };

    let cause = match (get_opt_str(11)?, get_opt_str(12)?, get_opt_str(13)?) {
        (Some(class), Some(tag), Some(detail)) => Some(Cause::new(str_to_class(&class)?, tag, detail)),
        _ => None,
    };

    Ok(Lab {
        id: row.get::<String>(0).map_err(|e| RepositoryError::Mapping(e.to_string()))?,
        owner_id: row.get::<String>(1).map_err(|e| RepositoryError::Mapping(e.to_string()))?,
        recipe_id: row.get::<String>(2).map_err(|e| RepositoryError::Mapping(e.to_string()))?,
        status: str_to_status(&row.get::<String>(3).map_err(|e| RepositoryError::Mapping(e.to_string()))?)?,
        runtime_kind: str_to_runtime_kind(
            &row.get::<String>(4).map_err(|e| RepositoryError::Mapping(e.to_string()))?,
        )?,
        backend_handle: get_opt_str(5)?,
        connection_url: get_opt_str(6)?,
        expires_at: get_opt_str(7)?.map(|s| parse_ts(&s)).transpose()?,
        created_at: parse_ts(&row.get::<String>(8).map_err(|e| RepositoryError::Mapping(e.to_string()))?)?,
        updated_at: parse_ts(&row.get::<String>(9).map_err(|e| RepositoryError::Mapping(e.to_string()))?)?,
        build_id: get_opt_str(10)?,
        cause,
    })
}

const LAB_COLUMNS: &str = "id, owner_id, recipe_id, status, runtime_kind, backend_handle, connection_url, \
     expires_at, created_at, updated_at, build_id, cause_class, cause_tag, cause_detail";

#[async_trait]
impl RepositoryPort for LibsqlRepository {
    #[instrument(skip(self, lab))]
    async fn create_lab(&self, lab: Lab) -> Result<(), RepositoryError> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO labs ({LAB_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)"),
            params![
                lab.id,
                lab.owner_id,
                lab.recipe_id,
                status_to_str(lab.status),
                runtime_kind_to_str(lab.runtime_kind),
                lab.backend_handle,
                lab.connection_url,
                lab.expires_at.map(|d| d.to_rfc3339()),
                lab.created_at.to_rfc3339(),
                lab.updated_at.to_rfc3339(),
                lab.build_id,
                lab.cause.as_ref().map(|c| class_to_str(c.class).to_string()),
                lab.cause.as_ref().map(|c| c.tag.clone()),
                lab.cause.as_ref().map(|c| c.detail.clone()),
            ],
        )
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_lab(&self, id: &str) -> Result<Option<Lab>, RepositoryError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {LAB_COLUMNS} FROM labs WHERE id = ?1"), params![id])
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        match rows.next().await.map_err(|e| RepositoryError::Database(e.to_string()))? {
            Some(row) => Ok(Some(row_to_lab(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_active_by_owner(&self, owner_id: &str) -> Result<Vec<Lab>, RepositoryError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {LAB_COLUMNS} FROM labs WHERE owner_id = ?1 AND status NOT IN ('finished','failed')"
                ),
                params![owner_id],
            )
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        let mut labs = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| RepositoryError::Database(e.to_string()))? {
            labs.push(row_to_lab(&row)?);
        }
        Ok(labs)
    }

    async fn list_non_terminal(&self) -> Result<Vec<Lab>, RepositoryError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {LAB_COLUMNS} FROM labs WHERE status NOT IN ('finished','failed')"), params![])
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        let mut labs = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| RepositoryError::Database(e.to_string()))? {
            labs.push(row_to_lab(&row)?);
        }
        Ok(labs)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Lab>, RepositoryError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {LAB_COLUMNS} FROM labs WHERE status IN ('provisioning','ready','degraded') \
                     AND expires_at IS NOT NULL AND expires_at < ?1"
                ),
                params![now.to_rfc3339()],
            )
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        let mut labs = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| RepositoryError::Database(e.to_string()))? {
            labs.push(row_to_lab(&row)?);
        }
        Ok(labs)
    }

    #[instrument(skip(self, update))]
    async fn update_status(
        &self,
        id: &str,
        expected_from: LabStatus,
        to: LabStatus,
        update: StatusUpdate,
    ) -> Result<Lab, RepositoryError> {
        if !expected_from.can_transition_to(to) {
            return Err(RepositoryError::StaleState { id: id.to_string(), expected: expected_from });
        }
        let conn = self.conn()?;

        let affected = conn
            .execute(
                "UPDATE labs SET
                    status = ?3,
                    updated_at = ?4,
                    cause_class = COALESCE(?5, cause_class),
                    cause_tag = COALESCE(?6, cause_tag),
                    cause_detail = COALESCE(?7, cause_detail),
                    connection_url = COALESCE(?8, connection_url),
                    backend_handle = COALESCE(?9, backend_handle),
                    build_id = COALESCE(?10, build_id),
                    expires_at = CASE
                        WHEN ?11 IS NOT NULL AND (expires_at IS NULL OR ?11 > expires_at) THEN ?11
                        ELSE expires_at
                    END
                 WHERE id = ?1 AND status = ?2",
                params![
                    id,
                    status_to_str(expected_from),
                    status_to_str(to),
                    Utc::now().to_rfc3339(),
                    update.cause.as_ref().map(|c| class_to_str(c.class).to_string()),
                    update.cause.as_ref().map(|c| c.tag.clone()),
                    update.cause.as_ref().map(|c| c.detail.clone()),
                    update.connection_url,
                    update.backend_handle,
                    update.build_id,
                    update.expires_at.map(|d| d.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if affected == 0 {
            warn!(lab_id = id, "CAS rejected: status mismatch or row missing");
            return Err(RepositoryError::StaleState { id: id.to_string(), expected: expected_from });
        }

        self.get_lab(id).await?.ok_or_else(|| RepositoryError::LabNotFound(id.to_string()))
    }

    async fn extend_expiry(&self, id: &str, additional_minutes: i64) -> Result<Lab, RepositoryError> {
        let conn = self.conn()?;
        let lab = self.get_lab(id).await?.ok_or_else(|| RepositoryError::LabNotFound(id.to_string()))?;
        let base = lab.expires_at.unwrap_or_else(Utc::now);
        let candidate = base + chrono::Duration::minutes(additional_minutes);

        conn.execute(
            "UPDATE labs SET
                expires_at = CASE WHEN expires_at IS NULL OR ?2 > expires_at THEN ?2 ELSE expires_at END,
                updated_at = ?3
             WHERE id = ?1",
            params![id, candidate.to_rfc3339(), Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        self.get_lab(id).await?.ok_or_else(|| RepositoryError::LabNotFound(id.to_string()))
    }

    async fn get_recipe(&self, id: &str) -> Result<Option<Recipe>, RepositoryError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query("SELECT payload FROM recipes WHERE id = ?1", params![id])
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        match rows.next().await.map_err(|e| RepositoryError::Database(e.to_string()))? {
            Some(row) => {
                let payload: String = row.get(0).map_err(|e| RepositoryError::Mapping(e.to_string()))?;
                serde_json::from_str(&payload).map_err(|e| RepositoryError::Mapping(e.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn put_recipe(&self, recipe: Recipe) -> Result<(), RepositoryError> {
        let conn = self.conn()?;
        let payload = serde_json::to_string(&recipe).map_err(|e| RepositoryError::Mapping(e.to_string()))?;
        conn.execute(
            "INSERT INTO recipes (id, payload) VALUES (?1, ?2) ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
            params![recipe.id, payload],
        )
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_build_cache(&self, fingerprint: &str) -> Result<Option<BuildCacheEntry>, RepositoryError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query("SELECT fingerprint, image_tag FROM build_cache WHERE fingerprint = ?1", params![fingerprint])
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        match rows.next().await.map_err(|e| RepositoryError::Database(e.to_string()))? {
            Some(row) => Ok(Some(BuildCacheEntry {
                fingerprint: row.get(0).map_err(|e| RepositoryError::Mapping(e.to_string()))?,
                image_tag: row.get(1).map_err(|e| RepositoryError::Mapping(e.to_string()))?,
            })),
            None => Ok(None),
        }
    }

    async fn put_build_cache(&self, entry: BuildCacheEntry) -> Result<(), RepositoryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO build_cache (fingerprint, image_tag) VALUES (?1, ?2) \
             ON CONFLICT(fingerprint) DO UPDATE SET image_tag = excluded.image_tag",
            params![entry.fingerprint, entry.image_tag],
        )
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn put_bundle(&self, bundle: EvidenceBundle) -> Result<(), RepositoryError> {
        let conn = self.conn()?;
        let payload = serde_json::to_string(&bundle).map_err(|e| RepositoryError::Mapping(e.to_string()))?;
        conn.execute(
            "INSERT INTO evidence_bundles (lab_id, generated_at, payload) VALUES (?1, ?2, ?3) \
             ON CONFLICT(lab_id) DO UPDATE SET generated_at = excluded.generated_at, payload = excluded.payload",
            params![bundle.lab_id, bundle.generated_at.to_rfc3339(), payload],
        )
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_bundle(&self, lab_id: &str) -> Result<Option<EvidenceBundle>, RepositoryError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query("SELECT payload FROM evidence_bundles WHERE lab_id = ?1", params![lab_id])
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        match rows.next().await.map_err(|e| RepositoryError::Database(e.to_string()))? {
            Some(row) => {
                let payload: String = row.get(0).map_err(|e| RepositoryError::Mapping(e.to_string()))?;
                serde_json::from_str(&payload).map_err(|e| RepositoryError::Mapping(e.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn delete_bundles_older_than(&self, older_than: DateTime<Utc>, max: usize) -> Result<usize, RepositoryError> {
        let conn = self.conn()?;
        let affected = conn
            .execute(
                "DELETE FROM evidence_bundles WHERE lab_id IN (
                    SELECT lab_id FROM evidence_bundles WHERE generated_at < ?1 LIMIT ?2
                 )",
                params![older_than.to_rfc3339(), max as i64],
            )
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(affected as usize)
    }
}
