use super::ServiceFilter;
use crate::error::{Error, Result};
use crate::model::registry::{self, EntityDescriptor};
use crate::model::{
    DeviceMapping, EnvVar, Healthcheck, Label, Persisted, PortMapping, Record, RuntimeState,
    Service, ServiceDefinition, ServiceSpec, VolumeMapping,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed service catalogue.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct SqliteServiceStore {
    db_path: PathBuf,
    conn: Connection,
}

impl SqliteServiceStore {
    /// Open (or create) the database at `db_path`.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path).await?;

        // WAL for crash recovery
        conn.call(|conn: &mut rusqlite::Connection| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        })
        .await?;

        Ok(Self { db_path, conn })
    }

    /// In-memory store, for tests and dry runs.
    pub async fn new_ephemeral() -> Result<Self> {
        let conn = Connection::open(":memory:").await?;

        conn.call(|conn: &mut rusqlite::Connection| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        })
        .await?;

        Ok(Self {
            db_path: PathBuf::from(":memory:"),
            conn,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Execute a function within a transaction and commit.
    #[tracing::instrument(skip(self, f), fields(operation = "db_transaction"))]
    async fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn: &mut rusqlite::Connection| {
                let tx = conn.transaction()?;
                let result = f(&tx)?;
                tx.commit()?;
                Ok(result)
            })
            .await
            .map_err(Error::from)
    }

    /// Create the schema if missing. Safe to call on every start.
    pub async fn initialize(&self) -> Result<()> {
        let schema_exists: bool = self
            .conn
            .call(
                |conn: &mut rusqlite::Connection| -> tokio_rusqlite::Result<bool> {
                    Ok(conn.query_row(
                        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
                        [],
                        |row| row.get(0),
                    )?)
                },
            )
            .await?;

        if !schema_exists {
            debug!("Creating SQLite schema");
            return self.create_schema().await;
        }

        let version: i32 = self
            .conn
            .call(
                |conn: &mut rusqlite::Connection| -> tokio_rusqlite::Result<i32> {
                    Ok(conn
                        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                            row.get::<_, Option<i32>>(0)
                        })?
                        .unwrap_or(SCHEMA_VERSION))
                },
            )
            .await?;

        if version > SCHEMA_VERSION {
            warn!(
                "Database schema version {} is newer than this build supports ({})",
                version, SCHEMA_VERSION
            );
        } else {
            debug!("Database schema is up to date (version {})", version);
        }
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        let schema = registry::schema_sql();
        self.conn
            .call(move |conn: &mut rusqlite::Connection| -> tokio_rusqlite::Result<()> {
                conn.execute_batch(
                    "CREATE TABLE schema_version (
                        version INTEGER PRIMARY KEY,
                        applied_at TEXT NOT NULL
                    );",
                )?;
                conn.execute_batch(&schema)?;
                conn.execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
                    params![SCHEMA_VERSION],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Persist a new service and its sub-records.
    pub async fn insert(&self, spec: ServiceSpec) -> Result<Service> {
        let name = spec.name.clone();
        let now = Utc::now().to_rfc3339();

        let id = self
            .with_transaction(move |tx| {
                tx.execute(
                    "INSERT INTO service (last_modified, name, description, logo, documentation_url,
                        service_type, is_daemon, is_disabled, is_running, container_reference,
                        image_name, image_tag)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9, ?10)",
                    params![
                        now,
                        spec.name,
                        spec.description,
                        spec.logo,
                        spec.documentation_url,
                        spec.service_type.as_str(),
                        spec.is_daemon,
                        spec.is_disabled,
                        spec.image_name,
                        spec.image_tag,
                    ],
                )?;
                let id = tx.last_insert_rowid();

                for (pos, port) in spec.ports.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO docker_port (last_modified, service_id, position, container_port, host_port)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![now, id, pos as i64, port.container_port, port.host_port],
                    )?;
                }
                for (pos, volume) in spec.volumes.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO docker_volume (last_modified, service_id, position, host_path, container_path)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![now, id, pos as i64, volume.host_path, volume.container_path],
                    )?;
                }
                for (pos, device) in spec.devices.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO docker_device (last_modified, service_id, position, host_path, container_path, permissions)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            now,
                            id,
                            pos as i64,
                            device.host_path,
                            device.container_path,
                            device.permissions
                        ],
                    )?;
                }
                for (pos, label) in spec.labels.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO docker_label (last_modified, service_id, position, key, value)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![now, id, pos as i64, label.key, label.value],
                    )?;
                }
                if let Some(hc) = &spec.healthcheck {
                    tx.execute(
                        "INSERT INTO docker_healthcheck (last_modified, service_id, test, interval, timeout, start_period, retries)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            now,
                            id,
                            hc.test,
                            hc.interval as i64,
                            hc.timeout as i64,
                            hc.start_period as i64,
                            hc.retries
                        ],
                    )?;
                }
                for (pos, var) in spec.env.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO environment_var (last_modified, service_id, position, key, value)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![now, id, pos as i64, var.key, var.value],
                    )?;
                }
                Ok(id)
            })
            .await?;

        info!(service_id = id, service = %name, "Inserted service");
        self.get(id)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Service>> {
        let mut services = self
            .query_services(format!("{} WHERE id = ?1", service_select()), vec![id.into()])
            .await?;
        Ok(services.pop())
    }

    /// Services matching `filter`, in id order.
    pub async fn list(&self, filter: ServiceFilter) -> Result<Vec<Service>> {
        let mut sql = service_select();
        let mut clauses = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(disabled) = filter.disabled {
            values.push((disabled as i64).into());
            clauses.push(format!("is_disabled = ?{}", values.len()));
        }
        if let Some(daemon) = filter.daemon {
            values.push((daemon as i64).into());
            clauses.push(format!("is_daemon = ?{}", values.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id");
        self.query_services(sql, values).await
    }

    /// The service currently holding `reference`, if any.
    pub async fn find_by_container_reference(&self, reference: &str) -> Result<Option<Service>> {
        let mut services = self
            .query_services(
                format!(
                    "{} WHERE container_reference = ?1 ORDER BY id LIMIT 1",
                    service_select()
                ),
                vec![reference.to_string().into()],
            )
            .await?;
        Ok(services.pop())
    }

    /// Services built from exactly `image_name:image_tag`, in id order.
    pub async fn find_by_image(&self, image_name: &str, image_tag: &str) -> Result<Vec<Service>> {
        self.query_services(
            format!(
                "{} WHERE image_name = ?1 AND image_tag = ?2 ORDER BY id",
                service_select()
            ),
            vec![image_name.to_string().into(), image_tag.to_string().into()],
        )
        .await
    }

    /// Write runtime state for one service in a single statement.
    ///
    /// Returns the new `last_modified`.
    #[tracing::instrument(skip(self, state), fields(running = state.is_running()))]
    pub async fn update_runtime_state(
        &self,
        service_id: i64,
        state: &RuntimeState,
    ) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let stamp = now.to_rfc3339();
        let is_running = state.is_running();
        let reference = state.container_reference().map(str::to_string);

        let updated = self
            .conn
            .call(move |conn: &mut rusqlite::Connection| {
                Ok(conn.execute(
                    "UPDATE service SET is_running = ?1, container_reference = ?2, last_modified = ?3
                     WHERE id = ?4",
                    params![is_running, reference, stamp, service_id],
                )?)
            })
            .await?;

        if updated == 0 {
            return Err(Error::ServiceNotFound(service_id.to_string()));
        }
        Ok(now)
    }

    /// Persist `state` and apply it to the in-memory `service`.
    pub async fn record_runtime_state(&self, service: &mut Service, state: RuntimeState) -> Result<()> {
        let at = self.update_runtime_state(service.id(), &state).await?;
        service.apply_runtime_state(state, at);
        Ok(())
    }

    /// Delete every service and its sub-records.
    pub async fn clear(&self) -> Result<()> {
        let removed = self
            .with_transaction(|tx| tx.execute("DELETE FROM service", []))
            .await?;
        info!("Cleared {} services", removed);
        Ok(())
    }

    async fn query_services(
        &self,
        sql: String,
        values: Vec<rusqlite::types::Value>,
    ) -> Result<Vec<Service>> {
        self.conn
            .call(move |conn: &mut rusqlite::Connection| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(values.iter()), service_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut services = Vec::with_capacity(rows.len());
                for (record, mut definition, runtime) in rows {
                    load_children(conn, record.id, &mut definition)?;
                    services.push(Service::new(record, definition, runtime));
                }
                Ok(services)
            })
            .await
            .map_err(Error::from)
    }
}

fn service_select() -> String {
    let columns: Vec<&str> = ["id", "last_modified"]
        .into_iter()
        .chain(registry::SERVICE.column_names())
        .collect();
    format!("SELECT {} FROM {}", columns.join(", "), registry::SERVICE.table)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now())
}

fn record_of(row: &Row<'_>) -> rusqlite::Result<Record> {
    let last_modified: String = row.get("last_modified")?;
    Ok(Record::new(row.get("id")?, parse_timestamp(&last_modified)))
}

fn service_row(row: &Row<'_>) -> rusqlite::Result<(Record, ServiceDefinition, RuntimeState)> {
    let record = record_of(row)?;
    let service_type: String = row.get("service_type")?;
    let definition = ServiceDefinition {
        name: row.get("name")?,
        description: row.get("description")?,
        logo: row.get("logo")?,
        documentation_url: row.get("documentation_url")?,
        service_type: service_type.parse().unwrap_or_default(),
        is_daemon: row.get("is_daemon")?,
        is_disabled: row.get("is_disabled")?,
        image_name: row.get("image_name")?,
        image_tag: row.get("image_tag")?,
        ports: Vec::new(),
        volumes: Vec::new(),
        devices: Vec::new(),
        labels: Vec::new(),
        healthcheck: None,
        env: Vec::new(),
    };
    let runtime = RuntimeState::from_columns(
        row.get("is_running")?,
        row.get("container_reference")?,
    );
    Ok((record, definition, runtime))
}

fn query_children<T>(
    conn: &rusqlite::Connection,
    entity: &EntityDescriptor,
    service_id: i64,
    map: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<Persisted<T>>> {
    let order = if entity.column_names().any(|c| c == "position") {
        "position, id"
    } else {
        "id"
    };
    let sql = format!(
        "SELECT * FROM {} WHERE service_id = ?1 ORDER BY {}",
        entity.table, order
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![service_id], |row| {
        Ok(Persisted::new(record_of(row)?, map(row)?))
    })?;
    rows.collect()
}

fn load_children(
    conn: &rusqlite::Connection,
    service_id: i64,
    definition: &mut ServiceDefinition,
) -> rusqlite::Result<()> {
    definition.ports = query_children(conn, &registry::DOCKER_PORT, service_id, |row| {
        Ok(PortMapping {
            container_port: row.get("container_port")?,
            host_port: row.get("host_port")?,
        })
    })?;
    definition.volumes = query_children(conn, &registry::DOCKER_VOLUME, service_id, |row| {
        Ok(VolumeMapping {
            host_path: row.get("host_path")?,
            container_path: row.get("container_path")?,
        })
    })?;
    definition.devices = query_children(conn, &registry::DOCKER_DEVICE, service_id, |row| {
        Ok(DeviceMapping {
            host_path: row.get("host_path")?,
            container_path: row.get("container_path")?,
            permissions: row.get("permissions")?,
        })
    })?;
    definition.labels = query_children(conn, &registry::DOCKER_LABEL, service_id, |row| {
        Ok(Label {
            key: row.get("key")?,
            value: row.get("value")?,
        })
    })?;
    definition.healthcheck =
        query_children(conn, &registry::DOCKER_HEALTHCHECK, service_id, |row| {
            Ok(Healthcheck {
                test: row.get("test")?,
                interval: row.get::<_, i64>("interval")?.max(0) as u64,
                timeout: row.get::<_, i64>("timeout")?.max(0) as u64,
                start_period: row.get::<_, i64>("start_period")?.max(0) as u64,
                retries: row.get("retries")?,
            })
        })?
        .into_iter()
        .next();
    definition.env = query_children(conn, &registry::ENVIRONMENT_VAR, service_id, |row| {
        Ok(EnvVar {
            key: row.get("key")?,
            value: row.get("value")?,
        })
    })?;
    Ok(())
}

impl SqliteServiceStore {
    pub async fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .call(|conn: &mut rusqlite::Connection| {
                Ok(conn.query_row("SELECT COUNT(*) FROM service", [], |row| row.get(0))?)
            })
            .await?;
        Ok(count as usize)
    }

    /// Look up a service by exact name.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Service>> {
        let name = name.to_string();
        let id: Option<i64> = self
            .conn
            .call(move |conn: &mut rusqlite::Connection| {
                Ok(conn
                    .query_row(
                        "SELECT id FROM service WHERE name = ?1 ORDER BY id LIMIT 1",
                        params![name],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        match id {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceType;
    use tempfile::TempDir;

    async fn create_test_store() -> SqliteServiceStore {
        let store = SqliteServiceStore::new_ephemeral().await.unwrap();
        store.initialize().await.unwrap();
        store
    }

    fn octoprint() -> ServiceSpec {
        let mut spec = ServiceSpec::new("OctoPrint", "octoprint/octoprint");
        spec.is_daemon = true;
        spec.ports = vec![
            PortMapping {
                container_port: 5000,
                host_port: 5557,
            },
            PortMapping {
                container_port: 80,
                host_port: 8080,
            },
        ];
        spec.devices = vec![DeviceMapping {
            host_path: "/dev/ttyACM0".into(),
            container_path: "/dev/ttyACM0".into(),
            permissions: "rwm".into(),
        }];
        spec.healthcheck = Some(Healthcheck {
            test: "curl -f http://localhost:5000".into(),
            interval: 30,
            timeout: 10,
            start_period: 5,
            retries: 3,
        });
        spec.env = vec![EnvVar {
            key: "OCTO_DOMAIN".into(),
            value: "octo.local".into(),
        }];
        spec
    }

    #[tokio::test]
    async fn insert_round_trips_sub_records_in_order() {
        let store = create_test_store().await;
        let service = store.insert(octoprint()).await.unwrap();

        assert_eq!(service.name, "OctoPrint");
        assert_eq!(service.service_type, ServiceType::GenericContainer);
        assert!(!service.is_running());
        assert_eq!(
            service.ports.iter().map(|p| p.host_port).collect::<Vec<_>>(),
            vec![5557, 8080]
        );
        assert_eq!(service.devices[0].permissions, "rwm");
        let hc = service.healthcheck.as_ref().unwrap();
        assert_eq!((hc.interval, hc.timeout, hc.start_period), (30, 10, 5));
        assert_eq!(service.access_url(), Some("http://octo.local".to_string()));
    }

    #[tokio::test]
    async fn runtime_state_written_as_unit() {
        let store = create_test_store().await;
        let mut service = store.insert(octoprint()).await.unwrap();

        store
            .record_runtime_state(&mut service, RuntimeState::running("abc123"))
            .await
            .unwrap();
        let reloaded = store.get(service.id()).await.unwrap().unwrap();
        assert_eq!(reloaded.container_reference(), Some("abc123"));
        assert!(reloaded.is_running());
        assert_eq!(
            store
                .find_by_container_reference("abc123")
                .await
                .unwrap()
                .map(|s| s.id()),
            Some(service.id())
        );

        store
            .record_runtime_state(&mut service, RuntimeState::Stopped)
            .await
            .unwrap();
        let reloaded = store.get(service.id()).await.unwrap().unwrap();
        assert!(!reloaded.is_running());
        assert_eq!(reloaded.container_reference(), None);
        assert!(store
            .find_by_container_reference("abc123")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_unknown_service_fails() {
        let store = create_test_store().await;
        let err = store
            .update_runtime_state(42, &RuntimeState::Stopped)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_daemons_and_disabled() {
        let store = create_test_store().await;
        store.insert(octoprint()).await.unwrap();
        let mut disabled = octoprint();
        disabled.name = "Disabled daemon".into();
        disabled.is_disabled = true;
        store.insert(disabled).await.unwrap();
        store
            .insert(ServiceSpec::new("Docs", "nginx"))
            .await
            .unwrap();

        assert_eq!(store.list(ServiceFilter::all()).await.unwrap().len(), 3);
        let daemons = store.list(ServiceFilter::daemons()).await.unwrap();
        assert_eq!(daemons.len(), 1);
        assert_eq!(daemons[0].name, "OctoPrint");
        assert_eq!(store.list(ServiceFilter::enabled()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn find_by_image_is_exact() {
        let store = create_test_store().await;
        store.insert(ServiceSpec::new("a", "foo")).await.unwrap();
        let mut pinned = ServiceSpec::new("b", "foo");
        pinned.image_tag = "1.0".into();
        store.insert(pinned).await.unwrap();

        let latest = store.find_by_image("foo", "latest").await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].name, "a");
        assert!(store.find_by_image("foobar", "latest").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_cascades_to_sub_records() {
        let store = create_test_store().await;
        store.insert(octoprint()).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        let orphans: i64 = store
            .conn
            .call(|conn: &mut rusqlite::Connection| {
                Ok(conn.query_row("SELECT COUNT(*) FROM docker_port", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn on_disk_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("mission-control.db");
        {
            let store = SqliteServiceStore::new(&path).await.unwrap();
            store.initialize().await.unwrap();
            store.insert(octoprint()).await.unwrap();
        }
        let store = SqliteServiceStore::new(&path).await.unwrap();
        store.initialize().await.unwrap();
        let found = store.find_by_name("OctoPrint").await.unwrap().unwrap();
        assert_eq!(found.ports.len(), 2);
    }
}
