//! Static registry of persisted entities.
//!
//! Each entity is described once, here. The store derives its schema from
//! these descriptors and tooling can enumerate them with [`ENTITIES`].

/// One column of an entity table, besides the implicit `id` and
/// `last_modified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    /// SQL type and constraints, e.g. `TEXT NOT NULL`.
    pub definition: &'static str,
}

const fn col(name: &'static str, definition: &'static str) -> Column {
    Column { name, definition }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Entity name as used in code and logs.
    pub name: &'static str,
    pub table: &'static str,
    pub columns: &'static [Column],
    /// Extra `CREATE INDEX` statements.
    pub indexes: &'static [&'static str],
}

impl EntityDescriptor {
    /// `CREATE TABLE IF NOT EXISTS` statement plus indexes.
    pub fn create_sql(&self) -> String {
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    last_modified TEXT NOT NULL",
            self.table
        );
        for column in self.columns {
            sql.push_str(&format!(",\n    {} {}", column.name, column.definition));
        }
        sql.push_str("\n);\n");
        for index in self.indexes {
            sql.push_str(index);
            sql.push_str(";\n");
        }
        sql
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }
}

/// Columns shared by every sub-record table.
const OWNER: Column = col(
    "service_id",
    "INTEGER NOT NULL REFERENCES service(id) ON DELETE CASCADE",
);
const POSITION: Column = col("position", "INTEGER NOT NULL");

pub const SERVICE: EntityDescriptor = EntityDescriptor {
    name: "service",
    table: "service",
    columns: &[
        col("name", "TEXT NOT NULL"),
        col("description", "TEXT"),
        col("logo", "TEXT"),
        col("documentation_url", "TEXT"),
        col("service_type", "TEXT NOT NULL"),
        col("is_daemon", "INTEGER NOT NULL DEFAULT 0"),
        col("is_disabled", "INTEGER NOT NULL DEFAULT 0"),
        col("is_running", "INTEGER NOT NULL DEFAULT 0"),
        col("container_reference", "TEXT"),
        col("image_name", "TEXT NOT NULL"),
        col("image_tag", "TEXT NOT NULL DEFAULT 'latest'"),
    ],
    indexes: &[
        "CREATE INDEX IF NOT EXISTS idx_service_container ON service(container_reference)",
        "CREATE INDEX IF NOT EXISTS idx_service_image ON service(image_name, image_tag)",
    ],
};

pub const DOCKER_PORT: EntityDescriptor = EntityDescriptor {
    name: "docker_port",
    table: "docker_port",
    columns: &[
        OWNER,
        POSITION,
        col("container_port", "INTEGER NOT NULL"),
        col("host_port", "INTEGER NOT NULL"),
    ],
    indexes: &["CREATE INDEX IF NOT EXISTS idx_docker_port_service ON docker_port(service_id)"],
};

pub const DOCKER_VOLUME: EntityDescriptor = EntityDescriptor {
    name: "docker_volume",
    table: "docker_volume",
    columns: &[
        OWNER,
        POSITION,
        col("host_path", "TEXT NOT NULL"),
        col("container_path", "TEXT NOT NULL"),
    ],
    indexes: &[
        "CREATE INDEX IF NOT EXISTS idx_docker_volume_service ON docker_volume(service_id)",
    ],
};

pub const DOCKER_DEVICE: EntityDescriptor = EntityDescriptor {
    name: "docker_device",
    table: "docker_device",
    columns: &[
        OWNER,
        POSITION,
        col("host_path", "TEXT NOT NULL"),
        col("container_path", "TEXT NOT NULL"),
        col("permissions", "TEXT NOT NULL DEFAULT 'r'"),
    ],
    indexes: &[
        "CREATE INDEX IF NOT EXISTS idx_docker_device_service ON docker_device(service_id)",
    ],
};

pub const DOCKER_LABEL: EntityDescriptor = EntityDescriptor {
    name: "docker_label",
    table: "docker_label",
    columns: &[
        OWNER,
        POSITION,
        col("key", "TEXT NOT NULL"),
        col("value", "TEXT NOT NULL"),
    ],
    indexes: &["CREATE INDEX IF NOT EXISTS idx_docker_label_service ON docker_label(service_id)"],
};

pub const DOCKER_HEALTHCHECK: EntityDescriptor = EntityDescriptor {
    name: "docker_healthcheck",
    table: "docker_healthcheck",
    columns: &[
        col(
            "service_id",
            "INTEGER NOT NULL UNIQUE REFERENCES service(id) ON DELETE CASCADE",
        ),
        col("test", "TEXT NOT NULL"),
        col("interval", "INTEGER NOT NULL"),
        col("timeout", "INTEGER NOT NULL"),
        col("start_period", "INTEGER NOT NULL"),
        col("retries", "INTEGER NOT NULL"),
    ],
    indexes: &[],
};

pub const ENVIRONMENT_VAR: EntityDescriptor = EntityDescriptor {
    name: "environment_var",
    table: "environment_var",
    columns: &[
        OWNER,
        POSITION,
        col("key", "TEXT NOT NULL"),
        col("value", "TEXT NOT NULL"),
    ],
    indexes: &[
        "CREATE INDEX IF NOT EXISTS idx_environment_var_service ON environment_var(service_id)",
    ],
};

/// Every persisted entity, parents before children.
pub const ENTITIES: &[EntityDescriptor] = &[
    SERVICE,
    DOCKER_PORT,
    DOCKER_VOLUME,
    DOCKER_DEVICE,
    DOCKER_LABEL,
    DOCKER_HEALTHCHECK,
    ENVIRONMENT_VAR,
];

pub fn lookup(name: &str) -> Option<&'static EntityDescriptor> {
    ENTITIES.iter().find(|e| e.name == name)
}

/// Full schema for every registered entity.
pub fn schema_sql() -> String {
    ENTITIES.iter().map(EntityDescriptor::create_sql).collect()
}
