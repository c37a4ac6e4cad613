//! SQL family: MySQL, MariaDB, MSSQL, Postgres and CockroachDB.
//!
//! Seeding runs every script file in listed order, then every literal query.
//! The first failing statement aborts the seed.

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use provisioner_shared_types::{
    Address, PortSpec, Preset, PresetKind, ProvisionError, DEFAULT_PORT,
};
use tiberius::{AuthMethod, Client as MssqlClient};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use super::{expect_preset, CONNECT_TIMEOUT};
use crate::error::{ProbeFailure, SeedError};
use crate::handler::{ImageSpec, PresetHandler};
use crate::seed_files::{scripts_then_queries, split_batches};

fn host_port(address: &Address) -> Result<(String, u16), ProbeFailure> {
    address
        .port(DEFAULT_PORT)
        .map(|port| (address.host.clone(), port))
        .ok_or_else(|| ProbeFailure::new("default port is not published"))
}

/// Database and user names are spliced into `create` statements.
fn validate_identifier(kind: PresetKind, what: &str, name: Option<&str>) -> Result<(), ProvisionError> {
    match name {
        Some(name)
            if name.is_empty()
                || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            Err(ProvisionError::validation(format!(
                "{kind}: invalid {what} name {name:?}"
            )))
        }
        _ => Ok(()),
    }
}

// ==================== Postgres & CockroachDB ====================

const POSTGRES_USER: &str = "postgres";
const POSTGRES_PASSWORD: &str = "password";
const POSTGRES_DEFAULT_DB: &str = "postgres";

const COCKROACH_USER: &str = "root";
const COCKROACH_SYSTEM_DB: &str = "defaultdb";
const COCKROACH_DEFAULT_DB: &str = "mydb";

async fn connect_postgres(
    host: &str,
    port: u16,
    user: &str,
    password: Option<&str>,
    db: &str,
) -> Result<tokio_postgres::Client, tokio_postgres::Error> {
    let mut config = tokio_postgres::Config::new();
    config
        .host(host)
        .port(port)
        .user(user)
        .dbname(db)
        .connect_timeout(CONNECT_TIMEOUT);
    if let Some(password) = password {
        config.password(password);
    }

    let (client, connection) = config.connect(tokio_postgres::NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "Postgres connection closed");
        }
    });

    Ok(client)
}

async fn select_one(client: &tokio_postgres::Client) -> Result<(), ProbeFailure> {
    client
        .simple_query("select 1")
        .await
        .map(|_| ())
        .map_err(ProbeFailure::context("select 1"))
}

pub struct PostgresHandler;

#[async_trait]
impl PresetHandler for PostgresHandler {
    fn kind(&self) -> PresetKind {
        PresetKind::Postgres
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        expect_preset!(preset, Postgres, self.kind())?;
        Ok(ImageSpec::new("docker.io/library/postgres", "12")
            .with_port(DEFAULT_PORT, PortSpec::tcp(5432))
            .with_env("POSTGRES_PASSWORD", POSTGRES_PASSWORD))
    }

    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let p = expect_preset!(preset, Postgres, self.kind())?;
        validate_identifier(self.kind(), "database", p.db.as_deref())?;
        validate_identifier(self.kind(), "user", p.user.as_deref())?;
        if p.user.is_some() != p.password.is_some() {
            return Err(ProvisionError::validation(
                "postgres: user and password must be set together",
            ));
        }
        Ok(())
    }

    async fn health_check(&self, _preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let (host, port) = host_port(address)?;
        let client = connect_postgres(&host, port, POSTGRES_USER, Some(POSTGRES_PASSWORD), POSTGRES_DEFAULT_DB)
            .await
            .map_err(ProbeFailure::context("postgres connect"))?;
        select_one(&client).await
    }

    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let p = expect_preset!(preset, Postgres, self.kind())?;
        let kind = self.kind();
        let (host, port) = host_port(address).map_err(SeedError::connection(kind))?;
        let db = p.db.as_deref().unwrap_or(POSTGRES_DEFAULT_DB);

        let admin = connect_postgres(&host, port, POSTGRES_USER, Some(POSTGRES_PASSWORD), POSTGRES_DEFAULT_DB)
            .await
            .map_err(SeedError::connection(kind))?;

        if db != POSTGRES_DEFAULT_DB {
            info!(db, "Creating postgres database");
            admin
                .batch_execute(&format!("create database {db}"))
                .await
                .map_err(SeedError::rejected(kind))?;
        }

        if let (Some(user), Some(password)) = (&p.user, &p.password) {
            admin
                .batch_execute(&format!(
                    "create user {user} with superuser password '{}'",
                    password.replace('\'', "''")
                ))
                .await
                .map_err(SeedError::rejected(kind))?;
        }

        let scripts = scripts_then_queries(&p.queries_files, &p.queries)?;
        if scripts.is_empty() {
            return Ok(());
        }

        let client = connect_postgres(&host, port, POSTGRES_USER, Some(POSTGRES_PASSWORD), db)
            .await
            .map_err(SeedError::connection(kind))?;
        for script in &scripts {
            client
                .batch_execute(script)
                .await
                .map_err(SeedError::rejected(kind))?;
        }

        info!(db, scripts = scripts.len(), "Postgres seeded");
        Ok(())
    }
}

pub struct CockroachdbHandler;

#[async_trait]
impl PresetHandler for CockroachdbHandler {
    fn kind(&self) -> PresetKind {
        PresetKind::Cockroachdb
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        expect_preset!(preset, Cockroachdb, self.kind())?;
        Ok(ImageSpec::new("docker.io/cockroachdb/cockroach", "v20.1.10")
            .with_port(DEFAULT_PORT, PortSpec::tcp(26257))
            .with_cmd(["start-single-node", "--insecure"]))
    }

    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let p = expect_preset!(preset, Cockroachdb, self.kind())?;
        validate_identifier(self.kind(), "database", p.db.as_deref())
    }

    async fn health_check(&self, _preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let (host, port) = host_port(address)?;
        let client = connect_postgres(&host, port, COCKROACH_USER, None, COCKROACH_SYSTEM_DB)
            .await
            .map_err(ProbeFailure::context("cockroachdb connect"))?;
        select_one(&client).await
    }

    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let p = expect_preset!(preset, Cockroachdb, self.kind())?;
        let kind = self.kind();
        let (host, port) = host_port(address).map_err(SeedError::connection(kind))?;
        let db = p.db.as_deref().unwrap_or(COCKROACH_DEFAULT_DB);

        let admin = connect_postgres(&host, port, COCKROACH_USER, None, COCKROACH_SYSTEM_DB)
            .await
            .map_err(SeedError::connection(kind))?;
        admin
            .batch_execute(&format!("create database if not exists {db}"))
            .await
            .map_err(SeedError::rejected(kind))?;

        let client = connect_postgres(&host, port, COCKROACH_USER, None, db)
            .await
            .map_err(SeedError::connection(kind))?;
        for script in scripts_then_queries(&p.queries_files, &p.queries)? {
            client
                .batch_execute(&script)
                .await
                .map_err(SeedError::rejected(kind))?;
        }

        Ok(())
    }
}

// ==================== MySQL & MariaDB ====================

const MYSQL_USER: &str = "gnomock";
const MYSQL_PASSWORD: &str = "gnomick";
const MYSQL_DB: &str = "mydb";

/// Serves both MySQL and MariaDB; they differ only in image.
pub struct MysqlHandler {
    kind: PresetKind,
    image: &'static str,
    default_tag: &'static str,
}

impl MysqlHandler {
    pub fn mysql() -> Self {
        Self {
            kind: PresetKind::Mysql,
            image: "docker.io/library/mysql",
            default_tag: "8.0.22",
        }
    }

    pub fn mariadb() -> Self {
        Self {
            kind: PresetKind::Mariadb,
            image: "docker.io/library/mariadb",
            default_tag: "10.5.8",
        }
    }

    async fn connect(
        &self,
        address: &Address,
        preset: &provisioner_shared_types::MysqlPreset,
    ) -> Result<mysql_async::Conn, String> {
        let (host, port) = host_port(address).map_err(|e| e.to_string())?;
        let opts = mysql_async::OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(port)
            .user(Some(preset.user.as_deref().unwrap_or(MYSQL_USER)))
            .pass(Some(preset.password.as_deref().unwrap_or(MYSQL_PASSWORD)))
            .db_name(Some(preset.db.as_deref().unwrap_or(MYSQL_DB)));

        tokio::time::timeout(CONNECT_TIMEOUT, mysql_async::Conn::new(opts))
            .await
            .map_err(|_| format!("{} connect timed out", self.kind))?
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl PresetHandler for MysqlHandler {
    fn kind(&self) -> PresetKind {
        self.kind
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        let p = expect_preset!(preset, Mysql | Mariadb, self.kind)?;
        Ok(ImageSpec::new(self.image, self.default_tag)
            .with_port(DEFAULT_PORT, PortSpec::tcp(3306))
            .with_env("MYSQL_USER", p.user.as_deref().unwrap_or(MYSQL_USER))
            .with_env("MYSQL_PASSWORD", p.password.as_deref().unwrap_or(MYSQL_PASSWORD))
            .with_env("MYSQL_DATABASE", p.db.as_deref().unwrap_or(MYSQL_DB))
            .with_env("MYSQL_RANDOM_ROOT_PASSWORD", "yes"))
    }

    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let p = expect_preset!(preset, Mysql | Mariadb, self.kind)?;
        validate_identifier(self.kind, "database", p.db.as_deref())
    }

    async fn health_check(&self, preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let p = expect_preset!(preset, Mysql | Mariadb, self.kind)?;
        let mut conn = self.connect(address, p).await.map_err(ProbeFailure::new)?;
        conn.ping().await.map_err(ProbeFailure::context("ping"))?;
        conn.disconnect().await.map_err(ProbeFailure::context("disconnect"))
    }

    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let p = expect_preset!(preset, Mysql | Mariadb, self.kind)?;
        let scripts = scripts_then_queries(&p.queries_files, &p.queries)?;
        if scripts.is_empty() {
            return Ok(());
        }

        let mut conn = self
            .connect(address, p)
            .await
            .map_err(SeedError::connection(self.kind))?;
        for script in &scripts {
            conn.query_drop(script.as_str())
                .await
                .map_err(SeedError::rejected(self.kind))?;
        }

        conn.disconnect()
            .await
            .map_err(SeedError::connection(self.kind))
    }
}

// ==================== MSSQL ====================

const MSSQL_PASSWORD: &str = "Gn0m!ck~";
const MSSQL_MASTER_DB: &str = "master";
const MSSQL_DEFAULT_DB: &str = "mydb";

type MssqlConnection = MssqlClient<Compat<TcpStream>>;

async fn connect_mssql(
    host: &str,
    port: u16,
    password: &str,
    db: &str,
) -> Result<MssqlConnection, tiberius::error::Error> {
    let mut config = tiberius::Config::new();
    config.host(host);
    config.port(port);
    config.authentication(AuthMethod::sql_server("sa", password));
    config.trust_cert();
    config.database(db);

    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;

    MssqlClient::connect(config, tcp.compat_write()).await
}

pub struct MssqlHandler;

impl MssqlHandler {
    fn password(p: &provisioner_shared_types::MssqlPreset) -> &str {
        p.password.as_deref().unwrap_or(MSSQL_PASSWORD)
    }
}

#[async_trait]
impl PresetHandler for MssqlHandler {
    fn kind(&self) -> PresetKind {
        PresetKind::Mssql
    }

    fn image_spec(&self, preset: &Preset) -> Result<ImageSpec, ProvisionError> {
        let p = expect_preset!(preset, Mssql, self.kind())?;
        Ok(ImageSpec::new("mcr.microsoft.com/mssql/server", "2019-latest")
            .with_port(DEFAULT_PORT, PortSpec::tcp(1433))
            .with_env("ACCEPT_EULA", "Y")
            .with_env("SA_PASSWORD", Self::password(p)))
    }

    fn validate(&self, preset: &Preset) -> Result<(), ProvisionError> {
        let p = expect_preset!(preset, Mssql, self.kind())?;
        if !p.license {
            return Err(ProvisionError::validation(
                "mssql: the SQL Server license must be accepted (license: true)",
            ));
        }
        validate_identifier(self.kind(), "database", p.db.as_deref())
    }

    async fn health_check(&self, preset: &Preset, address: &Address) -> Result<(), ProbeFailure> {
        let p = expect_preset!(preset, Mssql, self.kind())?;
        let (host, port) = host_port(address)?;
        let mut client = connect_mssql(&host, port, Self::password(p), MSSQL_MASTER_DB)
            .await
            .map_err(ProbeFailure::context("mssql connect"))?;

        let result = client
            .simple_query("select 1")
            .await
            .map_err(ProbeFailure::context("select 1"))?
            .into_results()
            .await
            .map(|_| ())
            .map_err(ProbeFailure::context("select 1"));
        result
    }

    async fn seed(&self, preset: &Preset, address: &Address) -> Result<(), SeedError> {
        let p = expect_preset!(preset, Mssql, self.kind())?;
        let kind = self.kind();
        let (host, port) = host_port(address).map_err(SeedError::connection(kind))?;
        let db = p.db.as_deref().unwrap_or(MSSQL_DEFAULT_DB);

        let mut master = connect_mssql(&host, port, Self::password(p), MSSQL_MASTER_DB)
            .await
            .map_err(SeedError::connection(kind))?;
        master
            .simple_query(format!("create database {db}"))
            .await
            .map_err(SeedError::rejected(kind))?
            .into_results()
            .await
            .map_err(SeedError::rejected(kind))?;

        let mut client = connect_mssql(&host, port, Self::password(p), db)
            .await
            .map_err(SeedError::connection(kind))?;
        for script in scripts_then_queries(&p.queries_files, &p.queries)? {
            for batch in split_batches(&script) {
                client
                    .simple_query(batch)
                    .await
                    .map_err(SeedError::rejected(kind))?
                    .into_results()
                    .await
                    .map_err(SeedError::rejected(kind))?;
            }
        }

        Ok(())
    }
}
