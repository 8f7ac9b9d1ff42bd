//! SQL Server connection pool and table operations for the database sink.
//!
//! `tiberius` speaks the TDS wire protocol directly; `bb8`/`bb8-tiberius`
//! pool connections on top of it. The sink owns the tables it writes to,
//! so beyond running queries it also creates tables from inferred schema
//! and performs parameterized inserts.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use serde_json::Value;
use tiberius::{AuthMethod, Config as TiberiusConfig, EncryptionLevel, Query};

use crate::errors::{ApiloomError, Result};
use crate::sink::schema::ColumnType;

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub server: String,
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    pub password: String,
    pub encrypt: Option<bool>,
    pub trust_server_certificate: Option<bool>,
    pub app_name: Option<String>,
}

/// Parses a `key=value;key=value` SQL Server connection string with
/// case-insensitive keys. If `trustServerCertificate=true` and `encrypt`
/// isn't explicitly `false`, forces `encrypt=false` — works around
/// TLS-to-IP restrictions on intranet deployments.
pub fn parse_connection_string(raw: &str) -> Result<ConnectionParams> {
    let mut map: HashMap<String, String> = HashMap::new();
    for pair in raw.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((key, value)) = pair.split_once('=') {
            map.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let server_raw = map
        .get("server")
        .cloned()
        .ok_or_else(|| ApiloomError::ConfigError("connection string missing 'server'".to_string()))?;
    let (server, port_from_server) = match server_raw.split_once(',') {
        Some((host, port)) => (host.to_string(), port.trim().parse::<u16>().ok()),
        None => (server_raw, None),
    };
    let port = map
        .get("port")
        .and_then(|p| p.parse::<u16>().ok())
        .or(port_from_server);

    let database = map
        .get("database")
        .cloned()
        .ok_or_else(|| ApiloomError::ConfigError("connection string missing 'database'".to_string()))?;
    let user = map
        .get("user")
        .or_else(|| map.get("uid"))
        .cloned()
        .ok_or_else(|| ApiloomError::ConfigError("connection string missing 'user'".to_string()))?;
    let password = map
        .get("password")
        .or_else(|| map.get("pwd"))
        .cloned()
        .ok_or_else(|| ApiloomError::ConfigError("connection string missing 'password'".to_string()))?;

    let mut encrypt = map.get("encrypt").map(|v| parse_bool(v));
    let trust_server_certificate = map.get("trustservercertificate").map(|v| parse_bool(v));
    if trust_server_certificate == Some(true) && encrypt != Some(false) {
        encrypt = Some(false);
    }
    let app_name = map.get("appname").cloned();

    Ok(ConnectionParams {
        server,
        port,
        database,
        user,
        password,
        encrypt,
        trust_server_certificate,
        app_name,
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn build_tiberius_config(params: &ConnectionParams) -> TiberiusConfig {
    let mut config = TiberiusConfig::new();
    config.host(&params.server);
    if let Some(port) = params.port {
        config.port(port);
    }
    config.database(&params.database);
    config.authentication(AuthMethod::sql_server(&params.user, &params.password));
    if params.encrypt == Some(false) {
        config.encryption(EncryptionLevel::NotSupported);
    } else {
        config.encryption(EncryptionLevel::Required);
    }
    if params.trust_server_certificate == Some(true) {
        config.trust_cert();
    }
    if let Some(app_name) = &params.app_name {
        config.application_name(app_name);
    }
    config
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(50);

/// Races `fut` against the 50s per-request timeout. A hung `table_columns`/
/// `create_table`/`insert_row` call fails instead of blocking forever.
async fn with_request_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(REQUEST_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(ApiloomError::WriterError(format!(
            "database request timed out after {}s",
            REQUEST_TIMEOUT.as_secs()
        ))),
    }
}

pub struct DatabaseSink {
    pool: Pool<ConnectionManager>,
}

impl DatabaseSink {
    /// Opens a single-connection pool — one logical connection per sink
    /// invocation — with a 30s connection timeout. Individual requests
    /// made through it are bounded by a separate 50s timeout.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let params = parse_connection_string(connection_string)?;
        let config = build_tiberius_config(&params);
        let manager = ConnectionManager::new(config);
        let pool = Pool::builder()
            .max_size(1)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)
            .await
            .map_err(|e| ApiloomError::Pool(e.to_string()))?;
        Ok(DatabaseSink { pool })
    }

    pub async fn table_columns(&self, table: &str) -> Result<HashSet<String>> {
        with_request_timeout(async {
            let mut conn = self.pool.get().await.map_err(|e| ApiloomError::Pool(e.to_string()))?;
            let mut query = Query::new(
                "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = @P1",
            );
            query.bind(table);
            let stream = query.query(&mut *conn).await.map_err(ApiloomError::Tiberius)?;
            let rows = stream.into_first_result().await.map_err(ApiloomError::Tiberius)?;
            let mut columns = HashSet::new();
            for row in rows {
                if let Ok(Some(name)) = row.try_get::<&str, _>(0) {
                    columns.insert(name.to_string());
                }
            }
            Ok(columns)
        })
        .await
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(!self.table_columns(table).await?.is_empty())
    }

    pub async fn drop_table(&self, table: &str) -> Result<()> {
        with_request_timeout(async {
            let mut conn = self.pool.get().await.map_err(|e| ApiloomError::Pool(e.to_string()))?;
            let sql = format!("IF OBJECT_ID(N'[{table}]', N'U') IS NOT NULL DROP TABLE [{table}]");
            conn.simple_query(sql).await.map_err(ApiloomError::Tiberius)?;
            Ok(())
        })
        .await
    }

    /// Creates `table` from inferred columns. When `identifier_column` is
    /// `None`, adds an `id INT IDENTITY(1,1)` primary key; when `Some`,
    /// that column becomes the primary key and no identity is added.
    /// Adds `created_at DATETIME` unless the inferred columns already
    /// have one — never adds `updated_at`.
    pub async fn create_table(
        &self,
        table: &str,
        columns: &[(String, ColumnType)],
        identifier_column: Option<&str>,
    ) -> Result<()> {
        with_request_timeout(async {
            let mut conn = self.pool.get().await.map_err(|e| ApiloomError::Pool(e.to_string()))?;

            let mut defs = Vec::new();
            match identifier_column {
                Some(id_col) => {
                    let sql_type = columns
                        .iter()
                        .find(|(name, _)| name == id_col)
                        .map(|(_, ty)| ty.sql_type())
                        .unwrap_or("TEXT");
                    defs.push(format!("[{id_col}] {sql_type} PRIMARY KEY"));
                }
                None => defs.push("[id] INT IDENTITY(1,1) PRIMARY KEY".to_string()),
            }
            for (name, ty) in columns {
                if Some(name.as_str()) == identifier_column {
                    continue;
                }
                defs.push(format!("[{name}] {}", ty.sql_type()));
            }
            if !columns.iter().any(|(name, _)| name == "created_at") {
                defs.push("[created_at] DATETIME".to_string());
            }

            let sql = format!("CREATE TABLE [{table}] ({})", defs.join(", "));
            conn.simple_query(sql).await.map_err(ApiloomError::Tiberius)?;
            Ok(())
        })
        .await
    }

    /// Inserts one row with `OUTPUT INSERTED.id`.
    pub async fn insert_row(&self, table: &str, row: &serde_json::Map<String, Value>) -> Result<()> {
        with_request_timeout(async {
            let mut conn = self.pool.get().await.map_err(|e| ApiloomError::Pool(e.to_string()))?;

            let columns: Vec<&String> = row.keys().collect();
            let col_list = columns
                .iter()
                .map(|c| format!("[{c}]"))
                .collect::<Vec<_>>()
                .join(", ");
            let param_list = (1..=columns.len())
                .map(|i| format!("@P{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql =
                format!("INSERT INTO [{table}] ({col_list}) OUTPUT INSERTED.id VALUES ({param_list})");

            let mut query = Query::new(sql);
            for column in &columns {
                bind_value(&mut query, &row[column.as_str()]);
            }

            let stream = query.query(&mut *conn).await.map_err(ApiloomError::Tiberius)?;
            stream.into_first_result().await.map_err(ApiloomError::Tiberius)?;
            Ok(())
        })
        .await
    }
}

fn bind_value(query: &mut Query<'_>, value: &Value) {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(if *b { 1i32 } else { 0i32 }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i);
            } else if let Some(f) = n.as_f64() {
                query.bind(f);
            } else {
                query.bind(n.to_string());
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_connection_string() {
        let params =
            parse_connection_string("server=db.local;database=app;user=sa;password=secret").unwrap();
        assert_eq!(params.server, "db.local");
        assert_eq!(params.database, "app");
        assert_eq!(params.user, "sa");
        assert_eq!(params.password, "secret");
        assert_eq!(params.port, None);
    }

    #[test]
    fn parses_port_from_comma_in_server() {
        let params =
            parse_connection_string("server=db.local,1434;database=app;user=sa;password=secret")
                .unwrap();
        assert_eq!(params.server, "db.local");
        assert_eq!(params.port, Some(1434));
    }

    #[test]
    fn trust_server_certificate_forces_encrypt_false_unless_explicit() {
        let params = parse_connection_string(
            "server=db;database=app;user=sa;password=x;trustServerCertificate=true",
        )
        .unwrap();
        assert_eq!(params.encrypt, Some(false));
    }

    #[test]
    fn explicit_encrypt_true_is_not_overridden() {
        let params = parse_connection_string(
            "server=db;database=app;user=sa;password=x;trustServerCertificate=true;encrypt=true",
        )
        .unwrap();
        assert_eq!(params.encrypt, Some(true));
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let err = parse_connection_string("server=db;user=sa;password=x").unwrap_err();
        assert!(matches!(err, ApiloomError::ConfigError(_)));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let params =
            parse_connection_string("SERVER=db;DATABASE=app;USER=sa;PASSWORD=secret").unwrap();
        assert_eq!(params.server, "db");
    }
}
