//! Read options, connection properties, and the TOML config file.
//!
//! Options arrive as a flat, case-insensitive string map (the shape a
//! dataframe host passes to a data source). A TOML file can supply the same
//! keys; values given explicitly win over the file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ReadError, Result};
use crate::query::QueryDefinition;

/// Partition-count hint.
pub const NUM_PARTITIONS: &str = "shardscan.num_partitions";
/// Batch-size hint.
pub const BATCH_SIZE: &str = "shardscan.batch_size";
/// Serialized plan to read.
pub const QUERY: &str = "shardscan.query";
/// `user:password@host:port/database` shorthand.
pub const CLIENT_URI: &str = "shardscan.client.uri";
/// Remote host.
pub const CLIENT_HOST: &str = "shardscan.client.host";
/// Remote port.
pub const CLIENT_PORT: &str = "shardscan.client.port";
/// User name.
pub const CLIENT_USERNAME: &str = "shardscan.client.username";
/// Password.
pub const CLIENT_PASSWORD: &str = "shardscan.client.password";
/// Target database.
pub const CLIENT_DATABASE: &str = "shardscan.client.database";
/// Authentication scheme (`basic` or `digest`).
pub const CLIENT_AUTH_TYPE: &str = "shardscan.client.auth_type";

/// Default rows per bucket.
pub const DEFAULT_BATCH_SIZE: u64 = 10_000;

/// Case-insensitive option map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Options {
    entries: BTreeMap<String, String>,
}

impl Options {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an option; keys are compared case-insensitively.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Builder form of [`Options::insert`].
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Looks up an option.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Copies every option of `other` that is not already set.
    pub fn merge_missing(&mut self, other: &Options) {
        for (key, value) in &other.entries {
            self.entries
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn positive(&self, key: &str) -> Result<Option<u64>> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        let value: i64 = raw.trim().parse().map_err(|_| {
            ReadError::config(key, format!("Value of '{key}' option must be numeric"))
        })?;
        if value < 1 {
            return Err(ReadError::config(
                key,
                format!("Value of '{key}' option must be 1 or greater"),
            ));
        }
        Ok(Some(value as u64))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Options::new();
        for (key, value) in iter {
            options.insert(key, value);
        }
        options
    }
}

/// Validated read options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadOptions {
    /// Partition-count hint.
    pub num_partitions: usize,
    /// Rows per bucket hint.
    pub batch_size: u64,
    /// Serialized plan, if supplied through the options.
    pub query: Option<String>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            num_partitions: default_partitions(),
            batch_size: DEFAULT_BATCH_SIZE,
            query: None,
        }
    }
}

impl ReadOptions {
    /// Parses and validates the read options of `options`.
    pub fn from_options(options: &Options) -> Result<Self> {
        let defaults = Self::default();
        let num_partitions = match options.positive(NUM_PARTITIONS)? {
            Some(n) => usize::try_from(n).map_err(|_| {
                ReadError::config(
                    NUM_PARTITIONS,
                    format!("Value of '{NUM_PARTITIONS}' option is too large"),
                )
            })?,
            None => defaults.num_partitions,
        };
        Ok(Self {
            num_partitions,
            batch_size: options.positive(BATCH_SIZE)?.unwrap_or(defaults.batch_size),
            query: options.get(QUERY).map(str::to_string),
        })
    }

    /// Checks both hints are at least 1.
    pub fn validate(&self) -> Result<()> {
        if self.num_partitions < 1 {
            return Err(ReadError::config(
                NUM_PARTITIONS,
                format!("Value of '{NUM_PARTITIONS}' option must be 1 or greater"),
            ));
        }
        if self.batch_size < 1 {
            return Err(ReadError::config(
                BATCH_SIZE,
                format!("Value of '{BATCH_SIZE}' option must be 1 or greater"),
            ));
        }
        Ok(())
    }

    /// Parses the configured plan.
    pub fn query_definition(&self) -> Result<QueryDefinition> {
        let text = self.query.as_deref().ok_or_else(|| {
            ReadError::config(QUERY, format!("No query found; must define '{QUERY}'"))
        })?;
        QueryDefinition::parse(text).map_err(|err| {
            ReadError::config(
                QUERY,
                format!("Value of '{QUERY}' option is not a valid plan: {err}"),
            )
        })
    }
}

fn default_partitions() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Authentication scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// HTTP basic.
    Basic,
    /// HTTP digest.
    #[default]
    Digest,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthType::Basic => "basic",
            AuthType::Digest => "digest",
        })
    }
}

/// Where and how to connect to the remote engine.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProperties {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Target database; the server default when absent.
    pub database: Option<String>,
    /// Authentication scheme.
    pub auth_type: AuthType,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            username: None,
            password: None,
            database: None,
            auth_type: AuthType::default(),
        }
    }
}

impl fmt::Debug for ConnectionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProperties")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("auth_type", &self.auth_type)
            .finish()
    }
}

impl ConnectionProperties {
    /// Reads `shardscan.client.*` options. Explicit keys override the URI.
    pub fn from_options(options: &Options) -> Result<Self> {
        let mut props = match options.get(CLIENT_URI) {
            Some(uri) => Self::parse_uri(uri)?,
            None => Self::default(),
        };
        if let Some(host) = options.get(CLIENT_HOST) {
            props.host = host.to_string();
        }
        if let Some(port) = options.get(CLIENT_PORT) {
            props.port = parse_port(CLIENT_PORT, port)?;
        }
        if let Some(user) = options.get(CLIENT_USERNAME) {
            props.username = Some(user.to_string());
        }
        if let Some(password) = options.get(CLIENT_PASSWORD) {
            props.password = Some(password.to_string());
        }
        if let Some(database) = options.get(CLIENT_DATABASE) {
            props.database = Some(database.to_string());
        }
        if let Some(auth) = options.get(CLIENT_AUTH_TYPE) {
            props.auth_type = match auth.to_ascii_lowercase().as_str() {
                "basic" => AuthType::Basic,
                "digest" => AuthType::Digest,
                other => {
                    return Err(ReadError::config(
                        CLIENT_AUTH_TYPE,
                        format!("Invalid value for '{CLIENT_AUTH_TYPE}': {other}; must be basic or digest"),
                    ))
                }
            };
        }
        props.validate()?;
        Ok(props)
    }

    /// Parses `user:password@host:port[/database]`.
    pub fn parse_uri(uri: &str) -> Result<Self> {
        let invalid = || {
            ReadError::config(
                CLIENT_URI,
                format!(
                    "Invalid value for '{CLIENT_URI}'; must be of the form user:password@host:port[/database]"
                ),
            )
        };
        let (credentials, location) = uri.rsplit_once('@').ok_or_else(invalid)?;
        let (username, password) = credentials.split_once(':').ok_or_else(invalid)?;
        let (address, database) = match location.split_once('/') {
            Some((address, database)) if !database.is_empty() => {
                (address, Some(database.to_string()))
            }
            Some((address, _)) => (address, None),
            None => (location, None),
        };
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || username.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port: parse_port(CLIENT_URI, port)?,
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            database,
            auth_type: AuthType::default(),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ReadError::config(
                CLIENT_HOST,
                format!("Must specify a host via '{CLIENT_HOST}' or '{CLIENT_URI}'"),
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(ReadError::config(
                CLIENT_PASSWORD,
                format!("'{CLIENT_USERNAME}' and '{CLIENT_PASSWORD}' must be set together"),
            ));
        }
        Ok(())
    }
}

fn parse_port(option: &str, raw: &str) -> Result<u16> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ReadError::config(
            option,
            format!("Value of '{option}' option must be a port number between 1 and 65535"),
        )),
    }
}

/// Options loaded from a TOML config file.
#[derive(Debug, Default)]
pub struct ReadConfig {
    path: Option<PathBuf>,
    options: Options,
}

impl ReadConfig {
    /// Loads `explicit`, or the default config path when it exists.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file yields an empty config.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (Some(path), true),
            None => (default_config_path(), false),
        };
        let raw = match path.as_ref() {
            Some(p) if required || p.exists() => read_file(p)?,
            _ => RawConfig::default(),
        };
        Ok(Self {
            path,
            options: raw.into_options(),
        })
    }

    /// Parses config text directly.
    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ReadError::Toml {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Ok(Self {
            path: None,
            options: raw.into_options(),
        })
    }

    /// File the options were read from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Options flattened to their `shardscan.*` keys.
    pub fn options(&self) -> &Options {
        &self.options
    }
}

fn read_file(path: &Path) -> Result<RawConfig> {
    let contents = fs::read_to_string(path).map_err(|source| ReadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ReadError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

/// Default config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("shardscan").join("read.toml"))
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    read: ReadSection,
    #[serde(default)]
    connection: ConnectionSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ReadSection {
    num_partitions: Option<u64>,
    batch_size: Option<u64>,
    query: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ConnectionSection {
    uri: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    database: Option<String>,
    auth_type: Option<AuthType>,
}

impl RawConfig {
    fn into_options(self) -> Options {
        let mut options = Options::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                options.insert(key, value);
            }
        };
        put(NUM_PARTITIONS, self.read.num_partitions.map(|v| v.to_string()));
        put(BATCH_SIZE, self.read.batch_size.map(|v| v.to_string()));
        put(QUERY, self.read.query);
        let conn = self.connection;
        put(CLIENT_URI, conn.uri);
        put(CLIENT_HOST, conn.host);
        put(CLIENT_PORT, conn.port.map(|v| v.to_string()));
        put(CLIENT_USERNAME, conn.username);
        put(CLIENT_PASSWORD, conn.password);
        put(CLIENT_DATABASE, conn.database);
        put(CLIENT_AUTH_TYPE, conn.auth_type.map(|v| v.to_string()));
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        let options: Options = [("ShardScan.Batch_Size", "25")].into_iter().collect();
        let read = ReadOptions::from_options(&options).expect("options");
        assert_eq!(read.batch_size, 25);
        assert!(read.num_partitions >= 1);
    }

    #[test]
    fn numeric_errors_name_the_option() {
        let options = Options::new().with(NUM_PARTITIONS, "abc");
        let err = ReadOptions::from_options(&options).expect_err("non-numeric");
        assert_eq!(
            err.to_string(),
            "Value of 'shardscan.num_partitions' option must be numeric"
        );
        let options = Options::new().with(BATCH_SIZE, "0");
        let err = ReadOptions::from_options(&options).expect_err("zero");
        assert_eq!(
            err.to_string(),
            "Value of 'shardscan.batch_size' option must be 1 or greater"
        );
    }

    #[test]
    fn missing_query_is_a_config_error() {
        let err = ReadOptions::default()
            .query_definition()
            .expect_err("no query");
        assert!(matches!(err, ReadError::Config { option, .. } if option == QUERY));
    }

    #[test]
    fn malformed_query_names_the_option() {
        let read = ReadOptions {
            query: Some("not json".into()),
            ..ReadOptions::default()
        };
        let err = read.query_definition().expect_err("malformed");
        assert!(matches!(&err, ReadError::Config { option, .. } if option == QUERY));
        assert!(err.to_string().starts_with("Value of 'shardscan.query' option"));

        let read = ReadOptions {
            query: Some(r#"{"plan": {}}"#.into()),
            ..ReadOptions::default()
        };
        assert!(matches!(
            read.query_definition(),
            Err(ReadError::Config { option, .. }) if option == QUERY
        ));
    }

    #[test]
    fn uri_and_explicit_keys_combine() {
        let options = Options::new()
            .with(CLIENT_URI, "admin:secret@db.example:8010/Documents")
            .with(CLIENT_AUTH_TYPE, "BASIC");
        let props = ConnectionProperties::from_options(&options).expect("props");
        assert_eq!(props.host, "db.example");
        assert_eq!(props.port, 8010);
        assert_eq!(props.database.as_deref(), Some("Documents"));
        assert_eq!(props.auth_type, AuthType::Basic);
        assert!(!format!("{props:?}").contains("secret"));
    }

    #[test]
    fn rejects_bad_connection_values() {
        assert!(ConnectionProperties::parse_uri("no-at-sign").is_err());
        let options = Options::new().with(CLIENT_PORT, "70000");
        assert!(ConnectionProperties::from_options(&options).is_err());
        let options = Options::new().with(CLIENT_USERNAME, "admin");
        assert!(ConnectionProperties::from_options(&options).is_err());
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("read.toml");
        fs::write(
            &path,
            "[read]\nnum_partitions = 3\nbatch_size = 50\n\n[connection]\nhost = \"remote\"\nport = 8123\n",
        )
        .expect("write");
        let config = ReadConfig::load(Some(path.clone())).expect("load");
        assert_eq!(config.path(), Some(path.as_path()));
        let read = ReadOptions::from_options(config.options()).expect("read options");
        assert_eq!((read.num_partitions, read.batch_size), (3, 50));
        let props = ConnectionProperties::from_options(config.options()).expect("props");
        assert_eq!((props.host.as_str(), props.port), ("remote", 8123));

        let missing = ReadConfig::load(Some(dir.path().join("absent.toml")));
        assert!(matches!(missing, Err(ReadError::Io { .. })));
        assert!(matches!(
            ReadConfig::from_toml("[read]\nunknown = 1\n"),
            Err(ReadError::Toml { .. })
        ));
    }
}
