use log::debug;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_STORE_DIR: &str = "responses";
pub const DEFAULT_TABLE_NAME: &str = "Responses";
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8080";

/// Selects the in-memory store instead of a directory.
pub const MEMORY_STORE: &str = "memory";

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Error opening configuration file {path}"))]
    OpeningConfig {
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file {path}: {source}"))]
    ParsingConfig {
        path: String,
        source: serde_json::Error,
    },
    #[snafu(display("Invalid listen address {value:?}: {source}"))]
    InvalidListenAddress {
        value: String,
        source: std::net::AddrParseError,
    },
    #[snafu(display("The table name may not be empty"))]
    EmptyTableName {},
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationFile {
    pub enabled: Option<bool>,
    pub recipient: Option<String>,
    #[serde(rename = "webhookUrl")]
    pub webhook_url: Option<String>,
}

/// The configuration file, as written by the operator. Every key is optional.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(rename = "storeDir")]
    pub store_dir: Option<String>,
    #[serde(rename = "tableName")]
    pub table_name: Option<String>,
    #[serde(rename = "listenAddress")]
    pub listen_address: Option<String>,
    pub notifications: Option<NotificationFile>,
}

/// Values given on the command line. They take precedence over the file.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub store: Option<String>,
    pub table: Option<String>,
    pub listen: Option<String>,
    pub notify: Option<bool>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum StoreLocation {
    Directory(PathBuf),
    Memory,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub recipient: String,
    pub webhook_url: Option<String>,
}

/// The settings of a running service. Built once at startup and never modified.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ServiceConfig {
    pub store: StoreLocation,
    pub table_name: String,
    pub listen: SocketAddr,
    pub notifications: NotificationSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            store: StoreLocation::Directory(PathBuf::from(DEFAULT_STORE_DIR)),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            notifications: NotificationSettings::default(),
        }
    }
}

pub fn read_config_file(path: &str) -> ConfigResult<ConfigFile> {
    let contents = fs::read_to_string(path).context(OpeningConfigSnafu { path })?;
    debug!("read_config_file: {:?}", contents);
    serde_json::from_str(&contents).context(ParsingConfigSnafu { path })
}

fn store_location(s: &str) -> StoreLocation {
    if s == MEMORY_STORE {
        StoreLocation::Memory
    } else {
        StoreLocation::Directory(PathBuf::from(s))
    }
}

impl ServiceConfig {
    pub fn resolve(
        file: Option<ConfigFile>,
        overrides: &ConfigOverrides,
    ) -> ConfigResult<ServiceConfig> {
        let file = file.unwrap_or_default();
        let notif_file = file.notifications.unwrap_or_default();

        let store = overrides
            .store
            .clone()
            .or(file.store_dir)
            .unwrap_or_else(|| DEFAULT_STORE_DIR.to_string());
        let table_name = overrides
            .table
            .clone()
            .or(file.table_name)
            .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string());
        ensure!(!table_name.trim().is_empty(), EmptyTableNameSnafu {});
        let listen_s = overrides
            .listen
            .clone()
            .or(file.listen_address)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());
        let listen = listen_s
            .parse::<SocketAddr>()
            .context(InvalidListenAddressSnafu { value: &listen_s })?;

        let res = ServiceConfig {
            store: store_location(&store),
            table_name,
            listen,
            notifications: NotificationSettings {
                enabled: overrides.notify.or(notif_file.enabled).unwrap_or(false),
                recipient: notif_file.recipient.unwrap_or_default(),
                webhook_url: notif_file.webhook_url.filter(|u| !u.is_empty()),
            },
        };
        debug!("ServiceConfig::resolve: {:?}", res);
        Ok(res)
    }
}
