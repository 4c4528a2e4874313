//! # PMORadio Configuration Module
//!
//! Gestion de la configuration de PMORadio :
//! - configuration par défaut intégrée (`pmoradio.yaml`)
//! - fusion avec le fichier `config.yaml` du répertoire de configuration
//! - surcharges par variables d'environnement (`PMORADIO_CONFIG__SECTION__KEY`)
//! - getters typés avec valeurs par défaut
//! - accès singleton thread-safe
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let bitrate = config.get_encoder_bitrate();
//! config.set_http_port(9000)?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Les valeurs sont lues une fois au démarrage par les crates consommatrices,
//! qui en construisent des réglages immuables.

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{info, warn};

mod network;

pub use network::guess_local_ip;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmoradio.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMORadio configuration"));
}

const ENV_CONFIG_DIR: &str = "PMORADIO_CONFIG";
const ENV_PREFIX: &str = "PMORADIO_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmoradio";

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

const DEFAULT_STATION_NAME: &str = "PMORadio";
const DEFAULT_STATION_GENRE: &str = "Various";
const DEFAULT_STATION_DESCRIPTION: &str = "PMORadio continuous broadcast";
const DEFAULT_MUSIC_DIR: &str = "music";

const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
const DEFAULT_BITRATE_KBPS: u32 = 128;
const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_CHANNELS: u32 = 2;
const DEFAULT_CHUNK_SIZE: usize = 8192;

const DEFAULT_MAX_LISTENERS: usize = 100;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_FAULT_PAUSE_MS: u64 = 2000;
const DEFAULT_IDLE_BACKOFF_MS: u64 = 1000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// Getter/setter pour une valeur numérique non signée.
///
/// Les chaînes numériques sont acceptées (surcharges d'environnement).
macro_rules! impl_number_config {
    ($getter:ident, $setter:ident, $ty:ty, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> $ty {
            let parsed = match self.get_value($path) {
                Ok(Value::Number(n)) => n.as_u64().and_then(|v| <$ty>::try_from(v).ok()),
                Ok(Value::String(s)) => s.trim().parse::<$ty>().ok(),
                _ => None,
            };
            parsed.unwrap_or_else(|| {
                warn!(
                    key = %$path.join("."),
                    default = %$default,
                    "Missing or invalid value, using default"
                );
                $default
            })
        }

        pub fn $setter(&self, value: $ty) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Getter/setter pour une valeur booléenne.
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                Ok(Value::String(s)) => s.trim().parse::<bool>().unwrap_or($default),
                _ => $default,
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Getter/setter pour une chaîne non vide.
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.trim().is_empty() => s,
                _ => $default.to_string(),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Gestionnaire de configuration de PMORadio.
///
/// Une instance est soit adossée à un fichier `config.yaml` (chaque écriture
/// est persistée), soit purement en mémoire (voir [`Config::in_memory`]).
#[derive(Debug)]
pub struct Config {
    config_dir: PathBuf,
    path: Option<PathBuf>,
    data: Mutex<Value>,
}

impl Config {
    /// Recherche le répertoire de configuration, dans l'ordre :
    /// 1. le paramètre `directory` s'il n'est pas vide
    /// 2. la variable d'environnement `PMORADIO_CONFIG`
    /// 3. `.pmoradio` dans le répertoire courant
    /// 4. `.pmoradio` dans le répertoire personnel
    fn find_config_dir(directory: &str) -> PathBuf {
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Config directory taken from env");
            return PathBuf::from(env_path);
        }

        let local = PathBuf::from(CONFIG_DIR_NAME);
        if local.exists() {
            return local;
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        local
    }

    /// Crée le répertoire si besoin et vérifie les droits lecture/écriture.
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let probe = path.join(".write_test");
        fs::write(&probe, b"probe")?;
        fs::remove_file(&probe)?;
        fs::read_dir(path)?;

        Ok(())
    }

    /// Charge la configuration depuis `directory` (ou le répertoire par défaut si vide).
    ///
    /// La configuration intégrée est fusionnée avec `config.yaml` s'il existe,
    /// les clés sont passées en minuscules, les surcharges d'environnement sont
    /// appliquées, puis le résultat est réécrit sur disque.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(&config_dir)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join("config.yaml");
        let external = match fs::read(&path) {
            Ok(bytes) => {
                info!(config_file = %path.display(), "Loaded config file");
                Some(serde_yaml::from_slice::<Value>(&bytes)?)
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using embedded defaults");
                None
            }
        };

        let config = Self {
            data: Mutex::new(Self::build_tree(external)?),
            config_dir,
            path: Some(path),
        };

        if let Err(e) = config.save() {
            warn!("Unable to write merged configuration: {}", e);
        }
        Ok(config)
    }

    /// Construit une configuration non persistée à partir d'un fragment YAML
    /// fusionné avec les valeurs par défaut. Les surcharges d'environnement
    /// ne sont pas appliquées.
    pub fn in_memory(yaml: &str) -> Result<Self> {
        let external: Value = if yaml.trim().is_empty() {
            Value::Mapping(Mapping::new())
        } else {
            serde_yaml::from_str(yaml)?
        };

        Ok(Self {
            config_dir: env::temp_dir(),
            path: None,
            data: Mutex::new(merged_with_defaults(Some(external))?),
        })
    }

    fn build_tree(external: Option<Value>) -> Result<Value> {
        let mut tree = merged_with_defaults(external)?;
        apply_env_overrides(&mut tree);
        Ok(tree)
    }

    fn lock(&self) -> MutexGuard<'_, Value> {
        // Un panic pendant une écriture laisse un arbre YAML cohérent : on récupère le verrou.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Répertoire de configuration effectivement utilisé.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Écrit la configuration courante dans `config.yaml` (sans effet en mémoire).
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(&*self.lock())?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Affecte `value` au chemin `path` (ex: `&["host", "http_port"]`) puis sauvegarde.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock();
            set_in_tree(&mut data, path, value)?;
        }
        self.save()
    }

    /// Lit la valeur au chemin `path`.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock();
        let mut current = &*data;
        for (depth, key) in path.iter().enumerate() {
            let Value::Mapping(map) = current else {
                return Err(anyhow!("Path {} is not a mapping", path[..depth].join(".")));
            };
            current = map
                .get(&Value::String(key.to_lowercase()))
                .ok_or_else(|| anyhow!("Path {} does not exist", path[..=depth].join(".")))?;
        }
        Ok(current.clone())
    }

    /// Répertoire géré par la configuration, absolu ou relatif au répertoire
    /// de configuration. Il est créé s'il n'existe pas.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<PathBuf> {
        let configured = match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };

        let dir = Path::new(&configured);
        let absolute = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.config_dir.join(dir)
        };

        if !absolute.exists() {
            fs::create_dir_all(&absolute)?;
            info!(directory = %absolute.display(), "Created managed directory");
        }
        Ok(absolute)
    }

    /// URL de base annoncée, ou l'adresse IP locale devinée si non configurée.
    pub fn get_base_url(&self) -> String {
        match self.get_value(&["host", "base_url"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s,
            _ => guess_local_ip(),
        }
    }

    pub fn set_base_url(&self, url: String) -> Result<()> {
        self.set_value(&["host", "base_url"], Value::String(url))
    }

    impl_number_config!(
        get_http_port,
        set_http_port,
        u16,
        &["host", "http_port"],
        DEFAULT_HTTP_PORT
    );

    impl_number_config!(
        get_log_cache_size,
        set_log_cache_size,
        usize,
        &["host", "logger", "buffer_capacity"],
        DEFAULT_LOG_BUFFER_CAPACITY
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    impl_string_config!(
        get_station_name,
        set_station_name,
        &["station", "name"],
        DEFAULT_STATION_NAME
    );

    impl_string_config!(
        get_station_genre,
        set_station_genre,
        &["station", "genre"],
        DEFAULT_STATION_GENRE
    );

    impl_string_config!(
        get_station_description,
        set_station_description,
        &["station", "description"],
        DEFAULT_STATION_DESCRIPTION
    );

    /// Répertoire des morceaux diffusés (créé vide si absent).
    pub fn get_music_dir(&self) -> Result<PathBuf> {
        self.get_managed_dir(&["station", "music_dir"], DEFAULT_MUSIC_DIR)
    }

    impl_string_config!(
        get_ffmpeg_path,
        set_ffmpeg_path,
        &["encoder", "ffmpeg_path"],
        DEFAULT_FFMPEG_PATH
    );

    impl_number_config!(
        get_encoder_bitrate,
        set_encoder_bitrate,
        u32,
        &["encoder", "bitrate"],
        DEFAULT_BITRATE_KBPS
    );

    impl_number_config!(
        get_encoder_sample_rate,
        set_encoder_sample_rate,
        u32,
        &["encoder", "sample_rate"],
        DEFAULT_SAMPLE_RATE
    );

    impl_number_config!(
        get_encoder_channels,
        set_encoder_channels,
        u32,
        &["encoder", "channels"],
        DEFAULT_CHANNELS
    );

    impl_number_config!(
        get_encoder_chunk_size,
        set_encoder_chunk_size,
        usize,
        &["encoder", "chunk_size"],
        DEFAULT_CHUNK_SIZE
    );

    impl_number_config!(
        get_max_listeners,
        set_max_listeners,
        usize,
        &["broadcast", "max_listeners"],
        DEFAULT_MAX_LISTENERS
    );

    impl_number_config!(
        get_queue_capacity,
        set_queue_capacity,
        usize,
        &["broadcast", "queue_capacity"],
        DEFAULT_QUEUE_CAPACITY
    );

    impl_number_config!(
        get_fault_pause_ms,
        set_fault_pause_ms,
        u64,
        &["broadcast", "fault_pause_ms"],
        DEFAULT_FAULT_PAUSE_MS
    );

    impl_number_config!(
        get_idle_backoff_ms,
        set_idle_backoff_ms,
        u64,
        &["broadcast", "idle_backoff_ms"],
        DEFAULT_IDLE_BACKOFF_MS
    );

    impl_number_config!(
        get_shutdown_timeout_ms,
        set_shutdown_timeout_ms,
        u64,
        &["broadcast", "shutdown_timeout_ms"],
        DEFAULT_SHUTDOWN_TIMEOUT_MS
    );
}

/// Instance globale, chargée paresseusement au premier accès.
///
/// ```no_run
/// let config = pmoconfig::get_config();
/// println!("station: {}", config.get_station_name());
/// ```
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Les clés sont normalisées en minuscules des deux côtés avant la fusion.
fn merged_with_defaults(external: Option<Value>) -> Result<Value> {
    let mut tree = lower_keys(serde_yaml::from_str(DEFAULT_CONFIG)?);
    if let Some(external) = external {
        merge_yaml(&mut tree, &lower_keys(external));
    }
    Ok(tree)
}

fn set_in_tree(node: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return Ok(());
    };
    let Value::Mapping(map) = node else {
        return Err(anyhow!("Cannot set {}: parent is not a mapping", head));
    };

    let key = Value::String(head.to_lowercase());
    if rest.is_empty() {
        map.insert(key, value);
        Ok(())
    } else {
        let child = map
            .entry(key)
            .or_insert(Value::Mapping(Mapping::new()));
        set_in_tree(child, rest, value)
    }
}

/// `PMORADIO_CONFIG__ENCODER__BITRATE=192` surcharge `encoder.bitrate`.
fn apply_env_overrides(tree: &mut Value) {
    for (key, raw) in env::vars() {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<&str> = stripped.split("__").collect();
        let value = serde_yaml::from_str::<Value>(&raw).unwrap_or(Value::String(raw.clone()));
        if let Err(e) = set_in_tree(tree, &path, value) {
            warn!(env_var = %key, "Ignoring config override: {}", e);
        }
    }
}

fn lower_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (k, lower_keys(v))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys).collect()),
        other => other,
    }
}

/// Fusion récursive : les mappings sont fusionnés clé à clé, les scalaires
/// et séquences externes remplacent ceux par défaut.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
