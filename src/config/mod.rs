pub mod error;
pub mod load;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_global_settings, load_settings, resolve_env_secret};
pub use paths::{default_global_config_path, GLOBAL_SETTINGS_FILE_NAME, GLOBAL_STATE_DIR};
pub use settings::{
    AcknowledgmentConfig, CheckpointBackend, CheckpointConfig, CloneConfig, CloudConfig,
    DiscoveryConfig, InventoryConfig, LlmConfig, NotificationConfig, ScanConfig, Settings,
};
