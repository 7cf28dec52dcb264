//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HANDOFF__*` 覆盖（双下划线表示嵌套，如 `HANDOFF__VERIFIER__MAX_RETRIES=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::RetryPolicy;
use crate::session::SessionSettings;
use crate::skills::VerifierSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub session: SessionSection,
    pub verifier: VerifierSection,
    pub storage: StorageSection,
}

/// [app] 段：应用名、技能清单位置
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_skills_manifest")]
    pub skills_manifest: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            skills_manifest: default_skills_manifest(),
        }
    }
}

fn default_app_name() -> String {
    "handoff".to_string()
}

fn default_skills_manifest() -> PathBuf {
    PathBuf::from("config/skills.toml")
}

/// [session] 段：会话默认超时、默认模型、僵尸清扫间隔
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// 配置未给 timeout 时使用（毫秒）
    #[serde(default = "default_session_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_session_timeout_ms(),
            default_model: default_model(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SessionSection {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            default_timeout_ms: self.default_timeout_ms,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_session_timeout_ms() -> u64 {
    300_000
}

fn default_model() -> String {
    "default".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// [verifier] 段：单次请求超时、重试与退避、verify_all 总期限系数
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierSection {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_aggregate_timeout_factor")]
    pub aggregate_timeout_factor: u32,
}

impl Default for VerifierSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            aggregate_timeout_factor: default_aggregate_timeout_factor(),
        }
    }
}

impl VerifierSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn settings(&self) -> VerifierSettings {
        VerifierSettings {
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
            aggregate_timeout_factor: self.aggregate_timeout_factor,
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_aggregate_timeout_factor() -> u32 {
    2
}

/// [storage] 段：会话持久化文件；未设置时只存内存
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSection {
    pub path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 HANDOFF__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HANDOFF__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HANDOFF")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::default();
        assert_eq!(config.app.name, "handoff");
        assert_eq!(config.session.settings().default_timeout_ms, 300_000);
        let verifier = config.verifier.settings();
        assert_eq!(verifier.retry, RetryPolicy::default());
        assert_eq!(verifier.aggregate_timeout_factor, 2);
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn test_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.toml");
        std::fs::write(
            &path,
            "[verifier]\nmax_retries = 5\nrequest_timeout_ms = 250\n\n[storage]\npath = \"sessions.json\"\n",
        )
        .unwrap();

        let config = load_config(Some(path)).unwrap();
        assert_eq!(config.verifier.max_retries, 5);
        assert_eq!(config.verifier.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.verifier.base_delay_ms, 1000);
        assert_eq!(config.storage.path, Some(PathBuf::from("sessions.json")));
    }
}
