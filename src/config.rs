//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__TEAM__MAX_ROLE_STEPS=40`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub team: TeamSection,
    pub gateway: GatewaySection,
    pub web: WebSection,
}

/// [app] 段：目标框架、数据库路径
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 默认目标框架（生成请求未指定时使用）
    #[serde(default = "default_framework")]
    pub framework: String,
    /// SQLite 数据库文件；未设置时用 ./data/hive.db
    pub db_path: Option<PathBuf>,
}

fn default_framework() -> String {
    "nextjs".to_string()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            framework: default_framework(),
            db_path: None,
        }
    }
}

impl AppSection {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("data").join("hive.db"))
    }
}

/// [team] 段：历史窗口、角色步数上限、运行超时
#[derive(Debug, Clone, Deserialize)]
pub struct TeamSection {
    /// 每次运行载入的历史消息条数（触发的用户消息之前）
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// 单次运行最多执行的角色回合数
    #[serde(default = "default_max_role_steps")]
    pub max_role_steps: usize,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// 执行器 → 重建器帧通道容量
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,
}

fn default_history_limit() -> usize {
    100
}

fn default_max_role_steps() -> usize {
    25
}

fn default_run_timeout_secs() -> u64 {
    1800
}

fn default_frame_buffer() -> usize {
    64
}

impl Default for TeamSection {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            max_role_steps: default_max_role_steps(),
            run_timeout_secs: default_run_timeout_secs(),
            frame_buffer: default_frame_buffer(),
        }
    }
}

impl TeamSection {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// [gateway] 段：回放 / 轮询参数
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 轮询总时长上限，超过后发出 timeout 错误并结束流
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    /// 连续空轮询多少次后检查生产者是否存活
    #[serde(default = "default_idle_polls")]
    pub idle_polls_before_liveness_check: u32,
    #[serde(default = "default_replay_limit")]
    pub replay_limit: usize,
    #[serde(default = "default_poll_limit")]
    pub poll_limit: usize,
    /// stop 请求等待运行退出的时长
    #[serde(default = "default_stop_wait_secs")]
    pub stop_wait_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_wait_secs() -> u64 {
    300
}

fn default_idle_polls() -> u32 {
    20
}

fn default_replay_limit() -> usize {
    1000
}

fn default_poll_limit() -> usize {
    100
}

fn default_stop_wait_secs() -> u64 {
    90
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_secs: default_max_wait_secs(),
            idle_polls_before_liveness_check: default_idle_polls(),
            replay_limit: default_replay_limit(),
            poll_limit: default_poll_limit(),
            stop_wait_secs: default_stop_wait_secs(),
        }
    }
}

impl GatewaySection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn stop_wait(&self) -> Duration {
        Duration::from_secs(self.stop_wait_secs)
    }
}

/// [web] 段：HTTP 监听端口
#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for WebSection {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.framework, "nextjs");
        assert_eq!(cfg.team.history_limit, 100);
        assert_eq!(cfg.team.max_role_steps, 25);
        assert_eq!(cfg.gateway.poll_interval(), Duration::from_millis(500));
        assert_eq!(cfg.gateway.idle_polls_before_liveness_check, 20);
        assert_eq!(cfg.gateway.replay_limit, 1000);
    }

    #[test]
    fn test_file_overrides_and_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[team]\nmax_role_steps = 7\n\n[gateway]\npoll_limit = 5").unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.team.max_role_steps, 7);
        assert_eq!(cfg.team.history_limit, 100);
        assert_eq!(cfg.gateway.poll_limit, 5);
        assert_eq!(cfg.gateway.max_wait_secs, 300);
    }
}
