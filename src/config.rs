//! 运行时配置
//!
//! 定义模块运行时的配置结构和加载逻辑。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 运行时配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 宿主平台版本（模块的 require_host_version 按此校验）
    #[serde(default = "default_host_version")]
    pub host_version: String,

    /// 核心模块 ID 列表，按启动顺序排列
    #[serde(default)]
    pub core_modules: Vec<String>,

    /// 模块仓库目录列表（扫描 module.yaml 清单）
    #[serde(default)]
    pub module_dirs: Vec<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_host_version() -> String {
    "1.0.0".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            host_version: default_host_version(),
            core_modules: vec![],
            module_dirs: vec![],
            logging: LogConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// 创建配置构建器
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// 从文件加载配置，支持 YAML 和 JSON
    pub async fn from_file(path: impl Into<PathBuf>) -> crate::utils::Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await?;

        let mut config: RuntimeConfig = if path.extension().map(|e| e == "json").unwrap_or(false)
        {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.config_path = Some(path);
        Ok(config)
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// 设置宿主版本
    pub fn host_version(mut self, version: impl Into<String>) -> Self {
        self.config.host_version = version.into();
        self
    }

    /// 添加核心模块
    pub fn core_module(mut self, module_id: impl Into<String>) -> Self {
        self.config.core_modules.push(module_id.into());
        self
    }

    /// 添加模块仓库目录
    pub fn module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.module_dirs.push(dir.into());
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 构建配置
    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}
