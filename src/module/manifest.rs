//! 模块清单解析器
//!
//! 负责从 module.yaml 文件解析模块描述符。

use std::path::Path;

use crate::module::descriptor::ModuleDescriptor;
use crate::utils::{Result, RuntimeError};

/// 模块清单解析器
///
/// 提供从文件或字符串解析 module.yaml 的功能。
#[derive(Debug, Clone, Default)]
pub struct ManifestParser;

impl ManifestParser {
    /// 创建新的解析器实例
    pub fn new() -> Self {
        Self
    }

    /// 从文件解析模块描述符
    ///
    /// # Errors
    ///
    /// - 文件不存在或无法读取时返回 IO 错误
    /// - 文件内容不符合 YAML 格式时返回 YAML 错误
    /// - 描述符验证失败时返回 `InvalidManifest` 错误
    pub async fn parse_file(path: &Path) -> Result<ModuleDescriptor> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_string(&content)
    }

    /// 从文件同步解析模块描述符
    pub fn parse_file_sync(path: &Path) -> Result<ModuleDescriptor> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_string(&content)
    }

    /// 从字符串解析模块描述符
    ///
    /// # Errors
    ///
    /// - YAML 解析失败时返回 `Yaml` 错误
    /// - 验证失败时返回 `InvalidManifest` 错误
    pub fn parse_string(content: &str) -> Result<ModuleDescriptor> {
        let descriptor: ModuleDescriptor = serde_yaml::from_str(content)?;
        descriptor
            .validate()
            .map_err(|errors| RuntimeError::InvalidManifest(errors.join("; ")))?;
        Ok(descriptor)
    }
}
