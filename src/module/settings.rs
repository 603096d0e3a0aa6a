//! 生命周期标志存储
//!
//! 运行时通过 [`LifecycleFlagStore`] 记住哪些模块上次处于
//! 启动状态，以及哪些模块被宿主配置标记为必选。存储后端由
//! 宿主提供，内置的 [`MemoryFlagStore`] 适合测试和嵌入场景。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::utils::Result;

/// 生命周期标志存储后端
#[async_trait]
pub trait LifecycleFlagStore: Send + Sync {
    /// 查询模块的期望启动状态
    ///
    /// `None` 表示没有记录，按默认策略启动。
    async fn should_start(&self, module_id: &str) -> Result<Option<bool>>;

    /// 记录模块的启动状态
    async fn set_started(&self, module_id: &str, started: bool) -> Result<()>;

    /// 模块是否被宿主配置标记为必选
    async fn is_mandatory(&self, module_id: &str) -> Result<bool>;
}

/// 内存标志存储
///
/// 键格式为 `{module_id}.started` 与 `{module_id}.mandatory`，
/// 值为 "true"/"false"。克隆共享同一份底层存储。
#[derive(Debug, Clone, Default)]
pub struct MemoryFlagStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryFlagStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记模块为必选
    pub async fn set_mandatory(&self, module_id: &str, mandatory: bool) {
        self.entries
            .write()
            .await
            .insert(format!("{}.mandatory", module_id), mandatory.to_string());
    }

    /// 预置期望启动状态（测试与引导用）
    pub async fn preset_started(&self, module_id: &str, started: bool) {
        self.entries
            .write()
            .await
            .insert(format!("{}.started", module_id), started.to_string());
    }

    /// 当前条目数量
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// 是否为空
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl LifecycleFlagStore for MemoryFlagStore {
    async fn should_start(&self, module_id: &str) -> Result<Option<bool>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&format!("{}.started", module_id))
            .map(|v| v == "true"))
    }

    async fn set_started(&self, module_id: &str, started: bool) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(format!("{}.started", module_id), started.to_string());
        Ok(())
    }

    async fn is_mandatory(&self, module_id: &str) -> Result<bool> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&format!("{}.mandatory", module_id))
            .map(|v| v == "true")
            .unwrap_or(false))
    }
}
