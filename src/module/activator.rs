//! 模块激活器
//!
//! 激活器是模块的生命周期回调入口。宿主进程在启动前用
//! [`ActivatorRegistry`] 注册激活器工厂，清单里的 `activator`
//! 字段引用工厂键；未声明激活器的模块使用共享的空实现。
//!
//! 所有钩子都有空的默认实现，模块只需覆写关心的阶段。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::utils::{Result, RuntimeError};

/// 传递给激活器钩子的上下文
#[derive(Debug, Clone)]
pub struct ActivatorContext {
    /// 当前模块 ID
    pub module_id: String,
}

impl ActivatorContext {
    /// 为指定模块创建上下文
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
        }
    }
}

/// 模块生命周期回调
///
/// 钩子按阶段触发：`will_start` 在状态进入 Started 之前，
/// `started` 之后；停止阶段对称。启动阶段的钩子（`will_start`、
/// `started`）返回错误会使启动失败并回滚；停止阶段的错误只
/// 记录，不会阻断停止。
#[async_trait]
pub trait ModuleActivator: Send + Sync {
    /// 模块即将启动
    async fn will_start(&self, _ctx: &ActivatorContext) -> Result<()> {
        Ok(())
    }

    /// 模块已进入 Started 状态
    async fn started(&self, _ctx: &ActivatorContext) -> Result<()> {
        Ok(())
    }

    /// 模块即将停止
    async fn will_stop(&self, _ctx: &ActivatorContext) -> Result<()> {
        Ok(())
    }

    /// 模块已停止
    async fn stopped(&self, _ctx: &ActivatorContext) -> Result<()> {
        Ok(())
    }

    /// 解析图已重建，模块应丢弃缓存的解析结果
    async fn refreshed(&self, _ctx: &ActivatorContext) -> Result<()> {
        Ok(())
    }
}

/// 空激活器：所有钩子都是默认实现
#[derive(Debug, Default)]
pub struct NoopActivator;

#[async_trait]
impl ModuleActivator for NoopActivator {}

/// 激活器工厂：每次模块启动时创建一个新实例
pub type ActivatorFactory = Arc<dyn Fn() -> Arc<dyn ModuleActivator> + Send + Sync>;

/// 激活器工厂注册表
///
/// 克隆共享同一份底层存储。
#[derive(Clone, Default)]
pub struct ActivatorRegistry {
    factories: Arc<RwLock<HashMap<String, ActivatorFactory>>>,
    noop: Arc<NoopActivator>,
}

impl ActivatorRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册激活器工厂，同键覆盖
    pub async fn register<F>(&self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ModuleActivator> + Send + Sync + 'static,
    {
        let key = key.into();
        tracing::debug!(key = %key, "激活器工厂已注册");
        self.factories.write().await.insert(key, Arc::new(factory));
    }

    /// 按清单声明创建激活器实例
    ///
    /// `key` 为 None 表示模块未声明激活器，返回共享的空实现；
    /// 声明了但未注册的键返回 `ActivatorNotRegistered` 错误。
    pub async fn create(&self, key: Option<&str>) -> Result<Arc<dyn ModuleActivator>> {
        match key {
            None => Ok(self.noop.clone()),
            Some(key) => {
                let factories = self.factories.read().await;
                match factories.get(key) {
                    Some(factory) => Ok(factory()),
                    None => Err(RuntimeError::ActivatorNotRegistered(key.to_string())),
                }
            }
        }
    }

    /// 是否存在指定键的工厂
    pub async fn contains(&self, key: &str) -> bool {
        self.factories.read().await.contains_key(key)
    }

    /// 已注册的工厂数量
    pub async fn count(&self) -> usize {
        self.factories.read().await.len()
    }
}

impl std::fmt::Debug for ActivatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivatorRegistry").finish_non_exhaustive()
    }
}
