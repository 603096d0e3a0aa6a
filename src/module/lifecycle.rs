//! 生命周期控制器
//!
//! 控制器把注册表、依赖规划器、解析图、扩展注册表、激活器与
//! 标志存储组合成完整的模块运行时。所有状态迁移串行化在单个
//! 迁移锁之后，杜绝并发启动/停止交错产生的半挂载状态。
//!
//! 启动失败经 FailedStart 瞬态自动回滚到 Loaded，故障记录保留
//! 在注册表里供诊断；停止阶段的激活器钩子错误只记录日志，
//! 绝不阻断停止流程。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, RwLock};

use crate::config::RuntimeConfig;
use crate::module::activator::{ActivatorContext, ActivatorRegistry, ModuleActivator};
use crate::module::descriptor::{ModuleFault, ModuleRecord, ModuleState};
use crate::module::extension::ExtensionRegistry;
use crate::module::planner::{DependencyPlanner, StartPlan};
use crate::module::registry::ModuleRegistry;
use crate::module::resolution::{ResolutionGraph, ResolvedSymbol};
use crate::module::settings::LifecycleFlagStore;
use crate::utils::{version, Result, RuntimeError};

// ==================== 事件 ====================

/// 运行时事件
///
/// 通过可选的事件发布器对外广播，宿主可以接驳消息总线或 UI。
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// 模块已启动
    ModuleStarted {
        /// 模块 ID
        module_id: String,
    },
    /// 模块启动失败（已回滚到 Loaded）
    ModuleStartFailed {
        /// 模块 ID
        module_id: String,
        /// 失败原因
        reason: String,
    },
    /// 模块已停止
    ModuleStopped {
        /// 模块 ID
        module_id: String,
    },
    /// 模块已卸载并移出注册表
    ModuleUnloaded {
        /// 模块 ID
        module_id: String,
    },
    /// 批量启动完成
    BootCompleted {
        /// 成功启动的模块 ID
        started: Vec<String>,
        /// 启动失败的模块 ID
        failed: Vec<String>,
    },
    /// 运行时已关闭
    RuntimeShutdown,
}

/// 事件发布器：宿主提供的异步回调
pub type EventPublisher = Arc<dyn Fn(RuntimeEvent) -> BoxFuture<'static, ()> + Send + Sync>;

// ==================== 启动报告 ====================

/// 批量启动报告
#[derive(Debug, Clone, Default)]
pub struct BootReport {
    /// 成功启动的模块 ID，按实际启动顺序
    pub started: Vec<String>,

    /// 进入计划但启动失败的模块 ID
    pub failed: Vec<String>,

    /// 因依赖缺失未进入计划的模块及其缺失项描述
    pub unstartable: Vec<(String, Vec<String>)>,
}

impl BootReport {
    /// 是否全部候选模块都成功启动
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.unstartable.is_empty()
    }
}

// ==================== 控制器 ====================

/// 生命周期控制器
///
/// 克隆共享全部底层状态，可以廉价地分发给多个任务。
#[derive(Clone)]
pub struct LifecycleController {
    registry: ModuleRegistry,
    planner: DependencyPlanner,
    graph: Arc<RwLock<ResolutionGraph>>,
    extensions: ExtensionRegistry,
    activators: ActivatorRegistry,
    /// 已启动模块的激活器实例
    active: Arc<RwLock<HashMap<String, Arc<dyn ModuleActivator>>>>,
    flags: Arc<dyn LifecycleFlagStore>,
    host_version: String,
    /// 状态迁移锁：同一时刻只允许一个迁移在途
    transition: Arc<Mutex<()>>,
    publisher: Option<EventPublisher>,
}

impl LifecycleController {
    /// 创建控制器
    pub fn new(
        registry: ModuleRegistry,
        activators: ActivatorRegistry,
        flags: Arc<dyn LifecycleFlagStore>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            planner: DependencyPlanner::new(config.core_modules.clone()),
            graph: Arc::new(RwLock::new(ResolutionGraph::new())),
            extensions: ExtensionRegistry::new(),
            activators,
            active: Arc::new(RwLock::new(HashMap::new())),
            flags,
            host_version: config.host_version.clone(),
            transition: Arc::new(Mutex::new(())),
            publisher: None,
        }
    }

    /// 附加事件发布器
    pub fn with_event_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// 模块注册表
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// 扩展点注册表
    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// 依赖规划器
    pub fn planner(&self) -> &DependencyPlanner {
        &self.planner
    }

    /// 以某模块为请求方解析符号
    pub async fn resolve(&self, symbol: &str, requestor: &str) -> Result<ResolvedSymbol> {
        self.graph.read().await.resolve(symbol, requestor)
    }

    async fn publish(&self, event: RuntimeEvent) {
        if let Some(publisher) = &self.publisher {
            publisher(event).await;
        }
    }

    // ==================== 启动 ====================

    /// 启动单个模块
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, module_id: &str) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.do_start(module_id).await
    }

    async fn do_start(&self, module_id: &str) -> Result<()> {
        let record = self
            .registry
            .get(module_id)
            .await
            .ok_or_else(|| RuntimeError::ModuleNotFound(module_id.to_string()))?;

        // 重复启动是无害的幂等操作
        if record.state == ModuleState::Started {
            tracing::debug!(module_id = %module_id, "模块已处于启动状态，跳过");
            return Ok(());
        }
        if !record.state.can_start() {
            return Err(RuntimeError::ModuleStartFailed {
                module_id: module_id.to_string(),
                reason: format!("当前状态 {} 不允许启动", record.state),
            });
        }

        // 宿主版本门限
        if let Some(required) = &record.descriptor.require_host_version {
            if !version::matches(&self.host_version, required) {
                return Err(RuntimeError::VersionIncompatible {
                    module_id: module_id.to_string(),
                    required: required.clone(),
                    found: self.host_version.clone(),
                });
            }
        }

        // 依赖必须已被处于 Started 状态的模块以足够版本满足
        let mut missing: Vec<String> = Vec::new();
        for req in &record.descriptor.requires {
            match self.registry.started_by_package(&req.package).await {
                Some(provider) if req.is_satisfied_by(provider.version()) => {}
                Some(provider) => missing.push(format!(
                    "{} (当前 {})",
                    req.describe(),
                    provider.version()
                )),
                None => missing.push(req.describe()),
            }
        }
        if !missing.is_empty() {
            return Err(RuntimeError::MissingRequiredModule {
                module_id: module_id.to_string(),
                missing,
            });
        }

        self.registry
            .set_state(module_id, ModuleState::Starting)
            .await?;
        tracing::info!(module_id = %module_id, version = %record.version(), "正在启动模块");

        match self.mount_and_activate(&record).await {
            Ok(activator) => {
                self.registry
                    .set_state(module_id, ModuleState::Started)
                    .await?;
                self.active
                    .write()
                    .await
                    .insert(module_id.to_string(), activator.clone());

                // started 钩子失败视同启动失败，与挂载失败走同一条回滚路径
                let ctx = ActivatorContext::new(module_id);
                tracing::trace!(module_id = %module_id, hook = "started", "以提升的信任级别执行激活器钩子");
                if let Err(e) = activator.started(&ctx).await {
                    let err = RuntimeError::ActivatorHookFailed {
                        module_id: module_id.to_string(),
                        hook: "started".to_string(),
                        reason: e.to_string(),
                    };
                    self.rollback_failed_start(module_id, &err, Some(&activator))
                        .await;
                    self.publish(RuntimeEvent::ModuleStartFailed {
                        module_id: module_id.to_string(),
                        reason: err.to_string(),
                    })
                    .await;
                    return Err(err);
                }

                if let Err(e) = self.flags.set_started(module_id, true).await {
                    tracing::warn!(module_id = %module_id, error = %e, "启动标志持久化失败");
                }
                self.registry.clear_fault(module_id).await?;

                tracing::info!(module_id = %module_id, "模块启动完成");
                self.publish(RuntimeEvent::ModuleStarted {
                    module_id: module_id.to_string(),
                })
                .await;
                Ok(())
            }
            Err(e) => {
                self.rollback_failed_start(module_id, &e, None).await;
                self.publish(RuntimeEvent::ModuleStartFailed {
                    module_id: module_id.to_string(),
                    reason: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    /// 经 FailedStart 瞬态回滚到 Loaded，故障保留在记录里
    ///
    /// started 钩子失败时激活器已存在，补发停止钩子让模块有机会
    /// 释放已占用的资源；停止钩子错误只记录。
    async fn rollback_failed_start(
        &self,
        module_id: &str,
        error: &RuntimeError,
        activator: Option<&Arc<dyn ModuleActivator>>,
    ) {
        tracing::error!(
            module_id = %module_id,
            error_code = error.error_code(),
            error = %error,
            "模块启动失败，回滚"
        );
        let _ = self
            .registry
            .set_state(module_id, ModuleState::FailedStart)
            .await;
        let _ = self
            .registry
            .set_fault(
                module_id,
                ModuleFault::new(error.error_code(), error.to_string()),
                Some(error.to_string()),
            )
            .await;

        if let Some(activator) = activator {
            let ctx = ActivatorContext::new(module_id);
            if let Err(e) = activator.will_stop(&ctx).await {
                tracing::warn!(module_id = %module_id, hook = "will_stop", error = %e, "激活器钩子失败");
            }
        }

        self.unmount(module_id).await;
        let _ = self.registry.set_state(module_id, ModuleState::Loaded).await;

        if let Some(activator) = activator {
            let ctx = ActivatorContext::new(module_id);
            if let Err(e) = activator.stopped(&ctx).await {
                tracing::warn!(module_id = %module_id, hook = "stopped", error = %e, "激活器钩子失败");
            }
        }
    }

    /// 挂载解析节点、登记扩展并执行 will_start 钩子
    async fn mount_and_activate(&self, record: &ModuleRecord) -> Result<Arc<dyn ModuleActivator>> {
        let module_id = record.id();
        let activator = self
            .activators
            .create(record.descriptor.activator.as_deref())
            .await?;

        let started = self.registry.started_modules().await;
        let providers: HashMap<String, String> = started
            .iter()
            .map(|r| (r.package_name().to_string(), r.id().to_string()))
            .collect();
        self.graph.write().await.attach(
            &record.descriptor,
            |package| providers.get(package).cloned(),
            self.planner.core_modules(),
        );

        self.extensions.register_module(&record.descriptor).await;

        let ctx = ActivatorContext::new(module_id);
        tracing::trace!(module_id = %module_id, hook = "will_start", "以提升的信任级别执行激活器钩子");
        if let Err(e) = activator.will_start(&ctx).await {
            return Err(RuntimeError::ActivatorHookFailed {
                module_id: module_id.to_string(),
                hook: "will_start".to_string(),
                reason: e.to_string(),
            });
        }

        Ok(activator)
    }

    /// 摘除模块在图与扩展注册表中的痕迹（回滚与停止共用）
    async fn unmount(&self, module_id: &str) {
        self.extensions.remove_module(module_id).await;
        let mut graph = self.graph.write().await;
        graph.dispose(module_id);
        graph.detach(module_id);
        drop(graph);
        self.active.write().await.remove(module_id);
    }

    // ==================== 停止 ====================

    /// 停止单个模块
    ///
    /// 依赖者先行递归停止，覆盖标志随递归传播。强制模块在
    /// 没有覆盖标志时拒绝停止。
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self, module_id: &str, force: bool) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.do_stop(module_id.to_string(), force, true).await
    }

    fn do_stop(
        &self,
        module_id: String,
        force: bool,
        persist_flag: bool,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let record = self
                .registry
                .get(&module_id)
                .await
                .ok_or_else(|| RuntimeError::ModuleNotFound(module_id.clone()))?;

            // 已经不在活动状态的模块无需处理
            if !record.state.can_stop() {
                tracing::debug!(module_id = %module_id, state = %record.state, "模块无需停止");
                return Ok(());
            }

            if !force
                && (record.descriptor.mandatory || self.flags.is_mandatory(&module_id).await?)
            {
                return Err(RuntimeError::MandatoryModuleStopRefused(module_id));
            }

            // 依赖者先停：在已启动模块中按包名反查
            let package = record.package_name().to_string();
            let mut dependents: Vec<String> = self
                .registry
                .find_modules(|r| {
                    r.is_started()
                        && r.id() != module_id
                        && r.descriptor.requires.iter().any(|req| req.package == package)
                })
                .await
                .into_iter()
                .map(|r| r.id().to_string())
                .collect();
            dependents.sort();

            for dependent in dependents {
                tracing::debug!(
                    module_id = %module_id,
                    dependent = %dependent,
                    "先停止依赖者"
                );
                self.do_stop(dependent, force, persist_flag).await?;
            }

            self.registry
                .set_state(&module_id, ModuleState::Stopping)
                .await?;
            tracing::info!(module_id = %module_id, "正在停止模块");

            let activator = self.active.read().await.get(&module_id).cloned();
            let ctx = ActivatorContext::new(&module_id);
            if let Some(activator) = &activator {
                tracing::trace!(module_id = %module_id, hook = "will_stop", "以提升的信任级别执行激活器钩子");
                if let Err(e) = activator.will_stop(&ctx).await {
                    tracing::warn!(module_id = %module_id, hook = "will_stop", error = %e, "激活器钩子失败");
                }
            }

            self.unmount(&module_id).await;
            self.registry
                .set_state(&module_id, ModuleState::Stopped)
                .await?;

            if persist_flag {
                if let Err(e) = self.flags.set_started(&module_id, false).await {
                    tracing::warn!(module_id = %module_id, error = %e, "停止标志持久化失败");
                }
            }

            if let Some(activator) = &activator {
                if let Err(e) = activator.stopped(&ctx).await {
                    tracing::warn!(module_id = %module_id, hook = "stopped", error = %e, "激活器钩子失败");
                }
            }

            tracing::info!(module_id = %module_id, "模块已停止");
            self.publish(RuntimeEvent::ModuleStopped { module_id }).await;
            Ok(())
        })
    }

    // ==================== 卸载 ====================

    /// 卸载模块并移出注册表
    ///
    /// 仅允许 Loaded/Stopped 状态的模块卸载。
    #[tracing::instrument(skip(self))]
    pub async fn unload(&self, module_id: &str) -> Result<ModuleRecord> {
        let _guard = self.transition.lock().await;
        let record = self.registry.remove(module_id).await?;
        self.graph.write().await.detach(module_id);
        tracing::info!(module_id = %module_id, "模块已卸载");
        self.publish(RuntimeEvent::ModuleUnloaded {
            module_id: module_id.to_string(),
        })
        .await;
        Ok(record)
    }

    // ==================== 批量启动 ====================

    /// 按依赖顺序启动全部候选模块
    ///
    /// 候选为处于 Loaded 状态且未被标志存储禁用的模块
    /// （核心与强制模块忽略禁用标志）。单个模块失败不会中断
    /// 其余模块；剩余失败者反复重试直到一轮没有进展。
    /// 核心或强制模块最终未启动是致命错误。
    #[tracing::instrument(skip(self))]
    pub async fn start_all(&self) -> Result<BootReport> {
        let _guard = self.transition.lock().await;

        let snapshot = self.registry.find_by_state(ModuleState::Loaded).await;
        let mut candidates: Vec<ModuleRecord> = Vec::new();
        let mut settings_mandatory: HashSet<String> = HashSet::new();
        for record in snapshot {
            let id = record.id().to_string();
            if self.flags.is_mandatory(&id).await? {
                settings_mandatory.insert(id.clone());
            }
            let disabled = self.flags.should_start(&id).await? == Some(false);
            if disabled
                && !record.descriptor.mandatory
                && !settings_mandatory.contains(&id)
                && !self.planner.is_core(&id)
            {
                tracing::debug!(module_id = %id, "模块被标志存储禁用，跳过启动");
                continue;
            }
            candidates.push(record);
        }

        let plan = self.planner.plan(&candidates)?;
        self.planner
            .check_mandatory(&plan, &candidates, &settings_mandatory)?;

        let report = self.execute_plan(&plan).await;

        // 记录计划外模块的启动失败消息
        for (id, missing) in &plan.unstartable {
            let described: Vec<String> = missing.iter().map(|m| m.describe()).collect();
            let _ = self
                .registry
                .set_startup_message(id, format!("缺少依赖: {}", described.join(", ")))
                .await;
        }

        self.verify_boot(&report, &candidates, &settings_mandatory)?;

        tracing::info!(
            started = report.started.len(),
            failed = report.failed.len(),
            unstartable = report.unstartable.len(),
            "批量启动完成"
        );
        self.publish(RuntimeEvent::BootCompleted {
            started: report.started.clone(),
            failed: report.failed.clone(),
        })
        .await;
        Ok(report)
    }

    /// 按计划顺序逐个启动，失败者反复重试直到不动点
    async fn execute_plan(&self, plan: &StartPlan) -> BootReport {
        let mut started: Vec<String> = Vec::new();
        let mut pending: Vec<String> = plan.order.clone();

        loop {
            let mut progressed = false;
            let mut still_pending: Vec<String> = Vec::new();

            for id in pending {
                match self.do_start(&id).await {
                    Ok(()) => {
                        started.push(id);
                        progressed = true;
                    }
                    Err(e) => {
                        tracing::warn!(module_id = %id, error = %e, "模块启动失败，稍后重试");
                        still_pending.push(id);
                    }
                }
            }

            pending = still_pending;
            if pending.is_empty() || !progressed {
                break;
            }
        }

        BootReport {
            started,
            failed: pending,
            unstartable: plan
                .unstartable
                .iter()
                .map(|(id, missing)| {
                    (
                        id.clone(),
                        missing.iter().map(|m| m.describe()).collect(),
                    )
                })
                .collect(),
        }
    }

    /// 启动后校验：核心与强制模块必须全部处于 Started 状态
    fn verify_boot(
        &self,
        report: &BootReport,
        candidates: &[ModuleRecord],
        settings_mandatory: &HashSet<String>,
    ) -> Result<()> {
        let started: HashSet<&str> = report.started.iter().map(|s| s.as_str()).collect();

        let core_failed: Vec<String> = self
            .planner
            .core_modules()
            .iter()
            .filter(|id| !started.contains(id.as_str()))
            .cloned()
            .collect();
        if !core_failed.is_empty() {
            return Err(RuntimeError::CoreModulesUnstartable(core_failed));
        }

        let mut mandatory_failed: Vec<String> = candidates
            .iter()
            .filter(|r| {
                (r.descriptor.mandatory || settings_mandatory.contains(r.id()))
                    && !started.contains(r.id())
            })
            .map(|r| format!("{}@{}", r.id(), r.version()))
            .collect();
        if !mandatory_failed.is_empty() {
            mandatory_failed.sort();
            return Err(RuntimeError::MandatoryModulesUnstartable(mandatory_failed));
        }

        Ok(())
    }

    // ==================== 刷新与关闭 ====================

    /// 重建全部解析节点的委托边并通知激活器
    ///
    /// 模块停止或启动后调用，让存活模块看到最新的提供方。
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.transition.lock().await;

        let started = self.registry.started_modules().await;
        let providers: HashMap<String, String> = started
            .iter()
            .map(|r| (r.package_name().to_string(), r.id().to_string()))
            .collect();

        {
            let mut graph = self.graph.write().await;
            for record in &started {
                graph.rebuild(
                    &record.descriptor,
                    |package| providers.get(package).cloned(),
                    self.planner.core_modules(),
                );
            }
        }

        let active = self.active.read().await.clone();
        for (module_id, activator) in active {
            let ctx = ActivatorContext::new(&module_id);
            tracing::trace!(module_id = %module_id, hook = "refreshed", "以提升的信任级别执行激活器钩子");
            if let Err(e) = activator.refreshed(&ctx).await {
                tracing::warn!(module_id = %module_id, hook = "refreshed", error = %e, "激活器钩子失败");
            }
        }

        tracing::info!(modules = started.len(), "解析图已刷新");
        Ok(())
    }

    /// 关闭运行时：以覆盖方式停止全部模块
    ///
    /// 关闭不持久化启动标志，下次启动时模块恢复到关闭前的期望状态。
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.transition.lock().await;

        let mut ids: Vec<String> = self
            .registry
            .started_modules()
            .await
            .into_iter()
            .map(|r| r.id().to_string())
            .collect();
        ids.sort();

        for id in ids {
            if let Err(e) = self.do_stop(id.clone(), true, false).await {
                tracing::warn!(module_id = %id, error = %e, "关闭时停止模块失败");
            }
        }

        tracing::info!("运行时已关闭");
        self.publish(RuntimeEvent::RuntimeShutdown).await;
        Ok(())
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("host_version", &self.host_version)
            .field("core_modules", &self.planner.core_modules())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::activator::NoopActivator;
    use crate::module::descriptor::{ModuleDescriptor, ModuleRequirement};
    use crate::module::settings::MemoryFlagStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn descriptor(id: &str, version: &str) -> ModuleDescriptor {
        ModuleDescriptor::new(id, format!("org.chips.{}", id), version)
    }

    fn controller_with(core: &[&str]) -> (LifecycleController, Arc<MemoryFlagStore>) {
        let mut builder = RuntimeConfig::builder().host_version("2.0.0");
        for id in core {
            builder = builder.core_module(*id);
        }
        let config = builder.build();
        let flags = Arc::new(MemoryFlagStore::new());
        let controller = LifecycleController::new(
            ModuleRegistry::new(vec![]),
            ActivatorRegistry::new(),
            flags.clone(),
            &config,
        );
        (controller, flags)
    }

    /// 按配置记录调用轨迹、可注入失败的测试激活器
    struct TraceActivator {
        trace: Arc<std::sync::Mutex<Vec<String>>>,
        label: String,
        fail_will_start: Arc<AtomicBool>,
        fail_started: Arc<AtomicBool>,
    }

    impl TraceActivator {
        fn factory(
            trace: Arc<std::sync::Mutex<Vec<String>>>,
            label: &str,
            fail_will_start: Arc<AtomicBool>,
            fail_started: Arc<AtomicBool>,
        ) -> impl Fn() -> Arc<dyn ModuleActivator> + Send + Sync + 'static {
            let label = label.to_string();
            move || {
                Arc::new(TraceActivator {
                    trace: trace.clone(),
                    label: label.clone(),
                    fail_will_start: fail_will_start.clone(),
                    fail_started: fail_started.clone(),
                }) as Arc<dyn ModuleActivator>
            }
        }

        fn record(&self, hook: &str) {
            self.trace
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, hook));
        }
    }

    #[async_trait]
    impl ModuleActivator for TraceActivator {
        async fn will_start(&self, _ctx: &ActivatorContext) -> Result<()> {
            self.record("will_start");
            if self.fail_will_start.load(Ordering::SeqCst) {
                return Err(RuntimeError::Internal("注入的启动故障".to_string()));
            }
            Ok(())
        }

        async fn started(&self, _ctx: &ActivatorContext) -> Result<()> {
            self.record("started");
            if self.fail_started.load(Ordering::SeqCst) {
                return Err(RuntimeError::Internal("注入的启动后故障".to_string()));
            }
            Ok(())
        }

        async fn will_stop(&self, _ctx: &ActivatorContext) -> Result<()> {
            self.record("will_stop");
            Ok(())
        }

        async fn stopped(&self, _ctx: &ActivatorContext) -> Result<()> {
            self.record("stopped");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_happy_path() {
        let (controller, _) = controller_with(&[]);
        controller
            .registry()
            .load(descriptor("report", "1.0.0"), false)
            .await
            .unwrap();

        controller.start("report").await.unwrap();
        assert_eq!(
            controller.registry().get_state("report").await,
            Some(ModuleState::Started)
        );

        controller.stop("report", false).await.unwrap();
        assert_eq!(
            controller.registry().get_state("report").await,
            Some(ModuleState::Stopped)
        );
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (controller, _) = controller_with(&[]);
        controller
            .registry()
            .load(descriptor("report", "1.0.0"), false)
            .await
            .unwrap();

        controller.start("report").await.unwrap();
        controller.start("report").await.unwrap();
        assert_eq!(
            controller.registry().get_state("report").await,
            Some(ModuleState::Started)
        );
    }

    #[tokio::test]
    async fn test_stop_on_loaded_is_noop() {
        let (controller, _) = controller_with(&[]);
        controller
            .registry()
            .load(descriptor("report", "1.0.0"), false)
            .await
            .unwrap();

        controller.stop("report", false).await.unwrap();
        assert_eq!(
            controller.registry().get_state("report").await,
            Some(ModuleState::Loaded)
        );
    }

    #[tokio::test]
    async fn test_start_unknown_module() {
        let (controller, _) = controller_with(&[]);
        let result = controller.start("ghost").await;
        assert!(matches!(result, Err(RuntimeError::ModuleNotFound(_))));
    }

    #[tokio::test]
    async fn test_start_rejects_incompatible_host() {
        let (controller, _) = controller_with(&[]);
        let mut desc = descriptor("picky", "1.0.0");
        desc.require_host_version = Some("3.0".to_string());
        controller.registry().load(desc, false).await.unwrap();

        let result = controller.start("picky").await;
        assert!(matches!(
            result,
            Err(RuntimeError::VersionIncompatible { .. })
        ));
        // 门限检查在状态迁移之前，模块保持 Loaded
        assert_eq!(
            controller.registry().get_state("picky").await,
            Some(ModuleState::Loaded)
        );
    }

    #[tokio::test]
    async fn test_start_requires_started_provider() {
        let (controller, _) = controller_with(&[]);
        let mut desc = descriptor("report", "1.0.0");
        desc.requires = vec![ModuleRequirement::new("org.chips.base").at_least("1.2")];
        controller.registry().load(desc, false).await.unwrap();
        controller
            .registry()
            .load(descriptor("base", "1.5.0"), false)
            .await
            .unwrap();

        // base 已加载但未启动
        let result = controller.start("report").await;
        assert!(matches!(
            result,
            Err(RuntimeError::MissingRequiredModule { .. })
        ));

        controller.start("base").await.unwrap();
        controller.start("report").await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back_and_records_fault() {
        let (controller, _) = controller_with(&[]);
        let trace = Arc::new(std::sync::Mutex::new(Vec::new()));
        let fail = Arc::new(AtomicBool::new(true));

        controller
            .activators
            .register(
                "flaky",
                TraceActivator::factory(
                    trace.clone(),
                    "flaky",
                    fail.clone(),
                    Arc::new(AtomicBool::new(false)),
                ),
            )
            .await;

        let mut desc = descriptor("flaky", "1.0.0");
        desc.activator = Some("flaky".to_string());
        controller.registry().load(desc, false).await.unwrap();

        let result = controller.start("flaky").await;
        assert!(matches!(
            result,
            Err(RuntimeError::ActivatorHookFailed { .. })
        ));

        let record = controller.registry().get("flaky").await.unwrap();
        assert_eq!(record.state, ModuleState::Loaded);
        assert!(record.last_error.is_some());
        assert!(record.startup_error_message.is_some());

        // 故障排除后重试成功，故障记录清除
        fail.store(false, Ordering::SeqCst);
        controller.start("flaky").await.unwrap();
        let record = controller.registry().get("flaky").await.unwrap();
        assert_eq!(record.state, ModuleState::Started);
        assert!(record.last_error.is_none());
        assert!(record.startup_error_message.is_none());
    }

    #[tokio::test]
    async fn test_started_hook_failure_rolls_back() {
        let (controller, _) = controller_with(&[]);
        let trace = Arc::new(std::sync::Mutex::new(Vec::new()));
        let fail = Arc::new(AtomicBool::new(true));

        controller
            .activators
            .register(
                "latebloom",
                TraceActivator::factory(
                    trace.clone(),
                    "latebloom",
                    Arc::new(AtomicBool::new(false)),
                    fail.clone(),
                ),
            )
            .await;

        let mut desc = descriptor("latebloom", "1.0.0");
        desc.activator = Some("latebloom".to_string());
        controller.registry().load(desc, false).await.unwrap();

        // started 钩子失败不能让模块停留在 Started
        let result = controller.start("latebloom").await;
        assert!(matches!(
            result,
            Err(RuntimeError::ActivatorHookFailed { ref hook, .. }) if hook == "started"
        ));

        let record = controller.registry().get("latebloom").await.unwrap();
        assert_eq!(record.state, ModuleState::Loaded);
        assert!(record.last_error.is_some());
        assert!(record.startup_error_message.is_some());
        assert!(controller.registry().started_modules().await.is_empty());

        // 回滚补发了停止钩子
        {
            let seen = trace.lock().unwrap();
            assert_eq!(
                *seen,
                vec![
                    "latebloom:will_start",
                    "latebloom:started",
                    "latebloom:will_stop",
                    "latebloom:stopped",
                ]
            );
        }

        // 故障排除后重试成功
        fail.store(false, Ordering::SeqCst);
        controller.start("latebloom").await.unwrap();
        assert_eq!(
            controller.registry().get_state("latebloom").await,
            Some(ModuleState::Started)
        );
    }

    #[tokio::test]
    async fn test_mandatory_stop_refused_without_override() {
        let (controller, _) = controller_with(&[]);
        let mut desc = descriptor("vital", "1.0.0");
        desc.mandatory = true;
        controller.registry().load(desc, false).await.unwrap();
        controller.start("vital").await.unwrap();

        let result = controller.stop("vital", false).await;
        assert!(matches!(
            result,
            Err(RuntimeError::MandatoryModuleStopRefused(_))
        ));
        assert_eq!(
            controller.registry().get_state("vital").await,
            Some(ModuleState::Started)
        );

        controller.stop("vital", true).await.unwrap();
        assert_eq!(
            controller.registry().get_state("vital").await,
            Some(ModuleState::Stopped)
        );
    }

    #[tokio::test]
    async fn test_settings_mandatory_also_protects() {
        let (controller, flags) = controller_with(&[]);
        controller
            .registry()
            .load(descriptor("vital", "1.0.0"), false)
            .await
            .unwrap();
        flags.set_mandatory("vital", true).await;
        controller.start("vital").await.unwrap();

        let result = controller.stop("vital", false).await;
        assert!(matches!(
            result,
            Err(RuntimeError::MandatoryModuleStopRefused(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_cascades_to_dependents_first() {
        let (controller, _) = controller_with(&[]);
        controller
            .registry()
            .load(descriptor("base", "1.0.0"), false)
            .await
            .unwrap();
        let mut mid = descriptor("mid", "1.0.0");
        mid.requires = vec![ModuleRequirement::new("org.chips.base")];
        controller.registry().load(mid, false).await.unwrap();
        let mut top = descriptor("top", "1.0.0");
        top.requires = vec![ModuleRequirement::new("org.chips.mid")];
        controller.registry().load(top, false).await.unwrap();

        controller.start("base").await.unwrap();
        controller.start("mid").await.unwrap();
        controller.start("top").await.unwrap();

        // 停 base 必须连带停掉 mid 和 top
        controller.stop("base", false).await.unwrap();
        for id in ["base", "mid", "top"] {
            assert_eq!(
                controller.registry().get_state(id).await,
                Some(ModuleState::Stopped),
                "{} 应已停止",
                id
            );
        }
    }

    #[tokio::test]
    async fn test_stop_cascade_aborts_on_mandatory_dependent() {
        let (controller, _) = controller_with(&[]);
        controller
            .registry()
            .load(descriptor("base", "1.0.0"), false)
            .await
            .unwrap();
        let mut vital = descriptor("vital", "1.0.0");
        vital.mandatory = true;
        vital.requires = vec![ModuleRequirement::new("org.chips.base")];
        controller.registry().load(vital, false).await.unwrap();

        controller.start("base").await.unwrap();
        controller.start("vital").await.unwrap();

        let result = controller.stop("base", false).await;
        assert!(matches!(
            result,
            Err(RuntimeError::MandatoryModuleStopRefused(_))
        ));

        // 覆盖标志随递归传播
        controller.stop("base", true).await.unwrap();
        assert_eq!(
            controller.registry().get_state("vital").await,
            Some(ModuleState::Stopped)
        );
    }

    #[tokio::test]
    async fn test_start_all_orders_and_reports() {
        let (controller, _) = controller_with(&["platform"]);
        controller
            .registry()
            .load(descriptor("platform", "2.0.0"), false)
            .await
            .unwrap();
        controller
            .registry()
            .load(descriptor("base", "1.5.0"), false)
            .await
            .unwrap();
        let mut report = descriptor("report", "1.0.0");
        report.requires = vec![ModuleRequirement::new("org.chips.base").at_least("1.2")];
        controller.registry().load(report, false).await.unwrap();
        let mut broken = descriptor("broken", "1.0.0");
        broken.requires = vec![ModuleRequirement::new("org.ghost")];
        controller.registry().load(broken, false).await.unwrap();

        let boot = controller.start_all().await.unwrap();
        assert_eq!(boot.started, vec!["platform", "base", "report"]);
        assert!(boot.failed.is_empty());
        assert_eq!(boot.unstartable.len(), 1);
        assert_eq!(boot.unstartable[0].0, "broken");

        let record = controller.registry().get("broken").await.unwrap();
        assert!(record
            .startup_error_message
            .as_deref()
            .unwrap()
            .contains("org.ghost"));
    }

    #[tokio::test]
    async fn test_start_all_skips_disabled_modules() {
        let (controller, flags) = controller_with(&[]);
        controller
            .registry()
            .load(descriptor("wanted", "1.0.0"), false)
            .await
            .unwrap();
        controller
            .registry()
            .load(descriptor("unwanted", "1.0.0"), false)
            .await
            .unwrap();
        flags.preset_started("unwanted", false).await;

        let boot = controller.start_all().await.unwrap();
        assert_eq!(boot.started, vec!["wanted"]);
        assert_eq!(
            controller.registry().get_state("unwanted").await,
            Some(ModuleState::Loaded)
        );
    }

    #[tokio::test]
    async fn test_start_all_missing_core_is_fatal() {
        let (controller, _) = controller_with(&["platform"]);
        controller
            .registry()
            .load(descriptor("report", "1.0.0"), false)
            .await
            .unwrap();

        let result = controller.start_all().await;
        assert!(matches!(
            result,
            Err(RuntimeError::CoreModulesUnstartable(_))
        ));
    }

    #[tokio::test]
    async fn test_start_all_unstartable_mandatory_is_fatal() {
        let (controller, _) = controller_with(&[]);
        let mut vital = descriptor("vital", "1.0.0");
        vital.mandatory = true;
        vital.requires = vec![ModuleRequirement::new("org.ghost")];
        controller.registry().load(vital, false).await.unwrap();

        let result = controller.start_all().await;
        assert!(matches!(
            result,
            Err(RuntimeError::MandatoryModulesUnstartable(_))
        ));
    }

    #[tokio::test]
    async fn test_resolution_follows_started_modules() {
        let (controller, _) = controller_with(&[]);
        let mut base = descriptor("base", "1.0.0");
        base.provides = vec!["org.chips.base.Util".to_string()];
        controller.registry().load(base, false).await.unwrap();
        let mut report = descriptor("report", "1.0.0");
        report.requires = vec![ModuleRequirement::new("org.chips.base")];
        controller.registry().load(report, false).await.unwrap();

        controller.start("base").await.unwrap();
        controller.start("report").await.unwrap();

        let hit = controller
            .resolve("org.chips.base.Util", "report")
            .await
            .unwrap();
        assert_eq!(hit.provider, "base");

        // 停止后解析立即失效
        controller.stop("base", true).await.unwrap();
        assert!(controller
            .resolve("org.chips.base.Util", "report")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything_without_persisting() {
        let (controller, flags) = controller_with(&[]);
        let mut vital = descriptor("vital", "1.0.0");
        vital.mandatory = true;
        controller.registry().load(vital, false).await.unwrap();
        controller
            .registry()
            .load(descriptor("report", "1.0.0"), false)
            .await
            .unwrap();

        controller.start("vital").await.unwrap();
        controller.start("report").await.unwrap();

        controller.shutdown().await.unwrap();
        assert_eq!(
            controller.registry().get_state("vital").await,
            Some(ModuleState::Stopped)
        );
        assert_eq!(
            controller.registry().get_state("report").await,
            Some(ModuleState::Stopped)
        );
        // 关闭不改写期望状态，下次启动时两者仍是候选
        assert_eq!(flags.should_start("vital").await.unwrap(), Some(true));
        assert_eq!(flags.should_start("report").await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_unload_after_stop() {
        let (controller, _) = controller_with(&[]);
        controller
            .registry()
            .load(descriptor("report", "1.0.0"), false)
            .await
            .unwrap();
        controller.start("report").await.unwrap();

        assert!(controller.unload("report").await.is_err());

        controller.stop("report", false).await.unwrap();
        let record = controller.unload("report").await.unwrap();
        assert_eq!(record.state, ModuleState::Unloaded);
        assert!(!controller.registry().exists("report").await);
    }

    #[tokio::test]
    async fn test_events_published() {
        let (controller, _) = controller_with(&[]);
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        let controller = controller.with_event_publisher(Arc::new(move |event| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(format!("{:?}", event));
            })
        }));

        controller
            .registry()
            .load(descriptor("report", "1.0.0"), false)
            .await
            .unwrap();
        controller.start("report").await.unwrap();
        controller.stop("report", false).await.unwrap();
        controller.unload("report").await.unwrap();

        let seen = events.lock().unwrap();
        assert!(seen.iter().any(|e| e.contains("ModuleStarted")));
        assert!(seen.iter().any(|e| e.contains("ModuleStopped")));
        assert!(seen.iter().any(|e| e.contains("ModuleUnloaded")));
    }

    #[tokio::test]
    async fn test_hooks_invoked_in_order() {
        let (controller, _) = controller_with(&[]);
        let trace = Arc::new(std::sync::Mutex::new(Vec::new()));
        controller
            .activators
            .register(
                "traced",
                TraceActivator::factory(
                    trace.clone(),
                    "traced",
                    Arc::new(AtomicBool::new(false)),
                    Arc::new(AtomicBool::new(false)),
                ),
            )
            .await;

        let mut desc = descriptor("traced", "1.0.0");
        desc.activator = Some("traced".to_string());
        controller.registry().load(desc, false).await.unwrap();

        controller.start("traced").await.unwrap();
        controller.stop("traced", false).await.unwrap();

        let seen = trace.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "traced:will_start",
                "traced:started",
                "traced:will_stop",
                "traced:stopped",
            ]
        );
    }

    #[tokio::test]
    async fn test_unregistered_activator_fails_start() {
        let (controller, _) = controller_with(&[]);
        let mut desc = descriptor("orphan", "1.0.0");
        desc.activator = Some("missing-key".to_string());
        controller.registry().load(desc, false).await.unwrap();

        let result = controller.start("orphan").await;
        assert!(matches!(
            result,
            Err(RuntimeError::ActivatorNotRegistered(_))
        ));
        assert_eq!(
            controller.registry().get_state("orphan").await,
            Some(ModuleState::Loaded)
        );
    }

    #[tokio::test]
    async fn test_refresh_rebuilds_graph() {
        let (controller, _) = controller_with(&[]);
        let mut base = descriptor("base", "1.0.0");
        base.provides = vec!["Util".to_string()];
        controller.registry().load(base, false).await.unwrap();
        let mut report = descriptor("report", "1.0.0");
        report.requires = vec![ModuleRequirement::new("org.chips.base")];
        controller.registry().load(report, false).await.unwrap();

        controller.start("base").await.unwrap();
        controller.start("report").await.unwrap();
        assert!(controller.refresh().await.is_ok());
        assert_eq!(
            controller.resolve("Util", "report").await.unwrap().provider,
            "base"
        );
    }

    /// 使用空激活器的模块不需要注册任何工厂
    #[tokio::test]
    async fn test_noop_activator_default() {
        let _ = NoopActivator;
        let (controller, _) = controller_with(&[]);
        controller
            .registry()
            .load(descriptor("plain", "1.0.0"), false)
            .await
            .unwrap();
        controller.start("plain").await.unwrap();
    }
}
