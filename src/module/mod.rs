//! 模块运行时核心
//!
//! 子模块划分：
//! - `descriptor`: 模块描述符与运行时记录
//! - `manifest`: module.yaml 清单解析
//! - `registry`: 模块注册表（加载、替换、查询、目录扫描）
//! - `planner`: 依赖规划器（启动顺序计算）
//! - `resolution`: 符号解析图
//! - `extension`: 扩展点注册表
//! - `activator`: 生命周期回调
//! - `settings`: 生命周期标志存储
//! - `lifecycle`: 生命周期控制器

pub mod activator;
pub mod descriptor;
pub mod extension;
pub mod lifecycle;
pub mod manifest;
pub mod planner;
pub mod registry;
pub mod resolution;
pub mod settings;

pub use activator::{ActivatorContext, ActivatorRegistry, ModuleActivator, NoopActivator};
pub use descriptor::{
    ExtensionDecl, LibraryBundle, ModuleDescriptor, ModuleFault, ModuleRecord, ModuleRequirement,
    ModuleState,
};
pub use extension::{ExtensionBinding, ExtensionRegistry};
pub use lifecycle::{BootReport, EventPublisher, LifecycleController, RuntimeEvent};
pub use manifest::ManifestParser;
pub use planner::{DependencyPlanner, StartPlan};
pub use registry::ModuleRegistry;
pub use resolution::{ResolutionGraph, ResolvedSymbol};
pub use settings::{LifecycleFlagStore, MemoryFlagStore};
