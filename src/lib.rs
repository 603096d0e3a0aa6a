//! # Chips Module Runtime - 薯片模块运行时
//!
//! 薯片模块运行时是一个进程内的模块宿主，提供以下核心功能：
//!
//! - **模块注册表**: module.yaml 清单解析、版本化加载与目录扫描
//! - **依赖规划**: 按 requires/start_before 计算确定性的启动顺序
//! - **符号解析图**: 按声明顺序委托的深度优先符号解析
//! - **扩展点**: 模块向命名扩展点贡献实现，启停自动登记与摘除
//! - **生命周期控制**: 启动回滚、依赖者级联停止、强制模块保护
//! - **日志系统**: 结构化日志记录
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_module_runtime::{
//!     ActivatorRegistry, LifecycleController, MemoryFlagStore, ModuleRegistry, RuntimeConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RuntimeConfig::builder()
//!         .host_version("2.0.0")
//!         .module_dir("./modules")
//!         .build();
//!
//!     let registry = ModuleRegistry::new(config.module_dirs.clone());
//!     registry.scan().await?;
//!
//!     let controller = LifecycleController::new(
//!         registry,
//!         ActivatorRegistry::new(),
//!         Arc::new(MemoryFlagStore::new()),
//!         &config,
//!     );
//!     let report = controller.start_all().await?;
//!     println!("已启动 {} 个模块", report.started.len());
//!
//!     controller.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 注册表、规划器、解析图与生命周期控制
//! - `utils` - 版本比较、错误类型与日志工具
//! - `config` - 运行时配置

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    ActivatorContext, ActivatorRegistry, BootReport, DependencyPlanner, EventPublisher,
    ExtensionBinding, ExtensionDecl, ExtensionRegistry, LibraryBundle, LifecycleController,
    LifecycleFlagStore, ManifestParser, MemoryFlagStore, ModuleActivator, ModuleDescriptor,
    ModuleFault, ModuleRecord, ModuleRegistry, ModuleRequirement, ModuleState, NoopActivator,
    ResolutionGraph, ResolvedSymbol, RuntimeEvent, StartPlan,
};

pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, Result, RuntimeError};

pub use config::{LogConfig, RuntimeConfig, RuntimeConfigBuilder};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
