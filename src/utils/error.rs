//! 模块运行时错误类型定义
//!
//! 本模块定义了运行时中使用的所有错误类型。

use thiserror::Error;

/// 模块运行时核心错误类型
#[derive(Error, Debug)]
pub enum RuntimeError {
    // ==================== 注册表错误 ====================

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 同 ID 模块版本冲突（重复加载被拒绝）
    #[error("模块版本冲突: '{module_id}' 已存在版本 {existing}, 无法加载版本 {incoming}")]
    DuplicateModuleVersionConflict {
        /// 模块 ID
        module_id: String,
        /// 已加载的版本
        existing: String,
        /// 尝试加载的版本
        incoming: String,
    },

    /// 无效的模块清单
    #[error("无效的模块清单: {0}")]
    InvalidManifest(String),

    // ==================== 生命周期错误 ====================

    /// 模块启动失败
    #[error("模块启动失败: '{module_id}' - {reason}")]
    ModuleStartFailed {
        /// 模块 ID
        module_id: String,
        /// 失败原因
        reason: String,
    },

    /// 模块卸载被拒绝
    #[error("模块卸载被拒绝: '{module_id}' - {reason}")]
    ModuleUnloadRefused {
        /// 模块 ID
        module_id: String,
        /// 拒绝原因
        reason: String,
    },

    /// 版本不兼容
    #[error("版本不兼容: 模块 '{module_id}' 要求 {required}, 实际为 {found}")]
    VersionIncompatible {
        /// 模块 ID
        module_id: String,
        /// 要求的版本范围
        required: String,
        /// 实际版本
        found: String,
    },

    /// 缺少必需模块
    #[error("缺少必需模块: 模块 '{module_id}' 需要 {missing:?}")]
    MissingRequiredModule {
        /// 模块 ID
        module_id: String,
        /// 缺失的依赖描述列表
        missing: Vec<String>,
    },

    /// 启动顺序存在环或无法满足
    #[error("启动顺序无法满足: {0}")]
    CircularOrUnsatisfiableStartOrder(String),

    /// 强制模块无法启动（聚合所有失败项）
    #[error("强制模块无法启动: {0:?}")]
    MandatoryModulesUnstartable(Vec<String>),

    /// 核心模块无法启动（聚合所有失败项）
    #[error("核心模块无法启动: {0:?}")]
    CoreModulesUnstartable(Vec<String>),

    /// 强制模块拒绝停止
    #[error("强制模块拒绝停止: '{0}'")]
    MandatoryModuleStopRefused(String),

    // ==================== 激活器错误 ====================

    /// 激活器钩子执行失败
    #[error("激活器钩子执行失败: 模块 '{module_id}' 的 {hook} 钩子 - {reason}")]
    ActivatorHookFailed {
        /// 模块 ID
        module_id: String,
        /// 钩子名称
        hook: String,
        /// 失败原因
        reason: String,
    },

    /// 激活器未注册
    #[error("激活器未注册: '{0}'")]
    ActivatorNotRegistered(String),

    // ==================== 解析错误 ====================

    /// 符号未找到
    #[error("符号未找到: '{symbol}' (请求方模块 '{module_id}')")]
    SymbolNotFound {
        /// 符号名
        symbol: String,
        /// 请求方模块 ID
        module_id: String,
    },

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 运行时操作结果类型别名
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// 错误码常量
pub mod error_code {
    // 注册表错误 (REGISTRY-xxx)
    /// 模块未找到
    pub const REGISTRY_MODULE_NOT_FOUND: &str = "REGISTRY-001";
    /// 模块版本冲突
    pub const REGISTRY_VERSION_CONFLICT: &str = "REGISTRY-002";
    /// 清单无效
    pub const REGISTRY_INVALID_MANIFEST: &str = "REGISTRY-003";

    // 生命周期错误 (LIFECYCLE-xxx)
    /// 启动失败
    pub const LIFECYCLE_START_FAILED: &str = "LIFECYCLE-001";
    /// 卸载被拒绝
    pub const LIFECYCLE_UNLOAD_REFUSED: &str = "LIFECYCLE-002";
    /// 版本不兼容
    pub const LIFECYCLE_VERSION_INCOMPATIBLE: &str = "LIFECYCLE-003";
    /// 缺少必需模块
    pub const LIFECYCLE_MISSING_REQUIRED: &str = "LIFECYCLE-004";
    /// 启动顺序无法满足
    pub const LIFECYCLE_UNSATISFIABLE_ORDER: &str = "LIFECYCLE-005";
    /// 强制模块无法启动
    pub const LIFECYCLE_MANDATORY_UNSTARTABLE: &str = "LIFECYCLE-006";
    /// 核心模块无法启动
    pub const LIFECYCLE_CORE_UNSTARTABLE: &str = "LIFECYCLE-007";
    /// 强制模块拒绝停止
    pub const LIFECYCLE_MANDATORY_STOP_REFUSED: &str = "LIFECYCLE-008";

    // 激活器错误 (ACTIVATOR-xxx)
    /// 钩子执行失败
    pub const ACTIVATOR_HOOK_FAILED: &str = "ACTIVATOR-001";
    /// 激活器未注册
    pub const ACTIVATOR_NOT_REGISTERED: &str = "ACTIVATOR-002";

    // 解析错误 (RESOLVE-xxx)
    /// 符号未找到
    pub const RESOLVE_SYMBOL_NOT_FOUND: &str = "RESOLVE-001";

    // 配置错误 (CONFIG-xxx)
    /// 配置加载失败
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
}

impl RuntimeError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            RuntimeError::ModuleNotFound(_) => error_code::REGISTRY_MODULE_NOT_FOUND,
            RuntimeError::DuplicateModuleVersionConflict { .. } => {
                error_code::REGISTRY_VERSION_CONFLICT
            }
            RuntimeError::InvalidManifest(_) => error_code::REGISTRY_INVALID_MANIFEST,
            RuntimeError::ModuleStartFailed { .. } => error_code::LIFECYCLE_START_FAILED,
            RuntimeError::ModuleUnloadRefused { .. } => error_code::LIFECYCLE_UNLOAD_REFUSED,
            RuntimeError::VersionIncompatible { .. } => {
                error_code::LIFECYCLE_VERSION_INCOMPATIBLE
            }
            RuntimeError::MissingRequiredModule { .. } => error_code::LIFECYCLE_MISSING_REQUIRED,
            RuntimeError::CircularOrUnsatisfiableStartOrder(_) => {
                error_code::LIFECYCLE_UNSATISFIABLE_ORDER
            }
            RuntimeError::MandatoryModulesUnstartable(_) => {
                error_code::LIFECYCLE_MANDATORY_UNSTARTABLE
            }
            RuntimeError::CoreModulesUnstartable(_) => error_code::LIFECYCLE_CORE_UNSTARTABLE,
            RuntimeError::MandatoryModuleStopRefused(_) => {
                error_code::LIFECYCLE_MANDATORY_STOP_REFUSED
            }
            RuntimeError::ActivatorHookFailed { .. } => error_code::ACTIVATOR_HOOK_FAILED,
            RuntimeError::ActivatorNotRegistered(_) => error_code::ACTIVATOR_NOT_REGISTERED,
            RuntimeError::SymbolNotFound { .. } => error_code::RESOLVE_SYMBOL_NOT_FOUND,
            RuntimeError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            _ => "UNKNOWN",
        }
    }
}
