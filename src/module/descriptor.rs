//! 模块描述符定义
//!
//! 定义模块描述文件 (module.yaml) 中的所有数据结构，
//! 以及注册表中对应的运行时记录与状态机。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::version;

/// 依赖声明
///
/// `version` 为版本下限表达式（支持通配符与区间），None 表示任意版本。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRequirement {
    /// 依赖的包名
    pub package: String,

    /// 版本下限表达式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ModuleRequirement {
    /// 创建新的依赖声明
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: None,
        }
    }

    /// 附加版本下限
    pub fn at_least(mut self, floor: impl Into<String>) -> Self {
        self.version = Some(floor.into());
        self
    }

    /// 检查给定版本是否满足该依赖
    pub fn is_satisfied_by(&self, found: &str) -> bool {
        match &self.version {
            Some(floor) => version::matches(found, floor),
            None => true,
        }
    }

    /// 人类可读的描述，用于错误与日志
    pub fn describe(&self) -> String {
        match &self.version {
            Some(floor) => format!("{} >= {}", self.package, floor),
            None => self.package.clone(),
        }
    }
}

/// 扩展声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionDecl {
    /// 扩展点 ID
    pub point_id: String,

    /// 媒介标签（可选，如 "html"、"cli"）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_tag: Option<String>,

    /// 实现引用（符号名）
    pub implementation: String,

    /// 排序提示，越小越靠前
    #[serde(default)]
    pub order: i32,
}

/// 库束声明
///
/// 随模块打包的库，其导出符号并入模块的本地解析集合。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryBundle {
    /// 库名
    pub name: String,

    /// 导出的符号列表
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// 模块描述符
///
/// 对应 module.yaml 文件中的配置。`requires` 保留声明顺序，
/// 符号解析按该顺序委托。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 模块唯一标识
    pub id: String,

    /// 模块显示名称
    #[serde(default)]
    pub name: String,

    /// 包名（依赖按包名引用）
    pub package_name: String,

    /// 模块版本（点分数字，可带限定符）
    pub version: String,

    /// 要求的宿主版本范围（可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_host_version: Option<String>,

    /// 必需依赖，按声明顺序
    #[serde(default)]
    pub requires: Vec<ModuleRequirement>,

    /// 知悉列表：仅为提示信息，不参与启动门限与符号解析
    #[serde(default)]
    pub aware_of: Vec<ModuleRequirement>,

    /// 本模块应先于这些模块 ID 启动
    #[serde(default)]
    pub start_before: Vec<String>,

    /// 是否为强制模块（无法启动则运行时启动失败，停止需显式覆盖）
    #[serde(default)]
    pub mandatory: bool,

    /// 激活器注册键（None 表示使用空激活器）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activator: Option<String>,

    /// 扩展声明
    #[serde(default)]
    pub extensions: Vec<ExtensionDecl>,

    /// 本模块提供的符号
    #[serde(default)]
    pub provides: Vec<String>,

    /// 随模块打包的库束
    #[serde(default)]
    pub libraries: Vec<LibraryBundle>,
}

impl ModuleDescriptor {
    /// 创建新的模块描述符
    pub fn new(
        id: impl Into<String>,
        package_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            package_name: package_name.into(),
            version: version.into(),
            require_host_version: None,
            requires: vec![],
            aware_of: vec![],
            start_before: vec![],
            mandatory: false,
            activator: None,
            extensions: vec![],
            provides: vec![],
            libraries: vec![],
        }
    }

    /// 验证描述符有效性，返回全部错误
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = vec![];

        if self.id.trim().is_empty() {
            errors.push("模块 ID 不能为空".to_string());
        }

        if self.package_name.trim().is_empty() {
            errors.push("包名不能为空".to_string());
        }

        if !version::is_well_formed(&self.version) {
            errors.push(format!("无效的版本号格式: {}", self.version));
        }

        let mut seen = std::collections::HashSet::new();
        for req in &self.requires {
            if req.package.trim().is_empty() {
                errors.push("依赖包名不能为空".to_string());
            }
            if req.package == self.package_name {
                errors.push(format!("模块不能依赖自身包: {}", req.package));
            }
            if !seen.insert(req.package.as_str()) {
                errors.push(format!("重复的依赖包: {}", req.package));
            }
        }

        for ext in &self.extensions {
            if ext.point_id.trim().is_empty() {
                errors.push("扩展点 ID 不能为空".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// 模块状态
///
/// 生命周期状态机：
/// Loaded -> Starting -> Started -> Stopping -> Stopped -> Unloaded。
/// 启动失败经 FailedStart 自动回滚到 Loaded。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// 已加载（描述符已登记，未启动）
    Loaded,
    /// 正在启动
    Starting,
    /// 已启动
    Started,
    /// 正在停止
    Stopping,
    /// 已停止
    Stopped,
    /// 启动失败（瞬态，随后回滚到 Loaded）
    FailedStart,
    /// 已卸载（记录即将移出注册表）
    Unloaded,
}

impl Default for ModuleState {
    fn default() -> Self {
        ModuleState::Loaded
    }
}

impl ModuleState {
    /// 是否可以启动
    pub fn can_start(&self) -> bool {
        matches!(self, ModuleState::Loaded)
    }

    /// 是否可以停止
    pub fn can_stop(&self) -> bool {
        matches!(self, ModuleState::Started | ModuleState::Starting)
    }

    /// 是否可以卸载
    pub fn can_unload(&self) -> bool {
        matches!(self, ModuleState::Loaded | ModuleState::Stopped)
    }

    /// 是否处于活动状态（占用解析图节点）
    pub fn is_active(&self) -> bool {
        matches!(self, ModuleState::Started)
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleState::Loaded => "loaded",
            ModuleState::Starting => "starting",
            ModuleState::Started => "started",
            ModuleState::Stopping => "stopping",
            ModuleState::Stopped => "stopped",
            ModuleState::FailedStart => "failed_start",
            ModuleState::Unloaded => "unloaded",
        };
        write!(f, "{}", s)
    }
}

/// 结构化故障记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFault {
    /// 错误码（见 utils::error::error_code）
    pub code: String,

    /// 错误消息
    pub message: String,
}

impl ModuleFault {
    /// 创建故障记录
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// 模块运行时记录
///
/// 解析图节点以模块 ID 为键挂在控制器的图中；
/// 不变式：节点存在当且仅当状态为 Started。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// 模块描述符
    pub descriptor: ModuleDescriptor,

    /// 当前状态
    pub state: ModuleState,

    /// 最后一次故障
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ModuleFault>,

    /// 最近一次启动失败的消息（启动成功后清除）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_error_message: Option<String>,

    /// 加载时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,

    /// 启动时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl ModuleRecord {
    /// 创建新的模块记录
    pub fn new(descriptor: ModuleDescriptor) -> Self {
        Self {
            descriptor,
            state: ModuleState::Loaded,
            last_error: None,
            startup_error_message: None,
            loaded_at: Some(Utc::now()),
            started_at: None,
        }
    }

    /// 获取模块 ID
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// 获取模块版本
    pub fn version(&self) -> &str {
        &self.descriptor.version
    }

    /// 获取包名
    pub fn package_name(&self) -> &str {
        &self.descriptor.package_name
    }

    /// 检查模块是否已启动
    pub fn is_started(&self) -> bool {
        self.state == ModuleState::Started
    }
}
