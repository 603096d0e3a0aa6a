//! 符号解析图
//!
//! 每个已启动模块对应一个解析图节点。节点持有本地符号集合
//! （模块自身提供的符号加上其库束的导出）以及按 `requires`
//! 声明顺序排列的委托目标（未启动的依赖不产生委托边），
//! 核心模块追加在末尾。
//!
//! 解析是带访问集的深度优先搜索：先查本地，再按声明顺序逐个
//! 委托，首个命中者胜出，保证菱形依赖的解析结果确定。图中的环
//! 通过访问集安全终止，绝不挂起。节点整体保存在以模块 ID 为键
//! 的 arena 中，生命周期由控制器统一管理，不存在节点间的所有权
//! 引用。

use std::collections::{HashMap, HashSet, VecDeque};

use crate::module::descriptor::ModuleDescriptor;
use crate::utils::{Result, RuntimeError};

/// 解析成功的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    /// 符号名
    pub symbol: String,

    /// 提供该符号的模块 ID
    pub provider: String,
}

/// 解析图节点
///
/// 节点在模块启动时构建一次，刷新时重建委托边。
#[derive(Debug, Clone)]
pub struct ResolutionNode {
    /// 所属模块 ID
    module_id: String,

    /// 本地符号集合
    local: HashSet<String>,

    /// 委托目标（模块 ID），按 requires 声明顺序，核心模块在后
    imports: Vec<String>,

    /// 已销毁标记：销毁后不再参与任何解析
    disposed: bool,
}

impl ResolutionNode {
    /// 所属模块 ID
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// 委托目标列表
    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    /// 是否已销毁
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

/// 符号解析图（arena）
#[derive(Debug, Default)]
pub struct ResolutionGraph {
    nodes: HashMap<String, ResolutionNode>,
}

impl ResolutionGraph {
    /// 创建空图
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// 为模块构建并挂载解析节点
    ///
    /// `provider_for` 把包名映射到已启动模块的 ID；未启动的依赖
    /// 返回 None，不产生委托边。核心模块追加在委托序列末尾。
    pub fn attach<F>(&mut self, descriptor: &ModuleDescriptor, provider_for: F, core_ids: &[String])
    where
        F: Fn(&str) -> Option<String>,
    {
        let local = Self::collect_local(descriptor);
        let imports = Self::build_imports(descriptor, &provider_for, core_ids);

        tracing::debug!(
            module_id = %descriptor.id,
            locals = local.len(),
            imports = ?imports,
            "解析节点已构建"
        );

        self.nodes.insert(
            descriptor.id.clone(),
            ResolutionNode {
                module_id: descriptor.id.clone(),
                local,
                imports,
                disposed: false,
            },
        );
    }

    /// 重建节点的委托边（刷新时调用），本地符号保持不变
    ///
    /// 节点不存在时返回 false。
    pub fn rebuild<F>(
        &mut self,
        descriptor: &ModuleDescriptor,
        provider_for: F,
        core_ids: &[String],
    ) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        let imports = Self::build_imports(descriptor, &provider_for, core_ids);
        match self.nodes.get_mut(&descriptor.id) {
            Some(node) if !node.disposed => {
                node.imports = imports;
                true
            }
            _ => false,
        }
    }

    fn collect_local(descriptor: &ModuleDescriptor) -> HashSet<String> {
        let mut local: HashSet<String> = descriptor.provides.iter().cloned().collect();
        for bundle in &descriptor.libraries {
            local.extend(bundle.symbols.iter().cloned());
        }
        local
    }

    fn build_imports<F>(
        descriptor: &ModuleDescriptor,
        provider_for: &F,
        core_ids: &[String],
    ) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut imports: Vec<String> = Vec::new();
        for req in &descriptor.requires {
            if let Some(provider) = provider_for(&req.package) {
                if provider != descriptor.id && !imports.contains(&provider) {
                    imports.push(provider);
                }
            }
        }
        for core in core_ids {
            if *core != descriptor.id && !imports.contains(core) {
                imports.push(core.clone());
            }
        }
        imports
    }

    /// 销毁节点：清空符号与委托边，保留墓碑防止继续解析
    pub fn dispose(&mut self, module_id: &str) {
        if let Some(node) = self.nodes.get_mut(module_id) {
            node.disposed = true;
            node.local.clear();
            node.imports.clear();
            tracing::debug!(module_id = %module_id, "解析节点已销毁");
        }
    }

    /// 从 arena 移除节点
    pub fn detach(&mut self, module_id: &str) -> bool {
        self.nodes.remove(module_id).is_some()
    }

    /// 节点是否存在（含已销毁的墓碑）
    pub fn contains(&self, module_id: &str) -> bool {
        self.nodes.contains_key(module_id)
    }

    /// 活动节点是否存在
    pub fn is_active(&self, module_id: &str) -> bool {
        self.nodes
            .get(module_id)
            .map(|n| !n.disposed)
            .unwrap_or(false)
    }

    /// 节点数量
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 获取节点
    pub fn node(&self, module_id: &str) -> Option<&ResolutionNode> {
        self.nodes.get(module_id)
    }

    /// 从请求方节点出发解析符号
    ///
    /// 失败返回类型化的 `SymbolNotFound` 错误，绝不 panic；
    /// 请求方节点缺失或已销毁同样视为未找到。
    pub fn resolve(&self, symbol: &str, requestor: &str) -> Result<ResolvedSymbol> {
        let mut visited = HashSet::new();
        match self.search(requestor, symbol, &mut visited) {
            Some(provider) => {
                // 命中的本地符号必须对请求方可见：
                // 提供方要能从请求方沿委托边到达
                if provider != requestor && !self.is_visible(&provider, requestor) {
                    tracing::warn!(
                        symbol = %symbol,
                        provider = %provider,
                        requestor = %requestor,
                        "符号命中但对请求方不可见"
                    );
                    return Err(RuntimeError::SymbolNotFound {
                        symbol: symbol.to_string(),
                        module_id: requestor.to_string(),
                    });
                }
                Ok(ResolvedSymbol {
                    symbol: symbol.to_string(),
                    provider,
                })
            }
            None => Err(RuntimeError::SymbolNotFound {
                symbol: symbol.to_string(),
                module_id: requestor.to_string(),
            }),
        }
    }

    /// 深度优先委托搜索。重复到达的节点直接视为未命中，
    /// 由调用方继续尝试其余分支。
    fn search(
        &self,
        node_id: &str,
        symbol: &str,
        visited: &mut HashSet<String>,
    ) -> Option<String> {
        let node = self.nodes.get(node_id)?;
        if node.disposed || !visited.insert(node_id.to_string()) {
            return None;
        }

        if node.local.contains(symbol) {
            return Some(node.module_id.clone());
        }

        for import in &node.imports {
            if let Some(provider) = self.search(import, symbol, visited) {
                return Some(provider);
            }
        }
        None
    }

    /// 可见性检查：owner 是否可从 requestor 沿委托边到达
    ///
    /// 防止符号在互不相关的模块之间泄漏。
    pub fn is_visible(&self, owner: &str, requestor: &str) -> bool {
        if owner == requestor {
            return true;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(requestor.to_string());
        seen.insert(requestor.to_string());

        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            if node.disposed {
                continue;
            }
            for import in &node.imports {
                if import == owner {
                    return true;
                }
                if seen.insert(import.clone()) {
                    queue.push_back(import.clone());
                }
            }
        }
        false
    }
}
