//! 依赖规划器
//!
//! 计算一批待启动模块的启动顺序。这不是完整的拓扑排序：
//! 采用反复扫描的不动点算法，每一轮把「全部依赖已被计划内模块
//! 以足够版本满足」的模块追加到顺序末尾，直到一轮没有任何进展。
//! 留下的模块连同缺失的具体依赖一起报告，绝不让单个坏模块
//! 饿死其余模块。

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::module::descriptor::{ModuleRecord, ModuleRequirement};
use crate::utils::{Result, RuntimeError};

/// 启动计划
#[derive(Debug, Clone, Default)]
pub struct StartPlan {
    /// 启动顺序（模块 ID）
    pub order: Vec<String>,

    /// 无法启动的模块及其缺失的依赖
    pub unstartable: BTreeMap<String, Vec<ModuleRequirement>>,
}

impl StartPlan {
    /// 计划是否覆盖了全部候选模块
    pub fn is_fully_startable(&self) -> bool {
        self.unstartable.is_empty()
    }
}

/// 依赖规划器
///
/// 核心模块永远排在计划最前（按配置顺序），视为宿主的一部分，
/// 不参与依赖判定。
#[derive(Debug, Clone, Default)]
pub struct DependencyPlanner {
    /// 核心模块 ID，按启动顺序
    core_modules: Vec<String>,
}

impl DependencyPlanner {
    /// 创建规划器
    pub fn new(core_modules: Vec<String>) -> Self {
        Self { core_modules }
    }

    /// 核心模块 ID 列表
    pub fn core_modules(&self) -> &[String] {
        &self.core_modules
    }

    /// 判断给定 ID 是否为核心模块
    pub fn is_core(&self, module_id: &str) -> bool {
        self.core_modules.iter().any(|id| id == module_id)
    }

    /// 为候选模块计算启动计划
    ///
    /// 候选模块按 ID 排序后参与不动点扫描，保证计划与注册表
    /// 迭代顺序（以及加载顺序）无关。`start_before` 在不动点之后
    /// 作为二次重排处理；与 `requires` 冲突时返回
    /// `CircularOrUnsatisfiableStartOrder`，绝不静默丢弃。
    pub fn plan(&self, candidates: &[ModuleRecord]) -> Result<StartPlan> {
        let by_id: HashMap<&str, &ModuleRecord> =
            candidates.iter().map(|r| (r.id(), r)).collect();

        let mut order: Vec<String> = Vec::new();
        // 计划内已“启动”的包 -> 版本
        let mut planned: HashMap<String, String> = HashMap::new();
        let mut placed: HashSet<&str> = HashSet::new();

        // 核心模块先行，按配置顺序
        for core_id in &self.core_modules {
            if let Some(record) = by_id.get(core_id.as_str()) {
                order.push(record.id().to_string());
                planned.insert(record.package_name().to_string(), record.version().to_string());
                placed.insert(record.id());
            }
        }

        // 其余候选按 ID 排序，保证确定性
        let mut remaining: Vec<&ModuleRecord> = candidates
            .iter()
            .filter(|r| !placed.contains(r.id()))
            .collect();
        remaining.sort_by(|a, b| a.id().cmp(b.id()));

        // 不动点扫描
        loop {
            let mut progressed = false;

            remaining.retain(|record| {
                let satisfied = record
                    .descriptor
                    .requires
                    .iter()
                    .all(|req| Self::is_planned(&planned, req));
                if satisfied {
                    order.push(record.id().to_string());
                    planned.insert(
                        record.package_name().to_string(),
                        record.version().to_string(),
                    );
                    progressed = true;
                    false
                } else {
                    true
                }
            });

            if !progressed {
                break;
            }
        }

        // 留下的模块记录具体缺了什么
        let mut unstartable = BTreeMap::new();
        for record in &remaining {
            let missing: Vec<ModuleRequirement> = record
                .descriptor
                .requires
                .iter()
                .filter(|req| !Self::is_planned(&planned, req))
                .cloned()
                .collect();
            tracing::debug!(
                module_id = %record.id(),
                missing = ?missing.iter().map(|m| m.describe()).collect::<Vec<_>>(),
                "模块缺少依赖，无法进入启动计划"
            );
            unstartable.insert(record.id().to_string(), missing);
        }

        let order = self.apply_start_before(order, &by_id)?;

        Ok(StartPlan { order, unstartable })
    }

    /// 检查依赖是否被计划内的模块满足
    fn is_planned(planned: &HashMap<String, String>, req: &ModuleRequirement) -> bool {
        planned
            .get(&req.package)
            .map(|found| req.is_satisfied_by(found))
            .unwrap_or(false)
    }

    /// `start_before` 二次重排
    ///
    /// 把声明方移到目标模块之前，除非这会破坏它自身的 `requires`
    /// 边（依赖提供方必须仍在它前面）。迭代有界，互相指向对方的
    /// 声明视为配置错误。
    fn apply_start_before(
        &self,
        mut order: Vec<String>,
        by_id: &HashMap<&str, &ModuleRecord>,
    ) -> Result<Vec<String>> {
        let max_rounds = order.len() * order.len() + 1;

        for _ in 0..max_rounds {
            let mut moved = false;

            'scan: for idx in 0..order.len() {
                let module_id = order[idx].clone();
                let Some(record) = by_id.get(module_id.as_str()) else {
                    continue;
                };

                for target in &record.descriptor.start_before {
                    let Some(target_pos) = order.iter().position(|id| id == target) else {
                        continue;
                    };
                    if target_pos >= idx {
                        continue;
                    }

                    if self.is_core(target) && !self.is_core(&module_id) {
                        return Err(RuntimeError::CircularOrUnsatisfiableStartOrder(format!(
                            "模块 '{}' 声明先于核心模块 '{}' 启动",
                            module_id, target
                        )));
                    }

                    // 依赖提供方必须仍在新位置之前
                    let provider_limit =
                        Self::latest_provider_position(&order, record, by_id);
                    if let Some(limit) = provider_limit {
                        if limit >= target_pos {
                            return Err(RuntimeError::CircularOrUnsatisfiableStartOrder(
                                format!(
                                    "模块 '{}' 声明先于 '{}' 启动，但其依赖必须先启动",
                                    module_id, target
                                ),
                            ));
                        }
                    }

                    order.remove(idx);
                    order.insert(target_pos, module_id.clone());
                    moved = true;
                    break 'scan;
                }
            }

            if !moved {
                return Ok(order);
            }
        }

        Err(RuntimeError::CircularOrUnsatisfiableStartOrder(
            "start_before 声明之间存在环".to_string(),
        ))
    }

    /// 计划中满足该模块依赖的提供方的最靠后位置
    fn latest_provider_position(
        order: &[String],
        record: &ModuleRecord,
        by_id: &HashMap<&str, &ModuleRecord>,
    ) -> Option<usize> {
        let mut latest = None;
        for req in &record.descriptor.requires {
            for (pos, id) in order.iter().enumerate() {
                let Some(candidate) = by_id.get(id.as_str()) else {
                    continue;
                };
                if candidate.package_name() == req.package
                    && req.is_satisfied_by(candidate.version())
                {
                    latest = Some(latest.map_or(pos, |l: usize| l.max(pos)));
                }
            }
        }
        latest
    }

    /// 聚合检查：计划外的强制/核心模块
    ///
    /// `settings_mandatory` 为设置层标记的强制模块 ID 集合，
    /// 与描述符的 mandatory 标记取并集。核心缺失优先报告，
    /// 错误中列出每一个受影响的模块及版本。
    pub fn check_mandatory(
        &self,
        plan: &StartPlan,
        candidates: &[ModuleRecord],
        settings_mandatory: &HashSet<String>,
    ) -> Result<()> {
        let planned: HashSet<&str> = plan.order.iter().map(|s| s.as_str()).collect();

        let mut core_missing: Vec<String> = Vec::new();
        for core_id in &self.core_modules {
            if planned.contains(core_id.as_str()) {
                continue;
            }
            match candidates.iter().find(|r| r.id() == core_id) {
                Some(record) => {
                    core_missing.push(format!("{}@{}", record.id(), record.version()))
                }
                None => core_missing.push(format!("{} (未加载)", core_id)),
            }
        }
        if !core_missing.is_empty() {
            return Err(RuntimeError::CoreModulesUnstartable(core_missing));
        }

        let mut mandatory_missing: Vec<String> = candidates
            .iter()
            .filter(|r| {
                (r.descriptor.mandatory || settings_mandatory.contains(r.id()))
                    && !planned.contains(r.id())
            })
            .map(|r| format!("{}@{}", r.id(), r.version()))
            .collect();
        if !mandatory_missing.is_empty() {
            mandatory_missing.sort();
            return Err(RuntimeError::MandatoryModulesUnstartable(mandatory_missing));
        }

        Ok(())
    }
}
