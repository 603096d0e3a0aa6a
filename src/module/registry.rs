//! 模块注册表
//!
//! 管理所有已登记的模块记录，提供加载、替换、查询、状态管理与目录扫描。
//! 加载只登记描述符，绝不触发启动；启动顺序由规划器决定，
//! 因此扫描/加载的先后不影响启动顺序。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::module::descriptor::{ModuleDescriptor, ModuleFault, ModuleRecord, ModuleState};
use crate::module::manifest::ManifestParser;
use crate::utils::{version, Result, RuntimeError};

/// 默认的模块清单文件名
const MODULE_MANIFEST_FILENAME: &str = "module.yaml";

/// 模块注册表
///
/// 记录以模块 ID 为键。依赖者关系不在表中存储，
/// 始终通过扫描快照按包名推导。
#[derive(Debug)]
pub struct ModuleRegistry {
    /// 已登记的模块：module_id -> ModuleRecord
    records: Arc<RwLock<HashMap<String, ModuleRecord>>>,

    /// 模块仓库目录路径列表
    module_dirs: Vec<PathBuf>,
}

impl ModuleRegistry {
    /// 创建新的模块注册表
    pub fn new(module_dirs: Vec<PathBuf>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            module_dirs,
        }
    }

    /// 创建带有默认配置的注册表
    pub fn with_defaults() -> Self {
        Self::new(vec![PathBuf::from("./modules")])
    }

    /// 扫描所有模块仓库目录，发现并加载模块
    ///
    /// 查找每个仓库目录下包含 module.yaml 的子目录，逐个解析加载。
    /// 单个清单失败只记录警告，扫描继续。返回成功加载的模块 ID 列表。
    pub async fn scan(&self) -> Result<Vec<String>> {
        let mut loaded_ids = Vec::new();

        for dir in &self.module_dirs {
            if !dir.exists() {
                tracing::debug!("模块目录不存在，跳过: {:?}", dir);
                continue;
            }

            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("无法读取模块目录 {:?}: {}", dir, e);
                    continue;
                }
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();

                if !path.is_dir() {
                    continue;
                }

                let manifest_path = path.join(MODULE_MANIFEST_FILENAME);
                if !manifest_path.exists() {
                    tracing::trace!("目录 {:?} 中未找到 module.yaml，跳过", path);
                    continue;
                }

                match self.load_from_path(&path).await {
                    Ok(module_id) => {
                        tracing::info!(
                            module_id = %module_id,
                            "成功加载模块 (路径: {:?})", path
                        );
                        loaded_ids.push(module_id);
                    }
                    Err(e) => {
                        tracing::warn!("加载模块失败 {:?}: {}", path, e);
                    }
                }
            }
        }

        Ok(loaded_ids)
    }

    /// 从模块根目录加载模块（目录中需包含 module.yaml）
    pub async fn load_from_path(&self, module_path: &Path) -> Result<String> {
        let manifest_path = module_path.join(MODULE_MANIFEST_FILENAME);
        let descriptor = ManifestParser::parse_file(&manifest_path).await?;
        self.load(descriptor, false).await
    }

    /// 加载模块描述符，返回模块 ID
    ///
    /// 同 ID 重复加载的规则：
    /// - 新版本严格更新时替换旧记录；
    /// - 版本相同且 `replace` 为 true 时替换；
    /// - 其余情况拒绝，返回 `DuplicateModuleVersionConflict`。
    ///
    /// 旧记录处于活动状态（Started/Starting/Stopping）时拒绝替换，
    /// 必须先停止。加载本身绝不启动模块。
    pub async fn load(&self, descriptor: ModuleDescriptor, replace: bool) -> Result<String> {
        descriptor
            .validate()
            .map_err(|errors| RuntimeError::InvalidManifest(errors.join("; ")))?;

        let module_id = descriptor.id.clone();
        let mut records = self.records.write().await;

        if let Some(existing) = records.get(&module_id) {
            if !existing.state.can_unload() {
                return Err(RuntimeError::ModuleUnloadRefused {
                    module_id,
                    reason: format!(
                        "模块处于 {} 状态，无法替换，请先停止",
                        existing.state
                    ),
                });
            }

            let cmp = version::compare_with_qualifier(&descriptor.version, existing.version());
            let allowed = match cmp {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => replace,
                std::cmp::Ordering::Less => false,
            };
            if !allowed {
                return Err(RuntimeError::DuplicateModuleVersionConflict {
                    module_id,
                    existing: existing.version().to_string(),
                    incoming: descriptor.version,
                });
            }
            tracing::info!(
                module_id = %module_id,
                old_version = %existing.version(),
                new_version = %descriptor.version,
                "替换已加载的模块"
            );
        }

        records.insert(module_id.clone(), ModuleRecord::new(descriptor));
        tracing::debug!(module_id = %module_id, "模块已登记");
        Ok(module_id)
    }

    /// 移除模块记录
    ///
    /// 仅允许移除处于 Loaded/Stopped 状态的模块。
    pub async fn remove(&self, module_id: &str) -> Result<ModuleRecord> {
        let mut records = self.records.write().await;

        match records.get(module_id) {
            Some(record) if !record.state.can_unload() => Err(RuntimeError::ModuleUnloadRefused {
                module_id: module_id.to_string(),
                reason: format!("模块处于 {} 状态，无法卸载", record.state),
            }),
            Some(_) => {
                let mut record = records
                    .remove(module_id)
                    .ok_or_else(|| RuntimeError::ModuleNotFound(module_id.to_string()))?;
                record.state = ModuleState::Unloaded;
                tracing::debug!(module_id = %module_id, "模块已移出注册表");
                Ok(record)
            }
            None => Err(RuntimeError::ModuleNotFound(module_id.to_string())),
        }
    }

    /// 获取模块记录（拷贝）
    pub async fn get(&self, module_id: &str) -> Option<ModuleRecord> {
        let records = self.records.read().await;
        records.get(module_id).cloned()
    }

    /// 获取模块状态
    pub async fn get_state(&self, module_id: &str) -> Option<ModuleState> {
        let records = self.records.read().await;
        records.get(module_id).map(|r| r.state)
    }

    /// 设置模块状态，维护时间戳
    pub async fn set_state(&self, module_id: &str, state: ModuleState) -> Result<()> {
        let mut records = self.records.write().await;

        let record = records
            .get_mut(module_id)
            .ok_or_else(|| RuntimeError::ModuleNotFound(module_id.to_string()))?;

        record.state = state;
        if state == ModuleState::Started {
            record.started_at = Some(Utc::now());
        }

        tracing::trace!(module_id = %module_id, state = %state, "模块状态更新");
        Ok(())
    }

    /// 记录模块故障与启动失败消息
    pub async fn set_fault(
        &self,
        module_id: &str,
        fault: ModuleFault,
        startup_message: Option<String>,
    ) -> Result<()> {
        let mut records = self.records.write().await;

        let record = records
            .get_mut(module_id)
            .ok_or_else(|| RuntimeError::ModuleNotFound(module_id.to_string()))?;

        record.last_error = Some(fault);
        if startup_message.is_some() {
            record.startup_error_message = startup_message;
        }
        Ok(())
    }

    /// 仅设置启动失败消息（模块仍可能处于 Loaded 状态）
    pub async fn set_startup_message(&self, module_id: &str, message: String) -> Result<()> {
        let mut records = self.records.write().await;

        let record = records
            .get_mut(module_id)
            .ok_or_else(|| RuntimeError::ModuleNotFound(module_id.to_string()))?;

        record.startup_error_message = Some(message);
        Ok(())
    }

    /// 清除故障记录（启动成功后调用）
    pub async fn clear_fault(&self, module_id: &str) -> Result<()> {
        let mut records = self.records.write().await;

        let record = records
            .get_mut(module_id)
            .ok_or_else(|| RuntimeError::ModuleNotFound(module_id.to_string()))?;

        record.last_error = None;
        record.startup_error_message = None;
        Ok(())
    }

    /// 检查模块是否存在
    pub async fn exists(&self, module_id: &str) -> bool {
        let records = self.records.read().await;
        records.contains_key(module_id)
    }

    /// 获取全部模块记录的快照（读时拷贝）
    pub async fn snapshot(&self) -> Vec<ModuleRecord> {
        let records = self.records.read().await;
        records.values().cloned().collect()
    }

    /// 按条件查找模块
    pub async fn find_modules<F>(&self, predicate: F) -> Vec<ModuleRecord>
    where
        F: Fn(&ModuleRecord) -> bool,
    {
        let records = self.records.read().await;
        records.values().filter(|r| predicate(r)).cloned().collect()
    }

    /// 按状态查找模块
    pub async fn find_by_state(&self, state: ModuleState) -> Vec<ModuleRecord> {
        self.find_modules(|r| r.state == state).await
    }

    /// 获取已启动的模块列表
    pub async fn started_modules(&self) -> Vec<ModuleRecord> {
        self.find_by_state(ModuleState::Started).await
    }

    /// 在已启动模块中按包名查找
    pub async fn started_by_package(&self, package: &str) -> Option<ModuleRecord> {
        let records = self.records.read().await;
        records
            .values()
            .find(|r| r.is_started() && r.package_name() == package)
            .cloned()
    }

    /// 获取已登记模块数量
    pub async fn count(&self) -> usize {
        let records = self.records.read().await;
        records.len()
    }

    /// 获取所有模块 ID
    pub async fn all_ids(&self) -> Vec<String> {
        let records = self.records.read().await;
        records.keys().cloned().collect()
    }

    /// 获取模块仓库目录列表
    pub fn module_dirs(&self) -> &[PathBuf] {
        &self.module_dirs
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Clone for ModuleRegistry {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            module_dirs: self.module_dirs.clone(),
        }
    }
}
