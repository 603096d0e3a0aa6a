//! 扩展点注册表
//!
//! 模块通过清单里的 `extensions` 声明向命名扩展点贡献实现。
//! 扩展点键为 `pointId` 或带媒体标签的 `pointId|tag`。注册表
//! 在模块启动时登记其全部贡献，停止时整体摘除。
//!
//! 同一扩展点下的贡献按 (order, 注册先后) 排序，保证枚举顺序
//! 稳定。查询未命中标签时回退到未打标签的贡献，反之亦然。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::module::descriptor::ModuleDescriptor;

/// 扩展点键的标签分隔符
const TAG_SEPARATOR: char = '|';

/// 扩展点上的一条贡献
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionBinding {
    /// 扩展点 ID
    pub point_id: String,

    /// 媒体标签（可选）
    pub media_tag: Option<String>,

    /// 贡献方模块 ID
    pub module_id: String,

    /// 实现标识（符号名或类路径，由宿主约定解释）
    pub implementation: String,

    /// 排序权重，小者在前
    pub order: i32,

    /// 注册序号，同权重时先注册者在前
    pub seq: u64,
}

impl ExtensionBinding {
    /// 完整的扩展点键
    pub fn key(&self) -> String {
        match &self.media_tag {
            Some(tag) => format!("{}{}{}", self.point_id, TAG_SEPARATOR, tag),
            None => self.point_id.clone(),
        }
    }
}

/// 扩展点注册表
///
/// 克隆共享同一份底层存储。
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    bindings: Arc<RwLock<HashMap<String, Vec<ExtensionBinding>>>>,
    next_seq: Arc<AtomicU64>,
}

impl ExtensionRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记模块清单中声明的全部扩展贡献
    pub async fn register_module(&self, descriptor: &ModuleDescriptor) {
        if descriptor.extensions.is_empty() {
            return;
        }

        let mut bindings = self.bindings.write().await;
        for decl in &descriptor.extensions {
            let binding = ExtensionBinding {
                point_id: decl.point_id.clone(),
                media_tag: decl.media_tag.clone(),
                module_id: descriptor.id.clone(),
                implementation: decl.implementation.clone(),
                order: decl.order,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            };

            tracing::debug!(
                point_id = %binding.point_id,
                module_id = %descriptor.id,
                implementation = %binding.implementation,
                "扩展贡献已登记"
            );

            let slot = bindings.entry(binding.key()).or_default();
            slot.push(binding);
            slot.sort_by_key(|b| (b.order, b.seq));
        }
    }

    /// 摘除某模块的全部扩展贡献，返回摘除数量
    pub async fn remove_module(&self, module_id: &str) -> usize {
        let mut bindings = self.bindings.write().await;
        let mut removed = 0;
        bindings.retain(|_, slot| {
            let before = slot.len();
            slot.retain(|b| b.module_id != module_id);
            removed += before - slot.len();
            !slot.is_empty()
        });

        if removed > 0 {
            tracing::debug!(module_id = %module_id, removed = removed, "扩展贡献已摘除");
        }
        removed
    }

    /// 查询扩展点的贡献列表
    ///
    /// 优先返回未打标签的贡献；若为空则汇总该扩展点所有带标签的
    /// 贡献作为回退，整体仍按 (order, seq) 排序。
    pub async fn get(&self, point_id: &str) -> Vec<ExtensionBinding> {
        let bindings = self.bindings.read().await;
        if let Some(slot) = bindings.get(point_id) {
            if !slot.is_empty() {
                return slot.clone();
            }
        }

        let prefix = format!("{}{}", point_id, TAG_SEPARATOR);
        let mut fallback: Vec<ExtensionBinding> = bindings
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .flat_map(|(_, slot)| slot.iter().cloned())
            .collect();
        fallback.sort_by_key(|b| (b.order, b.seq));
        fallback
    }

    /// 按媒体标签查询扩展点的贡献列表
    ///
    /// 精确标签无贡献时回退到 [`get`](Self::get) 的语义。
    pub async fn get_with_tag(&self, point_id: &str, media_tag: &str) -> Vec<ExtensionBinding> {
        {
            let bindings = self.bindings.read().await;
            let key = format!("{}{}{}", point_id, TAG_SEPARATOR, media_tag);
            if let Some(slot) = bindings.get(&key) {
                if !slot.is_empty() {
                    return slot.clone();
                }
            }
        }
        self.get(point_id).await
    }

    /// 当前登记的扩展点键数量
    pub async fn point_count(&self) -> usize {
        self.bindings.read().await.len()
    }

    /// 当前登记的贡献总数
    pub async fn binding_count(&self) -> usize {
        self.bindings.read().await.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::descriptor::ExtensionDecl;

    fn descriptor_with_extensions(id: &str, decls: Vec<ExtensionDecl>) -> ModuleDescriptor {
        let mut desc = ModuleDescriptor::new(id, &format!("org.chips.{}", id), "1.0.0");
        desc.extensions = decls;
        desc
    }

    fn decl(point_id: &str, tag: Option<&str>, implementation: &str, order: i32) -> ExtensionDecl {
        ExtensionDecl {
            point_id: point_id.to_string(),
            media_tag: tag.map(|t| t.to_string()),
            implementation: implementation.to_string(),
            order,
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ExtensionRegistry::new();
        registry
            .register_module(&descriptor_with_extensions(
                "report",
                vec![decl("admin.menu", None, "ReportMenu", 10)],
            ))
            .await;

        let found = registry.get("admin.menu").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].module_id, "report");
        assert_eq!(found[0].implementation, "ReportMenu");
    }

    #[tokio::test]
    async fn test_bindings_sorted_by_order_then_seq() {
        let registry = ExtensionRegistry::new();
        registry
            .register_module(&descriptor_with_extensions(
                "late-high",
                vec![decl("menu", None, "C", 20)],
            ))
            .await;
        registry
            .register_module(&descriptor_with_extensions(
                "first-low",
                vec![decl("menu", None, "A", 5)],
            ))
            .await;
        registry
            .register_module(&descriptor_with_extensions(
                "second-low",
                vec![decl("menu", None, "B", 5)],
            ))
            .await;

        let found = registry.get("menu").await;
        let impls: Vec<&str> = found.iter().map(|b| b.implementation.as_str()).collect();
        // 同 order 按注册先后排
        assert_eq!(impls, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_tagged_key_is_separate() {
        let registry = ExtensionRegistry::new();
        registry
            .register_module(&descriptor_with_extensions(
                "web",
                vec![
                    decl("render", Some("html"), "HtmlRenderer", 0),
                    decl("render", None, "PlainRenderer", 0),
                ],
            ))
            .await;

        let html = registry.get_with_tag("render", "html").await;
        assert_eq!(html.len(), 1);
        assert_eq!(html[0].implementation, "HtmlRenderer");

        let plain = registry.get("render").await;
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].implementation, "PlainRenderer");
    }

    #[tokio::test]
    async fn test_get_falls_back_to_tagged_bindings() {
        let registry = ExtensionRegistry::new();
        registry
            .register_module(&descriptor_with_extensions(
                "web",
                vec![
                    decl("render", Some("html"), "HtmlRenderer", 10),
                    decl("render", Some("pdf"), "PdfRenderer", 5),
                ],
            ))
            .await;

        // 未打标签的槽为空，回退汇总所有标签并统一排序
        let found = registry.get("render").await;
        let impls: Vec<&str> = found.iter().map(|b| b.implementation.as_str()).collect();
        assert_eq!(impls, vec!["PdfRenderer", "HtmlRenderer"]);
    }

    #[tokio::test]
    async fn test_get_with_tag_falls_back_to_untagged() {
        let registry = ExtensionRegistry::new();
        registry
            .register_module(&descriptor_with_extensions(
                "web",
                vec![decl("render", None, "PlainRenderer", 0)],
            ))
            .await;

        let found = registry.get_with_tag("render", "html").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].implementation, "PlainRenderer");
    }

    #[tokio::test]
    async fn test_remove_module() {
        let registry = ExtensionRegistry::new();
        registry
            .register_module(&descriptor_with_extensions(
                "report",
                vec![
                    decl("menu", None, "ReportMenu", 0),
                    decl("toolbar", Some("html"), "ReportToolbar", 0),
                ],
            ))
            .await;
        registry
            .register_module(&descriptor_with_extensions(
                "dashboard",
                vec![decl("menu", None, "DashboardMenu", 0)],
            ))
            .await;

        assert_eq!(registry.remove_module("report").await, 2);
        assert_eq!(registry.binding_count().await, 1);

        let menu = registry.get("menu").await;
        assert_eq!(menu.len(), 1);
        assert_eq!(menu[0].module_id, "dashboard");
        assert!(registry.get_with_tag("toolbar", "html").await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_point_is_empty() {
        let registry = ExtensionRegistry::new();
        assert!(registry.get("nothing.here").await.is_empty());
        assert!(registry.get_with_tag("nothing.here", "html").await.is_empty());
    }

    #[tokio::test]
    async fn test_clone_shares_storage() {
        let registry = ExtensionRegistry::new();
        let clone = registry.clone();
        registry
            .register_module(&descriptor_with_extensions(
                "report",
                vec![decl("menu", None, "ReportMenu", 0)],
            ))
            .await;

        assert_eq!(clone.binding_count().await, 1);
    }
}
