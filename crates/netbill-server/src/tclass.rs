//! Traffic classification
//!
//! Maps peer IPv4 addresses to priced traffic classes through a balanced
//! binary search tree over disjoint `[start, end]` spans. The tree is
//! immutable once built; reloads construct a fresh tree and swap it in,
//! so a rejected configuration leaves the previous tree serving.

pub mod protocols;

pub use protocols::ProtocolClassifier;

use crate::config::ClassConfig;
use crate::error::CoreError;
use crate::iprange::{self, IpSpan};
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// One `[start, end] -> class` triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSpan {
    pub span: IpSpan,
    pub class: String,
}

#[derive(Debug)]
struct TreeNode {
    span: IpSpan,
    class: String,
    left: Option<Box<TreeNode>>,
    right: Option<Box<TreeNode>>,
}

/// Immutable classification tree
#[derive(Debug, Default)]
pub struct ClassTree {
    root: Option<Box<TreeNode>>,
    span_count: usize,
}

impl ClassTree {
    /// Build a balanced tree from class spans.
    ///
    /// Spans are sorted by start address; any overlap across the whole set
    /// is a configuration error naming both offending spans.
    pub fn build(mut spans: Vec<ClassSpan>) -> Result<ClassTree, CoreError> {
        spans.sort_by_key(|s| s.span.start);

        for pair in spans.windows(2) {
            if pair[1].span.start <= pair[0].span.end {
                return Err(CoreError::Overlap {
                    first: format!(
                        "{} [{} - {}]",
                        pair[0].class,
                        iprange::u32_to_ip(pair[0].span.start),
                        iprange::u32_to_ip(pair[0].span.end)
                    ),
                    second: format!(
                        "{} [{} - {}]",
                        pair[1].class,
                        iprange::u32_to_ip(pair[1].span.start),
                        iprange::u32_to_ip(pair[1].span.end)
                    ),
                });
            }
        }

        let span_count = spans.len();
        let root = Self::build_node(&spans);
        Ok(ClassTree { root, span_count })
    }

    fn build_node(spans: &[ClassSpan]) -> Option<Box<TreeNode>> {
        if spans.is_empty() {
            return None;
        }
        let mid = (spans.len() - 1) / 2;
        Some(Box::new(TreeNode {
            span: spans[mid].span,
            class: spans[mid].class.clone(),
            left: Self::build_node(&spans[..mid]),
            right: Self::build_node(&spans[mid + 1..]),
        }))
    }

    /// Classify an address; `None` when no span contains it
    pub fn classify(&self, ip: Ipv4Addr) -> Option<&str> {
        let ip = iprange::ip_to_u32(ip);
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            if ip < n.span.start {
                node = n.left.as_deref();
            } else if ip > n.span.end {
                node = n.right.as_deref();
            } else {
                return Some(&n.class);
            }
        }
        None
    }

    pub fn span_count(&self) -> usize {
        self.span_count
    }

    fn height(node: Option<&TreeNode>) -> usize {
        match node {
            None => 0,
            Some(n) => {
                1 + Self::height(n.left.as_deref()).max(Self::height(n.right.as_deref()))
            }
        }
    }

    fn collect(node: Option<&TreeNode>, out: &mut Vec<ClassSpan>) {
        if let Some(n) = node {
            Self::collect(n.left.as_deref(), out);
            out.push(ClassSpan {
                span: n.span,
                class: n.class.clone(),
            });
            Self::collect(n.right.as_deref(), out);
        }
    }

    /// All spans in ascending start order
    pub fn spans(&self) -> Vec<ClassSpan> {
        let mut out = Vec::with_capacity(self.span_count);
        Self::collect(self.root.as_deref(), &mut out);
        out
    }
}

/// Classification outcome with class pricing
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub class: String,
    pub cost_in: f64,
    pub cost_out: f64,
    pub found: bool,
}

/// Tree statistics for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct TreeStats {
    pub spans: usize,
    pub height: usize,
    pub classes: usize,
}

/// Traffic classification service
///
/// Readers take an `Arc` snapshot of the current tree; `load` swaps the
/// snapshot only after the replacement built successfully.
pub struct TclassService {
    inner: RwLock<Inner>,
    default_class: String,
}

struct Inner {
    tree: Arc<ClassTree>,
    classes: HashMap<String, ClassConfig>,
}

impl TclassService {
    pub fn new(default_class: &str) -> Self {
        TclassService {
            inner: RwLock::new(Inner {
                tree: Arc::new(ClassTree::default()),
                classes: HashMap::new(),
            }),
            default_class: default_class.to_string(),
        }
    }

    /// Replace the classification set; the previous tree stays active on error
    pub async fn load(&self, classes: Vec<ClassConfig>) -> Result<(), CoreError> {
        let spans = Self::flatten(&classes)?;
        let tree = ClassTree::build(spans)?;

        let class_map = classes
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();

        let mut inner = self.inner.write().await;
        inner.tree = Arc::new(tree);
        inner.classes = class_map;
        info!(classes = inner.classes.len(), "Traffic classes loaded");
        Ok(())
    }

    fn flatten(classes: &[ClassConfig]) -> Result<Vec<ClassSpan>, CoreError> {
        let mut spans = Vec::new();
        for class in classes {
            if class.cost_in < 0.0 || class.cost_out < 0.0 {
                return Err(CoreError::Input(format!(
                    "negative cost in class {}",
                    class.name
                )));
            }
            for network in &class.networks {
                spans.push(ClassSpan {
                    span: iprange::parse_range(network)?,
                    class: class.name.clone(),
                });
            }
        }
        Ok(spans)
    }

    /// Current tree snapshot
    pub async fn tree(&self) -> Arc<ClassTree> {
        self.inner.read().await.tree.clone()
    }

    /// Classify an address, falling back to the configured default class
    pub async fn classify(&self, ip: Ipv4Addr) -> String {
        let inner = self.inner.read().await;
        inner
            .tree
            .classify(ip)
            .map(str::to_string)
            .unwrap_or_else(|| self.default_class.clone())
    }

    /// Classify with class pricing attached
    pub async fn classify_detailed(&self, ip: Ipv4Addr) -> ClassificationResult {
        let inner = self.inner.read().await;
        match inner.tree.classify(ip) {
            Some(name) => {
                let (cost_in, cost_out) = inner
                    .classes
                    .get(name)
                    .map(|c| (c.cost_in, c.cost_out))
                    .unwrap_or((0.0, 0.0));
                ClassificationResult {
                    class: name.to_string(),
                    cost_in,
                    cost_out,
                    found: true,
                }
            }
            None => ClassificationResult {
                class: self.default_class.clone(),
                cost_in: 0.0,
                cost_out: 0.0,
                found: false,
            },
        }
    }

    /// All configured classes
    pub async fn classes(&self) -> Vec<ClassConfig> {
        let inner = self.inner.read().await;
        let mut classes: Vec<ClassConfig> = inner.classes.values().cloned().collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        classes
    }

    /// Add or replace one class, rebuilding the tree; rolls back on overlap
    pub async fn add_class(&self, class: ClassConfig) -> Result<(), CoreError> {
        let mut inner = self.inner.write().await;
        let mut classes: Vec<ClassConfig> = inner
            .classes
            .values()
            .filter(|c| c.name != class.name)
            .cloned()
            .collect();
        classes.push(class.clone());

        let tree = ClassTree::build(Self::flatten(&classes)?)?;
        inner.tree = Arc::new(tree);
        inner.classes.insert(class.name.clone(), class);
        Ok(())
    }

    /// Remove a class, rebuilding the tree
    pub async fn remove_class(&self, name: &str) -> Result<(), CoreError> {
        let mut inner = self.inner.write().await;
        if !inner.classes.contains_key(name) {
            return Err(CoreError::NotFound(format!("class {}", name)));
        }

        let classes: Vec<ClassConfig> = inner
            .classes
            .values()
            .filter(|c| c.name != name)
            .cloned()
            .collect();

        let tree = ClassTree::build(Self::flatten(&classes)?)?;
        inner.tree = Arc::new(tree);
        inner.classes.remove(name);
        Ok(())
    }

    pub async fn stats(&self) -> TreeStats {
        let inner = self.inner.read().await;
        TreeStats {
            spans: inner.tree.span_count(),
            height: ClassTree::height(inner.tree.root.as_deref()),
            classes: inner.classes.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str, networks: &[&str]) -> ClassConfig {
        ClassConfig {
            name: name.to_string(),
            networks: networks.iter().map(|s| s.to_string()).collect(),
            priority: 0,
            cost_in: 0.0,
            cost_out: 0.0,
        }
    }

    fn build(classes: &[ClassConfig]) -> Result<ClassTree, CoreError> {
        ClassTree::build(TclassService::flatten(classes).unwrap())
    }

    #[test]
    fn test_classify_basic() {
        let tree = build(&[
            class("local", &["10.0.0.0/8"]),
            class("cdn", &["8.8.8.0/24"]),
        ])
        .unwrap();

        assert_eq!(tree.classify(Ipv4Addr::new(10, 1, 2, 3)), Some("local"));
        assert_eq!(tree.classify(Ipv4Addr::new(8, 8, 8, 8)), Some("cdn"));
        assert_eq!(tree.classify(Ipv4Addr::new(1, 1, 1, 1)), None);
    }

    #[test]
    fn test_span_boundaries() {
        let tree = build(&[class("corp", &["172.16.10.0/24"])]).unwrap();

        assert_eq!(tree.classify(Ipv4Addr::new(172, 16, 10, 0)), Some("corp"));
        assert_eq!(tree.classify(Ipv4Addr::new(172, 16, 10, 255)), Some("corp"));
        assert_eq!(tree.classify(Ipv4Addr::new(172, 16, 9, 255)), None);
        assert_eq!(tree.classify(Ipv4Addr::new(172, 16, 11, 0)), None);
    }

    #[test]
    fn test_address_space_edges() {
        let tree = build(&[
            class("zero", &["0.0.0.0"]),
            class("top", &["255.255.255.255"]),
        ])
        .unwrap();

        assert_eq!(tree.classify(Ipv4Addr::new(0, 0, 0, 0)), Some("zero"));
        assert_eq!(
            tree.classify(Ipv4Addr::new(255, 255, 255, 255)),
            Some("top")
        );
        assert_eq!(tree.classify(Ipv4Addr::new(0, 0, 0, 1)), None);
    }

    #[test]
    fn test_overlap_rejected_naming_both_spans() {
        let err = build(&[
            class("local", &["10.0.0.0/8"]),
            class("corp", &["10.1.0.0/16"]),
        ])
        .unwrap_err();

        match err {
            CoreError::Overlap { first, second } => {
                assert!(first.contains("local"), "first was {}", first);
                assert!(second.contains("corp"), "second was {}", second);
            }
            other => panic!("expected overlap, got {:?}", other),
        }
    }

    #[test]
    fn test_adjacent_spans_are_not_overlapping() {
        let tree = build(&[
            class("a", &["10.0.0.0-10.0.0.99"]),
            class("b", &["10.0.0.100-10.0.0.199"]),
        ])
        .unwrap();

        assert_eq!(tree.classify(Ipv4Addr::new(10, 0, 0, 99)), Some("a"));
        assert_eq!(tree.classify(Ipv4Addr::new(10, 0, 0, 100)), Some("b"));
    }

    #[test]
    fn test_tree_is_balanced() {
        let classes: Vec<ClassConfig> = (0..127)
            .map(|i| class(&format!("c{}", i), &[&format!("10.{}.0.0/16", i)]))
            .collect();
        let tree = build(&classes).unwrap();

        assert_eq!(tree.span_count(), 127);
        // 127 spans fit exactly in a height-7 balanced tree
        assert_eq!(ClassTree::height(tree.root.as_deref()), 7);
    }

    #[test]
    fn test_deterministic_classification_over_rebuilds() {
        let classes = vec![
            class("a", &["10.0.0.0/24"]),
            class("b", &["10.0.1.0/24"]),
            class("c", &["192.168.0.0/16"]),
        ];
        let t1 = build(&classes).unwrap();
        let t2 = build(&classes).unwrap();

        for ip in [
            Ipv4Addr::new(10, 0, 0, 200),
            Ipv4Addr::new(10, 0, 1, 1),
            Ipv4Addr::new(192, 168, 44, 2),
            Ipv4Addr::new(172, 16, 0, 1),
        ] {
            assert_eq!(t1.classify(ip), t2.classify(ip));
        }
        assert_eq!(t1.spans(), t2.spans());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_tree() {
        let service = TclassService::new("internet");
        service
            .load(vec![class("local", &["10.0.0.0/8"])])
            .await
            .unwrap();

        let err = service
            .load(vec![
                class("x", &["10.0.0.0/8"]),
                class("y", &["10.2.0.0/16"]),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Overlap { .. }));

        // Previous tree still answers
        assert_eq!(service.classify(Ipv4Addr::new(10, 9, 9, 9)).await, "local");
    }

    #[tokio::test]
    async fn test_default_class_fallback() {
        let service = TclassService::new("internet");
        service
            .load(vec![class("local", &["10.0.0.0/8"])])
            .await
            .unwrap();

        assert_eq!(service.classify(Ipv4Addr::new(8, 8, 8, 8)).await, "internet");
        let detail = service.classify_detailed(Ipv4Addr::new(8, 8, 8, 8)).await;
        assert!(!detail.found);
        assert_eq!(detail.class, "internet");
    }

    #[tokio::test]
    async fn test_class_crud_rolls_back_on_overlap() {
        let service = TclassService::new("internet");
        service
            .load(vec![class("local", &["10.0.0.0/8"])])
            .await
            .unwrap();

        assert!(service
            .add_class(class("clash", &["10.5.0.0/16"]))
            .await
            .is_err());
        assert_eq!(service.classes().await.len(), 1);

        service
            .add_class(class("cdn", &["8.8.8.0/24"]))
            .await
            .unwrap();
        assert_eq!(service.classify(Ipv4Addr::new(8, 8, 8, 1)).await, "cdn");

        service.remove_class("cdn").await.unwrap();
        assert_eq!(service.classify(Ipv4Addr::new(8, 8, 8, 1)).await, "internet");
        assert!(service.remove_class("cdn").await.is_err());
    }
}
