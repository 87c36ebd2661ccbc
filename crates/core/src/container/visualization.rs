use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::container::key::ServiceKey;
use crate::container::lifecycle::ServiceState;
use crate::container::registry::Registry;
use crate::errors::{CoreError, CoreResult};

/// Dependency graph visualization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    /// Graphviz DOT format
    Dot,
    /// JSON representation
    Json,
    /// ASCII art tree
    Ascii,
}

/// Visualization style configuration
#[derive(Debug, Clone)]
pub struct VisualizationStyle {
    /// Show the lifecycle state of each service
    pub show_state: bool,
    /// Color nodes by lifecycle state
    pub color_by_state: bool,
    /// Show only services whose label contains one of these strings
    pub filter: Option<Vec<String>>,
    /// Include service statistics
    pub include_stats: bool,
}

impl Default for VisualizationStyle {
    fn default() -> Self {
        Self {
            show_state: true,
            color_by_state: true,
            filter: None,
            include_stats: false,
        }
    }
}

/// Serializable view of one descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub id: String,
    pub name: String,
    pub producer: String,
    pub state: ServiceState,
    pub cacheable: bool,
    pub optional: bool,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Point-in-time copy of a registry's dependency graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub services: Vec<ServiceNode>,
}

impl GraphSnapshot {
    /// Capture the descriptors registered directly on `registry`
    pub fn capture(registry: &Registry) -> CoreResult<Self> {
        let map = registry.read_map()?;
        let services = map
            .values()
            .map(|descriptor| ServiceNode {
                id: descriptor.key().label(),
                name: descriptor.name(),
                producer: descriptor.producer().kind().to_string(),
                state: descriptor.state(),
                cacheable: descriptor.is_cacheable(),
                optional: descriptor.is_optional(),
                tags: descriptor.tags().iter().map(ServiceKey::label).collect(),
                dependencies: descriptor
                    .dependencies()
                    .iter()
                    .map(ServiceKey::label)
                    .collect(),
                description: descriptor.description(),
            })
            .collect();
        Ok(Self { services })
    }
}

fn push_line(out: &mut String, line: impl AsRef<str>) {
    out.push_str(line.as_ref());
    out.push('\n');
}

/// Renders a captured dependency graph
#[derive(Debug, Clone)]
pub struct DependencyVisualizer {
    snapshot: GraphSnapshot,
    reverse_graph: HashMap<String, Vec<String>>,
}

impl DependencyVisualizer {
    /// Create a new visualizer from a snapshot
    pub fn new(snapshot: GraphSnapshot) -> Self {
        let mut reverse_graph: HashMap<String, Vec<String>> = HashMap::new();
        for service in &snapshot.services {
            for dependency in &service.dependencies {
                reverse_graph
                    .entry(dependency.clone())
                    .or_default()
                    .push(service.id.clone());
            }
        }
        Self {
            snapshot,
            reverse_graph,
        }
    }

    /// Create visualizer from a registry
    pub fn from_registry(registry: &Registry) -> CoreResult<Self> {
        Ok(Self::new(GraphSnapshot::capture(registry)?))
    }

    pub fn snapshot(&self) -> &GraphSnapshot {
        &self.snapshot
    }

    /// Generate visualization in specified format
    pub fn visualize(
        &self,
        format: VisualizationFormat,
        style: &VisualizationStyle,
    ) -> CoreResult<String> {
        match format {
            VisualizationFormat::Dot => Ok(self.generate_dot(style)),
            VisualizationFormat::Json => self.generate_json(style),
            VisualizationFormat::Ascii => Ok(self.generate_ascii(style)),
        }
    }

    fn included<'a>(&'a self, style: &'a VisualizationStyle) -> impl Iterator<Item = &'a ServiceNode> {
        self.snapshot.services.iter().filter(move |service| match &style.filter {
            Some(filter) => filter.iter().any(|f| service.id.contains(f.as_str())),
            None => true,
        })
    }

    fn generate_dot(&self, style: &VisualizationStyle) -> String {
        let mut dot = String::new();
        push_line(&mut dot, "digraph ServiceDependencies {");
        push_line(&mut dot, "    rankdir=TB;");
        push_line(&mut dot, "    node [shape=rectangle];");
        push_line(&mut dot, "");

        for service in self.included(style) {
            let mut attrs = Vec::new();
            if style.color_by_state {
                let color = match service.state {
                    ServiceState::Uninvoked => "white",
                    ServiceState::Invoked => "lightgreen",
                    ServiceState::Invalid => "lightyellow",
                };
                attrs.push(format!("fillcolor={}", color));
                attrs.push("style=filled".to_string());
            }
            if style.show_state {
                attrs.push(format!("label=\"{}\\n({})\"", service.name, service.state));
            } else {
                attrs.push(format!("label=\"{}\"", service.name));
            }
            push_line(&mut dot, format!("    \"{}\" [{}];", service.id, attrs.join(", ")));
        }

        push_line(&mut dot, "");
        for service in self.included(style) {
            for dependency in &service.dependencies {
                push_line(&mut dot, format!("    \"{}\" -> \"{}\";", service.id, dependency));
            }
        }
        push_line(&mut dot, "}");
        dot
    }

    fn generate_json(&self, style: &VisualizationStyle) -> CoreResult<String> {
        let services: Vec<&ServiceNode> = self.included(style).collect();
        let mut document = serde_json::json!({ "services": services });

        if style.include_stats {
            let total_dependencies: usize = services.iter().map(|s| s.dependencies.len()).sum();
            let resolved = services.iter().filter(|s| s.state.is_invoked()).count();
            document["statistics"] = serde_json::json!({
                "total_services": services.len(),
                "total_dependencies": total_dependencies,
                "resolved_services": resolved,
            });
        }

        serde_json::to_string_pretty(&document)
            .map_err(|e| CoreError::configuration(format!("Failed to serialize JSON: {}", e)))
    }

    fn generate_ascii(&self, style: &VisualizationStyle) -> String {
        let by_id: HashMap<&str, &ServiceNode> = self
            .snapshot
            .services
            .iter()
            .map(|s| (s.id.as_str(), s))
            .collect();

        let mut ascii = String::new();
        push_line(&mut ascii, "Service Dependency Tree");
        push_line(&mut ascii, "=======================");
        for service in self.included(style) {
            if self.reverse_graph.contains_key(&service.id) {
                continue;
            }
            let mut path = HashSet::new();
            self.ascii_tree(&by_id, &service.id, 0, style, &mut path, &mut ascii);
        }
        ascii
    }

    fn ascii_tree<'a>(
        &'a self,
        by_id: &HashMap<&str, &'a ServiceNode>,
        id: &'a str,
        depth: usize,
        style: &VisualizationStyle,
        path: &mut HashSet<&'a str>,
        out: &mut String,
    ) {
        let indent = "  ".repeat(depth);
        let prefix = if depth == 0 { "" } else { "└─ " };
        let state = match (style.show_state, by_id.get(id)) {
            (true, Some(node)) => format!(" ({})", node.state),
            _ => String::new(),
        };

        if !path.insert(id) {
            push_line(out, format!("{}{}{} (cycle)", indent, prefix, id));
            return;
        }
        push_line(out, format!("{}{}{}{}", indent, prefix, id, state));

        if let Some(node) = by_id.get(id).copied() {
            for dependency in &node.dependencies {
                self.ascii_tree(by_id, dependency, depth + 1, style, path, out);
            }
        }
        path.remove(id);
    }

    /// Services that depend directly on `id`
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.reverse_graph
            .get(id)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Longest dependency chain below `id`
    pub fn dependency_depth(&self, id: &str) -> usize {
        let by_id: HashMap<&str, &ServiceNode> = self
            .snapshot
            .services
            .iter()
            .map(|s| (s.id.as_str(), s))
            .collect();
        let mut visited = HashSet::new();
        Self::depth_of(&by_id, id, &mut visited)
    }

    fn depth_of<'a>(
        by_id: &HashMap<&str, &'a ServiceNode>,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
    ) -> usize {
        if !visited.insert(id) {
            return 0;
        }
        let depth = by_id
            .get(id)
            .copied()
            .map(|node| {
                node.dependencies
                    .iter()
                    .map(|dep| 1 + Self::depth_of(by_id, dep, visited))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        visited.remove(id);
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wired_registry() -> Registry {
        let registry = Registry::new();
        let config = ServiceKey::named("config");
        let database = ServiceKey::named("database");
        let repository = ServiceKey::named("repository");

        registry.register_value(&config, "db://".to_string()).unwrap();
        let dep = config.clone();
        registry
            .register_factory(&database, move |inv| {
                Ok(format!("connected to {}", inv.registry()?.resolve::<String>(&dep)?))
            })
            .unwrap();
        let dep = database.clone();
        registry
            .register_factory(&repository, move |inv| {
                Ok(inv.registry()?.resolve::<String>(&dep)?.len())
            })
            .unwrap();
        registry.resolve::<usize>(&repository).unwrap();
        registry
    }

    #[test]
    fn test_dot_generation() {
        let visualizer = DependencyVisualizer::from_registry(&wired_registry()).unwrap();
        let dot = visualizer
            .visualize(VisualizationFormat::Dot, &VisualizationStyle::default())
            .unwrap();

        assert!(dot.starts_with("digraph ServiceDependencies {"));
        assert!(dot.contains("\"repository\" -> \"database\";"));
        assert!(dot.contains("\"database\" -> \"config\";"));
        assert!(dot.contains("(invoked)"));
    }

    #[test]
    fn test_json_generation() {
        let visualizer = DependencyVisualizer::from_registry(&wired_registry()).unwrap();
        let style = VisualizationStyle {
            include_stats: true,
            ..VisualizationStyle::default()
        };
        let json = visualizer.visualize(VisualizationFormat::Json, &style).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["services"].as_array().unwrap().len(), 3);
        assert_eq!(value["statistics"]["total_dependencies"], 2);
        assert_eq!(value["services"][2]["state"], "invoked");
    }

    #[test]
    fn test_ascii_and_queries() {
        let visualizer = DependencyVisualizer::from_registry(&wired_registry()).unwrap();
        let style = VisualizationStyle {
            show_state: false,
            ..VisualizationStyle::default()
        };
        let ascii = visualizer.visualize(VisualizationFormat::Ascii, &style).unwrap();
        assert!(ascii.contains("repository\n  └─ database\n    └─ config"));

        assert_eq!(visualizer.dependents("config"), vec!["database"]);
        assert_eq!(visualizer.dependency_depth("repository"), 2);
    }

    #[test]
    fn test_filter() {
        let visualizer = DependencyVisualizer::from_registry(&wired_registry()).unwrap();
        let style = VisualizationStyle {
            filter: Some(vec!["data".to_string()]),
            ..VisualizationStyle::default()
        };
        let dot = visualizer.visualize(VisualizationFormat::Dot, &style).unwrap();
        assert!(dot.contains("\"database\" ["));
        assert!(!dot.contains("\"repository\" ["));
    }
}
