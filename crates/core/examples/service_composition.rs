//! Example: composing services with the registry
//!
//! Wires a small request pipeline: configuration read from the environment,
//! a connection pool built from it, plugins collected through `list_of`, and a
//! per-request id bound through a task-local scope.

use std::sync::Arc;

use pod_core::container::{
    DependencyVisualizer, Invocation, VisualizationFormat, VisualizationStyle,
};
use pod_core::{env, Arg, CoreResult, Injectable, Registry, ServiceKey};

#[derive(Debug)]
struct Pool {
    url: Arc<String>,
}

impl Injectable for Pool {
    fn create(invocation: &Invocation<'_>) -> CoreResult<Self> {
        Ok(Self {
            url: invocation.arg::<String>(0)?,
        })
    }
}

#[derive(Debug)]
struct Plugin {
    name: &'static str,
}

#[tokio::main]
async fn main() -> CoreResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter("pod_core=debug")
        .init();

    let registry = Registry::new();

    let url = env(&registry, "DATABASE_URL", Some("postgres://localhost/app"))?;
    registry.register_type::<Pool>(vec![Arg::handle(&url)])?;

    let plugin = ServiceKey::token("plugin");
    for name in ["auth", "audit"] {
        registry
            .register_value(&ServiceKey::named(name), Plugin { name })?
            .with_tags([plugin.clone()]);
    }
    let plugins = registry.list_of(&plugin)?;

    let request_id = ServiceKey::token("request-id");
    let entry = registry.scoped(&request_id)?;

    let summary = ServiceKey::named("summary");
    let dep = request_id.clone();
    registry
        .register_factory(&summary, move |inv: &Invocation<'_>| {
            let registry = inv.registry()?;
            let pool = registry.resolve_type::<Pool>()?;
            let id = registry.resolve::<u64>(&dep)?;
            Ok(format!("request {} using {}", id, pool.url))
        })?
        .with_cacheable(false);

    for id in 1..=2u64 {
        let (registry, summary) = (registry.clone(), summary.clone());
        let line = entry
            .enter_value(id, async move { registry.resolve::<String>(&summary) })
            .await?;
        println!("{}", line);
    }

    let names: Vec<&str> = plugins
        .get()?
        .resolve_all::<Plugin>()?
        .iter()
        .map(|plugin| plugin.name)
        .collect();
    println!("plugins: {}", names.join(", "));

    let visualizer = DependencyVisualizer::from_registry(&registry)?;
    println!(
        "{}",
        visualizer.visualize(VisualizationFormat::Ascii, &VisualizationStyle::default())?
    );
    Ok(())
}
