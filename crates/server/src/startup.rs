//! Tool registration and service construction.

use std::time::Duration;

use anyhow::Context;
use tracing::info;

use troubleshooter_tool_runtime::{k8sgpt, kubectl, Tool, ToolRegistry, ToolService};

/// Registry holding the cluster tools, in advertised order.
pub fn build_registry() -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in [kubectl(), k8sgpt()] {
        let name = tool.definition().name;
        registry
            .register(tool)
            .with_context(|| format!("failed to register tool '{name}'"))?;
    }
    info!(count = registry.len(), "Tools registered");
    Ok(registry)
}

pub fn build_service(call_timeout: Duration) -> anyhow::Result<ToolService> {
    Ok(ToolService::new(build_registry()?).with_call_timeout(call_timeout))
}
