pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file. Static, one-shot — there is no
    /// watch loop; a changed file takes effect only after restart.
    pub fn load(path: &Path) -> Result<Self> {
        let config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            GatewayConfig::default()
        };

        config.validate()?;
        tracing::info!(
            "loaded gateway configuration: {} server blocks, {} upstream groups",
            config.http.server_blocks.len(),
            config.http.upstream_groups.len(),
        );
        Ok(config)
    }

    /// Validates cross-references between server blocks, locations, and
    /// upstream groups that serde's per-field defaulting can't catch.
    pub fn validate(&self) -> Result<()> {
        let group_names: HashSet<&str> = self
            .http
            .upstream_groups
            .iter()
            .map(|g| g.name.as_str())
            .collect();

        for server in &self.http.server_blocks {
            if server.hosts.is_empty() {
                anyhow::bail!("server block '{}' has no hosts", server.name);
            }
            for host in &server.hosts {
                if host.is_empty() {
                    anyhow::bail!("server block '{}' has an empty host entry", server.name);
                }
            }

            for route in &server.routes {
                if route.uri.is_empty() {
                    anyhow::bail!(
                        "server block '{}' has a location with an empty uri",
                        server.name
                    );
                }
                for cluster in &route.clusters {
                    if !group_names.contains(cluster.name.as_str()) {
                        anyhow::bail!(
                            "location '{}' in server block '{}' references unknown upstream group '{}'",
                            route.uri,
                            server.name,
                            cluster.name,
                        );
                    }
                }
            }
        }

        for group in &self.http.upstream_groups {
            for node in &group.nodes {
                if node.weight == 0 {
                    anyhow::bail!(
                        "upstream group '{}' has a server with weight 0 (unselectable, remove it instead)",
                        group.name
                    );
                }
            }
            match group.lb_type.as_str() {
                "roundrobin" | "weighted_random" | "random" | "least_request" | "ip_hash" => {}
                other => anyhow::bail!(
                    "upstream group '{}' has unrecognized load balancer type '{}'",
                    group.name,
                    other
                ),
            }
        }

        Ok(())
    }

    /// Total number of locations across all server blocks, counting only
    /// enabled ones (`status == 1`).
    pub fn total_route_count(&self) -> usize {
        self.http
            .server_blocks
            .iter()
            .flat_map(|s| s.routes.iter())
            .filter(|r| r.status == 1)
            .count()
    }
}
