//! Panel reachability and backend node health.

use dashmap::DashMap;
use futures::future::join_all;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::error::AppResult;
use crate::models::PanelConfig;
use crate::modules::i18n;
use crate::modules::notifier::alert_admins;
use crate::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HealthSummary {
    pub probed: usize,
    pub down: usize,
    pub alerts: usize,
}

/// Remembers the last observed state so admins hear about transitions,
/// not about every failing tick.
#[derive(Default)]
pub struct HealthMonitor {
    panels: DashMap<String, bool>, // panel_id -> reachable
    nodes: DashMap<String, bool>,  // "panel_id/node" -> connected
}

async fn probe(panel: &PanelConfig, timeout: Duration) -> Result<(), String> {
    let (host, port) = panel
        .probe_target()
        .ok_or_else(|| format!("no host in {}", panel.base_url))?;
    match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no answer within {}s", timeout.as_secs())),
    }
}

fn target(panel: &PanelConfig) -> String {
    panel
        .probe_target()
        .map(|(host, port)| format!("{}:{}", host, port))
        .unwrap_or_else(|| panel.base_url.clone())
}

/// Store the new state and report whether an alert is due.
/// The first observation alerts only when it is a failure.
fn transition(states: &DashMap<String, bool>, key: &str, up: bool) -> bool {
    match states.insert(key.to_string(), up) {
        Some(previous) => previous != up,
        None => !up,
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last observed reachability of a panel, if probed
    pub fn is_up(&self, panel_id: &str) -> Option<bool> {
        self.panels.get(panel_id).map(|v| *v)
    }

    async fn alert(&self, state: &AppState, key: &str, args: &[(&str, String)]) -> usize {
        let text = i18n::render(&state.config.language, key, args);
        alert_admins(state.store.as_ref(), state.notifier.as_ref(), &text).await
    }

    async fn check_nodes(&self, state: &AppState, panel: &PanelConfig, summary: &mut HealthSummary) {
        let client = match state.registry.get(panel).await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(panel = %panel.id, error = %e, "Cannot list nodes");
                return;
            }
        };
        let nodes = match client.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                state.registry.note_failure(&panel.id, &e);
                tracing::warn!(panel = %panel.id, error = %e, "Node listing failed");
                return;
            }
        };

        for node in nodes {
            let key = format!("{}/{}", panel.id, node.name);
            if !transition(&self.nodes, &key, node.connected) {
                continue;
            }
            if node.connected {
                tracing::info!(panel = %panel.id, node = %node.name, "Node recovered");
                summary.alerts += self
                    .alert(state, "node_up", &[("node", node.name.clone()), ("panel", panel.name.clone())])
                    .await;
            } else {
                tracing::warn!(panel = %panel.id, node = %node.name, message = ?node.message, "Node disconnected");
                let args = [
                    ("node", node.name.clone()),
                    ("panel", panel.name.clone()),
                    ("message", node.message.clone().unwrap_or_default()),
                ];
                summary.alerts += self.alert(state, "node_down", &args).await;
            }
        }
    }

    pub async fn run_once(&self, state: &AppState) -> AppResult<HealthSummary> {
        let panels = state.store.active_panels()?;
        let timeout = Duration::from_secs(state.config.scheduler.health_timeout.max(1));
        let results = join_all(panels.iter().map(|panel| probe(panel, timeout))).await;

        let mut summary = HealthSummary {
            probed: panels.len(),
            ..Default::default()
        };

        for (panel, result) in panels.iter().zip(results) {
            let up = result.is_ok();
            let changed = transition(&self.panels, &panel.id, up);

            match result {
                Ok(()) => {
                    if changed {
                        tracing::info!(panel = %panel.id, "Panel reachable again");
                        summary.alerts += self.alert(state, "panel_up", &[("panel", panel.name.clone())]).await;
                    }
                    self.check_nodes(state, panel, &mut summary).await;
                }
                Err(error) => {
                    summary.down += 1;
                    if changed {
                        tracing::warn!(panel = %panel.id, error = %error, "Panel unreachable");
                        state.registry.invalidate(&panel.id);
                        let args = [
                            ("panel", panel.name.clone()),
                            ("target", target(panel)),
                            ("error", error),
                        ];
                        summary.alerts += self.alert(state, "panel_down", &args).await;
                    }
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_alerts_on_change_only() {
        let states = DashMap::new();
        assert!(!transition(&states, "p1", true));
        assert!(!transition(&states, "p1", true));
        assert!(transition(&states, "p1", false));
        assert!(!transition(&states, "p1", false));
        assert!(transition(&states, "p1", true));
    }

    #[test]
    fn test_first_failure_alerts() {
        let states = DashMap::new();
        assert!(transition(&states, "p2", false));
    }
}
