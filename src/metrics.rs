//! Prometheus-format metrics endpoint.
//!
//! Serves two routes when `metrics: true` in `bot.yml`:
//! `GET /metrics_health` → `200 OK`, and `GET /metrics` → a
//! `flottbot_ruleCount` counter labeled per rule (`<bot>-<rule>`, with
//! `None` for messages that matched no rule).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Per-rule match counter.
pub struct RuleCounter {
    bot_name: String,
    counts: RwLock<HashMap<String, u64>>,
}

impl RuleCounter {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Count a processed message against the rule it matched (or `None`).
    pub async fn increment(&self, rule_name: &str) {
        let label = format!(
            "{}-{}",
            self.bot_name,
            if rule_name.is_empty() { "None" } else { rule_name }
        );
        *self.counts.write().await.entry(label).or_insert(0) += 1;
    }

    /// Render the counter in Prometheus text exposition format.
    pub async fn render(&self) -> String {
        let counts = self.counts.read().await;
        let mut labels: Vec<_> = counts.iter().collect();
        labels.sort();

        let mut out = String::from(
            "# HELP flottbot_ruleCount Total messages matched per rule.\n# TYPE flottbot_ruleCount counter\n",
        );
        for (label, count) in labels {
            out.push_str(&format!(
                "flottbot_ruleCount{{rulename=\"{label}\"}} {count}\n"
            ));
        }
        out
    }
}

/// Spawn the metrics HTTP server on the configured port.
pub fn serve(counter: Arc<RuleCounter>, port: u16) {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/metrics_health", get(|| async { "OK" }))
        .with_state(counter);

    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{port}");
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("failed to bind metrics port {port}: {e}");
                return;
            }
        };
        info!(port, "metrics endpoint started");
        if let Err(e) = axum::serve(listener, app).await {
            error!("metrics server exited: {e}");
        }
    });
}

async fn metrics_handler(State(counter): State<Arc<RuleCounter>>) -> String {
    counter.render().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_counts_with_bot_prefix() {
        let counter = RuleCounter::new("mybot");
        counter.increment("greet").await;
        counter.increment("greet").await;
        counter.increment("").await;

        let out = counter.render().await;
        assert!(out.contains("# TYPE flottbot_ruleCount counter"));
        assert!(out.contains(r#"flottbot_ruleCount{rulename="mybot-greet"} 2"#));
        assert!(out.contains(r#"flottbot_ruleCount{rulename="mybot-None"} 1"#));
    }
}
