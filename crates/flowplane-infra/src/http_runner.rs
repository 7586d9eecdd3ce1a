//! Inline node runner backed by reqwest.
//!
//! `http.request` nodes execute real HTTP calls. Agent and connector nodes
//! produce structured acknowledgement outputs until their providers are
//! wired in; they still flow through the full event and context machinery.
//! Condition and join nodes never reach a runner -- the engine resolves them
//! itself.

use std::time::Duration;

use serde_json::json;
use tracing::debug;

use flowplane_core::engine::{NodeResult, NodeRunError, NodeRunner, RunContext};
use flowplane_types::dsl::{Node, NodeConfig};
use flowplane_types::workflow::WorkflowRun;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes inline nodes on the control plane.
pub struct HttpNodeRunner {
    client: reqwest::Client,
}

impl HttpNodeRunner {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn run_http(
        &self,
        method: &str,
        url: &str,
        headers: &std::collections::BTreeMap<String, String>,
        body: Option<&serde_json::Value>,
    ) -> Result<NodeResult, NodeRunError> {
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| NodeRunError::new(format!("invalid HTTP method '{method}'")))?;

        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeRunError::new(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NodeRunError::new(format!("read response body: {e}")))?;
        let body: serde_json::Value =
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

        debug!(%url, status = status.as_u16(), "http node response");

        if !status.is_success() {
            return Err(NodeRunError::new(format!(
                "http status {}: {body}",
                status.as_u16()
            )));
        }
        Ok(NodeResult::new(json!({
            "status": status.as_u16(),
            "body": body,
        })))
    }
}

impl Default for HttpNodeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRunner for HttpNodeRunner {
    async fn run(
        &self,
        _run: &WorkflowRun,
        node: &Node,
        _ctx: &RunContext,
    ) -> Result<NodeResult, NodeRunError> {
        match &node.config {
            NodeConfig::HttpRequest {
                method,
                url,
                headers,
                body,
            } => self.run_http(method, url, headers, body.as_ref()).await,
            NodeConfig::Agent {
                agent,
                prompt,
                model,
            } => Ok(NodeResult::new(json!({
                "agent": agent,
                "model": model,
                "prompt": prompt,
                "response": format!("agent '{agent}' acknowledged"),
            }))),
            NodeConfig::Connector {
                provider,
                action,
                params,
            } => Ok(NodeResult::new(json!({
                "provider": provider,
                "action": action,
                "params": params,
                "delivered": true,
            }))),
            NodeConfig::Condition { .. } | NodeConfig::ParallelJoin { .. } => Err(
                NodeRunError::new(format!("node kind '{}' is engine-resolved", node.config.kind())),
            ),
        }
    }
}
