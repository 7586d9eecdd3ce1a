//! Structural DSL validation.
//!
//! Checks run in a fixed order and collect every violation they can still
//! meaningfully detect, so the editor gets one complete report instead of a
//! fix-one-see-the-next loop. Reference-integrity failures suppress the
//! graph-shape checks (cycle detection over dangling edges would only produce
//! noise). Validation is pure: same document, same report, in the same order.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use flowplane_types::dsl::{
    Dsl, DslViolation, EdgeKind, NodeConfig, ViolationCode,
};

/// Validate a canonical v3 graph. An empty vec means publishable.
pub fn validate(dsl: &Dsl) -> Vec<DslViolation> {
    let mut violations = Vec::new();

    check_node_shape(dsl, &mut violations);
    let references_ok = check_edge_references(dsl, &mut violations);
    check_condition_edges(dsl, &mut violations);

    if references_ok {
        check_acyclic(dsl, &mut violations);
        check_join_branches(dsl, &mut violations);
    }

    violations
}

fn check_node_shape(dsl: &Dsl, out: &mut Vec<DslViolation>) {
    for (key, node) in &dsl.nodes {
        if node.id.trim().is_empty() {
            out.push(DslViolation::new(
                ViolationCode::EmptyNodeId,
                "node id must not be empty",
            ));
        } else if *key != node.id {
            out.push(
                DslViolation::new(
                    ViolationCode::NodeIdMismatch,
                    format!("node keyed '{key}' declares id '{}'", node.id),
                )
                .at_node(key.clone()),
            );
        }
    }

    let mut seen = BTreeSet::new();
    for edge in &dsl.edges {
        if !seen.insert(edge.id.as_str()) {
            out.push(
                DslViolation::new(
                    ViolationCode::DuplicateEdgeId,
                    format!("edge id '{}' appears more than once", edge.id),
                )
                .at_edge(edge.id.clone()),
            );
        }
    }
}

/// Returns true when every edge endpoint resolves to a declared node.
fn check_edge_references(dsl: &Dsl, out: &mut Vec<DslViolation>) -> bool {
    let mut ok = true;
    for edge in &dsl.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !dsl.nodes.contains_key(endpoint) {
                ok = false;
                out.push(
                    DslViolation::new(
                        ViolationCode::UnknownEdgeEndpoint,
                        format!("edge '{}' references unknown node '{endpoint}'", edge.id),
                    )
                    .at_edge(edge.id.clone()),
                );
            }
        }
    }
    ok
}

fn check_condition_edges(dsl: &Dsl, out: &mut Vec<DslViolation>) {
    for (id, node) in &dsl.nodes {
        let is_condition = matches!(node.config, NodeConfig::Condition { .. });
        let mut true_branches: Vec<&str> = Vec::new();
        let mut false_branches: Vec<&str> = Vec::new();

        for edge in dsl.edges_from(id) {
            match (is_condition, edge.kind) {
                (true, EdgeKind::Always) => out.push(
                    DslViolation::new(
                        ViolationCode::ConditionEdgeKindInvalid,
                        format!(
                            "edge '{}' leaving condition node '{id}' must be cond_true or cond_false",
                            edge.id
                        ),
                    )
                    .at_node(id.clone())
                    .at_edge(edge.id.clone()),
                ),
                (true, EdgeKind::CondTrue) => true_branches.push(&edge.id),
                (true, EdgeKind::CondFalse) => false_branches.push(&edge.id),
                (false, EdgeKind::CondTrue | EdgeKind::CondFalse) => out.push(
                    DslViolation::new(
                        ViolationCode::CondKindOnNonCondition,
                        format!(
                            "edge '{}' uses a condition branch kind but '{id}' is not a condition node",
                            edge.id
                        ),
                    )
                    .at_node(id.clone())
                    .at_edge(edge.id.clone()),
                ),
                (false, EdgeKind::Always) => {}
            }
        }

        for (label, edges) in [("cond_true", true_branches), ("cond_false", false_branches)] {
            if edges.len() > 1 {
                out.push(
                    DslViolation::new(
                        ViolationCode::ConditionBranchDuplicated,
                        format!("condition node '{id}' has multiple {label} branches"),
                    )
                    .at_node(id.clone())
                    .at_edge(edges[1].to_string()),
                );
            }
        }
    }
}

fn check_acyclic(dsl: &Dsl, out: &mut Vec<DslViolation>) {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for id in dsl.nodes.keys() {
        indices.insert(id.as_str(), graph.add_node(id.as_str()));
    }
    for edge in &dsl.edges {
        graph.add_edge(indices[edge.from.as_str()], indices[edge.to.as_str()], ());
    }
    if let Err(cycle) = toposort(&graph, None) {
        let member = graph[cycle.node_id()];
        out.push(
            DslViolation::new(
                ViolationCode::CycleDetected,
                format!("graph contains a cycle through node '{member}'"),
            )
            .at_node(member.to_string()),
        );
    }
}

/// Remote branches cannot feed a parallel join: the join would have to hold
/// its evaluation open across an asynchronous callback, which the single
/// blocked-dispatch model does not support. Any remote-mode ancestor of a
/// join fails validation, naming the remote node.
fn check_join_branches(dsl: &Dsl, out: &mut Vec<DslViolation>) {
    for (join_id, node) in &dsl.nodes {
        if !matches!(node.config, NodeConfig::ParallelJoin { .. }) {
            continue;
        }
        // Collect every ancestor reachable against edge direction. Ordered
        // set keeps the reported violations deterministic.
        let mut ancestors = BTreeSet::new();
        let mut stack: Vec<&str> = dsl.edges_to(join_id).map(|e| e.from.as_str()).collect();
        while let Some(current) = stack.pop() {
            if !ancestors.insert(current) {
                continue;
            }
            stack.extend(dsl.edges_to(current).map(|e| e.from.as_str()));
        }
        for ancestor in ancestors {
            if let Some(upstream) = dsl.nodes.get(ancestor)
                && upstream.execution.is_remote()
            {
                out.push(
                    DslViolation::new(
                        ViolationCode::ParallelRemoteNotSupported,
                        format!(
                            "node '{ancestor}' runs remotely but feeds parallel join '{join_id}'"
                        ),
                    )
                    .at_node(ancestor.to_string()),
                );
            }
        }
    }
}
