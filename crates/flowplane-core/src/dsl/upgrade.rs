//! Legacy v2 upgrade.
//!
//! A v2 document is a flat node list with order-implied sequencing. The
//! upgrade produces the equivalent v3 graph: the same nodes keyed by id,
//! chained with `always` edges in list order. The result goes through the
//! same validator as native v3 input, so a v2 document with duplicate ids
//! surfaces ordinary validation errors rather than a special legacy path.

use std::collections::BTreeMap;

use flowplane_types::dsl::{Dsl, DslV2, Edge, EdgeKind};

/// Upgrade a legacy flat node list to a linear v3 chain.
pub fn upgrade_v2(v2: DslV2) -> Dsl {
    let edges = v2
        .nodes
        .windows(2)
        .enumerate()
        .map(|(i, pair)| Edge {
            id: format!("upgrade-e{}", i + 1),
            from: pair[0].id.clone(),
            to: pair[1].id.clone(),
            kind: EdgeKind::Always,
        })
        .collect();

    let nodes: BTreeMap<String, _> = v2
        .nodes
        .into_iter()
        .map(|n| (n.id.clone(), n))
        .collect();

    Dsl {
        trigger: v2.trigger,
        nodes,
        edges,
    }
}
