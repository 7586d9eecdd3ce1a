//! DSL handling: legacy upgrade and structural validation.
//!
//! Documents arrive as [`DslDocument`] (v2 or v3). [`canonicalize`] folds both
//! forms into the canonical v3 graph, which [`validate::validate`] then checks
//! structurally. Publish is the only gate that *requires* a clean validation;
//! drafts may be saved in any state.

pub mod upgrade;
pub mod validate;

use flowplane_types::dsl::{Dsl, DslDocument};

pub use upgrade::upgrade_v2;
pub use validate::validate;

/// Fold either accepted wire form into the canonical v3 graph.
pub fn canonicalize(doc: DslDocument) -> Dsl {
    match doc {
        DslDocument::V2(v2) => upgrade_v2(v2),
        DslDocument::V3(dsl) => dsl,
    }
}
