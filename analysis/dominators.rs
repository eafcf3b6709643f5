//! Dominator sets over the CFG.

use super::*;
use crate::cfg::EdgeMap;

/// For each block, the set of blocks that dominate it (itself included).
pub type DomMap = Map<BbId, Set<BbId>>;

/// Iterative dominator computation.  The entry dominates only itself;
/// every other block starts at the universe of all labels and shrinks
/// until `dom[b] = {b} ∪ ⋂ dom[p]` over its predecessors stabilizes.
/// Blocks unreachable from the entry keep the universe; callers must not
/// assume reachability.
///
/// Sweeps visit blocks in program order, so the result is stable across
/// runs.
pub fn dominators(blocks: &BlockMap, preds: &EdgeMap) -> DomMap {
    let mut dom = DomMap::new();
    let entry = match blocks.keys().next() {
        Some(entry) => entry,
        None => return dom,
    };

    let universe: Set<BbId> = blocks.keys().cloned().collect();
    for name in blocks.keys() {
        dom.insert(name.clone(), universe.clone());
    }
    dom.insert(entry.clone(), Set::from([entry.clone()]));

    let mut changed = true;
    while changed {
        changed = false;
        for name in blocks.keys() {
            if name == entry {
                continue;
            }
            let mut next = universe.clone();
            for pred in &preds[name] {
                next = next.intersection(&dom[pred]).cloned().collect();
            }
            next.insert(name.clone());
            if next != dom[name] {
                dom.insert(name.clone(), next);
                changed = true;
            }
        }
    }

    dom
}
