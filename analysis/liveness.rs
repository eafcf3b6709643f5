//! Live variables: what may still be read along some path in the future.
//!
//! This is a backwards analysis.

use super::*;

pub fn analysis() -> Analysis<Set<VarId>> {
    Analysis {
        forward: false,
        init: Set::new(),
        merge: union,
        transfer: |block, output, _name| {
            let defs = gen(block);
            let mut live = use_before_def(block);
            live.extend(output.difference(&defs).cloned());
            live
        },
    }
}

pub fn analyze(blocks: &mut BlockMap) -> (Map<BbId, Set<VarId>>, Map<BbId, Set<VarId>>) {
    df_worklist(blocks, &analysis())
}
