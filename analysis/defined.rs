//! Defined variables: everything written on some path from the entry.

use super::*;

/// Forward may-analysis over the powerset of variable names.
pub fn analysis() -> Analysis<Set<VarId>> {
    Analysis {
        forward: true,
        init: Set::new(),
        merge: union,
        transfer: |block, input, _name| {
            let mut out = input.clone();
            out.extend(gen(block));
            out
        },
    }
}

pub fn analyze(blocks: &mut BlockMap) -> (Map<BbId, Set<VarId>>, Map<BbId, Set<VarId>>) {
    df_worklist(blocks, &analysis())
}
