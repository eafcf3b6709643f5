//! Reaching definitions: which block's write of a variable may still be
//! the live one at a program point.

use std::fmt;

use super::*;

/// A definition: the variable and the block that wrote it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Def(pub VarId, pub BbId);

impl Display for Def {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.0, self.1)
    }
}

/// Forward may-analysis over the powerset of definitions.  A block kills
/// every incoming definition of a variable it writes and generates its
/// own in their place.
pub fn analysis() -> Analysis<Set<Def>> {
    Analysis {
        forward: true,
        init: Set::new(),
        merge: union,
        transfer: |block, input, name| {
            let defs = gen(block);
            let mut out: Set<Def> = input
                .iter()
                .filter(|d| !defs.contains(&d.0))
                .cloned()
                .collect();
            out.extend(defs.into_iter().map(|v| Def(v, name.clone())));
            out
        },
    }
}

pub fn analyze(blocks: &mut BlockMap) -> (Map<BbId, Set<Def>>, Map<BbId, Set<Def>>) {
    df_worklist(blocks, &analysis())
}
