use crate::domain::types::PostId;

/// Sequential reader over a pool's resolved ids. An id handed out once is
/// never revisited.
#[derive(Debug, Clone, Default)]
pub(crate) struct PoolCursor {
    ids: Vec<PostId>,
    position: usize,
}

impl PoolCursor {
    pub(crate) fn new(ids: Vec<PostId>) -> Self {
        Self { ids, position: 0 }
    }

    pub(crate) fn next_id(&mut self) -> Option<PostId> {
        let id = self.ids.get(self.position).copied()?;
        self.position += 1;
        Some(id)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.ids.len().saturating_sub(self.position)
    }
}
