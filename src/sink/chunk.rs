//! Splitting bulk operations into requests that respect destination limits.

use super::WriteModel;

/// Per-request ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub max_operations: usize,
    pub max_bytes: usize,
}

/// A contiguous run of operations sent as one bulk request.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Sequence number of the chunk within its partition.
    pub index: usize,
    /// Position of the first operation within the partition.
    pub offset: usize,
    pub operations: Vec<WriteModel>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Group operations into chunks bounded by `limits`.
///
/// Operations are never split or reordered. An operation larger than
/// `max_bytes` is sent alone.
pub fn chunk_operations(operations: Vec<WriteModel>, limits: ChunkLimits) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0;
    let mut offset = 0;

    for op in operations {
        let size = op.estimated_size();
        let full = current.len() >= limits.max_operations
            || current_bytes + size > limits.max_bytes;
        if full && !current.is_empty() {
            let operations = std::mem::take(&mut current);
            let len = operations.len();
            chunks.push(Chunk {
                index: chunks.len(),
                offset,
                operations,
            });
            offset += len;
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(op);
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            index: chunks.len(),
            offset,
            operations: current,
        });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn insert(payload: usize) -> WriteModel {
        let document: Document = [("p", "x".repeat(payload))].into_iter().collect();
        WriteModel::Insert { document }
    }

    #[test]
    fn test_count_limit() {
        let ops = (0..10).map(|_| insert(1)).collect();
        let chunks = chunk_operations(
            ops,
            ChunkLimits {
                max_operations: 4,
                max_bytes: usize::MAX,
            },
        );
        assert_eq!(
            chunks.iter().map(Chunk::len).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert_eq!(
            chunks.iter().map(|c| c.offset).collect::<Vec<_>>(),
            vec![0, 4, 8]
        );
        assert_eq!(chunks[2].index, 2);
    }

    #[test]
    fn test_byte_limit_never_splits_document() {
        let small = insert(10).estimated_size();
        let ops = vec![insert(10), insert(10), insert(1000), insert(10)];
        let chunks = chunk_operations(
            ops,
            ChunkLimits {
                max_operations: 100,
                max_bytes: small * 2,
            },
        );
        // the oversized document travels alone
        assert_eq!(
            chunks.iter().map(Chunk::len).collect::<Vec<_>>(),
            vec![2, 1, 1]
        );
        assert_eq!(chunks[2].offset, 3);
    }

    #[test]
    fn test_empty_input() {
        let chunks = chunk_operations(
            Vec::new(),
            ChunkLimits {
                max_operations: 1,
                max_bytes: 1,
            },
        );
        assert!(chunks.is_empty());
    }
}
