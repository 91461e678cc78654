use proptest::prelude::*;

/// Shape of a traversal run: source size and configuration knobs.
#[derive(Debug, Clone)]
pub struct TraversalShape {
    pub doc_count: usize,
    pub batch_size: usize,
    pub max_doc_count: Option<usize>,
    pub max_concurrent_batch_count: usize,
}

impl TraversalShape {
    pub fn expected_doc_count(&self) -> usize {
        self.max_doc_count
            .map_or(self.doc_count, |max| self.doc_count.min(max))
    }

    pub fn expected_batch_count(&self) -> usize {
        self.expected_doc_count().div_ceil(self.batch_size)
    }
}

/// Strategy for generating traversal shapes small enough to run in memory
pub fn traversal_shape_strategy() -> impl Strategy<Value = TraversalShape> {
    (
        0usize..60,
        1usize..16,
        prop::option::of(1usize..80),
        1usize..5,
    )
        .prop_map(
            |(doc_count, batch_size, max_doc_count, max_concurrent_batch_count)| TraversalShape {
                doc_count,
                batch_size,
                max_doc_count,
                max_concurrent_batch_count,
            },
        )
}

/// Strategy for generating dotted field paths one to three segments deep
pub fn field_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9_]{0,7}", 1..=3).prop_map(|segments| segments.join("."))
}
