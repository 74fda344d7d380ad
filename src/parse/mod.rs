pub mod document_index;
pub mod relative_date;
pub mod task_parser;
pub mod task_serializer;

pub use document_index::index_document;
pub use relative_date::resolve_relative_date;
pub use task_parser::{ParsedTask, TaskLineParser};
pub use task_serializer::{
    block_anchor, leading_indent, serialize_task_line, split_line_ending, type_is_displayed,
    type_signifier,
};
