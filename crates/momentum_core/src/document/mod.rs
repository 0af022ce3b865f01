//! Markdown project documents.
//!
//! # Responsibility
//! - Parse hand-edited project files into a header plus checkbox items.
//! - Regenerate files from canonical records without disturbing prose.
//!
//! # Invariants
//! - Parsing never fails; problems surface as [`ParseIssue`]s.
//! - `parse(write(..))` reproduces title, status and marker of every task.

pub mod marker;
pub mod parser;
pub mod writer;

pub use marker::{generate_marker, MarkerRef};
pub use parser::{
    parse_document, CheckState, DocumentHeader, HeaderSpan, ParseIssue, ParsedDocument,
    ParsedItem, Phase, Section,
};
pub use writer::{render_document, RenderedDocument};
