// Sandpad Engine Library
//
// Core of a live code editor with sandboxed execution: a lossless display
// tokenizer and highlighter, an editor state machine, and a small script
// interpreter run under fuel, deadline, and cancellation budgets.

// Public modules
pub mod editor;
pub mod error;
pub mod highlight;
pub mod repl;
pub mod report;
pub mod sandbox;
pub mod scan;
pub mod script;
pub mod templates;

// Re-export commonly used items
pub use editor::{EditorBuffer, Key, KeyEvent};
pub use error::{ErrorKind, ScriptError, Span};
pub use highlight::{highlight, StyledSpan, Theme};
pub use report::{EntryKind, ExecutionReport, OutputEntry, RunStatus};
pub use sandbox::{CancelHandle, RunLimits, Sandbox};
pub use scan::{scan, Token, TokenKind};
pub use script::evaluator::Evaluator;
pub use script::parse_source;
pub use script::value::Value;
pub use templates::{Template, TemplateLibrary};
