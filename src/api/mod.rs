//! API Module
//!
//! Chat completion API types and context trimming.

pub mod completion;
pub mod context;

pub use completion::{
    Choice, CompletionRequest, CompletionResponse, ContentPart, ErrorBody, ImageUrl, Message,
    MessageContent, Usage,
};
pub use context::ContextWindow;
