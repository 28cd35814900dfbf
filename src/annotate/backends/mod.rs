pub mod noop;
pub mod openai;

pub use noop::NoOpsBackend;
pub use openai::{OpenAiBackend, OpenAiSettings};
