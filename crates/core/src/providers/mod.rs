pub mod openai;

pub use openai::{OpenAiChat, OpenAiConfig, OpenAiEmbedder};
