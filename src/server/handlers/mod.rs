//! 请求处理器

mod chat_streaming;

pub use chat_streaming::{chat_streaming, decode_message_body, error_response};
