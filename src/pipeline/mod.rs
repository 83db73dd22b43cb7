pub mod history;
pub mod normalize;
pub mod retry;
pub mod stream;

pub use history::{HistoryWindow, build_prompt, chat_title};
pub use normalize::{NormalizedReply, normalize};
pub use retry::{FALLBACK_REPLY, RetryController};
pub use stream::{STREAM_ERROR_MESSAGE, StreamDecoder, StreamEvent, ThinkingStep};
