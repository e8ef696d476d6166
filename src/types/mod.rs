mod chat;
mod generation;
mod model;
mod reply;
mod requests;
mod stream_event;

pub use chat::{ChatId, ChatSummary};
pub use generation::{GenerationState, TerminationReason};
pub use model::{ModelInfo, ModelSelection};
pub use reply::{
    AccumulatedReply, CONNECTION_ERROR_ANNOTATION, ReplyAnnotation, STOPPED_ANNOTATION,
};
pub use requests::{
    CancelRequest, RenameChatRequest, SendAck, SendMessageRequest, SuccessResponse,
};
pub use stream_event::{StreamEvent, StreamFrame};
