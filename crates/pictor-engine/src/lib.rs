//! Mask editing, request construction and generation orchestration for the
//! Azure OpenAI images API.

pub mod error;
pub mod mask;
pub mod orchestrator;
pub mod request;
pub mod response;
pub mod transport;

pub use error::{GenerationError, MaskError};
pub use mask::{DisplayRect, EditorState, MaskEditor, PointerPosition, Tool};
pub use orchestrator::{
    BatchOutcome, GenerationInputs, GenerationOutcome, Generator, StatusLevel, StatusLine,
    DEFAULT_BATCH_DELAY,
};
pub use request::{build, ImageRequest, RequestAssets, RequestBody};
pub use response::{interpret, truncate_text, GenerationResponse};
pub use transport::{HttpReply, HttpTransport, Transport, DEFAULT_TIMEOUT};
