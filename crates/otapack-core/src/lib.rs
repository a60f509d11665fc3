mod channel;
mod error_code;
mod invocation;

pub use channel::{ChannelCommand, ChannelError, ChannelTranscript, CommandChannel};
pub use error_code::{CauseCode, ErrorCode};
pub use invocation::{Invocation, InvocationError, ProtocolVersion};
