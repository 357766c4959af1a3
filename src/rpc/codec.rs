//! Reply decoding.
//!
//! Replies are decoded positionally against the expected Rust type. The body
//! signature is compared first so that a wrong arity or type is reported as
//! an [`RpcError::ArgumentMismatch`] rather than a generic decode failure.

use serde::de::DeserializeOwned;
use zbus::zvariant::Type;
use zbus::Message;

use super::error::RpcError;

/// A resolved METHOD_RETURN message.
#[derive(Debug, Clone)]
pub struct ReplyMessage {
    message: Message,
}

impl ReplyMessage {
    pub fn new(message: Message) -> Self {
        Self { message }
    }

    /// The serial of the call this message answers.
    pub fn reply_serial(&self) -> Option<u32> {
        self.message.header().reply_serial().map(|s| s.get())
    }

    /// Signature of the reply arguments, without the parentheses zbus puts
    /// around a multi-argument body (empty for no arguments).
    pub fn signature(&self) -> String {
        self.message.body().signature().to_string_no_parens()
    }

    pub fn message(&self) -> &Message {
        &self.message
    }
}

/// Body signature a reply must carry to decode as `T`.
///
/// Tuples describe the whole argument list, so their outer parentheses are
/// not part of the body signature.
pub fn body_signature<T: Type>() -> String {
    T::SIGNATURE.to_string_no_parens()
}

/// Decode the reply arguments as `T`.
///
/// The returned value is owned, so it outlives the reply message.
pub fn extract<T>(reply: &ReplyMessage) -> Result<T, RpcError>
where
    T: DeserializeOwned + Type,
{
    let expected = body_signature::<T>();
    let actual = reply.signature();
    if expected != actual {
        return Err(RpcError::ArgumentMismatch { expected, actual });
    }

    reply
        .message()
        .body()
        .deserialize::<T>()
        .map_err(|e| RpcError::ArgumentMismatch {
            expected,
            actual: format!("{} ({})", actual, e),
        })
}
