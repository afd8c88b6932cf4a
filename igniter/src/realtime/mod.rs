//! Realtime layer: SSE multiplexing, channels, and scoped revalidation
//!
//! Clients hold one SSE connection to the reserved `__realtime__` endpoint,
//! declaring scope identifiers and channel subscriptions at connect time.
//! Mutations that call `revalidate` on their response publish through the
//! bus after the response commits; connected clients whose scopes intersect
//! receive a `revalidate` frame and refetch. Stream actions ride the same
//! machinery with a dedicated connection per request.

mod bus;
mod connection;
mod frame;
mod stream;

pub use bus::{RealtimeBus, StreamHandle, REVALIDATE_CHANNEL};
pub use connection::{Connection, ConnectionId};
pub use frame::StreamFrame;

pub(crate) use stream::{handle_realtime, sse_response};
