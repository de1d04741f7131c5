// Per-client update streams
//
// A session subscribes to the bus, sends the snapshot its client is missing,
// then drains the subscription on a fixed tick, coalescing tiles and
// characters before writing frames to the client's SSE body.

// Public API - what other modules can use
pub use coalesce::{CharacterCoalescer, TileBatch};
pub use handlers::{poll_updates, stream_updates, PollResponse, SinceQuery};
pub use session::{SessionError, SessionState, StreamSession};
pub use sink::{sse_channel, FrameSink, SessionStream, SinkError, SseSink};

// Internal modules
mod coalesce;
pub mod frames;
mod handlers;
mod session;
mod sink;
