mod error;
mod forward;
mod server;
mod streaming;

pub use error::ProxyError;
pub use forward::{
    API_KEY_PARAM, BUFFERED_STRIPPED_HEADERS, HOP_BY_HOP_HEADERS, OutboundRequest,
    STREAMING_STRIPPED_HEADERS, UpstreamOutcome, UpstreamResponse, build_upstream_url,
    dispatch_buffered, dispatch_streaming, filter_request_headers, relay_headers,
    wants_event_stream,
};
pub use server::{AppState, LIVENESS_MESSAGE, ProxyServer, build_client, create_router};
pub use streaming::{BufferHandle, BufferedStream, StreamEnd, StreamingProxy, TeeResult, TeeStream};
