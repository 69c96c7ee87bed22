//! Interception of the host app's HTTP traffic

mod hook;
mod network;
mod rules;
mod transport;

pub use hook::{CaptureContext, CaptureInterceptor, HOOK_NAME, MAX_BODY_CAPTURE_BYTES};
pub use network::{Interceptor, NetworkConfiguration, NetworkSession, Next};
pub use rules::IgnoreRules;
pub use transport::{
    BodyStream, HttpRequest, HttpResponse, ReqwestTransport, RequestBody, Transport,
    TransportError,
};
