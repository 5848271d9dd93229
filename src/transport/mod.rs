//! gRPC transport helpers: client channels and the server trace layer.

use tonic::transport::{Channel, Endpoint};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Turn a configured address into a URI tonic accepts.
///
/// Accepts `host:port`, `:port` (local host) and full `http(s)://` URIs.
pub fn grpc_uri(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else if let Some(port) = address.strip_prefix(':') {
        format!("http://localhost:{}", port)
    } else {
        format!("http://{}", address)
    }
}

/// Connect to a gRPC service, failing if it is not reachable now.
pub async fn connect_to_address(address: &str) -> Result<Channel, Box<dyn std::error::Error>> {
    let uri = grpc_uri(address);
    info!(address = %address, transport = "tcp", "Connecting to service");
    let channel = Channel::from_shared(uri)?.connect().await?;
    Ok(channel)
}

/// Build a channel that connects on first use.
///
/// Calls made while the service is down fail individually instead of
/// blocking startup.
pub fn lazy_channel(address: &str) -> Result<Channel, Box<dyn std::error::Error>> {
    let uri = grpc_uri(address);
    info!(address = %address, transport = "tcp", "Using lazy channel to service");
    Ok(Endpoint::from_shared(uri)?.connect_lazy())
}

/// Tower trace layer that opens one span per gRPC request.
///
/// The span carries the request path and the caller's `x-request-id`
/// header when present.
pub fn grpc_trace_layer() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::GrpcErrorsAsFailures>,
    impl Fn(&http::Request<tonic::body::BoxBody>) -> tracing::Span + Clone,
> {
    TraceLayer::new_for_grpc().make_span_with(|request: &http::Request<tonic::body::BoxBody>| {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let path = request.uri().path();
        tracing::info_span!("grpc", %request_id, %path)
    })
}
