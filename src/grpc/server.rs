use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::client_service::ClientServiceHandler;
use crate::grpc::node_service::NodeControlHandler;
use crate::proto::client_service_server::ClientServiceServer;
use crate::proto::node_control_service_server::NodeControlServiceServer;

/// Serve the worker-facing endpoint on an already bound listener until
/// `shutdown` is cancelled.
pub async fn serve_node_control(
    listener: TcpListener,
    handler: NodeControlHandler,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    tracing::info!(addr = ?listener.local_addr().ok(), "Starting node control server");

    Server::builder()
        .add_service(NodeControlServiceServer::new(handler))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.cancelled().await
        })
        .await
}

/// Serve the client-facing endpoint on an already bound listener until
/// `shutdown` is cancelled.
pub async fn serve_client(
    listener: TcpListener,
    handler: ClientServiceHandler,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    tracing::info!(addr = ?listener.local_addr().ok(), "Starting client server");

    Server::builder()
        .add_service(ClientServiceServer::new(handler))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.cancelled().await
        })
        .await
}
