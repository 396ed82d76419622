use std::io;

use thiserror::Error;

/// Construction failures. Binding is the only fallible stage; everything past
/// it either logs or is absorbed on the shutdown path.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to bind http listener on port {port}")]
    HttpBind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind grpc listener on port {port}")]
    GrpcBind {
        port: u16,
        #[source]
        source: io::Error,
    },
}
