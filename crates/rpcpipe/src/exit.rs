use std::fmt;
use std::io;

use rpcpipe_client::ClientError;
use rpcpipe_frame::FrameError;
use rpcpipe_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        FrameError::UnknownOpcode(_)
        | FrameError::PayloadTooLarge { .. }
        | FrameError::MalformedPayload(_)
        | FrameError::Encoding(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    match err {
        ClientError::Transport(err) => transport_error(context, err),
        ClientError::Frame(err) => frame_error(context, err),
        ClientError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ClientError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        ClientError::ConnectionFailed(_) | ClientError::ReconnectExhausted { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        ClientError::RequestTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn client_errors_map_to_exit_codes() {
        let cases = [
            (ClientError::ConnectionFailed("none".into()), TRANSPORT_ERROR),
            (ClientError::ReconnectExhausted { attempts: 5 }, TRANSPORT_ERROR),
            (ClientError::RequestTimeout(Duration::from_secs(1)), TIMEOUT),
            (ClientError::Config("bad".into()), USAGE),
            (ClientError::ConnectionLost, FAILURE),
            (
                ClientError::RequestFailed {
                    code: 4005,
                    message: "Invalid guild".into(),
                },
                FAILURE,
            ),
            (ClientError::Frame(FrameError::UnknownOpcode(9)), DATA_INVALID),
        ];
        for (err, code) in cases {
            let label = err.to_string();
            assert_eq!(client_error("request", err).code, code, "{label}");
        }
    }

    #[test]
    fn io_errors_keep_context() {
        let err = io_error(
            "connect",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
        assert_eq!(err.to_string(), "connect: denied");
    }
}
