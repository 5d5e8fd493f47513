//! A stand-in peer for local testing.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use rpcpipe_client::{
    ClosePayload, HandshakeRequest, Message, CLOSE_INVALID_CLIENT_ID, CMD_SUBSCRIBE,
    CMD_UNSUBSCRIBE, PROTOCOL_VERSION,
};
use rpcpipe_frame::{Frame, FrameError, Opcode, RpcCodec};
use rpcpipe_transport::{IpcListener, IpcStream};
use serde_json::{json, Value};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::cmd::MockArgs;
use crate::exit::{transport_error, CliError, CliResult, INTERNAL, SUCCESS};

const MOCK_ERROR_CODE: i64 = 5000;

pub async fn run(args: MockArgs) -> CliResult<i32> {
    let listener =
        IpcListener::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    info!(path = ?listener.path(), "mock peer listening");
    let error_on = Arc::new(args.error_on);

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => {
                accepted.map_err(|err| transport_error("accept failed", err))?
            }
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| CliError::new(INTERNAL, format!("signal wait failed: {err}")))?;
                info!("interrupted");
                return Ok(SUCCESS);
            }
        };

        let error_on = Arc::clone(&error_on);
        let session = async move {
            if let Err(err) = serve(stream, &error_on).await {
                warn!(%err, "mock session ended with error");
            }
        };
        if args.once {
            session.await;
            return Ok(SUCCESS);
        }
        tokio::spawn(session);
    }
}

async fn serve(stream: IpcStream, error_on: &[String]) -> Result<(), FrameError> {
    let mut framed = Framed::new(stream, RpcCodec::default());

    let Some(first) = framed.next().await.transpose()? else {
        return Ok(());
    };
    if first.opcode != Opcode::Handshake {
        warn!(opcode = %first.opcode, "expected HANDSHAKE");
        return Ok(());
    }
    let hello: HandshakeRequest = first.decode_json()?;
    if let Err(err) = hello.validate(PROTOCOL_VERSION) {
        warn!(%err, "rejecting handshake");
        let close = ClosePayload::new(CLOSE_INVALID_CLIENT_ID, err.to_string());
        framed.send(Frame::json(Opcode::Close, &close)?).await?;
        return Ok(());
    }
    info!(client_id = %hello.client_id, "handshake accepted");
    let ready = Message::ready(json!({
        "v": PROTOCOL_VERSION,
        "config": {"environment": "mock"},
        "user": {"id": "0", "username": "mock"},
    }));
    framed.send(Frame::json(Opcode::Data, &ready)?).await?;

    while let Some(frame) = framed.next().await.transpose()? {
        match frame.opcode {
            Opcode::Data => {
                let msg: Message = frame.decode_json()?;
                for reply in answer(msg, error_on) {
                    framed.send(Frame::json(Opcode::Data, &reply)?).await?;
                }
            }
            Opcode::Ping => framed.send(Frame::new(Opcode::Pong, frame.payload)).await?,
            Opcode::Pong => debug!("pong"),
            Opcode::Close => {
                let close = ClosePayload::from_value(&frame.decode_json::<Value>()?);
                info!(code = close.code, message = %close.message, "client closed");
                return Ok(());
            }
            Opcode::Handshake => warn!("duplicate HANDSHAKE ignored"),
        }
    }
    debug!("client went away");
    Ok(())
}

/// Frames to send back for one DATA message.
fn answer(msg: Message, error_on: &[String]) -> Vec<Message> {
    let Some(nonce) = msg.nonce.as_deref() else {
        debug!(?msg, "message without nonce ignored");
        return Vec::new();
    };
    let cmd = msg.cmd.as_deref().unwrap_or_default();

    if error_on.iter().any(|c| c == cmd) {
        return vec![Message::error_response(
            Some(cmd),
            nonce,
            MOCK_ERROR_CODE,
            &format!("{cmd} failed (mock)"),
        )];
    }

    let args = msg.args.clone().unwrap_or_else(|| json!({}));
    match (cmd, msg.evt.as_deref()) {
        (CMD_SUBSCRIBE, Some(evt)) => vec![
            Message::response(Some(cmd), nonce, json!({ "evt": evt })),
            Message::event(evt, json!({ "subscribed": args })),
        ],
        (CMD_UNSUBSCRIBE, Some(evt)) => {
            vec![Message::response(Some(cmd), nonce, json!({ "evt": evt }))]
        }
        _ => vec![Message::response(Some(cmd), nonce, args)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(cmd: &str, evt: Option<&str>, args: Value) -> Message {
        Message::request(cmd, args, evt, "n-1")
    }

    #[test]
    fn echoes_args_under_same_nonce() {
        let replies = answer(request("GET_GUILD", None, json!({"guild_id": "1"})), &[]);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].nonce.as_deref(), Some("n-1"));
        assert_eq!(replies[0].data, Some(json!({"guild_id": "1"})));
    }

    #[test]
    fn subscribe_is_followed_by_one_event() {
        let replies = answer(
            request(CMD_SUBSCRIBE, Some("MESSAGE_CREATE"), json!({"channel_id": "9"})),
            &[],
        );
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].data, Some(json!({"evt": "MESSAGE_CREATE"})));
        assert_eq!(replies[1].evt.as_deref(), Some("MESSAGE_CREATE"));
        assert!(replies[1].nonce.is_none());
    }

    #[test]
    fn configured_commands_fail() {
        let replies = answer(request("FAIL", None, json!({})), &["FAIL".to_string()]);
        let err = replies[0].error().expect("ERROR response");
        assert_eq!(err.code, MOCK_ERROR_CODE);
    }

    #[test]
    fn messages_without_nonce_get_no_reply() {
        assert!(answer(Message::event("X", json!({})), &[]).is_empty());
    }
}
