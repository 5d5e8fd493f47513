use rpcpipe_client::{Client, ClientEvent};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::cmd::{parse_json_arg, GlobalArgs, SubscribeArgs};
use crate::exit::{client_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_event, OutputFormat};

pub async fn run(args: SubscribeArgs, globals: &GlobalArgs, format: OutputFormat) -> CliResult<i32> {
    let sub_args = parse_json_arg(&args.args)?;
    let config = globals.connect_config()?;

    let client = Client::new(config).map_err(|err| client_error("invalid configuration", err))?;
    let mut lifecycle = client.lifecycle();
    client
        .connect()
        .await
        .map_err(|err| client_error("connect failed", err))?;

    let (tx, mut events) = mpsc::unbounded_channel::<Value>();
    let subscription = client
        .subscribe(&args.evt, sub_args, move |data| {
            let _ = tx.send(data.clone());
        })
        .await
        .map_err(|err| client_error("subscribe failed", err))?;
    info!(evt = %args.evt, "subscribed");

    let mut printed = 0usize;
    let outcome = loop {
        tokio::select! {
            data = events.recv() => {
                let Some(data) = data else { break Ok(()) };
                print_event(&args.evt, &data, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break Ok(());
                }
            }
            event = lifecycle.recv() => match event {
                Ok(ClientEvent::ReconnectExhausted { attempts }) => {
                    break Err(CliError::new(
                        TRANSPORT_ERROR,
                        format!("connection lost; gave up after {attempts} reconnect attempts"),
                    ));
                }
                Ok(ClientEvent::Disconnected { reason }) => warn!(%reason, "disconnected"),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break Ok(());
            }
        }
    };

    if outcome.is_ok() {
        if let Err(err) = subscription.unsubscribe().await {
            warn!(%err, "unsubscribe failed");
        }
    }
    let _ = client.close().await;
    outcome.map(|()| SUCCESS)
}
