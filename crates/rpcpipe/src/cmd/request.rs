use rpcpipe_client::{Client, ReconnectPolicy};
use tracing::debug;

use crate::cmd::{parse_json_arg, parse_timeout, GlobalArgs, RequestArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_response, OutputFormat};

pub async fn run(args: RequestArgs, globals: &GlobalArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = parse_json_arg(&args.args)?;
    let mut config = globals.connect_config()?.with_reconnect(ReconnectPolicy::disabled());
    if let Some(timeout) = &args.timeout {
        config = config.with_request_timeout(parse_timeout(timeout)?);
    }

    let client = Client::new(config).map_err(|err| client_error("invalid configuration", err))?;
    let ready = client
        .connect()
        .await
        .map_err(|err| client_error("connect failed", err))?;
    debug!(?ready, "peer ready");

    let result = client
        .request(&args.command, payload, args.evt.as_deref())
        .await;
    if let Err(err) = client.close().await {
        debug!(%err, "close after request failed");
    }

    let data = result.map_err(|err| client_error(&args.command, err))?;
    print_response(&args.command, &data, format);
    Ok(SUCCESS)
}
