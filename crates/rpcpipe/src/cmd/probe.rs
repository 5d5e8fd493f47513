use rpcpipe_transport::{probe_for_alternate_endpoint, HyperProbe};
use serde::Serialize;

use crate::cmd::{parse_timeout, GlobalArgs, ProbeArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct ProbeOutput {
    address: String,
    url: String,
}

pub async fn run(args: ProbeArgs, globals: &GlobalArgs, format: OutputFormat) -> CliResult<i32> {
    let mut probe = globals.client_config()?.probe;
    if let Some(port) = args.base_port {
        probe.base_port = port;
    }
    if let Some(timeout) = &args.timeout {
        probe.attempt_timeout = parse_timeout(timeout)?;
    }

    let http = HyperProbe::new(probe.attempt_timeout);
    let found = probe_for_alternate_endpoint(&http, &probe, args.attempts)
        .await
        .map_err(|err| transport_error("probe failed", err))?;

    let out = ProbeOutput {
        address: found.to_string(),
        url: format!("http://{found}"),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Side channel:");
            println!("  Address: {}", out.address);
            println!("  URL:     {}", out.url);
        }
        OutputFormat::Raw => println!("{}", out.address),
    }
    Ok(SUCCESS)
}
