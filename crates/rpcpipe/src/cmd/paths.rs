use rpcpipe_transport::EndpointResolver;

use crate::cmd::{GlobalArgs, PathsArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_paths, OutputFormat};

pub fn run(_args: PathsArgs, globals: &GlobalArgs, format: OutputFormat) -> CliResult<i32> {
    let config = globals.client_config()?;
    let paths = EndpointResolver::new(config.endpoint).candidate_paths();
    print_paths(&paths, format);
    Ok(SUCCESS)
}
