mod commands;

use commands::{App, Cli, Commands};
use facthound::config::Config;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse_args();
    if let Commands::ShowConfig = cli.command {
        Config::show();
        return Ok(());
    }

    let config = Config::parse_from_file(&cli.config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(async {
        let app = App::setup(config)?;
        app.dispatch(cli.command).await
    });
    // a cancelled signature prompt may still be blocked on stdin
    runtime.shutdown_background();
    result
}
