use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use upload_proxy::Server;
use upload_relay::config::UploadConfig;
use upload_relay::disk::ShardLayout;
use upload_relay::intercept::Interceptor;

#[derive(Parser, Debug)]
#[command(name = "upload-proxy")]
#[command(about = "Buffers POST uploads before relaying them to the origin", long_about = None)]
struct Cli {
    /// Relay configuration file
    #[arg(short, long, default_value = "upload.conf")]
    config: PathBuf,

    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder().with_max_level(cli.log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = UploadConfig::load(&cli.config);
    if config.use_disk_buffer
        && let Err(e) = ShardLayout::from_config(&config).bootstrap()
    {
        warn!(cause = %e, "disk buffer directories unavailable, buffering in memory only");
        config.use_disk_buffer = false;
    }
    info!(
        use_disk_buffer = config.use_disk_buffer,
        convert_url = config.convert_url,
        mem_buffer_size = config.mem_buffer_size,
        chunk_size = config.chunk_size,
        thread_num = config.thread_num,
        "upload relay configured"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().max_blocking_threads(config.thread_num).build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(cause = %e, "can't build runtime");
            return ExitCode::FAILURE;
        }
    };

    let interceptor = Interceptor::new(Arc::new(config));
    runtime.block_on(async move {
        let server = match Server::bind(cli.listen, interceptor).await {
            Ok(server) => server,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return ExitCode::FAILURE;
            }
        };
        server.serve().await;
        ExitCode::SUCCESS
    })
}
