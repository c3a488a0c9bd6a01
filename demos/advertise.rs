//! Advertise one service on the local network until the timeout expires.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use lanmdns::{MdnsConfig, MdnsEvent, MdnsService, ServiceRegistration};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
struct Cli {
    #[clap(long)]
    #[arg(default_value_t = false)]
    verbose: bool,

    /// json config file, defaults are used when omitted
    #[clap(long)]
    config: Option<String>,

    /// ipv4 address put into the A record
    #[clap(long)]
    address: Option<String>,

    #[clap(long)]
    host_name: Option<String>,

    /// seconds to run
    #[clap(long)]
    #[arg(default_value_t = 60)]
    timeout: u64,

    /// TXT attribute as key=value, may be repeated
    #[clap(long)]
    txt: Vec<String>,

    #[arg(default_value_t = String::from("_http._tcp.local."))]
    service_type: String,

    #[arg(default_value_t = String::from("lanmdns demo"))]
    instance: String,

    #[arg(default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { log::LevelFilter::Trace } else { log::LevelFilter::Info };

    env_logger::Builder::new()
        .parse_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(log_level)
        .format_line_number(true)
        .format_file(true)
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    let mut config = match &cli.config {
        Some(path) => MdnsConfig::load(path)?,
        None => MdnsConfig::default(),
    };
    if cli.host_name.is_some() {
        config.host_name = cli.host_name.clone();
    }

    let service = Arc::new(MdnsService::new(config));
    if let Some(address) = &cli.address {
        service.set_local_address(address).await?;
    }

    let mut reg = ServiceRegistration::new(&cli.service_type, &cli.instance, cli.port);
    for kv in &cli.txt {
        let (k, v) = kv.split_once('=').context(format!("txt attribute {} is not key=value", kv))?;
        reg = reg.with_txt(k, v);
    }
    let ad = service.advertise(reg).await?;
    println!("advertising {} -> {}:{} ({})", ad.instance_name(), ad.host_name, ad.port, ad.address);

    let mut events = service.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let MdnsEvent::QueryReceived(datagram, packet) = event {
                for q in &packet.questions {
                    log::info!("query from {}: {} {:?}", datagram.remote, q.name, q.qtype);
                }
            }
        }
    });

    let cancel = CancellationToken::new();
    let runner = service.clone();
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { runner.start(&run_cancel).await });

    tokio::time::sleep(Duration::from_secs(cli.timeout)).await;
    service.unadvertise(&ad.service_type, &ad.service_name).await?;
    cancel.cancel();
    task.await??;
    Ok(())
}
