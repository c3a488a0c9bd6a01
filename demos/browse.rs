//! Query for a service type and print every service announced in responses.

use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use lanmdns::dns::{DnsType, Packet, RData};
use lanmdns::{MdnsConfig, MdnsEvent, MdnsService};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
struct Cli {
    #[clap(long)]
    #[arg(default_value_t = false)]
    verbose: bool,

    #[clap(long)]
    config: Option<String>,

    /// seconds to run
    #[clap(long)]
    #[arg(default_value_t = 10)]
    timeout: u64,

    /// seconds between queries
    #[clap(long)]
    #[arg(default_value_t = 3)]
    interval: u64,

    #[arg(default_value_t = String::from("_http._tcp.local."))]
    service_type: String,
}

fn print_response(data: &[u8], packet: &Packet, seen: &mut HashSet<String>) {
    for rr in packet.answers.iter().chain(&packet.additionals) {
        let parsed = match rr.parse_data(data) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("bad {:?} record for {}: {}", rr.rtype, rr.name, e);
                continue;
            }
        };
        let line = match parsed {
            RData::Name(target) if rr.rtype == DnsType::PTR => format!("PTR {} -> {}", rr.name, target),
            RData::Srv { port, target, .. } => format!("SRV {} -> {}:{}", rr.name, target, port),
            RData::A(ip) => format!("A   {} -> {}", rr.name, ip),
            RData::Aaaa(ip) => format!("AAAA {} -> {}", rr.name, ip),
            RData::Txt(entries) => format!("TXT {} -> {:?}", rr.name, entries),
            _ => continue,
        };
        if rr.ttl == 0 {
            println!("gone: {}", line);
            seen.remove(&line);
        } else if seen.insert(line.clone()) {
            println!("{}", line);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { log::LevelFilter::Trace } else { log::LevelFilter::Error };

    env_logger::Builder::new()
        .parse_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(log_level)
        .format_line_number(true)
        .format_file(true)
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    let config = match &cli.config {
        Some(path) => MdnsConfig::load(path)?,
        None => MdnsConfig::default(),
    };
    let service = Arc::new(MdnsService::new(config));
    let mut events = service.subscribe();

    let cancel = CancellationToken::new();
    let runner = service.clone();
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { runner.start(&run_cancel).await });

    let querier = service.clone();
    let service_type = cli.service_type.clone();
    let query_cancel = cancel.clone();
    let interval = Duration::from_secs(cli.interval.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = query_cancel.cancelled() => break,
            }
            if let Err(e) = querier.send_query(&service_type).await {
                log::warn!("query failed: {}", e);
            }
        }
    });

    let mut seen = HashSet::new();
    let deadline = tokio::time::sleep(Duration::from_secs(cli.timeout));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(MdnsEvent::ResponseReceived(datagram, packet)) => {
                    print_response(&datagram.data, &packet, &mut seen)
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    cancel.cancel();
    task.await??;
    Ok(())
}
