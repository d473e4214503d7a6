use anyhow::Result;
use clap::Parser;
use common::{resolve_ipv4, ICMPSocket, Logger};
use log::info;
mod args;
mod icmp;
mod logger;
mod packet;
mod ping_client;
mod stats;

fn main() -> Result<()> {
    let args = args::Opts::parse();
    let _log_handle =
        flexi_logger::Logger::try_with_env_or_str(args.log_spec())?.start()?;

    let dst_addr = resolve_ipv4(&args.destination)?;
    let socket = ICMPSocket::new(args.iface.as_deref())?;
    let logger = match args.file.as_ref() {
        Some(file_name) => Some(Logger::new(file_name)?),
        None => None,
    };
    if let Some(iface) = args.iface.as_deref() {
        info!("bound to interface {}", iface);
    }

    // ICMP identifiers are 16 bits, keep the low half of the pid
    let identifier = std::process::id() as u16;
    let mut client = icmp::ICMPClient::new(
        socket,
        ping_client::SystemClock,
        dst_addr,
        identifier,
        args.count,
        logger,
    );
    let summary = client.run()?;

    println!("\n--- {} ping statistics ---", args.destination);
    println!("{}", summary);
    Ok(())
}
