//! The meridian DNS server daemon

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use getopts::Options;

use meridian::dns::authority::Zone;
use meridian::dns::context::{ResolveStrategy, ServerContext};
use meridian::dns::server::{DnsServer, DnsTcpServer, DnsUdpServer};

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

/// Build an authoritative zone from a `ZONE=IPv4` option value: the zone
/// gets default SOA values and a single A record at its apex.
fn parse_authority(value: &str) -> Option<Zone> {
    let (origin, addr) = value.split_once('=')?;
    let addr: Ipv4Addr = addr.trim().parse().ok()?;

    let origin = origin.trim().trim_end_matches('.').to_lowercase();
    if origin.is_empty() {
        return None;
    }

    let zone = Zone::builder(&origin)
        .soa(
            &format!("ns1.{}", origin),
            &format!("admin.{}", origin),
            1,
            3600,
            1800,
            604800,
            3600,
        )
        .a(&origin, addr, 3600)
        .build();

    Some(zone)
}

#[tokio::main]
async fn main() {
    simple_logger::init().expect("Failed to initialize logger");

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "b",
        "bind",
        "The address to listen on (default 0.0.0.0)",
        "ADDR",
    );
    opts.optopt("p", "port", "The port to listen on (default 53)", "PORT");
    opts.optopt(
        "f",
        "forward-address",
        "Upstream DNS server for forwarding (e.g. 8.8.8.8)",
        "FORWARDIP",
    );
    opts.optflag(
        "x",
        "disable-recursion",
        "Answer from authoritative zones only",
    );
    opts.optmulti(
        "a",
        "authority",
        "Serve an authoritative zone with an A record at its apex (repeatable)",
        "ZONE=IP",
    );
    opts.optflag("", "disable-udp", "Do not serve queries over UDP");
    opts.optflag("", "disable-tcp", "Do not serve queries over TCP");

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            return;
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let mut context = Arc::new(ServerContext::new());

    if let Some(ctx) = Arc::get_mut(&mut context) {
        if let Some(bind) = opt_matches.opt_str("b") {
            ctx.server_config.bind_host = bind;
        }

        if let Some(port) = opt_matches.opt_str("p").and_then(|x| x.parse().ok()) {
            ctx.server_config.bind_port = port;
        }

        if opt_matches.opt_present("f") {
            match opt_matches
                .opt_str("f")
                .and_then(|x| x.parse::<IpAddr>().ok())
            {
                Some(addr) => {
                    ctx.resolve_strategy = ResolveStrategy::Forward {
                        host: addr,
                        port: 53,
                    };
                    log::info!("forwarding queries to {}", addr);
                }
                None => {
                    log::info!("Forward address is not a valid IP - disabling forwarding");
                }
            }
        }

        if opt_matches.opt_present("x") {
            ctx.allow_recursive = false;
        }

        for value in opt_matches.opt_strs("a") {
            match parse_authority(&value) {
                Some(zone) => {
                    log::info!("serving authoritative zone {}", zone.origin);
                    if let Err(e) = ctx.authority.add_zone(zone) {
                        log::error!("failed to add zone: {}", e);
                    }
                }
                None => {
                    log::warn!("ignoring malformed authority option: {}", value);
                }
            }
        }
        if opt_matches.opt_present("disable-udp") {
            ctx.enable_udp = false;
        }
        if opt_matches.opt_present("disable-tcp") {
            ctx.enable_tcp = false;
        }
    }

    log::info!(
        "starting meridian on {}:{}",
        context.server_config.bind_host,
        context.server_config.bind_port
    );

    if context.enable_udp {
        let udp_server = DnsUdpServer::new(context.clone());
        if let Err(e) = udp_server.run_server().await {
            log::error!("failed to bind UDP listener: {}", e);
            return;
        }
    }

    if context.enable_tcp {
        let tcp_server = DnsTcpServer::new(context.clone());
        if let Err(e) = tcp_server.run_server().await {
            log::error!("failed to bind TCP listener: {}", e);
            return;
        }
    }

    // The servers run on background tasks from here on.
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to wait for shutdown signal: {}", e);
    }
    log::info!("shutting down");
}
