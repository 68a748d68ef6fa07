//! A one-shot lookup utility exercising the resolver end to end

use std::env;
use std::net::IpAddr;
use std::sync::Arc;

use getopts::Options;

use meridian::dns::context::{ResolveStrategy, ServerContext};
use meridian::dns::protocol::{QueryClass, QueryType, ResultCode};
use meridian::dns::resolve::DnsResolver;

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options] DOMAIN", program);
    print!("{}", opts.usage(&brief));
}

fn parse_qtype(value: &str) -> QueryType {
    match value.to_uppercase().as_str() {
        "A" => QueryType::A,
        "NS" => QueryType::Ns,
        "CNAME" => QueryType::Cname,
        "SOA" => QueryType::Soa,
        "WKS" => QueryType::Wks,
        "PTR" => QueryType::Ptr,
        "HINFO" => QueryType::Hinfo,
        "MX" => QueryType::Mx,
        "TXT" => QueryType::Txt,
        "AAAA" => QueryType::Aaaa,
        "ANY" => QueryType::Any,
        other => QueryType::from_num(other.parse().unwrap_or(0)),
    }
}

#[tokio::main]
async fn main() {
    simple_logger::init_with_level(log::Level::Warn).expect("Failed to initialize logger");

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("t", "type", "The record type to query (default A)", "TYPE");
    opts.optopt(
        "s",
        "server",
        "Forward the query to this server instead of recursing",
        "IP",
    );

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            return;
        }
    };

    if opt_matches.opt_present("h") || opt_matches.free.is_empty() {
        print_usage(&program, opts);
        return;
    }

    let qname = opt_matches.free[0].to_lowercase();
    let qtype = parse_qtype(&opt_matches.opt_str("t").unwrap_or_else(|| "A".to_string()));

    let mut context = Arc::new(ServerContext::new());

    if let Some(server) = opt_matches
        .opt_str("s")
        .and_then(|x| x.parse::<IpAddr>().ok())
    {
        if let Some(ctx) = Arc::get_mut(&mut context) {
            ctx.resolve_strategy = ResolveStrategy::Forward {
                host: server,
                port: 53,
            };
        }
    }

    let mut resolver = context.create_resolver(context.clone());

    match resolver.resolve(&qname, qtype, QueryClass::In, true).await {
        Ok(packet) => {
            if packet.header.rescode != ResultCode::NOERROR {
                println!(";; response code: {:?}", packet.header.rescode);
            }

            for rec in &packet.answers {
                println!("{}", rec);
            }

            if !packet.authorities.is_empty() {
                println!(";; authority");
                for rec in &packet.authorities {
                    println!("{}", rec);
                }
            }

            if !packet.resources.is_empty() {
                println!(";; additional");
                for rec in &packet.resources {
                    println!("{}", rec);
                }
            }
        }
        Err(e) => {
            eprintln!("lookup of {} failed: {}", qname, e);
            std::process::exit(1);
        }
    }
}
