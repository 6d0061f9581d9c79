//! Command-line DNS stub-resolver client.
//!
//! Sends a single A, NS, or MX query to a DNS server over UDP and prints
//! the decoded answer and additional sections as tab-separated report
//! lines, one per record.
//!
//! # Usage
//!
//! ```bash
//! # A record (the default type)
//! dnsq @8.8.8.8 www.example.com
//!
//! # Mail exchange records, custom timeout and retry bound
//! dnsq -t 10 -r 2 --mx @8.8.8.8 example.com
//!
//! # Name server records on a non-standard port
//! dnsq -p 5353 --ns @192.168.1.1 example.com
//! ```
//!
//! Terminal errors print a single `ERROR`-prefixed line and exit with a
//! non-zero status. A name that does not exist prints `NOTFOUND` and exits
//! zero; it is an answer, not a failure.

use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dnsq::dns::QueryType;
use dnsq::resolver::{DnsError, Outcome, Resolver, ResolverConfig};

#[derive(Parser)]
#[command(name = "dnsq", version, about = "A minimal DNS stub-resolver client")]
struct Cli {
    /// Query timeout in seconds
    #[arg(short = 't', long, default_value_t = 5)]
    timeout: u64,

    /// Maximum number of retries after a timeout
    #[arg(short = 'r', long = "retries", default_value_t = 3)]
    max_retries: u32,

    /// DNS server port
    #[arg(short = 'p', long, default_value_t = 53)]
    port: u16,

    /// Query mail exchange (MX) records
    #[arg(long, conflicts_with = "ns")]
    mx: bool,

    /// Query name server (NS) records
    #[arg(long)]
    ns: bool,

    /// IPv4 address of the DNS server, prefixed with '@' (e.g. @8.8.8.8)
    server: String,

    /// Domain name to resolve
    name: String,
}

impl Cli {
    fn query_type(&self) -> QueryType {
        if self.mx {
            QueryType::MX
        } else if self.ns {
            QueryType::NS
        } else {
            QueryType::A
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let server = match parse_server(&cli.server) {
        Ok(addr) => addr,
        Err(err) => {
            println!("ERROR\t{err}");
            return ExitCode::FAILURE;
        }
    };
    let query_type = cli.query_type();

    println!("DnsClient sending request for {}", cli.name);
    println!("Server: {server}");
    println!("Request type: {query_type}\n");

    let config = ResolverConfig {
        server,
        port: cli.port,
        timeout: Duration::from_secs(cli.timeout),
        max_retries: cli.max_retries,
    };
    let mut resolver = Resolver::new(config);

    match resolver.lookup(&cli.name, query_type) {
        Ok(report) => {
            println!(
                "Response received after {:.3} seconds ({} retries)\n",
                report.elapsed.as_secs_f64(),
                report.retries
            );

            if report.outcome == Outcome::NotFound {
                println!("NOTFOUND");
                return ExitCode::SUCCESS;
            }

            println!("***Answer Section ({} records)***\n", report.answers.len());
            for line in report.render_answers() {
                println!("{line}");
            }

            if !report.additionals.is_empty() {
                println!(
                    "\n***Additional Section ({} records)***\n",
                    report.additionals.len()
                );
                for line in report.render_additionals() {
                    println!("{line}");
                }
            }

            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("ERROR\t{err}");
            ExitCode::FAILURE
        }
    }
}

/// Validates the server operand as a dotted-decimal IPv4 address.
///
/// The dig-style `@` prefix is accepted and stripped; each octet must be
/// in 0-255, which `Ipv4Addr` parsing enforces.
fn parse_server(raw: &str) -> Result<Ipv4Addr, DnsError> {
    let address = raw.strip_prefix('@').unwrap_or(raw);
    address
        .parse::<Ipv4Addr>()
        .map_err(|_| DnsError::InvalidServerAddress(raw.to_string()))
}
