use std::time::Duration;

use clap::{Parser, ValueEnum};
use rtspc::{Client, ClientConfig, InterfaceMode};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Method {
    Describe,
    Options,
}

#[derive(Parser)]
#[command(name = "rtspc", about = "Query an RTSP presentation from the command line")]
struct Args {
    /// Presentation URL (rtsp:// for TCP, rtspu:// for UDP)
    url: String,

    /// RTSP method to issue
    #[arg(long, short, value_enum, default_value = "describe")]
    method: Method,

    /// Request timeout in seconds
    #[arg(long, short, default_value_t = 10)]
    timeout: u64,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = ClientConfig {
        interface: InterfaceMode::Blocking,
        timeout: Duration::from_secs(args.timeout),
        ..ClientConfig::default()
    };

    let mut client = match Client::new(config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to create client: {e}");
            std::process::exit(1);
        }
    };

    let presentation = match client.presentation(&args.url) {
        Ok(presentation) => presentation,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let result = {
        let mut p = presentation.lock();
        match args.method {
            Method::Describe => p.describe(None, None),
            Method::Options => p.options(None, None),
        }
    };

    match result {
        Ok(Some(response)) => {
            println!("RTSP/{} {} {}", response.version, response.status, response.reason);
            print!("{}", response.headers);
            if let Some(text) = response.text() {
                println!();
                print!("{text}");
            }
            if !response.is_ok() {
                std::process::exit(2);
            }
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("Request failed: {e}");
            std::process::exit(1);
        }
    }
}
