//! Bootstrap: parse config, ignore SIGPIPE, install the logger, start the reactor.
//!
//! The original ignores SIGPIPE implicitly by checking write() return codes against
//! EPIPE rather than handling the signal; this relies on the process-wide default
//! instead, which would terminate the process on the first write to a peer that already
//! closed its read side. Rust's libc binding exposes the same escape hatch C does.

use clap::Parser;
use evented_http::{ServerConfig, Server};

fn main() {
    let config = ServerConfig::parse();
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        std::process::exit(1);
    }

    ignore_sigpipe();

    if let Err(e) = evented_http::logging::init(&config) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    log::info!("======== server init ========");
    log::info!(
        "port: {}, open linger: {}, threads: {}, doc root: {}",
        config.port,
        config.opt_linger,
        config.thread_count,
        config.doc_root.display()
    );

    let mut server = match Server::bind(&config) {
        Ok(s) => s,
        Err(e) => {
            log::error!("server init error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        log::error!("server loop exited with error: {e}");
        std::process::exit(1);
    }
}

fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
