// codedrop peer: share a file or directory under a code, or receive one by code.

mod client;
mod config;
mod error;
mod local_addr;
mod receiver;
mod session;
mod sharer;
mod walk;

use std::net::SocketAddr;
use std::path::PathBuf;

use log::{error, info, warn};

use crate::sharer::Sharer;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "usage:
  drop-peer share <path> [--server <host:port>]
  drop-peer receive <code> [--server <host:port>] [--out <dir>]
  drop-peer --version";

#[derive(Debug, PartialEq, Eq)]
enum Cli {
    Version,
    Share {
        path: PathBuf,
        server: Option<String>,
    },
    Receive {
        code: String,
        server: Option<String>,
        out: Option<PathBuf>,
    },
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Cli, String> {
    let mut args = args.into_iter();
    let command = args.next().ok_or("missing command")?;
    if command == "--version" || command == "-V" {
        return Ok(Cli::Version);
    }

    let mut positional = None;
    let mut server = None;
    let mut out = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => return Ok(Cli::Version),
            "--server" => server = Some(args.next().ok_or("--server needs host:port")?),
            "--out" if command == "receive" => {
                out = Some(PathBuf::from(args.next().ok_or("--out needs a directory")?))
            }
            flag if flag.starts_with("--") => return Err(format!("unknown option {}", flag)),
            _ if positional.is_none() => positional = Some(arg.clone()),
            _ => return Err(format!("unexpected argument {}", arg)),
        }
    }

    match command.as_str() {
        "share" => Ok(Cli::Share {
            path: PathBuf::from(positional.ok_or("share needs a path")?),
            server,
        }),
        "receive" => {
            let code = positional.ok_or("receive needs a code")?;
            if !drop_core::is_valid_code(&code) {
                return Err(format!("{:?} is not a valid code", code));
            }
            Ok(Cli::Receive { code, server, out })
        }
        other => Err(format!("unknown command {}", other)),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    if cli == Cli::Version {
        println!("drop-peer {}", VERSION);
        return Ok(());
    }

    drop_core::logging::init("info");
    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli {
            Cli::Share { path, server } => {
                share(&cfg, &path, server.as_deref().unwrap_or(&cfg.server_addr)).await
            }
            Cli::Receive { code, server, out } => {
                let dest = out.unwrap_or_else(|| cfg.download_dir.clone());
                receive(&cfg, &code, server.as_deref().unwrap_or(&cfg.server_addr), &dest).await
            }
            Cli::Version => Ok(()),
        }
    })
}

async fn share(
    cfg: &config::Config,
    path: &std::path::Path,
    server: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let bind = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    let sharer = match Sharer::listen(bind, path, cfg.transfer_options()).await {
        Ok(s) => s,
        Err(e) => {
            error!("cannot share {}: {}", path.display(), e);
            return Err(e.into());
        }
    };
    let code = match sharer.register(server).await {
        Ok(code) => code,
        Err(e) => {
            error!("cannot register with {}: {}", server, e);
            sharer.shutdown().await;
            return Err(e.into());
        }
    };

    let advertised = local_addr::local_advertised_address(sharer.local_addr().port());
    println!("code: {}", code);
    info!(
        "sharing {} as {} at {}; press Ctrl+C to stop",
        sharer.object().name,
        code,
        advertised
    );

    shutdown_signal().await?;
    info!(
        "shutting down; codes {:?} expire on the server",
        sharer.registered_codes().await
    );
    sharer.shutdown().await;
    Ok(())
}

async fn receive(
    cfg: &config::Config,
    code: &str,
    server: &str,
    dest: &std::path::Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = match client::resolve(server, code, cfg.timeout()).await {
        Ok(Some(addr)) => addr,
        Ok(None) => {
            warn!("peer did not exist: no sharer registered under {}", code);
            return Err(format!("no sharer registered under code {}", code).into());
        }
        Err(e) => {
            error!("cannot resolve {} via {}: {}", code, server, e);
            return Err(e.into());
        }
    };
    match receiver::pull(addr, dest, cfg.transfer_options()).await {
        Ok(received) => {
            println!("received {}", received.path.display());
            Ok(())
        }
        Err(e) => {
            error!("pull from {} failed: {}", addr, e);
            Err(e.into())
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn share_and_receive() {
        assert_eq!(
            parse_args(args("share ./docs --server 10.0.0.1:8080")),
            Ok(Cli::Share {
                path: PathBuf::from("./docs"),
                server: Some("10.0.0.1:8080".into()),
            })
        );
        assert_eq!(
            parse_args(args("receive aB3dE6gH9k --out /tmp/in")),
            Ok(Cli::Receive {
                code: "aB3dE6gH9k".into(),
                server: None,
                out: Some(PathBuf::from("/tmp/in")),
            })
        );
        assert_eq!(parse_args(args("--version")), Ok(Cli::Version));
    }

    #[test]
    fn bad_invocations() {
        assert!(parse_args(args("")).is_err());
        assert!(parse_args(args("share")).is_err());
        assert!(parse_args(args("share a b")).is_err());
        assert!(parse_args(args("share ./docs --out x")).is_err());
        assert!(parse_args(args("receive not-a-code!")).is_err());
        assert!(parse_args(args("receive abc --server")).is_err());
        assert!(parse_args(args("fetch abc")).is_err());
    }
}
