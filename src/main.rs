use std::path::Path;

use stackscope::introspect::encoder;
use stackscope::{client, config, demo, Result};

const USAGE: &str = "Usage: stackscope <demo|send <command> [payload]|console|inspect <image>>";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cwd = std::env::current_dir().ok();
    let settings = config::resolve(cwd.as_deref());

    match (args.get(1).map(|s| s.as_str()), args.get(2)) {
        (Some("demo"), _) => demo::run().await,
        (Some("send"), Some(command)) => {
            let payload = args[3..].join(" ");
            let addr = settings.socket_addr()?;
            let response =
                client::send_command(addr, command, &payload, settings.client_timeout()).await?;
            println!("{}", response);
            Ok(())
        }
        (Some("console"), _) => {
            client::run_console(settings.socket_addr()?, settings.client_timeout()).await
        }
        (Some("inspect"), Some(file)) => inspect(Path::new(file)),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    }
}

fn inspect(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let (header, unit) = encoder::decode(&bytes)?;
    let stamp = chrono::DateTime::from_timestamp(header.mtime as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| header.mtime.to_string());

    println!("Image: {}", path.display());
    println!("  magic:   {}", header.magic);
    println!("  flags:   {:#x}", header.flags);
    println!("  mtime:   {}", stamp);
    println!("  payload: {} bytes", header.payload_len);
    println!();
    println!("Disassembly of {}:", unit.describe());
    print!("{}", encoder::disassemble(&unit));
    Ok(())
}
