//! Client side of the wire protocol plus the interactive console.

pub mod console;

pub use console::{Console, ConsoleAction, Lang};

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::{Error, Result};

/// One round trip: connect, write `command:payload`, half-close, read to EOF.
pub async fn send_command(
    addr: SocketAddr,
    command: &str,
    payload: &str,
    timeout: Duration,
) -> Result<String> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream
            .write_all(format!("{}:{}", command, payload).as_bytes())
            .await?;
        stream.shutdown().await?;
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await?;
        Ok::<_, std::io::Error>(String::from_utf8_lossy(&raw).into_owned())
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(Error::Connection(format!("{}: {}", addr, e))),
        Err(_) => Err(Error::Connection(format!(
            "{}: no response within {} ms",
            addr,
            timeout.as_millis()
        ))),
    }
}

/// Interactive loop over stdin until `q` or EOF.
pub async fn run_console(addr: SocketAddr, timeout: Duration) -> Result<()> {
    let mut console = Console::new();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout.write_all(banner(addr).as_bytes()).await?;
    loop {
        stdout.write_all(b"stackscope > ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let output = match console.execute(&line) {
            ConsoleAction::Quit => break,
            ConsoleAction::Nothing => continue,
            ConsoleAction::Print(text) => text,
            ConsoleAction::Clear => format!("\x1b[2J\x1b[H{}", banner(addr)),
            ConsoleAction::Send { command, payload } => {
                match send_command(addr, command, &payload, timeout).await {
                    Ok(response) => {
                        console.record(&response);
                        response
                    }
                    Err(e) => {
                        tracing::debug!("Request {} failed: {}", command, e);
                        format!("[ERROR] {}", e)
                    }
                }
            }
        };
        stdout.write_all(output.as_bytes()).await?;
        if !output.ends_with('\n') {
            stdout.write_all(b"\n").await?;
        }
    }
    Ok(())
}

fn banner(addr: SocketAddr) -> String {
    format!(
        "[stackscope] Server: {}\n[stackscope] Type 'help' for commands\n",
        addr
    )
}
