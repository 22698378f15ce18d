use clap::Parser;
use failure::{format_err, Error};
use futures_util::{SinkExt, StreamExt};
use log::{error, info};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

const SHUTDOWN_MARKER: &str = "Server is shutting down";

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-based client for the chat relay", long_about = None)]
struct Args {
    /// Server host
    #[arg(default_value = "localhost")]
    host: String,
    /// Server port
    #[arg(default_value_t = 12345)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"),
    );
    let args = Args::parse();

    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .map_err(|e| format_err!("Failed to connect to {}:{}: {}", args.host, args.port, e))?;
    info!("Connected to {}:{}", args.host, args.port);

    let (reader, writer) = stream.into_split();
    let mut from_server = FramedRead::new(reader, LinesCodec::new());
    let mut to_server = FramedWrite::new(writer, LinesCodec::new());
    let mut stdin = FramedRead::new(tokio::io::stdin(), LinesCodec::new());

    loop {
        tokio::select! {
            line = from_server.next() => match line {
                Some(Ok(line)) => {
                    println!("{}", line);
                    if line.contains(SHUTDOWN_MARKER) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Lost connection to server: {}", e);
                    break;
                }
                None => {
                    println!("Disconnected from chat server.");
                    break;
                }
            },
            input = stdin.next() => match input {
                Some(Ok(input)) => {
                    let input = input.trim();
                    if !input.is_empty() {
                        to_server.send(input.to_owned()).await?;
                    }
                }
                Some(Err(e)) => {
                    error!("Error reading input: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    Ok(())
}
