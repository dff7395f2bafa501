use auction_server::message::{ClientMessage, ServerMessage, decode_server_line, encode_line};

use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use structopt::StructOpt;

/// Command-line options for the client
#[derive(Debug, StructOpt)]
#[structopt(name = "auction_client", about = "Text client for the auction server")]
struct Opt {
    /// Server address, e.g., 127.0.0.1:9999
    #[structopt(short, long, default_value = "127.0.0.1:9999")]
    server_addr: String,

    /// Bidder name shown to everyone
    #[structopt(short, long)]
    name: String,
}

/// Connects to the auction server
fn connect(addr: &str) -> io::Result<(TcpStream, BufReader<TcpStream>)> {
    let stream = TcpStream::connect(addr)?;
    let reader = BufReader::new(stream.try_clone()?);
    println!("Connected to auction server at {}", addr);
    Ok((stream, reader))
}

/// Turns a server record into a line for the terminal
fn render(message: &ServerMessage) -> String {
    match message {
        ServerMessage::Welcome {
            item_name,
            description,
            starting_price,
            current_price,
            current_winner,
            message,
        } => format!(
            "{}\n  Item: {}\n  {}\n  Starting price: ${}\n  Current price: ${} ({})",
            message,
            item_name,
            description,
            starting_price,
            current_price,
            current_winner.as_deref().unwrap_or("no bids yet")
        ),
        ServerMessage::GameStart { message, duration } => {
            format!("{} You have {} seconds.", message, duration)
        }
        ServerMessage::NewPrice { message, .. } => format!("NEW PRICE: {}", message),
        ServerMessage::Error { message } => format!("ERROR: {}", message),
        ServerMessage::UpdateTimer { remaining } => {
            format!("Time left: {:02}:{:02}", remaining / 60, remaining % 60)
        }
        ServerMessage::Warning { message, .. } => format!("!!! {}", message),
        ServerMessage::Winner { message, .. } => format!("*** {}", message),
        ServerMessage::NoWinner { message } => format!("*** {}", message),
        ServerMessage::Shutdown { message } => message.clone(),
    }
}

/// Parses `<amount>` or `bid <amount>`
fn parse_bid(input: &str) -> Option<f64> {
    let amount = match input.split_whitespace().collect::<Vec<_>>().as_slice() {
        [amount] => *amount,
        [cmd, amount] if cmd.eq_ignore_ascii_case("bid") => *amount,
        _ => return None,
    };
    amount
        .trim_start_matches('$')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Auction client main loop
fn main() -> io::Result<()> {
    let opt = Opt::from_args();
    let (mut stream, reader) = connect(&opt.server_addr)?;
    let finished = Arc::new(AtomicBool::new(false));

    // Print every record the server pushes
    {
        let finished = finished.clone();
        thread::spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else { break };
                match decode_server_line(&line) {
                    Ok(message) => {
                        println!("{}", render(&message));
                        if matches!(message, ServerMessage::Shutdown { .. }) {
                            break;
                        }
                    }
                    Err(e) => eprintln!("Unreadable record from server: {}", e),
                }
            }
            println!("Connection closed. Press Enter to exit.");
            finished.store(true, Ordering::SeqCst);
        });
    }

    let stdin = io::stdin();
    for input in stdin.lock().lines() {
        let input = input?;
        let command = input.trim();

        if finished.load(Ordering::SeqCst) || command.eq_ignore_ascii_case("EXIT") {
            break;
        }
        if command.is_empty() {
            continue;
        }

        let Some(value) = parse_bid(command) else {
            println!("Enter an amount, e.g. '1500' or 'bid 1500'. Type 'exit' to quit.");
            continue;
        };

        let bid = ClientMessage::Bid {
            user: opt.name.clone(),
            value,
        };
        let record = encode_line(&bid).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        stream.write_all(record.as_bytes())?;
        stream.flush()?;
    }

    println!("Exiting client.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_no_server() {
        let result = connect("127.0.0.1:1"); // assuming nothing is listening
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_bid() {
        assert_eq!(parse_bid("1500"), Some(1500.0));
        assert_eq!(parse_bid("bid 1600"), Some(1600.0));
        assert_eq!(parse_bid("BID $1700.5"), Some(1700.5));
        assert_eq!(parse_bid("-3"), None);
        assert_eq!(parse_bid("lots"), None);
        assert_eq!(parse_bid("bid 1 2"), None);
    }

    #[test]
    fn test_render_timer() {
        assert_eq!(
            render(&ServerMessage::UpdateTimer { remaining: 65 }),
            "Time left: 01:05"
        );
    }
}
