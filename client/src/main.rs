use clap::Parser;
use client::network::{ClientError, ServerProxy};
use client::view::{spawn_dispatcher, ConsoleView};
use shared::Position;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command line arguments.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Lobby server IP address
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Lobby server UDP port
    #[clap(short, long, default_value = "9090")]
    port: u16,
    /// Discovery name the lobby is bound under
    #[clap(short, long, default_value = "LobbyServer")]
    service: String,
}

const HELP: &str = "\
Commands:
  name <nickname>            claim a nickname
  create <capacity>          create a game and wait for players
  join                       join the first game with a free seat
  recover                    rebuild your interrupted game
  exists                     check whether you have a recoverable game
  lobbies                    list games still waiting for players
  move <r,c> [r,c ...] <col> pick tiles and place them in a shelf column
  chat <text>                message everyone in your match
  whisper <to> <text>        message one player in your match
  quit                       disconnect and exit";

/// Connects to the lobby and drives the proxy from a line-oriented prompt.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let view_tx = spawn_dispatcher(Arc::new(ConsoleView));
    let lobby_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let proxy = ServerProxy::connect(lobby_addr, &args.service, view_tx).await?;

    println!("{}", HELP);
    let mut nickname: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            [] => Ok(()),
            ["help"] => {
                println!("{}", HELP);
                Ok(())
            }
            ["name", name] => match proxy.choose_nickname(name).await {
                Ok(()) => {
                    nickname = Some(name.to_string());
                    println!("Nickname '{}' is yours", name);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            ["create", capacity] => match (capacity.parse::<usize>(), nickname.as_deref()) {
                (Ok(capacity), Some(name)) => match proxy.create_game(capacity, name).await {
                    Ok(endpoint) => proxy.connect_to_match(&endpoint).await,
                    Err(e) => Err(e),
                },
                (Err(_), _) => {
                    println!("Usage: create <capacity>");
                    Ok(())
                }
                (_, None) => no_nickname(),
            },
            ["join"] => match nickname.as_deref() {
                Some(name) => match proxy.join_game(name).await {
                    Ok(endpoint) => proxy.connect_to_match(&endpoint).await,
                    Err(e) => Err(e),
                },
                None => no_nickname(),
            },
            ["recover"] => match nickname.as_deref() {
                Some(name) => match proxy.recover_game(name).await {
                    Ok(endpoint) => proxy.connect_to_match(&endpoint).await,
                    Err(e) => Err(e),
                },
                None => no_nickname(),
            },
            ["exists"] => match nickname.as_deref() {
                Some(name) => match proxy.game_exists(name).await {
                    Ok(true) => {
                        println!("You have a recoverable game");
                        Ok(())
                    }
                    Ok(false) => {
                        println!("No recoverable game for you");
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                None => no_nickname(),
            },
            ["lobbies"] => match nickname.as_deref() {
                Some(name) => match proxy.get_lobbies(name).await {
                    Ok(lobbies) => {
                        for lobby in lobbies {
                            println!(
                                "  {} ({}/{} players)",
                                lobby.name, lobby.connected, lobby.capacity
                            );
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                None => no_nickname(),
            },
            ["move", rest @ ..] if rest.len() >= 2 => match nickname.as_deref() {
                Some(name) => {
                    let (picks, column) = rest.split_at(rest.len() - 1);
                    match (parse_positions(picks), column[0].parse::<usize>()) {
                        (Some(positions), Ok(column)) => {
                            proxy.make_move(positions, column, name).await
                        }
                        _ => {
                            println!("Usage: move <row,col> [row,col ...] <column>");
                            Ok(())
                        }
                    }
                }
                None => no_nickname(),
            },
            ["chat", rest @ ..] if !rest.is_empty() => match nickname.as_deref() {
                Some(name) => proxy.message_all(&rest.join(" "), name).await,
                None => no_nickname(),
            },
            ["whisper", to, rest @ ..] if !rest.is_empty() => match nickname.as_deref() {
                Some(name) => proxy.message_someone(&rest.join(" "), name, to).await,
                None => no_nickname(),
            },
            ["quit"] => {
                proxy.graceful_disconnection();
                break;
            }
            _ => {
                println!("Unknown command, type 'help'");
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("Error: {}", e);
        }
        if !proxy.is_online() {
            break;
        }
    }

    Ok(())
}

fn no_nickname() -> Result<(), ClientError> {
    println!("Claim a nickname first: name <nickname>");
    Ok(())
}

/// Parses `row,col` pairs.
fn parse_positions(words: &[&str]) -> Option<Vec<Position>> {
    words
        .iter()
        .map(|word| {
            let (row, col) = word.split_once(',')?;
            Some(Position {
                row: row.parse().ok()?,
                col: col.parse().ok()?,
            })
        })
        .collect()
}
