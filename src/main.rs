//! teleguide - IPTV program guide cache and query tool
//!
//! Refreshes the local schedule cache from a remote JTV archive, then runs
//! one query against it and prints the rows.

use std::collections::HashMap;
use std::fs;

use clap::Parser;
use log::warn;

use teleguide::cli::{Cli, Command};
use teleguide::engine::{GuideEngine, RefreshMessage};
use teleguide::query::{GuideResponse, GuideRow, RowClass};
use teleguide::timestamp::{date_value, today_in};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match cli.to_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    };
    let timezone = config.timezone;

    let engine = GuideEngine::open(config)?;
    if let Some(mut rx) = engine.start_refresh() {
        while let Some(message) = rx.recv().await {
            match message {
                RefreshMessage::Failed(reason) => warn!("guide reload failed: {}", reason),
                RefreshMessage::Completed { .. } => break,
                _ => {}
            }
        }
    }

    let today = date_value(today_in(timezone));
    match cli.command {
        Command::Schedule {
            channel,
            date,
            full_day,
        } => {
            print_rows(engine.schedule(date.unwrap_or(today), &channel, full_day));
        }
        Command::Overview { channels } => {
            let names: HashMap<String, String> = serde_json::from_str(&fs::read_to_string(channels)?)?;
            match engine.overview(&names) {
                GuideResponse::Loading => println!("loading..."),
                GuideResponse::Ready(rows) => {
                    for row in rows {
                        println!("{}  {}  {}", row.time, row.name, row.title);
                    }
                }
            }
        }
        Command::Timeshift { channel, date } => {
            match engine.timeshift_list(date.unwrap_or(today), &channel) {
                GuideResponse::Loading => println!("loading..."),
                GuideResponse::Ready(entries) => {
                    for entry in entries {
                        match entry.replay_offset_secs(timezone) {
                            Some(offset) => {
                                println!("{}  {}  [-{}s]", entry.time, entry.title, offset)
                            }
                            None => println!("{}  {}", entry.time, entry.title),
                        }
                    }
                }
            }
        }
        Command::Now { channel } => match engine.current_program(&channel) {
            GuideResponse::Loading => println!("loading..."),
            GuideResponse::Ready(Some(row)) => println!("{}  {}", row.time, row.title),
            GuideResponse::Ready(None) => println!("n/a"),
        },
    }

    engine.close().await;
    Ok(())
}

/// Prints schedule rows, marking the currently-airing one
fn print_rows(response: GuideResponse<Vec<GuideRow>>) {
    match response {
        GuideResponse::Loading => println!("loading..."),
        GuideResponse::Ready(rows) => {
            for row in rows {
                let marker = match row.class {
                    RowClass::Current => "*",
                    _ => " ",
                };
                if row.class == RowClass::Unavailable {
                    println!("{}", row.title);
                } else {
                    println!("{} {}  {}", marker, row.time, row.title);
                }
            }
        }
    }
}
