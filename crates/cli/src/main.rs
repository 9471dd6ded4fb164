use std::io::Write;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use goval_cli::{CliError, Flow, ReplCommand, Shell, cli::Cli, logging, parse_line};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const PROMPT: &str = "> ";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let (out_tx, mut out_rx) = mpsc::unbounded_channel();
	let mut shell = Shell::replit(cli.session_config(), out_tx).context("failed to set up the API client")?;
	let mut lines = BufReader::new(tokio::io::stdin()).lines();

	let mut show_prompt = true;
	loop {
		if show_prompt {
			print!("{PROMPT}");
			std::io::stdout().flush()?;
		}
		show_prompt = true;

		tokio::select! {
			Some(text) = out_rx.recv() => {
				// Event from an attachment while idle: print it above a fresh prompt.
				println!("\r{text}");
			}
			line = lines.next_line() => {
				let Some(line) = line.context("failed to read stdin")? else {
					println!();
					shell.execute(ReplCommand::Exit).await?;
					break;
				};

				let flow = match parse_line(&line) {
					Ok(command) => shell.execute(command).await,
					Err(err) => Err(err),
				};
				while let Ok(text) = out_rx.try_recv() {
					println!("{text}");
				}
				match flow {
					Ok(Flow::Exit) => break,
					Ok(Flow::Continue) => {}
					Err(err) => report(&err),
				}
			}
		}
	}

	Ok(())
}

fn report(err: &CliError) {
	eprintln!("{} {err}", "error:".red().bold());
	if let Some(hint) = err.hint() {
		eprintln!("  {} {hint}", "hint:".yellow());
	}
}
