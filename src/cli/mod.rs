mod bootstrap;
mod commands;
mod serve;

use anyhow::Result;
use console::style;

use crate::core::terminal::{self, GuideSection};

pub(crate) fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Start the scheduler and HTTP API")
        .command("run <id> [--target <tool>]", "Run one automation now")
        .print();

    GuideSection::new("Automations")
        .command("list", "Show discovered automations")
        .command("rediscover", "Rescan automation roots")
        .command("history [id]", "Show recent executions")
        .command("steps <execution>", "Show the step trail of an execution")
        .print();

    GuideSection::new("Pipeline")
        .command("queue <name> <website> [description]", "Add a tool and queue research")
        .print();

    GuideSection::new("Access")
        .command("token create <name>", "Mint an API bearer token")
        .command("secret set <key> <value>", "Store a provider key in the vault")
        .command("secret list", "List vault keys")
        .command("setting set <key> <value> [scope]", "Set a global or per-automation setting")
        .print();

    println!(
        "\n {} {} <command> [args]\n",
        style("Usage:").bold(),
        style("foreman").green()
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunArgs {
    pub id: String,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServeFlags {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// `run <id> [--target <tool>]`. The first positional argument is the id.
pub(crate) fn parse_run_args(args: &[String], start: usize) -> Option<RunArgs> {
    let mut id = None;
    let mut target = None;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--target" | "-t" => {
                if i + 1 < args.len() {
                    target = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            other => {
                if id.is_none() {
                    id = Some(other.to_string());
                }
                i += 1;
            }
        }
    }
    id.map(|id| RunArgs { id, target })
}

pub(crate) fn parse_serve_flags(args: &[String], start: usize) -> ServeFlags {
    let mut flags = ServeFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    flags.port = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--host" => {
                if i + 1 < args.len() {
                    flags.host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    flags
}

fn arg(args: &[String], index: usize) -> Option<&str> {
    args.get(index).map(String::as_str)
}

fn usage(line: &str) -> Result<()> {
    println!("{} {}", style("Usage:").bold(), line);
    Ok(())
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match arg(&args, 1).unwrap_or("help") {
        "serve" => serve::run_serve(parse_serve_flags(&args, 2)).await,
        "run" => match parse_run_args(&args, 2) {
            Some(run_args) => commands::run(run_args).await,
            None => usage("foreman run <automation-id> [--target <tool-id>]"),
        },
        "list" => commands::list().await,
        "rediscover" => commands::rediscover().await,
        "history" => commands::history(arg(&args, 2)).await,
        "steps" => match arg(&args, 2) {
            Some(execution_id) => commands::steps(execution_id).await,
            None => usage("foreman steps <execution-id>"),
        },
        "queue" => match (arg(&args, 2), arg(&args, 3)) {
            (Some(name), Some(website)) => {
                commands::queue(name, website, arg(&args, 4).unwrap_or("")).await
            }
            _ => usage("foreman queue <name> <website> [description]"),
        },
        "token" => match (arg(&args, 2), arg(&args, 3)) {
            (Some("create"), Some(name)) => commands::token_create(name).await,
            _ => usage("foreman token create <name>"),
        },
        "secret" => match (arg(&args, 2), arg(&args, 3), arg(&args, 4)) {
            (Some("set"), Some(key), Some(value)) => commands::secret_set(key, value).await,
            (Some("list"), _, _) => commands::secret_list().await,
            _ => usage("foreman secret set <key> <value> | foreman secret list"),
        },
        "setting" => match (arg(&args, 2), arg(&args, 3), arg(&args, 4)) {
            (Some("set"), Some(key), Some(value)) => {
                commands::setting_set(key, value, arg(&args, 5)).await
            }
            _ => usage("foreman setting set <key> <value> [automation-id]"),
        },
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => commands::unknown(other),
    }
}
