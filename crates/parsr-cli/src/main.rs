//! 🚀 parsr-cli — the front door, the bouncer, the maitre d' of parsr.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Thin wrapper: sets up logging, parses args, loads config, hands off to the library.
//! Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parsr::common::{Job, Origin};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "parsr", about = "📬 Claims replay-parse jobs and turns them into match records")]
struct Cli {
    /// 🔧 TOML config file. `PARSR_*` env vars are read either way.
    #[arg(short, long, env = "PARSR_CONFIG", default_value = "parsr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 🧵 Run the worker until Ctrl-C (the default)
    Run,
    /// 📮 Put jobs on the queue
    Enqueue {
        /// 🎯 A single match to parse
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        match_id: Option<u64>,
        /// 🏷️ Where the job claims to come from, e.g. `scanner`
        #[arg(long, requires = "match_id")]
        origin: Option<String>,
        /// 📜 Keep the full event log in the record
        #[arg(long, requires = "match_id")]
        log_parse: bool,
        /// 📄 NDJSON file with one job per line
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing — because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(err) = dispatch(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
                || cause_str.contains("pool timed out")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like a service isn't reachable. \
                Double-check that the backing services (Postgres, the retriever, the parser, \
                the store) are actually running. If you're using Docker, try `docker ps` to see \
                what's up, or `docker compose up -d` to resurrect them. ☕"
            );
        }

        std::process::exit(1);
    }
    Ok(())
}

async fn dispatch(cli: Cli) -> Result<()> {
    // 🔒 A missing config file is fine (env vars may carry everything). A broken one is not.
    let config_file = cli
        .config
        .try_exists()
        .context(format!(
            "💀 Couldn't even check whether the config file exists. Was checking here: '{}'",
            cli.config.display()
        ))?
        .then_some(cli.config.as_path());

    let app_config = parsr::app_config::load_config(config_file).context(
        "💀 We couldn't load the config. Take a look at the file and the PARSR_* env vars, \
         make sure you didn't forget something obvious",
    )?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => parsr::run(app_config).await,
        Command::Enqueue {
            match_id,
            origin,
            log_parse,
            file,
        } => {
            let jobs = match (match_id, file) {
                (Some(match_id), _) => {
                    let mut job = Job::new(match_id);
                    job.origin = origin.map(Origin::from).unwrap_or_default();
                    job.do_log_parse = log_parse;
                    vec![job]
                }
                (None, Some(file)) => parsr::load_jobs_file(&file).await?,
                (None, None) => anyhow::bail!("💀 Nothing to enqueue: pass --match-id or --file"),
            };
            let enqueued = parsr::enqueue(&app_config, &jobs).await?;
            info!("📮 enqueued {enqueued} job(s)");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_no_subcommand_means_run() {
        let cli = Cli::parse_from(["parsr"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("parsr.toml"));
    }

    #[test]
    fn the_one_where_enqueue_takes_a_single_match() {
        let cli = Cli::parse_from([
            "parsr", "--config", "x.toml", "enqueue", "--match-id", "42", "--origin", "scanner",
            "--log-parse",
        ]);
        match cli.command {
            Some(Command::Enqueue {
                match_id,
                origin,
                log_parse,
                file,
            }) => {
                assert_eq!(match_id, Some(42));
                assert_eq!(origin.as_deref(), Some("scanner"));
                assert!(log_parse);
                assert!(file.is_none());
            }
            other => panic!("💀 expected enqueue, got {other:?}"),
        }
    }

    #[test]
    fn the_one_where_match_id_and_file_do_not_mix() {
        let parsed = Cli::try_parse_from([
            "parsr", "enqueue", "--match-id", "1", "--file", "jobs.ndjson",
        ]);
        assert!(parsed.is_err());
    }
}
