//! 🚗 cpl-cli — the front door, the bouncer, the maitre d' of carpool.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config, sets up
//! logging, stands up one [`Bulker`], and fires your document requests at it
//! CONCURRENTLY — because watching N reads collapse into one `_mget` is the
//! whole show. Like a manager. 🦆
//!
//! Usage:
//!   cpl-cli [config.toml] get <index> <id> [<id>...]
//!   cpl-cli [config.toml] put <index> <id> <json-body>
//!   cpl-cli [config.toml] del <index> <id> [<id>...]

use anyhow::{Context, Result, bail};
use comfy_table::Table;
use cpl::backend::{BackendHandle, EsBackend};
use cpl::{Bulker, Opts};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// 🚀 main() — where it all begins. The genesis. The big bang.
/// The "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args (by hand, like our ancestors)
/// 3. Load config (the moment of truth)
/// 4. Run the thing (send it and pray 🙏)
/// 5. Handle errors (cry)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing — because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 🎯 Grab the args like catching Pokémon — gotta get at least a command
    let args: Vec<String> = std::env::args().collect();
    let default_config = "cpl.toml".to_string();
    let (config_arg, rest) = match args.get(1).map(String::as_str) {
        // 🔧 First arg ending in .toml = config path; otherwise it's the command
        Some(s) if s.ends_with(".toml") => (s.to_string(), &args[2..]),
        _ => (default_config, &args[1..]),
    };

    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_file = std::path::Path::new(&config_arg);
    let config_file_path_which_is_validated_to_exist = match config_file.try_exists()
        .context(format!("💀 Configuration file may not exist, couldn't find it. Double check that it exists, or maybe, it's an issue with pwd/cwd and relative paths. In that case, use an absolute path, to be absolutely certain, you are not messing this up. Was checking here: '{}'", config_file.display()))?
    {
        true => Some(config_file),  // ✅ Found it! Better than finding my car keys
        false => None,              // 💤 Not there. Env vars carry the whole team today.
    };

    // 🔧 Load the config — the moment where we find out if the TOML is valid
    // or if someone put a tab where a space should be (looking at you, Kevin)
    let app_config = cpl::app_config::load_config(config_file_path_which_is_validated_to_exist)
        .context("💀 Couldn't load the config. Take a look at the file (or the CPL_* env vars), make sure you didn't forget something obvious, like the backend url.")?;

    // 📡 Stand up the backend (this pings the cluster — fail loudly here,
    // not after we've queued a hundred hopeful requests)
    let backend = EsBackend::new(app_config.backend)
        .await
        .context("💀 The cluster didn't pick up. Check the url. Check the auth. Check your horoscope.")?;
    let bulker = Bulker::new(BackendHandle::Elasticsearch(backend), app_config.bulker);

    let mut cmd_args = rest.iter();
    let command = cmd_args.next().map(String::as_str).unwrap_or("help");
    let result = match command {
        "get" => run_get(&bulker, cmd_args.as_slice()).await,
        "put" => run_put(&bulker, cmd_args.as_slice()).await,
        "del" => run_del(&bulker, cmd_args.as_slice()).await,
        _ => {
            eprintln!("usage: cpl-cli [config.toml] get|put|del <index> <args...>");
            Ok(())
        }
    };

    // 🏁 Close flushes stragglers and joins the flushers. Always runs, even
    // when the command went sideways — no zombie tasks on our watch.
    bulker
        .close()
        .await
        .context("💀 The engine refused to close cleanly. The flushers have unionized.")?;
    result
}

/// 📖 Fire all requested reads at once and let them carpool into `_mget`.
async fn run_get(bulker: &Bulker, args: &[String]) -> Result<()> {
    let (index, ids) = split_index_and_ids(args, "get")?;
    debug!(index, cnt = ids.len(), "📖 submitting concurrent reads");

    // 🚗 All reads submitted concurrently — this is the entire point of the
    // product. One truck. Many passengers.
    let results = futures::future::join_all(
        ids.iter()
            .map(|id| bulker.read_raw(index, id, Opts::default())),
    )
    .await;

    let mut table = Table::new();
    table.set_header(vec!["id", "status", "_source"]);
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(item) => {
                let source = item
                    .source_bytes()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                table.add_row(vec![id.to_string(), "found".to_string(), source]);
            }
            Err(err) => {
                table.add_row(vec![id.to_string(), "error".to_string(), err.to_string()]);
            }
        }
    }
    println!("{table}");
    Ok(())
}

/// 📝 Index one document. Refresh is on so you can immediately `get` it —
/// this is a CLI, not a throughput benchmark.
async fn run_put(bulker: &Bulker, args: &[String]) -> Result<()> {
    let [index, id, body] = args else {
        bail!("usage: cpl-cli put <index> <id> <json-body>");
    };
    let item = bulker
        .index(index, Some(id), body.as_bytes(), Opts::with_refresh())
        .await
        .context("💀 The write didn't land")?;
    println!(
        "{}: {}",
        item.id,
        item.result.as_deref().unwrap_or("written")
    );
    Ok(())
}

/// 🗑️ Delete documents. Concurrently, because habits.
async fn run_del(bulker: &Bulker, args: &[String]) -> Result<()> {
    let (index, ids) = split_index_and_ids(args, "del")?;
    let results = futures::future::join_all(
        ids.iter()
            .map(|id| bulker.delete(index, id, Opts::with_refresh())),
    )
    .await;
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(item) => println!("{id}: {}", item.result.as_deref().unwrap_or("deleted")),
            Err(err) => println!("{id}: error: {err}"),
        }
    }
    Ok(())
}

/// 🔧 `<index> <id> [<id>...]` — the argument shape two commands share.
fn split_index_and_ids<'a>(args: &'a [String], cmd: &str) -> Result<(&'a str, &'a [String])> {
    match args.split_first() {
        Some((index, ids)) if !ids.is_empty() => Ok((index.as_str(), ids)),
        _ => bail!("usage: cpl-cli {cmd} <index> <id> [<id>...]"),
    }
}
