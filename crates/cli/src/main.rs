use std::{
    fs::{self, OpenOptions},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use tracing_subscriber::{prelude::*, EnvFilter};

use geekshelf_core::{
    config::{self, AppConfig},
    error::{PreloadError, ProviderError},
    filter_games, BggClient, CacheStore, GameFilters, GameRecord, PlayerCountFilter, PreloadStatus,
    Preloader,
};

struct CliArgs {
    username: String,
    refresh: bool,
    filters: GameFilters,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let args = match parse_args(std::env::args().skip(1))? {
        Some(args) => args,
        None => {
            print_usage();
            return Ok(());
        }
    };

    config::ensure_default_config()?;
    let config = AppConfig::load()?;

    let cache = CacheStore::new(config.cache_root.clone());
    let _sweeper = cache.spawn_sweeper(config.sweep_interval());

    let client = BggClient::new(&config).context("failed to build provider client")?;
    let preloader = Preloader::new(cache, Arc::new(client), config.clone());

    let result = if args.refresh {
        preloader.refresh(&args.username).await
    } else {
        preloader.start(&args.username).await
    };
    if let Err(err) = result {
        report_preload_error(&args.username, err)?;
    }

    let games = match preloader.cached_games(&args.username) {
        Some(games) => games,
        None => {
            tracing::info!("no cached collection, fetching directly");
            preloader
                .fetch_games_direct(&args.username)
                .await
                .map_err(|err| anyhow::anyhow!("{err}"))?
        }
    };

    if let PreloadStatus::Ready { as_of } = preloader.status(&args.username) {
        println!(
            "Collection for {} ({} games, cached {})",
            args.username,
            games.len(),
            as_of.format("%Y-%m-%d %H:%M UTC")
        );
    } else {
        println!("Collection for {} ({} games)", args.username, games.len());
    }

    let picks = filter_games(&games, &args.filters, config.result_cap);
    if picks.is_empty() {
        println!("No rated games match the given filters.");
        return Ok(());
    }

    print_table(&picks);
    Ok(())
}

fn print_table(games: &[GameRecord]) {
    println!();
    println!(
        "{:<42} {:>7} {:>9} {:>7} {:>7}",
        "Name", "Rating", "Players", "Mins", "Weight"
    );
    for game in games {
        let name: String = game.name.chars().take(40).collect();
        println!(
            "{:<42} {:>7.2} {:>4}-{:<4} {:>7} {:>7.2}",
            name, game.rating, game.min_players, game.max_players, game.playing_time_minutes,
            game.weight
        );
    }
}

fn report_preload_error(username: &str, err: PreloadError) -> Result<()> {
    match err {
        PreloadError::Aborted => Ok(()),
        PreloadError::Provider(ProviderError::UserNotFound(_)) => {
            bail!("no BoardGameGeek user named {username:?}; check the spelling")
        }
        PreloadError::Provider(ProviderError::CollectionPrivateOrEmpty(_)) => {
            bail!(
                "the collection for {username:?} is private or empty; \
                 mark games as owned and make the collection public on BoardGameGeek"
            )
        }
        PreloadError::Provider(err) => bail!("could not load the collection: {err}"),
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<CliArgs>> {
    let Some(username) = args.next() else {
        return Ok(None);
    };
    if username == "--help" || username == "-h" {
        return Ok(None);
    }

    let mut parsed = CliArgs {
        username,
        refresh: false,
        filters: GameFilters::default(),
    };

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--refresh" => parsed.refresh = true,
            "--mechanism" => parsed.filters.mechanism = Some(required(&mut args, &flag)?),
            "--category" => parsed.filters.category = Some(required(&mut args, &flag)?),
            "--players" => {
                parsed.filters.player_count = parse_player_count(&required(&mut args, &flag)?)?
            }
            "--best" => {
                parsed.filters.best_player_count =
                    parse_player_count(&required(&mut args, &flag)?)?
            }
            "--complexity" => {
                let min = required(&mut args, &flag)?.parse::<f64>()?;
                let max = required(&mut args, &flag)?.parse::<f64>()?;
                parsed.filters.complexity = Some((min, max));
            }
            "--length" => {
                let min = required(&mut args, &flag)?.parse::<u32>()?;
                let max = required(&mut args, &flag)?.parse::<u32>()?;
                parsed.filters.game_length = Some((min, max));
            }
            other => bail!("unknown argument {other:?}; run with --help for usage"),
        }
    }

    Ok(Some(parsed))
}

fn required(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .with_context(|| format!("{flag} requires a value"))
}

fn parse_player_count(value: &str) -> Result<PlayerCountFilter> {
    if value.eq_ignore_ascii_case("any") {
        return Ok(PlayerCountFilter::Any);
    }
    let count = value
        .trim_end_matches('+')
        .parse::<u32>()
        .with_context(|| format!("invalid player count {value:?}"))?;
    Ok(PlayerCountFilter::Exactly(count))
}

fn print_usage() {
    println!(
        "usage: geekshelf <username> [options]\n\
         \n\
         options:\n\
           --refresh              force a fresh fetch, ignoring the cache\n\
           --mechanism <text>     mechanism substring, e.g. \"hand management\"\n\
           --category <text>      category substring, e.g. economic\n\
           --players <n|any>      exact supported player count\n\
           --best <n|any>         community best-at player count (8 means 8+)\n\
           --complexity <min> <max>  inclusive weight range, e.g. 1.5 3.0\n\
           --length <min> <max>   inclusive playing time range in minutes"
    );
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("geekshelf.log");

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact()
        .with_writer(move || {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .expect("failed to open log file")
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}
