use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::info;
use url::Url;

use dexfetch::cache::{DurableStore, MemoryStore, SqliteStore, TtlCache};
use dexfetch::config::Config;
use dexfetch::fetch::{ReqwestTransport, ResilientClient, Transport};
use dexfetch::list::Phase;
use dexfetch::logging;
use dexfetch::pokeapi::{normalize_query, PokeApi, PokemonDetail, SearchError};
use dexfetch::revalidate::Revalidator;

#[derive(Parser, Debug)]
#[command(name = "dexfetch")]
#[command(about = "Browse the PokéAPI from a local, self-refreshing cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dexfetch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the cache in memory only for this run
  #[arg(long)]
  ephemeral: bool,

  /// Mirror logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List Pokémon page by page
  List {
    /// Offset of the first page
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Number of pages to load
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pages: u32,

    /// Reload from the first page, skipping the cache
    #[arg(long, conflicts_with = "offset")]
    refresh: bool,
  },
  /// Show one Pokémon's details
  Show { name: String },
  /// Look a Pokémon up by name
  Search { query: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(&config.log, args.verbose)?;

  if args.ephemeral || !config.cache.persist {
    run(MemoryStore::new(), &config, args.command).await
  } else {
    let store = match &config.cache.path {
      Some(path) => SqliteStore::open(path)?,
      None => SqliteStore::open_default()?,
    };
    run(store, &config, args.command).await
  }
}

async fn run<S: DurableStore>(store: S, config: &Config, command: Command) -> Result<()> {
  let base_url = Url::parse(&config.api.base_url)
    .map_err(|e| eyre!("Invalid API URL {}: {}", config.api.base_url, e))?;
  let client = ResilientClient::new(ReqwestTransport::new(), base_url).with_policy(config.retry_policy());
  let cache = TtlCache::new(store).with_default_ttl(config.ttl());
  let api = PokeApi::new(Revalidator::new(cache, client)).with_page_size(config.api.page_size);

  let result = match command {
    Command::List {
      offset,
      pages,
      refresh,
    } => list(&api, offset, pages, refresh).await,
    Command::Show { name } => show(&api, &name).await,
    Command::Search { query } => search(&api, &query).await,
  };

  // Let background refreshes land in the cache before exiting
  api.loader().settle().await;
  info!("done");
  result
}

async fn list<S: DurableStore, T: Transport>(
  api: &PokeApi<S, T>,
  offset: usize,
  pages: u32,
  refresh: bool,
) -> Result<()> {
  let mut list = api.list_controller();
  if refresh {
    list.refresh();
  } else {
    list.set_offset(offset);
  }
  list.next_update().await;

  for _ in 1..pages {
    if !list.advance() {
      break;
    }
    list.next_update().await;
  }

  let view = list.view();
  for pokemon in view.items {
    let id = pokemon.id().map(|id| id.to_string()).unwrap_or_else(|| "?".to_string());
    println!("{:>5}  {}", id, pokemon.name);
  }

  println!();
  println!(
    "items: {}  offset: {}  loading: {}  source: {}",
    view.items.len(),
    view.offset,
    view.loading,
    match list.state().last_source {
      Some(source) => format!("{:?}", source).to_lowercase(),
      None => "-".to_string(),
    }
  );

  if let Some(error) = view.error {
    let hint = if error.can_retry { " (retry later)" } else { "" };
    println!("error: {}{}", error.message, hint);
    if list.phase() == Phase::ErrorEmpty {
      return Err(eyre!("Nothing could be loaded"));
    }
  }

  Ok(())
}

fn print_detail(detail: &PokemonDetail) {
  println!("#{} {}", detail.id, detail.name);
  println!("height: {}", detail.height);
  println!("weight: {}", detail.weight);
  println!("types:  {}", detail.types.join(", "));
}

async fn show<S: DurableStore, T: Transport>(api: &PokeApi<S, T>, name: &str) -> Result<()> {
  let name = normalize_query(name).ok_or_else(|| eyre!("Type a name to show"))?;
  let fetched = api.detail(&name).await?;
  print_detail(&fetched.data);
  println!("source: {:?}", fetched.source);
  Ok(())
}

async fn search<S: DurableStore, T: Transport>(api: &PokeApi<S, T>, query: &str) -> Result<()> {
  match api.search(query).await {
    Ok(Some(found)) => print_detail(&found.data),
    Ok(None) => println!("not found"),
    Err(SearchError::EmptyQuery) => return Err(eyre!("Type a name to search for")),
    Err(e) => return Err(e.into()),
  }
  Ok(())
}
