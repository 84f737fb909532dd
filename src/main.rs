use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use codap_channel::StdioTransport;
use codap_movies::{
    MoviePlugin,
    catalog::{CatalogCategory, TmdbClient},
    config::PluginConfig,
    logger::{LogConfig, init_tracing},
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "codap-movies",
    about = "Send movie catalog records into a CODAP document",
    version
)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); RUST_LOG overrides it
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// .env file to load before reading configuration
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a catalog page
    List(ListArgs),

    /// Print the full catalog entry for one movie
    Details(DetailsArgs),

    /// Connect to the host on stdin/stdout and forward picked records
    Forward(ForwardArgs),
}

#[derive(Args, Debug)]
struct ListArgs {
    #[arg(long, value_enum, default_value_t = CatalogCategory::Trending)]
    category: CatalogCategory,
}

#[derive(Args, Debug)]
struct DetailsArgs {
    /// Catalog id, as shown by `list`
    #[arg(long)]
    id: u64,
}

#[derive(Args, Debug)]
struct ForwardArgs {
    #[arg(long, value_enum, default_value_t = CatalogCategory::Trending)]
    category: CatalogCategory,

    /// Positions in the catalog page to forward, in order
    #[arg(long = "pick", required = true)]
    picks: Vec<usize>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(&LogConfig::new(cli.log_level.clone(), cli.log_dir.clone()))?;
    let config = PluginConfig::load(cli.env_file.as_deref())?;

    match cli.command {
        Commands::List(args) => list(&config, args).await,
        Commands::Details(args) => details(&config, args).await,
        Commands::Forward(args) => forward(&config, args).await,
    }
}

async fn list(config: &PluginConfig, args: ListArgs) -> anyhow::Result<()> {
    let client = TmdbClient::new(&config.tmdb_base_url, config.require_api_key()?);
    let records = client.fetch(args.category).await?;
    for (i, record) in records.iter().enumerate() {
        let id = record.id.map(|id| id.to_string()).unwrap_or_default();
        println!("{i:>3}  {id:>8}  {:<50} {:>10.2}", record.title, record.popularity);
    }
    Ok(())
}

async fn details(config: &PluginConfig, args: DetailsArgs) -> anyhow::Result<()> {
    let client = TmdbClient::new(&config.tmdb_base_url, config.require_api_key()?);
    let movie = client.movie_details(args.id).await?;
    println!("{}", serde_json::to_string_pretty(&movie)?);
    Ok(())
}

async fn forward(config: &PluginConfig, args: ForwardArgs) -> anyhow::Result<()> {
    let client = TmdbClient::new(&config.tmdb_base_url, config.require_api_key()?);
    let records = client.fetch(args.category).await?;
    let mut picked = Vec::with_capacity(args.picks.len());
    for i in &args.picks {
        match records.get(*i) {
            Some(r) => picked.push(r.clone()),
            None => bail!(
                "pick {i} is out of range, the {} page has {} records",
                args.category,
                records.len()
            ),
        }
    }

    let plugin = MoviePlugin::start(Arc::new(StdioTransport::stdio()), config)
        .await
        .context("could not connect to host")?;

    for record in &picked {
        // one record failing does not stop the rest
        if let Err(err) = plugin.add_record(record).await {
            error!(title = %record.title, "could not forward record: {err}");
        }
    }

    info!("waiting for host to close the session");
    let state = tokio::select! {
        state = plugin.run_until_closed() => state,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, closing session");
            plugin.session().close();
            plugin.session().connection_state()
        }
    };
    if state != codap_channel::ConnectionState::Closed {
        warn!(%state, "session ended abnormally");
    }
    Ok(())
}
