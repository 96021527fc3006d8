use anyhow::{anyhow, Result};
use backtest_engine::{
    agent_client::HttpDecisionAgent,
    backtester::{BacktestRequest, BacktestResult, Backtester},
    config::{parse_date, BacktestSettings, DEFAULT_END_DATE, DEFAULT_START_DATE, DEFAULT_TICKER},
    data_loader::{CsvDirectorySource, DataLoader},
    param_utils::parse_parameter_list,
    performance::MetricsCalculator,
    report::{save_results, JsonlTradeJournal},
    strategy::{self, AgentStrategy, Strategy, AGENT_TEMPLATE_ID},
};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "backtest-engine")]
#[command(about = "Backtest trading strategies over historical daily prices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more strategies over one or more tickers
    Run(RunArgs),
    /// List the available strategy ids
    ListStrategies,
    /// Delete cached price snapshots
    ClearCache {
        /// Cache directory (defaults to BACKTEST_CACHE_DIR)
        #[arg(long, value_name = "PATH")]
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Ticker symbol, repeatable
    #[arg(long = "ticker", default_values_t = vec![DEFAULT_TICKER.to_string()])]
    tickers: Vec<String>,
    /// Strategy id, `all` for every benchmark, or `agent`
    #[arg(long, default_value = "all")]
    strategy: String,
    /// Strategy parameters as key=value pairs, e.g. shortPeriod=5,longPeriod=20
    #[arg(long)]
    params: Option<String>,
    /// First simulated day (YYYY-MM-DD)
    #[arg(long, default_value = DEFAULT_START_DATE)]
    start_date: String,
    /// Last simulated day (YYYY-MM-DD)
    #[arg(long, default_value = DEFAULT_END_DATE)]
    end_date: String,
    #[arg(long)]
    initial_capital: Option<f64>,
    /// Directory holding <TICKER>.csv price files
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output_dir: Option<PathBuf>,
    /// Decision agent endpoint for the `agent` strategy
    #[arg(long)]
    agent_url: Option<String>,
    /// Also run the decision agent next to the selected strategies
    #[arg(long)]
    include_agent: bool,
    /// Append executed trades to this JSON-lines file
    #[arg(long, value_name = "PATH")]
    journal: Option<PathBuf>,
    /// Skip writing result files
    #[arg(long)]
    no_save: bool,
}

fn main() -> Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = BacktestSettings::from_env()?;

    match cli.command {
        Commands::Run(args) => run(settings, args)?,
        Commands::ListStrategies => {
            for template in strategy::list_strategies() {
                println!(
                    "{:<14} {:<20} min data points: {}",
                    template.id, template.display_name, template.min_data_points
                );
            }
            println!(
                "{:<14} {:<20} requires --agent-url or AGENT_URL",
                AGENT_TEMPLATE_ID, "Decision agent"
            );
        }
        Commands::ClearCache { cache_dir } => {
            let cache_dir = cache_dir.unwrap_or(settings.cache_dir);
            let loader = DataLoader::new(Arc::new(CsvDirectorySource::new(settings.data_dir)))
                .with_cache_dir(cache_dir);
            let removed = loader.clear_cache()?;
            println!("Removed {} cached file(s)", removed);
        }
    }

    Ok(())
}

fn run(mut settings: BacktestSettings, args: RunArgs) -> Result<()> {
    let start = parse_date("--start-date", &args.start_date)?;
    let end = parse_date("--end-date", &args.end_date)?;
    if start > end {
        return Err(anyhow!("--start-date must not be after --end-date"));
    }
    if let Some(capital) = args.initial_capital {
        if !capital.is_finite() || capital <= 0.0 {
            return Err(anyhow!("--initial-capital must be positive (value: {})", capital));
        }
        settings.initial_capital = capital;
    }
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }
    if let Some(dir) = args.output_dir {
        settings.output_dir = dir;
    }
    if args.agent_url.is_some() {
        settings.agent_url = args.agent_url;
    }

    let loader = DataLoader::new(Arc::new(CsvDirectorySource::new(&settings.data_dir)))
        .with_cache_dir(&settings.cache_dir)
        .with_lookback_buffer_days(settings.lookback_buffer_days);
    let mut backtester = Backtester::new(settings.initial_capital, Arc::new(loader))
        .with_metrics(MetricsCalculator::new(settings.risk_free_rate))
        .with_progress_bar(true);
    if let Some(path) = args.journal {
        let journal = JsonlTradeJournal::open(path)?;
        info!("Journaling trades to {}", journal.path().display());
        backtester = backtester.with_observer(Arc::new(journal));
    }

    let params = match args.params.as_deref() {
        Some(raw) => parse_parameter_list(raw).map_err(|err| anyhow!("--params: {}", err))?,
        None => HashMap::new(),
    };

    let mut requests = Vec::new();
    for ticker in &args.tickers {
        for strategy in build_strategies(&args.strategy, &params, args.include_agent, &settings)? {
            requests.push(BacktestRequest::new(ticker.clone(), strategy));
        }
    }
    info!(
        "Running {} backtest(s) from {} to {}",
        requests.len(),
        start,
        end
    );

    let mut by_ticker: BTreeMap<String, Vec<BacktestResult>> = BTreeMap::new();
    let mut failures = 0;
    for outcome in backtester.run_batch(requests, start, end) {
        match outcome.result {
            Ok(result) => by_ticker.entry(outcome.ticker).or_default().push(result),
            Err(err) => {
                failures += 1;
                warn!(
                    "Skipping {} on {}: {:#}",
                    outcome.strategy, outcome.ticker, err
                );
            }
        }
    }

    for (ticker, results) in &by_ticker {
        if results.len() > 1 {
            println!("\n{}", backtester.compare_strategies(ticker, results));
        }
        if !args.no_save {
            for result in results {
                save_results(result, &settings.output_dir)?;
            }
        }
    }

    if by_ticker.is_empty() {
        return Err(anyhow!("all {} backtest(s) failed", failures));
    }
    if failures > 0 {
        warn!("{} backtest(s) failed", failures);
    }
    Ok(())
}

fn build_strategies(
    id: &str,
    params: &HashMap<String, f64>,
    include_agent: bool,
    settings: &BacktestSettings,
) -> Result<Vec<Box<dyn Strategy + Send + Sync>>> {
    let mut strategies = match id {
        "all" => {
            if !params.is_empty() {
                warn!("--params is ignored when running every benchmark");
            }
            strategy::create_benchmarks()?
        }
        AGENT_TEMPLATE_ID => return Ok(vec![agent_strategy(settings)?]),
        other => vec![strategy::create_strategy(other, params.clone())?],
    };
    if include_agent {
        strategies.push(agent_strategy(settings)?);
    }
    Ok(strategies)
}

fn agent_strategy(settings: &BacktestSettings) -> Result<Box<dyn Strategy + Send + Sync>> {
    let url = settings
        .agent_url
        .clone()
        .ok_or_else(|| anyhow!("--agent-url or AGENT_URL must be set for the agent strategy"))?;
    let agent = HttpDecisionAgent::new(url, settings.agent_timeout)?;
    Ok(Box::new(AgentStrategy::new("Agent", Arc::new(agent))))
}
