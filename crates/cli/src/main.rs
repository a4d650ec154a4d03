use anyhow::Context;
use clap::Parser;
use foresight_core::domain::forecast::AnalysisResult;
use foresight_core::llm::gemini::{GeminiClient, GeminiConfig};
use foresight_core::llm::prompt::{format_usd, forecast_prompt};
use foresight_core::llm::ForecastClient;
use foresight_core::portfolio::PortfolioForm;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "foresight", about = "Five-year portfolio forecast from a hosted model")]
struct Args {
    /// Holding as SYMBOL=WEIGHT, e.g. --holding VOO=60 --holding "Apple=40".
    #[arg(long = "holding", value_name = "SYMBOL=WEIGHT", required = true)]
    holdings: Vec<String>,

    /// Starting capital in USD (minimum 100).
    #[arg(long, default_value_t = 10_000.0)]
    investment: f64,

    /// Print the prompt that would be sent and exit without calling the model.
    #[arg(long)]
    dry_run: bool,

    /// Print the forecast as JSON instead of a text summary.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = foresight_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let mut form = build_form(&args)?;

    if args.dry_run {
        let request = form.begin_forecast()?;
        tracing::info!(
            dry_run = true,
            holdings = request.holdings.len(),
            "printing prompt without calling the model"
        );
        println!("{}", forecast_prompt(&request));
        return Ok(());
    }

    let client = GeminiClient::new(GeminiConfig::from_settings(&settings))?;
    let result = match form.request_forecast(&client).await {
        Ok(result) => result,
        Err(err) => {
            let err = anyhow::Error::new(err);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(
                provider = client.provider().as_str(),
                error = %err,
                "forecast run failed"
            );
            let message = err
                .downcast_ref::<foresight_core::llm::error::ForecastError>()
                .map(|e| e.user_message())
                .unwrap_or_else(|| err.to_string());
            anyhow::bail!(message);
        }
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to encode forecast")?
        );
    } else {
        print_summary(&result, form.initial_investment());
    }
    Ok(())
}

fn build_form(args: &Args) -> anyhow::Result<PortfolioForm> {
    let mut form = PortfolioForm::new();
    for raw in &args.holdings {
        let (symbol, weight) = parse_holding(raw)?;
        form.add_holding(symbol, weight)
            .with_context(|| format!("invalid holding {raw:?}"))?;
    }
    form.set_investment(args.investment)
        .context("invalid --investment")?;
    form.validate()?;
    Ok(form)
}

fn parse_holding(raw: &str) -> anyhow::Result<(&str, f64)> {
    let (symbol, weight) = raw
        .rsplit_once('=')
        .with_context(|| format!("holding {raw:?} must look like SYMBOL=WEIGHT"))?;
    let weight = weight
        .trim()
        .trim_end_matches('%')
        .parse::<f64>()
        .with_context(|| format!("holding {raw:?} has a non-numeric weight"))?;
    Ok((symbol, weight))
}

fn print_summary(result: &AnalysisResult, initial_investment: f64) {
    let summary = &result.summary;
    println!("Initial investment: {}", format_usd(initial_investment));
    if let Some(m) = result.metrics(initial_investment) {
        println!("Expected value after 5 years: {}", format_usd(m.final_expected));
        println!("Total ROI: {:.2}%", m.total_roi_pct);
        println!("CAGR: {:.2}%", m.cagr_pct);
    }
    println!(
        "Model estimate: {:.2}% total, {:.2}% annualized",
        summary.expected_return, summary.annualized_return
    );
    println!("Risk: {} ({})", summary.risk_level, summary.risk_reasoning);
    if !summary.top_performers.is_empty() {
        println!("Top performers: {}", summary.top_performers.join(", "));
    }
    for risk in &summary.potential_risks {
        println!("  - {risk}");
    }
    println!();
    println!("{}", result.insights);
    if !result.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &result.sources {
            println!("  {} <{}>", source.title, source.uri);
        }
    }
}

fn init_sentry(settings: &foresight_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(holdings: &[&str], investment: f64) -> Args {
        Args {
            holdings: holdings.iter().map(|s| s.to_string()).collect(),
            investment,
            dry_run: true,
            json: false,
        }
    }

    #[test]
    fn parses_holding_arguments() {
        assert_eq!(parse_holding("VOO=60").unwrap(), ("VOO", 60.0));
        assert_eq!(parse_holding("S&P=500=12.5%").unwrap(), ("S&P=500", 12.5));
        assert!(parse_holding("VOO").is_err());
        assert!(parse_holding("VOO=lots").is_err());
    }

    #[test]
    fn builds_valid_form_and_prompt() {
        let mut form = build_form(&args(&["VOO=60", "Apple=40"], 10_000.0)).unwrap();
        assert_eq!(form.total_weight(), 100.0);
        let prompt = forecast_prompt(&form.begin_forecast().unwrap());
        assert!(prompt.contains("VOO (60%)"));
        assert!(prompt.contains("Apple (40%)"));
        assert!(prompt.contains("$10,000"));
    }

    #[test]
    fn rejects_unbalanced_or_small_portfolios() {
        assert!(build_form(&args(&["VOO=60"], 10_000.0)).is_err());
        assert!(build_form(&args(&["VOO=100"], 99.0)).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
