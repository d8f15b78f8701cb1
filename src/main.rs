use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use feed_archiver::config::Config;
use feed_archiver::error::{AppError, Result};
use feed_archiver::models::ArticleStats;
use feed_archiver::pipeline::Pipeline;
use feed_archiver::{
    get_all_items, DocumentRenderer, FeedClient, ProcessReport, ProcessingScheduler, RenderEngine,
    Store, WkhtmltopdfEngine,
};

enum Command {
    Run,
    Fetch,
    Process,
    Stats,
    CheckUrl(String),
}

fn parse_args(args: &[String]) -> Result<Command> {
    match args.get(1).map(String::as_str) {
        None => Ok(Command::Run),
        Some("--fetch") => Ok(Command::Fetch),
        Some("--process") => Ok(Command::Process),
        Some("--stats") => Ok(Command::Stats),
        Some("--check-url") => args
            .get(2)
            .map(|url| Command::CheckUrl(url.clone()))
            .ok_or_else(|| AppError::InvalidArgument("--check-url needs a URL".to_string())),
        Some(other) => Err(AppError::InvalidArgument(format!(
            "unknown argument '{other}' (expected --fetch, --process, --stats or --check-url <url>)"
        ))),
    }
}

fn engine(config: &Config) -> Result<Arc<dyn RenderEngine>> {
    let engine = match &config.render.engine_path {
        Some(path) => WkhtmltopdfEngine::new(PathBuf::from(path)),
        None => WkhtmltopdfEngine::from_path().ok_or_else(|| {
            AppError::Config(
                "wkhtmltopdf not found on PATH; set render.engine_path in the config".to_string(),
            )
        })?,
    };
    Ok(Arc::new(engine.with_timeout(config.engine_timeout())))
}

fn print_stats(stats: &ArticleStats) {
    println!("Total articles: {}", stats.total_count);
    for account in &stats.by_account {
        let name = if account.account_name.is_empty() {
            "(unknown)"
        } else {
            account.account_name.as_str()
        };
        println!("  {}: {}", name, account.count);
    }
    if !stats.recent_items.is_empty() {
        println!("Recent:");
        for item in &stats.recent_items {
            println!(
                "  {} | {} | {}",
                item.created_at.as_deref().unwrap_or("-"),
                item.account_name,
                item.title
            );
        }
    }
}

/// `RUST_LOG`-style directives, or `info` when unset or unparsable.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn print_report(report: &ProcessReport) {
    println!(
        "Rendered {}, skipped {}, failed {}",
        report.rendered, report.skipped, report.failed
    );
    if report.uncommitted > 0 {
        println!(
            "{} articles could not be recorded (database locked) and stay pending",
            report.uncommitted
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;

    let config = Config::load()?;
    let store = Store::open(config.store_config()).await?;

    match command {
        Command::Stats => {
            print_stats(&store.stats().await?);
            return Ok(());
        }
        Command::CheckUrl(url) => {
            let exists = store.exists_by_source(None, Some(&url)).await?;
            println!("{}", if exists { "stored" } else { "not stored" });
            return Ok(());
        }
        _ => {}
    }

    let source = Arc::new(FeedClient::new(&config.feed_base_url, config.feed_format)?);
    let query = config.feed_query();

    // Fetching alone does not need a render engine.
    if let Command::Fetch = command {
        let items = get_all_items(
            source.as_ref(),
            &query.feed_id,
            &query.filters,
            query.batch_size,
            query.max_pages,
        )
        .await?;
        let stored = store.store_items(&items).await?;
        println!("Fetched {}, stored {} new articles", items.len(), stored);
        return Ok(());
    }

    let renderer = DocumentRenderer::new(config.render_config(), engine(&config)?)?;
    let pipeline = Pipeline::new(source, ProcessingScheduler::new(store, renderer));

    match command {
        Command::Process => {
            print_report(&pipeline.process(config.process_limit).await?);
        }
        _ => {
            let report = pipeline
                .fetch_store_and_process(&query, true, config.process_limit)
                .await?;
            println!("Fetched {}, stored {} new articles", report.fetched, report.stored);
            if let Some(processed) = &report.processed {
                print_report(processed);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::*;

    #[test]
    fn test_log_level_follows_environment() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(log_filter(Some("warn")).max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_arguments() {
        let args = |a: &[&str]| a.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(matches!(parse_args(&args(&["fa"])), Ok(Command::Run)));
        assert!(matches!(
            parse_args(&args(&["fa", "--check-url", "https://x/1"])),
            Ok(Command::CheckUrl(url)) if url == "https://x/1"
        ));
        assert!(parse_args(&args(&["fa", "--check-url"])).is_err());
        assert!(parse_args(&args(&["fa", "--bogus"])).is_err());
    }
}
