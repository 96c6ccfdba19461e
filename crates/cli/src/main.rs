use clap::{Parser, Subcommand};
use lib::agent::{Agent, ChatSession};
use lib::backend::{ChatBackend, HttpBackend, QueryFilters, StructuredSummary, SummaryView};
use lib::channels::whatsapp::{decode_qr_image, LifecycleState, SessionTiming, WhatsAppSession};
use lib::config::{self, Config};
use lib::health::{self, HealthMonitor};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "salesbot")]
#[command(about = "Salesbot CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Pair the WhatsApp gateway instance: reset, create, show the QR code, and wait until connected.
    Pair {
        /// Config file path (default: SALESBOT_CONFIG_PATH or ~/.salesbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Instance name (default from config). Characters other than a-z and 0-9 are dropped.
        #[arg(long)]
        name: Option<String>,

        /// Write the QR image (PNG) here each time the gateway issues one.
        #[arg(long, value_name = "PATH")]
        qr_out: Option<PathBuf>,
    },

    /// Chat with the sales agent (interactive).
    Chat {
        /// Config file path (default: SALESBOT_CONFIG_PATH or ~/.salesbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Probe backend health (store connectivity, model credentials).
    Health {
        /// Config file path (default: SALESBOT_CONFIG_PATH or ~/.salesbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Keep probing on the configured interval and print every result.
        #[arg(long)]
        watch: bool,
    },

    /// Run a structured sales query and print the summary as JSON.
    Query {
        /// Config file path (default: SALESBOT_CONFIG_PATH or ~/.salesbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(long, value_name = "YYYY-MM-DD")]
        start: Option<String>,
        #[arg(long, value_name = "YYYY-MM-DD")]
        end: Option<String>,
        #[arg(long)]
        seller: Option<String>,
        #[arg(long)]
        product: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        region: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("salesbot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Pair {
            config,
            name,
            qr_out,
        }) => run_pair(config, name, qr_out).await,
        Some(Commands::Chat { config }) => run_chat(config).await,
        Some(Commands::Health { config, watch }) => run_health(config, watch).await,
        Some(Commands::Query {
            config,
            start,
            end,
            seller,
            product,
            category,
            region,
        }) => {
            let filters = QueryFilters {
                start_date: start,
                end_date: end,
                seller,
                product,
                category,
                region,
            };
            run_query(config, filters).await
        }
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn backend_for(config: &Config) -> Arc<dyn ChatBackend> {
    Arc::new(HttpBackend::new(Some(config::resolve_backend_url(config))))
}

async fn run_pair(
    config_path: Option<PathBuf>,
    name: Option<String>,
    qr_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let api_key = config::resolve_gateway_api_key(&config).ok_or_else(|| {
        anyhow::anyhow!("gateway api key not configured (gateway.apiKey or SALESBOT_GATEWAY_APIKEY)")
    })?;
    let name = name.unwrap_or_else(|| config.gateway.instance.clone());
    let timing = SessionTiming {
        settle_delay: config.gateway.settle_delay(),
        poll_interval: config.gateway.poll_interval(),
    };
    let session = WhatsAppSession::new(timing).with_integration(config.gateway.integration.clone());
    let mut rx = session.subscribe();

    log::info!("pairing instance {} at {}", name, config.gateway.url);
    session.start_session(&name, &config.gateway.url, &api_key).await;

    let mut last_qr: Option<String> = None;
    loop {
        let status = rx.borrow_and_update().clone();
        println!(
            "[{}] {} {}",
            status.name,
            status.state,
            status.gateway_status.as_deref().unwrap_or("")
        );
        if status.qr.is_some() && status.qr != last_qr {
            last_qr = status.qr.clone();
            if let Some(qr) = &last_qr {
                match &qr_out {
                    Some(path) => {
                        let png = decode_qr_image(qr)?;
                        std::fs::write(path, png)?;
                        println!("QR code written to {}; scan it with WhatsApp", path.display());
                    }
                    None => println!("QR code (scan with WhatsApp):\n{}", qr),
                }
            }
        }
        match status.state {
            LifecycleState::Connected => {
                println!("connected");
                return Ok(());
            }
            LifecycleState::Error => {
                anyhow::bail!(
                    "pairing failed: {}",
                    status.last_error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
            _ => {}
        }
        tokio::select! {
            changed = rx.changed() => changed?,
            _ = tokio::signal::ctrl_c() => {
                session.close();
                println!("stopped polling; the gateway instance was left as is");
                return Ok(());
            }
        }
    }
}

fn print_summary(summary: &StructuredSummary) {
    println!(
        "  revenue: {:.2} | orders: {} | top product: {}",
        summary.total_revenue, summary.total_orders, summary.top_product
    );
    match summary.active_view() {
        SummaryView::Transactions => {
            for t in summary.recent_transactions.iter().take(5) {
                println!(
                    "  - {} {} {:.2}",
                    t.date.as_deref().unwrap_or("-"),
                    t.product.as_deref().unwrap_or("-"),
                    t.amount
                );
            }
        }
        SummaryView::Visits => {
            for v in summary.visits.iter().flatten() {
                println!("  - visit {} {}", v.client, v.address.as_deref().unwrap_or(""));
            }
        }
        SummaryView::Opportunities => {
            for o in summary.opportunities.iter().flatten() {
                println!("  - opportunity {} ({:.2})", o.client, o.estimated_value);
            }
        }
    }
}

async fn run_chat(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, _) = config::load_config(config_path)?;
    let backend = backend_for(&config);
    let monitor = HealthMonitor::new(backend.clone(), config.backend.health_interval());
    monitor.start();
    let session = ChatSession::new(Agent::new(backend)).with_health(monitor.subscribe());
    log::info!("chat session {}", session.id());

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/health") {
            println!("{}", serde_json::to_string(&monitor.current())?);
            continue;
        }

        match session.submit(input).await {
            Ok(result) => {
                println!("< {}", result.text.trim());
                if let Some(data) = &result.data {
                    print_summary(data);
                }
            }
            Err(e) => eprintln!("chat error: {}", e),
        }
    }

    monitor.stop();
    Ok(())
}

async fn run_health(config_path: Option<PathBuf>, watch: bool) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let backend = backend_for(&config);
    if !watch {
        let status = health::probe(backend.as_ref()).await;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let monitor = HealthMonitor::new(backend, config.backend.health_interval());
    let mut rx = monitor.subscribe();
    monitor.start();
    loop {
        tokio::select! {
            changed = rx.changed() => {
                changed?;
                let status = rx.borrow_and_update().clone();
                println!("{}", serde_json::to_string(&status)?);
            }
            _ = tokio::signal::ctrl_c() => {
                monitor.stop();
                return Ok(());
            }
        }
    }
}

async fn run_query(config_path: Option<PathBuf>, filters: QueryFilters) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let backend = backend_for(&config);
    let summary = backend.query(&filters).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
