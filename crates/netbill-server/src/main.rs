use clap::Parser;
use netbill_server::api::{self, App};
use netbill_server::config::Config;
use netbill_server::db::BillingDb;
use netbill_server::disconnect::DisconnectService;
use netbill_server::ippool::IpPoolService;
use netbill_server::netflow::NetflowDispatcher;
use netbill_server::session::SessionService;
use netbill_server::state::{MemoryStateBackend, StateBackend, ValkeyStateBackend};
use netbill_server::subscription::SubscriptionProcessor;
use netbill_server::tclass::{ProtocolClassifier, TclassService};
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// netbill - session accounting and billing core for a RADIUS-fronted network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "netbill")]
struct Cli {
    /// Path to configuration file
    #[arg(value_name = "CONFIG", default_value = "config.json")]
    config_path: String,

    /// Validate configuration and exit (doesn't start the server)
    #[arg(short, long)]
    validate: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing_subscriber::registry()
                .with(EnvFilter::new("info"))
                .with(tracing_subscriber::fmt::layer())
                .init();

            if cli.validate {
                eprintln!("Configuration validation failed: {}", e);
                process::exit(1);
            }

            warn!("Could not load config file from: {}", cli.config_path);
            info!("Creating example configuration at: {}", cli.config_path);

            let example = Config::example();
            if let Err(e) = example.to_file(&cli.config_path) {
                error!("Error creating example config: {}", e);
                process::exit(1);
            }

            info!("Please edit {} and restart the server", cli.config_path);
            process::exit(0);
        }
    };

    if cli.validate {
        println!("Configuration validated successfully");
        println!("  Listen: {}:{}", config.listen_address, config.listen_port);
        println!("  Database: {}:{}/{}", config.database.host, config.database.port, config.database.name);
        println!(
            "  Cache: {}",
            if config.has_cache() { config.cache.url() } else { "(in-memory)".to_string() }
        );
        println!("  Pools: {}", config.ippool.pools.len());
        println!("  Traffic classes: {}", config.traffic_classification.classes.len());
        println!("  Subscription processing: {}", config.subscription.enabled);
        process::exit(0);
    }

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("netbill v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", cli.config_path);

    // Shared state backend: Valkey when configured, process-local otherwise
    let backend: Arc<dyn StateBackend> = if config.has_cache() {
        match ValkeyStateBackend::new(&config.cache.url(), "netbill:").await {
            Ok(backend) => {
                info!(url = %config.cache.url(), "Connected to Valkey");
                Arc::new(backend)
            }
            Err(e) => {
                error!("Failed to connect to Valkey: {}", e);
                process::exit(1);
            }
        }
    } else {
        warn!("No cache configured; sessions will not survive a restart");
        Arc::new(MemoryStateBackend::new())
    };

    let db = match BillingDb::connect(&config.database.url(), config.database.max_connections).await
    {
        Ok(db) => {
            info!(
                host = %config.database.host,
                name = %config.database.name,
                "Connected to billing database"
            );
            Arc::new(db)
        }
        Err(e) => {
            error!("Failed to connect to billing database: {}", e);
            process::exit(1);
        }
    };

    let ippool = Arc::new(IpPoolService::new(
        backend.clone(),
        config.ippool.timeout,
        &config.ippool.default_pool,
        config.ippool.use_another_one_free_pool,
    ));
    let pool_setup = if config.ippool.allocate {
        ippool.allocate(&config.ippool.pools).await
    } else {
        ippool.load_pool_order().await
    };
    if let Err(e) = pool_setup {
        error!("Failed to set up IP pools: {}", e);
        process::exit(1);
    }

    let tclass = Arc::new(TclassService::new(
        &config.traffic_classification.default_class,
    ));
    if config.traffic_classification.enabled {
        if let Err(e) = tclass
            .load(config.traffic_classification.classes.clone())
            .await
        {
            error!("Failed to load traffic classes: {}", e);
            process::exit(1);
        }
    }

    let protocols = Arc::new(ProtocolClassifier::from_config(
        &config.traffic_classification.protocol_rules,
    ));

    let disconnect = Arc::new(DisconnectService::new(config.disconnect.clone()));

    let sessions = Arc::new(SessionService::new(
        backend.clone(),
        Some(db.clone()),
        Some(ippool.clone()),
        Some(disconnect.clone()),
        tclass.clone(),
        config.session.clone(),
    ));
    match sessions.rehydrate().await {
        Ok(count) if count > 0 => info!(count, "Rehydrated sessions from cache"),
        Ok(_) => {}
        Err(e) => warn!("Failed to rehydrate sessions: {}", e),
    }
    let mut background = sessions.spawn_background_tasks();

    // Leases abandoned without an Accounting-Stop drift back to free
    {
        let ippool = ippool.clone();
        let interval = config.session.cleanup_interval;
        background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval));
            loop {
                ticker.tick().await;
                if let Err(e) = ippool.sweep_expired().await {
                    warn!("IP pool sweep failed: {}", e);
                }
            }
        }));
    }

    let subscription = if config.subscription.enabled {
        let processor = Arc::new(SubscriptionProcessor::new(
            db.clone(),
            config.subscription.clone(),
        ));
        processor.clone().spawn_scheduler();
        info!(
            processing_time = %config.subscription.processing_time,
            day_of_month = config.subscription.scheduler.day_of_month,
            "Subscription scheduler armed"
        );
        Some(processor)
    } else {
        None
    };

    let netflow = Arc::new(NetflowDispatcher::new(sessions.clone()));

    let listen = format!("{}:{}", config.listen_address, config.listen_port);
    let app = Arc::new(App {
        config,
        backend,
        db: Some(db),
        sessions: sessions.clone(),
        ippool,
        tclass,
        protocols,
        disconnect,
        netflow,
        subscription,
    });

    let listener = match tokio::net::TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", listen, e);
            process::exit(1);
        }
    };
    info!("Listening on {}", listen);

    let serve = axum::serve(listener, api::router(app)).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    });

    if let Err(e) = serve.await {
        error!("Server error: {}", e);
    }

    for handle in background {
        handle.abort();
    }
    sessions.shutdown().await;
    info!("netbill stopped");
}
