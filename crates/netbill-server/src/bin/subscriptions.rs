use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use netbill_server::config::Config;
use netbill_server::db::BillingDb;
use netbill_server::subscription::SubscriptionProcessor;
use std::process;
use std::sync::Arc;

const EXIT_INVALID_ARGS: i32 = 1;
const EXIT_DB_FAILURE: i32 = 2;

/// netbill subscription processor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "netbill-subscriptions")]
struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "CONFIG", default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process monthly charges for the given date (default: today)
    Process {
        /// Billing date, YYYY-MM-DD
        date: Option<String>,
    },
    /// Show charge history for an account
    History {
        account_id: i32,
    },
    /// Show billing statistics
    Stats,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version requests are not argument errors
            if e.use_stderr() {
                let _ = e.print();
                process::exit(EXIT_INVALID_ARGS);
            }
            let _ = e.print();
            process::exit(0);
        }
    };

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", cli.config, e);
            process::exit(EXIT_INVALID_ARGS);
        }
    };

    let db = match BillingDb::connect(&config.database.url(), config.database.max_connections).await
    {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            process::exit(EXIT_DB_FAILURE);
        }
    };

    let processor = SubscriptionProcessor::new(db, config.subscription.clone());

    match cli.command {
        Command::Process { date } => {
            let target = match date {
                Some(text) => match NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
                    Ok(date) => date,
                    Err(_) => {
                        eprintln!("Invalid date format. Use YYYY-MM-DD: {}", text);
                        process::exit(EXIT_INVALID_ARGS);
                    }
                },
                None => Local::now().date_naive(),
            };

            println!("Processing monthly charges for {}...", target);
            match processor.process_monthly_charges(target).await {
                Ok(summary) => {
                    println!(
                        "Done: {} processed, {} charged, {} skipped, {} failed",
                        summary.processed, summary.succeeded, summary.skipped, summary.failed
                    );
                }
                Err(e) => {
                    eprintln!("Failed to process monthly charges: {}", e);
                    process::exit(EXIT_DB_FAILURE);
                }
            }
        }

        Command::History { account_id } => {
            match processor.history(account_id, 20).await {
                Ok(charges) => {
                    println!("Charge history for account {}:", account_id);
                    println!("=====================================");
                    if charges.is_empty() {
                        println!("No charges found for this account");
                        return;
                    }
                    for charge in &charges {
                        println!(
                            "{} - {:.2} (balance after: {:.2})",
                            charge.charged_at.format("%Y-%m-%d %H:%M:%S"),
                            charge.amount,
                            charge.balance_after
                        );
                    }
                    println!();
                    println!("Total charges: {}", charges.len());
                }
                Err(e) => {
                    eprintln!("Failed to get charge history: {}", e);
                    process::exit(EXIT_DB_FAILURE);
                }
            }
        }

        Command::Stats => match processor.stats().await {
            Ok(stats) => {
                println!("Subscription Billing Statistics:");
                println!("=================================");
                println!("Total Accounts: {}", stats.total_accounts);
                println!("Active Accounts: {}", stats.active_accounts);
                println!("Charges This Month: {}", stats.charges_this_month);
                println!("Revenue This Month: {:.2}", stats.total_revenue);
            }
            Err(e) => {
                eprintln!("Failed to get statistics: {}", e);
                process::exit(EXIT_DB_FAILURE);
            }
        },
    }
}
