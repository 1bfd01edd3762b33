//! Score a single lead from the command line.
//!
//! Usage: `score_lead <name> <phone> <zip> [email]`

use std::env;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lead_quality_api::api_client::HttpTransport;
use lead_quality_api::config::Config;
use lead_quality_api::enrichment::LeadScorer;
use lead_quality_api::models::Lead;
use lead_quality_api::rate_limiter::ProviderLimiters;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_quality_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 3 {
        println!("Usage: score_lead <name> <phone> <zip> [email]");
        return Ok(());
    }

    let email = args.get(3).cloned().unwrap_or_default();
    let lead = Lead::new(args[0].as_str(), args[1].as_str(), args[2].as_str(), email);

    let config = Config::from_env()?;
    config.validate();

    let transport = Arc::new(HttpTransport::new(config.http_timeout)?);
    let limiters = ProviderLimiters::from_config(&config);
    let scorer = LeadScorer::from_config(&config, transport, &limiters);

    println!(
        "Validating lead: {}, {}, {}",
        lead.business_name, lead.phone, lead.zip_code
    );
    let result = scorer.score(&lead).await;

    println!("{}", "-".repeat(30));
    println!("Score: {} ({})", result.score, result.quality_tier);
    println!(
        "Verified Name: {}",
        result.verified_business_name.as_deref().unwrap_or("-")
    );
    println!("Website: {}", result.website.as_deref().unwrap_or("-"));
    println!("Reasons:");
    for reason in &result.match_reasons {
        println!("- {}", reason);
    }
    if !result.api_errors.is_empty() {
        println!("API errors: {}", result.api_error_strings().join(", "));
    }

    Ok(())
}
