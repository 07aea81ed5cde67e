//! Check command - builds every provider and reports the outcome.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use warden_config::ProviderRecord;
use warden_proxy::{BuildContext, ProviderBundle};

use super::{Context, SourceArgs};

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub sources: SourceArgs,
}

/// Outcome for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Skipped,
    Fatal,
}

/// Report line for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub mtls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run the check command.
pub async fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let config = args.sources.load_config()?;
    let providers = args.sources.load_providers()?;
    let build = args.sources.build_context(&config);

    let statuses = check_providers(&providers, &build);

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        for status in &statuses {
            match status.outcome {
                Outcome::Ok => println!(
                    "ok       {} ({}, {}{})",
                    status.name,
                    status.host.as_deref().unwrap_or_default(),
                    status.mode.as_deref().unwrap_or_default(),
                    if status.mtls { ", mtls" } else { "" }
                ),
                Outcome::Skipped => println!(
                    "skipped  {}: {}",
                    status.name,
                    status.error.as_deref().unwrap_or_default()
                ),
                Outcome::Fatal => println!(
                    "fatal    {}: {}",
                    status.name,
                    status.error.as_deref().unwrap_or_default()
                ),
            }
        }
    }

    let fatal = statuses
        .iter()
        .filter(|s| s.outcome == Outcome::Fatal)
        .count();
    if fatal > 0 {
        anyhow::bail!("{} provider(s) failed with a fatal error", fatal);
    }
    Ok(())
}

/// Build each provider on its own so every problem is reported.
pub fn check_providers(providers: &[ProviderRecord], build: &BuildContext) -> Vec<ProviderStatus> {
    providers
        .iter()
        .map(|provider| match ProviderBundle::build(provider, build) {
            Ok(bundle) => ProviderStatus {
                name: provider.name.clone(),
                outcome: Outcome::Ok,
                host: Some(bundle.host().to_string()),
                mode: Some(bundle.mode().to_string()),
                mtls: bundle.certificate().is_some(),
                error: None,
            },
            Err(e) => ProviderStatus {
                name: provider.name.clone(),
                outcome: if e.is_fatal() {
                    Outcome::Fatal
                } else {
                    Outcome::Skipped
                },
                host: None,
                mode: None,
                mtls: false,
                error: Some(e.to_string()),
            },
        })
        .collect()
}
