//! Upload command.

use anyhow::{Context, Result};
use clap::Args;
use curasync_aws::{load_sdk_config, stores};
use curasync_config::InvestigatorMap;
use curasync_upload::{
    CodeOceanClient, CodeOceanCredentials, GitRepo, UploadError, UploadMode, Uploader, discover,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Destination bucket
    #[arg(short = 'b', long = "s3-bucket", env = "AWS_BUCKET")]
    pub bucket: String,

    /// Parameter store entry holding the Code Ocean domain and capsule id
    #[arg(short = 'p', long = "param-store", env = "AWS_PARAM_STORE")]
    pub param_store: String,

    /// Secrets store entry holding the Code Ocean API token
    #[arg(short = 's', long = "secrets-name", env = "AWS_SECRETS_NAME")]
    pub secrets_name: String,

    /// Log what would be uploaded and registered without contacting AWS or Code Ocean
    #[arg(long)]
    pub dry_run: bool,

    /// Repository checkout to read curation files from
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// AWS region; falls back to the SDK's environment lookup
    #[arg(long, env = "AWS_DEFAULT_REGION")]
    pub region: Option<String>,
}

/// Discover assets for `mode`, upload them and register each uploaded prefix.
pub async fn run(mode: UploadMode, args: UploadArgs) -> Result<()> {
    let investigators = InvestigatorMap::from_env().context("invalid investigator map")?;
    info!(investigators = investigators.len(), "Investigator map loaded");

    let repo = GitRepo::new(&args.repo);
    let discovery = discover(mode, &repo, &investigators)
        .await
        .with_context(|| format!("failed to discover assets in {}", args.repo.display()))?;

    if discovery.total() == 0 {
        println!("Nothing to upload");
        return Ok(());
    }

    if !discovery.plans.is_empty() {
        let uploader = if args.dry_run {
            Uploader::dry_run(args.bucket.clone())
        } else {
            live_uploader(&args).await?
        };
        for report in uploader.upload_all(&discovery.plans).await? {
            let uri = format!("s3://{}/{}", args.bucket, report.prefix);
            if report.dry_run {
                println!("Would upload {} ({} objects)", uri, report.objects.len());
            } else {
                println!("✓ {} ({} objects, registered)", uri, report.objects.len());
            }
        }
    }

    if !discovery.rejected.is_empty() {
        for (asset, reason) in &discovery.rejected {
            eprintln!("✗ {}: {}", asset, reason);
        }
        return Err(UploadError::Incomplete {
            failed: discovery.rejected.len(),
            total: discovery.total(),
        }
        .into());
    }

    Ok(())
}

/// Uploader backed by S3 and Code Ocean, configured from SSM and Secrets Manager.
async fn live_uploader(args: &UploadArgs) -> Result<Uploader> {
    let sdk = load_sdk_config(args.region.clone()).await;
    let (objects, params, secrets) = stores(&sdk);

    let credentials =
        CodeOceanCredentials::resolve(&params, &secrets, &args.param_store, &args.secrets_name)
            .await
            .context("failed to read Code Ocean settings")?;
    let client = CodeOceanClient::from_credentials(&credentials)?;

    Ok(Uploader::new(
        args.bucket.clone(),
        credentials.capsule_id.clone(),
        Arc::new(objects),
        Arc::new(client),
    ))
}
