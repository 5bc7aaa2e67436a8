use eyre::{Result, WrapErr};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use structopt::StructOpt;
use termcolor::{ColorChoice, StandardStream};
use tracing_subscriber::EnvFilter;

mod artifact;
mod aws;
mod diff;
mod error;
mod evaluate;
mod hotswap;
mod stack;
mod stack_status;
mod template;
mod writer;

use crate::artifact::StackArtifact;
use crate::aws::{AwsError, AwsSdkProvider, SdkProvider};
use crate::error::Error;
use crate::hotswap::DeployStackResult;
use crate::stack::CloudFormationStack;
use crate::writer::Writer;

/// Exit code used when the changes need a full CloudFormation deployment.
const FULL_DEPLOYMENT_REQUIRED: i32 = 3;

fn parse_parameter(src: &str) -> Result<(String, String), Error> {
    match src.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(Error::ParseParameter(src.to_string())),
    }
}

#[derive(StructOpt)]
#[structopt(about = "Hotswap Lambda code and Step Functions definitions into a deployed stack")]
struct Opts {
    /// Name of the deployed stack
    stack_name: String,

    /// Synthesized CloudFormation template (JSON) to hotswap
    #[structopt(short, long, parse(from_os_str))]
    template: PathBuf,

    /// Asset parameter values, KEY=VALUE
    #[structopt(short, long = "parameter", parse(try_from_str = parse_parameter))]
    parameters: Vec<(String, String)>,

    #[structopt(long)]
    region: Option<String>,

    /// Account id, when it cannot be read from the stack ARN
    #[structopt(long)]
    account: Option<String>,

    /// Print the operations without applying them
    #[structopt(long)]
    dry_run: bool,

    /// Send a desktop notification when the hotswap finishes
    #[structopt(long)]
    notify: bool,
}

fn notify(stack_name: &str, result: &DeployStackResult) {
    let body = format!(
        "hotswapped {} resource(s) in {}",
        result.operations.len(),
        stack_name
    );
    if let Err(e) = notify_rust::Notification::new()
        .summary("cfhotswap")
        .body(&body)
        .show()
    {
        tracing::warn!(err = %e, "could not send notification");
    }
}

async fn run(opts: Opts) -> Result<i32> {
    let artifact = StackArtifact::from_template_file(&opts.stack_name, &opts.template)?;
    let parameters: HashMap<String, String> = opts.parameters.into_iter().collect();

    let sdk = AwsSdkProvider::from_env(opts.region, opts.account)
        .await
        .wrap_err("configuring aws clients")?;
    let stack = CloudFormationStack::lookup(sdk.cloudformation(), &opts.stack_name)
        .await
        .wrap_err("looking up stack")?;

    let stdout = StandardStream::stdout(ColorChoice::Auto);
    let mut handle = Writer::new(stdout.lock());

    if opts.dry_run {
        let plan = hotswap::plan_hotswap(&sdk, &parameters, &stack, &artifact)
            .await
            .wrap_err("planning hotswap")?;
        return match plan {
            Some(operations) => {
                writer::print_plan(&mut handle, &stack, &operations)?;
                Ok(0)
            }
            None => {
                writer::print_fallback(&mut handle, stack.stack_name())?;
                Ok(FULL_DEPLOYMENT_REQUIRED)
            }
        };
    }

    let start = Instant::now();
    let result = hotswap::try_hotswap_deployment(&sdk, &parameters, &stack, &artifact)
        .await
        .wrap_err("hotswapping stack")?;
    match result {
        Some(result) => {
            writer::print_result(&mut handle, &stack, &result, start.elapsed())?;
            if opts.notify && !result.no_op {
                notify(stack.stack_name(), &result);
            }
            Ok(0)
        }
        None => {
            writer::print_fallback(&mut handle, stack.stack_name())?;
            Ok(FULL_DEPLOYMENT_REQUIRED)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    color_eyre::install()?;

    let opts = Opts::from_args();
    tracing::info!(stack_name = %opts.stack_name, template = ?opts.template, "hotswapping stack");

    match run(opts).await {
        Ok(code) => std::process::exit(code),
        Err(e) => match e.downcast_ref::<Error>() {
            Some(Error::Aws(AwsError::CredentialsExpired)) => {
                eprintln!("Your credentials have expired");
                std::process::exit(1);
            }
            Some(Error::StackBusy { stack_name, status }) => {
                eprintln!(
                    "stack {} is {}, wait for the current deployment to finish",
                    stack_name, status
                );
                std::process::exit(1);
            }
            Some(Error::NoRegion) => {
                eprintln!("No region configured, pass --region or set AWS_REGION");
                std::process::exit(1);
            }
            _ => Err(e),
        },
    }
}
