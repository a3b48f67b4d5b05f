use anyhow::{Context, Result, anyhow, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use mergereq_api::{ClientConfig, MergeClient};
use mergereq_engine::{Dispatcher, EchoDispatcher, EngineConfig, HttpDispatcher, MergeEngine, TracingListener, parse_rules_file};
use mergereq_types::RequestContext;
use serde_json::{Map, Value, json};
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => run_batch(sub),
        Some(("check", sub)) => check_batch(sub),
        _ => unreachable!("clap requires a subcommand"),
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let file = Arg::new("file")
        .required(true)
        .action(ArgAction::Set)
        .help("Rules document (YAML or JSON)");
    let method = Arg::new("method")
        .long("method")
        .action(ArgAction::Set)
        .help("Default method for descriptors that do not name one");

    Command::new("mergereq")
        .about("Fan one call out into dependent sub-requests and merge the results")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Run a rules document and print the merged result")
                .arg(file.clone())
                .arg(method.clone())
                .arg(
                    Arg::new("base-url")
                        .long("base-url")
                        .action(ArgAction::Set)
                        .help("Upstream base URL (overrides MERGEREQ_BASE_URL)"),
                )
                .arg(
                    Arg::new("header")
                        .long("header")
                        .short('H')
                        .action(ArgAction::Append)
                        .help("Header forwarded with every sub-request, as NAME:VALUE"),
                )
                .arg(
                    Arg::new("cookie")
                        .long("cookie")
                        .action(ArgAction::Append)
                        .help("Cookie forwarded with every sub-request, as NAME=VALUE"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Resolve every sub-request without sending it"),
                )
                .arg(
                    Arg::new("compact")
                        .long("compact")
                        .action(ArgAction::SetTrue)
                        .help("Print the result on a single line"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Validate a rules document and list each field's dependencies")
                .arg(file)
                .arg(method),
        )
}

fn engine_config(matches: &ArgMatches) -> EngineConfig {
    match matches.get_one::<String>("method") {
        Some(method) => EngineConfig::from_env().with_default_method(method),
        None => EngineConfig::from_env(),
    }
}

fn run_batch(matches: &ArgMatches) -> Result<()> {
    let file = matches.get_one::<String>("file").context("missing rules file")?;
    let document = parse_rules_file(file)?;

    let mut context = document.context;
    apply_context_overrides(&mut context, matches)?;

    let mut engine = MergeEngine::with_config(document.rules, engine_config(matches))?.with_context(context);
    engine.observe(TracingListener);

    let dispatcher: Box<dyn Dispatcher> = if matches.get_flag("dry-run") {
        Box::new(EchoDispatcher)
    } else {
        let mut config = ClientConfig::from_env()?;
        if let Some(base_url) = matches.get_one::<String>("base-url") {
            config = config.with_base_url(base_url);
        }
        debug!(base_url = %config.base_url, "forwarding sub-requests");
        Box::new(HttpDispatcher::new(MergeClient::new(config)?))
    };

    let result = engine.run(dispatcher.as_ref())?;
    let rendered = if matches.get_flag("compact") {
        serde_json::to_string(result)?
    } else {
        serde_json::to_string_pretty(result)?
    };
    println!("{rendered}");
    Ok(())
}

fn check_batch(matches: &ArgMatches) -> Result<()> {
    let file = matches.get_one::<String>("file").context("missing rules file")?;
    let document = parse_rules_file(file)?;
    let engine = MergeEngine::with_config(document.rules, engine_config(matches))?;

    let mut report = Map::new();
    for field in engine.fields() {
        let Some(handler) = engine.handler(field) else {
            continue;
        };
        report.insert(
            field.to_string(),
            json!({
                "method": handler.spec().method,
                "path": handler.spec().path,
                "blockedOn": handler.blocking_fields(),
            }),
        );
    }
    println!("{}", serde_json::to_string_pretty(&Value::Object(report))?);
    Ok(())
}

fn apply_context_overrides(context: &mut RequestContext, matches: &ArgMatches) -> Result<()> {
    for raw in matches.get_many::<String>("header").into_iter().flatten() {
        let (name, value) = parse_header(raw)?;
        debug!(header = %mergereq_util::redact_sensitive(raw), "header override");
        context.headers.insert(name, value);
    }
    for raw in matches.get_many::<String>("cookie").into_iter().flatten() {
        let (name, value) = parse_cookie(raw)?;
        context.cookies.insert(name, value);
    }
    Ok(())
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw.split_once(':').ok_or_else(|| anyhow!("header '{raw}' must look like NAME:VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("header '{raw}' has an empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_cookie(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw.split_once('=').ok_or_else(|| anyhow!("cookie '{raw}' must look like NAME=VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("cookie '{raw}' has an empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}
