use std::{env, fs, path::PathBuf, process::ExitCode};

use anyhow::{anyhow, Context, Result};
use oracle_host::config::errors::{ERR_CLI_HOST, ERR_CLI_INPUT, ERR_CLI_USAGE};
use oracle_host::{init_tracing, OracleHost, PipelineConfig};
use serde_json::Value;

struct Args {
    file: PathBuf,
    props: Value,
    presses: Vec<String>,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("oracle-render: {err:?}");
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let raw: Vec<String> = env::args().skip(1).collect();
    if raw.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let args = parse_args(&raw)?;
    let code = fs::read_to_string(&args.file)
        .with_context(|| format!("{ERR_CLI_INPUT}: cannot read {}", args.file.display()))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .with_context(|| format!("{ERR_CLI_HOST}: failed to build runtime"))?;
    runtime.block_on(render(code, args))
}

async fn render(code: String, args: Args) -> Result<()> {
    let mut host = OracleHost::new(PipelineConfig::from_env())
        .map_err(|err| anyhow!("{ERR_CLI_HOST}: {err}"))?;
    let id = host.mount(args.props, None);
    host.set_source(id, &code)
        .map_err(|err| anyhow!("{ERR_CLI_HOST}: {err}"))?;
    host.settle().await;

    for label in &args.presses {
        host.press(id, label)
            .map_err(|err| anyhow!("{ERR_CLI_HOST}: pressing '{label}' failed: {err}"))?;
    }

    let view = host.view(id).map_err(|err| anyhow!("{ERR_CLI_HOST}: {err}"))?;
    let json = serde_json::to_string_pretty(&view.to_json())
        .with_context(|| format!("{ERR_CLI_HOST}: cannot encode view"))?;
    println!("{json}");
    Ok(())
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut file: Option<PathBuf> = None;
    let mut props = Value::Object(Default::default());
    let mut presses = Vec::new();
    let mut idx = 0usize;
    while idx < raw.len() {
        match raw[idx].as_str() {
            "--props" => {
                idx += 1;
                let text = raw
                    .get(idx)
                    .with_context(|| format!("{ERR_CLI_USAGE}: --props expects a JSON object"))?;
                props = serde_json::from_str(text)
                    .with_context(|| format!("{ERR_CLI_USAGE}: --props is not valid JSON"))?;
            }
            "--press" => {
                idx += 1;
                let label = raw
                    .get(idx)
                    .with_context(|| format!("{ERR_CLI_USAGE}: --press expects a label"))?;
                presses.push(label.clone());
            }
            flag if flag.starts_with("--") => {
                return Err(anyhow!("{ERR_CLI_USAGE}: unexpected flag '{flag}'"));
            }
            path => {
                if file.is_some() {
                    return Err(anyhow!("{ERR_CLI_USAGE}: only one source file is accepted"));
                }
                file = Some(PathBuf::from(path));
            }
        }
        idx += 1;
    }
    let Some(file) = file else {
        print_usage();
        return Err(anyhow!("{ERR_CLI_USAGE}: missing source file"));
    };
    Ok(Args {
        file,
        props,
        presses,
    })
}

fn print_usage() {
    eprintln!(
        "Usage:\n  oracle-render <file> [--props <json>] [--press <label>]...\n\n\
         Runs generated component source through the pipeline and prints the\n\
         resulting view as JSON. Each --press taps the element labelled <label>."
    );
}
