use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "riskgate", version, about = "Risk evaluation for AI agent requests")]
struct Cli {
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    json: bool,
    #[arg(
        long,
        global = true,
        help = "Rule set file (YAML or JSON); the built-in rules are used when omitted"
    )]
    rules: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate one request and print the decision
    Evaluate(EvaluateArgs),
    /// Load, validate and compile a rule set file
    ValidateRules { path: PathBuf },
    /// Print a default configuration as YAML
    PrintDefaults {
        #[arg(value_enum, default_value_t = DefaultsKind::Rules)]
        kind: DefaultsKind,
    },
}

#[derive(Args, Debug)]
pub(crate) struct EvaluateArgs {
    /// Input text; read from --file or stdin when omitted
    text: Option<String>,
    #[arg(short, long, conflicts_with = "text")]
    file: Option<PathBuf>,
    #[arg(long, help = "Agent output to check against the input")]
    output_text: Option<String>,
    #[arg(long, help = "Agent state snapshot as a JSON file")]
    state: Option<PathBuf>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    role: Option<String>,
    #[arg(long, default_value_t = 0.5)]
    trust: f64,
    #[arg(long, default_value_t = false)]
    strict: bool,
    #[arg(long, value_enum, default_value_t = ProviderKind::None)]
    provider: ProviderKind,
    #[arg(long, help = "Override the provider endpoint")]
    base_url: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, help = "Runtime config file (YAML)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Request deadline, e.g. 10s")]
    deadline: Option<humantime::Duration>,
    #[arg(long, help = "Append audit records to this JSON lines file")]
    audit_log: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum ProviderKind {
    /// Rule-only; escalations keep the rule-based verdict
    None,
    Anthropic,
    Openai,
    /// OpenAI-compatible server without credentials
    Local,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DefaultsKind {
    Rules,
    Runtime,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Evaluate(args) => commands::evaluate(args, cli.rules.as_deref(), cli.json).await,
        Commands::ValidateRules { path } => commands::validate_rules(&path, cli.json),
        Commands::PrintDefaults { kind } => {
            match kind {
                DefaultsKind::Rules => commands::print_default_rules()?,
                DefaultsKind::Runtime => commands::print_default_runtime()?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_evaluate() {
        let cli = Cli::try_parse_from([
            "riskgate",
            "--json",
            "evaluate",
            "hello there",
            "--trust",
            "0.2",
            "--strict",
            "--provider",
            "local",
            "--deadline",
            "3s",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Evaluate(args) => {
                assert_eq!(args.text.as_deref(), Some("hello there"));
                assert_eq!(args.trust, 0.2);
                assert!(args.strict);
                assert_eq!(args.provider, ProviderKind::Local);
                assert_eq!(args.deadline.map(|d| *d), Some(std::time::Duration::from_secs(3)));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_text_and_file_conflict() {
        let result = Cli::try_parse_from(["riskgate", "evaluate", "hi", "--file", "in.txt"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_print_defaults_kind() {
        let cli = Cli::try_parse_from(["riskgate", "print-defaults", "runtime"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::PrintDefaults {
                kind: DefaultsKind::Runtime
            }
        ));
    }
}
