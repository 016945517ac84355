use anyhow::{bail, Context, Result};
use riskgate_core::{AgentStateSnapshot, OutputPayload, RequestContext, RuleEngine, RuleSet};
use riskgate_runtime::providers::{AnthropicProvider, LlmProvider, OpenAiProvider};
use riskgate_runtime::{
    EvaluationRequest, GuardPipeline, JsonLinesAuditSink, PipelineResult, RuntimeConfig,
    ShadowOrchestrator,
};
use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use crate::{EvaluateArgs, ProviderKind};

const DEFAULT_LOCAL_URL: &str = "http://localhost:11434/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_LOCAL_MODEL: &str = "llama3.1";

/// Exit code for a blocked request.
const BLOCKED: u8 = 2;

fn load_rules(path: Option<&Path>) -> Result<RuleSet> {
    match path {
        Some(path) => RuleSet::from_file(path)
            .with_context(|| format!("Failed to load rules from {}", path.display())),
        None => Ok(RuleSet::default()),
    }
}

fn read_input(args: &EvaluateArgs) -> Result<String> {
    if let Some(text) = &args.text {
        return Ok(text.clone());
    }
    if let Some(path) = &args.file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("Failed to read input from stdin")?;
    Ok(text)
}

fn build_request(args: &EvaluateArgs, input: String) -> Result<EvaluationRequest> {
    if !(0.0..=1.0).contains(&args.trust) {
        bail!("--trust must be in [0, 1], got {}", args.trust);
    }

    let mut context = match &args.user {
        Some(user) => RequestContext::for_user(user.clone()),
        None => RequestContext::default(),
    }
    .with_trust_score(args.trust)
    .with_strict_mode(args.strict);
    if let Some(role) = &args.role {
        context = context.with_role(role.clone());
    }

    let mut request = EvaluationRequest::new(input).with_context(context);
    if let Some(path) = &args.state {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let state: AgentStateSnapshot =
            serde_json::from_str(&raw).context("Invalid agent state snapshot")?;
        request = request.with_state(state);
    }
    if let Some(output) = &args.output_text {
        request = request.with_output(OutputPayload::text(output.clone()));
    }
    if let Some(deadline) = args.deadline {
        request = request.with_deadline(*deadline);
    }
    Ok(request)
}

fn runtime_config(args: &EvaluateArgs) -> Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("Failed to load runtime config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    let default_model = match args.provider {
        ProviderKind::Openai => Some(DEFAULT_OPENAI_MODEL),
        ProviderKind::Local => Some(DEFAULT_LOCAL_MODEL),
        ProviderKind::Anthropic | ProviderKind::None => None,
    };
    match (&args.model, default_model) {
        (Some(model), _) => config.completion.model = model.clone(),
        (None, Some(model)) if args.config.is_none() => {
            config.completion.model = model.to_string()
        }
        _ => {}
    }
    Ok(config)
}

fn build_provider(
    kind: ProviderKind,
    base_url: Option<&str>,
) -> Result<Option<Arc<dyn LlmProvider>>> {
    let provider: Arc<dyn LlmProvider> = match kind {
        ProviderKind::None => return Ok(None),
        ProviderKind::Anthropic => {
            let provider = AnthropicProvider::from_env()?;
            match base_url {
                Some(url) => Arc::new(provider.with_base_url(url)),
                None => Arc::new(provider),
            }
        }
        ProviderKind::Openai => {
            let provider = OpenAiProvider::from_env()?;
            match base_url {
                Some(url) => Arc::new(provider.with_base_url(url)),
                None => Arc::new(provider),
            }
        }
        ProviderKind::Local => {
            Arc::new(OpenAiProvider::local(base_url.unwrap_or(DEFAULT_LOCAL_URL))?)
        }
    };
    tracing::info!(provider = provider.name(), "Shadow provider configured");
    Ok(Some(provider))
}

pub(crate) async fn evaluate(
    args: EvaluateArgs,
    rules: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    let result = run(&args, rules).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    Ok(if result.blocked {
        ExitCode::from(BLOCKED)
    } else {
        ExitCode::SUCCESS
    })
}

async fn run(args: &EvaluateArgs, rules: Option<&Path>) -> Result<PipelineResult> {
    let engine = RuleEngine::new(load_rules(rules)?)?;
    let config = runtime_config(args)?;
    let input = read_input(args)?;
    let request = build_request(args, input)?;

    let mut pipeline =
        GuardPipeline::new(engine).with_request_deadline(config.shadow.request_deadline);
    if let Some(provider) = build_provider(args.provider, args.base_url.as_deref())? {
        let shadow = ShadowOrchestrator::builder()
            .config(config)
            .provider(provider)
            .build()?;
        pipeline = pipeline.with_shadow(shadow);
    }
    if let Some(path) = &args.audit_log {
        let sink = JsonLinesAuditSink::append(path)
            .await
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;
        pipeline = pipeline.with_audit_sink(Arc::new(sink));
    }

    Ok(pipeline.evaluate(request).await)
}

fn print_result(result: &PipelineResult) {
    let decision = if result.blocked { "BLOCK" } else { "ALLOW" };
    match &result.block_reason {
        Some(reason) => println!("{} ({})", decision, reason),
        None => println!("{}", decision),
    }
    println!("  rules:    {}", result.rule_version);
    if let Some(aggregated) = &result.aggregated_risk {
        println!(
            "  overall:  {:.3} {}",
            aggregated.overall_risk_score, aggregated.overall_risk_level
        );
        if let Some(reason) = &aggregated.escalation_reason {
            println!("  escalate: {}", reason);
        }
    }
    for score in &result.risk_scores {
        println!(
            "  {:<13} {:.3} {}",
            score.layer.as_str(),
            score.risk_score,
            score.risk_level
        );
        for (factor, value) in &score.risk_factors {
            if *value > 0.0 {
                println!("    {:<20} {:.3}", factor, value);
            }
        }
    }
    for analysis in &result.shadow_agent_analyses {
        let source = if analysis.fallback_used {
            analysis
                .fallback_reason
                .map(|r| format!("fallback: {}", r))
                .unwrap_or_else(|| "fallback".to_string())
        } else if analysis.cached {
            "cached".to_string()
        } else {
            analysis.model.clone()
        };
        println!(
            "  {:<13} {:.3} {} [{}]",
            analysis.layer.as_str(),
            analysis.risk_score,
            analysis.risk_level,
            source
        );
    }
    if let Some(redacted) = &result.redacted_input {
        println!("  redacted: {}", redacted);
    }
    if !result.llm_usage.is_empty() {
        println!(
            "  llm:      {} calls, {} tokens, ${:.5}",
            result.llm_usage.llm_calls,
            result.llm_usage.total_tokens,
            result.llm_usage.estimated_cost
        );
    }
}

pub(crate) fn validate_rules(path: &Path, json: bool) -> Result<ExitCode> {
    let rules = load_rules(Some(path))?;
    let version = rules.version.clone();
    let counts = (
        rules.patterns.pii.len(),
        rules.patterns.injection.len(),
        rules.patterns.leak.len(),
    );

    match RuleEngine::new(rules) {
        Ok(_) => {
            if json {
                let report = serde_json::json!({
                    "valid": true,
                    "version": version,
                    "patterns": {"pii": counts.0, "injection": counts.1, "leak": counts.2},
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "OK {} ({} pii, {} injection, {} leak patterns)",
                    version, counts.0, counts.1, counts.2
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if json {
                let report = serde_json::json!({
                    "valid": false,
                    "version": version,
                    "error": e.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("INVALID {}: {}", version, e);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

pub(crate) fn print_default_rules() -> Result<()> {
    print!("{}", RuleSet::default().to_yaml()?);
    Ok(())
}

pub(crate) fn print_default_runtime() -> Result<()> {
    print!("{}", serde_yaml::to_string(&RuntimeConfig::default())?);
    Ok(())
}
