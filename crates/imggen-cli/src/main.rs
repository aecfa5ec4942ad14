mod setup;
mod update;

#[cfg(test)]
mod test_support;

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use imggen_contracts::config::{Config, ConfigStore};
use imggen_contracts::models::{infer_from_model, ModelRegistry};
use imggen_contracts::options::{AspectRatio, InputFidelity, Quality, Resolution};
use imggen_contracts::providers::ProviderKind;
use imggen_contracts::ImggenError;
use imggen_engine::{
    create_provider, GenerationReport, GenerationRequest, Generator, ImageProvider, OutputTarget,
    ReferenceImage, VariationOutcome, MAX_VARIATIONS,
};
use tracing_subscriber::EnvFilter;

use crate::setup::run_setup;
use crate::update::{run_self_update, UpdateChecker, UpdateStatus, CURRENT_VERSION};

const LOG_ENV: &str = "IMGGEN_LOG";
const RULE_WIDTH: usize = 50;

#[derive(Debug, Parser)]
#[command(
    name = "imggen",
    version,
    about = "Generate images using AI providers (OpenAI, Google)"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    generate: GenerateArgs,
    /// Raise log verbosity on stderr (-v info, -vv debug).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Configure API keys and the default provider.
    Setup,
    /// List available models grouped by provider.
    ListModels,
    /// Check GitHub for a newer release.
    CheckUpdate,
    /// Reinstall the latest release with cargo.
    Update,
}

#[derive(Debug, Default, Args)]
struct GenerateArgs {
    /// Inline prompt text.
    #[arg(short = 'p', long)]
    prompt: Option<String>,
    /// Path to a file containing the prompt.
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,
    /// Reference image paths.
    reference_images: Vec<PathBuf>,
    /// File listing reference image paths, one per line.
    #[arg(short = 'r', long)]
    references: Option<PathBuf>,
    /// Number of variations (1-4).
    #[arg(short = 'n', long, default_value_t = 1)]
    variations: usize,
    /// Output directory or filename template.
    #[arg(long, visible_alias = "out-dir", default_value = ".")]
    output: String,
    /// Model name; the provider is inferred from it.
    #[arg(short = 'm', long)]
    model: Option<String>,
    #[arg(long, value_enum, ignore_case = true)]
    provider: Option<ProviderKind>,
    /// OpenAI quality.
    #[arg(short = 'q', long, value_enum, ignore_case = true)]
    quality: Option<Quality>,
    /// Google resolution.
    #[arg(long, value_enum, ignore_case = true)]
    resolution: Option<Resolution>,
    #[arg(short = 'a', long, value_enum)]
    aspect_ratio: Option<AspectRatio>,
    /// OpenAI input fidelity for reference images.
    #[arg(long, value_enum, ignore_case = true)]
    input_fidelity: Option<InputFidelity>,
    /// Show the cost estimate without generating.
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("imggen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Some(Command::Setup) => {
            let store = ConfigStore::open_default()?;
            run_setup(&store, &mut io::stdin().lock(), &mut io::stdout())?;
            Ok(0)
        }
        Some(Command::ListModels) => {
            print_models(&ModelRegistry::default());
            Ok(0)
        }
        Some(Command::CheckUpdate) => run_check_update(),
        Some(Command::Update) => run_self_update(),
        None => {
            let store = ConfigStore::open_default()?;
            let report = generate(&store, cli.generate, &|name| std::env::var(name).ok())?;
            Ok(exit_code(&report))
        }
    }
}

fn init_logging(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    // A subscriber may already be installed; logging is best effort.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn print_models(registry: &ModelRegistry) {
    println!("Available image generation models:");
    println!();
    for (provider, models) in registry.grouped() {
        println!("{}:", provider.display_name());
        for model in models {
            let marker = registry
                .default_for(provider)
                .filter(|spec| spec.name == model)
                .map(|_| " (default)")
                .unwrap_or_default();
            println!("  - {model}{marker}");
        }
    }
    println!();
    println!("Use --model <model_name> to select a specific model");
}

fn run_check_update() -> Result<i32> {
    match UpdateChecker::new()?.check(CURRENT_VERSION)? {
        UpdateStatus::Available { latest } => {
            println!("Update available: {latest} (installed {CURRENT_VERSION})");
            println!("   Run: imggen update");
        }
        UpdateStatus::UpToDate => println!("You're on the latest version ({CURRENT_VERSION})"),
        UpdateStatus::NoReleases => println!("No version tags found in repository"),
    }
    Ok(0)
}

fn validate(args: &GenerateArgs) -> Result<(), ImggenError> {
    match (&args.prompt, &args.file) {
        (None, None) => {
            return Err(ImggenError::invalid_argument(
                "Must provide either --prompt or --file",
            ))
        }
        (Some(_), Some(_)) => {
            return Err(ImggenError::invalid_argument("Cannot specify both --prompt and --file"))
        }
        _ => {}
    }
    if !args.reference_images.is_empty() && args.references.is_some() {
        return Err(ImggenError::invalid_argument(
            "Cannot specify both positional reference images and --references file",
        ));
    }
    if !(1..=MAX_VARIATIONS).contains(&args.variations) {
        return Err(ImggenError::invalid_argument(format!(
            "Variations must be between 1 and {MAX_VARIATIONS}, got {}",
            args.variations
        )));
    }
    Ok(())
}

fn load_prompt(prompt: Option<&str>, file: Option<&Path>) -> Result<String, ImggenError> {
    if let Some(text) = prompt.filter(|text| !text.trim().is_empty()) {
        return Ok(text.to_string());
    }
    let Some(path) = file else {
        return Err(ImggenError::invalid_argument("Must provide either --prompt or --file"));
    };
    if !path.is_file() {
        return Err(ImggenError::invalid_argument(format!(
            "Prompt file not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ImggenError::invalid_argument(format!(
            "Prompt file is empty: {}",
            path.display()
        )));
    }
    Ok(trimmed.to_string())
}

fn load_reference_paths(
    positional: &[PathBuf],
    list_file: Option<&Path>,
) -> Result<Vec<PathBuf>, ImggenError> {
    let paths = match list_file {
        Some(list) => {
            if !list.is_file() {
                return Err(ImggenError::invalid_argument(format!(
                    "References file not found: {}",
                    list.display()
                )));
            }
            let raw = std::fs::read_to_string(list)?;
            let paths: Vec<PathBuf> = raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect();
            if paths.is_empty() {
                return Err(ImggenError::invalid_argument(format!(
                    "References file is empty: {}",
                    list.display()
                )));
            }
            paths
        }
        None => positional.to_vec(),
    };
    if let Some(missing) = paths.iter().find(|path| !path.is_file()) {
        return Err(ImggenError::invalid_argument(format!(
            "Reference image not found: {}",
            missing.display()
        )));
    }
    Ok(paths)
}

/// `--model` (inferred) beats `--provider`, which beats the configured default.
fn resolve_provider(
    registry: &ModelRegistry,
    model: Option<&str>,
    provider: Option<ProviderKind>,
    config: &Config,
) -> Result<ProviderKind, ImggenError> {
    let Some(model) = model else {
        return Ok(provider.unwrap_or_else(|| config.preferred_provider()));
    };
    let inferred = infer_from_model(registry, model)?;
    if let Some(requested) = provider.filter(|requested| *requested != inferred) {
        return Err(ImggenError::invalid_argument(format!(
            "Model '{model}' belongs to provider {inferred}, not {requested}"
        )));
    }
    Ok(inferred)
}

fn resolve_api_key(
    store: &ConfigStore,
    config: &Config,
    kind: ProviderKind,
    dry_run: bool,
    env: &EnvLookup,
) -> Result<String> {
    if let Some(key) = config.api_key_with_env(kind, env) {
        return Ok(key);
    }
    if dry_run {
        return Ok(String::new());
    }
    if !io::stdin().is_terminal() {
        return Err(missing_key_error(kind).into());
    }
    println!("No {} API key configured. Starting setup.", kind.display_name());
    println!();
    let config = run_setup(store, &mut io::stdin().lock(), &mut io::stdout())?;
    println!();
    config
        .api_key_with_env(kind, env)
        .ok_or_else(|| missing_key_error(kind).into())
}

fn missing_key_error(kind: ProviderKind) -> ImggenError {
    ImggenError::configuration(format!(
        "No API key for {}. Set {} or run `imggen setup`",
        kind.display_name(),
        kind.api_key_env_vars().join(" or ")
    ))
}

type EnvLookup = dyn Fn(&str) -> Option<String>;

fn generate(
    store: &ConfigStore,
    args: GenerateArgs,
    env: &EnvLookup,
) -> Result<GenerationReport> {
    validate(&args)?;
    let prompt = load_prompt(args.prompt.as_deref(), args.file.as_deref())?;
    let reference_paths = load_reference_paths(&args.reference_images, args.references.as_deref())?;

    let config = store.load()?;
    let registry = ModelRegistry::default();
    let kind = resolve_provider(&registry, args.model.as_deref(), args.provider, &config)?;
    let api_key = resolve_api_key(store, &config, kind, args.dry_run, env)?;

    let reference_images = reference_paths
        .iter()
        .map(|path| ReferenceImage::load(path))
        .collect::<Result<Vec<_>>>()?;
    let request = GenerationRequest {
        prompt,
        reference_images,
        model: args.model.clone(),
        quality: args.quality,
        resolution: args.resolution,
        aspect_ratio: args.aspect_ratio,
        input_fidelity: args.input_fidelity,
        variations: args.variations,
    };
    let provider = create_provider(kind, &api_key)?;
    let generator = Generator::new(provider.as_ref()).with_dry_run(args.dry_run);
    let target = OutputTarget::parse(&args.output);

    target.check_collisions(&target.plan(request.variations))?;
    print_configuration(provider.as_ref(), &request, &reference_paths, &target, &generator);

    let total = request.variations;
    let report = generator.run(&request, &target, |outcome| print_outcome(outcome, total))?;
    if report.dry_run {
        println!();
        println!("Run without --dry-run to generate images.");
        return Ok(report);
    }
    print_summary(&report, &target);
    Ok(report)
}

fn exit_code(report: &GenerationReport) -> i32 {
    if report.dry_run || report.successful() > 0 {
        0
    } else {
        1
    }
}

fn print_configuration(
    provider: &dyn ImageProvider,
    request: &GenerationRequest,
    reference_paths: &[PathBuf],
    target: &OutputTarget,
    generator: &Generator<'_>,
) {
    let count = request.variations;
    println!(
        "Generating {count} image{} with {} ({})",
        if count == 1 { "" } else { "s" },
        provider.kind().display_name(),
        provider.model_for(request)
    );
    println!();
    println!("Configuration:");
    println!("  Prompt: \"{}\"", request.prompt);
    if let Some(quality) = request.quality {
        println!("  Quality: {quality}");
    }
    if let Some(resolution) = request.resolution {
        println!("  Resolution: {resolution}");
    }
    if let Some(aspect_ratio) = request.aspect_ratio {
        println!("  Aspect ratio: {aspect_ratio}");
    }
    if let Some(fidelity) = request.input_fidelity {
        println!("  Input fidelity: {fidelity}");
    }
    if !reference_paths.is_empty() {
        let names: Vec<String> = reference_paths
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        println!("  Reference images: {}", names.join(", "));
    }
    println!("  Variations: {count}");
    let plan = target.plan(count);
    match (plan.first(), plan.last()) {
        (Some(first), Some(last)) if plan.len() > 1 => println!(
            "  Output: {} ... {}",
            first.image_path.display(),
            last.image_path.display()
        ),
        (Some(first), _) => println!("  Output: {}", first.image_path.display()),
        _ => {}
    }
    println!();
    let estimate = generator.estimate(request);
    if estimate.priced {
        println!("Estimated cost: ${:.2}", estimate.total);
    } else {
        println!("Estimated cost: unknown (no published price for these settings)");
    }
}

fn print_outcome(outcome: &VariationOutcome, total: usize) {
    let mark = if outcome.is_success() { "✓" } else { "✗" };
    println!(
        "  [{}/{total}] Generating {}... {mark}",
        outcome.index, outcome.filename
    );
}

fn print_summary(report: &GenerationReport, target: &OutputTarget) {
    let done = report.outcomes.len();
    println!();
    println!("{}", "=".repeat(RULE_WIDTH));
    println!("Generation complete!");
    println!("  Successful: {}/{done}", report.successful());
    if report.failed() > 0 {
        println!("  Failed: {}/{done}", report.failed());
        println!();
        println!("Errors:");
        let mut failures: Vec<_> = report
            .outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err().map(|err| (outcome, err)))
            .collect();
        failures.sort_by_key(|(outcome, _)| outcome.index);
        for (outcome, failure) in failures {
            match &failure.finish_reason {
                Some(reason) => println!("  - {}: {} ({reason})", outcome.filename, failure.error),
                None => println!("  - {}: {}", outcome.filename, failure.error),
            }
        }
        if report.rate_limited() {
            println!();
            println!(
                "Some requests were rate limited. Wait a moment and retry with fewer variations."
            );
        }
    }
    println!();
    println!("Actual cost: ${:.2}", report.actual_cost_usd());
    println!("Output directory: {}", target.dir.display());
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;
    use imggen_contracts::config::{Config, ConfigStore};
    use imggen_contracts::models::ModelRegistry;
    use imggen_contracts::options::{AspectRatio, Quality, Resolution};
    use imggen_contracts::providers::ProviderKind;
    use imggen_contracts::ImggenError;

    use super::{
        exit_code, generate, load_prompt, load_reference_paths, resolve_provider, validate, Cli,
        Command, GenerateArgs,
    };

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn args(prompt: Option<&str>) -> GenerateArgs {
        GenerateArgs {
            prompt: prompt.map(str::to_string),
            variations: 1,
            output: ".".to_string(),
            ..GenerateArgs::default()
        }
    }

    fn is_invalid(result: Result<(), ImggenError>) -> bool {
        matches!(result, Err(ImggenError::InvalidArgument(_)))
    }

    #[test]
    fn cli_parses_generation_flags() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "imggen", "-p", "a fox", "ref1.png", "ref2.jpg", "-n", "3", "--output", "out/",
            "-q", "HIGH", "--resolution", "2K", "-a", "16:9", "--dry-run",
        ])?;
        assert!(cli.command.is_none());
        let generate = cli.generate;
        assert_eq!(generate.prompt.as_deref(), Some("a fox"));
        assert_eq!(
            generate.reference_images,
            vec![PathBuf::from("ref1.png"), PathBuf::from("ref2.jpg")]
        );
        assert_eq!(generate.variations, 3);
        assert_eq!(generate.output, "out/");
        assert_eq!(generate.quality, Some(Quality::High));
        assert_eq!(generate.resolution, Some(Resolution::TwoK));
        assert_eq!(generate.aspect_ratio, Some(AspectRatio::Landscape16x9));
        assert!(generate.dry_run);
        Ok(())
    }

    #[test]
    fn cli_parses_subcommands() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["imggen", "list-models"])?;
        assert!(matches!(cli.command, Some(Command::ListModels)));
        let cli = Cli::try_parse_from(["imggen", "check-update"])?;
        assert!(matches!(cli.command, Some(Command::CheckUpdate)));
        Ok(())
    }

    #[test]
    fn cli_rejects_unknown_option_values() {
        assert!(Cli::try_parse_from(["imggen", "-p", "x", "-a", "2:1"]).is_err());
        assert!(Cli::try_parse_from(["imggen", "-p", "x", "--provider", "stability"]).is_err());
    }

    #[test]
    fn validation_requires_exactly_one_prompt_source() {
        assert!(is_invalid(validate(&args(None))));
        let mut both = args(Some("x"));
        both.file = Some(PathBuf::from("prompt.txt"));
        assert!(is_invalid(validate(&both)));
        assert!(validate(&args(Some("x"))).is_ok());
    }

    #[test]
    fn validation_bounds_variations() {
        for variations in [0, 5] {
            let mut bad = args(Some("x"));
            bad.variations = variations;
            assert!(is_invalid(validate(&bad)));
        }
        let mut max = args(Some("x"));
        max.variations = 4;
        assert!(validate(&max).is_ok());
    }

    #[test]
    fn validation_rejects_both_reference_sources() {
        let mut both = args(Some("x"));
        both.reference_images = vec![PathBuf::from("a.png")];
        both.references = Some(PathBuf::from("refs.txt"));
        assert!(is_invalid(validate(&both)));
    }

    #[test]
    fn prompt_file_is_trimmed_and_must_exist() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prompt.txt");
        std::fs::write(&path, "  a quiet harbor\n")?;
        assert_eq!(load_prompt(None, Some(path.as_path()))?, "a quiet harbor");

        std::fs::write(&path, "   \n")?;
        assert!(load_prompt(None, Some(path.as_path())).is_err());
        assert!(load_prompt(None, Some(temp.path().join("missing.txt").as_path())).is_err());
        assert_eq!(load_prompt(Some("inline"), None)?, "inline");
        Ok(())
    }

    #[test]
    fn reference_list_file_skips_blank_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let first = temp.path().join("a.png");
        let second = temp.path().join("b.png");
        std::fs::write(&first, b"a")?;
        std::fs::write(&second, b"b")?;
        let list = temp.path().join("refs.txt");
        std::fs::write(
            &list,
            format!("{}\n\n  {}  \n", first.display(), second.display()),
        )?;

        assert_eq!(load_reference_paths(&[], Some(list.as_path()))?, vec![first, second]);

        std::fs::write(&list, "\n\n")?;
        assert!(load_reference_paths(&[], Some(list.as_path())).is_err());
        Ok(())
    }

    #[test]
    fn missing_reference_image_is_reported() {
        let err = load_reference_paths(&[PathBuf::from("does/not/exist.png")], None).err();
        let message = err.map(|err| err.to_string()).unwrap_or_default();
        assert!(message.contains("Reference image not found"));
    }

    #[test]
    fn provider_resolution_prefers_model_then_flag_then_config() -> anyhow::Result<()> {
        let registry = ModelRegistry::default();
        let config = Config {
            default_provider: Some(ProviderKind::Google),
            ..Config::default()
        };

        assert_eq!(
            resolve_provider(&registry, Some("gpt-image-1.5"), None, &config)?,
            ProviderKind::OpenAi
        );
        assert_eq!(
            resolve_provider(&registry, None, Some(ProviderKind::OpenAi), &config)?,
            ProviderKind::OpenAi
        );
        assert_eq!(
            resolve_provider(&registry, None, None, &config)?,
            ProviderKind::Google
        );
        Ok(())
    }

    #[test]
    fn provider_resolution_rejects_mismatch_and_unknown_models() {
        let registry = ModelRegistry::default();
        let config = Config::default();
        assert!(matches!(
            resolve_provider(
                &registry,
                Some("gemini-3-pro-image-preview"),
                Some(ProviderKind::OpenAi),
                &config
            ),
            Err(ImggenError::InvalidArgument(_))
        ));
        assert!(matches!(
            resolve_provider(&registry, Some("mystery-model"), None, &config),
            Err(ImggenError::AmbiguousModel(_))
        ));
    }

    #[test]
    fn dry_run_estimates_without_a_key_or_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ConfigStore::new(temp.path().join("config.json"));
        let out = temp.path().join("renders");
        let args = GenerateArgs {
            variations: 2,
            output: out.display().to_string(),
            dry_run: true,
            ..args(Some("a fox in snow"))
        };

        let report = generate(&store, args, &no_env)?;

        assert!(report.dry_run);
        assert!(report.outcomes.is_empty());
        assert!(report.estimate.priced);
        assert!((report.estimate.total - 0.018).abs() < 1e-9);
        assert_eq!(exit_code(&report), 0);
        assert!(!out.exists());
        assert!(!store.exists());
        Ok(())
    }

    #[test]
    fn dry_run_still_refuses_to_overwrite() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ConfigStore::new(temp.path().join("config.json"));
        std::fs::write(temp.path().join("imggen_002.png"), b"existing")?;
        let args = GenerateArgs {
            variations: 2,
            output: temp.path().display().to_string(),
            dry_run: true,
            ..args(Some("a fox in snow"))
        };

        let err = generate(&store, args, &no_env).err();

        let collision = err.as_ref().and_then(|err| err.downcast_ref::<ImggenError>());
        assert!(matches!(collision, Some(ImggenError::FileCollision { .. })));
        Ok(())
    }
}
