use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use archviz_contracts::config::{ConfigChain, MapSource, StudioSettings};
use archviz_contracts::events::EventWriter;
use archviz_contracts::location::{ImageType, Location};
use archviz_contracts::log::{Logger, TracingSink};
use archviz_contracts::log_fields;
use archviz_contracts::manifest::{GeneratorResolver, Manifest, TemplateVars};
use archviz_engine::capture::{MapCapture, MapImageSource, StaticMapSource};
use archviz_engine::datauri;
use archviz_engine::{
    default_backend_registry, load_manifest, new_session_id, DiagnosticsBundle, Studio,
};
use clap::{Args, Parser, Subcommand};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "archviz",
    version,
    about = "Architectural visualizations for a picked location"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture the map area and generate isometric, hologram and line-drawing images.
    Generate(GenerateArgs),
    /// Capture the map area only.
    Capture(CaptureArgs),
    /// Print the prompt a generation type would send.
    Prompt(PromptArgs),
    /// Run configuration and connectivity checks.
    Diagnose(DiagnoseArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    maps_api_key: Option<String>,
    #[arg(long)]
    image_size: Option<String>,
    #[arg(long, default_value = ".env")]
    dotenv: PathBuf,
}

#[derive(Debug, Args)]
struct LocationArgs {
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    lng: f64,
    #[arg(long, default_value = "")]
    address: String,
}

#[derive(Debug, Args)]
struct PromptVarArgs {
    #[arg(long)]
    building_type: Option<String>,
    #[arg(long)]
    scale: Option<String>,
    #[arg(long)]
    dimensions: Option<String>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[command(flatten)]
    location: LocationArgs,
    #[command(flatten)]
    vars: PromptVarArgs,
    #[command(flatten)]
    config: ConfigArgs,
    /// Manifest file path or http(s) URL.
    #[arg(long)]
    manifest: Option<String>,
    /// Restrict to these types; repeatable. Defaults to all three.
    #[arg(long = "type", value_parser = parse_image_type)]
    types: Vec<ImageType>,
    #[arg(long, default_value = "archviz-out")]
    out: PathBuf,
    /// Render placeholder images locally instead of calling the upstream API.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    no_fallback: bool,
    #[arg(long)]
    skip_capture: bool,
}

#[derive(Debug, Parser)]
struct CaptureArgs {
    #[command(flatten)]
    location: LocationArgs,
    #[command(flatten)]
    config: ConfigArgs,
    #[arg(long, default_value = "archviz-out")]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct PromptArgs {
    #[arg(long = "type", value_parser = parse_image_type)]
    image_type: ImageType,
    #[arg(long)]
    address: String,
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    lng: Option<f64>,
    #[command(flatten)]
    vars: PromptVarArgs,
    #[arg(long)]
    manifest: Option<String>,
    #[arg(long)]
    no_fallback: bool,
}

#[derive(Debug, Parser)]
struct DiagnoseArgs {
    #[command(flatten)]
    config: ConfigArgs,
    #[arg(long)]
    manifest: Option<String>,
    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

const EXIT_PARTIAL_FAILURE: i32 = 2;

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let message = format!("{err:#}");
            eprintln!("archviz error: {message}");
            if let Some(hint) = hint_for_error(&message) {
                eprintln!("hint: {hint}");
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ARCHVIZ_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Capture(args) => run_capture(args),
        Command::Prompt(args) => run_prompt(args),
        Command::Diagnose(args) => run_diagnose(args),
    }
}

fn parse_image_type(raw: &str) -> std::result::Result<ImageType, String> {
    ImageType::from_str(raw).map_err(|err| err.to_string())
}

fn config_chain(args: &ConfigArgs) -> ConfigChain {
    let mut overrides = MapSource::new("overrides");
    let flags = [
        ("ARCHVIZ_API_KEY", &args.api_key),
        ("ARCHVIZ_API_BASE", &args.api_base),
        ("ARCHVIZ_MAPS_API_KEY", &args.maps_api_key),
        ("ARCHVIZ_IMAGE_SIZE", &args.image_size),
    ];
    for (key, value) in flags {
        if let Some(value) = value {
            overrides.set(key, value.clone());
        }
    }
    ConfigChain::standard(overrides, &args.dotenv)
}

fn session_logger(out: &Path) -> Result<(Logger, EventWriter)> {
    fs::create_dir_all(out)
        .with_context(|| format!("failed creating output directory {}", out.display()))?;
    let events = EventWriter::new(out.join("events.jsonl"), new_session_id());
    let logger = Logger::new()
        .with_sink(TracingSink)
        .with_sink(events.clone());
    Ok((logger, events))
}

fn http_client(settings: &StudioSettings) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(settings.request_timeout)
        .build()
        .context("failed building HTTP client")
}

fn resolver_for(
    manifest: Option<&str>,
    no_fallback: bool,
    http: &HttpClient,
) -> Result<GeneratorResolver> {
    let manifest = match manifest {
        Some(source) => load_manifest(source, http)?,
        None => Manifest::default(),
    };
    let resolver = GeneratorResolver::new(manifest);
    Ok(if no_fallback {
        resolver.without_fallback()
    } else {
        resolver
    })
}

fn map_capture(settings: &StudioSettings, logger: &Logger) -> Result<MapCapture> {
    let source: Option<Box<dyn MapImageSource>> = match settings.maps_api_key.as_deref() {
        Some(key) => Some(Box::new(StaticMapSource::new(key, settings.request_timeout)?)),
        None => None,
    };
    Ok(MapCapture::new(source, logger.clone()))
}

fn location_from(args: &LocationArgs) -> Result<Location> {
    Location::new(args.lat, args.lng, args.address.as_str())
}

fn apply_vars(vars: &mut TemplateVars, args: &PromptVarArgs) {
    if let Some(value) = args.building_type.clone() {
        vars.building_type = Some(value);
    }
    if let Some(value) = args.scale.clone() {
        vars.scale = Some(value);
    }
    if let Some(value) = args.dimensions.clone() {
        vars.dimensions = Some(value);
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let settings = StudioSettings::resolve(&config_chain(&args.config))?;
    let (logger, events) = session_logger(&args.out)?;
    let http = http_client(&settings)?;
    let location = location_from(&args.location)?;
    let resolver = resolver_for(args.manifest.as_deref(), args.no_fallback, &http)?;

    let backend_name = if args.dryrun { "dryrun" } else { "http" };
    let backend = default_backend_registry(&settings, &logger)?
        .get(backend_name)
        .with_context(|| format!("image backend '{backend_name}' is not registered"))?;

    events.emit(
        "session_started",
        log_fields! {
            "lat": location.lat,
            "lng": location.lng,
            "address": location.address,
            "backend": backend_name,
            "manifest": args.manifest,
        },
    )?;

    if !args.skip_capture {
        let captured = map_capture(&settings, &logger)?.capture(&location);
        let path = write_image(&captured.data_uri, &args.out.join("map"), &http)?;
        println!("map          {:<11} {}", captured.source.as_str(), path.display());
    }

    let mut studio = Studio::new(location, resolver, backend, settings, logger);
    apply_vars(studio.vars_mut(), &args.vars);

    let report = if args.types.is_empty() {
        studio.generate_all()
    } else {
        studio.generate_types(&args.types)
    };

    for step in &report.steps {
        let slug = step.image_type.slug();
        match &step.result {
            Ok(image) => match write_image(image, &args.out.join(slug), &http) {
                Ok(path) => println!("{slug:<12} ok          {}", path.display()),
                Err(err) => {
                    println!("{slug:<12} unsaved     {err:#}");
                }
            },
            Err(err) => {
                let message = err.to_string();
                println!("{slug:<12} failed      {message}");
                if let Some(hint) = hint_for_error(&message) {
                    eprintln!("hint: {hint}");
                }
            }
        }
    }
    println!(
        "{}/{} generated; events in {}",
        report.succeeded(),
        report.steps.len(),
        events.path().display()
    );

    Ok(if report.all_succeeded() {
        0
    } else {
        EXIT_PARTIAL_FAILURE
    })
}

fn run_capture(args: CaptureArgs) -> Result<i32> {
    let settings = StudioSettings::resolve(&config_chain(&args.config))?;
    let (logger, _events) = session_logger(&args.out)?;
    let http = http_client(&settings)?;
    let location = location_from(&args.location)?;
    let captured = map_capture(&settings, &logger)?.capture(&location);
    let path = write_image(&captured.data_uri, &args.out.join("map"), &http)?;
    println!("{} {}", captured.source.as_str(), path.display());
    Ok(0)
}

fn run_prompt(args: PromptArgs) -> Result<i32> {
    let http = HttpClient::new();
    let resolver = resolver_for(args.manifest.as_deref(), args.no_fallback, &http)?;
    let mut vars = match (args.lat, args.lng) {
        (Some(lat), Some(lng)) => {
            TemplateVars::from_location(&Location::new(lat, lng, args.address.as_str())?)
        }
        _ => TemplateVars {
            address: args.address.trim().to_string(),
            location_context: Some(args.address.trim().to_string()),
            ..TemplateVars::default()
        },
    };
    apply_vars(&mut vars, &args.vars);

    let resolved = resolver
        .resolve(args.image_type)
        .map_err(anyhow::Error::msg)?;
    eprintln!(
        "{} via {} (model {})",
        args.image_type,
        resolved.origin,
        resolved.config.model
    );
    if let Some(reason) = &resolved.fallback_reason {
        eprintln!("note: {reason}");
    }
    println!("{}", resolved.render_prompt(&vars));
    Ok(0)
}

fn run_diagnose(args: DiagnoseArgs) -> Result<i32> {
    let chain = config_chain(&args.config);
    let settings = StudioSettings::resolve(&chain)?;
    let http = http_client(&settings)?;
    let manifest = match args.manifest.as_deref() {
        Some(source) => match load_manifest(source, &http) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!("manifest unavailable, checking built-in generators: {err:#}");
                Manifest::default()
            }
        },
        None => Manifest::default(),
    };

    let report =
        DiagnosticsBundle::standard(&chain, &settings, GeneratorResolver::new(manifest)).run_all();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(if report.has_failures() {
        EXIT_PARTIAL_FAILURE
    } else {
        0
    })
}

fn write_image(image: &str, stem: &Path, http: &HttpClient) -> Result<PathBuf> {
    let (mime, bytes) = if datauri::is_data_uri(image) {
        datauri::decode(image)?
    } else {
        let response = http
            .get(image)
            .send()
            .with_context(|| format!("failed downloading {image}"))?
            .error_for_status()
            .with_context(|| format!("failed downloading {image}"))?;
        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(datauri::PNG_MIME)
            .to_string();
        let bytes = response
            .bytes()
            .with_context(|| format!("failed reading {image}"))?
            .to_vec();
        (mime, bytes)
    };
    let path = stem.with_extension(datauri::extension_for_mime(&mime));
    fs::write(&path, bytes).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(path)
}

fn hint_for_error(message: &str) -> Option<&'static str> {
    let lowered = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));
    if has(&[
        "api key",
        "(401)",
        "(403)",
        "invalid credentials",
        "unauthorized",
        "incorrect api key",
    ]) {
        return Some("check ARCHVIZ_API_KEY (or OPENAI_API_KEY); `archviz diagnose` verifies it");
    }
    if has(&["(429)", "rate limit", "quota"]) {
        return Some("upstream rate limit reached; retry later or raise ARCHVIZ_STEP_DELAY_MS");
    }
    if has(&["configuration not found", "manifest", "prompt_template", "generator '"]) {
        return Some("check the --manifest file, or drop --no-fallback to use built-in prompts");
    }
    if has(&["network error", "timed out", "connection", "dns", "error sending request"]) {
        return Some("check network connectivity and ARCHVIZ_API_BASE");
    }
    None
}
