use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facewatch_core::reference::describe_reference;
use facewatch_core::{
    FaceMatcher, Matcher, ModelPaths, ModelSet, ReferenceSpec, DEFAULT_MATCH_THRESHOLD,
};
use facewatch_hw::Camera;
use std::path::PathBuf;
use std::time::Duration;

#[zbus::proxy(
    interface = "org.facewatch.Recognizer1",
    default_service = "org.facewatch.Recognizer1",
    default_path = "/org/facewatch/Recognizer1"
)]
trait Recognizer {
    async fn status(&self) -> zbus::Result<String>;
    async fn latest_match(&self) -> zbus::Result<String>;
    #[zbus(signal)]
    async fn face_matched(&self, label: &str, time: &str) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "facewatch", about = "facewatch live face recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every match event as it arrives
    Watch,
    /// Show daemon status
    Status,
    /// Show the most recent match
    Latest,
    /// List V4L2 capture devices
    Devices,
    /// Check that a reference image yields a face descriptor
    CheckReference {
        /// Reference image path
        image: PathBuf,
        /// Label for the reference
        #[arg(short, long, default_value = "reference")]
        label: String,
        /// Also match the face in this image against the reference
        #[arg(long)]
        candidate: Option<PathBuf>,
        /// Maximum distance for a match
        #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
        threshold: f32,
        /// Directory containing the ONNX models (default: $FACEWATCH_MODEL_DIR)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

fn proxy() -> Result<RecognizerProxyBlocking<'static>> {
    let conn = zbus::blocking::connection::Builder::session()?
        .method_timeout(Duration::from_secs(3))
        .build()
        .context("cannot connect to the session bus")?;
    Ok(RecognizerProxyBlocking::new(&conn)?)
}

fn print_match(json: &serde_json::Value) {
    match (json["label"].as_str(), json["time"].as_str()) {
        (Some(label), Some(time)) => println!("Face matched: {label} at {time}"),
        _ => println!("No face matched yet"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch => {
            let proxy = proxy()?;
            println!("Waiting for matches (Ctrl-C to stop)...");
            for signal in proxy.receive_face_matched()? {
                let args = signal.args()?;
                println!("Face matched: {} at {}", args.label(), args.time());
            }
        }
        Commands::Status => {
            let raw = proxy()?.status().context("facewatchd is not running")?;
            let json: serde_json::Value = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Commands::Latest => {
            let raw = proxy()?.latest_match().context("facewatchd is not running")?;
            print_match(&serde_json::from_str(&raw)?);
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::CheckReference {
            image,
            label,
            candidate,
            threshold,
            model_dir,
        } => {
            let dir = model_dir
                .or_else(|| std::env::var_os("FACEWATCH_MODEL_DIR").map(PathBuf::from))
                .unwrap_or_else(facewatch_core::default_model_dir);
            let paths = ModelPaths::in_dir(&dir);
            let missing = paths.missing();
            if !missing.is_empty() {
                for path in &missing {
                    eprintln!("missing model: {}", path.display());
                }
                bail!("models not installed in {}", dir.display());
            }

            let mut models = ModelSet::load(&paths)?;
            tracing::debug!(dir = %dir.display(), "models loaded");

            let reference =
                describe_reference(&mut models, &ReferenceSpec::new(label.as_str(), &image))?;
            println!(
                "{}: face found, {}-dim descriptor",
                image.display(),
                reference.descriptors[0].values.len()
            );

            if let Some(candidate) = candidate {
                let candidate_set =
                    describe_reference(&mut models, &ReferenceSpec::new("candidate", &candidate))?;
                let matcher = FaceMatcher::new(vec![reference], threshold);
                let result = matcher.best_match(&candidate_set.descriptors[0]);
                println!("{}: {result}", candidate.display());
            }
        }
    }

    Ok(())
}
