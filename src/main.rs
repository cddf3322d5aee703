use anyhow::Context;
use catdog_classifier::{
    AlignmentPolicy, AppConfig, AppContext, ClassifierError, SamplePrediction, UploadPrediction,
    Verdict,
};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Cats vs Dogs audio classifier.
///
/// Replays held-out test samples or classifies an uploaded .wav file with a
/// pre-trained model exported to ONNX.
#[derive(Parser)]
#[command(name = "catdog")]
#[command(version)]
struct Cli {
    /// JSON config file (default: ./classifier.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model file, overrides the config
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Test set archive (.npz), overrides the config
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the loaded model and test set
    Info,
    /// Predict one sample of the held-out test set
    Sample {
        /// Row of X_test to classify
        #[arg(default_value_t = 0)]
        index: usize,
    },
    /// Classify a .wav file
    Upload {
        path: PathBuf,

        /// pad-end, center, energy-peak, loop-tile or scan
        #[arg(long)]
        alignment: Option<AlignmentPolicy>,

        /// Resample to this rate instead of keeping the file's rate
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Trim leading/trailing audio quieter than this many dB below the peak
        #[arg(long)]
        trim_db: Option<f32>,

        /// Scale the waveform so its peak is 1.0
        #[arg(long)]
        peak_normalize: bool,
    },
}

const DEFAULT_CONFIG: &str = "classifier.json";

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            if let Some(ClassifierError::DimensionMismatch { .. } | ClassifierError::Decode(_)) =
                err.downcast_ref::<ClassifierError>()
            {
                eprintln!("The recording may differ too much from the training data.");
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).is_file() => AppConfig::from_file(DEFAULT_CONFIG)?,
        None => AppConfig::default(),
    };

    if let Some(model) = &cli.model {
        config.model_path = model.clone();
    }
    if let Some(dataset) = &cli.dataset {
        config.dataset_path = dataset.clone();
    }
    if let Commands::Upload {
        alignment,
        sample_rate,
        trim_db,
        peak_normalize,
        ..
    } = &cli.command
    {
        if let Some(alignment) = alignment {
            config.normalizer.alignment = *alignment;
        }
        if sample_rate.is_some() {
            config.normalizer.sample_rate = *sample_rate;
        }
        if trim_db.is_some() {
            config.normalizer.trim_top_db = *trim_db;
        }
        config.normalizer.peak_normalize |= *peak_normalize;
    }

    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    info!("Using model: {}", config.model_path.display());

    let mut context = AppContext::load(config).context("cannot start without a model")?;

    match &cli.command {
        Commands::Info => {
            let summary = context.summary();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Model:             {}", summary.model_path.display());
                println!("Features/sample:   {}", summary.expected_features);
                println!("Classes:           {}", summary.class_labels.join(", "));
                println!(
                    "Upload alignment:  {:?} ({} candidate(s))",
                    summary.alignment, summary.candidates_per_upload
                );
                match summary.sample_rate {
                    Some(rate) => println!("Sample rate:       {} Hz", rate),
                    None => println!("Sample rate:       native"),
                }
                match summary.test_samples {
                    Some(n) => println!("Test samples:      {}", n),
                    None => println!("Test samples:      unavailable"),
                }
            }
        }
        Commands::Sample { index } => {
            let prediction = context.predict_sample(*index)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&prediction)?);
            } else {
                print_sample(&prediction);
            }
        }
        Commands::Upload { path, .. } => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let prediction = context.predict_upload(&bytes)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&prediction)?);
            } else {
                print_upload(&prediction);
            }
        }
    }

    Ok(())
}

fn print_sample(prediction: &SamplePrediction) {
    println!("Sample:     {}", prediction.index);
    println!("True label: {}", prediction.truth);
    let mark = if prediction.correct { "correct" } else { "wrong" };
    println!("Predicted:  {} ({})", prediction.predicted, mark);
}

fn print_upload(prediction: &UploadPrediction) {
    println!("=== RESULT ===");
    match prediction.verdict {
        Verdict::Cat => println!("Meow! Detected a CAT"),
        Verdict::Dog => println!("Woof! Detected a DOG"),
        Verdict::Other => println!("Detected class: {}", prediction.label),
    }
    if let Some(confidence) = prediction.confidence {
        println!("Confidence: {:.1}%", confidence * 100.0);
    }
    println!(
        "Candidates: {} ({:?} alignment)",
        prediction.candidates, prediction.alignment
    );
}
