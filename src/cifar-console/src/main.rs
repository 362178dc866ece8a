use std::error::Error;
use std::path::{Path, PathBuf};

use cifar_serve::{ImageClassifier, LabeledImages};
use log::{info, warn};
use structopt::StructOpt;

mod report;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "cifar-console",
    about = "Explore and evaluate the CIFAR-10 image classifier"
)]
struct CmdArgs {
    #[structopt(
        long,
        parse(from_os_str),
        default_value = "model/image_classifier_clean",
        help = "Export directory of the TensorFlow SavedModel"
    )]
    model_dir: PathBuf,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Show the model architecture
    Info,

    /// Classify a single image
    Classify {
        #[structopt(help = "Image file path or http(s) URL to fetch it from")]
        image: String,

        #[structopt(long, help = "Print the full classification as JSON")]
        json: bool,
    },

    /// Evaluate the model against the CIFAR-10 test batch
    Evaluate {
        #[structopt(
            long,
            parse(from_os_str),
            default_value = "data/cifar-10-batches-bin/test_batch.bin",
            help = "CIFAR-10 binary batch file"
        )]
        data: PathBuf,

        #[structopt(long, default_value = "1000", help = "Maximum samples to evaluate")]
        limit: usize,

        #[structopt(long, default_value = "100", help = "Images per forward pass")]
        batch_size: usize,

        #[structopt(long, help = "Print the evaluation as JSON")]
        json: bool,
    },
}

fn is_url(image: &str) -> bool {
    image.starts_with("http://") || image.starts_with("https://")
}

fn evaluate(
    classifier: &ImageClassifier,
    data: &Path,
    limit: usize,
    batch_size: usize,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let samples = match LabeledImages::load(data, Some(limit)) {
        Ok(samples) => samples,
        Err(err) => {
            warn!("Could not load test data: {}", err);
            return Err(format!(
                "test data not available, place the CIFAR-10 binary batch at {}",
                data.display()
            )
            .into());
        }
    };

    let evaluation = classifier.evaluate(&samples, batch_size)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
    } else {
        print!("{}", report::evaluation(&evaluation)?);
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = CmdArgs::from_args();

    let classifier = ImageClassifier::load(&args.model_dir)?;
    info!("Loaded model from {}", args.model_dir.display());

    match args.cmd {
        Command::Info => print!("{}", report::model_info(&classifier.summary())?),
        Command::Classify { image, json } => {
            let classification = if is_url(&image) {
                classifier.classify_from_url(&image)?
            } else {
                classifier.classify_from_path(Path::new(&image))?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&classification)?);
            } else {
                print!("{}", report::classification(&classification)?);
            }
        }
        Command::Evaluate {
            data,
            limit,
            batch_size,
            json,
        } => evaluate(&classifier, &data, limit, batch_size, json)?,
    }

    Ok(())
}
