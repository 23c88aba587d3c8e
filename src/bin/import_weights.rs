//! ImageNet Weight Import Tool
//!
//! Converts the convolutional part of a torchvision VGG16 state dict into
//! a Burn record that the feature extractor can load.
//!
//! Usage:
//!   python -c "import torch, torchvision; torch.save(torchvision.models.vgg16(weights='IMAGENET1K_V1').state_dict(), 'vgg16.pth')"
//!   cargo run --release --features import --bin import_weights -- --input vgg16.pth --output weights/vgg16_imagenet

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{module::Module, record::FullPrecisionSettings, record::Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use clap::Parser;

use xray_transfer::backend::{default_device, DefaultBackend};
use xray_transfer::model::extractor::{
    config_file, torchvision_key_remaps, weights_file, Vgg16FeaturesRecord,
};
use xray_transfer::model::{FeatureExtractor, Vgg16FeaturesConfig};

/// Import torchvision VGG16 weights for the frozen extractor
#[derive(Parser, Debug)]
#[command(name = "import_weights")]
#[command(about = "Convert a torchvision vgg16 state dict into extractor weights")]
struct Args {
    /// PyTorch state dict (.pth / .pt) of torchvision's vgg16
    #[arg(short, long)]
    input: PathBuf,

    /// Output stem; `.mpk` and `.json` are written next to it
    #[arg(short, long, default_value = "weights/vgg16_imagenet")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let device = default_device();

    println!("Importing VGG16 weights from {}", args.input.display());

    let load_args = torchvision_key_remaps()
        .into_iter()
        .fold(LoadArgs::new(args.input.clone()), |load_args, (pattern, replacement)| {
            load_args.with_key_remap(&pattern, &replacement)
        });

    let record: Vgg16FeaturesRecord<DefaultBackend> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(load_args, &device)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    // torchvision ships the standard width only
    let config = Vgg16FeaturesConfig::new();
    let model = config.init::<DefaultBackend>(&device).load_record(record);
    model
        .save(&config, &args.output)
        .context("Failed to write extractor weights")?;

    println!("  Extractor: {}", model.name());
    println!("  Output at 224 px: {:?}", model.output_shape(224));
    println!("  Weights:   {}", weights_file(&args.output).display());
    println!("  Config:    {}", config_file(&args.output).display());
    println!();
    println!("Set this in the pipeline config:");
    println!("  [extractor]");
    println!("  weights = \"{}\"", args.output.display());
    Ok(())
}
