// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All work is delegated to Layer 2 (application).
//
// Five commands are supported:
//   1. `convert` — build a SciREX document from parsed sentences
//   2. `segment` — add model-sized paragraphs to documents
//   3. `init`    — build a fresh model archive from a corpus
//   4. `predict` — count linked spans per coreference cluster
//   5. `resolve` — turn relation cluster keys into phrases

pub mod commands;

use anyhow::Result;
use burn::backend::{wgpu::WgpuDevice, Wgpu};
use clap::Parser;
use commands::{Commands, ConvertArgs, InitArgs, PredictArgs, ResolveArgs, SegmentArgs};

type RunBackend = Wgpu;

#[derive(Parser, Debug)]
#[command(
    name = "scidoc-ie",
    version = "0.1.0",
    about = "Entity, coreference-link and relation extraction over SciREX documents."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Convert(args) => run_convert(args),
            Commands::Segment(args) => run_segment(args),
            Commands::Init(args) => run_init(args),
            Commands::Predict(args) => run_predict(args),
            Commands::Resolve(args) => run_resolve(args),
        }
    }
}

/// Negative → the CPU adapter, `n` → discrete GPU `n`.
fn device_for(cuda_device: i32) -> WgpuDevice {
    match usize::try_from(cuda_device) {
        Ok(index) => WgpuDevice::DiscreteGpu(index),
        Err(_) => WgpuDevice::Cpu,
    }
}

fn run_convert(args: ConvertArgs) -> Result<()> {
    use crate::application::convert_use_case::ConvertUseCase;

    let output = args.output.clone();
    let doc = ConvertUseCase::new(args.into()).execute()?;
    println!("Converted '{}' ({} words) to '{}'.", doc.doc_id, doc.words.len(), output.display());
    Ok(())
}

fn run_segment(args: SegmentArgs) -> Result<()> {
    use crate::application::segment_use_case::SegmentUseCase;

    let output = args.output.clone();
    let wastage = SegmentUseCase::new(args.into()).execute()?;
    println!("Paragraphs written to '{}' (padding wastage {wastage:.2}%).", output.display());
    Ok(())
}

fn run_init(args: InitArgs) -> Result<()> {
    use crate::application::init_use_case::InitUseCase;

    let folder = args.archive_folder.clone();
    InitUseCase::new(args.into()).execute::<RunBackend>(&WgpuDevice::default())?;
    println!("Archive initialised in '{}'.", folder.display());
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::PredictUseCase;

    let device = device_for(args.cuda_device);
    tracing::info!("Running on {:?}", device);
    let linked = PredictUseCase::new(args.into()).execute::<RunBackend>(&device)?;
    println!("Link predictions written for {} documents.", linked.len());
    Ok(())
}

fn run_resolve(args: ResolveArgs) -> Result<()> {
    use crate::application::resolve_use_case::ResolveUseCase;

    let resolved = ResolveUseCase::new(args.into()).execute()?;
    println!(
        "Resolved {} relations for '{}'.",
        resolved.sorted_predicted_relations.len(),
        resolved.doc_id
    );
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::init_use_case::InitConfig;
    use crate::domain::labels::NerLabelKind;

    #[test]
    fn test_negative_device_runs_on_cpu() {
        assert_eq!(device_for(-1), WgpuDevice::Cpu);
        assert_eq!(device_for(1), WgpuDevice::DiscreteGpu(1));
    }

    #[test]
    fn test_predict_accepts_negative_device() {
        let cli = Cli::try_parse_from(["scidoc-ie", "predict", "archive", "test.jsonl", "out.jsonl", "-1"]).unwrap();
        match cli.command {
            Commands::Predict(args) => assert_eq!(args.cuda_device, -1),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_convert_takes_doc_id() {
        let cli = Cli::try_parse_from(["scidoc-ie", "convert", "sents.jsonl", "paper.jsonl", "1712.01234"]).unwrap();
        let Commands::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(args.doc_id, "1712.01234");
    }

    #[test]
    fn test_init_flags() {
        let cli = Cli::try_parse_from([
            "scidoc-ie",
            "init",
            "archive",
            "corpus.jsonl",
            "--ner-label-kind",
            "link",
            "--no-entity-classifier",
            "--display-metric",
            "span_f1",
        ])
        .unwrap();
        let Commands::Init(args) = cli.command else {
            panic!("expected init");
        };
        let cfg: InitConfig = args.into();
        assert_eq!(cfg.ner_label_kind, NerLabelKind::Link);
        assert!(!cfg.use_entity_classifier);
        assert_eq!(cfg.display_metrics, Some(vec!["span_f1".to_string()]));
    }
}
