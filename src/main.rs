//! rankshift CLI - train, compare, and select embedding shifts.
//!
//! Three subcommands cover the workflow end to end:
//!
//! 1. `train`: learn a delta vector from a labeled corpus and persist the
//!    training result
//! 2. `compare`: run the learned shift against the identity baseline and
//!    apply the acceptance gate
//! 3. `select`: adaptive selection for a single query against the corpus
//!
//! Exit codes are part of the contract: `0` success, `1` argument or
//! runtime errors, `2` acceptance gate failure. Automation can therefore
//! distinguish "ran but regressed" from "failed to run".

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use serde::Deserialize;

use rankshift::adaptive::{AdaptiveConfig, AdaptiveWorkflow};
use rankshift::config::EngineConfig;
use rankshift::embed::provider::{EmbeddingProvider, HashEmbedder};
use rankshift::eval::gate::AcceptanceGate;
use rankshift::eval::metrics::{EvalQuery, RankingEvaluator, Reference};
use rankshift::shift::variants::WeightedStageShift;
use rankshift::shift::ShiftPipeline;
use rankshift::train::posneg::{PosNegTrainer, TrainerConfig};
use rankshift::train::store::{FsResultStore, ResultStore};
use rankshift::types::{CancelToken, TrainingQuery};

/// Evaluate, train, and adaptively select embedding shifts
///
/// rankshift learns additive delta vectors from labeled query/document
/// pairs, gates them against ranking-quality regressions, and picks the
/// best shift per query at retrieval time.
///
/// Examples:
///   rankshift train --corpus docs.json --labels labels.json -w claims
///   rankshift compare --corpus docs.json --labels labels.json -w claims
///   rankshift select --corpus docs.json -w claims "flood damage claim"
#[derive(Parser, Debug)]
#[command(name = "rankshift")]
#[command(version)]
#[command(about, long_about = None)]
struct Cli {
    /// Project root directory
    ///
    /// Where rankshift.toml is looked up. Defaults to the current
    /// directory.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Directory holding persisted training results
    #[arg(long, default_value = "rankshift-results")]
    results_dir: PathBuf,

    /// Verbose output
    ///
    /// Shows progress messages during execution: corpus size, usable
    /// query counts, training statistics.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Learn a delta vector from labeled pairs and persist the result
    Train {
        /// JSON corpus file: [{"id": ..., "text": ...}]
        #[arg(long)]
        corpus: PathBuf,

        /// JSON labels file: [{"id", "text", "relevant_doc_id"}]
        #[arg(long)]
        labels: PathBuf,

        /// Workflow name the result is stored under
        #[arg(short, long)]
        workflow: String,

        /// Scope discriminator within the workflow
        #[arg(long, default_value = "default")]
        scope: String,

        /// Disable aggregate delta norm clipping
        #[arg(long)]
        no_clip: bool,

        /// Hard-negative sampling: top-K non-relevant docs per query
        #[arg(long, default_value = "0")]
        hardneg_topk: usize,
    },

    /// Compare the learned shift against baseline and apply the gate
    Compare {
        /// JSON corpus file: [{"id": ..., "text": ...}]
        #[arg(long)]
        corpus: PathBuf,

        /// JSON labels file: [{"id", "text", "relevant_doc_id"}]
        #[arg(long)]
        labels: PathBuf,

        /// Workflow whose best training result is the shift under test
        #[arg(short, long)]
        workflow: String,

        /// Gate profile: "rank" or "rank+cosine"
        #[arg(long)]
        profile: Option<String>,

        /// Gate tolerance epsilon
        #[arg(long)]
        epsilon: Option<f64>,

        /// Use cancelled training results as well
        #[arg(long)]
        include_cancelled: bool,
    },

    /// Adaptive shift selection for one query
    Select {
        /// Query text
        query: String,

        /// JSON corpus file used as the reference set
        #[arg(long)]
        corpus: PathBuf,

        /// Workflow whose training results feed the generator
        #[arg(short, long)]
        workflow: String,

        /// Force baseline-only mode (always the identity shift)
        #[arg(long)]
        baseline_only: bool,

        /// Use cancelled training results as well
        #[arg(long)]
        include_cancelled: bool,
    },
}

/// One corpus row as loaded from the JSON corpus file.
#[derive(Debug, Deserialize)]
struct CorpusDoc {
    id: String,
    text: String,
}

/// One labeled row as loaded from the JSON labels file.
#[derive(Debug, Deserialize)]
struct LabelRow {
    id: String,
    text: String,
    relevant_doc_id: Option<String>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // clap already formats the message; keep argument failures on
            // exit code 1, distinct from gate failures (2)
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(1),
            };
        }
    };

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let config = EngineConfig::load(&cli.root);
    if cli.verbose {
        eprintln!("{}", config.display_summary());
    }

    match &cli.command {
        Command::Train {
            corpus,
            labels,
            workflow,
            scope,
            no_clip,
            hardneg_topk,
        } => run_train(cli, &config, corpus, labels, workflow, scope, *no_clip, *hardneg_topk),
        Command::Compare {
            corpus,
            labels,
            workflow,
            profile,
            epsilon,
            include_cancelled,
        } => run_compare(
            cli,
            &config,
            corpus,
            labels,
            workflow,
            profile.as_deref(),
            *epsilon,
            *include_cancelled,
        ),
        Command::Select {
            query,
            corpus,
            workflow,
            baseline_only,
            include_cancelled,
        } => run_select(
            cli,
            &config,
            query,
            corpus,
            workflow,
            *baseline_only,
            *include_cancelled,
        ),
    }
}

fn load_corpus(path: &PathBuf) -> Result<Vec<CorpusDoc>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read corpus file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse corpus file: {}", path.display()))
}

fn load_labels(path: &PathBuf) -> Result<Vec<TrainingQuery>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels file: {}", path.display()))?;
    let rows: Vec<LabelRow> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse labels file: {}", path.display()))?;
    Ok(rows
        .into_iter()
        .map(|r| TrainingQuery {
            id: r.id,
            text: r.text,
            relevant_doc_id: r.relevant_doc_id,
        })
        .collect())
}

fn embed_corpus(
    embedder: &HashEmbedder,
    docs: &[CorpusDoc],
) -> (HashMap<String, Vec<f32>>, Vec<Reference>) {
    let mut by_id = HashMap::new();
    let mut references = Vec::with_capacity(docs.len());
    for doc in docs {
        let embedding = embedder.embed(&doc.text);
        by_id.insert(doc.id.clone(), embedding.clone());
        references.push(Reference::new(doc.id.clone(), embedding));
    }
    (by_id, references)
}

#[allow(clippy::too_many_arguments)]
fn run_train(
    cli: &Cli,
    config: &EngineConfig,
    corpus_path: &PathBuf,
    labels_path: &PathBuf,
    workflow: &str,
    scope: &str,
    no_clip: bool,
    hardneg_topk: usize,
) -> Result<ExitCode> {
    let embedder = HashEmbedder::new(config.dim, &config.keywords)?;
    let docs = load_corpus(corpus_path)?;
    let labels = load_labels(labels_path)?;
    let (corpus, _) = embed_corpus(&embedder, &docs);

    if cli.verbose {
        eprintln!("📚 Corpus: {} documents", corpus.len());
        eprintln!("🏷️  Labels: {} queries", labels.len());
    }

    let trainer_config = TrainerConfig {
        workflow_name: workflow.to_string(),
        scope_id: scope.to_string(),
        base_directory: cli.results_dir.display().to_string(),
        clip_enabled: !no_clip,
        max_delta_norm: config.max_delta_norm,
        cancel_epsilon: config.cancel_epsilon,
        hardneg_topk: if hardneg_topk > 0 {
            hardneg_topk
        } else {
            config.hardneg_topk
        },
        hardneg_weight: config.hardneg_weight,
        ..Default::default()
    };

    let trainer = PosNegTrainer::new(&embedder, trainer_config);
    let result = trainer.train(&corpus, &labels, &CancelToken::new())?;

    println!(
        "Trained '{}' on {} cases: delta norm {:.4} (pre-clip {:.4}{})",
        workflow,
        result.stats.case_count,
        result.delta_norm,
        result.stats.pre_clip_norm,
        if result.stats.clip_applied { ", clipped" } else { "" },
    );
    println!(
        "map@1 improvement: {:+.4} (first) / {:+.4} (first+delta)",
        result.improvement_first, result.improvement_first_plus_delta
    );

    if result.is_cancelled {
        let reason = result.cancel_reason.as_deref().unwrap_or("cancel-out");
        println!("{} {}", "cancelled:".yellow().bold(), reason);
    } else if result.stats.cancel_out_suspected {
        println!(
            "{} per-case corrections largely cancel in the aggregate",
            "suspect:".yellow().bold()
        );
    }

    let store = FsResultStore::open(&cli.results_dir)?;
    store.save(&result)?;
    if cli.verbose {
        eprintln!("💾 Saved to {}", store.root().display());
    }

    Ok(ExitCode::SUCCESS)
}

#[allow(clippy::too_many_arguments)]
fn run_compare(
    cli: &Cli,
    config: &EngineConfig,
    corpus_path: &PathBuf,
    labels_path: &PathBuf,
    workflow: &str,
    profile: Option<&str>,
    epsilon: Option<f64>,
    include_cancelled: bool,
) -> Result<ExitCode> {
    let embedder = HashEmbedder::new(config.dim, &config.keywords)?;
    let docs = load_corpus(corpus_path)?;
    let labels = load_labels(labels_path)?;
    let (_, references) = embed_corpus(&embedder, &docs);

    let store = FsResultStore::open(&cli.results_dir)?;
    let Some(result) = store.load_best(workflow, include_cancelled)? else {
        bail!("no usable training result found for workflow '{}'", workflow);
    };

    let queries: Vec<EvalQuery> = labels
        .iter()
        .map(|q| {
            EvalQuery::new(
                q.id.clone(),
                embedder.embed(&q.text),
                q.relevant_doc_id.as_deref(),
            )
        })
        .collect();

    let candidate = ShiftPipeline::new(vec![Box::new(WeightedStageShift::delta(
        "learned",
        1.0,
        rankshift::embed::vector::fit_to_dim(&result.delta_vector, config.dim),
    ))]);

    let evaluator = RankingEvaluator::new();
    let report = evaluator.compare(
        &queries,
        &references,
        &ShiftPipeline::identity(),
        &candidate,
        &CancelToken::new(),
    )?;

    println!("{:<18} {:>10} {:>10} {:>10}", "metric", "baseline", "shift", "delta");
    for key in ["map@1", "ndcg@3", "cosine"] {
        println!(
            "{:<18} {:>10.4} {:>10.4} {:>+10.4}",
            key,
            report.metrics[&format!("{key}.baseline")],
            report.metrics[&format!("{key}.shift")],
            report.metrics[&format!("{key}.delta")],
        );
    }

    let profile = profile.unwrap_or(&config.gate_profile);
    let epsilon = epsilon.unwrap_or(config.gate_epsilon);
    let gate = AcceptanceGate::from_profile(profile, epsilon)?;
    let verdict = gate.evaluate(&report);

    if verdict.passed {
        println!("{} gate '{}' (epsilon {})", "PASS".green().bold(), profile, epsilon);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{} gate '{}' (epsilon {})", "FAIL".red().bold(), profile, epsilon);
        for note in &verdict.notes {
            println!("  • {}", note);
        }
        // Distinct exit code: ran fine, but the shift regressed
        Ok(ExitCode::from(2))
    }
}

fn run_select(
    cli: &Cli,
    config: &EngineConfig,
    query: &str,
    corpus_path: &PathBuf,
    workflow: &str,
    baseline_only: bool,
    include_cancelled: bool,
) -> Result<ExitCode> {
    let embedder = HashEmbedder::new(config.dim, &config.keywords)?;
    let docs = load_corpus(corpus_path)?;
    let (_, references) = embed_corpus(&embedder, &docs);

    let store = FsResultStore::open(&cli.results_dir)?;
    let adaptive_config = AdaptiveConfig {
        workflow_name: workflow.to_string(),
        dim: config.dim,
        include_cancelled,
        baseline_only: baseline_only || config.baseline_only,
    };
    let adaptive = AdaptiveWorkflow::new(&store, adaptive_config);

    let query_embedding = embedder.embed(query);
    let selected = adaptive.run(&query_embedding, &references)?;

    println!(
        "Selected shift: {} (best cosine {:.4})",
        selected.name.bold(),
        selected.score
    );

    if cli.verbose {
        let evaluator = RankingEvaluator::new();
        let ranked = evaluator.rank(&selected.shifted_query, &references)?;
        eprintln!("Top matches:");
        for (reference, sim) in ranked.iter().take(5) {
            eprintln!("  {:>8.4}  {}", sim, reference.id);
        }
    }

    Ok(ExitCode::SUCCESS)
}
