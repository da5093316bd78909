mod dataset;

use anyhow::Context;
use clap::{Parser, Subcommand};
use risk_core::{
    config::Config,
    encoder::MissingPolicy,
    evaluate::{roc_curve_with, select_threshold, EvaluationReport, ThresholdChoice, ThresholdMethod},
    pipeline::AppCore,
    schema::ScoreRequest,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "bcsc-risk", version, about = "BCSC breast cancer risk scoring tools")]
struct Args {
    /// JSON config file; environment variables still override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model directory (xgb_model.json + threshold.json)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// reject | fill_default
    #[arg(long, global = true)]
    missing_policy: Option<MissingPolicy>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print model feature order, threshold and the covariate codebook
    Schema {
        #[arg(long)]
        json: bool,
    },
    /// Score one set of covariate selections
    Score {
        /// key=code, repeatable (e.g. --set density=2)
        #[arg(long = "set", value_name = "KEY=CODE", value_parser = parse_selection)]
        set: Vec<(String, i64)>,

        /// JSON object of key -> code; --set entries are applied on top
        #[arg(long = "json", value_name = "FILE")]
        json_file: Option<PathBuf>,
    },
    /// AUC, confusion matrix and per-class report on a labelled CSV
    Evaluate {
        #[arg(long)]
        data: PathBuf,

        #[arg(long, default_value = dataset::DEFAULT_LABEL)]
        label: String,

        /// Evaluate at this threshold instead of the model's
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        json: bool,
    },
    /// Pick a decision threshold from the ROC curve and persist it
    Calibrate {
        #[arg(long)]
        data: PathBuf,

        #[arg(long, default_value = dataset::DEFAULT_LABEL)]
        label: String,

        /// gmean | youden
        #[arg(long, default_value = "gmean")]
        method: ThresholdMethod,

        /// Defaults to <model-dir>/threshold.json
        #[arg(long)]
        out: Option<PathBuf>,

        /// Drop collinear ROC points first (scikit-learn's default curve)
        #[arg(long)]
        drop_intermediate: bool,

        /// Print the choice without writing it
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_selection(s: &str) -> Result<(String, i64), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=CODE, got `{s}`"))?;
    let code = v
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("`{v}` is not an integer code: {e}"))?;
    Ok((k.trim().to_string(), code))
}

fn main() -> anyhow::Result<()> {
    // logs on stderr, results on stdout
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(args.config.as_deref())?;
    if let Some(dir) = args.model_dir {
        cfg.model_dir = dir;
    }
    if let Some(p) = args.missing_policy {
        cfg.missing_policy = p;
    }

    let core = AppCore::load(&cfg)
        .with_context(|| format!("load model artifacts from {}", cfg.model_dir.display()))?;

    match args.cmd {
        Cmd::Schema { json } => schema(&core, json),
        Cmd::Score { set, json_file } => score(&core, set, json_file.as_deref()),
        Cmd::Evaluate {
            data,
            label,
            threshold,
            json,
        } => evaluate(&core, &data, &label, threshold, json).map(|_| ()),
        Cmd::Calibrate {
            data,
            label,
            method,
            out,
            drop_intermediate,
            dry_run,
        } => {
            let out = out.unwrap_or_else(|| cfg.model_dir.join("threshold.json"));
            let write_to = (!dry_run).then_some(out.as_path());
            calibrate(&core, &data, &label, method, drop_intermediate, write_to).map(|_| ())
        }
    }
}

fn schema(core: &AppCore, json: bool) -> anyhow::Result<()> {
    let info = core.schema_info();
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }
    println!("threshold       {}", info.threshold);
    println!("missing_policy  {:?}", info.missing_policy);
    println!("feature order   {}", info.feature_names.join(", "));
    for c in &info.covariates {
        let req = if c.required { "required" } else { "optional" };
        println!("\n{} ({} / {}, {req})", c.display_name, c.key, c.feature_name);
        for o in &c.options {
            println!("  {:>3}  {}", o.code, o.label);
        }
    }
    Ok(())
}

fn score(core: &AppCore, set: Vec<(String, i64)>, json_file: Option<&Path>) -> anyhow::Result<()> {
    let mut selections: BTreeMap<String, i64> = match json_file {
        Some(p) => {
            let s = std::fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
            serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))?
        }
        None => BTreeMap::new(),
    };
    selections.extend(set);

    let resp = core.score_request(&ScoreRequest {
        trace_id: None,
        selections,
    })?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}

fn score_dataset(core: &AppCore, data: &Path, label: &str) -> anyhow::Result<(Vec<bool>, Vec<f64>)> {
    let set = dataset::load(data, &core.encoder, label)?;
    anyhow::ensure!(!set.is_empty(), "{}: no labelled rows", data.display());
    let scores = set
        .rows
        .iter()
        .map(|v| core.scorer.score_vector(v).map(|s| s.probability))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::info!(rows = set.len(), skipped = set.skipped, "dataset scored");
    Ok((set.labels, scores))
}

fn evaluate(
    core: &AppCore,
    data: &Path,
    label: &str,
    threshold: Option<f64>,
    json: bool,
) -> anyhow::Result<EvaluationReport> {
    let (labels, scores) = score_dataset(core, data, label)?;
    let threshold = threshold.unwrap_or_else(|| core.threshold());
    let report = EvaluationReport::build(&labels, &scores, threshold)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report);
    }
    let m = &report.confusion;
    println!("rows {}  positives {}", report.rows, report.positives);
    println!("ROC AUC {:.4}", report.auc);
    println!("threshold {:.4}", report.threshold);
    println!("confusion  tn={} fp={} fn={} tp={}", m.tn, m.fp, m.fn_, m.tp);
    println!("sensitivity {:.4}  specificity {:.4}", m.sensitivity(), m.specificity());
    println!("\n{:>8} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1", "support");
    for (name, c) in [("0", &report.negative), ("1", &report.positive)] {
        println!(
            "{name:>8} {:>9.4} {:>9.4} {:>9.4} {:>9}",
            c.precision, c.recall, c.f1, c.support
        );
    }
    println!("accuracy {:.4}", m.accuracy());
    for c in [report.gmean_choice, report.youden_choice].into_iter().flatten() {
        println!(
            "best {:?}: threshold {:.4} (tpr {:.4}, fpr {:.4})",
            c.method, c.threshold, c.tpr, c.fpr
        );
    }
    Ok(report)
}

fn calibrate(
    core: &AppCore,
    data: &Path,
    label: &str,
    method: ThresholdMethod,
    drop_intermediate: bool,
    out: Option<&Path>,
) -> anyhow::Result<ThresholdChoice> {
    let (labels, scores) = score_dataset(core, data, label)?;
    let roc = roc_curve_with(&labels, &scores, drop_intermediate)?;
    let choice = select_threshold(&roc, method).context("ROC curve has no finite threshold")?;
    let body = serde_json::to_string_pretty(&choice)?;
    println!("{body}");

    let Some(out) = out else {
        return Ok(choice);
    };
    std::fs::write(out, format!("{body}\n")).with_context(|| format!("write {}", out.display()))?;
    tracing::info!(
        path = %out.display(),
        threshold = choice.threshold,
        previous = core.threshold(),
        "threshold written"
    );
    Ok(choice)
}
