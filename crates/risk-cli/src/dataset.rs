use anyhow::{bail, Context};
use risk_core::{Covariate, FeatureEncoder, FeatureVector};
use std::io::Read;
use std::path::Path;

pub const DEFAULT_LABEL: &str = "breast_cancer_history";

/// Encoded rows with their 0/1 outcome.
#[derive(Debug)]
pub struct LabelledSet {
    pub labels: Vec<bool>,
    pub rows: Vec<FeatureVector>,
    /// rows whose label was 9 (unknown)
    pub skipped: usize,
}

impl LabelledSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn load(path: &Path, encoder: &FeatureEncoder, label: &str) -> anyhow::Result<LabelledSet> {
    let f = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    read(f, encoder, label).with_context(|| format!("read {}", path.display()))
}

/// Covariate columns may be named by model feature name or caller key;
/// unrecognised columns (`year`, `count`, ...) are ignored. Empty cells are
/// left to the encoder's missing policy.
pub fn read<R: Read>(reader: R, encoder: &FeatureEncoder, label: &str) -> anyhow::Result<LabelledSet> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("csv header")?.clone();
    let label_idx = headers
        .iter()
        .position(|h| h == label)
        .with_context(|| format!("label column `{label}` not found"))?;
    let columns: Vec<(usize, Covariate)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != label_idx)
        .filter_map(|(i, h)| Covariate::lookup(h).map(|c| (i, c)))
        .collect();
    if columns.is_empty() {
        bail!("no covariate columns in header: {:?}", headers);
    }

    let mut out = LabelledSet {
        labels: vec![],
        rows: vec![],
        skipped: 0,
    };

    for (n, record) in rdr.records().enumerate() {
        let record = record?;
        // header is line 1
        let line = n + 2;
        let y = match record.get(label_idx).unwrap_or("") {
            "0" => false,
            "1" => true,
            "9" | "" => {
                out.skipped += 1;
                continue;
            }
            other => bail!("line {line}: label `{other}` is not 0/1/9"),
        };

        let mut selections = Vec::with_capacity(columns.len());
        for &(i, cov) in &columns {
            let cell = record.get(i).unwrap_or("");
            if cell.is_empty() {
                continue;
            }
            let code: i64 = cell
                .parse()
                .with_context(|| format!("line {line}: {} = `{cell}`", cov.feature_name()))?;
            selections.push((cov.key(), code));
        }
        let v = encoder
            .encode(selections)
            .with_context(|| format!("line {line}"))?;
        out.labels.push(y);
        out.rows.push(v);
    }

    if out.skipped > 0 {
        tracing::info!(skipped = out.skipped, "rows with unknown outcome skipped");
    }
    Ok(out)
}
