use crate::config::ResolvedConfig;
use crate::{AppError, JsonEnvelope};
use cellmatch_engine::{
    compute_inputs_hash, default_export_name, format_score, read_table, run_match,
    to_ranked_list, write_matrix_csv_file, write_ranked_csv_file, DistanceCorrelation,
    EmbeddingTable, ExportConfig, LabelPolicy, MatchError, ProgressEvent, RankedPair, RunHooks,
    RunStage, RunSummary, TableFormat, MAX_ROUND_DIGITS,
};
use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

const DISPLAY_ROUND_DIGITS: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(super) enum InputFormat {
    Csv,
    Tsv,
    Jsonl,
}

impl From<InputFormat> for TableFormat {
    fn from(value: InputFormat) -> Self {
        match value {
            InputFormat::Csv => TableFormat::Csv,
            InputFormat::Tsv => TableFormat::Tsv,
            InputFormat::Jsonl => TableFormat::Jsonl,
        }
    }
}

#[derive(Args, Debug)]
pub(super) struct MatchArgs {
    /// Embedding table (CSV, TSV or JSON Lines), or `-` for stdin
    input: String,
    /// Input format; inferred from the file extension when omitted (stdin defaults to csv)
    #[arg(long, value_enum)]
    format: Option<InputFormat>,
    /// Column holding the sample identifier
    #[arg(long)]
    sample_col: Option<String>,
    /// Column holding the group label
    #[arg(long)]
    label_col: Option<String>,
    /// Label value that puts a sample in the Left group
    #[arg(long)]
    left_label: Option<String>,
    /// Prefix of the embedding coordinate columns
    #[arg(long)]
    coord_prefix: Option<String>,
    /// Fail when rows of one sample disagree on the group label
    #[arg(long)]
    strict_labels: bool,
    #[arg(long)]
    threads: Option<usize>,
    /// Ranked CSV path; defaults to similarity_analysis_<dataset-name>.csv
    #[arg(long)]
    out: Option<PathBuf>,
    /// Also write the cleaned score matrix in wide layout
    #[arg(long)]
    matrix_out: Option<PathBuf>,
    #[arg(long, default_value = "data")]
    dataset_name: String,
    /// Ranked rows to print
    #[arg(long, default_value_t = 10)]
    top: usize,
    /// Round exported scores to this many decimal places
    #[arg(long)]
    round: Option<u32>,
    #[arg(long)]
    no_progress: bool,
}

#[derive(Serialize)]
struct MatchReport {
    input_path: String,
    out_path: String,
    matrix_out_path: Option<String>,
    best_match: BestMatchView,
    summary: RunSummary,
    failures_n: usize,
    top: Vec<RankedView>,
    duration_ms: u64,
}

#[derive(Serialize)]
struct BestMatchView {
    left_id: String,
    right_id: String,
    score: f64,
}

#[derive(Serialize)]
struct RankedView {
    rank: usize,
    left_id: String,
    right_id: String,
    score: f64,
}

pub(super) fn run(
    args: MatchArgs,
    resolved: ResolvedConfig,
    json_output: bool,
) -> Result<JsonEnvelope, AppError> {
    let MatchArgs {
        input,
        format,
        sample_col,
        label_col,
        left_label,
        coord_prefix,
        strict_labels,
        threads,
        out,
        matrix_out,
        dataset_name,
        top,
        round,
        no_progress,
    } = args;

    if matches!(threads, Some(0)) {
        return Err(AppError::usage("--threads must be >= 1".to_string()));
    }
    if round.is_some_and(|digits| digits > MAX_ROUND_DIGITS) {
        return Err(AppError::usage(format!(
            "--round must be <= {}",
            MAX_ROUND_DIGITS
        )));
    }

    let mut resolved = resolved;
    let config = &mut resolved.config;
    if let Some(value) = sample_col {
        config.input.sample_field = value;
    }
    if let Some(value) = label_col {
        config.input.label_field = value;
    }
    if let Some(value) = coord_prefix {
        config.input.coordinate_prefix = value;
    }
    if let Some(value) = left_label {
        config.grouping.left_label = value;
    }
    if strict_labels {
        config.grouping.label_policy = LabelPolicy::Strict;
    }
    config.validate().map_err(AppError::config)?;

    let started = Instant::now();
    let format = format.unwrap_or_else(|| infer_format(&input));
    let table = load_table(&input, format.into(), &resolved.config.input.coordinate_prefix)?;
    let inputs_hash = compute_inputs_hash(&table)
        .map_err(|err| AppError::internal(format!("failed to hash inputs: {}", err)))?;
    let trace = resolved.run_trace(Some(inputs_hash))?;
    info!(
        input = %input,
        rows = table.rows.len(),
        dims = table.coordinate_names.len(),
        "input loaded"
    );

    let progress = build_progress_bar(json_output || no_progress);
    let request = resolved.config.request(threads);
    let outcome = {
        let bar = progress.clone();
        let mut hooks = RunHooks::new().with_progress(move |event| update_progress(&bar, event));
        run_match(&table.rows, &request, &DistanceCorrelation, &mut hooks)
    };
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            progress.abandon();
            return Err(AppError::from(err).with_run_trace(trace));
        }
    };
    finish_progress(&progress, outcome.summary.left_n);

    let ranked = to_ranked_list(&outcome.cleaned);
    let export = &resolved.config.export;
    let out_path = out.unwrap_or_else(|| PathBuf::from(default_export_name(&dataset_name)));
    write_ranked_csv_file(&out_path, &ranked, export, round)
        .map_err(|err| AppError::export(err).with_run_trace(trace.clone()))?;
    if let Some(path) = &matrix_out {
        write_matrix_csv_file(path, &outcome.cleaned, export, round)
            .map_err(|err| AppError::export(err).with_run_trace(trace.clone()))?;
    }

    let report = MatchReport {
        input_path: input,
        out_path: out_path.display().to_string(),
        matrix_out_path: matrix_out.map(|p| p.display().to_string()),
        best_match: BestMatchView {
            left_id: outcome.best_match.left_id.clone(),
            right_id: outcome.best_match.right_id.clone(),
            score: outcome.best_match.score,
        },
        summary: outcome.summary.clone(),
        failures_n: outcome.failures.len(),
        top: top_rows(&ranked, top),
        duration_ms: duration_ms(started),
    };

    if !json_output {
        print_match_report(&report, &resolved.config.export, round);
    }

    Ok(JsonEnvelope {
        status: "OK".to_string(),
        error: None,
        run_trace: Some(trace),
        data: Some(json!(report)),
    })
}

fn infer_format(input: &str) -> InputFormat {
    let extension = Path::new(input)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("tsv") | Some("tab") => InputFormat::Tsv,
        Some("jsonl") | Some("ndjson") => InputFormat::Jsonl,
        _ => InputFormat::Csv,
    }
}

fn load_table(input: &str, format: TableFormat, prefix: &str) -> Result<EmbeddingTable, AppError> {
    let reader: Box<dyn Read> = if input == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(input).map_err(|err| {
            AppError::input(format!("failed to open input file {}: {}", input, err))
        })?;
        Box::new(BufReader::new(file))
    };
    read_table(reader, format, prefix).map_err(|err| AppError::from(MatchError::from(err)))
}

fn top_rows(ranked: &[RankedPair], top: usize) -> Vec<RankedView> {
    ranked
        .iter()
        .take(top)
        .enumerate()
        .map(|(idx, pair)| RankedView {
            rank: idx + 1,
            left_id: pair.left_id.clone(),
            right_id: pair.right_id.clone(),
            score: pair.score,
        })
        .collect()
}

fn build_progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} left samples scored {msg}",
    ) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

fn update_progress(bar: &ProgressBar, event: ProgressEvent) {
    match event.stage {
        RunStage::Score => {
            bar.set_length(event.total as u64);
            bar.set_position(event.completed as u64);
        }
        stage => bar.set_message(format!("({} done)", stage)),
    }
}

fn finish_progress(progress: &ProgressBar, left_total: usize) {
    progress.set_position(left_total as u64);
    progress.finish_with_message(format!("scored {} left samples", left_total));
}

fn duration_ms(started: Instant) -> u64 {
    let millis = started.elapsed().as_millis();
    if millis > u128::from(u64::MAX) {
        u64::MAX
    } else {
        millis as u64
    }
}

fn print_match_report(
    report: &MatchReport,
    headers: &ExportConfig,
    round: Option<u32>,
) {
    let digits = Some(round.unwrap_or(DISPLAY_ROUND_DIGITS));
    let summary = &report.summary;
    println!(
        "match complete: samples={} left={} right={} cells={} missing={} out={}",
        summary.samples,
        summary.left_n,
        summary.right_n,
        summary.cells,
        summary.missing_cells,
        report.out_path
    );
    if summary.label_conflicts > 0 {
        println!(
            "label conflicts: {} rows disagreed with their sample's first label",
            summary.label_conflicts
        );
    }
    println!(
        "best match: {} -> {} ({})",
        report.best_match.left_id,
        report.best_match.right_id,
        format_score(report.best_match.score, digits)
    );
    if report.top.is_empty() {
        return;
    }
    println!(
        "{}\t{}\t{}",
        headers.left_header, headers.right_header, headers.score_header
    );
    for row in &report.top {
        println!(
            "{}\t{}\t{}",
            row.left_id,
            row.right_id,
            format_score(row.score, digits)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_is_inferred_from_extension() {
        assert_eq!(infer_format("a.tsv"), InputFormat::Tsv);
        assert_eq!(infer_format("dir/a.JSONL"), InputFormat::Jsonl);
        assert_eq!(infer_format("a.ndjson"), InputFormat::Jsonl);
        assert_eq!(infer_format("a.csv"), InputFormat::Csv);
        assert_eq!(infer_format("-"), InputFormat::Csv);
    }

    #[test]
    fn top_rows_are_ranked_from_one() {
        let ranked = vec![
            RankedPair {
                left_id: "L".to_string(),
                right_id: "A".to_string(),
                score: 0.9,
            },
            RankedPair {
                left_id: "L".to_string(),
                right_id: "B".to_string(),
                score: 0.1,
            },
        ];
        let rows = top_rows(&ranked, 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[0].right_id, "A");
        assert_eq!(top_rows(&ranked, 10).len(), 2);
    }
}
