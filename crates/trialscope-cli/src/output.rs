//! Table rendering for CLI output.

use comfy_table::{presets::UTF8_FULL, Table};

use trialscope_core::filters::MAX_HPARAM_COUNT;
use trialscope_core::models::{ExperimentDetails, ModelList, MISSING_MARKER};
use trialscope_core::{MetricName, SampleView};

fn table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table
}

/// Format a chart cell; gaps render as the missing marker.
pub fn format_cell(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.4}", v),
        None => MISSING_MARKER.to_string(),
    }
}

/// Trials × batches matrix of metric values.
pub fn sample_table(view: &SampleView) -> Table {
    let mut table = table();
    let mut header = vec!["Trial".to_string()];
    header.extend(view.batches.iter().map(|b| format!("batch {}", b)));
    table.set_header(header);

    for (id, row) in view.trial_ids.iter().zip(&view.chart_data) {
        let mut cells = vec![id.to_string()];
        cells.extend(row.iter().map(|v| format_cell(*v)));
        table.add_row(cells);
    }
    table
}

/// One row per trial with its hyperparameters and latest metric value.
/// `hparams` picks the columns; when empty, the first few known names are used.
pub fn hparam_table(view: &SampleView, hparams: &[String]) -> Table {
    let columns: Vec<&String> = if hparams.is_empty() {
        view.hp_vals.keys().take(MAX_HPARAM_COUNT).collect()
    } else {
        hparams.iter().collect()
    };

    let mut table = table();
    let mut header = vec!["Trial".to_string()];
    header.extend(columns.iter().map(|c| c.to_string()));
    header.push("Metric".to_string());
    table.set_header(header);

    for (id, row) in view.trial_ids.iter().zip(&view.trial_hps) {
        let mut cells = vec![id.to_string()];
        match row {
            Some(row) => {
                cells.extend(columns.iter().map(|c| {
                    row.hparams
                        .get(*c)
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| MISSING_MARKER.to_string())
                }));
                cells.push(format_cell(row.metric));
            }
            None => {
                cells.extend(columns.iter().map(|_| MISSING_MARKER.to_string()));
                cells.push(MISSING_MARKER.to_string());
            }
        }
        table.add_row(cells);
    }
    table
}

pub fn metric_names_table(names: &[MetricName], searcher: Option<&MetricName>) -> Table {
    let mut table = table();
    table.set_header(["Metric", "Type", "Searcher"]);
    for name in names {
        let is_searcher = searcher == Some(name);
        table.add_row([
            name.name.clone(),
            name.metric_type.to_string(),
            if is_searcher { "✓" } else { "" }.to_string(),
        ]);
    }
    table
}

pub fn models_table(list: &ModelList) -> Table {
    let mut table = table();
    table.set_header(["ID", "Name", "Description", "Labels", "Versions", "Last Updated"]);
    for model in &list.models {
        let name = if model.archived {
            format!("{} (archived)", model.name)
        } else {
            model.name.clone()
        };
        table.add_row([
            model.id.to_string(),
            name,
            model.description.clone().unwrap_or_else(|| "-".to_string()),
            model.labels.join(", "),
            model.num_versions.to_string(),
            model.last_updated_time.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    table
}

pub fn validation_table(details: &ExperimentDetails) -> Table {
    let mut table = table();
    table.set_header(["Trial", "Ended", "Searcher Metric"]);
    for entry in &details.validation_history {
        table.add_row([
            entry.trial_id.to_string(),
            entry.end_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            format_cell(entry.searcher_metric),
        ]);
    }
    table
}
